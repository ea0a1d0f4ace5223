//! Services module
//!
//! Contains the key pool state machine and the active health prober.

pub mod health_probe;
pub mod key_pool;

pub use health_probe::HealthProber;
pub use key_pool::{KeyPool, KeySnapshot, NoAvailableKey, SelectionStrategy};
