//! Key Pool Module
//!
//! Manages the pool of upstream API keys: one registry of per-key
//! health metadata behind a single lock, a configurable selection
//! policy over it, and the update paths that react to observed
//! upstream status codes or probe results.

mod pool;
mod record;
mod strategy;

pub use pool::{KeyPool, NoAvailableKey};
pub use record::{KeyRecord, KeySnapshot};
pub use strategy::SelectionStrategy;
