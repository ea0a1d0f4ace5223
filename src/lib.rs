//! LLM Key Proxy library
//!
//! A stateless-to-clients reverse proxy that fronts a single upstream
//! inference API and spreads traffic across a pool of API keys,
//! rotating away from keys the upstream rejects while preserving
//! low-latency streaming delivery.

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod server;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::ProxyError;
pub use server::App;
