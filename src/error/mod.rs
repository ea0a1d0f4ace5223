//! Error types module

pub mod types;

pub use types::ProxyError;
