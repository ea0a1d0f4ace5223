//! Utility helpers shared across the crate.

pub mod string;

pub use string::{mask_key, truncate_str, KEY_MASK_CHARS};
