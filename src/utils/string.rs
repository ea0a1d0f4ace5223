//! String utilities
//!
//! Helper functions for safe string manipulation, mainly used to mask
//! credentials before they reach logs or the stats endpoint.

/// Number of leading characters kept when masking an API key.
pub const KEY_MASK_CHARS: usize = 10;

/// Safely truncate a string at a character boundary
///
/// Truncates a string to at most `max_chars` characters, ensuring the
/// truncation happens at a valid UTF-8 character boundary.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Mask an API key for logging and diagnostics
///
/// Keeps the first [`KEY_MASK_CHARS`] characters and appends `...`.
/// Keys at or below the mask length are returned unchanged.
///
/// # Example
/// ```
/// use llm_key_proxy::utils::mask_key;
///
/// assert_eq!(mask_key("sk-abcdefghijklmnop"), "sk-abcdefg...");
/// assert_eq!(mask_key("short"), "short");
/// ```
pub fn mask_key(key: &str) -> String {
    if key.chars().count() > KEY_MASK_CHARS {
        format!("{}...", truncate_str(key, KEY_MASK_CHARS))
    } else {
        key.to_string()
    }
}
