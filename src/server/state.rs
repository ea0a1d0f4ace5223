//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction.

use crate::config::Settings;
use crate::services::key_pool::KeyPool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state
///
/// Cheaply cloneable (via Arc) and thread-safe. The key pool is the
/// only mutable piece; everything else is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Key registry, selection, and health state
    pub key_pool: Arc<KeyPool>,

    /// Shared HTTP client for upstream calls and probes
    ///
    /// Standard TLS verification, no global timeout: live-traffic
    /// forwarding runs for the duration of the upstream response, and
    /// probes bound their own requests.
    pub client: reqwest::Client,

    /// Application start time (for uptime logging)
    pub start_time: Instant,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);

        // Redirects are relayed to the caller, never followed here;
        // following one would swap in a different resource's body and
        // can leak the bearer credential cross-origin.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let key_pool = Arc::new(KeyPool::new(
            settings.selection_strategy,
            Duration::from_secs(settings.key_cooldown_seconds),
        ));

        if settings.has_static_keys() {
            key_pool.upsert_keys(&settings.api_keys);
            tracing::info!(
                key_count = key_pool.len(),
                strategy = %settings.selection_strategy,
                "Initialized static key pool"
            );
        } else {
            tracing::info!(
                strategy = %settings.selection_strategy,
                "No static keys configured, expecting keys in Authorization headers"
            );
        }

        Ok(Self {
            settings,
            key_pool,
            client,
            start_time: Instant::now(),
        })
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
