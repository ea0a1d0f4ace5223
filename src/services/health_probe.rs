//! Periodic upstream health probing
//!
//! When enabled, a background task issues a lightweight GET against the
//! upstream's health path for every active key, concurrently and with a
//! bounded per-probe timeout. The probe result owns the administrative
//! `healthy` flag of each key; live traffic only ever drives cooldowns.

use crate::config::ProbeConfig;
use crate::services::key_pool::KeyPool;
use crate::utils::mask_key;
use futures::future::join_all;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Background prober for the upstream health endpoint
pub struct HealthProber {
    client: Client,
    pool: Arc<KeyPool>,
    probe_url: String,
    interval: Duration,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(client: Client, pool: Arc<KeyPool>, target_url: &str, config: &ProbeConfig) -> Self {
        Self {
            client,
            pool,
            probe_url: format!("{}{}", target_url.trim_end_matches('/'), config.health_path),
            interval: Duration::from_secs(config.interval_seconds),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Spawn the probe loop; the returned handle aborts it on shutdown
    pub fn spawn(self) -> JoinHandle<()> {
        tracing::info!(
            probe_url = %self.probe_url,
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "Starting health probe loop"
        );
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.probe_all().await;
        }
    }

    /// Probe every active key concurrently and apply the results
    ///
    /// One slow or hung probe must not block the others, so each key
    /// gets its own task with its own timeout; no pool lock is held
    /// while any probe is in flight.
    async fn probe_all(&self) {
        let keys = self.pool.active_keys();
        if keys.is_empty() {
            return;
        }

        let probes: Vec<JoinHandle<(String, bool)>> = keys
            .into_iter()
            .map(|key| {
                let client = self.client.clone();
                let url = self.probe_url.clone();
                let timeout = self.timeout;
                tokio::spawn(async move {
                    let healthy = probe_key(&client, &url, &key, timeout).await;
                    (key, healthy)
                })
            })
            .collect();

        for result in join_all(probes).await {
            match result {
                Ok((key, healthy)) => self.pool.set_healthy(&key, healthy),
                Err(e) => tracing::error!(error = %e, "Health probe task panicked"),
            }
        }
    }
}

/// Probe the upstream with a single key
///
/// Any transport error or non-2xx status counts as unhealthy; a 2xx
/// sets the key healthy again.
async fn probe_key(client: &Client, url: &str, key: &str, timeout: Duration) -> bool {
    match client
        .get(url)
        .bearer_auth(key)
        .timeout(timeout)
        .send()
        .await
    {
        Ok(resp) => {
            let healthy = resp.status().is_success();
            if !healthy {
                tracing::warn!(
                    key = %mask_key(key),
                    status = resp.status().as_u16(),
                    "Health probe returned non-success status"
                );
            }
            healthy
        }
        Err(e) => {
            tracing::warn!(key = %mask_key(key), error = %e, "Health probe failed");
            false
        }
    }
}
