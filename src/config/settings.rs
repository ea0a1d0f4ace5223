//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

use crate::services::key_pool::SelectionStrategy;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!(
                "Invalid environment: {}. Expected: development, staging, or production",
                s
            ),
        }
    }
}

/// Active health probing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Whether the periodic upstream probe is enabled
    pub enabled: bool,
    /// Path probed on the upstream (GET)
    pub health_path: String,
    /// Seconds between probe rounds
    pub interval_seconds: u64,
    /// Per-probe request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            health_path: "/v1/models".to_string(),
            interval_seconds: 30,
            timeout_seconds: 10,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Server settings
    pub host: String,
    pub port: u16,

    // Upstream settings
    pub target_url: String,

    // Key pool settings
    /// Static API key pool. When empty, keys are taken from each
    /// request's Authorization header instead.
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,
    pub selection_strategy: SelectionStrategy,
    /// Cooldown applied after an upstream 401/403, in seconds
    pub key_cooldown_seconds: u64,

    // Active probing
    pub probe: ProbeConfig,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        let settings = Self {
            // App settings
            app_name: env_or_default("APP_NAME", "llm-key-proxy"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),

            // Server settings
            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("SERVER_PORT", "8080")
                .parse()
                .context("Invalid SERVER_PORT value")?,

            // Upstream
            target_url: env_or_default("TARGET_URL", "https://api.openai.com"),

            // Key pool
            api_keys: parse_key_list(&env::var("API_KEYS").unwrap_or_default()),
            selection_strategy: SelectionStrategy::parse(&env_or_default(
                "SELECTION_STRATEGY",
                "random",
            )),
            key_cooldown_seconds: env_or_default("KEY_COOLDOWN_SECONDS", "10")
                .parse()
                .context("Invalid KEY_COOLDOWN_SECONDS value")?,

            // Active probing
            probe: ProbeConfig {
                enabled: env_or_default("HEALTH_CHECK", "false")
                    .parse()
                    .unwrap_or(false),
                health_path: env_or_default("HEALTH_PATH", "/v1/models"),
                interval_seconds: env_or_default("PROBE_INTERVAL_SECONDS", "30")
                    .parse()
                    .unwrap_or(30),
                timeout_seconds: env_or_default("PROBE_TIMEOUT_SECONDS", "10")
                    .parse()
                    .unwrap_or(10),
            },
        };

        // Validate settings
        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        let url = reqwest::Url::parse(&self.target_url)
            .with_context(|| format!("Invalid TARGET_URL: {}", self.target_url))?;
        if url.host_str().is_none() {
            anyhow::bail!("TARGET_URL must include a host: {}", self.target_url);
        }
        match url.scheme() {
            "http" | "https" => {}
            other => anyhow::bail!("TARGET_URL scheme must be http or https, got {}", other),
        }

        if self.key_cooldown_seconds == 0 {
            anyhow::bail!("KEY_COOLDOWN_SECONDS must be > 0");
        }

        if self.probe.enabled {
            if self.probe.interval_seconds == 0 {
                anyhow::bail!("PROBE_INTERVAL_SECONDS must be > 0");
            }
            if self.probe.timeout_seconds == 0 {
                anyhow::bail!("PROBE_TIMEOUT_SECONDS must be > 0");
            }
            if !self.probe.health_path.starts_with('/') {
                anyhow::bail!("HEALTH_PATH must start with '/'");
            }
        }

        Ok(())
    }

    /// True when the pool is fixed at startup instead of supplied per request
    pub fn has_static_keys(&self) -> bool {
        !self.api_keys.is_empty()
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "llm-key-proxy".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            target_url: "https://api.openai.com".to_string(),
            api_keys: Vec::new(),
            selection_strategy: SelectionStrategy::Random,
            key_cooldown_seconds: 10,
            probe: ProbeConfig::default(),
        }
    }
}

/// Split a comma-separated key list, trimming entries and dropping blanks
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
