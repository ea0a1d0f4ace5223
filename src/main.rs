//! LLM Key Proxy
//!
//! A key-rotating streaming reverse proxy for LLM inference APIs.

use anyhow::Result;
use clap::Parser;
use llm_key_proxy::{
    config::{Environment, Settings},
    server::App,
};
use tracing_subscriber::EnvFilter;

/// LLM Key Proxy
///
/// Fronts a single upstream inference API with a rotating pool of API
/// keys, insulating callers from key exhaustion and invalidation.
#[derive(Parser, Debug)]
#[command(name = "llm-key-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides SERVER_PORT env var)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides HOST env var)
    #[arg(long)]
    host: Option<String>,

    /// Upstream base URL (overrides TARGET_URL env var)
    #[arg(long)]
    target_url: Option<String>,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long)]
    env: Option<Environment>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load()?;

    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(target_url) = args.target_url {
        settings.target_url = target_url;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(env) = args.env {
        settings.environment = env;
    }

    init_tracing(&settings.log_level, args.json_logs);

    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        host = %settings.host,
        port = settings.port,
        target_url = %settings.target_url,
        strategy = %settings.selection_strategy,
        health_check = settings.probe.enabled,
        health_path = %settings.probe.health_path,
        static_keys = settings.api_keys.len(),
        "Starting application"
    );
    if !settings.has_static_keys() {
        tracing::info!(
            "Pass API keys per request: Authorization: Bearer key1,key2,key3..."
        );
    }

    let app = App::new(settings)?;
    app.run_with_graceful_shutdown().await?;

    tracing::info!("Application shutdown complete");

    Ok(())
}

/// Initialize tracing subscriber with the specified log level
fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
