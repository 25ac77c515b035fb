//! # Gateway Runtime
//!
//! Entry point for the request gateway.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`RUST_LOG`, JSON output with `GATEWAY_LOG_JSON=1`)
//! 2. Load configuration: defaults, then the TOML file at `GATEWAY_CONFIG`,
//!    then environment overrides
//! 3. Register routes and start the public and admin servers
//! 4. Wait for Ctrl+C / SIGTERM and shut down gracefully

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use api_gateway::{ApiGatewayService, GatewayConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long in-flight requests get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("GATEWAY_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

/// Load configuration from the process environment
fn load_config() -> Result<GatewayConfig> {
    load_config_with(|key| std::env::var(key).ok())
}

/// Defaults, then the optional TOML file named by `GATEWAY_CONFIG`, then
/// per-field overrides. `env` looks up a variable by name.
fn load_config_with(env: impl Fn(&str) -> Option<String>) -> Result<GatewayConfig> {
    let mut config = match env("GATEWAY_CONFIG") {
        Some(path) => read_config_file(Path::new(&path))?,
        None => GatewayConfig::default(),
    };

    if let Some(port) = env("GATEWAY_HTTP_PORT") {
        config.http.port = port
            .parse()
            .with_context(|| format!("GATEWAY_HTTP_PORT is not a port: {port}"))?;
    }
    if let Some(port) = env("GATEWAY_ADMIN_PORT") {
        config.admin.port = port
            .parse()
            .with_context(|| format!("GATEWAY_ADMIN_PORT is not a port: {port}"))?;
    }
    if let Some(flag) = env("GATEWAY_REQUIRE_AUTH") {
        config.auth.require_auth = match flag.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => anyhow::bail!("GATEWAY_REQUIRE_AUTH must be true or false, got {other}"),
        };
    }

    config
        .validate()
        .context("invalid gateway configuration")?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    info!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = load_config()?;
    info!(
        http = %config.http_addr(),
        admin = %config.admin_addr(),
        routes = config.routes.len(),
        require_auth = config.auth.require_auth,
        "Configuration loaded"
    );

    let service = Arc::new(ApiGatewayService::new(config).context("failed to build gateway")?);

    let running = Arc::clone(&service);
    let mut server = tokio::spawn(async move { running.start().await });

    tokio::select! {
        result = &mut server => {
            // The server ended without a shutdown signal
            result.context("gateway task panicked")??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    info!("Shutting down gateway...");
    service.shutdown();

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(result) => result.context("gateway task panicked")??,
        Err(_) => warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "In-flight requests did not finish in time"
        ),
    }

    info!("Gateway stopped");
    Ok(())
}
