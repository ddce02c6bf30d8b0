// =============================================================================
// SMC Scanner — Main Entry Point
// =============================================================================
//
// Startup order: environment, logging, config (exit 64 on invalid),
// provider (exit 69 when authentication is missing), shared state, scanner
// task, HTTP server. Shutdown on Ctrl+C drains the alert bus before exit.
// Exit codes: 0 normal, 64 bad config, 69 provider auth, 70 internal.
// =============================================================================

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use smc_scanner::api;
use smc_scanner::app_state::AppState;
use smc_scanner::errors::{EXIT_AUTH, EXIT_CONFIG, EXIT_INTERNAL, EXIT_OK};
use smc_scanner::market_data::{BrokerClient, CandleProvider, MockProvider};
use smc_scanner::scan_config::ScanConfig;
use smc_scanner::scanner;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("SMC scanner starting up");

    // ── 1. Configuration ─────────────────────────────────────────────────
    let mut config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Ok(symbols) = std::env::var("SMC_SYMBOLS") {
        config.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    info!(symbols = ?config.symbols, timeframes = ?config.timeframes, "universe configured");

    // ── 2. Candle provider ───────────────────────────────────────────────
    let provider = build_provider();
    if !provider.is_ready() {
        error!("candle provider requires authentication; set SMC_BROKER_APP_ID / SMC_BROKER_SECRET");
        return ExitCode::from(EXIT_AUTH);
    }

    // ── 3. Shared state ──────────────────────────────────────────────────
    let state = match AppState::new(config, provider) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // ── 4. Run until shutdown ────────────────────────────────────────────
    match run(state).await {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            error!(error = %e, "fatal internal error");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

/// Load the config file named by SMC_CONFIG (default scan_config.json).
/// A missing file falls back to defaults with a warning; a present but
/// unreadable file is fatal.
fn load_config() -> anyhow::Result<ScanConfig> {
    let path = std::env::var("SMC_CONFIG").unwrap_or_else(|_| "scan_config.json".to_string());

    if Path::new(&path).exists() {
        ScanConfig::load(&path)
    } else {
        warn!(path = %path, "config file not found, using defaults");
        Ok(ScanConfig::default())
    }
}

/// SMC_PROVIDER selects the candle source: "broker" for the live REST
/// client, anything else (or unset) for the deterministic mock.
fn build_provider() -> Arc<dyn CandleProvider> {
    match std::env::var("SMC_PROVIDER").as_deref() {
        Ok("broker") => {
            let app_id = std::env::var("SMC_BROKER_APP_ID").unwrap_or_default();
            let secret = std::env::var("SMC_BROKER_SECRET").unwrap_or_default();
            let base_url = std::env::var("SMC_BROKER_URL")
                .unwrap_or_else(|_| "https://api.fyers.in".to_string());
            info!(base_url = %base_url, "using live broker candle provider");
            Arc::new(BrokerClient::new(app_id, secret, base_url))
        }
        _ => {
            info!("using deterministic mock candle provider");
            Arc::new(MockProvider::new())
        }
    }
}

/// Spawn the scanner and the HTTP server, then wait for Ctrl+C.
async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let scanner_state = state.clone();
    tokio::spawn(async move {
        scanner::run(scanner_state).await;
    });

    let bind_addr =
        std::env::var("SMC_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3002".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("all subsystems running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    warn!("shutdown signal received, draining alert bus");
    state.bus.drain(std::time::Duration::from_secs(5)).await;
    Ok(())
}
