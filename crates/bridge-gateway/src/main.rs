//! wa-n8n-bridge: WhatsApp ⇄ n8n bridge main binary
//!
//! Usage:
//!   wa-n8n-bridge           - Start the bridge (HTTP + realtime channel)
//!   wa-n8n-bridge --help    - Show help
//!   wa-n8n-bridge --version - Show version

use std::sync::Arc;

use bridge_api::AppState;
use bridge_core::{Config, MessageRouter, N8nWebhook, SettingsStore};
use bridge_whatsapp::{
    AuthFlag, BridgeProvider, CloudApiClient, LifecycleConfig, SessionLifecycle,
};
use bridge_ws::{Notifier, WsState};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Run mode
enum RunMode {
    /// Bridge server
    Server,
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_args() {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("wa-n8n-bridge {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server => {}
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting wa-n8n-bridge...");
    tracing::info!("WhatsApp Web sidecar: {}", config.bridge.url);

    run_server(config).await
}

/// Parse command line arguments
fn parse_args() -> RunMode {
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return RunMode::Help,
            "--version" | "-v" => return RunMode::Version,
            _ => {}
        }
    }

    RunMode::Server
}

/// Print help message
fn print_help() {
    println!("wa-n8n-bridge - WhatsApp to n8n bridge");
    println!();
    println!("Usage:");
    println!("  wa-n8n-bridge           Start the bridge");
    println!("  wa-n8n-bridge --help    Show this help message");
    println!("  wa-n8n-bridge --version Show version");
    println!();
    println!("Environment Variables:");
    println!("  PORT                 HTTP port (default: 3002)");
    println!("  HOST                 Bind host (default: 0.0.0.0)");
    println!("  STATIC_DIR           Login/settings pages (default: public)");
    println!("  SETTINGS_PATH        Settings record (default: settings.json)");
    println!("  SESSION_DATA_DIR     Session data directory (default: .wwebjs_auth)");
    println!("  MAX_QR_ATTEMPTS      QR codes before the grace timer (default: 3)");
    println!("  AUTH_GRACE_SECS      Seconds to wait for a scan (default: 30)");
    println!("  BRIDGE_URL           WhatsApp Web sidecar URL (default: http://127.0.0.1:3010)");
    println!("  BRIDGE_API_KEY       Shared key with the sidecar (optional)");
    println!("  CLOUD_API_URL        Cloud API base URL (default: https://graph.facebook.com/v17.0)");
    println!("  CORS_ALLOWED_ORIGINS Comma separated origins (default: any)");
    println!("  N8N_WEBHOOK_URL      Initial n8n webhook URL when no settings file exists");
    println!("  VERIFY_TOKEN         Initial Cloud API verify token");
    println!("  WHATSAPP_API_TOKEN   Initial Cloud API token");
    println!("  WHATSAPP_PHONE_NUMBER_ID  Initial Cloud API phone number id");
}

/// Wire every component and serve until Ctrl+C
async fn run_server(config: Config) -> anyhow::Result<()> {
    let settings = Arc::new(SettingsStore::open(&config.settings_path));
    let notifier = Notifier::new();

    let forwarder = Arc::new(N8nWebhook::new(settings.clone()));
    let router = Arc::new(MessageRouter::new(settings.clone(), forwarder));

    let provider = Arc::new(BridgeProvider::new(&config.bridge));
    let lifecycle = Arc::new(SessionLifecycle::new(
        provider,
        notifier.clone(),
        AuthFlag::new(&config.session.data_dir),
        router.clone(),
        LifecycleConfig::from(&config.session),
    ));

    let cloud = Arc::new(CloudApiClient::new(
        config.cloud.api_url.clone(),
        settings.clone(),
    ));

    // Track running services for graceful shutdown
    let mut service_handles = Vec::new();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    service_handles.push(tokio::spawn(lifecycle.clone().run(events_rx)));

    let state = AppState {
        settings,
        lifecycle: lifecycle.clone(),
        router,
        cloud,
        provider_events: events_tx,
        bridge_api_key: config.bridge.api_key.clone(),
    };
    let ws = WsState::new(notifier, lifecycle.clone());

    let server_config = config.clone();
    service_handles.push(tokio::spawn(async move {
        if let Err(e) = bridge_api::start_server(&server_config, state, ws).await {
            tracing::error!("HTTP server error: {}", e);
        }
    }));

    // Initial start; observers retry through the connect policy
    let initial = lifecycle.clone();
    tokio::spawn(async move {
        if let Err(e) = initial.initialize_if_needed().await {
            tracing::error!("Error during initial client initialization: {}", e);
        }
    });

    tracing::info!("wa-n8n-bridge initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    for handle in service_handles {
        handle.abort();
    }

    tracing::info!("wa-n8n-bridge stopped");
    Ok(())
}
