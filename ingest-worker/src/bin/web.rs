//! Dispatch Web Server - ElevenLabs post-call webhook receiver.
//!
//! This binary:
//! - Receives post-call webhooks on `/elevenlabs-webhook`
//! - Verifies the HMAC signature when a secret is configured
//! - Persists transcription events to the structured and blob stores
//! - Serves recent calls from the local call log

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dispatch::web::{router, MissingConfigPolicy};
use dispatch::{build_stores, AppState, Config, Persister};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        webhook_secret_configured = config.webhook_secret.is_some(),
        missing_config_policy = ?config.missing_config_policy,
        store_backend = ?config.store_backend,
        data_dir = %config.data_dir.display(),
        structured_store_table = %config.structured_store_table,
        blob_store_bucket = %config.blob_store_bucket,
        store_timeout_ms = config.store_timeout_ms,
        "config_loaded"
    );

    if config.webhook_secret.is_none()
        && config.missing_config_policy == MissingConfigPolicy::FailOpen
    {
        warn!("webhook_signature_verification_disabled");
    }

    let (structured, blobs) = build_stores(&config);
    let persister = Persister::new(structured, blobs).with_timeout(config.store_timeout());
    info!("stores_ready");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config, persister));

    // Bind to address
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
