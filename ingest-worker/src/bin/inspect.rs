//! Dispatch Inspect - prints what the local stores hold.
//!
//! Reads the same environment configuration as the web server and lists
//! every structured-store row and every archived blob key. Useful to confirm
//! a test call landed after pointing the platform at a new deployment.

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dispatch::{build_stores, Config, StoreBackend};

/// Characters of each summary to print.
const SUMMARY_PREVIEW: usize = 100;

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    let config = Config::from_env();
    if config.store_backend == StoreBackend::Memory {
        bail!("STORE_BACKEND=memory holds nothing between processes; nothing to inspect");
    }

    info!(data_dir = %config.data_dir.display(), "inspect_starting");

    let (structured, blobs) = build_stores(&config);

    let rows = structured
        .scan()
        .await
        .context("Failed to scan structured store")?;

    println!("Structured store: {}", config.structured_store_table);
    println!("Total rows: {}", rows.len());
    for row in &rows {
        let summary: String = row.summary.chars().take(SUMMARY_PREVIEW).collect();
        println!();
        println!("  Conversation: {}", row.conversation_id);
        println!("  Timestamp: {}", row.timestamp);
        println!("  Agent: {}", row.agent_id);
        println!("  Summary: {}", summary);
        println!("  Success: {}", row.call_successful);
        println!("  Duration: {}s", row.duration_secs);
        println!("  Emergency: {} ({})", row.emergency_type, row.severity);
    }

    let keys = blobs
        .list_objects("calls/")
        .await
        .context("Failed to list blob store")?;

    println!();
    println!("Blob store: {}", config.blob_store_bucket);
    println!("Total objects: {}", keys.len());
    for key in &keys {
        let size = blobs
            .get_object(key)
            .await
            .with_context(|| format!("Failed to read object {}", key))?
            .map(|body| body.len())
            .unwrap_or(0);
        println!("  {} ({} bytes)", key, size);
    }

    Ok(())
}
