//! Configuration module for environment variable parsing.
//!
//! All configuration is read once at startup and shared immutably.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::web::signature::MissingConfigPolicy;

/// Which store implementations back the persister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Directory-backed stores under `data_dir`
    Local,
    /// Process-local stores, lost on restart
    Memory,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Shared secret for webhook HMAC signature verification
    pub webhook_secret: Option<String>,

    /// What to do when the secret or the signature header is absent
    pub missing_config_policy: MissingConfigPolicy,

    /// Maximum age in seconds for signature timestamps
    pub signature_tolerance_secs: u64,

    /// Store implementation to use
    pub store_backend: StoreBackend,

    /// Root directory for local stores
    pub data_dir: PathBuf,

    /// Structured store table identifier
    pub structured_store_table: String,

    /// Blob store bucket identifier
    pub blob_store_bucket: String,

    /// Upper bound for a single store call in milliseconds
    pub store_timeout_ms: u64,

    /// Append-only log of processed call events
    pub call_log_path: PathBuf,

    /// Number of calls returned by the recent-calls endpoint
    pub recent_calls_limit: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("webhook_data"));

        let call_log_path = env::var("CALL_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("webhook_log.jsonl"));

        Config {
            port: parse_or("PORT", 8000),

            webhook_secret: non_empty_var("ELEVENLABS_WEBHOOK_SECRET")
                .or_else(|| non_empty_var("WEBHOOK_SECRET")),

            missing_config_policy: parse_policy("SIGNATURE_MISSING_CONFIG_POLICY"),

            signature_tolerance_secs: parse_or("SIGNATURE_TOLERANCE_SECS", 30 * 60),

            store_backend: parse_backend("STORE_BACKEND"),

            data_dir,

            structured_store_table: env::var("STRUCTURED_STORE_TABLE")
                .unwrap_or_else(|_| "elevenlabs-call-data".to_string()),

            blob_store_bucket: env::var("BLOB_STORE_BUCKET")
                .unwrap_or_else(|_| "elevenlabs-webhooks".to_string()),

            store_timeout_ms: parse_or("STORE_TIMEOUT_MS", 5000),

            call_log_path,

            recent_calls_limit: parse_or("RECENT_CALLS_LIMIT", 10),
        }
    }

    pub fn signature_tolerance(&self) -> Duration {
        Duration::from_secs(self.signature_tolerance_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Parse a numeric variable, warning and falling back on garbage.
fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(env_var = name, value = %raw, "Invalid numeric value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_policy(name: &str) -> MissingConfigPolicy {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return MissingConfigPolicy::default(),
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "fail-open" | "open" => MissingConfigPolicy::FailOpen,
        "fail-closed" | "closed" => MissingConfigPolicy::FailClosed,
        _ => {
            warn!(env_var = name, value = %raw, "Unknown policy, using fail-open");
            MissingConfigPolicy::default()
        }
    }
}

fn parse_backend(name: &str) -> StoreBackend {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return StoreBackend::Local,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "local" => StoreBackend::Local,
        "memory" => StoreBackend::Memory,
        _ => {
            warn!(env_var = name, value = %raw, "Unknown store backend, using local");
            StoreBackend::Local
        }
    }
}
