//! Web server module for handling inbound call webhooks.
//!
//! This module provides:
//! - ElevenLabs signature verification
//! - The ingest endpoint that persists transcription events
//! - A recent-calls view over the local call log

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    elevenlabs_webhook, health, recent_calls, root, AppState, HealthResponse,
    RecentCallsResponse, WebhookResponse,
};
pub use signature::{
    build_signature, verify_signature, MissingConfigPolicy, SignatureToken, SignatureVerifier,
    SIGNATURE_HEADER,
};

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/elevenlabs-webhook", post(elevenlabs_webhook))
        .route("/recent-calls", get(recent_calls))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
