//! Webhook endpoint handlers.
//!
//! The ingest handler:
//! 1. Verifies the signature (if configured)
//! 2. Reads the event type from the untyped body
//! 3. Parses transcription events into the typed view
//! 4. Persists them to both stores
//! 5. Returns 200 with per-store status
//!
//! Store failures never change the transport status; only malformed bodies
//! (400) and rejected signatures (401) do.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::call::{event_type_of, CallEvent, POST_CALL_TRANSCRIPTION};
use crate::call_log::{CallLog, CallSummary};
use crate::persist::Persister;
use crate::web::signature::{SignatureVerifier, SIGNATURE_HEADER};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: SignatureVerifier,
    pub persister: Arc<Persister>,
    pub call_log: CallLog,
}

impl AppState {
    pub fn new(config: Config, persister: Persister) -> Self {
        let verifier = SignatureVerifier::new(
            config.webhook_secret.clone(),
            config.missing_config_policy,
        )
        .with_tolerance(config.signature_tolerance());
        let call_log = CallLog::new(config.call_log_path.clone());

        Self {
            config: Arc::new(config),
            verifier,
            persister: Arc::new(persister),
            call_log,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub status: &'static str,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "ElevenLabs call webhook receiver",
        status: "running",
    })
}

// =============================================================================
// ElevenLabs Webhook
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_store: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_store: Option<&'static str>,
}

impl WebhookResponse {
    fn error(message: &str) -> Self {
        Self {
            status: "error",
            message: message.to_string(),
            conversation_id: None,
            structured_store: None,
            blob_store: None,
        }
    }

    fn ignored(event_type: &str) -> Self {
        Self {
            status: "ignored",
            message: format!("Event type {} not processed", event_type),
            conversation_id: None,
            structured_store: None,
            blob_store: None,
        }
    }
}

fn store_status(ok: bool) -> &'static str {
    if ok {
        "saved"
    } else {
        "failed"
    }
}

/// ElevenLabs post-call webhook endpoint.
pub async fn elevenlabs_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // Non-ASCII header bytes are kept (lossily) so they fail verification
    // instead of reading as an absent header.
    let signature: Option<Cow<'_, str>> = headers
        .get(SIGNATURE_HEADER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()));

    info!(
        body_length = body.len(),
        has_signature = signature.is_some(),
        "elevenlabs_webhook_received"
    );

    if body.is_empty() {
        warn!("elevenlabs_webhook_empty_body");
        return (StatusCode::BAD_REQUEST, Json(WebhookResponse::error("Empty body")));
    }

    if !state.verifier.verify(&body, signature.as_deref()) {
        warn!(body_length = body.len(), "elevenlabs_signature_invalid");
        return (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse::error("Invalid signature")),
        );
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            warn!("elevenlabs_webhook_not_an_object");
            return (StatusCode::BAD_REQUEST, Json(WebhookResponse::error("Invalid JSON")));
        }
        Err(e) => {
            warn!(error = %e, "elevenlabs_webhook_invalid_json");
            return (StatusCode::BAD_REQUEST, Json(WebhookResponse::error("Invalid JSON")));
        }
    };

    // Only transcriptions are read through the typed view; any other event is
    // acknowledged whatever its shape.
    let event_type = event_type_of(&value);
    info!(event_type = %event_type, "elevenlabs_event_parsed");

    if event_type != POST_CALL_TRANSCRIPTION {
        warn!(event_type = %event_type, "elevenlabs_event_ignored");
        return (StatusCode::OK, Json(WebhookResponse::ignored(event_type)));
    }

    let event = match CallEvent::from_value(value) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "elevenlabs_webhook_invalid_event");
            return (StatusCode::BAD_REQUEST, Json(WebhookResponse::error("Invalid JSON")));
        }
    };

    let conversation_id = event.conversation_id().to_string();
    info!(conversation_id = %conversation_id, "elevenlabs_call_processing");

    let outcome = state.persister.persist(&event).await;

    if let Err(e) = state.call_log.append(&event.raw).await {
        error!(conversation_id = %conversation_id, error = %e, "call_log_append_failed");
    }

    info!(
        conversation_id = %conversation_id,
        structured_store_ok = outcome.structured_store_ok,
        blob_store_ok = outcome.blob_store_ok,
        "elevenlabs_call_processed"
    );

    (
        StatusCode::OK,
        Json(WebhookResponse {
            status: "success",
            message: "Call processed".to_string(),
            conversation_id: Some(conversation_id),
            structured_store: Some(store_status(outcome.structured_store_ok)),
            blob_store: Some(store_status(outcome.blob_store_ok)),
        }),
    )
}

// =============================================================================
// Recent Calls
// =============================================================================

#[derive(Debug, Serialize)]
pub struct RecentCallsResponse {
    pub calls: Vec<CallSummary>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// Most recent calls from the local call log.
pub async fn recent_calls(State(state): State<AppState>) -> impl IntoResponse {
    match state.call_log.recent(state.config.recent_calls_limit).await {
        Ok(recent) => {
            let message = recent.calls.is_empty().then_some("No calls yet");
            (
                StatusCode::OK,
                Json(RecentCallsResponse {
                    calls: recent.calls,
                    total: recent.total,
                    message,
                }),
            )
        }
        Err(e) => {
            error!(error = %e, "recent_calls_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RecentCallsResponse {
                    calls: Vec::new(),
                    total: 0,
                    message: Some("Call log unavailable"),
                }),
            )
        }
    }
}
