//! Call event model.
//!
//! This module provides:
//! - Serde types for the platform's webhook body
//! - The normalized row written to the structured store
//! - Extraction of dispatch details collected by the voice agent

pub mod details;
pub mod types;

pub use details::DispatchDetails;
pub use types::{
    event_type_of, Analysis, CallData, CallEvent, CallEventError, CallMetadata, PersistedRecord,
    TranscriptTurn, POST_CALL_TRANSCRIPTION, UNKNOWN_CONVERSATION, UNKNOWN_EVENT_TYPE,
};
