//! Webhook body types and the structured-store projection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::details::DispatchDetails;

/// Event type that carries a finished call's transcript and analysis.
pub const POST_CALL_TRANSCRIPTION: &str = "post_call_transcription";

/// Conversation identifier used when the event does not carry one.
pub const UNKNOWN_CONVERSATION: &str = "unknown";

/// Event type reported for bodies without a string `type`.
pub const UNKNOWN_EVENT_TYPE: &str = "UNKNOWN";

/// Errors raised while interpreting a webhook body.
#[derive(Debug, thiserror::Error)]
pub enum CallEventError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("webhook body is not a JSON object")]
    NotAnObject,
}

/// The `type` of an untyped webhook body.
pub fn event_type_of(value: &Value) -> &str {
    value["type"].as_str().unwrap_or(UNKNOWN_EVENT_TYPE)
}

/// A parsed webhook delivery.
///
/// The typed fields are a lenient view over `raw`, which keeps the body
/// exactly as received so it can be archived in full. A null or wrongly
/// typed field reads as its default instead of failing the event.
#[derive(Debug, Clone, Deserialize)]
pub struct CallEvent {
    #[serde(skip)]
    pub event_type: String,

    #[serde(default, deserialize_with = "lenient_whole_number")]
    pub event_timestamp: Option<i64>,

    #[serde(default, deserialize_with = "lenient")]
    conversation_id: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub data: CallData,

    #[serde(skip)]
    pub raw: Value,
}

impl CallEvent {
    /// Parse raw body bytes.
    pub fn from_slice(body: &[u8]) -> Result<Self, CallEventError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    /// Interpret an already-parsed JSON document.
    pub fn from_value(value: Value) -> Result<Self, CallEventError> {
        if !value.is_object() {
            return Err(CallEventError::NotAnObject);
        }
        let mut event: CallEvent = serde_json::from_value(value.clone())?;
        event.event_type = event_type_of(&value).to_string();
        event.raw = value;
        Ok(event)
    }

    pub fn is_transcription(&self) -> bool {
        self.event_type == POST_CALL_TRANSCRIPTION
    }

    /// `data.conversation_id`, then the top-level field, then `"unknown"`.
    pub fn conversation_id(&self) -> &str {
        self.data
            .conversation_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or(self.conversation_id.as_deref())
            .filter(|id| !id.is_empty())
            .unwrap_or(UNKNOWN_CONVERSATION)
    }

    /// Event timestamp in epoch seconds, or `received_at` when absent.
    pub fn timestamp_or(&self, received_at: DateTime<Utc>) -> i64 {
        self.event_timestamp.unwrap_or_else(|| received_at.timestamp())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallData {
    #[serde(default, deserialize_with = "lenient")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub agent_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub transcript: Vec<TranscriptTurn>,
    #[serde(default, deserialize_with = "lenient")]
    pub analysis: Analysis,
    #[serde(default, deserialize_with = "lenient")]
    pub metadata: CallMetadata,
}

/// One speaker turn of the transcript.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptTurn {
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<String>,
    #[serde(default, alias = "text", deserialize_with = "lenient")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub time_in_call_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Analysis {
    #[serde(default, deserialize_with = "lenient")]
    pub transcript_summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub call_successful: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub data_collection_results: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallMetadata {
    #[serde(default, deserialize_with = "lenient_whole_number")]
    pub call_duration_secs: Option<i64>,
}

/// `T` from any JSON value, or `T::default()` when it does not fit.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// A list whose malformed items read as defaults, so the length is kept.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value(item).unwrap_or_default())
        .collect())
}

/// Integers, floats (truncated) and numeric strings.
fn lenient_whole_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(number)
}

/// Row written to the structured store, keyed by
/// `(conversation_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub conversation_id: String,
    pub timestamp: i64,
    pub agent_id: String,
    pub summary: String,
    pub call_successful: String,
    pub duration_secs: u64,
    pub transcript_length: usize,
    pub created_at: String,
    pub emergency_type: String,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub severity: String,
}

impl PersistedRecord {
    /// Project an event, stamping `created_at` with `now`.
    pub fn from_event(event: &CallEvent, now: DateTime<Utc>) -> Self {
        let data = &event.data;
        let details = DispatchDetails::extract(&data.analysis.data_collection_results);

        Self {
            conversation_id: event.conversation_id().to_string(),
            timestamp: event.timestamp_or(now),
            agent_id: data.agent_id.clone().unwrap_or_default(),
            summary: data.analysis.transcript_summary.clone().unwrap_or_default(),
            call_successful: data.analysis.call_successful.clone().unwrap_or_default(),
            duration_secs: data
                .metadata
                .call_duration_secs
                .and_then(|secs| u64::try_from(secs).ok())
                .unwrap_or(0),
            transcript_length: data.transcript.len(),
            created_at: now.to_rfc3339(),
            emergency_type: details.emergency_type,
            location: details.location,
            latitude: details.latitude,
            longitude: details.longitude,
            severity: details.severity,
        }
    }

    pub fn key(&self) -> (&str, i64) {
        (&self.conversation_id, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "type": "post_call_transcription",
            "event_timestamp": 1000,
            "data": {
                "conversation_id": "abc123",
                "agent_id": "agent_test",
                "status": "done",
                "transcript": [
                    {"role": "user", "message": "There is a fire", "time_in_call_secs": 1.5},
                    {"role": "agent", "text": "Where are you?"}
                ],
                "analysis": {
                    "transcript_summary": "test",
                    "call_successful": "success",
                    "data_collection_results": {
                        "emergency_type": {"value": "fire"},
                        "latitude": {"value": 36.1627}
                    }
                },
                "metadata": {"call_duration_secs": 120}
            }
        })
    }

    #[test]
    fn test_parse_transcription_event() {
        let event = CallEvent::from_value(sample()).unwrap();

        assert!(event.is_transcription());
        assert_eq!(event.conversation_id(), "abc123");
        assert_eq!(event.event_timestamp, Some(1000));
        assert_eq!(event.data.transcript.len(), 2);
        assert_eq!(event.data.transcript[1].message.as_deref(), Some("Where are you?"));
        assert_eq!(event.raw, sample());
    }

    #[test]
    fn test_conversation_id_fallbacks() {
        let top_level = CallEvent::from_value(json!({"type": "x", "conversation_id": "top"})).unwrap();
        assert_eq!(top_level.conversation_id(), "top");

        let missing = CallEvent::from_value(json!({"type": "x"})).unwrap();
        assert_eq!(missing.conversation_id(), UNKNOWN_CONVERSATION);
    }

    #[test]
    fn test_rejects_non_object_and_bad_json() {
        assert!(matches!(
            CallEvent::from_slice(b"[1,2,3]"),
            Err(CallEventError::NotAnObject)
        ));
        assert!(matches!(
            CallEvent::from_slice(b"{not json"),
            Err(CallEventError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_event_type_of_untyped_body() {
        assert_eq!(event_type_of(&json!({"type": "post_call_audio", "data": null})), "post_call_audio");
        assert_eq!(event_type_of(&json!({"type": 7})), UNKNOWN_EVENT_TYPE);
        assert_eq!(event_type_of(&json!({})), UNKNOWN_EVENT_TYPE);

        let event = CallEvent::from_value(json!({"data": {}})).unwrap();
        assert_eq!(event.event_type, UNKNOWN_EVENT_TYPE);
        assert!(!event.is_transcription());
    }

    #[test]
    fn test_wrongly_typed_fields_read_as_defaults() {
        let event = CallEvent::from_value(json!({
            "type": "post_call_transcription",
            "event_timestamp": 1.5e9,
            "data": {
                "conversation_id": "abc123",
                "agent_id": 42,
                "transcript": [{"role": "user", "message": "help"}, "not a turn", {"role": 9}],
                "analysis": {
                    "transcript_summary": "test",
                    "call_successful": true,
                    "data_collection_results": null
                },
                "metadata": {"call_duration_secs": 12.5}
            }
        }))
        .unwrap();

        assert_eq!(event.conversation_id(), "abc123");
        assert_eq!(event.event_timestamp, Some(1_500_000_000));
        assert_eq!(event.data.agent_id, None);
        assert_eq!(event.data.transcript.len(), 3);
        assert_eq!(event.data.transcript[0].message.as_deref(), Some("help"));
        assert_eq!(event.data.analysis.call_successful, None);
        assert!(event.data.analysis.data_collection_results.is_empty());
        assert_eq!(event.data.metadata.call_duration_secs, Some(12));
    }

    #[test]
    fn test_null_and_foreign_data_read_as_defaults() {
        for data in [json!(null), json!("text"), json!([1, 2]), json!({"transcript": "nope"})] {
            let event = CallEvent::from_value(json!({"type": "post_call_transcription", "data": data}))
                .unwrap();
            assert_eq!(event.conversation_id(), UNKNOWN_CONVERSATION);
            assert!(event.data.transcript.is_empty());
        }

        let stringly = CallEvent::from_value(json!({
            "type": "post_call_transcription",
            "event_timestamp": " 1000 ",
            "data": {"metadata": {"call_duration_secs": "-5"}}
        }))
        .unwrap();
        assert_eq!(stringly.event_timestamp, Some(1000));

        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(PersistedRecord::from_event(&stringly, now).duration_secs, 0);
    }

    #[test]
    fn test_record_projection() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let event = CallEvent::from_value(sample()).unwrap();
        let record = PersistedRecord::from_event(&event, now);

        assert_eq!(record.key(), ("abc123", 1000));
        assert_eq!(record.agent_id, "agent_test");
        assert_eq!(record.summary, "test");
        assert_eq!(record.call_successful, "success");
        assert_eq!(record.duration_secs, 120);
        assert_eq!(record.transcript_length, 2);
        assert_eq!(record.created_at, now.to_rfc3339());
        assert_eq!(record.emergency_type, "fire");
        assert_eq!(record.location, "unknown");
        assert_eq!(record.latitude, 36.1627);
    }

    #[test]
    fn test_record_defaults() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let event = CallEvent::from_value(json!({"type": "post_call_transcription"})).unwrap();
        let record = PersistedRecord::from_event(&event, now);

        assert_eq!(record.timestamp, now.timestamp());
        assert_eq!(record.agent_id, "");
        assert_eq!(record.summary, "");
        assert_eq!(record.duration_secs, 0);
        assert_eq!(record.transcript_length, 0);
    }
}
