//! Append-only local log of processed calls.
//!
//! Each processed transcription event is appended as one compact JSON line.
//! The recent-calls endpoint is a projection over this file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::call::POST_CALL_TRANSCRIPTION;

/// Summary of one logged call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSummary {
    pub conversation_id: Option<String>,
    pub summary: Option<String>,
    pub timestamp: Option<i64>,
}

/// The newest logged calls plus the total logged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentCalls {
    pub calls: Vec<CallSummary>,
    pub total: usize,
}

/// JSONL call log.
#[derive(Debug, Clone)]
pub struct CallLog {
    path: PathBuf,
}

impl CallLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one event to the log.
    pub async fn append(&self, event: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open call log: {}", self.path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// The last `limit` transcription calls, oldest first.
    pub async fn recent(&self, limit: usize) -> Result<RecentCalls> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(RecentCalls {
                calls: Vec::new(),
                total: 0,
            });
        }

        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read call log: {}", self.path.display()))?;

        let calls: Vec<CallSummary> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Value>(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, line_length = line.len(), "call_log_line_corrupt");
                    None
                }
            })
            .filter(|event| event["type"].as_str() == Some(POST_CALL_TRANSCRIPTION))
            .map(|event| summarize(&event))
            .collect();

        let total = calls.len();
        let calls = calls.into_iter().skip(total.saturating_sub(limit)).collect();

        Ok(RecentCalls { calls, total })
    }
}

fn summarize(event: &Value) -> CallSummary {
    let data = &event["data"];
    CallSummary {
        conversation_id: data["conversation_id"].as_str().map(str::to_string),
        summary: data["analysis"]["transcript_summary"]
            .as_str()
            .map(str::to_string),
        timestamp: event["event_timestamp"].as_i64(),
    }
}
