//! Wire types for the dashboard server API.

use crate::model::{Draft, LogEntry, Space, Task, Topic};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response body of `GET /api/changes`.
///
/// Omitted collections are no-ops; a request without `since` returns a full
/// authoritative snapshot of every collection. `deleted_log_ids` is a list of
/// tombstones applied unconditionally after any upserts in the same payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesPayload {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub spaces: Option<Vec<Space>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub topics: Option<Vec<Topic>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tasks: Option<Vec<Task>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub logs: Option<Vec<LogEntry>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub drafts: Option<Vec<Draft>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted_log_ids: Option<Vec<String>>,
}

/// The JSON payload of one `message` stream record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
	#[serde(rename = "type")]
	pub event_type: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub event_ts: Option<String>,
}

/// Error type for sync operations. None of these are fatal to the client: the
/// fallback poller and the always-on initial reconciliation preserve
/// correctness, so the worst case is reduced freshness.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("transport error: {0}")]
	Transport(#[from] reqwest::Error),

	#[error("unexpected HTTP status: {0}")]
	Status(reqwest::StatusCode),

	#[error("invalid base URL: {0}")]
	BadUrl(String),

	#[error("payload parse error: {0}")]
	Parse(#[from] serde_json::Error),
}
