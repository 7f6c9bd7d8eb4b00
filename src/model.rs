//! Data model for the mirrored dashboard collections.
//!
//! Every persisted entity the server owns (spaces, topics, tasks, log entries,
//! drafts) is mirrored locally as an id-keyed collection. Entities carry their
//! server timestamps as ISO-8601 strings and keep any fields this client does
//! not model in a flattened map, so a merge never drops data the server sent.
//!
//! Typing indicators are deliberately separate: they are ephemeral, keyed by a
//! derived session key, and never merged through the timestamp-ordered store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Common surface the merge layer needs from every persisted entity.
///
/// `updated_at` drives the per-id monotonicity check, `created_at` drives log
/// ordering, and `idempotency_key` is only a deterministic tiebreak for
/// entries created in the same timestamp bucket.
pub trait Entity: Clone + PartialEq {
	fn id(&self) -> &str;
	fn created_at(&self) -> Option<&str>;
	fn updated_at(&self) -> Option<&str>;
	fn idempotency_key(&self) -> Option<&str> {
		None
	}
}

/// A workspace grouping topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<String>,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

/// A conversation topic mirrored from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub space_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<String>,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

/// A unit of agent work tracked on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub topic_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<String>,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

/// A single activity log entry.
///
/// `idempotency_key` is assigned by whichever write path created the entry and
/// is used only to keep entries created in the same timestamp bucket in a
/// stable order across reloads and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub topic_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub idempotency_key: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<String>,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

/// An unsent draft mirrored so every tab shows the same pending text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub topic_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<String>,
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

macro_rules! impl_entity {
	($ty:ty) => {
		impl Entity for $ty {
			fn id(&self) -> &str {
				&self.id
			}
			fn created_at(&self) -> Option<&str> {
				self.created_at.as_deref()
			}
			fn updated_at(&self) -> Option<&str> {
				self.updated_at.as_deref()
			}
		}
	};
}

impl_entity!(Space);
impl_entity!(Topic);
impl_entity!(Task);
impl_entity!(Draft);

impl Entity for LogEntry {
	fn id(&self) -> &str {
		&self.id
	}
	fn created_at(&self) -> Option<&str> {
		self.created_at.as_deref()
	}
	fn updated_at(&self) -> Option<&str> {
		self.updated_at.as_deref()
	}
	fn idempotency_key(&self) -> Option<&str> {
		self.idempotency_key.as_deref()
	}
}

/// Ephemeral typing indicator state, replaced wholesale per session key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingState {
	#[serde(default)]
	pub typing: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub request_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<String>,
}

/// The local mirror of every server-owned collection.
///
/// Collections are `Vec`s keyed by entity id (no duplicates); insertion order
/// is most-recent-first except logs, which are kept in the stable total order
/// established by the merge layer.
#[derive(Debug, Clone, Default)]
pub struct MirrorState {
	pub spaces: Vec<Space>,
	pub topics: Vec<Topic>,
	pub tasks: Vec<Task>,
	pub logs: Vec<LogEntry>,
	pub drafts: Vec<Draft>,
	pub typing: HashMap<String, TypingState>,
}

impl MirrorState {
	/// Drop everything, including ephemeral typing state.
	pub fn clear(&mut self) {
		self.spaces.clear();
		self.topics.clear();
		self.tasks.clear();
		self.logs.clear();
		self.drafts.clear();
		self.typing.clear();
	}

	/// One-line summary for periodic logging.
	pub fn summary(&self) -> String {
		format!(
			"{} spaces, {} topics, {} tasks, {} logs, {} drafts",
			self.spaces.len(),
			self.topics.len(),
			self.tasks.len(),
			self.logs.len(),
			self.drafts.len()
		)
	}
}
