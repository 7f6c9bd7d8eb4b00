//! Live event classification and the handler registry.
//!
//! Stream records arrive as a `{ type, data?, eventTs? }` envelope. This
//! module turns the envelope into a typed [`LiveEvent`], with a catch-all
//! variant so unknown types stay safely ignorable, and owns the registry
//! through which the host application observes applied events. The registry
//! handler is read freshly on each dispatch, so the host can swap its
//! callback without tearing down the live connection.

use crate::api::EventEnvelope;
use crate::model::{Draft, LogEntry, Task, Topic, TypingState};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Payload of an `openclaw.typing` event. Ephemeral; never merged into a
/// persisted collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
	#[serde(default)]
	pub session_key: Option<String>,
	#[serde(default)]
	pub topic_id: Option<String>,
	#[serde(default)]
	pub typing: bool,
	#[serde(default)]
	pub request_id: Option<String>,
	#[serde(default)]
	pub updated_at: Option<String>,
}

impl TypingUpdate {
	/// Key for the ephemeral typing map: the explicit session key when the
	/// server sends one, otherwise the topic the indicator belongs to.
	pub fn derived_key(&self) -> String {
		self.session_key
			.clone()
			.or_else(|| self.topic_id.clone())
			.unwrap_or_else(|| "main".to_string())
	}

	pub fn state(&self) -> TypingState {
		TypingState {
			typing: self.typing,
			request_id: self.request_id.clone(),
			updated_at: self.updated_at.clone(),
		}
	}
}

/// A classified stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
	TopicUpserted(Topic),
	TaskUpserted(Task),
	/// Covers `log.appended`, `log.patched` and `log.upserted`; the merge
	/// layer treats them identically.
	LogUpserted(LogEntry),
	DraftUpserted(Draft),
	TopicDeleted { id: String },
	TaskDeleted { id: String },
	LogDeleted { id: String },
	DraftDeleted { id: String },
	Typing(TypingUpdate),
	/// Forget everything and resync from scratch.
	StreamReset,
	/// Forward-compatibility catch-all; applied as a no-op.
	Unknown { event_type: String },
}

#[derive(Debug, Clone, Deserialize)]
struct DeletedPayload {
	id: String,
}

fn payload<T: serde::de::DeserializeOwned>(data: &Option<Value>) -> Result<T, serde_json::Error> {
	let value = data.clone().unwrap_or(Value::Null);
	serde_json::from_value(value)
}

impl LiveEvent {
	/// Classify an envelope. A malformed payload for a known type is a parse
	/// error; the caller drops the record without touching cursor or token.
	pub fn classify(envelope: &EventEnvelope) -> Result<LiveEvent, serde_json::Error> {
		let event = match envelope.event_type.as_str() {
			"topic.upserted" => LiveEvent::TopicUpserted(payload(&envelope.data)?),
			"task.upserted" => LiveEvent::TaskUpserted(payload(&envelope.data)?),
			"log.upserted" | "log.appended" | "log.patched" => {
				LiveEvent::LogUpserted(payload(&envelope.data)?)
			}
			"draft.upserted" => LiveEvent::DraftUpserted(payload(&envelope.data)?),
			"topic.deleted" => {
				let DeletedPayload { id } = payload(&envelope.data)?;
				LiveEvent::TopicDeleted { id }
			}
			"task.deleted" => {
				let DeletedPayload { id } = payload(&envelope.data)?;
				LiveEvent::TaskDeleted { id }
			}
			"log.deleted" => {
				let DeletedPayload { id } = payload(&envelope.data)?;
				LiveEvent::LogDeleted { id }
			}
			"draft.deleted" => {
				let DeletedPayload { id } = payload(&envelope.data)?;
				LiveEvent::DraftDeleted { id }
			}
			"openclaw.typing" => LiveEvent::Typing(payload(&envelope.data)?),
			"stream.reset" => LiveEvent::StreamReset,
			other => LiveEvent::Unknown {
				event_type: other.to_string(),
			},
		};
		Ok(event)
	}
}

/// Sink the stream connection dispatches classified envelopes into.
///
/// The orchestrator implements this to route events through the merge layer;
/// tests implement it with a recording fake.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
	async fn apply(&self, envelope: EventEnvelope);
}

pub type LiveEventHandler = Arc<dyn Fn(&LiveEvent) + Send + Sync>;

/// Registry for the host application's observer callback.
pub struct HandlerRegistry {
	handler: Mutex<Option<LiveEventHandler>>,
}

impl HandlerRegistry {
	pub fn new() -> Self {
		Self {
			handler: Mutex::new(None),
		}
	}

	/// Swap the observer without touching the live connection.
	pub fn replace(&self, handler: Option<LiveEventHandler>) {
		*self.handler.lock().unwrap() = handler;
	}

	/// Invoke the current observer, if any. The handler slot is re-read on
	/// every call and the lock is released before invoking, so a handler may
	/// itself call [`HandlerRegistry::replace`].
	pub fn dispatch(&self, event: &LiveEvent) {
		let handler = self.handler.lock().unwrap().clone();
		if let Some(handler) = handler {
			handler(event);
		}
	}
}

impl Default for HandlerRegistry {
	fn default() -> Self {
		Self::new()
	}
}
