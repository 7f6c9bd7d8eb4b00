//! Sync orchestrator and integration point for all sync services.
//!
//! The orchestrator wires the api client, merge store, reconciler, stream
//! connection, watchdog and fallback poller into one lifecycle. Starting it
//! kicks an immediate reconciliation (independent of the stream, so the UI
//! never depends on the stream succeeding at all) and opens the stream;
//! closing it idempotently tears everything down.
//!
//! The rest of the application sees three things: the mirrored state behind
//! a mutex, the replace()-able event handler, and the environment-trigger
//! methods (`set_visible`, `set_online`, `request_reconnect`,
//! `update_target`).

use crate::api::{ApiClient, EventEnvelope};
use crate::model::MirrorState;
use crate::sync::events::{EventSink, HandlerRegistry, LiveEvent, LiveEventHandler};
use crate::sync::reconcile::Reconciler;
use crate::sync::stats::SyncStats;
use crate::sync::store;
use crate::sync::stream::{StreamConnection, StreamState};
use crate::sync::watchdog::{FallbackPoller, WatchdogMonitor, WatchdogTarget};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Tunables for one sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Server base URL, e.g. `http://localhost:4477`.
	pub base_url: String,
	/// Bearer token attached to every request when present.
	pub auth_token: Option<String>,
	/// Watchdog cadence.
	pub watchdog_tick: Duration,
	/// Stream staleness threshold before a forced reconnect.
	pub stale_after: Duration,
	/// Fallback poll cadence while the stream is down.
	pub poll_interval: Duration,
	/// Per-request timeout for reconciliation fetches.
	pub changes_timeout: Duration,
}

impl SyncConfig {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			auth_token: None,
			watchdog_tick: Duration::from_secs(5),
			stale_after: Duration::from_secs(70),
			poll_interval: Duration::from_secs(2),
			changes_timeout: Duration::from_secs(30),
		}
	}
}

/// Routes classified events through the merge store, advances the cursor,
/// and notifies the registered observer.
struct MirrorSink {
	state: Arc<Mutex<MirrorState>>,
	reconciler: Arc<Reconciler>,
	registry: Arc<HandlerRegistry>,
	stats: Arc<SyncStats>,
}

impl MirrorSink {
	fn apply_to_state(&self, event: &LiveEvent) {
		let mut state = self.state.lock().unwrap();
		match event {
			LiveEvent::TopicUpserted(topic) => {
				store::upsert(&mut state.topics, topic.clone());
			}
			LiveEvent::TaskUpserted(task) => {
				store::upsert(&mut state.tasks, task.clone());
			}
			LiveEvent::LogUpserted(entry) => {
				store::merge_logs(&mut state.logs, vec![entry.clone()]);
			}
			LiveEvent::DraftUpserted(draft) => {
				store::upsert(&mut state.drafts, draft.clone());
			}
			LiveEvent::TopicDeleted { id } => {
				store::remove_by_id(&mut state.topics, id);
			}
			LiveEvent::TaskDeleted { id } => {
				store::remove_by_id(&mut state.tasks, id);
			}
			LiveEvent::LogDeleted { id } => {
				store::remove_by_id(&mut state.logs, id);
			}
			LiveEvent::DraftDeleted { id } => {
				store::remove_by_id(&mut state.drafts, id);
			}
			LiveEvent::Typing(update) => {
				// Last write replaces by key; not part of the persisted
				// entity model.
				state.typing.insert(update.derived_key(), update.state());
			}
			LiveEvent::StreamReset | LiveEvent::Unknown { .. } => {}
		}
	}
}

#[async_trait::async_trait]
impl EventSink for MirrorSink {
	async fn apply(&self, envelope: EventEnvelope) {
		let event = match LiveEvent::classify(&envelope) {
			Ok(event) => event,
			Err(e) => {
				self.stats.record_record_dropped();
				debug!(
					"Dropping {:?} event with malformed payload: {}",
					envelope.event_type, e
				);
				return;
			}
		};

		if let LiveEvent::Unknown { event_type } = &event {
			debug!("Ignoring unknown event type {:?}", event_type);
			return;
		}

		if let LiveEvent::StreamReset = event {
			// Forget everything and resync from scratch. The stream already
			// dropped its resumption token; clearing the cursor makes the
			// next pass a full snapshot. The envelope's own timestamp must
			// not re-establish the cursor, or the resync would be a delta.
			info!("Stream reset received, forcing snapshot reconciliation");
			self.reconciler.clear_cursor();
			let reconciler = self.reconciler.clone();
			tokio::spawn(async move { reconciler.reconcile().await });
		} else {
			self.apply_to_state(&event);
			if let Some(ts) = &envelope.event_ts {
				self.reconciler.advance_cursor(ts);
			}
		}

		self.stats.record_event_applied();
		self.registry.dispatch(&event);
	}
}

/// Adapter giving the watchdog and poller their view of the stack.
struct SyncTarget {
	conn: Arc<StreamConnection>,
	reconciler: Arc<Reconciler>,
	stats: Arc<SyncStats>,
	visible: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl WatchdogTarget for SyncTarget {
	fn visible(&self) -> bool {
		self.visible.load(Ordering::SeqCst)
	}

	fn last_activity(&self) -> Instant {
		self.conn.last_activity()
	}

	fn force_reconnect(&self) {
		self.stats.record_forced_reconnect();
		self.conn.request_reconnect();
	}

	async fn reconcile(&self) {
		self.reconciler.reconcile().await;
	}
}

pub struct SyncOrchestrator {
	config: SyncConfig,
	api: Arc<ApiClient>,
	state: Arc<Mutex<MirrorState>>,
	stats: Arc<SyncStats>,
	registry: Arc<HandlerRegistry>,
	reconciler: Arc<Reconciler>,
	conn: Arc<StreamConnection>,
	visible: Arc<AtomicBool>,
	closed: watch::Sender<bool>,
	started: AtomicBool,
}

impl SyncOrchestrator {
	pub fn new(config: SyncConfig) -> Self {
		let api = Arc::new(ApiClient::new(
			config.base_url.clone(),
			config.auth_token.clone(),
			config.changes_timeout,
		));
		let state = Arc::new(Mutex::new(MirrorState::default()));
		let stats = Arc::new(SyncStats::new());
		let registry = Arc::new(HandlerRegistry::new());
		let reconciler = Arc::new(Reconciler::new(api.clone(), state.clone(), stats.clone()));

		let sink = Arc::new(MirrorSink {
			state: state.clone(),
			reconciler: reconciler.clone(),
			registry: registry.clone(),
			stats: stats.clone(),
		});
		let conn = Arc::new(StreamConnection::new(
			api.clone(),
			sink,
			reconciler.clone(),
			stats.clone(),
		));

		Self {
			config,
			api,
			state,
			stats,
			registry,
			reconciler,
			conn,
			visible: Arc::new(AtomicBool::new(true)),
			closed: watch::Sender::new(false),
			started: AtomicBool::new(false),
		}
	}

	/// Start the session: one immediate reconciliation, the stream
	/// connection, the watchdog, and the fallback poller. Must be called
	/// within a tokio runtime. Calling twice is a no-op.
	pub fn start(&self) {
		if self.started.swap(true, Ordering::SeqCst) {
			return;
		}
		info!("Starting sync session against {}", self.config.base_url);

		// Initial reconciliation runs regardless of stream health.
		let reconciler = self.reconciler.clone();
		tokio::spawn(async move { reconciler.reconcile().await });

		tokio::spawn(self.conn.clone().run(self.closed.subscribe()));

		let target = Arc::new(SyncTarget {
			conn: self.conn.clone(),
			reconciler: self.reconciler.clone(),
			stats: self.stats.clone(),
			visible: self.visible.clone(),
		});

		let watchdog = WatchdogMonitor::new(
			target.clone(),
			self.config.watchdog_tick,
			self.config.stale_after,
		);
		tokio::spawn(watchdog.run(self.closed.subscribe()));

		let poller = FallbackPoller::new(target, self.config.poll_interval);
		tokio::spawn(poller.run(self.conn.subscribe_open(), self.closed.subscribe()));
	}

	/// Tear the session down: abort the transport, stop the watchdog and
	/// poller, cancel any scheduled reconnect. Safe to call repeatedly.
	pub fn close(&self) {
		if self.closed.send_replace(true) {
			return;
		}
		info!("Sync session closed: {}", self.stats.summary());
	}

	/// Shared mirror of the server collections.
	pub fn state(&self) -> Arc<Mutex<MirrorState>> {
		self.state.clone()
	}

	/// Clone of the current mirror contents.
	pub fn snapshot(&self) -> MirrorState {
		self.state.lock().unwrap().clone()
	}

	pub fn stats(&self) -> Arc<SyncStats> {
		self.stats.clone()
	}

	pub fn cursor(&self) -> Option<String> {
		self.reconciler.cursor()
	}

	pub fn stream_state(&self) -> StreamState {
		self.conn.state()
	}

	/// Swap the observer callback without tearing down the connection.
	pub fn set_handler(&self, handler: Option<LiveEventHandler>) {
		self.registry.replace(handler);
	}

	/// Page visibility trigger; the watchdog only runs while visible.
	pub fn set_visible(&self, visible: bool) {
		self.visible.store(visible, Ordering::SeqCst);
		if visible {
			// Foregrounding counts as an explicit reconnect trigger.
			self.conn.request_reconnect();
		}
	}

	/// Browser online/offline trigger.
	pub fn set_online(&self, online: bool) {
		self.conn.set_online(online);
	}

	/// Explicit reconnect (e.g. focus): zero delay, fresh retry counter.
	pub fn request_reconnect(&self) {
		self.conn.request_reconnect();
	}

	/// React to a token rotation or server base change: clear the cursor and
	/// resumption token, force a snapshot reconciliation and reconnect.
	pub fn update_target(&self, base_url: String, auth_token: Option<String>) {
		if !self.api.set_target(base_url, auth_token) {
			return;
		}
		info!("Upstream target changed, resyncing from scratch");
		self.reconciler.clear_cursor();
		self.conn.clear_resume_token();
		self.conn.request_reconnect();
		let reconciler = self.reconciler.clone();
		tokio::spawn(async move { reconciler.reconcile().await });
	}
}

impl Drop for SyncOrchestrator {
	fn drop(&mut self) {
		self.close();
	}
}
