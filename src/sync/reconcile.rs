//! Reconciliation against the authoritative changes endpoint.
//!
//! Reconciliation is the correctness backstop for everything the stream might
//! miss. Without a cursor it fetches a full snapshot and replaces each local
//! collection wholesale, so stale locally-cached entities the server no
//! longer has are guaranteed to disappear. With a cursor it fetches a delta
//! and merges it through the store primitives, applying the deletion-id list
//! after the upserts so a delete always wins over a stale concurrent upsert
//! in the same batch.
//!
//! At most one reconciliation is ever in flight; overlapping calls are
//! dropped rather than queued because the watchdog and poller cadence already
//! bound the retry frequency. Failures leave the cursor untouched so no data
//! is skipped.

use crate::api::{ApiClient, ChangesPayload};
use crate::model::{Entity, MirrorState};
use crate::sync::stats::SyncStats;
use crate::sync::store;
use chrono::DateTime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct Reconciler {
	api: Arc<ApiClient>,
	state: Arc<Mutex<MirrorState>>,
	stats: Arc<SyncStats>,
	cursor: Mutex<Option<String>>,
	in_flight: AtomicBool,
}

impl Reconciler {
	pub fn new(api: Arc<ApiClient>, state: Arc<Mutex<MirrorState>>, stats: Arc<SyncStats>) -> Self {
		Self {
			api,
			state,
			stats,
			cursor: Mutex::new(None),
			in_flight: AtomicBool::new(false),
		}
	}

	/// Current cursor, if any.
	pub fn cursor(&self) -> Option<String> {
		self.cursor.lock().unwrap().clone()
	}

	/// Clear the cursor so the next reconciliation fetches a full snapshot.
	pub fn clear_cursor(&self) {
		*self.cursor.lock().unwrap() = None;
	}

	/// Advance the cursor to `candidate` unless it is older than what we
	/// already hold. The server may briefly report an older timestamp; the
	/// cursor never regresses.
	pub fn advance_cursor(&self, candidate: &str) {
		let mut cursor = self.cursor.lock().unwrap();
		match cursor.as_deref() {
			Some(current) if !is_later(current, candidate) => {}
			_ => *cursor = Some(candidate.to_string()),
		}
	}

	/// Run one reconciliation pass. Overlapping calls are dropped; errors are
	/// swallowed after logging because the next watchdog or poller tick
	/// retries.
	pub async fn reconcile(&self) {
		if self.in_flight.swap(true, Ordering::SeqCst) {
			debug!("Reconciliation already in flight, dropping this pass");
			return;
		}

		match self.run_once().await {
			Ok(()) => self.stats.record_reconciliation(),
			Err(e) => {
				self.stats.record_reconciliation_failure();
				debug!("Reconciliation failed, next tick retries: {}", e);
			}
		}

		self.in_flight.store(false, Ordering::SeqCst);
	}

	async fn run_once(&self) -> Result<(), crate::api::SyncError> {
		let cursor = self.cursor();
		let payload = self.api.fetch_changes(cursor.as_deref()).await?;
		let advanced = max_payload_timestamp(&payload);

		{
			let mut state = self.state.lock().unwrap();
			if cursor.is_none() {
				apply_snapshot(&mut state, payload);
			} else {
				apply_delta(&mut state, payload);
			}
		}

		if let Some(ts) = advanced {
			self.advance_cursor(&ts);
		}
		if cursor.is_none() {
			info!("Applied snapshot reconciliation, cursor now {:?}", self.cursor());
		}
		Ok(())
	}
}

/// Replace each collection present in the payload wholesale, then apply the
/// deletion-id list. Omitted collections are untouched.
pub fn apply_snapshot(state: &mut MirrorState, payload: ChangesPayload) {
	if let Some(spaces) = payload.spaces {
		state.spaces = spaces;
	}
	if let Some(topics) = payload.topics {
		state.topics = topics;
	}
	if let Some(tasks) = payload.tasks {
		state.tasks = tasks;
	}
	if let Some(logs) = payload.logs {
		state.logs = logs;
		store::sort_logs(&mut state.logs);
	}
	if let Some(drafts) = payload.drafts {
		state.drafts = drafts;
	}
	if let Some(ids) = payload.deleted_log_ids {
		store::remove_ids(&mut state.logs, &ids);
	}
}

/// Merge every returned entity array through the store, then apply the
/// deletion-id list as unconditional removals after the upserts.
pub fn apply_delta(state: &mut MirrorState, payload: ChangesPayload) {
	if let Some(spaces) = payload.spaces {
		for space in spaces {
			store::upsert(&mut state.spaces, space);
		}
	}
	if let Some(topics) = payload.topics {
		for topic in topics {
			store::upsert(&mut state.topics, topic);
		}
	}
	if let Some(tasks) = payload.tasks {
		for task in tasks {
			store::upsert(&mut state.tasks, task);
		}
	}
	if let Some(logs) = payload.logs {
		store::merge_logs(&mut state.logs, logs);
	}
	if let Some(drafts) = payload.drafts {
		for draft in drafts {
			store::upsert(&mut state.drafts, draft);
		}
	}
	if let Some(ids) = payload.deleted_log_ids {
		store::remove_ids(&mut state.logs, &ids);
	}
}

/// `max(updatedAt ?? createdAt)` across every entity in the payload.
pub fn max_payload_timestamp(payload: &ChangesPayload) -> Option<String> {
	let mut best: Option<String> = None;

	fn consider<T: Entity>(best: &mut Option<String>, items: &Option<Vec<T>>) {
		let Some(items) = items else { return };
		for item in items {
			let Some(ts) = item.updated_at().or_else(|| item.created_at()) else {
				continue;
			};
			match best.as_deref() {
				Some(current) if !is_later(current, ts) => {}
				_ => *best = Some(ts.to_string()),
			}
		}
	}

	consider(&mut best, &payload.spaces);
	consider(&mut best, &payload.topics);
	consider(&mut best, &payload.tasks);
	consider(&mut best, &payload.logs);
	consider(&mut best, &payload.drafts);
	best
}

/// Whether `candidate` is strictly later than `current`. Falls back to a
/// lexical comparison when either side is not a parsable instant, which is
/// correct for same-format ISO-8601 strings.
fn is_later(current: &str, candidate: &str) -> bool {
	match (
		DateTime::parse_from_rfc3339(current),
		DateTime::parse_from_rfc3339(candidate),
	) {
		(Ok(cur), Ok(cand)) => cand > cur,
		_ => candidate > current,
	}
}
