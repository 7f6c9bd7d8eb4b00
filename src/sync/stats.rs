//! Counters describing how the sync session is going.
//!
//! Purely observational: nothing reads these to make decisions. They exist so
//! the lifecycle logs can say what actually happened over a session.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters, bumped from every sync service.
#[derive(Debug, Default)]
pub struct SyncStats {
	events_applied: AtomicU64,
	records_dropped: AtomicU64,
	reconciliations: AtomicU64,
	reconciliation_failures: AtomicU64,
	stream_opens: AtomicU64,
	reconnects_forced: AtomicU64,
}

impl SyncStats {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record_event_applied(&self) {
		self.events_applied.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_record_dropped(&self) {
		self.records_dropped.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_reconciliation(&self) {
		self.reconciliations.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_reconciliation_failure(&self) {
		self.reconciliation_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_stream_open(&self) {
		self.stream_opens.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_forced_reconnect(&self) {
		self.reconnects_forced.fetch_add(1, Ordering::Relaxed);
	}

	pub fn events_applied(&self) -> u64 {
		self.events_applied.load(Ordering::Relaxed)
	}

	pub fn reconciliations(&self) -> u64 {
		self.reconciliations.load(Ordering::Relaxed)
	}

	/// Human-readable summary for lifecycle logging.
	pub fn summary(&self) -> String {
		format!(
			"{} events applied ({} records dropped), {} reconciliations ({} failed), {} stream opens, {} forced reconnects",
			self.events_applied.load(Ordering::Relaxed),
			self.records_dropped.load(Ordering::Relaxed),
			self.reconciliations.load(Ordering::Relaxed),
			self.reconciliation_failures.load(Ordering::Relaxed),
			self.stream_opens.load(Ordering::Relaxed),
			self.reconnects_forced.load(Ordering::Relaxed),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn summary_reflects_counters() {
		let stats = SyncStats::new();
		stats.record_event_applied();
		stats.record_event_applied();
		stats.record_reconciliation();
		assert_eq!(stats.events_applied(), 2);
		assert_eq!(stats.reconciliations(), 1);
		assert!(stats.summary().starts_with("2 events applied"));
	}
}
