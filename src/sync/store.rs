//! Timestamp-ordered merge primitives over id-keyed collections.
//!
//! All mutation of the mirrored collections funnels through this module. The
//! rules are small but load-bearing:
//!
//! - an upsert never regresses an id to an older `updatedAt` than what is
//!   already stored;
//! - repeated delivery of an identical entity is a true no-op, not just a
//!   logical one;
//! - deletion is an unconditional tombstone that wins over any
//!   concurrently-arriving upsert applied earlier in the same batch;
//! - log collections keep a stable total order that does not depend on
//!   arrival order.

use crate::model::Entity;
use chrono::{DateTime, FixedOffset};

fn parse_instant(value: Option<&str>) -> Option<DateTime<FixedOffset>> {
	value.and_then(|v| DateTime::parse_from_rfc3339(v).ok())
}

/// Insert or update one entity in the collection.
///
/// New ids are prepended (collections are most-recent-first). For existing
/// ids, a strictly older `updatedAt` is discarded; when the timestamps are
/// equal or either fails to parse, a structural-equality check short-circuits
/// the write. Replacement never moves the entry, so ordering is established
/// only at first insertion. Returns true if the collection changed.
pub fn upsert<T: Entity>(items: &mut Vec<T>, next: T) -> bool {
	let Some(pos) = items.iter().position(|item| item.id() == next.id()) else {
		items.insert(0, next);
		return true;
	};

	let current = &items[pos];
	let current_ts = parse_instant(current.updated_at());
	let next_ts = parse_instant(next.updated_at());

	match (current_ts, next_ts) {
		(Some(cur), Some(new)) if new < cur => return false,
		(Some(cur), Some(new)) if new > cur => {
			items[pos] = next;
			return true;
		}
		// Equal instants or at least one unparsable timestamp: only write
		// when the content actually differs.
		_ => {}
	}

	if items[pos] == next {
		return false;
	}
	items[pos] = next;
	true
}

/// Remove an id unconditionally, regardless of any timestamp comparison.
pub fn remove_by_id<T: Entity>(items: &mut Vec<T>, id: &str) -> bool {
	let before = items.len();
	items.retain(|item| item.id() != id);
	items.len() != before
}

/// Apply a deletion-id list as unconditional tombstones.
pub fn remove_ids<T: Entity>(items: &mut Vec<T>, ids: &[String]) -> usize {
	let before = items.len();
	items.retain(|item| !ids.iter().any(|id| id == item.id()));
	before - items.len()
}

/// Merge a batch of log entries and restore the stable total order:
/// `createdAt` descending, ties broken lexically by `idempotencyKey` when
/// present, falling back to the raw id. Two entries created in the same
/// timestamp bucket by different code paths therefore sort identically across
/// reloads and clients.
pub fn merge_logs<T: Entity>(items: &mut Vec<T>, incoming: Vec<T>) {
	for entry in incoming {
		upsert(items, entry);
	}
	sort_logs(items);
}

/// Sort in place by the log total order. Stable, so repeated passes over the
/// same data never reorder ties.
pub fn sort_logs<T: Entity>(items: &mut [T]) {
	items.sort_by(|a, b| {
		let a_created = parse_instant(a.created_at());
		let b_created = parse_instant(b.created_at());
		b_created
			.cmp(&a_created)
			.then_with(|| tiebreak(a).cmp(&tiebreak(b)))
	});
}

fn tiebreak<T: Entity>(entry: &T) -> &str {
	entry.idempotency_key().unwrap_or_else(|| entry.id())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{LogEntry, Topic};

	fn topic(id: &str, updated_at: &str, title: &str) -> Topic {
		Topic {
			id: id.to_string(),
			space_id: None,
			title: Some(title.to_string()),
			created_at: None,
			updated_at: Some(updated_at.to_string()),
			extra: Default::default(),
		}
	}

	fn log(id: &str, created_at: &str, key: Option<&str>) -> LogEntry {
		LogEntry {
			id: id.to_string(),
			topic_id: None,
			message: None,
			idempotency_key: key.map(str::to_string),
			created_at: Some(created_at.to_string()),
			updated_at: Some(created_at.to_string()),
			extra: Default::default(),
		}
	}

	#[test]
	fn increasing_updates_are_last_write_wins() {
		let mut topics = Vec::new();
		for (ts, title) in [
			("2026-01-01T00:00:01Z", "one"),
			("2026-01-01T00:00:02Z", "two"),
			("2026-01-01T00:00:03Z", "three"),
		] {
			upsert(&mut topics, topic("t1", ts, title));
		}
		assert_eq!(topics.len(), 1);
		assert_eq!(topics[0].title.as_deref(), Some("three"));
	}

	#[test]
	fn stale_update_is_discarded() {
		let mut topics = vec![topic("t1", "2026-01-01T00:00:05Z", "fresh")];
		assert!(!upsert(
			&mut topics,
			topic("t1", "2026-01-01T00:00:01Z", "stale")
		));
		assert_eq!(topics[0].title.as_deref(), Some("fresh"));
	}

	#[test]
	fn identical_upsert_is_a_no_op() {
		let mut topics = vec![topic("t1", "2026-01-01T00:00:05Z", "same")];
		assert!(!upsert(
			&mut topics,
			topic("t1", "2026-01-01T00:00:05Z", "same")
		));
	}

	#[test]
	fn equal_timestamp_with_new_content_replaces() {
		let mut topics = vec![topic("t1", "2026-01-01T00:00:05Z", "old")];
		assert!(upsert(
			&mut topics,
			topic("t1", "2026-01-01T00:00:05Z", "new")
		));
		assert_eq!(topics[0].title.as_deref(), Some("new"));
	}

	#[test]
	fn unparsable_timestamp_falls_back_to_equality() {
		let mut topics = vec![topic("t1", "not-a-date", "old")];
		assert!(!upsert(&mut topics, topic("t1", "not-a-date", "old")));
		assert!(upsert(&mut topics, topic("t1", "not-a-date", "new")));
	}

	#[test]
	fn new_entries_are_prepended_and_replacement_keeps_position() {
		let mut topics = Vec::new();
		upsert(&mut topics, topic("a", "2026-01-01T00:00:01Z", "a"));
		upsert(&mut topics, topic("b", "2026-01-01T00:00:02Z", "b"));
		assert_eq!(topics[0].id, "b");
		assert_eq!(topics[1].id, "a");

		upsert(&mut topics, topic("a", "2026-01-01T00:00:09Z", "a2"));
		assert_eq!(topics[1].id, "a");
		assert_eq!(topics[1].title.as_deref(), Some("a2"));
	}

	#[test]
	fn removal_ignores_timestamps() {
		let mut topics = vec![topic("t1", "2026-01-01T00:00:05Z", "x")];
		assert!(remove_by_id(&mut topics, "t1"));
		assert!(topics.is_empty());
		assert!(!remove_by_id(&mut topics, "t1"));
	}

	#[test]
	fn equal_created_at_sorts_by_idempotency_key_regardless_of_arrival() {
		let ts = "2026-01-01T00:00:00Z";
		let mut forward = Vec::new();
		merge_logs(&mut forward, vec![log("1", ts, Some("b")), log("2", ts, Some("a"))]);
		let mut reverse = Vec::new();
		merge_logs(&mut reverse, vec![log("2", ts, Some("a")), log("1", ts, Some("b"))]);

		let order =
			|v: &Vec<LogEntry>| v.iter().map(|l| l.id.clone()).collect::<Vec<_>>();
		assert_eq!(order(&forward), vec!["2", "1"]);
		assert_eq!(order(&forward), order(&reverse));
	}

	#[test]
	fn logs_sort_newest_first() {
		let mut logs = Vec::new();
		merge_logs(
			&mut logs,
			vec![
				log("old", "2026-01-01T00:00:00Z", None),
				log("new", "2026-01-01T00:01:00Z", None),
			],
		);
		assert_eq!(logs[0].id, "new");
		assert_eq!(logs[1].id, "old");
	}

	#[test]
	fn repeated_merge_passes_do_not_reorder_ties() {
		let ts = "2026-01-01T00:00:00Z";
		let mut logs = Vec::new();
		merge_logs(&mut logs, vec![log("1", ts, None), log("2", ts, None)]);
		let first = logs.clone();
		merge_logs(&mut logs, vec![log("2", ts, None), log("1", ts, None)]);
		assert_eq!(logs, first);
	}

	#[test]
	fn deletion_list_removes_matching_ids() {
		let mut logs = vec![
			log("keep", "2026-01-01T00:00:00Z", None),
			log("drop", "2026-01-01T00:00:01Z", None),
		];
		assert_eq!(remove_ids(&mut logs, &["drop".to_string()]), 1);
		assert_eq!(logs.len(), 1);
		assert_eq!(logs[0].id, "keep");
	}
}
