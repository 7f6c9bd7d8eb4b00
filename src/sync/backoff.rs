//! Reconnect delay schedule for the stream connection.

use rand::Rng;
use std::time::Duration;

/// Exponential base capped at 30s; the jittered result never drops below
/// 500ms.
const BASE_MS: u64 = 1_000;
const CAP_MS: u64 = 30_000;
const FLOOR_MS: u64 = 500;
const JITTER: f64 = 0.25;

/// Computes the delay before the next reconnect attempt.
///
/// The retry counter grows on every organic failure and resets only on a
/// successful stream open or an explicitly requested reconnect, so repeated
/// silent failures back off monotonically up to the cap.
#[derive(Debug, Default)]
pub struct BackoffScheduler {
	retries: u32,
}

impl BackoffScheduler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current retry count, for logging.
	pub fn retries(&self) -> u32 {
		self.retries
	}

	/// Reset the counter; the next delay starts from the base again.
	pub fn reset(&mut self) {
		self.retries = 0;
	}

	/// Delay for the current retry count, then bump the counter.
	pub fn next_delay(&mut self) -> Duration {
		let delay = Self::delay_for(self.retries);
		self.retries = self.retries.saturating_add(1);
		delay
	}

	/// `clamp(500ms, base(n) * (1 + jitter))` with `base(n) =
	/// min(30s, 1s * 2^n)` and jitter uniform in [-0.25, 0.25].
	pub fn delay_for(retries: u32) -> Duration {
		// 1s * 2^5 already exceeds the cap.
		let base = if retries >= 5 {
			CAP_MS
		} else {
			(BASE_MS << retries).min(CAP_MS)
		};
		let jitter: f64 = rand::rng().random_range(-JITTER..=JITTER);
		let ms = (base as f64 * (1.0 + jitter)).max(FLOOR_MS as f64);
		Duration::from_millis(ms as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delay_stays_within_jitter_envelope() {
		for retries in 0..12u32 {
			let base = (1_000u64 << retries.min(20)).min(30_000);
			for _ in 0..50 {
				let ms = BackoffScheduler::delay_for(retries).as_millis() as u64;
				assert!(ms >= 500, "retry {retries}: {ms}ms under floor");
				assert!(
					ms as f64 <= base as f64 * 1.25 + 1.0,
					"retry {retries}: {ms}ms over envelope"
				);
			}
		}
	}

	#[test]
	fn delay_caps_at_thirty_seconds() {
		for _ in 0..50 {
			let ms = BackoffScheduler::delay_for(40).as_millis() as u64;
			assert!((22_500..=37_500).contains(&ms));
		}
	}

	#[test]
	fn counter_grows_on_failure_and_resets() {
		let mut backoff = BackoffScheduler::new();
		backoff.next_delay();
		backoff.next_delay();
		assert_eq!(backoff.retries(), 2);
		backoff.reset();
		assert_eq!(backoff.retries(), 0);
	}
}
