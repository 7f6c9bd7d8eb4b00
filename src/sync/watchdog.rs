//! Staleness watchdog and the fallback poller.
//!
//! The watchdog is the liveness check over the stream: on a fixed tick, while
//! the page is visible, it forces a reconnect when no byte has arrived within
//! the staleness threshold, and otherwise runs an opportunistic
//! reconciliation as a backstop against silently dropped messages. Exactly
//! one forced reconnect happens per stale period.
//!
//! The fallback poller substitutes periodic reconciliation for the stream
//! whenever the stream is not open, and stops the instant it opens.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What the watchdog and poller need from the rest of the sync stack. The
/// orchestrator implements this over the live connection and reconciler.
#[async_trait::async_trait]
pub trait WatchdogTarget: Send + Sync {
	/// Whether the page is foreground/visible.
	fn visible(&self) -> bool;
	/// Instant of the last byte received on the stream.
	fn last_activity(&self) -> Instant;
	/// Abort the transport and reconnect with zero delay.
	fn force_reconnect(&self);
	/// Run one reconciliation pass.
	async fn reconcile(&self);
}

pub struct WatchdogMonitor {
	target: Arc<dyn WatchdogTarget>,
	tick: Duration,
	stale_after: Duration,
}

impl WatchdogMonitor {
	pub fn new(target: Arc<dyn WatchdogTarget>, tick: Duration, stale_after: Duration) -> Self {
		Self {
			target,
			tick,
			stale_after,
		}
	}

	/// Tick until the orchestrator closes.
	pub async fn run(self, mut closed: watch::Receiver<bool>) {
		let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		// Set while a stale period has already been answered with a forced
		// reconnect; cleared once bytes flow again.
		let mut kicked = false;

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					if !self.target.visible() {
						continue;
					}
					let idle = self.target.last_activity().elapsed();
					if idle > self.stale_after {
						if !kicked {
							kicked = true;
							warn!(
								"No stream bytes for {:?}, forcing reconnect",
								idle
							);
							self.target.force_reconnect();
						}
					} else {
						kicked = false;
						self.target.reconcile().await;
					}
				}
				_ = closed.changed() => {
					if *closed.borrow() {
						debug!("Watchdog stopped");
						return;
					}
				}
			}
		}
	}
}

pub struct FallbackPoller {
	target: Arc<dyn WatchdogTarget>,
	interval: Duration,
}

impl FallbackPoller {
	pub fn new(target: Arc<dyn WatchdogTarget>, interval: Duration) -> Self {
		Self { target, interval }
	}

	/// Reconcile on a fixed cadence while the stream is down. `open` is the
	/// connection's open-state watch; flipping it repeatedly is safe.
	pub async fn run(self, mut open: watch::Receiver<bool>, mut closed: watch::Receiver<bool>) {
		loop {
			if *closed.borrow() {
				debug!("Fallback poller stopped");
				return;
			}

			if *open.borrow() {
				// Stream healthy: park until that changes.
				tokio::select! {
					_ = open.changed() => {}
					_ = closed.changed() => {}
				}
				continue;
			}

			tokio::select! {
				_ = tokio::time::sleep(self.interval) => {
					if !*open.borrow() {
						self.target.reconcile().await;
					}
				}
				// Stop the instant the stream opens.
				_ = open.changed() => {}
				_ = closed.changed() => {}
			}
		}
	}
}
