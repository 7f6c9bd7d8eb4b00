//! Realtime synchronization core.
//!
//! This module keeps the local mirror of server-owned collections correct and
//! fresh under an unreliable network, server restarts and out-of-order
//! delivery. It is composed of several submodules, each responsible for one
//! aspect of the process:
//!
//! - `frame`: incremental framing parser turning raw stream bytes into records
//! - `backoff`: reconnect delay schedule with jitter and a cap
//! - `store`: timestamp-ordered merge primitives over id-keyed collections
//! - `events`: live event classification and the observer handler registry
//! - `reconcile`: snapshot/delta reconciliation against the changes endpoint
//! - `stream`: the long-lived stream connection and its reconnect state machine
//! - `watchdog`: staleness watchdog and the fallback poller
//! - `stats`: per-session counters for lifecycle logging
//! - `orchestrator`: wires everything into one start/stop lifecycle
//!
//! The guarantee is eventual, monotonic convergence with the server's
//! authoritative state; the worst degraded mode is poll-cadence freshness,
//! never data loss.

pub mod backoff;
pub mod events;
pub mod frame;
pub mod orchestrator;
pub mod reconcile;
pub mod stats;
pub mod store;
pub mod stream;
pub mod watchdog;

pub use orchestrator::{SyncConfig, SyncOrchestrator};
