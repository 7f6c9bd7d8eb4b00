//! Realtime synchronization client for the agent dashboard.
//!
//! Keeps a local mirror of server-owned collections (spaces, topics, tasks,
//! log entries, drafts, typing indicators) converging with the server's
//! authoritative state, fed by a long-lived event stream with reconciliation
//! as the correctness backstop.

pub mod api;
pub mod model;
pub mod sync;

pub use api::{ApiClient, ChangesPayload, EventEnvelope, SyncError};
pub use model::MirrorState;
pub use sync::events::LiveEvent;
pub use sync::{SyncConfig, SyncOrchestrator};
