//! HTTP client and wire types for the dashboard server API.

pub mod client;
pub mod types;

pub use client::{ApiClient, Target};
pub use types::{ChangesPayload, EventEnvelope, SyncError};
