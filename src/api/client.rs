//! HTTP client for the dashboard server's snapshot/delta and stream endpoints.
//!
//! This is the only module that talks to the network. It exposes the two
//! endpoints the sync core consumes: `GET /api/changes` for reconciliation
//! payloads and `GET /api/stream` for the long-lived event stream. The
//! upstream target (base URL plus optional bearer token) can be swapped at
//! runtime when the environment rotates tokens or points at a new server.

use super::types::{ChangesPayload, SyncError};
use reqwest::{Client, Response, Url};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// The server the client is currently pointed at.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
	/// Base URL without a trailing slash, e.g. `http://localhost:4477`.
	pub base_url: String,
	/// Bearer token attached to every request when present.
	pub auth_token: Option<String>,
}

/// Client for the dashboard server API.
pub struct ApiClient {
	http: Client,
	target: Mutex<Target>,
	/// Per-request timeout for reconciliation fetches. Not applied to the
	/// stream request, which is long-lived by design.
	changes_timeout: Duration,
}

impl ApiClient {
	pub fn new(base_url: String, auth_token: Option<String>, changes_timeout: Duration) -> Self {
		let http = Client::builder()
			.connect_timeout(Duration::from_secs(10))
			.build()
			.expect("Failed to create HTTP client");

		Self {
			http,
			target: Mutex::new(Target {
				base_url,
				auth_token,
			}),
			changes_timeout,
		}
	}

	/// Current upstream target.
	pub fn target(&self) -> Target {
		self.target.lock().unwrap().clone()
	}

	/// Point the client at a new base URL and/or token.
	///
	/// Returns true if the target actually changed, so the caller knows
	/// whether to clear its cursor and resumption token.
	pub fn set_target(&self, base_url: String, auth_token: Option<String>) -> bool {
		let next = Target {
			base_url,
			auth_token,
		};
		let mut target = self.target.lock().unwrap();
		if *target == next {
			return false;
		}
		debug!("Switching upstream target to {}", next.base_url);
		*target = next;
		true
	}

	/// Build the changes URL, percent-encoding the cursor into `since`.
	pub fn changes_url(base_url: &str, since: Option<&str>) -> Result<Url, SyncError> {
		let raw = format!("{}/api/changes", base_url.trim_end_matches('/'));
		let mut url = Url::parse(&raw).map_err(|e| SyncError::BadUrl(e.to_string()))?;
		if let Some(since) = since {
			url.query_pairs_mut().append_pair("since", since);
		}
		Ok(url)
	}

	/// Fetch changes since the given cursor, or a full snapshot without one.
	pub async fn fetch_changes(&self, since: Option<&str>) -> Result<ChangesPayload, SyncError> {
		let target = self.target();
		let url = Self::changes_url(&target.base_url, since)?;

		let mut request = self.http.get(url).timeout(self.changes_timeout);
		if let Some(token) = &target.auth_token {
			request = request.bearer_auth(token);
		}

		let response = request.send().await?;
		if !response.status().is_success() {
			return Err(SyncError::Status(response.status()));
		}

		Ok(response.json().await?)
	}

	/// Open the long-lived event stream, resuming from `last_event_id` when
	/// present so the server can replay missed records.
	pub async fn open_stream(&self, last_event_id: Option<&str>) -> Result<Response, SyncError> {
		let target = self.target();
		let raw = format!("{}/api/stream", target.base_url.trim_end_matches('/'));
		let url = Url::parse(&raw).map_err(|e| SyncError::BadUrl(e.to_string()))?;

		let mut request = self.http.get(url).header("Accept", "text/event-stream");
		if let Some(token) = &target.auth_token {
			request = request.bearer_auth(token);
		}
		if let Some(id) = last_event_id {
			request = request.header("Last-Event-ID", id);
		}

		let response = request.send().await?;
		if !response.status().is_success() {
			return Err(SyncError::Status(response.status()));
		}

		Ok(response)
	}
}
