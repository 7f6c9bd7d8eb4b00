//! Long-lived stream connection and its reconnect state machine.
//!
//! One task owns the transport for its whole lifetime, which is what
//! serializes connect attempts: the loop is either connecting, reading, in
//! backoff, or parked offline, never two of those at once. Events are
//! dispatched in the order received from a single stream; an aborted
//! transport drops its frame parser, so nothing from an aborted read is ever
//! dispatched.
//!
//! The transport is a manual fetch-framed GET rather than a managed stream
//! API so the resumption token and the auth header travel as real request
//! headers.

use crate::api::{ApiClient, EventEnvelope};
use crate::sync::backoff::BackoffScheduler;
use crate::sync::events::EventSink;
use crate::sync::frame::{EventFrameParser, StreamRecord};
use crate::sync::reconcile::Reconciler;
use crate::sync::stats::SyncStats;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, info};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
	Idle,
	Connecting,
	Open,
	Backoff,
	Offline,
}

/// Outcome of one connect-and-read attempt.
enum Attempt {
	/// Organic failure: non-2xx, transport error, or the body ended.
	Failed,
	/// Explicit reconnect request: retry with zero delay.
	Reconnect,
	/// The environment went offline mid-attempt.
	Offline,
	/// The orchestrator closed.
	Halt,
}

pub struct StreamConnection {
	api: Arc<ApiClient>,
	sink: Arc<dyn EventSink>,
	reconciler: Arc<Reconciler>,
	stats: Arc<SyncStats>,
	state: Mutex<StreamState>,
	last_activity: Mutex<Instant>,
	resume_token: Mutex<Option<String>>,
	backoff: Mutex<BackoffScheduler>,
	reconnect: Notify,
	online_tx: watch::Sender<bool>,
	open_tx: watch::Sender<bool>,
}

impl StreamConnection {
	pub fn new(
		api: Arc<ApiClient>,
		sink: Arc<dyn EventSink>,
		reconciler: Arc<Reconciler>,
		stats: Arc<SyncStats>,
	) -> Self {
		Self {
			api,
			sink,
			reconciler,
			stats,
			state: Mutex::new(StreamState::Idle),
			last_activity: Mutex::new(Instant::now()),
			resume_token: Mutex::new(None),
			backoff: Mutex::new(BackoffScheduler::new()),
			reconnect: Notify::new(),
			online_tx: watch::Sender::new(true),
			open_tx: watch::Sender::new(false),
		}
	}

	pub fn state(&self) -> StreamState {
		*self.state.lock().unwrap()
	}

	pub fn is_open(&self) -> bool {
		self.state() == StreamState::Open
	}

	/// Instant of the last received byte.
	pub fn last_activity(&self) -> Instant {
		*self.last_activity.lock().unwrap()
	}

	pub fn resume_token(&self) -> Option<String> {
		self.resume_token.lock().unwrap().clone()
	}

	/// Clear the resumption token; done when the upstream target changes.
	pub fn clear_resume_token(&self) {
		*self.resume_token.lock().unwrap() = None;
	}

	/// Observe whether the stream is `Open`; the fallback poller keys off
	/// this.
	pub fn subscribe_open(&self) -> watch::Receiver<bool> {
		self.open_tx.subscribe()
	}

	/// Explicit reconnect: reset the retry counter and reconnect with zero
	/// delay, aborting any in-flight transport. Requests coalesce, so a
	/// reconnect already in flight is not duplicated.
	pub fn request_reconnect(&self) {
		self.backoff.lock().unwrap().reset();
		self.reconnect.notify_one();
	}

	/// Environment online/offline trigger. Going offline aborts the
	/// transport and parks the loop; coming back online reconnects
	/// immediately with a fresh retry counter.
	pub fn set_online(&self, online: bool) {
		self.online_tx.send_replace(online);
	}

	fn set_state(&self, next: StreamState) {
		*self.state.lock().unwrap() = next;
	}

	fn touch(&self) {
		*self.last_activity.lock().unwrap() = Instant::now();
	}

	/// Drive the connection until the orchestrator closes.
	pub async fn run(self: Arc<Self>, mut closed: watch::Receiver<bool>) {
		let mut online = self.online_tx.subscribe();

		loop {
			if *closed.borrow() {
				break;
			}

			if !*online.borrow() {
				self.set_state(StreamState::Offline);
				self.open_tx.send_replace(false);
				tokio::select! {
					_ = online.changed() => {
						if *online.borrow() {
							info!("Back online, reconnecting immediately");
							self.backoff.lock().unwrap().reset();
						}
						continue;
					}
					_ = closed.changed() => continue,
					_ = self.reconnect.notified() => {
						// Explicit request overrides the parked state; the
						// attempt below fails organically if the network is
						// really gone.
					}
				}
			}

			self.set_state(StreamState::Connecting);
			let outcome = self.connect_once(&mut closed, &mut online).await;
			self.open_tx.send_replace(false);

			match outcome {
				Attempt::Halt => break,
				Attempt::Offline | Attempt::Reconnect => continue,
				Attempt::Failed => {
					self.set_state(StreamState::Backoff);
					let delay = {
						let mut backoff = self.backoff.lock().unwrap();
						let delay = backoff.next_delay();
						debug!(
							"Scheduling reconnect attempt {} in {:?}",
							backoff.retries(),
							delay
						);
						delay
					};
					tokio::select! {
						_ = tokio::time::sleep(delay) => {}
						_ = self.reconnect.notified() => {}
						_ = closed.changed() => {}
						_ = online.changed() => {}
					}
				}
			}
		}

		self.open_tx.send_replace(false);
		self.set_state(StreamState::Idle);
	}

	async fn connect_once(
		&self,
		closed: &mut watch::Receiver<bool>,
		online: &mut watch::Receiver<bool>,
	) -> Attempt {
		let resume = self.resume_token();

		let response = tokio::select! {
			response = self.api.open_stream(resume.as_deref()) => response,
			_ = self.reconnect.notified() => return Attempt::Reconnect,
			_ = closed.changed() => return Attempt::Halt,
			_ = online.changed() => {
				return if *online.borrow() { Attempt::Reconnect } else { Attempt::Offline };
			}
		};

		let response = match response {
			Ok(response) => response,
			Err(e) => {
				debug!("Stream connect failed: {}", e);
				return Attempt::Failed;
			}
		};

		info!("Event stream open");
		self.set_state(StreamState::Open);
		self.backoff.lock().unwrap().reset();
		self.stats.record_stream_open();
		self.touch();
		self.open_tx.send_replace(true);

		// One reconciliation per successful open, off the read loop, to pick
		// up anything that happened while disconnected.
		let reconciler = self.reconciler.clone();
		tokio::spawn(async move { reconciler.reconcile().await });

		let mut parser = EventFrameParser::new();
		let mut body = response.bytes_stream();

		loop {
			tokio::select! {
				chunk = body.next() => match chunk {
					Some(Ok(bytes)) => {
						self.touch();
						for record in parser.feed(&bytes) {
							self.handle_record(record).await;
						}
					}
					Some(Err(e)) => {
						debug!("Stream read error: {}", e);
						return Attempt::Failed;
					}
					None => {
						debug!("Stream ended");
						return Attempt::Failed;
					}
				},
				_ = self.reconnect.notified() => {
					info!("Explicit reconnect requested, aborting transport");
					return Attempt::Reconnect;
				}
				_ = closed.changed() => {
					if *closed.borrow() {
						return Attempt::Halt;
					}
				}
				_ = online.changed() => {
					if !*online.borrow() {
						info!("Offline, aborting transport");
						return Attempt::Offline;
					}
				}
			}
		}
	}

	async fn handle_record(&self, record: StreamRecord) {
		if let Some(id) = &record.id {
			// The id field updates the resumption token unconditionally,
			// even on records that are never dispatched.
			*self.resume_token.lock().unwrap() = Some(id.clone());
		}

		if record.event != "message" {
			// Custom event names are resume-token-only today; their payloads
			// are discarded pending product clarification.
			debug!("Ignoring record with event name {:?}", record.event);
			return;
		}
		if !record.has_data {
			return;
		}

		let envelope: EventEnvelope = match serde_json::from_str(&record.data) {
			Ok(envelope) => envelope,
			Err(e) => {
				self.stats.record_record_dropped();
				debug!("Dropping malformed event payload: {}", e);
				return;
			}
		};

		if envelope.event_type == "stream.reset" {
			self.clear_resume_token();
		}

		self.sink.apply(envelope).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::MirrorState;
	use std::time::Duration;
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;
	use tokio::sync::mpsc;

	struct RecordingSink {
		seen: Mutex<Vec<EventEnvelope>>,
		notify: Notify,
	}

	impl RecordingSink {
		fn new() -> Self {
			Self {
				seen: Mutex::new(Vec::new()),
				notify: Notify::new(),
			}
		}

		async fn wait_for(&self, count: usize) {
			loop {
				if self.seen.lock().unwrap().len() >= count {
					return;
				}
				self.notify.notified().await;
			}
		}
	}

	#[async_trait::async_trait]
	impl EventSink for RecordingSink {
		async fn apply(&self, envelope: EventEnvelope) {
			self.seen.lock().unwrap().push(envelope);
			self.notify.notify_one();
		}
	}

	fn connection(base_url: String, sink: Arc<RecordingSink>) -> Arc<StreamConnection> {
		let api = Arc::new(ApiClient::new(base_url, None, Duration::from_secs(5)));
		// Reconciliation on open points at a dead port; failures are
		// swallowed, which is all these tests need.
		let dead_api = Arc::new(ApiClient::new(
			"http://127.0.0.1:1".to_string(),
			None,
			Duration::from_millis(200),
		));
		let stats = Arc::new(SyncStats::new());
		let reconciler = Arc::new(Reconciler::new(
			dead_api,
			Arc::new(Mutex::new(MirrorState::default())),
			stats.clone(),
		));
		Arc::new(StreamConnection::new(api, sink, reconciler, stats))
	}

	async fn read_head(sock: &mut tokio::net::TcpStream) -> String {
		let mut head = Vec::new();
		let mut buf = [0u8; 2048];
		loop {
			let Ok(n) = sock.read(&mut buf).await else {
				break;
			};
			if n == 0 {
				break;
			}
			head.extend_from_slice(&buf[..n]);
			if head.windows(4).any(|w| w == b"\r\n\r\n") {
				break;
			}
		}
		String::from_utf8_lossy(&head).to_string()
	}

	const STREAM_HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n";

	#[tokio::test]
	async fn dispatches_message_records_and_tracks_resume_token() {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
		let addr = listener.local_addr().expect("addr");
		let (head_tx, mut head_rx) = mpsc::unbounded_channel::<String>();

		tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.expect("accept");
			let _ = head_tx.send(read_head(&mut sock).await);
			let frames = "id: ev-1\ndata: {\"type\":\"topic.upserted\",\"data\":{\"id\":\"t1\"}}\n\n\
						  event: ping\nid: ev-2\n\n\
						  data: {\"type\":\"task.upserted\",\"data\":{\"id\":\"k1\"}}\n\n";
			let _ = sock
				.write_all(format!("{STREAM_HEAD}{frames}").as_bytes())
				.await;
			tokio::time::sleep(Duration::from_secs(30)).await;
		});

		let sink = Arc::new(RecordingSink::new());
		let conn = connection(format!("http://{addr}"), sink.clone());
		let (closed_tx, closed_rx) = watch::channel(false);
		let handle = tokio::spawn(conn.clone().run(closed_rx));

		sink.wait_for(2).await;
		let head = head_rx.recv().await.expect("request head");
		assert!(head.contains("accept: text/event-stream") || head.contains("Accept: text/event-stream"));

		assert_eq!(conn.state(), StreamState::Open);
		assert!(*conn.subscribe_open().borrow());
		// The ping record updated the token even though it was not
		// dispatched.
		assert_eq!(conn.resume_token().as_deref(), Some("ev-2"));
		let seen = sink.seen.lock().unwrap();
		assert_eq!(seen.len(), 2);
		assert_eq!(seen[0].event_type, "topic.upserted");
		assert_eq!(seen[1].event_type, "task.upserted");
		drop(seen);

		closed_tx.send_replace(true);
		let _ = handle.await;
		assert_eq!(conn.state(), StreamState::Idle);
	}

	#[tokio::test]
	async fn non_success_status_backs_off_without_spinning() {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
		let addr = listener.local_addr().expect("addr");
		let (count_tx, mut count_rx) = mpsc::unbounded_channel::<()>();

		tokio::spawn(async move {
			loop {
				let Ok((mut sock, _)) = listener.accept().await else {
					return;
				};
				let _ = count_tx.send(());
				let _ = read_head(&mut sock).await;
				let _ = sock
					.write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
					.await;
			}
		});

		let sink = Arc::new(RecordingSink::new());
		let conn = connection(format!("http://{addr}"), sink);
		let (closed_tx, closed_rx) = watch::channel(false);
		let handle = tokio::spawn(conn.clone().run(closed_rx));

		count_rx.recv().await.expect("first attempt");
		tokio::time::sleep(Duration::from_millis(300)).await;
		// Minimum jittered first delay is 750ms, so no second attempt yet.
		assert!(count_rx.try_recv().is_err());
		assert_eq!(conn.state(), StreamState::Backoff);
		assert!(!*conn.subscribe_open().borrow());

		// The retry does arrive on the backoff schedule.
		tokio::time::timeout(Duration::from_secs(3), count_rx.recv())
			.await
			.expect("second attempt within backoff envelope");

		closed_tx.send_replace(true);
		let _ = handle.await;
	}

	#[tokio::test]
	async fn explicit_reconnect_resumes_with_last_event_id() {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
		let addr = listener.local_addr().expect("addr");
		let (head_tx, mut head_rx) = mpsc::unbounded_channel::<String>();

		tokio::spawn(async move {
			loop {
				let Ok((mut sock, _)) = listener.accept().await else {
					return;
				};
				let _ = head_tx.send(read_head(&mut sock).await);
				let frames = "id: marker-1\ndata: {\"type\":\"noop.event\"}\n\n";
				let _ = sock
					.write_all(format!("{STREAM_HEAD}{frames}").as_bytes())
					.await;
				// Hold the stream open off the accept loop so the next
				// connect is served immediately.
				tokio::spawn(async move {
					let _hold = sock;
					tokio::time::sleep(Duration::from_secs(30)).await;
				});
			}
		});

		let sink = Arc::new(RecordingSink::new());
		let conn = connection(format!("http://{addr}"), sink.clone());
		let (closed_tx, closed_rx) = watch::channel(false);
		let handle = tokio::spawn(conn.clone().run(closed_rx));

		let first_head = head_rx.recv().await.expect("first head");
		assert!(!first_head.to_lowercase().contains("last-event-id"));
		sink.wait_for(1).await;

		conn.request_reconnect();
		let second_head = head_rx.recv().await.expect("second head");
		assert!(
			second_head.to_lowercase().contains("last-event-id: marker-1"),
			"resume token missing from reconnect: {second_head}"
		);

		closed_tx.send_replace(true);
		let _ = handle.await;
	}

	#[tokio::test]
	async fn stream_reset_clears_the_resume_token() {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
		let addr = listener.local_addr().expect("addr");

		tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.expect("accept");
			let _ = read_head(&mut sock).await;
			let frames = "id: pos-9\ndata: {\"type\":\"topic.upserted\",\"data\":{\"id\":\"t\"}}\n\n\
						  data: {\"type\":\"stream.reset\"}\n\n";
			let _ = sock
				.write_all(format!("{STREAM_HEAD}{frames}").as_bytes())
				.await;
			tokio::time::sleep(Duration::from_secs(30)).await;
		});

		let sink = Arc::new(RecordingSink::new());
		let conn = connection(format!("http://{addr}"), sink.clone());
		let (closed_tx, closed_rx) = watch::channel(false);
		let handle = tokio::spawn(conn.clone().run(closed_rx));

		sink.wait_for(2).await;
		assert_eq!(conn.resume_token(), None);

		closed_tx.send_replace(true);
		let _ = handle.await;
	}

	#[tokio::test]
	async fn offline_parks_the_connection_until_back_online() {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
		let addr = listener.local_addr().expect("addr");
		let (count_tx, mut count_rx) = mpsc::unbounded_channel::<()>();

		tokio::spawn(async move {
			loop {
				let Ok((mut sock, _)) = listener.accept().await else {
					return;
				};
				let _ = count_tx.send(());
				let _ = read_head(&mut sock).await;
				let _ = sock.write_all(STREAM_HEAD.as_bytes()).await;
				// Hold the stream open off the accept loop so the next
				// connect is served immediately.
				tokio::spawn(async move {
					let _hold = sock;
					tokio::time::sleep(Duration::from_secs(30)).await;
				});
			}
		});

		let sink = Arc::new(RecordingSink::new());
		let conn = connection(format!("http://{addr}"), sink);
		let (closed_tx, closed_rx) = watch::channel(false);
		let handle = tokio::spawn(conn.clone().run(closed_rx));

		count_rx.recv().await.expect("initial connect");
		conn.set_online(false);
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(conn.state(), StreamState::Offline);
		assert!(count_rx.try_recv().is_err());

		conn.set_online(true);
		tokio::time::timeout(Duration::from_secs(2), count_rx.recv())
			.await
			.expect("immediate reconnect once back online");

		closed_tx.send_replace(true);
		let _ = handle.await;
	}
}
