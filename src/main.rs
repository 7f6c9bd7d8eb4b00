use openclaw_sync::{SyncConfig, SyncOrchestrator};
use std::time::Duration;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let base_url =
		std::env::var("OPENCLAW_BASE_URL").unwrap_or_else(|_| "http://localhost:4477".to_string());
	let auth_token = std::env::var("OPENCLAW_TOKEN").ok();

	let mut config = SyncConfig::new(base_url);
	config.auth_token = auth_token;

	info!("Starting dashboard sync against {}", config.base_url);
	let orchestrator = SyncOrchestrator::new(config);
	orchestrator.set_handler(Some(std::sync::Arc::new(|event| {
		tracing::debug!("Applied live event: {:?}", event);
	})));
	orchestrator.start();

	let mut summary = tokio::time::interval(Duration::from_secs(30));
	summary.tick().await;
	loop {
		tokio::select! {
			_ = summary.tick() => {
				let snapshot = orchestrator.snapshot();
				info!(
					"Mirror: {} ({:?}, cursor {:?})",
					snapshot.summary(),
					orchestrator.stream_state(),
					orchestrator.cursor()
				);
			}
			_ = tokio::signal::ctrl_c() => {
				info!("Shutting down");
				break;
			}
		}
	}

	orchestrator.close();
}
