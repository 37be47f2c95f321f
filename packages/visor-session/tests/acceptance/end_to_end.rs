use std::{sync::Arc, time::Duration};

use tokio::time;

use visor_client::{HttpQueryApi, NotificationChannel, QueryApi};
use visor_domain::{QueryText, Stage};
use visor_session::{SessionSettings, start_session};
use visor_testkit::{Endpoint, FakeBackend, sample_items};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn query_runs_to_ranked_pages_over_http() {
	let backend = FakeBackend::start(vec![sample_items(1, 4), sample_items(2, 4)])
		.await
		.expect("Failed to start fake backend.");
	let cfg = backend.api_config();
	let api: Arc<dyn QueryApi> =
		Arc::new(HttpQueryApi::new(&cfg).expect("Failed to build API client."));
	let notifications = NotificationChannel::new(&cfg)
		.expect("Failed to build notification channel.")
		.connect()
		.await
		.expect("Failed to connect notification channel.");
	let settings = SessionSettings { fallback_train: Duration::from_secs(60), command_buffer: 8 };
	let text = QueryText::new("harbor at night").expect("Expected valid query text.");
	let handle =
		start_session(api, notifications, text, settings).await.expect("Failed to start session.");
	let query_id = handle.query_id().clone();

	assert_eq!(backend.query_text(&query_id).as_deref(), Some("harbor at night"));

	backend.complete_collection(&query_id);

	let view = time::timeout(WAIT, handle.wait_until(|view| view.current_page == 1))
		.await
		.expect("Timed out waiting for the first page.")
		.expect("Session closed early.");

	assert_eq!(view.stage, Stage::Ranked);
	assert_eq!(view.items.len(), 4);
	assert!(view.collection_finished);
	assert_eq!(view.last_processed.as_deref(), Some("trs/1.jpg"));
	assert_eq!(backend.calls(Endpoint::Train), 1);
	assert_eq!(backend.calls(Endpoint::Rank), 1);

	handle.load_more().await.expect("Failed to request page.");

	let view = time::timeout(WAIT, handle.wait_until(|view| view.current_page == 2))
		.await
		.expect("Timed out waiting for the second page.")
		.expect("Session closed early.");

	assert_eq!(view.items.len(), 8);

	let flagged_path = view.items[5].path.clone();

	handle.mark_false_negative(5).await.expect("Failed to send flag command.");

	let view = time::timeout(
		WAIT,
		handle.wait_until(|view| view.items[5].false_negative && view.pending_updates == 0),
	)
	.await
	.expect("Timed out waiting for the flag update.")
	.expect("Session closed early.");

	assert_eq!(backend.flag(&query_id, &flagged_path), Some(true));
	assert_eq!(view.precision.and_then(|stats| stats.precision_at_100), Some(0.01));

	let view = handle.close_and_release(WAIT).await.expect("Failed to close session.");

	assert!(view.closed);
	assert!(backend.is_released(&query_id));
	assert_eq!(backend.calls(Endpoint::Free), 1);

	backend.shutdown().await;
}
