use std::{sync::Arc, time::Duration};

use futures::channel::mpsc;

use visor_client::QueryApi;
use visor_domain::{NotificationKind, QueryText, Stage};
use visor_session::{Error, SessionSettings, start_session};
use visor_testkit::{SpyQueryApi, sample_items};

#[tokio::test(start_paused = true)]
async fn collection_complete_starts_training_once() {
	let harness = super::start(super::spy_with_pages(Vec::new())).await;

	harness.report(Stage::DataCollectionComplete);
	super::settle().await;

	assert_eq!(harness.spy.trainings(), 1);
	assert!(harness.view().training_requested);

	tokio::time::sleep(super::FALLBACK * 2).await;
	harness.report(Stage::DataCollectionComplete);
	super::settle().await;

	assert_eq!(harness.spy.trainings(), 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_trains_once_and_absorbs_late_event() {
	let harness = super::start(super::spy_with_pages(Vec::new())).await;

	harness.report(Stage::DataCollecting);
	tokio::time::sleep(super::FALLBACK - Duration::from_secs(1)).await;

	assert_eq!(harness.spy.trainings(), 0);

	tokio::time::sleep(Duration::from_secs(2)).await;

	assert_eq!(harness.spy.trainings(), 1);

	harness.report(Stage::DataCollectionComplete);
	super::settle().await;

	assert_eq!(harness.spy.trainings(), 1);
	assert_eq!(harness.view().stage, Stage::DataCollectionComplete);
}

#[tokio::test(start_paused = true)]
async fn fallback_is_disarmed_once_training_is_under_way() {
	let harness = super::start(super::spy_with_pages(Vec::new())).await;

	harness.report(Stage::Training);
	tokio::time::sleep(super::FALLBACK * 2).await;

	assert_eq!(harness.spy.trainings(), 0);
	assert_eq!(harness.view().stage, Stage::Training);
}

#[tokio::test(start_paused = true)]
async fn closed_channel_still_trains_on_fallback() {
	let harness = super::start(super::spy_with_pages(Vec::new())).await;

	harness.disconnect();
	tokio::time::sleep(super::FALLBACK + Duration::from_secs(1)).await;

	assert_eq!(harness.spy.trainings(), 1);
}

#[tokio::test(start_paused = true)]
async fn pipeline_notifications_drive_each_call_once() {
	let harness = super::start(super::spy_with_pages(vec![sample_items(1, 2)])).await;

	for stage in [
		Stage::DataCollectionComplete,
		Stage::Training,
		Stage::Trained,
		Stage::Ranking,
		Stage::Ranked,
		Stage::Ranked,
		Stage::Trained,
	] {
		harness.report(stage);
	}

	harness.report(Stage::DataCollectionComplete);
	super::settle().await;

	assert_eq!(harness.spy.starts(), 1);
	assert_eq!(harness.spy.submits(), 1);
	assert_eq!(harness.spy.submitted_text().as_deref(), Some("red bicycle"));
	assert_eq!(harness.spy.trainings(), 1);
	assert_eq!(harness.spy.rankings(), 1);
	assert_eq!(harness.spy.fetched_pages(), vec![1]);

	let view = harness.view();

	assert!(view.ranking_requested);
	assert_eq!(view.items.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn foreign_notifications_never_touch_the_session() {
	let harness = super::start(super::spy_with_pages(vec![sample_items(1, 2)])).await;

	harness.send(super::foreign(Stage::DataCollectionComplete));
	harness.send(super::foreign(Stage::Trained));
	harness.send(super::foreign(Stage::Ranked));
	super::settle().await;

	assert_eq!(harness.spy.trainings(), 0);
	assert_eq!(harness.spy.rankings(), 0);
	assert!(harness.spy.fetched_pages().is_empty());
	assert_eq!(harness.view().stage, Stage::DataCollecting);
}

#[tokio::test(start_paused = true)]
async fn progress_and_error_events_only_update_the_view() {
	let harness = super::start(super::spy_with_pages(Vec::new())).await;

	harness.report_kind(NotificationKind::ImageProcessed("trs/004.jpg".to_string()));
	harness.report_kind(NotificationKind::AllImagesProcessed);
	harness.report_kind(NotificationKind::Error("feature extractor crashed".to_string()));
	super::settle().await;

	let view = harness.view();

	assert_eq!(view.last_processed.as_deref(), Some("trs/004.jpg"));
	assert!(view.collection_finished);
	assert_eq!(view.last_error.as_deref(), Some("feature extractor crashed"));
	assert_eq!(view.stage, Stage::DataCollecting);
	assert_eq!(harness.spy.trainings(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_training_is_reported_and_not_retried() {
	let spy = super::spy_with_pages(Vec::new());

	spy.fail_training(true);

	let harness = super::start(spy).await;

	harness.report(Stage::DataCollectionComplete);
	super::settle().await;

	assert!(harness.view().last_error.is_some());

	tokio::time::sleep(super::FALLBACK * 2).await;

	assert_eq!(harness.spy.trainings(), 1);
	assert_eq!(harness.view().stage, Stage::DataCollectionComplete);
}

#[tokio::test(start_paused = true)]
async fn close_releases_once_even_when_release_fails() {
	let spy = super::spy_with_pages(Vec::new());

	spy.fail_release(true);

	let harness = super::start(spy.clone()).await;
	let view = harness.handle.close().await.expect("Failed to close session.");

	assert!(view.closed);

	super::settle().await;

	assert_eq!(spy.releases(), 1);

	tokio::time::sleep(super::FALLBACK * 2).await;

	assert_eq!(spy.releases(), 1);
	assert_eq!(spy.trainings(), 0);
}

#[tokio::test(start_paused = true)]
async fn close_returns_while_release_hangs() {
	let spy = super::spy_with_pages(Vec::new());

	spy.hang_release(true);

	let harness = super::start(spy.clone()).await;
	let mut updates = harness.handle.subscribe();
	let view = tokio::time::timeout(Duration::from_secs(1), harness.handle.close())
		.await
		.expect("Close waited on the release call.")
		.expect("Failed to close session.");

	assert!(view.closed);
	assert!(updates.borrow_and_update().closed);

	super::settle().await;

	assert_eq!(spy.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn bounded_close_gives_up_on_a_hanging_release() {
	let spy = super::spy_with_pages(Vec::new());

	spy.hang_release(true);

	let harness = super::start(spy.clone()).await;
	let view = tokio::time::timeout(
		Duration::from_secs(10),
		harness.handle.close_and_release(Duration::from_secs(2)),
	)
	.await
	.expect("Bounded close overran its limit.")
	.expect("Failed to close session.");

	assert!(view.closed);
	assert_eq!(spy.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn bounded_close_waits_for_a_quick_release() {
	let spy = super::spy_with_pages(Vec::new());
	let harness = super::start(spy.clone()).await;
	let view = harness
		.handle
		.close_and_release(Duration::from_secs(2))
		.await
		.expect("Failed to close session.");

	assert!(view.closed);
	assert_eq!(spy.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_releases_the_query() {
	let spy = super::spy_with_pages(Vec::new());

	drop(super::start(spy.clone()).await);
	super::settle().await;

	assert_eq!(spy.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_submission_releases_the_query() {
	let spy = Arc::new(SpyQueryApi::new("q-9"));

	spy.fail_submit(true);

	let (_events, notifications) = mpsc::unbounded();
	let api: Arc<dyn QueryApi> = spy.clone();
	let text = QueryText::new("lighthouse").expect("Expected valid query text.");
	let err = match start_session(api, notifications, text, SessionSettings::default()).await {
		Ok(_) => panic!("Expected submission failure."),
		Err(err) => err,
	};

	assert!(matches!(err, Error::Client(_)), "Unexpected error: {err}");

	super::settle().await;

	assert_eq!(spy.starts(), 1);
	assert_eq!(spy.releases(), 1);
}
