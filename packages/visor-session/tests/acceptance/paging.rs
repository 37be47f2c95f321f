use std::{sync::Arc, time::Duration};

use visor_domain::{NotificationKind, Stage};
use visor_session::Error;
use visor_testkit::{SpyQueryApi, sample_items};

#[tokio::test(start_paused = true)]
async fn three_pages_load_in_order_then_stop() {
	let pages = vec![sample_items(1, 3), sample_items(2, 3), sample_items(3, 2)];
	let expected: Vec<String> = pages.iter().flatten().map(|item| item.path.clone()).collect();
	let harness = super::start(super::spy_with_pages(pages)).await;

	harness.report(Stage::Ranked);
	super::settle().await;

	assert_eq!(harness.view().items.len(), 3);

	for expected_len in [6, 8] {
		harness.handle.load_more().await.expect("Failed to request page.");
		super::settle().await;

		assert_eq!(harness.view().items.len(), expected_len);
	}

	harness.handle.load_more().await.expect("Failed to request page.");
	super::settle().await;

	let view = harness.view();
	let paths: Vec<String> = view.items.iter().map(|item| item.path.clone()).collect();

	assert_eq!(paths, expected);
	assert_eq!((view.current_page, view.page_count), (3, 3));
	assert!(!view.has_more_pages());
	assert_eq!(harness.spy.fetched_pages(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn unchanged_items_are_shared_between_snapshots() {
	let harness = super::start(super::spy_with_pages(vec![sample_items(1, 3)])).await;

	harness.report(Stage::Ranked);
	super::settle().await;

	let before = harness.view();

	harness.report_kind(NotificationKind::Error("slow disk".to_string()));
	super::settle().await;

	let after = harness.view();

	assert_eq!(after.last_error.as_deref(), Some("slow disk"));
	assert!(Arc::ptr_eq(&before.items, &after.items));

	harness.handle.mark_false_negative(0).await.expect("Failed to send flag command.");
	super::settle().await;

	let flagged = harness.view();

	assert!(!Arc::ptr_eq(&after.items, &flagged.items));
	assert!(flagged.items[0].false_negative);
}

#[tokio::test(start_paused = true)]
async fn load_more_during_fetch_is_discarded() {
	let spy = Arc::new(
		SpyQueryApi::new("q-7")
			.with_pages(vec![sample_items(1, 3), sample_items(2, 3)])
			.with_page_delay(Duration::from_secs(1)),
	);
	let harness = super::start(spy).await;

	harness.report(Stage::Ranked);
	super::settle().await;

	assert!(harness.view().loading_page);

	harness.handle.load_more().await.expect("Failed to request page.");
	super::settle().await;

	assert_eq!(harness.spy.fetched_pages(), vec![1]);

	tokio::time::sleep(Duration::from_secs(2)).await;

	assert_eq!(harness.view().items.len(), 3);
	assert!(!harness.view().loading_page);

	harness.handle.load_more().await.expect("Failed to request page.");
	tokio::time::sleep(Duration::from_secs(2)).await;

	assert_eq!(harness.spy.fetched_pages(), vec![1, 2]);
	assert_eq!(harness.view().items.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn load_more_before_ranking_is_refused() {
	let harness = super::start(super::spy_with_pages(vec![sample_items(1, 3)])).await;

	harness.report(Stage::Trained);
	super::settle().await;

	let err = harness.handle.load_more().await.expect_err("Expected refusal before ranking.");

	assert!(matches!(err, Error::NotRanked { .. }), "Unexpected error: {err}");
	assert!(harness.spy.fetched_pages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_page_is_retried_by_next_load_more() {
	let spy = super::spy_with_pages(vec![sample_items(1, 4), sample_items(2, 4)]);

	spy.fail_pages(true);

	let harness = super::start(spy).await;

	harness.report(Stage::Ranked);
	super::settle().await;

	let view = harness.view();

	assert!(view.last_error.is_some());
	assert_eq!(view.current_page, 0);
	assert!(view.items.is_empty());

	harness.spy.fail_pages(false);
	harness.handle.load_more().await.expect("Failed to request page.");
	super::settle().await;

	assert_eq!(harness.spy.fetched_pages(), vec![1, 1]);
	assert_eq!(harness.view().items.len(), 4);
	assert_eq!(harness.view().visited, 8);
}
