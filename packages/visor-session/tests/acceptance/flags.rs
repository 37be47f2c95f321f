use std::{sync::Arc, time::Duration};

use visor_client::QueryApi;
use visor_domain::{RankingItem, Stage};
use visor_testkit::{SpyQueryApi, sample_items};

#[tokio::test(start_paused = true)]
async fn confirmed_flag_keeps_value_and_refreshes_precision() {
	let harness = super::start(super::spy_with_pages(vec![sample_items(1, 4)])).await;

	harness.report(Stage::Ranked);
	super::settle().await;
	harness.handle.mark_false_negative(2).await.expect("Failed to send flag command.");
	super::settle().await;

	let view = harness.view();
	let precision = view.precision.expect("Expected precision stats.");

	assert!(view.items[2].false_negative);
	assert_eq!(harness.spy.flag(&view.items[2].path), Some(true));
	assert_eq!(view.pending_updates, 0);
	assert_eq!(precision.precision_at_100, Some(0.01));
	assert!(view.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn pending_counter_covers_the_refresh() {
	let spy = Arc::new(
		SpyQueryApi::new("q-7")
			.with_pages(vec![sample_items(1, 4)])
			.with_page_delay(Duration::from_secs(1)),
	);
	let harness = super::start(spy).await;

	harness.report(Stage::Ranked);
	tokio::time::sleep(Duration::from_secs(2)).await;
	harness.handle.mark_false_negative(1).await.expect("Failed to send flag command.");
	super::settle().await;

	let view = harness.view();

	assert_eq!(view.pending_updates, 1);
	assert!(view.items[1].false_negative);

	tokio::time::sleep(Duration::from_secs(2)).await;

	assert_eq!(harness.view().pending_updates, 0);
	assert!(harness.view().items[1].false_negative);
}

#[tokio::test(start_paused = true)]
async fn rejected_flag_rolls_back() {
	let harness = super::start(super::spy_with_pages(vec![sample_items(1, 4)])).await;

	harness.report(Stage::Ranked);
	super::settle().await;
	harness.spy.fail_flags(true);
	harness.handle.mark_false_negative(0).await.expect("Failed to send flag command.");
	super::settle().await;

	let view = harness.view();

	assert!(!view.items[0].false_negative);
	assert_eq!(view.pending_updates, 0);
	assert!(view.last_error.is_some());
	assert_eq!(harness.spy.flag_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_flag_sends_nothing() {
	let harness = super::start(super::spy_with_pages(vec![sample_items(1, 2)])).await;

	harness.report(Stage::Ranked);
	super::settle().await;
	harness.handle.mark_false_negative(99).await.expect("Failed to send flag command.");
	super::settle().await;

	assert_eq!(harness.spy.flag_calls(), 0);
	assert_eq!(harness.view().pending_updates, 0);
}

#[tokio::test(start_paused = true)]
async fn tail_distractors_are_flagged_up_to_first_flagged_item() {
	let items = vec![
		RankingItem::new("a.jpg", 0.9).distractor(),
		RankingItem::new("b.jpg", 0.8).distractor(),
		RankingItem::new("c.jpg", 0.7).distractor(),
		RankingItem::new("d.jpg", 0.6),
		RankingItem::new("e.jpg", 0.5).distractor(),
	];
	let spy = super::spy_with_pages(vec![items]);

	spy.set_false_negative(spy.query_id(), "b.jpg", true).await.expect("Failed to seed flag.");

	let harness = super::start(spy).await;

	harness.report(Stage::Ranked);
	super::settle().await;
	harness.handle.mark_tail_distractors().await.expect("Failed to send command.");
	super::settle().await;

	let flagged: Vec<bool> = harness.view().items.iter().map(|item| item.false_negative).collect();

	assert_eq!(flagged, vec![false, true, true, false, true]);
	assert_eq!(harness.spy.flag("a.jpg"), None);
	assert_eq!(harness.spy.flag("c.jpg"), Some(true));
	assert_eq!(harness.spy.flag("e.jpg"), Some(true));
	assert_eq!(harness.spy.flag_calls(), 3);
	assert_eq!(harness.view().pending_updates, 0);
}

#[tokio::test(start_paused = true)]
async fn sync_waits_for_slow_flag_updates() {
	let spy = Arc::new(
		SpyQueryApi::new("q-7")
			.with_pages(vec![sample_items(1, 4)])
			.with_page_delay(Duration::from_secs(3)),
	);
	let harness = super::start(spy).await;

	harness.report(Stage::Ranked);
	harness.handle.wait_until(|view| view.current_page == 1).await.expect("Session closed early.");
	harness.handle.mark_false_negative(3).await.expect("Failed to send flag command.");

	let view = harness.handle.sync().await.expect("Session closed early.");

	assert_eq!(view.commands_handled, 1);
	assert_eq!(view.pending_updates, 0);
	assert!(view.items[3].false_negative);
	assert!(view.precision.is_some());
}
