use std::sync::Arc;

use visor_domain::{PrecisionStats, QueryId, RankingItem, ResultRoute, Stage};

/// Snapshot of one session, published after every state change.
#[derive(Clone, Debug)]
pub struct SessionView {
	pub query_id: QueryId,
	pub route: ResultRoute,
	pub stage: Stage,
	/// Last image reported by `IMAGE_PROCESSED`. Informational only.
	pub last_processed: Option<String>,
	pub collection_finished: bool,
	pub training_requested: bool,
	pub ranking_requested: bool,
	/// Shared between snapshots until the list changes.
	pub items: Arc<[RankingItem]>,
	pub current_page: u32,
	pub page_count: u32,
	pub visited: u64,
	pub precision: Option<PrecisionStats>,
	pub pending_updates: usize,
	pub loading_page: bool,
	pub last_error: Option<String>,
	/// Commands the session has taken off its queue.
	pub commands_handled: u64,
	pub closed: bool,
}
impl SessionView {
	pub fn new(route: ResultRoute) -> Self {
		Self {
			query_id: route.query_id.clone(),
			route,
			stage: Stage::DataCollecting,
			last_processed: None,
			collection_finished: false,
			training_requested: false,
			ranking_requested: false,
			items: Vec::new().into(),
			current_page: 0,
			page_count: 0,
			visited: 0,
			precision: None,
			pending_updates: 0,
			loading_page: false,
			last_error: None,
			commands_handled: 0,
			closed: false,
		}
	}

	pub fn is_ranked(&self) -> bool {
		self.stage.is_terminal()
	}

	pub fn has_more_pages(&self) -> bool {
		self.current_page == 0 || self.current_page < self.page_count
	}

	/// Items with their list index, after `filters`.
	pub fn visible_items<'a>(
		&'a self,
		filters: &'a ViewFilters,
	) -> impl Iterator<Item = (usize, &'a RankingItem)> + 'a {
		self.items
			.iter()
			.enumerate()
			.filter(|(_, item)| !(filters.hide_false_negatives && item.false_negative))
	}
}

/// Presentation filters. Owned by whoever renders the view, one per session.
#[derive(Clone, Copy, Debug, Default)]
pub struct ViewFilters {
	pub hide_false_negatives: bool,
}
