use visor_client::QueryApi;
use visor_domain::{PrecisionStats, QueryId, RankingItem, RankingPage};

/// Count of flag updates still waiting on the service. Never goes below zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PendingCounter(usize);
impl PendingCounter {
	pub fn get(self) -> usize {
		self.0
	}

	pub fn increment(&mut self) {
		self.0 = self.0.saturating_add(1);
	}

	pub fn decrement(&mut self) {
		self.0 = self.0.saturating_sub(1);
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadMore {
	Appended { page: u32, added: usize },
	/// Every page the service reported has been loaded.
	Exhausted,
	/// Another fetch is outstanding; this request was discarded.
	InFlight,
}

/// Inverse of an optimistic flag update.
#[derive(Clone, Debug, PartialEq)]
pub struct FlagPatch {
	pub index: usize,
	pub path: String,
	pub previous: bool,
}

#[derive(Debug)]
pub enum FlagOutcome {
	Confirmed { precision: Option<PrecisionStats> },
	Failed(visor_client::Error),
}

#[derive(Debug)]
pub struct FlagCompletion {
	pub patch: FlagPatch,
	pub outcome: FlagOutcome,
}

/// Locally accumulated ranked list and its page cursor.
///
/// `current_page == 0` means nothing is loaded and `page_count == 0` means the total is
/// unknown. Pages are only ever appended.
#[derive(Clone, Debug, Default)]
pub struct RankingPager {
	items: Vec<RankingItem>,
	revision: u64,
	current_page: u32,
	page_count: u32,
	visited: u64,
	precision: Option<PrecisionStats>,
	in_flight: bool,
}
impl RankingPager {
	pub fn items(&self) -> &[RankingItem] {
		&self.items
	}

	/// Bumped whenever `items` changes.
	pub fn revision(&self) -> u64 {
		self.revision
	}

	pub fn current_page(&self) -> u32 {
		self.current_page
	}

	pub fn page_count(&self) -> u32 {
		self.page_count
	}

	pub fn visited(&self) -> u64 {
		self.visited
	}

	pub fn precision(&self) -> Option<PrecisionStats> {
		self.precision
	}

	pub fn is_loading(&self) -> bool {
		self.in_flight
	}

	pub fn next_page(&self) -> Option<u32> {
		if self.in_flight {
			return None;
		}
		if self.current_page == 0 {
			return Some(1);
		}
		if self.current_page >= self.page_count {
			return None;
		}

		Some(self.current_page + 1)
	}

	/// Claims the next page for fetching, or says why nothing should be fetched.
	pub fn begin_fetch(&mut self) -> Result<u32, LoadMore> {
		if self.in_flight {
			return Err(LoadMore::InFlight);
		}

		let page = self.next_page().ok_or(LoadMore::Exhausted)?;

		self.in_flight = true;

		Ok(page)
	}

	/// Appends the reply to a fetch of page `requested` and returns how many items were added.
	///
	/// The cursor moves to the larger of `requested` and the page number the service reports.
	pub fn complete_fetch(&mut self, requested: u32, page: RankingPage) -> usize {
		self.in_flight = false;

		let number = page.page.max(requested);

		if self.current_page != 0 && number <= self.current_page {
			tracing::warn!(
				page = number,
				current_page = self.current_page,
				"Dropping ranking page that was already loaded."
			);

			return 0;
		}
		if page.page != number {
			tracing::warn!(requested, reported = page.page, "Service renumbered a ranking page.");
		}

		let added = page.items.len();

		self.precision = Some(page.precision());
		self.visited = page.visited;
		self.current_page = number;
		self.page_count = page.page_count;
		self.items.extend(page.items);
		self.revision += 1;

		added
	}

	pub fn abort_fetch(&mut self) {
		self.in_flight = false;
	}

	/// Optimistically sets `fn` on the item at `index`.
	pub fn mark_false_negative(&mut self, index: usize) -> Option<FlagPatch> {
		let item = self.items.get_mut(index)?;
		let patch = FlagPatch { index, path: item.path.clone(), previous: item.false_negative };

		item.false_negative = true;
		self.revision += 1;

		Some(patch)
	}

	pub fn revert(&mut self, patch: &FlagPatch) {
		if let Some(item) = self.items.get_mut(patch.index)
			&& item.path == patch.path
		{
			item.false_negative = patch.previous;
			self.revision += 1;
		}
	}

	/// Distractor indices from the tail up to the first item already flagged, tail first.
	pub fn tail_distractor_indices(&self) -> Vec<usize> {
		let mut indices = Vec::new();

		for (index, item) in self.items.iter().enumerate().rev() {
			if item.false_negative {
				break;
			}
			if item.is_distractor {
				indices.push(index);
			}
		}

		indices
	}

	/// Applies the result of [`push_flag`], rolling back on failure.
	pub fn settle(
		&mut self,
		completion: FlagCompletion,
		pending: &mut PendingCounter,
	) -> visor_client::Result<()> {
		pending.decrement();

		match completion.outcome {
			FlagOutcome::Confirmed { precision } => {
				if let Some(precision) = precision {
					self.precision = Some(precision);
					self.visited = precision.visited;
				}

				Ok(())
			},
			FlagOutcome::Failed(err) => {
				tracing::warn!(
					error = %err,
					path = %completion.patch.path,
					"False negative update failed. Rolling back."
				);

				self.revert(&completion.patch);

				Err(err)
			},
		}
	}
}

/// Sends one flag update and, when accepted, reads fresh precision from ranking page 1.
pub async fn push_flag(api: &dyn QueryApi, query_id: &QueryId, patch: FlagPatch) -> FlagCompletion {
	let outcome = match api.set_false_negative(query_id, &patch.path, true).await {
		Ok(()) => match api.fetch_ranking_page(query_id, 1).await {
			Ok(page) => FlagOutcome::Confirmed { precision: Some(page.precision()) },
			Err(err) => {
				tracing::warn!(error = %err, query_id = %query_id, "Precision refresh failed.");

				FlagOutcome::Confirmed { precision: None }
			},
		},
		Err(err) => FlagOutcome::Failed(err),
	};

	FlagCompletion { patch, outcome }
}
