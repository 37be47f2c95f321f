use visor_domain::Stage;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Trigger {
	/// A `STATE_CHANGE` notification for this query.
	StageReported(Stage),
	/// The one-shot data collection deadline passed.
	FallbackElapsed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
	BeginTraining,
	BeginRanking,
	FetchFirstPage,
}

/// Transition table for one query.
///
/// Every reported stage overwrites the local one. Each action is guarded by its own "already
/// fired" flag, so duplicated or reordered notifications never repeat a remote call.
#[derive(Clone, Debug)]
pub struct Lifecycle {
	stage: Stage,
	training_fired: bool,
	ranking_fired: bool,
	first_page_fired: bool,
	fallback_armed: bool,
}
impl Lifecycle {
	pub fn new() -> Self {
		Self {
			stage: Stage::DataCollecting,
			training_fired: false,
			ranking_fired: false,
			first_page_fired: false,
			fallback_armed: true,
		}
	}

	pub fn stage(&self) -> Stage {
		self.stage
	}

	pub fn fallback_armed(&self) -> bool {
		self.fallback_armed
	}

	pub fn training_fired(&self) -> bool {
		self.training_fired
	}

	pub fn ranking_fired(&self) -> bool {
		self.ranking_fired
	}

	pub fn apply(&mut self, trigger: Trigger) -> Option<Action> {
		match trigger {
			Trigger::StageReported(stage) => {
				self.stage = stage;

				if stage > Stage::DataCollectionComplete {
					self.fallback_armed = false;
				}

				match stage {
					Stage::DataCollectionComplete => self.fire_training(),
					Stage::Trained if !self.ranking_fired => {
						self.ranking_fired = true;

						Some(Action::BeginRanking)
					},
					Stage::Ranked if !self.first_page_fired => {
						self.first_page_fired = true;

						Some(Action::FetchFirstPage)
					},
					_ => None,
				}
			},
			Trigger::FallbackElapsed => {
				if !self.fallback_armed {
					return None;
				}

				self.fallback_armed = false;

				if self.stage <= Stage::DataCollectionComplete { self.fire_training() } else { None }
			},
		}
	}

	pub fn disarm_fallback(&mut self) {
		self.fallback_armed = false;
	}

	fn fire_training(&mut self) -> Option<Action> {
		self.fallback_armed = false;

		if self.training_fired {
			return None;
		}

		self.training_fired = true;

		Some(Action::BeginTraining)
	}
}
impl Default for Lifecycle {
	fn default() -> Self {
		Self::new()
	}
}
