use std::{fmt, str::FromStr};

use crate::{Error, Result};

/// Position of a query in the backend pipeline.
///
/// Variants are declared in pipeline order, so `Ord` follows the happy path from data
/// collection to a finished ranking.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Stage {
	#[default]
	DataCollecting,
	DataCollectionComplete,
	Training,
	Trained,
	Ranking,
	Ranked,
}
impl Stage {
	pub const ALL: [Stage; 6] = [
		Stage::DataCollecting,
		Stage::DataCollectionComplete,
		Stage::Training,
		Stage::Trained,
		Stage::Ranking,
		Stage::Ranked,
	];

	/// Name used by the backend in `NTFY_STATE_CHANGE` payloads.
	pub fn wire_name(self) -> &'static str {
		match self {
			Self::DataCollecting => "QS_DATACOLL",
			Self::DataCollectionComplete => "QS_DATACOLL_COMPLETE",
			Self::Training => "QS_TRAINING",
			Self::Trained => "QS_TRAINED",
			Self::Ranking => "QS_RANKING",
			Self::Ranked => "QS_RANKED",
		}
	}

	pub fn label(self) -> &'static str {
		match self {
			Self::DataCollecting => "DATA_COLLECTING",
			Self::DataCollectionComplete => "DATA_COLLECTION_COMPLETE",
			Self::Training => "TRAINING",
			Self::Trained => "TRAINED",
			Self::Ranking => "RANKING",
			Self::Ranked => "RANKED",
		}
	}

	pub fn is_terminal(self) -> bool {
		self == Self::Ranked
	}
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

impl FromStr for Stage {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self> {
		let value = raw.trim();

		Self::ALL
			.into_iter()
			.find(|stage| {
				stage.wire_name().eq_ignore_ascii_case(value)
					|| stage.label().eq_ignore_ascii_case(value)
			})
			.ok_or_else(|| Error::UnknownStage { value: raw.to_string() })
	}
}
