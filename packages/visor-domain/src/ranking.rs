use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RankingItem {
	pub path: String,
	pub score: f32,
	/// User-asserted false negative. The backend sends `0`/`1`.
	#[serde(rename = "fn", default, deserialize_with = "flag")]
	pub false_negative: bool,
	#[serde(default, deserialize_with = "flag")]
	pub is_distractor: bool,
}
impl RankingItem {
	pub fn new(path: impl Into<String>, score: f32) -> Self {
		Self { path: path.into(), score, false_negative: false, is_distractor: false }
	}

	pub fn distractor(mut self) -> Self {
		self.is_distractor = true;

		self
	}
}

/// One page of a ranked list as returned by `GET /api/query/{qid}/ranking?page=N`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RankingPage {
	#[serde(rename = "rlist", default)]
	pub items: Vec<RankingItem>,
	pub page: u32,
	pub page_count: u32,
	#[serde(default)]
	pub visited: u64,
	#[serde(default)]
	pub prec: Vec<f32>,
	#[serde(default)]
	pub prec_distr_ono: Vec<f32>,
}
impl RankingPage {
	pub fn precision(&self) -> PrecisionStats {
		PrecisionStats {
			precision_at_50: self.prec.get(49).copied(),
			precision_at_100: self.prec.get(99).copied(),
			distractor_precision_at_100: self.prec_distr_ono.get(99).copied(),
			visited: self.visited,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PrecisionStats {
	pub precision_at_50: Option<f32>,
	pub precision_at_100: Option<f32>,
	pub distractor_precision_at_100: Option<f32>,
	pub visited: u64,
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum RawFlag {
		Bool(bool),
		Int(i64),
		Null(()),
	}

	Ok(match RawFlag::deserialize(deserializer)? {
		RawFlag::Bool(value) => value,
		RawFlag::Int(value) => value != 0,
		RawFlag::Null(()) => false,
	})
}
