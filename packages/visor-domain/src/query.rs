use std::fmt;

use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::form_urlencoded;

use crate::{Error, Result};

pub const RESULTS_PATH: &str = "/results";

/// Opaque query identifier assigned by the query service.
///
/// The service has handed out both strings and integers over time; both deserialize into the
/// same textual form.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct QueryId(String);
impl QueryId {
	pub fn new(raw: impl Into<String>) -> Self {
		Self(raw.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for QueryId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Serialize for QueryId {
	fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for QueryId {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum RawId {
			Text(String),
			Unsigned(u64),
			Signed(i64),
		}

		Ok(match RawId::deserialize(deserializer)? {
			RawId::Text(text) => Self(text),
			RawId::Unsigned(number) => Self(number.to_string()),
			RawId::Signed(number) => Self(number.to_string()),
		})
	}
}

/// Free-text query as typed by the user, trimmed and non-empty.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryText(String);
impl QueryText {
	pub fn new(raw: &str) -> Result<Self> {
		let text = raw.trim();

		if text.is_empty() {
			return Err(Error::InvalidQueryText {
				message: "query text must be non-empty.".to_string(),
			});
		}

		Ok(Self(text.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// URL-safe base64 form carried by the result route.
	pub fn encode(&self) -> String {
		URL_SAFE_NO_PAD.encode(self.0.as_bytes())
	}

	pub fn decode(encoded: &str) -> Result<Self> {
		let trimmed = encoded.trim().trim_end_matches('=');
		let bytes = URL_SAFE_NO_PAD
			.decode(trimmed)
			.or_else(|_| STANDARD_NO_PAD.decode(trimmed))
			.map_err(|err| Error::InvalidQueryText {
				message: format!("query text is not valid base64: {err}."),
			})?;
		let text = String::from_utf8(bytes).map_err(|_| Error::InvalidQueryText {
			message: "decoded query text is not valid UTF-8.".to_string(),
		})?;

		Self::new(&text)
	}
}

impl fmt::Display for QueryText {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Navigable location of a results view: `/results?qid=<id>&q=<base64url text>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResultRoute {
	pub query_id: QueryId,
	pub text: QueryText,
}
impl ResultRoute {
	pub fn new(query_id: QueryId, text: QueryText) -> Self {
		Self { query_id, text }
	}

	pub fn to_path(&self) -> String {
		let query = form_urlencoded::Serializer::new(String::new())
			.append_pair("qid", self.query_id.as_str())
			.append_pair("q", &self.text.encode())
			.finish();

		format!("{RESULTS_PATH}?{query}")
	}

	pub fn parse(path: &str) -> Result<Self> {
		let (base, query) = path.split_once('?').ok_or_else(|| Error::InvalidRoute {
			message: "route has no query string.".to_string(),
		})?;

		if base != RESULTS_PATH {
			return Err(Error::InvalidRoute { message: format!("unexpected path {base:?}.") });
		}

		let mut query_id = None;
		let mut text = None;

		for (key, value) in form_urlencoded::parse(query.as_bytes()) {
			match key.as_ref() {
				"qid" if !value.is_empty() => query_id = Some(QueryId::new(value.into_owned())),
				"q" => text = Some(QueryText::decode(&value)?),
				_ => {},
			}
		}

		let query_id = query_id
			.ok_or_else(|| Error::InvalidRoute { message: "missing qid parameter.".to_string() })?;
		let text =
			text.ok_or_else(|| Error::InvalidRoute { message: "missing q parameter.".to_string() })?;

		Ok(Self { query_id, text })
	}
}
