use std::{future::Future, pin::Pin, time::Duration};

use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};
use visor_domain::{QueryId, QueryText, RankingPage};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle operations of the remote query service.
///
/// Each call issues exactly one request and keeps no state between calls. Callers own the
/// "at most once" rules for `submit_text`, `begin_training` and `begin_ranking`.
pub trait QueryApi
where
	Self: Send + Sync,
{
	fn start(&self) -> BoxFuture<'_, Result<QueryId>>;

	fn submit_text<'a>(
		&'a self,
		query_id: &'a QueryId,
		text: &'a QueryText,
	) -> BoxFuture<'a, Result<()>>;

	fn begin_training<'a>(&'a self, query_id: &'a QueryId) -> BoxFuture<'a, Result<()>>;

	fn begin_ranking<'a>(&'a self, query_id: &'a QueryId) -> BoxFuture<'a, Result<()>>;

	fn fetch_ranking_page<'a>(
		&'a self,
		query_id: &'a QueryId,
		page: u32,
	) -> BoxFuture<'a, Result<RankingPage>>;

	fn release<'a>(&'a self, query_id: &'a QueryId) -> BoxFuture<'a, Result<()>>;

	fn set_false_negative<'a>(
		&'a self,
		query_id: &'a QueryId,
		path: &'a str,
		value: bool,
	) -> BoxFuture<'a, Result<()>>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Call {
	Start,
	AddTrs,
	Train,
	Rank,
	Ranking,
	Free,
	FalseNegative,
}
impl Call {
	fn label(self) -> &'static str {
		match self {
			Self::Start => "start_query",
			Self::AddTrs => "add_trs",
			Self::Train => "train",
			Self::Rank => "rank",
			Self::Ranking => "ranking",
			Self::Free => "free",
			Self::FalseNegative => "fns",
		}
	}

	// Any refusal of these leaves the query stuck, so it is reported as unavailability.
	fn is_lifecycle(self) -> bool {
		matches!(self, Self::Start | Self::Train | Self::Rank)
	}

	fn expects_payload(self) -> bool {
		matches!(self, Self::Start | Self::Ranking)
	}
}

#[derive(Deserialize)]
struct StartReply {
	query_id: QueryId,
}

#[derive(Deserialize)]
struct RankingReply {
	ranking: RankingPage,
}

/// `QueryApi` over the service's JSON endpoints.
#[derive(Clone, Debug)]
pub struct HttpQueryApi {
	base: Url,
	client: Client,
}
impl HttpQueryApi {
	pub fn new(cfg: &visor_config::Api) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;

		Self::with_client(&cfg.base_url, client)
	}

	pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
		Ok(Self { base: parse_base_url(base_url)?, client })
	}

	pub fn base_url(&self) -> &Url {
		&self.base
	}

	pub async fn start_query(&self) -> Result<QueryId> {
		let url = endpoint(&self.base, &["api", "query", "start_query"])?;
		let body = self.execute(Call::Start, self.client.post(url)).await?;
		let reply: StartReply = serde_json::from_value(body).map_err(|err| {
			Error::ServiceUnavailable { message: format!("start_query returned no query id: {err}") }
		})?;

		tracing::debug!(query_id = %reply.query_id, "Query allocated.");

		Ok(reply.query_id)
	}

	pub async fn add_trs(&self, query_id: &QueryId, text: &QueryText) -> Result<()> {
		let url = endpoint(&self.base, &["api", "query", query_id.as_str(), "add_trs"])?;
		let body = serde_json::json!({ "q": text.as_str() });

		self.execute(Call::AddTrs, self.client.put(url).json(&body)).await?;

		Ok(())
	}

	pub async fn train(&self, query_id: &QueryId) -> Result<()> {
		let url = endpoint(&self.base, &["api", "query", query_id.as_str(), "train"])?;

		self.execute(Call::Train, self.client.put(url)).await?;

		Ok(())
	}

	pub async fn rank(&self, query_id: &QueryId) -> Result<()> {
		let url = endpoint(&self.base, &["api", "query", query_id.as_str(), "rank"])?;

		self.execute(Call::Rank, self.client.put(url)).await?;

		Ok(())
	}

	pub async fn ranking_page(&self, query_id: &QueryId, page: u32) -> Result<RankingPage> {
		let url = endpoint(&self.base, &["api", "query", query_id.as_str(), "ranking"])?;
		let body = self
			.execute(Call::Ranking, self.client.get(url).query(&[("page", page)]))
			.await
			.map_err(|err| match err {
				Error::Rejected { status, ref message }
					if status == StatusCode::CONFLICT.as_u16() || reports_unranked(message) =>
					Error::NotReady { query_id: query_id.to_string() },
				other => other,
			})?;

		parse_ranking_reply(body)
	}

	pub async fn free_query(&self, query_id: &QueryId) -> Result<()> {
		let url = endpoint(&self.base, &["api", "query", query_id.as_str(), "free"])?;

		self.execute(Call::Free, self.client.put(url)).await?;

		Ok(())
	}

	pub async fn post_false_negative(
		&self,
		query_id: &QueryId,
		path: &str,
		value: bool,
	) -> Result<()> {
		let url = endpoint(&self.base, &["api", "fns", query_id.as_str()])?;
		let body = serde_json::json!({ "value": u8::from(value), "path": path });

		self.execute(Call::FalseNegative, self.client.post(url).json(&body)).await?;

		Ok(())
	}

	async fn execute(&self, call: Call, request: RequestBuilder) -> Result<Value> {
		let response = request.send().await.map_err(|err| Error::ServiceUnavailable {
			message: format!("{} request failed: {err}", call.label()),
		})?;
		let status = response.status();
		let text = response.text().await.map_err(|err| Error::ServiceUnavailable {
			message: format!("{} response could not be read: {err}", call.label()),
		})?;

		classify(call, status, &text)
	}
}

impl QueryApi for HttpQueryApi {
	fn start(&self) -> BoxFuture<'_, Result<QueryId>> {
		Box::pin(self.start_query())
	}

	fn submit_text<'a>(
		&'a self,
		query_id: &'a QueryId,
		text: &'a QueryText,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.add_trs(query_id, text))
	}

	fn begin_training<'a>(&'a self, query_id: &'a QueryId) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.train(query_id))
	}

	fn begin_ranking<'a>(&'a self, query_id: &'a QueryId) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.rank(query_id))
	}

	fn fetch_ranking_page<'a>(
		&'a self,
		query_id: &'a QueryId,
		page: u32,
	) -> BoxFuture<'a, Result<RankingPage>> {
		Box::pin(self.ranking_page(query_id, page))
	}

	fn release<'a>(&'a self, query_id: &'a QueryId) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.free_query(query_id))
	}

	fn set_false_negative<'a>(
		&'a self,
		query_id: &'a QueryId,
		path: &'a str,
		value: bool,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.post_false_negative(query_id, path, value))
	}
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url> {
	let url = Url::parse(raw.trim())
		.map_err(|err| Error::InvalidConfig { message: format!("Invalid base URL {raw:?}: {err}.") })?;

	if url.cannot_be_a_base() {
		return Err(Error::InvalidConfig { message: format!("Base URL {raw:?} cannot carry a path.") });
	}

	Ok(url)
}

/// Appends percent-encoded path segments to `base`, keeping any path prefix it already has.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
	let mut url = base.clone();

	url.path_segments_mut()
		.map_err(|_| Error::InvalidConfig { message: format!("Base URL {base} cannot carry a path.") })?
		.pop_if_empty()
		.extend(segments);

	Ok(url)
}

fn classify(call: Call, status: StatusCode, text: &str) -> Result<Value> {
	let body = if text.trim().is_empty() {
		Value::Null
	} else {
		serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.trim().to_string()))
	};
	let failure = envelope_error(&body).or_else(|| {
		(!status.is_success()).then(|| describe_failure(&body, status))
	});
	let Some(message) = failure else {
		if call.expects_payload() && !body.is_object() {
			return Err(Error::InvalidResponse {
				message: format!("{} returned a non-object body.", call.label()),
			});
		}

		return Ok(body);
	};

	if status.is_server_error() || call.is_lifecycle() {
		return Err(Error::ServiceUnavailable { message: format!("{}: {message}", call.label()) });
	}

	Err(Error::Rejected { status: status.as_u16(), message })
}

// The backend wraps handler failures as `{success: false, err_msg}`, sometimes with a 200.
fn envelope_error(body: &Value) -> Option<String> {
	if body.get("success").and_then(Value::as_bool) != Some(false) {
		return None;
	}

	Some(
		body.get("err_msg")
			.and_then(Value::as_str)
			.unwrap_or("request failed without an error message")
			.to_string(),
	)
}

fn describe_failure(body: &Value, status: StatusCode) -> String {
	match body {
		Value::String(text) => text.clone(),
		Value::Object(map) => map
			.get("err_msg")
			.or_else(|| map.get("message"))
			.and_then(Value::as_str)
			.map(str::to_string)
			.unwrap_or_else(|| status.to_string()),
		_ => status.to_string(),
	}
}

fn reports_unranked(message: &str) -> bool {
	let message = message.to_ascii_lowercase();

	message.contains("not ranked") || message.contains("not been ranked")
}

fn parse_ranking_reply(body: Value) -> Result<RankingPage> {
	let reply: RankingReply = serde_json::from_value(body).map_err(|err| {
		Error::InvalidResponse { message: format!("ranking reply is malformed: {err}.") }
	})?;

	Ok(reply.ranking)
}
