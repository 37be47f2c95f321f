use std::{
	collections::{HashMap, HashSet},
	convert::Infallible,
	future::IntoFuture,
	sync::{Arc, Mutex, MutexGuard},
};

use axum::{
	Json, Router,
	extract::{Path, Query, State},
	http::StatusCode,
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, Sse},
	},
	routing,
};
use futures::{Stream, stream};
use serde::Deserialize;
use serde_json::Value;
use tokio::{
	net::TcpListener,
	sync::{broadcast, oneshot},
};
use uuid::Uuid;

use crate::Result;
use visor_domain::{Notification, NotificationKind, QueryId, RankingItem, RankingPage, Stage};

/// Endpoints of the fake query service, for call counting and failure injection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Endpoint {
	Start,
	AddTrs,
	Train,
	Rank,
	Ranking,
	Free,
	FalseNegative,
}

#[derive(Default)]
struct FakeQuery {
	stage: Stage,
	text: Option<String>,
	flags: HashMap<String, bool>,
}

struct BackendState {
	pages: Vec<Vec<RankingItem>>,
	queries: Mutex<HashMap<String, FakeQuery>>,
	released: Mutex<HashSet<String>>,
	calls: Mutex<HashMap<Endpoint, usize>>,
	failing: Mutex<HashSet<Endpoint>>,
	events: broadcast::Sender<Notification>,
}
impl BackendState {
	fn record(&self, endpoint: Endpoint) -> bool {
		*lock(&self.calls).entry(endpoint).or_default() += 1;

		lock(&self.failing).contains(&endpoint)
	}

	fn set_stage(&self, query_id: &str, stage: Stage) {
		if let Some(query) = lock(&self.queries).get_mut(query_id) {
			query.stage = stage;
		}

		let _ = self.events.send(Notification::state_change(QueryId::new(query_id), stage));
	}
}

#[derive(Deserialize)]
struct PageParams {
	page: u32,
}

#[derive(Deserialize)]
struct AddTrsBody {
	q: String,
}

#[derive(Deserialize)]
struct FlagBody {
	value: u8,
	path: String,
}

/// In-process stand-in for the query service, bound on an ephemeral loopback port.
///
/// Training and ranking complete immediately: `train` emits `TRAINING` then `TRAINED`, and
/// `rank` emits `RANKING` then `RANKED`. Data collection only completes when a test calls
/// [`FakeBackend::complete_collection`].
pub struct FakeBackend {
	base_url: String,
	state: Arc<BackendState>,
	shutdown: Option<oneshot::Sender<()>>,
}
impl FakeBackend {
	pub async fn start(pages: Vec<Vec<RankingItem>>) -> Result<Self> {
		let (events, _) = broadcast::channel(256);
		let state = Arc::new(BackendState {
			pages,
			queries: Mutex::new(HashMap::new()),
			released: Mutex::new(HashSet::new()),
			calls: Mutex::new(HashMap::new()),
			failing: Mutex::new(HashSet::new()),
			events,
		});
		let listener = TcpListener::bind("127.0.0.1:0").await?;
		let addr = listener.local_addr()?;
		let (tx, rx) = oneshot::channel();
		let server = axum::serve(listener, router(state.clone())).with_graceful_shutdown(async move {
			let _ = rx.await;
		});

		tokio::spawn(async move {
			if let Err(err) = server.into_future().await {
				eprintln!("Fake backend stopped with an error: {err}.");
			}
		});

		Ok(Self { base_url: format!("http://{addr}"), state, shutdown: Some(tx) })
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	pub fn api_config(&self) -> visor_config::Api {
		visor_config::Api {
			base_url: self.base_url.clone(),
			timeout_ms: 5_000,
			notifications_path: visor_config::DEFAULT_NOTIFICATIONS_PATH.to_string(),
		}
	}

	pub fn calls(&self, endpoint: Endpoint) -> usize {
		lock(&self.state.calls).get(&endpoint).copied().unwrap_or(0)
	}

	/// Makes `endpoint` answer with a 500 error envelope until cleared.
	pub fn set_failing(&self, endpoint: Endpoint, failing: bool) {
		let mut set = lock(&self.state.failing);

		if failing {
			set.insert(endpoint);
		} else {
			set.remove(&endpoint);
		}
	}

	pub fn stage(&self, query_id: &QueryId) -> Option<Stage> {
		lock(&self.state.queries).get(query_id.as_str()).map(|query| query.stage)
	}

	pub fn query_text(&self, query_id: &QueryId) -> Option<String> {
		lock(&self.state.queries).get(query_id.as_str()).and_then(|query| query.text.clone())
	}

	pub fn flag(&self, query_id: &QueryId, path: &str) -> Option<bool> {
		lock(&self.state.queries)
			.get(query_id.as_str())
			.and_then(|query| query.flags.get(path).copied())
	}

	pub fn is_released(&self, query_id: &QueryId) -> bool {
		lock(&self.state.released).contains(query_id.as_str())
	}

	pub fn subscribers(&self) -> usize {
		self.state.events.receiver_count()
	}

	/// Publishes a raw notification to every connected stream.
	pub fn notify(&self, notification: Notification) {
		let _ = self.state.events.send(notification);
	}

	/// Finishes data collection for `query_id` the way the service reports it.
	pub fn complete_collection(&self, query_id: &QueryId) {
		for index in 0..2 {
			self.notify(Notification {
				query_id: query_id.clone(),
				kind: NotificationKind::ImageProcessed(format!("trs/{index}.jpg")),
			});
		}

		self.notify(Notification {
			query_id: query_id.clone(),
			kind: NotificationKind::AllImagesProcessed,
		});
		self.state.set_stage(query_id.as_str(), Stage::DataCollectionComplete);
	}

	pub async fn shutdown(mut self) {
		if let Some(tx) = self.shutdown.take() {
			let _ = tx.send(());
		}
	}
}

fn router(state: Arc<BackendState>) -> Router {
	Router::new()
		.route("/api/query/start_query", routing::post(start_query))
		.route("/api/query/{qid}/add_trs", routing::put(add_trs).post(add_trs))
		.route("/api/query/{qid}/train", routing::put(train).post(train))
		.route("/api/query/{qid}/rank", routing::put(rank).post(rank))
		.route("/api/query/{qid}/ranking", routing::get(ranking))
		.route("/api/query/{qid}/free", routing::put(free).get(free))
		.route("/api/fns/{qid}", routing::post(false_negative))
		.route("/api/query/notifications", routing::get(notifications))
		.route("/api/notifications", routing::get(notifications))
		.with_state(state)
}

async fn start_query(State(state): State<Arc<BackendState>>) -> Response {
	if state.record(Endpoint::Start) {
		return failure(StatusCode::SERVICE_UNAVAILABLE, "no free query slots");
	}

	let query_id = Uuid::new_v4().simple().to_string();

	lock(&state.queries).insert(query_id.clone(), FakeQuery::default());

	(StatusCode::OK, Json(serde_json::json!({ "success": true, "query_id": query_id })))
		.into_response()
}

async fn add_trs(
	State(state): State<Arc<BackendState>>,
	Path(qid): Path<String>,
	Json(body): Json<AddTrsBody>,
) -> Response {
	if state.record(Endpoint::AddTrs) {
		return failure(StatusCode::INTERNAL_SERVER_ERROR, "image search failed");
	}

	match lock(&state.queries).get_mut(&qid) {
		Some(query) => query.text = Some(body.q),
		None => return failure(StatusCode::NOT_FOUND, "unknown query id"),
	}

	ok()
}

async fn train(State(state): State<Arc<BackendState>>, Path(qid): Path<String>) -> Response {
	if state.record(Endpoint::Train) {
		return failure(StatusCode::INTERNAL_SERVER_ERROR, "training failed");
	}
	if !lock(&state.queries).contains_key(&qid) {
		return failure(StatusCode::NOT_FOUND, "unknown query id");
	}

	state.set_stage(&qid, Stage::Training);
	state.set_stage(&qid, Stage::Trained);

	ok()
}

async fn rank(State(state): State<Arc<BackendState>>, Path(qid): Path<String>) -> Response {
	if state.record(Endpoint::Rank) {
		return failure(StatusCode::INTERNAL_SERVER_ERROR, "ranking failed");
	}
	if !lock(&state.queries).contains_key(&qid) {
		return failure(StatusCode::NOT_FOUND, "unknown query id");
	}

	state.set_stage(&qid, Stage::Ranking);
	state.set_stage(&qid, Stage::Ranked);

	ok()
}

async fn ranking(
	State(state): State<Arc<BackendState>>,
	Path(qid): Path<String>,
	Query(params): Query<PageParams>,
) -> Response {
	if state.record(Endpoint::Ranking) {
		return failure(StatusCode::INTERNAL_SERVER_ERROR, "ranking storage failed");
	}

	let queries = lock(&state.queries);
	let Some(query) = queries.get(&qid) else {
		return failure(StatusCode::NOT_FOUND, "unknown query id");
	};

	if query.stage != Stage::Ranked {
		return failure(StatusCode::CONFLICT, "query has not been ranked");
	}

	let page_count = state.pages.len().max(1) as u32;

	if params.page == 0 || params.page > page_count {
		return failure(
			StatusCode::BAD_REQUEST,
			"Tried to retrieve page outside of valid range",
		);
	}

	let items = state
		.pages
		.get(params.page as usize - 1)
		.cloned()
		.unwrap_or_default()
		.into_iter()
		.map(|mut item| {
			item.false_negative = query.flags.get(&item.path).copied().unwrap_or(false);

			item
		})
		.collect();
	let flagged = query.flags.values().filter(|value| **value).count();
	let page = RankingPage {
		items,
		page: params.page,
		page_count,
		visited: state.pages.iter().map(Vec::len).sum::<usize>() as u64,
		prec: vec![flagged as f32 / 100.0; 100],
		prec_distr_ono: vec![0.0; 100],
	};

	(StatusCode::OK, Json(serde_json::json!({ "ranking": page }))).into_response()
}

async fn free(State(state): State<Arc<BackendState>>, Path(qid): Path<String>) -> Response {
	if state.record(Endpoint::Free) {
		return failure(StatusCode::INTERNAL_SERVER_ERROR, "free failed");
	}

	lock(&state.queries).remove(&qid);
	lock(&state.released).insert(qid);

	ok()
}

async fn false_negative(
	State(state): State<Arc<BackendState>>,
	Path(qid): Path<String>,
	Json(body): Json<FlagBody>,
) -> Response {
	if state.record(Endpoint::FalseNegative) {
		return failure(StatusCode::INTERNAL_SERVER_ERROR, "annotation store failed");
	}

	match lock(&state.queries).get_mut(&qid) {
		Some(query) => {
			query.flags.insert(body.path, body.value != 0);
		},
		None => return failure(StatusCode::NOT_FOUND, "unknown query id"),
	}

	ok()
}

async fn notifications(
	State(state): State<Arc<BackendState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
	let receiver = state.events.subscribe();
	let events = stream::unfold(receiver, |mut receiver| async move {
		loop {
			match receiver.recv().await {
				Ok(notification) => {
					let Ok(event) = Event::default().event("notification").json_data(notification.to_wire())
					else {
						continue;
					};

					return Some((Ok(event), receiver));
				},
				Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	});

	Sse::new(events).keep_alive(KeepAlive::default())
}

fn ok() -> Response {
	(StatusCode::OK, Json(serde_json::json!({ "success": true }))).into_response()
}

fn failure(status: StatusCode, message: &str) -> Response {
	let body: Value = serde_json::json!({ "success": false, "err_msg": message });

	(status, Json(body)).into_response()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}
