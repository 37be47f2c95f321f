use std::{
	pin::pin,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use futures::{Stream, StreamExt, stream::FuturesUnordered};
use tokio::{
	sync::{mpsc, watch},
	task::JoinHandle,
	time::{self, Instant},
};

use crate::{
	Error, Result,
	lifecycle::{Action, Lifecycle, Trigger},
	pager::{FlagCompletion, LoadMore, PendingCounter, RankingPager, push_flag},
	view::SessionView,
};
use visor_client::{BoxFuture, QueryApi, for_query};
use visor_domain::{Notification, NotificationKind, QueryId, QueryText, RankingPage, ResultRoute, Stage};

#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
	/// Deadline after query creation at which training is forced if collection never reports.
	pub fallback_train: Duration,
	pub command_buffer: usize,
}
impl Default for SessionSettings {
	fn default() -> Self {
		Self::from(&visor_config::Lifecycle::default())
	}
}
impl From<&visor_config::Lifecycle> for SessionSettings {
	fn from(cfg: &visor_config::Lifecycle) -> Self {
		Self {
			fallback_train: Duration::from_millis(cfg.fallback_train_ms),
			command_buffer: cfg.command_buffer,
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
	LoadMore,
	MarkFalseNegative { index: usize },
	MarkTailDistractors,
	Close,
}

enum Completion {
	Training(visor_client::Result<()>),
	Ranking(visor_client::Result<()>),
	Page { requested: u32, result: visor_client::Result<RankingPage> },
	Flag(FlagCompletion),
}

/// Creates a query, submits its text and spawns the task that drives it to a ranked list.
///
/// `notifications` is the shared channel stream; it is filtered to the new query here. If the
/// text cannot be submitted the query is released in the background and the error is returned.
pub async fn start_session<S>(
	api: Arc<dyn QueryApi>,
	notifications: S,
	text: QueryText,
	settings: SessionSettings,
) -> Result<SessionHandle>
where
	S: Stream<Item = Notification> + Send + 'static,
{
	let query_id = api.start().await?;
	let deadline = Instant::now() + settings.fallback_train;

	tracing::info!(query_id = %query_id, "Query started.");

	if let Err(err) = api.submit_text(&query_id, &text).await {
		tracing::error!(error = %err, query_id = %query_id, "Query text submission failed.");

		spawn_release(api, query_id);

		return Err(err.into());
	}

	let view = SessionView::new(ResultRoute::new(query_id.clone(), text));
	let (publisher, view_rx) = watch::channel(view.clone());
	let (commands, commands_rx) = mpsc::channel(settings.command_buffer.max(1));
	let driver = Driver {
		api,
		query_id: query_id.clone(),
		lifecycle: Lifecycle::new(),
		pager: RankingPager::default(),
		published_revision: 0,
		pending: PendingCounter::default(),
		tasks: FuturesUnordered::new(),
		view,
		publisher,
	};
	let events = for_query(notifications, query_id.clone());
	let task = tokio::spawn(driver.run(events, commands_rx, deadline));

	Ok(SessionHandle { query_id, commands, sent: AtomicU64::new(0), view: view_rx, task })
}

/// Handle to a running session. Dropping it closes the session in the background.
pub struct SessionHandle {
	query_id: QueryId,
	commands: mpsc::Sender<Command>,
	sent: AtomicU64,
	view: watch::Receiver<SessionView>,
	task: JoinHandle<Teardown>,
}
impl SessionHandle {
	pub fn query_id(&self) -> &QueryId {
		&self.query_id
	}

	pub fn view(&self) -> SessionView {
		self.view.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<SessionView> {
		self.view.clone()
	}

	/// Requests the next ranking page. Refused until the query is ranked.
	pub async fn load_more(&self) -> Result<()> {
		if !self.view.borrow().is_ranked() {
			return Err(Error::NotRanked { query_id: self.query_id.to_string() });
		}

		self.send(Command::LoadMore).await
	}

	pub async fn mark_false_negative(&self, index: usize) -> Result<()> {
		self.send(Command::MarkFalseNegative { index }).await
	}

	pub async fn mark_tail_distractors(&self) -> Result<()> {
		self.send(Command::MarkTailDistractors).await
	}

	pub async fn wait_until<F>(&self, mut predicate: F) -> Result<SessionView>
	where
		F: FnMut(&SessionView) -> bool,
	{
		let mut view = self.view.clone();
		let found = view.wait_for(|view| view.closed || predicate(view)).await.map_err(|_| Error::Closed)?;

		if found.closed && !predicate(&*found) {
			return Err(Error::Closed);
		}

		Ok(found.clone())
	}

	/// Waits until every command sent so far has been handled and nothing is in flight.
	pub async fn sync(&self) -> Result<SessionView> {
		let sent = self.sent.load(Ordering::SeqCst);

		self.wait_until(|view| {
			view.commands_handled >= sent && view.pending_updates == 0 && !view.loading_page
		})
		.await
	}

	pub async fn wait_for_stage(&self, stage: Stage) -> Result<SessionView> {
		self.wait_until(|view| view.stage >= stage).await
	}

	/// Stops the session and returns the final view.
	///
	/// The release call runs in the background and is never waited on.
	pub async fn close(self) -> Result<SessionView> {
		Ok(self.stop().await?.view)
	}

	/// Like [`close`](Self::close), but gives the release call up to `limit` to finish.
	///
	/// For callers about to tear down the runtime, which would drop a pending release.
	pub async fn close_and_release(self, limit: Duration) -> Result<SessionView> {
		let Teardown { view, release } = self.stop().await?;

		if time::timeout(limit, release).await.is_err() {
			tracing::warn!(query_id = %view.query_id, "Query release still pending. Abandoning it.");
		}

		Ok(view)
	}

	async fn stop(self) -> Result<Teardown> {
		// The task may already be gone; joining below still yields its final view.
		let _ = self.commands.send(Command::Close).await;

		Ok(self.task.await?)
	}

	async fn send(&self, command: Command) -> Result<()> {
		self.commands.send(command).await.map_err(|_| Error::Closed)?;
		self.sent.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}
}

struct Teardown {
	view: SessionView,
	release: JoinHandle<()>,
}

struct Driver {
	api: Arc<dyn QueryApi>,
	query_id: QueryId,
	lifecycle: Lifecycle,
	pager: RankingPager,
	/// Pager revision last copied into `view.items`.
	published_revision: u64,
	pending: PendingCounter,
	tasks: FuturesUnordered<BoxFuture<'static, Completion>>,
	view: SessionView,
	publisher: watch::Sender<SessionView>,
}
impl Driver {
	async fn run<S>(
		mut self,
		events: S,
		mut commands: mpsc::Receiver<Command>,
		deadline: Instant,
	) -> Teardown
	where
		S: Stream<Item = Notification> + Send,
	{
		let mut events = pin!(events);
		let mut fallback = pin!(time::sleep_until(deadline));
		let mut listening = true;

		loop {
			tokio::select! {
				event = events.next(), if listening => match event {
					Some(notification) => self.on_notification(notification),
					None => {
						listening = false;

						tracing::warn!(
							query_id = %self.query_id,
							"Notification channel closed. Relying on the fallback timer."
						);
					},
				},
				() = &mut fallback, if self.lifecycle.fallback_armed() => {
					tracing::info!(query_id = %self.query_id, "Data collection deadline elapsed.");

					self.on_trigger(Trigger::FallbackElapsed);
				},
				command = commands.recv() => match command {
					Some(Command::Close) | None => break,
					Some(command) => self.on_command(command),
				},
				Some(completion) = self.tasks.next(), if !self.tasks.is_empty() => {
					self.on_completion(completion);
				},
			}

			self.publish();
		}

		self.shutdown()
	}

	fn on_notification(&mut self, notification: Notification) {
		match notification.kind {
			NotificationKind::StateChange(stage) => {
				tracing::info!(query_id = %self.query_id, stage = %stage, "Query stage changed.");

				self.on_trigger(Trigger::StageReported(stage));
			},
			NotificationKind::ImageProcessed(item) => self.view.last_processed = Some(item),
			NotificationKind::AllImagesProcessed => self.view.collection_finished = true,
			NotificationKind::Error(message) => {
				tracing::warn!(query_id = %self.query_id, message = %message, "Query service reported an error.");

				self.view.last_error = Some(message);
			},
		}
	}

	fn on_trigger(&mut self, trigger: Trigger) {
		let action = self.lifecycle.apply(trigger);

		self.view.stage = self.lifecycle.stage();

		match action {
			Some(Action::BeginTraining) => {
				tracing::info!(query_id = %self.query_id, ?trigger, "Requesting training.");

				let (api, query_id) = (self.api.clone(), self.query_id.clone());

				self.view.training_requested = true;
				self.tasks.push(Box::pin(async move {
					Completion::Training(api.begin_training(&query_id).await)
				}));
			},
			Some(Action::BeginRanking) => {
				tracing::info!(query_id = %self.query_id, "Requesting ranking.");

				let (api, query_id) = (self.api.clone(), self.query_id.clone());

				self.view.ranking_requested = true;
				self.tasks.push(Box::pin(async move {
					Completion::Ranking(api.begin_ranking(&query_id).await)
				}));
			},
			Some(Action::FetchFirstPage) => self.request_page(),
			None => {},
		}
	}

	fn on_command(&mut self, command: Command) {
		self.view.commands_handled += 1;

		match command {
			Command::LoadMore => self.request_page(),
			Command::MarkFalseNegative { index } => self.start_flag(index),
			Command::MarkTailDistractors => {
				let indices = self.pager.tail_distractor_indices();

				tracing::info!(query_id = %self.query_id, count = indices.len(), "Flagging tail distractors.");

				for index in indices {
					self.start_flag(index);
				}
			},
			Command::Close => {},
		}
	}

	fn request_page(&mut self) {
		let page = match self.pager.begin_fetch() {
			Ok(page) => page,
			Err(LoadMore::InFlight) => {
				tracing::debug!(query_id = %self.query_id, "Page fetch in flight. Discarding request.");

				return;
			},
			Err(_) => {
				tracing::debug!(query_id = %self.query_id, "Ranking fully loaded.");

				return;
			},
		};
		let (api, query_id) = (self.api.clone(), self.query_id.clone());

		self.tasks.push(Box::pin(async move {
			let result = api.fetch_ranking_page(&query_id, page).await;

			Completion::Page { requested: page, result }
		}));
	}

	fn start_flag(&mut self, index: usize) {
		let Some(patch) = self.pager.mark_false_negative(index) else {
			tracing::warn!(query_id = %self.query_id, index, "No ranking item at index.");

			return;
		};
		let (api, query_id) = (self.api.clone(), self.query_id.clone());

		self.pending.increment();
		self.tasks.push(Box::pin(async move {
			Completion::Flag(push_flag(api.as_ref(), &query_id, patch).await)
		}));
	}

	fn on_completion(&mut self, completion: Completion) {
		match completion {
			Completion::Training(result) => self.settle_call("Training", result),
			Completion::Ranking(result) => self.settle_call("Ranking", result),
			Completion::Page { requested, result: Ok(page) } => {
				let added = self.pager.complete_fetch(requested, page);

				tracing::info!(
					query_id = %self.query_id,
					page = self.pager.current_page(),
					added,
					"Ranking page loaded."
				);
			},
			Completion::Page { result: Err(err), .. } => {
				self.pager.abort_fetch();

				tracing::warn!(error = %err, query_id = %self.query_id, "Ranking page fetch failed.");

				self.view.last_error = Some(err.to_string());
			},
			Completion::Flag(completion) => {
				if let Err(err) = self.pager.settle(completion, &mut self.pending) {
					self.view.last_error = Some(err.to_string());
				}
			},
		}
	}

	fn settle_call(&mut self, call: &str, result: visor_client::Result<()>) {
		if let Err(err) = result {
			tracing::error!(error = %err, query_id = %self.query_id, call, "Lifecycle request failed.");

			self.view.last_error = Some(err.to_string());
		}
	}

	fn publish(&mut self) {
		if self.pager.revision() != self.published_revision {
			self.view.items = self.pager.items().into();
			self.published_revision = self.pager.revision();
		}

		self.view.current_page = self.pager.current_page();
		self.view.page_count = self.pager.page_count();
		self.view.visited = self.pager.visited();
		self.view.precision = self.pager.precision();
		self.view.pending_updates = self.pending.get();
		self.view.loading_page = self.pager.is_loading();
		self.publisher.send_replace(self.view.clone());
	}

	fn shutdown(mut self) -> Teardown {
		self.lifecycle.disarm_fallback();
		self.tasks.clear();
		self.pending = PendingCounter::default();
		self.view.closed = true;
		self.publish();

		let release = spawn_release(self.api, self.query_id);

		Teardown { view: self.view, release }
	}
}

fn spawn_release(api: Arc<dyn QueryApi>, query_id: QueryId) -> JoinHandle<()> {
	tokio::spawn(async move {
		match api.release(&query_id).await {
			Ok(()) => tracing::info!(query_id = %query_id, "Query released."),
			Err(err) => tracing::warn!(error = %err, query_id = %query_id, "Query release failed."),
		}
	})
}
