use std::{
	collections::HashMap,
	sync::{
		Mutex, MutexGuard,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use futures::future;
use visor_client::{BoxFuture, Error, QueryApi, Result};
use visor_domain::{QueryId, QueryText, RankingItem, RankingPage};

/// In-memory `QueryApi` that counts every call and serves canned ranking pages.
pub struct SpyQueryApi {
	query_id: QueryId,
	pages: Vec<Vec<RankingItem>>,
	page_delay: Duration,
	starts: AtomicUsize,
	submits: AtomicUsize,
	trainings: AtomicUsize,
	rankings: AtomicUsize,
	releases: AtomicUsize,
	flag_calls: AtomicUsize,
	fetched: Mutex<Vec<u32>>,
	flags: Mutex<HashMap<String, bool>>,
	submitted: Mutex<Option<String>>,
	fail_submit: AtomicBool,
	fail_training: AtomicBool,
	fail_pages: AtomicBool,
	fail_release: AtomicBool,
	hang_release: AtomicBool,
	fail_flags: AtomicBool,
	ranked: AtomicBool,
}
impl SpyQueryApi {
	pub fn new(query_id: impl Into<String>) -> Self {
		Self {
			query_id: QueryId::new(query_id),
			pages: Vec::new(),
			page_delay: Duration::ZERO,
			starts: AtomicUsize::new(0),
			submits: AtomicUsize::new(0),
			trainings: AtomicUsize::new(0),
			rankings: AtomicUsize::new(0),
			releases: AtomicUsize::new(0),
			flag_calls: AtomicUsize::new(0),
			fetched: Mutex::new(Vec::new()),
			flags: Mutex::new(HashMap::new()),
			submitted: Mutex::new(None),
			fail_submit: AtomicBool::new(false),
			fail_training: AtomicBool::new(false),
			fail_pages: AtomicBool::new(false),
			fail_release: AtomicBool::new(false),
			hang_release: AtomicBool::new(false),
			fail_flags: AtomicBool::new(false),
			ranked: AtomicBool::new(true),
		}
	}

	pub fn with_pages(mut self, pages: Vec<Vec<RankingItem>>) -> Self {
		self.pages = pages;

		self
	}

	/// Delays every page fetch, so tests can overlap requests under a paused clock.
	pub fn with_page_delay(mut self, delay: Duration) -> Self {
		self.page_delay = delay;

		self
	}

	pub fn query_id(&self) -> &QueryId {
		&self.query_id
	}

	pub fn starts(&self) -> usize {
		self.starts.load(Ordering::SeqCst)
	}

	pub fn submits(&self) -> usize {
		self.submits.load(Ordering::SeqCst)
	}

	pub fn trainings(&self) -> usize {
		self.trainings.load(Ordering::SeqCst)
	}

	pub fn rankings(&self) -> usize {
		self.rankings.load(Ordering::SeqCst)
	}

	pub fn releases(&self) -> usize {
		self.releases.load(Ordering::SeqCst)
	}

	pub fn flag_calls(&self) -> usize {
		self.flag_calls.load(Ordering::SeqCst)
	}

	pub fn fetched_pages(&self) -> Vec<u32> {
		lock(&self.fetched).clone()
	}

	pub fn submitted_text(&self) -> Option<String> {
		lock(&self.submitted).clone()
	}

	pub fn flag(&self, path: &str) -> Option<bool> {
		lock(&self.flags).get(path).copied()
	}

	pub fn fail_submit(&self, failing: bool) {
		self.fail_submit.store(failing, Ordering::SeqCst);
	}

	pub fn fail_training(&self, failing: bool) {
		self.fail_training.store(failing, Ordering::SeqCst);
	}

	pub fn fail_pages(&self, failing: bool) {
		self.fail_pages.store(failing, Ordering::SeqCst);
	}

	pub fn fail_release(&self, failing: bool) {
		self.fail_release.store(failing, Ordering::SeqCst);
	}

	/// Release calls are counted and then never resolve.
	pub fn hang_release(&self, hanging: bool) {
		self.hang_release.store(hanging, Ordering::SeqCst);
	}

	pub fn fail_flags(&self, failing: bool) {
		self.fail_flags.store(failing, Ordering::SeqCst);
	}

	/// While unset, page fetches answer `NotReady`.
	pub fn set_ranked(&self, ranked: bool) {
		self.ranked.store(ranked, Ordering::SeqCst);
	}

	fn page(&self, page: u32) -> Result<RankingPage> {
		if self.fail_pages.load(Ordering::SeqCst) {
			return Err(unavailable("ranking"));
		}
		if !self.ranked.load(Ordering::SeqCst) {
			return Err(Error::NotReady { query_id: self.query_id.to_string() });
		}

		let page_count = self.pages.len().max(1) as u32;

		if page == 0 || page > page_count {
			return Err(Error::Rejected {
				status: 400,
				message: "Tried to retrieve page outside of valid range".to_string(),
			});
		}

		let flags = lock(&self.flags);
		let items = self
			.pages
			.get(page as usize - 1)
			.cloned()
			.unwrap_or_default()
			.into_iter()
			.map(|mut item| {
				item.false_negative = flags.get(&item.path).copied().unwrap_or(false);

				item
			})
			.collect();
		let flagged = flags.values().filter(|value| **value).count();

		Ok(RankingPage {
			items,
			page,
			page_count,
			visited: self.pages.iter().map(Vec::len).sum::<usize>() as u64,
			prec: vec![flagged as f32 / 100.0; 100],
			prec_distr_ono: vec![0.0; 100],
		})
	}
}

impl QueryApi for SpyQueryApi {
	fn start(&self) -> BoxFuture<'_, Result<QueryId>> {
		Box::pin(async move {
			self.starts.fetch_add(1, Ordering::SeqCst);

			Ok(self.query_id.clone())
		})
	}

	fn submit_text<'a>(
		&'a self,
		_: &'a QueryId,
		text: &'a QueryText,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.submits.fetch_add(1, Ordering::SeqCst);

			if self.fail_submit.load(Ordering::SeqCst) {
				return Err(unavailable("add_trs"));
			}

			*lock(&self.submitted) = Some(text.as_str().to_string());

			Ok(())
		})
	}

	fn begin_training<'a>(&'a self, _: &'a QueryId) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.trainings.fetch_add(1, Ordering::SeqCst);

			if self.fail_training.load(Ordering::SeqCst) {
				return Err(unavailable("train"));
			}

			Ok(())
		})
	}

	fn begin_ranking<'a>(&'a self, _: &'a QueryId) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.rankings.fetch_add(1, Ordering::SeqCst);

			Ok(())
		})
	}

	fn fetch_ranking_page<'a>(
		&'a self,
		_: &'a QueryId,
		page: u32,
	) -> BoxFuture<'a, Result<RankingPage>> {
		Box::pin(async move {
			lock(&self.fetched).push(page);

			if !self.page_delay.is_zero() {
				tokio::time::sleep(self.page_delay).await;
			}

			self.page(page)
		})
	}

	fn release<'a>(&'a self, _: &'a QueryId) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.releases.fetch_add(1, Ordering::SeqCst);

			if self.hang_release.load(Ordering::SeqCst) {
				future::pending::<()>().await;
			}
			if self.fail_release.load(Ordering::SeqCst) {
				return Err(unavailable("free"));
			}

			Ok(())
		})
	}

	fn set_false_negative<'a>(
		&'a self,
		_: &'a QueryId,
		path: &'a str,
		value: bool,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.flag_calls.fetch_add(1, Ordering::SeqCst);

			if self.fail_flags.load(Ordering::SeqCst) {
				return Err(Error::Rejected { status: 500, message: "annotation store failed".to_string() });
			}

			lock(&self.flags).insert(path.to_string(), value);

			Ok(())
		})
	}
}

/// `count` items for `page`, scored in descending order.
pub fn sample_items(page: u32, count: usize) -> Vec<RankingItem> {
	(0..count)
		.map(|index| {
			let score = 1.0 - (page as f32 * 100.0 + index as f32) / 10_000.0;

			RankingItem::new(format!("p{page}/{index:03}.jpg"), score)
		})
		.collect()
}

pub fn sample_page(page: u32, page_count: u32, items: Vec<RankingItem>) -> RankingPage {
	RankingPage {
		visited: items.len() as u64,
		items,
		page,
		page_count,
		prec: vec![0.0; 100],
		prec_distr_ono: vec![0.0; 100],
	}
}

fn unavailable(call: &str) -> Error {
	Error::ServiceUnavailable { message: format!("{call}: service offline") }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}
