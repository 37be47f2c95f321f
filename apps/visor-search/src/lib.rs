use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::eyre;
use tokio::time;
use tracing_subscriber::EnvFilter;

use visor_client::{HttpQueryApi, NotificationChannel, QueryApi};
use visor_domain::{QueryText, Stage};
use visor_session::{SessionHandle, SessionSettings, SessionView, ViewFilters, start_session};

#[derive(Debug, Parser)]
#[command(
	version = visor_cli::VERSION,
	rename_all = "kebab",
	styles = visor_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// Ranking pages to load once the query is ranked.
	#[arg(long, default_value_t = 1, value_name = "N")]
	pub pages: u32,
	/// Flag trailing distractors as false negatives before printing.
	#[arg(long)]
	pub tail_distractors: bool,
	#[arg(long)]
	pub hide_false_negatives: bool,
	/// Give up when the first page has not arrived after this many seconds.
	#[arg(long, default_value_t = 300, value_name = "SECS")]
	pub wait_secs: u64,
	#[arg(value_name = "QUERY")]
	pub query: String,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = visor_config::load(&args.config)?;
	init_tracing(&config)?;
	let text = QueryText::new(&args.query)?;
	let api: Arc<dyn QueryApi> = Arc::new(HttpQueryApi::new(&config.api)?);
	let notifications = NotificationChannel::new(&config.api)?.connect().await?;
	let settings = SessionSettings::from(&config.lifecycle);
	let handle = start_session(api, notifications, text, settings).await?;

	println!("{}", handle.view().route.to_path());

	let outcome = drive(&handle, &args).await;
	// The query is released even when driving it failed.
	let view = handle.close_and_release(Duration::from_millis(config.api.timeout_ms)).await?;

	outcome?;
	print_view(&view, &ViewFilters { hide_false_negatives: args.hide_false_negatives })?;

	Ok(())
}

fn init_tracing(config: &visor_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();
	Ok(())
}

async fn drive(handle: &SessionHandle, args: &Args) -> color_eyre::Result<()> {
	let limit = Duration::from_secs(args.wait_secs);

	time::timeout(limit, wait_for_first_page(handle))
		.await
		.map_err(|_| eyre::eyre!("Query was not ranked within {} seconds.", args.wait_secs))??;

	for _ in 1..args.pages {
		let before = handle.view();

		if !before.has_more_pages() {
			break;
		}

		handle.load_more().await?;

		let after = handle.sync().await?;

		if after.current_page == before.current_page {
			return Err(eyre::eyre!(
				"Loading page {} failed: {}",
				before.current_page + 1,
				after.last_error.unwrap_or_default()
			));
		}
	}

	if args.tail_distractors {
		handle.mark_tail_distractors().await?;

		let view = handle.sync().await?;

		if let Some(err) = view.last_error {
			tracing::warn!(error = %err, "Some false negative updates were rolled back.");
		}
	}

	Ok(())
}

async fn wait_for_first_page(handle: &SessionHandle) -> color_eyre::Result<SessionView> {
	let mut updates = handle.subscribe();
	let mut reported = None;

	loop {
		let view = updates.borrow_and_update().clone();

		if reported != Some(view.stage) {
			eprintln!("stage: {}", view.stage);

			reported = Some(view.stage);
		}
		if view.current_page >= 1 {
			return Ok(view);
		}
		if view.closed {
			return Err(eyre::eyre!("Session closed before the query was ranked."));
		}
		if view.stage == Stage::Ranked
			&& !view.loading_page
			&& let Some(err) = &view.last_error
		{
			return Err(eyre::eyre!("First ranking page failed: {err}"));
		}

		updates.changed().await?;
	}
}

fn print_view(view: &SessionView, filters: &ViewFilters) -> color_eyre::Result<()> {
	let mut out = std::io::stdout().lock();

	for (index, item) in view.visible_items(filters) {
		let marker = match (item.false_negative, item.is_distractor) {
			(true, _) => "fn",
			(false, true) => "d",
			(false, false) => "-",
		};

		writeln!(out, "{index:>5} {:>8.4} {marker:<2} {}", item.score, item.path)?;
	}

	writeln!(out, "page {}/{} visited {}", view.current_page, view.page_count, view.visited)?;

	if let Some(stats) = view.precision {
		let cell = |value: Option<f32>| value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"));

		writeln!(
			out,
			"precision@50 {} precision@100 {} distractor precision@100 {}",
			cell(stats.precision_at_50),
			cell(stats.precision_at_100),
			cell(stats.distractor_precision_at_100),
		)?;
	}

	Ok(())
}
