use std::{
	path::{Path, PathBuf},
	pin::pin,
	sync::Arc,
	time::Duration,
};

use anyhow::{Context, Result};
use cc_coordinator::{ClickerContext, ContextEvent, Surface, Tab, View};
use cc_gateway::{HttpGateway, RequestConfig, UpgradeKind};
use cc_heartbeat::{FileStore, SystemClock};
use clap::{Parser, Subcommand};
use futures::FutureExt;
use futures_concurrency::future::Race;
use tokio::{
	signal,
	sync::broadcast::error::RecvError,
	time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
	filter::LevelFilter,
	fmt::{self, Layer},
	prelude::*,
	EnvFilter,
};

mod config;

use config::HeadlessConfig;

const STATUS_PERIOD: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "cc-headless", about = "Runs a clicker context without a browser")]
struct Cli {
	/// Directory holding `headless.json`, logs and the default registry
	#[arg(long, env = "CC_DATA_DIR")]
	data_dir: Option<PathBuf>,

	/// Overrides the server URL from the config
	#[arg(long)]
	api_url: Option<String>,

	/// Overrides the session cookie from the config
	#[arg(long)]
	session_cookie: Option<String>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Keep a context on the clicker until Ctrl-C, generating auto clicks whenever it owns the
	/// auto-clicker
	Run,
	/// Buy one level of an upgrade
	Buy { upgrade: UpgradeKind },
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let data_dir = match cli.data_dir {
		Some(dir) => dir,
		None => config::default_data_dir()?,
	};

	let mut config = HeadlessConfig::load_or_create(&data_dir)?;
	if let Some(api_url) = cli.api_url {
		config.api_url = api_url;
	}
	if let Some(cookie) = cli.session_cookie {
		config.session_cookie = Some(cookie);
	}

	let _guard = init_logger(&data_dir, &config.log_level)?;

	let context = create_context(&config).await?;

	let res = match cli.command {
		Commands::Run => run(&context).await,
		Commands::Buy { upgrade } => buy(&context, upgrade).await,
	};

	if let Err(e) = context.dispose().await {
		error!(?e, "Failed to dispose clicker context");
	}

	res
}

fn init_logger(data_dir: &Path, log_level: &str) -> Result<WorkerGuard> {
	let (non_blocking, guard) =
		tracing_appender::non_blocking(rolling::daily(data_dir.join("logs"), "log"));

	let mut filter = EnvFilter::from_default_env().add_directive("warn".parse()?);
	for krate in ["cc_heartbeat", "cc_gateway", "cc_coordinator", "cc_headless"] {
		filter = filter.add_directive(
			format!("{krate}={log_level}")
				.parse()
				.with_context(|| format!("Invalid log level '{log_level}'"))?,
		);
	}

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer())
		.with(
			Layer::default()
				.with_writer(non_blocking)
				.with_ansi(false)
				.with_filter(LevelFilter::DEBUG),
		)
		.try_init()?;

	Ok(guard)
}

async fn create_context(config: &HeadlessConfig) -> Result<ClickerContext> {
	let store = FileStore::open(&config.registry_dir)
		.await
		.with_context(|| format!("Failed to open registry at {}", config.registry_dir.display()))?;

	let mut request_config = RequestConfig::new(&config.api_url);
	if let Some(cookie) = &config.session_cookie {
		request_config = request_config.with_session_cookie(cookie);
	}

	info!(api_url = %config.api_url, registry = %store.dir().display(), "Connecting");

	Ok(ClickerContext::create(
		config.coordinator.clone(),
		Arc::new(HttpGateway::new(request_config)),
		Arc::new(store),
		Arc::new(SystemClock),
	))
}

async fn run(context: &ClickerContext) -> Result<()> {
	enum Event {
		Interrupted(std::io::Result<()>),
		Context(Result<ContextEvent, RecvError>),
		Status,
	}

	let mut events = context.subscribe();
	let mut ctrl_c = pin!(signal::ctrl_c());

	let mut status_interval = interval(STATUS_PERIOD);
	status_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

	loop {
		let event = (
			ctrl_c.as_mut().map(Event::Interrupted),
			events.recv().map(Event::Context),
			status_interval.tick().map(|_| Event::Status),
		)
			.race()
			.await;

		match event {
			Event::Interrupted(res) => {
				res.context("Failed to listen for Ctrl-C")?;
				info!("Interrupted, shutting down");
				return Ok(());
			}

			Event::Context(Ok(event)) => log_event(&event),

			Event::Context(Err(RecvError::Lagged(skipped))) => {
				warn!(skipped, "Event log fell behind");
			}

			Event::Context(Err(RecvError::Closed)) => {
				warn!("Clicker context stopped on its own");
				return Ok(());
			}

			Event::Status => {
				let snapshot = context.snapshot();
				info!(
					rank = snapshot.user.rank,
					balance = %snapshot.user.balance,
					auto_clicker = snapshot.user.upgrades.auto_clicker,
					queued = snapshot.queued.total(),
					leader = ?snapshot.leader,
					last_error = ?snapshot.last_error,
					"Status"
				);
			}
		}
	}
}

fn log_event(event: &ContextEvent) {
	match event {
		ContextEvent::AutoClick { value, critical } => {
			debug!(value, critical, "Auto click");
		}
		ContextEvent::RankUp { rank } => info!(rank, "Rank up!"),
		ContextEvent::CaseEarned(case) => info!(name = %case.name, kind = %case.kind, "Case earned"),
		ContextEvent::LeadershipChanged(state) => info!(?state, "Auto-clicker leadership changed"),
	}
}

async fn buy(context: &ClickerContext, upgrade: UpgradeKind) -> Result<()> {
	// A one-off purchase must never start generating
	context
		.set_surface(Surface {
			tab: Tab::Money,
			view: View::Other,
		})
		.await?;

	let next_cost = context
		.purchase_upgrade(upgrade)
		.await
		.with_context(|| format!("Failed to buy {upgrade}"))?;

	let snapshot = context.snapshot();

	match next_cost {
		Some(cost) => info!(
			%upgrade,
			balance = %snapshot.user.balance,
			next_cost = %cost,
			"Upgrade bought"
		),
		None => info!(%upgrade, balance = %snapshot.user.balance, "Upgrade bought"),
	}

	Ok(())
}
