//! One execution context: a full clicker instance with its own session, queue and state mirror.
//!
//! All mutable state lives on a single task driven by a merged stream of handle commands,
//! generator ticks, network completions and two timers. The [`ClickerContext`] handle only sends
//! messages to it, so no lock is ever held across a network call.

use std::sync::Arc;

use async_channel as chan;
use cc_gateway::{CaseRef, Gateway, UpgradeKind};
use cc_heartbeat::{Clock, HeartbeatRegistry, KeyValueStore};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::{
	spawn,
	sync::{broadcast, oneshot, watch},
	task::JoinHandle,
};
use tracing::{error, info};

use super::{
	aggregator::{ClickKind, QueuedClicks},
	config::CoordinatorConfig,
	error::Error,
	generator::Generator,
	leader::{LeaderCoordinator, LeaderState},
	reconciler::{DerivedParams, UserState},
	session::ClickerSession,
};

mod run;

use run::Runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tab {
	Money,
	Cases,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum View {
	Clicker,
	Other,
}

/// Which part of the client the user is looking at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Surface {
	pub tab: Tab,
	pub view: View,
}

impl Surface {
	pub const CLICKER: Self = Self {
		tab: Tab::Money,
		view: View::Clicker,
	};

	/// Auto clicks are only generated while the money clicker is on screen
	#[must_use]
	pub fn is_clicker(&self) -> bool {
		*self == Self::CLICKER
	}
}

impl Default for Surface {
	fn default() -> Self {
		Self::CLICKER
	}
}

/// Everything a UI needs to render one context, published after every processed message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
	pub user: UserState,
	pub derived: DerivedParams,
	pub session: ClickerSession,
	pub queued: QueuedClicks,
	pub last_flush_at_ms: i64,
	pub leader: LeaderState,
	pub surface: Surface,
	pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
	/// An accepted generator tick, `value` is the balance it is expected to add
	AutoClick { value: f64, critical: bool },
	RankUp { rank: u32 },
	CaseEarned(CaseRef),
	LeadershipChanged(LeaderState),
}

#[derive(Debug)]
pub(crate) enum ContextMessage {
	Click {
		kind: ClickKind,
		batched: bool,
		ack: oneshot::Sender<()>,
	},
	BreakCombo(oneshot::Sender<()>),
	CaseClick(oneshot::Sender<bool>),
	BatchCaseClicks {
		count: u32,
		ack: oneshot::Sender<()>,
	},
	PurchaseUpgrade {
		kind: UpgradeKind,
		ack: oneshot::Sender<Result<Option<Decimal>, cc_gateway::Error>>,
	},
	SetSurface {
		surface: Surface,
		ack: oneshot::Sender<()>,
	},
	Refresh(oneshot::Sender<()>),
	ShutdownRequest(oneshot::Sender<Result<(), Error>>),
}

const MESSAGES_CAPACITY: usize = 64;
const TICKS_CAPACITY: usize = 64;
const EVENTS_CAPACITY: usize = 256;

/// Handle to a running clicker context.
///
/// Dropping every handle without calling [`Self::dispose`] still shuts the context down and
/// releases its ownership claim, just without waiting for it.
#[derive(Debug)]
pub struct ClickerContext {
	msgs_tx: chan::Sender<ContextMessage>,
	snapshot_rx: watch::Receiver<Snapshot>,
	events_tx: broadcast::Sender<ContextEvent>,
	handle: Option<JoinHandle<()>>,
}

impl ClickerContext {
	/// Starts a new context and its initial user data fetch. Must be called within a tokio runtime.
	#[must_use]
	pub fn create(
		config: CoordinatorConfig,
		gateway: Arc<dyn Gateway>,
		store: Arc<dyn KeyValueStore>,
		clock: Arc<dyn Clock>,
	) -> Self {
		let (msgs_tx, msgs_rx) = chan::bounded(MESSAGES_CAPACITY);
		let (ticks_tx, ticks_rx) = chan::bounded(TICKS_CAPACITY);
		let (events_tx, _) = broadcast::channel(EVENTS_CAPACITY);

		let leader = LeaderCoordinator::new(
			HeartbeatRegistry::new(store),
			Arc::clone(&clock),
			Generator::spawn(ticks_tx),
			config.stale_threshold(),
		);

		let runner = Runner::new(config, gateway, clock, leader, events_tx.clone());
		let (snapshot_tx, snapshot_rx) = watch::channel(runner.snapshot());

		info!("Starting clicker context");

		Self {
			msgs_tx,
			snapshot_rx,
			events_tx,
			handle: Some(spawn(runner.run(msgs_rx, ticks_rx, snapshot_tx))),
		}
	}

	async fn request<T>(
		&self,
		msg: impl FnOnce(oneshot::Sender<T>) -> ContextMessage,
	) -> Result<T, Error> {
		let (ack_tx, ack_rx) = oneshot::channel();

		self.msgs_tx
			.send(msg(ack_tx))
			.await
			.map_err(|_| Error::ContextClosed)?;

		ack_rx.await.map_err(|_| Error::ContextClosed)
	}

	/// A manual click on the money clicker, queued for the next batch
	pub async fn manual_click(&self, kind: ClickKind) -> Result<(), Error> {
		self.request(|ack| ContextMessage::Click {
			kind,
			batched: true,
			ack,
		})
		.await
	}

	/// A manual click sent on its own, with the current combo multiplier
	pub async fn single_click(&self, kind: ClickKind) -> Result<(), Error> {
		self.request(|ack| ContextMessage::Click {
			kind,
			batched: false,
			ack,
		})
		.await
	}

	pub async fn break_combo(&self) -> Result<(), Error> {
		self.request(ContextMessage::BreakCombo).await
	}

	/// Returns `false` when the click was ignored because the previous one is still in flight
	pub async fn case_click(&self) -> Result<bool, Error> {
		self.request(ContextMessage::CaseClick).await
	}

	pub async fn batch_case_clicks(&self, count: u32) -> Result<(), Error> {
		self.request(|ack| ContextMessage::BatchCaseClicks { count, ack })
			.await
	}

	/// Buys one level of `kind`, returning the cost of the next level when the server reports it
	pub async fn purchase_upgrade(&self, kind: UpgradeKind) -> Result<Option<Decimal>, Error> {
		self.request(|ack| ContextMessage::PurchaseUpgrade { kind, ack })
			.await?
			.map_err(Into::into)
	}

	pub async fn set_surface(&self, surface: Surface) -> Result<(), Error> {
		self.request(|ack| ContextMessage::SetSurface { surface, ack })
			.await
	}

	/// Fetches user data now, unless a fetch is already in flight
	pub async fn refresh(&self) -> Result<(), Error> {
		self.request(ContextMessage::Refresh).await
	}

	#[must_use]
	pub fn snapshot(&self) -> Snapshot {
		self.snapshot_rx.borrow().clone()
	}

	/// Receiver that is notified every time the context state changes
	#[must_use]
	pub fn watch(&self) -> watch::Receiver<Snapshot> {
		self.snapshot_rx.clone()
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
		self.events_tx.subscribe()
	}

	/// Stops generating, releases ownership if held and waits for the context task to end
	pub async fn dispose(mut self) -> Result<(), Error> {
		let res = self
			.request(ContextMessage::ShutdownRequest)
			.await
			.and_then(|res| res);

		if let Some(handle) = self.handle.take() {
			if let Err(e) = handle.await {
				error!("Clicker context task failed to join: {e:#?}");
			}
		}

		res
	}
}
