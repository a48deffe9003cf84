use std::{fmt, future::Future, pin::pin, sync::Arc, time::Duration};

use async_channel as chan;
use cc_gateway::{
	BatchCaseClickRequest, CaseClickRequest, CaseProgress, ClickRequest, Gateway,
	PurchaseReceipt, UserPayload,
};
use cc_heartbeat::Clock;
use futures::{stream, FutureExt, StreamExt};
use futures_concurrency::{future::Race, stream::Merge};
use rand::Rng;
use rust_decimal::Decimal;
use tokio::{
	spawn,
	sync::{broadcast, oneshot, watch},
	time::{interval_at, sleep_until, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, info, trace, warn};

use super::{
	super::{
		aggregator::{ClickAggregator, ClickKind},
		config::CoordinatorConfig,
		generator::Tick,
		leader::{LeaderCoordinator, LeaderState},
		reconciler::StateReconciler,
		session::ClickerSession,
	},
	ContextEvent, ContextMessage, Snapshot, Surface,
};

/// Network results coming back to the context task
enum Completion {
	UserData(Result<UserPayload, cc_gateway::Error>),
	Click(Result<UserPayload, cc_gateway::Error>),
	Flush(Result<UserPayload, cc_gateway::Error>),
	CaseClick {
		batched: bool,
		count: u32,
		result: Result<CaseProgress, cc_gateway::Error>,
	},
	Purchase {
		result: Result<PurchaseReceipt, cc_gateway::Error>,
		ack: oneshot::Sender<Result<Option<Decimal>, cc_gateway::Error>>,
	},
}

pub(super) struct Runner {
	config: CoordinatorConfig,
	gateway: Arc<dyn Gateway>,
	clock: Arc<dyn Clock>,
	leader: LeaderCoordinator,
	aggregator: ClickAggregator,
	session: ClickerSession,
	reconciler: StateReconciler,
	surface: Surface,
	last_error: Option<String>,
	is_syncing: bool,
	case_click_in_flight: bool,
	/// When the next age-based flush check runs
	flush_check_at: Instant,
	completions_tx: chan::Sender<Completion>,
	completions_rx: chan::Receiver<Completion>,
	events_tx: broadcast::Sender<ContextEvent>,
}

impl Runner {
	pub(super) fn new(
		config: CoordinatorConfig,
		gateway: Arc<dyn Gateway>,
		clock: Arc<dyn Clock>,
		leader: LeaderCoordinator,
		events_tx: broadcast::Sender<ContextEvent>,
	) -> Self {
		let (completions_tx, completions_rx) = chan::unbounded();
		let flush_check_at = Instant::now() + config.flush_interval();

		Self {
			aggregator: ClickAggregator::new(
				config.batch_size_threshold,
				config.flush_interval(),
				clock.now_millis(),
			),
			config,
			gateway,
			clock,
			leader,
			session: ClickerSession::default(),
			reconciler: StateReconciler::new(),
			surface: Surface::default(),
			last_error: None,
			is_syncing: false,
			case_click_in_flight: false,
			flush_check_at,
			completions_tx,
			completions_rx,
			events_tx,
		}
	}

	pub(super) fn snapshot(&self) -> Snapshot {
		Snapshot {
			user: self.reconciler.user().clone(),
			derived: *self.reconciler.derived(),
			session: self.session.clone(),
			queued: self.aggregator.queued(),
			last_flush_at_ms: self.aggregator.last_flush_at_ms(),
			leader: self.leader.state(),
			surface: self.surface,
			last_error: self.last_error.clone(),
		}
	}

	pub(super) async fn run(
		mut self,
		msgs_rx: chan::Receiver<ContextMessage>,
		ticks_rx: chan::Receiver<Tick>,
		snapshot_tx: watch::Sender<Snapshot>,
	) {
		enum StreamMessage {
			Commands(ContextMessage),
			HandlesGone,
			Tick(Tick),
			Completed(Completion),
			Renew,
			FlushCheck,
		}

		let renew_period = self.config.renew_period();
		let mut renew_interval = interval_at(Instant::now() + renew_period, renew_period);
		renew_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

		let mut msg_stream = pin!((
			msgs_rx
				.map(StreamMessage::Commands)
				.chain(stream::once(async { StreamMessage::HandlesGone })),
			ticks_rx.map(StreamMessage::Tick),
			self.completions_rx.clone().map(StreamMessage::Completed),
			IntervalStream::new(renew_interval).map(|_| StreamMessage::Renew),
		)
			.merge());

		// Re-armed from the last flush instead of ticking on a fixed grid
		let mut flush_check = pin!(sleep_until(self.flush_check_at));

		self.sync_user_data();

		let mut shutdown_ack = None;

		loop {
			if flush_check.deadline() != self.flush_check_at {
				flush_check.as_mut().reset(self.flush_check_at);
			}

			let Some(msg) = (
				msg_stream.next(),
				flush_check
					.as_mut()
					.map(|()| Some(StreamMessage::FlushCheck)),
			)
				.race()
				.await
			else {
				break;
			};

			match msg {
				StreamMessage::Commands(ContextMessage::ShutdownRequest(ack)) => {
					shutdown_ack = Some(ack);
					break;
				}

				StreamMessage::Commands(msg) => self.handle_message(msg).await,

				StreamMessage::HandlesGone => {
					debug!("Every context handle was dropped, shutting down");
					break;
				}

				StreamMessage::Tick(tick) => self.handle_tick(tick),

				StreamMessage::Completed(completion) => self.handle_completion(completion).await,

				StreamMessage::Renew => self.renew().await,

				StreamMessage::FlushCheck => {
					self.maybe_flush();
					self.schedule_flush_check();

					if self
						.reconciler
						.is_stale(self.clock.now_millis(), self.config.state_max_age())
					{
						self.sync_user_data();
					}
				}
			}

			snapshot_tx.send_replace(self.snapshot());
		}

		let res = self.leader.shutdown().await;
		if let Err(e) = &res {
			warn!(?e, "Failed to release auto-clicker ownership while shutting down");
		}

		snapshot_tx.send_replace(self.snapshot());

		info!("Clicker context stopped");

		if let Some(ack) = shutdown_ack {
			if ack.send(res).is_err() {
				trace!("Shutdown requester is gone");
			}
		}
	}

	async fn handle_message(&mut self, msg: ContextMessage) {
		match msg {
			ContextMessage::Click {
				kind,
				batched,
				ack,
			} => {
				let multiplier = self.session.current_multiplier;
				let derived = *self.reconciler.derived();

				if self.session.register_click(&derived) {
					debug!(multiplier = self.session.current_multiplier, "Combo multiplier raised");
				}

				if batched {
					self.aggregator.enqueue_manual(kind);
					self.maybe_flush();
				} else {
					let req = ClickRequest {
						multiplier,
						is_crit: kind.is_critical(),
					};

					self.dispatch(move |gateway| async move {
						Completion::Click(gateway.click(req).await)
					});
				}

				reply(ack, ());
			}

			ContextMessage::BreakCombo(ack) => {
				self.session.break_combo();
				reply(ack, ());
			}

			ContextMessage::CaseClick(ack) => {
				if self.case_click_in_flight {
					trace!("Case click ignored, previous one still in flight");
					reply(ack, false);
					return;
				}

				self.case_click_in_flight = true;
				self.session.pending_clicks = self.session.pending_clicks.saturating_add(1);

				let req = CaseClickRequest {
					current_progress: self.session.last_progress,
				};

				self.dispatch(move |gateway| async move {
					Completion::CaseClick {
						batched: false,
						count: 1,
						result: gateway.case_click(req).await,
					}
				});

				reply(ack, true);
			}

			ContextMessage::BatchCaseClicks { count, ack } => {
				if count > 0 {
					self.session.pending_clicks = self.session.pending_clicks.saturating_add(count);

					let req = BatchCaseClickRequest {
						click_count: count,
						current_progress: self.session.last_progress,
					};

					self.dispatch(move |gateway| async move {
						Completion::CaseClick {
							batched: true,
							count,
							result: gateway.batch_case_click(req).await,
						}
					});
				}

				reply(ack, ());
			}

			ContextMessage::PurchaseUpgrade { kind, ack } => {
				self.dispatch(move |gateway| async move {
					Completion::Purchase {
						result: gateway.purchase_upgrade(kind).await,
						ack,
					}
				});
			}

			ContextMessage::SetSurface { surface, ack } => {
				let was_clicker = self.surface.is_clicker();
				self.surface = surface;

				if was_clicker != surface.is_clicker() {
					debug!(?surface, "Surface changed");
					self.reevaluate_auto_clicker().await;
				}

				reply(ack, ());
			}

			ContextMessage::Refresh(ack) => {
				self.sync_user_data();
				reply(ack, ());
			}

			// Intercepted by the main loop
			ContextMessage::ShutdownRequest(_) => {}
		}
	}

	fn handle_tick(&mut self, tick: Tick) {
		if !self.leader.accepts(tick) {
			trace!(?tick, "Dropping tick from a stopped schedule");
			return;
		}

		if !self.surface.is_clicker() {
			trace!(?tick, "Dropping tick, clicker is not on screen");
			return;
		}

		let critical = roll_critical(self.reconciler.user().upgrades.critical_chance());
		self.aggregator.enqueue_auto(ClickKind::from_critical(critical));

		let mut value = self.reconciler.derived().base_click_value;
		if critical {
			value *= f64::from(self.config.critical_multiplier);
		}

		self.emit(ContextEvent::AutoClick { value, critical });
		self.maybe_flush();
	}

	async fn handle_completion(&mut self, completion: Completion) {
		match completion {
			Completion::UserData(result) => {
				self.is_syncing = false;

				match result {
					Ok(payload) => self.apply(&payload).await,
					Err(e) => self.report("fetch user data", &e),
				}
			}

			Completion::Click(result) => match result {
				Ok(payload) => self.apply(&payload).await,
				Err(e) => self.report("send click", &e),
			},

			Completion::Flush(result) => {
				let retry = match result {
					Ok(payload) => {
						let retry = self.aggregator.complete_flush(true);
						self.apply(&payload).await;
						retry
					}
					Err(e) => {
						self.report("flush clicks", &e);
						self.aggregator.complete_flush(false)
					}
				};

				if retry {
					self.maybe_flush();
				}
			}

			Completion::CaseClick {
				batched,
				count,
				result,
			} => {
				if !batched {
					self.case_click_in_flight = false;
				}

				self.session.pending_clicks = self.session.pending_clicks.saturating_sub(count);

				match result {
					Ok(progress) => {
						self.session.confirm_progress(progress.progress);
						self.last_error = None;

						for case in progress.earned() {
							info!(name = %case.name, "Case earned");
							self.emit(ContextEvent::CaseEarned(case.clone()));
						}
					}
					Err(e) => self.report("click case", &e),
				}
			}

			Completion::Purchase { result, ack } => {
				let res = match result {
					Ok(receipt) => {
						self.apply(&receipt.payload).await;
						Ok(receipt.next_cost)
					}
					Err(e) => {
						self.report("purchase upgrade", &e);
						Err(e)
					}
				};

				reply(ack, res);
			}
		}
	}

	/// Merges a server payload and reacts to whatever it changed
	async fn apply(&mut self, payload: &UserPayload) {
		let outcome = self.reconciler.merge(payload, self.clock.now_millis());

		self.last_error = None;

		if let Some(rank) = outcome.rank_up {
			self.emit(ContextEvent::RankUp { rank });
		}

		if outcome.upgrades_changed {
			let derived = *self.reconciler.derived();
			self.session.apply_limits(&derived);
		}

		if let Some(progress) = outcome.case_progress {
			self.session.confirm_progress(progress);
		}

		if let Some((previous, current)) = outcome.auto_clicker {
			debug!(previous, current, "Auto-clicker level changed");
			self.reevaluate_auto_clicker().await;
		}
	}

	/// Generates at the current level while on the clicker surface, releases otherwise
	async fn reevaluate_auto_clicker(&mut self) {
		let level = self.reconciler.user().upgrades.auto_clicker;
		let before = self.leader.state();

		let res = if level > 0 && self.surface.is_clicker() {
			self.leader.try_acquire(level).await.map(|_| ())
		} else {
			self.leader.release_if_owner().await
		};

		if let Err(e) = res {
			self.report("update auto-clicker ownership", &e);
		}

		self.notify_leadership(before);
	}

	async fn renew(&mut self) {
		let before = self.leader.state();

		if let Err(e) = self.leader.renew().await {
			warn!(?e, "Failed to renew auto-clicker ownership");
		}

		self.notify_leadership(before);
	}

	fn maybe_flush(&mut self) {
		if let Some(batch) = self.aggregator.begin_flush(self.clock.now_millis()) {
			self.flush_check_at = Instant::now() + self.config.flush_interval();

			self.dispatch(move |gateway| async move {
				Completion::Flush(gateway.batch_click(batch).await)
			});
		}
	}

	/// Next check lands when the age trigger is due, or a full interval away if it already is
	fn schedule_flush_check(&mut self) {
		let wait = if self.aggregator.is_flushing() {
			None
		} else {
			self.aggregator
				.until_age_trigger(self.clock.now_millis())
				.map(Duration::from_millis)
		};

		self.flush_check_at = Instant::now() + wait.unwrap_or_else(|| self.config.flush_interval());
	}

	fn sync_user_data(&mut self) {
		if self.is_syncing {
			trace!("User data fetch already in flight");
			return;
		}

		self.is_syncing = true;

		self.dispatch(|gateway| async move { Completion::UserData(gateway.user_data().await) });
	}

	/// Runs a gateway call on its own task, its result comes back as a [`Completion`]
	fn dispatch<F, Fut>(&self, request: F)
	where
		F: FnOnce(Arc<dyn Gateway>) -> Fut,
		Fut: Future<Output = Completion> + Send + 'static,
	{
		let fut = request(Arc::clone(&self.gateway));
		let completions_tx = self.completions_tx.clone();

		spawn(async move {
			if completions_tx.send(fut.await).await.is_err() {
				trace!("Context stopped before the request completed");
			}
		});
	}

	fn notify_leadership(&self, before: LeaderState) {
		let after = self.leader.state();

		if after != before {
			self.emit(ContextEvent::LeadershipChanged(after));
		}
	}

	fn emit(&self, event: ContextEvent) {
		if self.events_tx.send(event).is_err() {
			trace!("No event subscribers");
		}
	}

	fn report(&mut self, action: &str, e: &impl fmt::Display) {
		warn!("Failed to {action}: {e}");
		self.last_error = Some(format!("failed to {action}: {e}"));
	}
}

fn roll_critical(chance: f64) -> bool {
	chance > 0.0 && rand::thread_rng().gen_bool(chance)
}

fn reply<T>(ack: oneshot::Sender<T>, value: T) {
	if ack.send(value).is_err() {
		trace!("Caller stopped waiting for the reply");
	}
}
