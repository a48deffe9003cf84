//! Synthetic event generator.
//!
//! Runs on its own task and owns its own timer, the only way in or out are channel messages:
//! `Start`/`Stop` commands inbound and [`Tick`]s outbound. Every successful start gets a fresh
//! epoch, ticks carry the epoch that produced them so the receiving side can drop late ticks that
//! were already in flight when the generator was stopped or restarted.

use std::{panic::panic_any, time::Duration};

use async_channel as chan;
use futures::FutureExt;
use futures_concurrency::future::Race;
use tokio::{
	spawn,
	sync::oneshot,
	task::JoinHandle,
	time::{interval_at, timeout, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, error, trace, warn};

const ONE_MINUTE: Duration = Duration::from_secs(60);

/// Levels up to 9 tick once every `10 / level` seconds, every level above adds one tick per second
#[must_use]
pub fn ticks_per_second(level: u32) -> f64 {
	if level <= 9 {
		f64::from(level) * 0.1
	} else {
		f64::from(level - 9)
	}
}

/// Time between two ticks at `level`, `None` when the level must not start a timer at all
#[must_use]
pub fn tick_interval(level: u32) -> Option<Duration> {
	let rate = ticks_per_second(level);

	if !rate.is_finite() || rate <= 0.0 {
		return None;
	}

	Duration::try_from_secs_f64(1.0 / rate)
		.ok()
		.filter(|period| !period.is_zero())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
	pub epoch: u64,
}

#[derive(Debug)]
enum Command {
	Start {
		period: Duration,
		epoch: u64,
		ack: oneshot::Sender<()>,
	},
	Stop {
		ack: oneshot::Sender<()>,
	},
}

/// Handle to the generator task. Dropping it closes the command channel, which ends the task.
#[derive(Debug)]
pub struct Generator {
	commands_tx: chan::Sender<Command>,
	handle: Option<JoinHandle<()>>,
	active_epoch: Option<u64>,
	next_epoch: u64,
	level: u32,
}

impl Generator {
	#[must_use]
	pub fn spawn(ticks_tx: chan::Sender<Tick>) -> Self {
		let (commands_tx, commands_rx) = chan::bounded(4);

		Self {
			commands_tx,
			handle: Some(spawn(run(commands_rx, ticks_tx))),
			active_epoch: None,
			next_epoch: 0,
			level: 0,
		}
	}

	#[must_use]
	pub const fn is_running(&self) -> bool {
		self.active_epoch.is_some()
	}

	/// Level of the running schedule, 0 when stopped
	#[must_use]
	pub const fn level(&self) -> u32 {
		self.level
	}

	/// Whether `tick` belongs to the schedule that is currently running
	#[must_use]
	pub fn accepts(&self, tick: Tick) -> bool {
		self.active_epoch == Some(tick.epoch)
	}

	/// (Re)starts the generator at `level`, replacing any running schedule.
	///
	/// Returns `false` without starting anything when `level` has no usable tick rate.
	pub async fn start(&mut self, level: u32) -> bool {
		// Whatever happens next, ticks from the previous schedule are no longer welcome
		self.active_epoch = None;

		let Some(period) = tick_interval(level) else {
			debug!(level, "Level has no tick rate, generator stays stopped");
			self.stop_schedule().await;
			return false;
		};

		let epoch = self.next_epoch;
		self.next_epoch += 1;

		let (ack_tx, ack_rx) = oneshot::channel();

		if self
			.commands_tx
			.send(Command::Start {
				period,
				epoch,
				ack: ack_tx,
			})
			.await
			.is_err() || ack_rx.await.is_err()
		{
			error!("Tick generator task is gone, unable to start it");
			self.level = 0;
			return false;
		}

		self.active_epoch = Some(epoch);
		self.level = level;

		debug!(level, ?period, epoch, "Tick generator started");

		true
	}

	/// Stops the running schedule, no tick produced by it is accepted after this returns
	pub async fn stop(&mut self) {
		if self.active_epoch.take().is_some() {
			self.stop_schedule().await;
			debug!("Tick generator stopped");
		}
	}

	async fn stop_schedule(&mut self) {
		self.level = 0;

		let (ack_tx, ack_rx) = oneshot::channel();

		if self
			.commands_tx
			.send(Command::Stop { ack: ack_tx })
			.await
			.is_err() || ack_rx.await.is_err()
		{
			warn!("Tick generator task is gone while stopping it");
		}
	}

	/// Ends the generator task, waiting for it to finish or aborting it after a minute
	pub async fn shutdown(&mut self) {
		self.active_epoch = None;
		self.level = 0;
		self.commands_tx.close();
		wait_stop_or_abort(self.handle.take()).await;
	}
}

impl Drop for Generator {
	fn drop(&mut self) {
		self.commands_tx.close();
	}
}

async fn run(commands_rx: chan::Receiver<Command>, ticks_tx: chan::Sender<Tick>) {
	enum Event {
		Command(Result<Command, chan::RecvError>),
		Tick,
	}

	let mut schedule: Option<(u64, Interval)> = None;

	loop {
		let event = match schedule.as_mut() {
			Some((_, interval)) => {
				(
					commands_rx.recv().map(Event::Command),
					interval.tick().map(|_| Event::Tick),
				)
					.race()
					.await
			}
			None => Event::Command(commands_rx.recv().await),
		};

		match event {
			Event::Command(Ok(Command::Start { period, epoch, ack })) => {
				// The first tick is one full period away, never immediate
				let mut interval = interval_at(Instant::now() + period, period);
				interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
				schedule = Some((epoch, interval));

				if ack.send(()).is_err() {
					warn!("Generator start acknowledgement dropped");
				}
			}

			Event::Command(Ok(Command::Stop { ack })) => {
				schedule = None;

				if ack.send(()).is_err() {
					warn!("Generator stop acknowledgement dropped");
				}
			}

			Event::Command(Err(chan::RecvError)) => {
				trace!("Generator command channel closed, exiting");
				break;
			}

			Event::Tick => {
				let Some((epoch, _)) = &schedule else {
					continue;
				};

				match ticks_tx.try_send(Tick { epoch: *epoch }) {
					Ok(()) => trace!(epoch, "Tick"),
					Err(chan::TrySendError::Full(_)) => {
						debug!(epoch, "Tick receiver is lagging, dropping tick");
					}
					Err(chan::TrySendError::Closed(_)) => {
						trace!("Tick receiver gone, exiting");
						break;
					}
				}
			}
		}
	}
}

async fn wait_stop_or_abort(maybe_handle: Option<JoinHandle<()>>) {
	if let Some(handle) = maybe_handle {
		let abort_handle = handle.abort_handle();

		match timeout(ONE_MINUTE, handle).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => {
				if e.is_panic() {
					error!("Tick generator unexpectedly panicked, we will pop up the panic!");
					panic_any(e.into_panic());
				}
			}
			Err(_) => {
				error!("Tick generator failed to stop in the allotted time, will force abortion");
				abort_handle.abort();
			}
		}
	}
}
