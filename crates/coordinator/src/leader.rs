//! Leader coordinator.
//!
//! Elects at most one execution context to run the tick generator, using the heartbeat registry as
//! a last-write-wins ownership record. There is no lock: when two contexts claim a stale record at
//! the same time the last writer wins, and the loser notices on its next renewal and stops its
//! generator. Double generation is therefore bounded by one renewal period.

use std::{sync::Arc, time::Duration};

use cc_heartbeat::{Clock, HeartbeatRegistry, OwnerToken, OwnershipRecord};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::{
	error::Error,
	generator::{Generator, Tick},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeaderState {
	Idle,
	Attempting,
	Owning {
		#[serde(skip)]
		token: OwnerToken,
		level: u32,
	},
}

impl LeaderState {
	#[must_use]
	pub const fn is_owning(&self) -> bool {
		matches!(self, Self::Owning { .. })
	}
}

#[derive(Debug)]
pub struct LeaderCoordinator {
	registry: HeartbeatRegistry,
	clock: Arc<dyn Clock>,
	generator: Generator,
	stale_threshold: Duration,
	state: LeaderState,
	desired_level: u32,
}

impl LeaderCoordinator {
	#[must_use]
	pub fn new(
		registry: HeartbeatRegistry,
		clock: Arc<dyn Clock>,
		generator: Generator,
		stale_threshold: Duration,
	) -> Self {
		Self {
			registry,
			clock,
			generator,
			stale_threshold,
			state: LeaderState::Idle,
			desired_level: 0,
		}
	}

	#[must_use]
	pub const fn state(&self) -> LeaderState {
		self.state
	}

	/// Level this context wants to generate at, kept while waiting for a fresh owner to go away
	#[must_use]
	pub const fn desired_level(&self) -> u32 {
		self.desired_level
	}

	/// Whether `tick` must be processed: we own the generator and the tick is from its schedule
	#[must_use]
	pub fn accepts(&self, tick: Tick) -> bool {
		self.state.is_owning() && self.generator.accepts(tick)
	}

	/// Claims ownership and starts generating at `level`, unless another context holds a fresh claim.
	///
	/// Level 0 releases instead. While already owning, only the generator is restarted.
	#[instrument(skip(self), fields(state = ?self.state))]
	pub async fn try_acquire(&mut self, level: u32) -> Result<LeaderState, Error> {
		if level == 0 {
			self.release_if_owner().await?;
			return Ok(self.state);
		}

		self.desired_level = level;

		if let LeaderState::Owning { token, .. } = self.state {
			return self.restart(token, level).await;
		}

		self.state = LeaderState::Attempting;

		match self.claim(level).await {
			Ok(state) => {
				self.state = state;
				Ok(state)
			}
			Err(e) => {
				self.generator.stop().await;
				self.state = LeaderState::Idle;
				Err(e)
			}
		}
	}

	async fn claim(&mut self, level: u32) -> Result<LeaderState, Error> {
		let now = self.clock.now_millis();

		if let Some(record) = self.registry.read().await? {
			if record.is_fresh(now, self.stale_threshold) {
				debug!(
					owner = %record.owner,
					age_ms = record.age_ms(now),
					"Another context owns the auto-clicker"
				);
				return Ok(LeaderState::Idle);
			}
		}

		let token = OwnerToken::new();
		self.registry
			.write(&OwnershipRecord::new(token, now))
			.await?;

		// Last write wins, read back to find out whether it was ours
		match self.registry.read().await? {
			Some(record) if record.owner == token => {}
			other => {
				debug!(winner = ?other.map(|r| r.owner), "Lost the ownership race");
				return Ok(LeaderState::Idle);
			}
		}

		if !self.generator.start(level).await {
			self.clear_if_recorded(token).await?;
			return Ok(LeaderState::Idle);
		}

		info!(%token, level, "Acquired auto-clicker ownership");

		Ok(LeaderState::Owning { token, level })
	}

	async fn restart(&mut self, token: OwnerToken, level: u32) -> Result<LeaderState, Error> {
		if !self.generator.start(level).await {
			self.release_if_owner().await?;
			return Ok(self.state);
		}

		self.state = LeaderState::Owning { token, level };
		self.checkpoint(token).await?;

		debug!(level, "Restarted generator at new level");

		Ok(self.state)
	}

	/// Periodic ownership check.
	///
	/// The owner verifies its token is still the recorded one and refreshes its heartbeat, or
	/// stops generating if it was pre-empted. A context that wants to generate but doesn't own
	/// retries acquisition, taking over once the current owner's heartbeat goes stale.
	pub async fn renew(&mut self) -> Result<(), Error> {
		match self.state {
			LeaderState::Owning { token, level } => {
				match self.registry.read().await? {
					Some(record) if record.owner == token => self.checkpoint(token).await,
					other => {
						warn!(
							%token,
							level,
							new_owner = ?other.map(|r| r.owner),
							"Auto-clicker ownership was pre-empted, stopping generator"
						);
						self.generator.stop().await;
						self.state = LeaderState::Idle;
						Ok(())
					}
				}
			}

			LeaderState::Idle if self.desired_level > 0 => {
				self.try_acquire(self.desired_level).await.map(|_| ())
			}

			LeaderState::Idle | LeaderState::Attempting => Ok(()),
		}
	}

	/// Refreshes our heartbeat
	async fn checkpoint(&self, token: OwnerToken) -> Result<(), Error> {
		let now = self.clock.now_millis();
		self.registry.touch(now).await?;

		debug!(%token, now, "Heartbeat");

		Ok(())
	}

	/// Stops generating and gives up ownership, deleting the record only if it is still ours
	#[instrument(skip(self), fields(state = ?self.state))]
	pub async fn release_if_owner(&mut self) -> Result<(), Error> {
		self.generator.stop().await;
		self.desired_level = 0;

		let state = std::mem::replace(&mut self.state, LeaderState::Idle);

		if let LeaderState::Owning { token, .. } = state {
			self.clear_if_recorded(token).await?;
			info!(%token, "Released auto-clicker ownership");
		}

		Ok(())
	}

	async fn clear_if_recorded(&self, token: OwnerToken) -> Result<(), Error> {
		match self.registry.read().await? {
			Some(record) if record.owner == token => self.registry.clear().await?,
			_ => debug!(%token, "Ownership record belongs to someone else, leaving it"),
		}

		Ok(())
	}

	/// Releases ownership and ends the generator task
	pub async fn shutdown(&mut self) -> Result<(), Error> {
		let res = self.release_if_owner().await;
		self.generator.shutdown().await;
		res
	}
}

#[cfg(test)]
mod tests {
	use async_channel as chan;
	use cc_heartbeat::{KeyValueStore, MemoryStore, TokioClock};
	use futures::future::join_all;
	use tokio::time::sleep;

	use super::*;

	const STALE: Duration = Duration::from_secs(2);

	struct Contender {
		leader: LeaderCoordinator,
		ticks_rx: chan::Receiver<Tick>,
	}

	fn contender(store: &Arc<MemoryStore>, clock: &Arc<TokioClock>) -> Contender {
		let (ticks_tx, ticks_rx) = chan::bounded(64);
		let store: Arc<dyn KeyValueStore> = Arc::clone(store) as _;

		Contender {
			leader: LeaderCoordinator::new(
				HeartbeatRegistry::new(store),
				Arc::clone(clock) as _,
				Generator::spawn(ticks_tx),
				STALE,
			),
			ticks_rx,
		}
	}

	fn registry(store: &Arc<MemoryStore>) -> HeartbeatRegistry {
		HeartbeatRegistry::new(Arc::clone(store) as _)
	}

	#[tokio::test(start_paused = true)]
	async fn simultaneous_claims_elect_exactly_one_owner() {
		let store = Arc::new(MemoryStore::default());
		let clock = Arc::new(TokioClock::new());

		let mut contenders = (0..5)
			.map(|_| contender(&store, &clock))
			.collect::<Vec<_>>();

		let states = join_all(
			contenders
				.iter_mut()
				.map(|contender| contender.leader.try_acquire(5)),
		)
		.await;

		let owners = states
			.iter()
			.filter(|state| matches!(state, Ok(LeaderState::Owning { .. })))
			.count();
		let idle = states
			.iter()
			.filter(|state| matches!(state, Ok(LeaderState::Idle)))
			.count();

		assert_eq!(owners, 1);
		assert_eq!(idle, 4);

		for mut contender in contenders {
			contender.leader.shutdown().await.unwrap();
		}
	}

	#[tokio::test(start_paused = true)]
	async fn fresh_claims_are_respected_and_stale_ones_taken_over() {
		let store = Arc::new(MemoryStore::default());
		let clock = Arc::new(TokioClock::new());
		let someone_else = OwnerToken::new();

		registry(&store)
			.write(&OwnershipRecord::new(someone_else, clock.now_millis() - 1_999))
			.await
			.unwrap();

		let mut contender = contender(&store, &clock);
		assert_eq!(
			contender.leader.try_acquire(3).await.unwrap(),
			LeaderState::Idle
		);

		// The same record one millisecond later is abandoned
		sleep(Duration::from_millis(1)).await;

		let state = contender.leader.try_acquire(3).await.unwrap();
		let LeaderState::Owning { token, level } = state else {
			panic!("expected ownership, got {state:?}");
		};
		assert_eq!(level, 3);
		assert_ne!(token, someone_else);
		assert_eq!(registry(&store).read().await.unwrap().unwrap().owner, token);

		contender.leader.shutdown().await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn pre_empted_owner_stops_generating_on_next_renewal() {
		let store = Arc::new(MemoryStore::default());
		let clock = Arc::new(TokioClock::new());
		let mut contender = contender(&store, &clock);

		assert!(contender.leader.try_acquire(10).await.unwrap().is_owning());

		sleep(Duration::from_millis(1_500)).await;
		let tick = contender.ticks_rx.try_recv().unwrap();
		assert!(contender.leader.accepts(tick));

		// Another context overwrote the record
		registry(&store)
			.write(&OwnershipRecord::new(OwnerToken::new(), clock.now_millis()))
			.await
			.unwrap();

		contender.leader.renew().await.unwrap();

		assert_eq!(contender.leader.state(), LeaderState::Idle);
		assert!(!contender.leader.accepts(tick));

		sleep(Duration::from_secs(5)).await;
		assert!(contender.ticks_rx.try_recv().is_err());

		contender.leader.shutdown().await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn renewal_keeps_the_heartbeat_fresh() {
		let store = Arc::new(MemoryStore::default());
		let clock = Arc::new(TokioClock::new());
		let mut owner = contender(&store, &clock);
		let mut standby = contender(&store, &clock);

		assert!(owner.leader.try_acquire(5).await.unwrap().is_owning());

		for _ in 0..5 {
			sleep(Duration::from_secs(1)).await;
			owner.leader.renew().await.unwrap();

			assert_eq!(
				standby.leader.try_acquire(5).await.unwrap(),
				LeaderState::Idle
			);
		}

		owner.leader.shutdown().await.unwrap();
		standby.leader.shutdown().await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn standby_takes_over_once_the_owner_goes_silent() {
		let store = Arc::new(MemoryStore::default());
		let clock = Arc::new(TokioClock::new());
		let mut owner = contender(&store, &clock);
		let mut standby = contender(&store, &clock);

		assert!(owner.leader.try_acquire(5).await.unwrap().is_owning());
		assert_eq!(
			standby.leader.try_acquire(5).await.unwrap(),
			LeaderState::Idle
		);
		assert_eq!(standby.leader.desired_level(), 5);

		// The owner stops renewing, as if its context had crashed
		sleep(Duration::from_secs(1)).await;
		standby.leader.renew().await.unwrap();
		assert_eq!(standby.leader.state(), LeaderState::Idle);

		sleep(Duration::from_secs(1)).await;
		standby.leader.renew().await.unwrap();
		assert!(standby.leader.state().is_owning());

		// The silent owner learns about it as soon as it renews again
		owner.leader.renew().await.unwrap();
		assert_eq!(owner.leader.state(), LeaderState::Idle);

		owner.leader.shutdown().await.unwrap();
		standby.leader.shutdown().await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn release_only_deletes_our_own_record() {
		let store = Arc::new(MemoryStore::default());
		let clock = Arc::new(TokioClock::new());
		let mut contender = contender(&store, &clock);

		assert!(contender.leader.try_acquire(5).await.unwrap().is_owning());

		let newer = OwnershipRecord::new(OwnerToken::new(), clock.now_millis());
		registry(&store).write(&newer).await.unwrap();

		contender.leader.release_if_owner().await.unwrap();
		assert_eq!(registry(&store).read().await.unwrap(), Some(newer));

		// Our own record does get removed
		registry(&store).clear().await.unwrap();
		assert!(contender.leader.try_acquire(5).await.unwrap().is_owning());
		contender.leader.release_if_owner().await.unwrap();

		assert_eq!(registry(&store).read().await.unwrap(), None);
		assert_eq!(contender.leader.state(), LeaderState::Idle);
		assert_eq!(contender.leader.desired_level(), 0);

		contender.leader.shutdown().await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn level_changes_restart_or_release() {
		let store = Arc::new(MemoryStore::default());
		let clock = Arc::new(TokioClock::new());
		let mut contender = contender(&store, &clock);

		let LeaderState::Owning { token, .. } = contender.leader.try_acquire(2).await.unwrap() else {
			panic!("expected ownership");
		};

		assert_eq!(
			contender.leader.try_acquire(12).await.unwrap(),
			LeaderState::Owning { token, level: 12 }
		);

		assert_eq!(
			contender.leader.try_acquire(0).await.unwrap(),
			LeaderState::Idle
		);
		assert_eq!(registry(&store).read().await.unwrap(), None);

		contender.leader.shutdown().await.unwrap();
	}
}
