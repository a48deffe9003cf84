//! Client-side mirror of the user's progress, mutated only by merging server payloads.

use std::time::Duration;

use cc_gateway::{ItemRef, UpgradeLevels, UserPayload};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpgradeSet {
	pub click_value: u32,
	pub max_multiplier: u32,
	pub auto_clicker: u32,
	pub combo_speed: u32,
	pub critical_strike: u32,
	pub progress_per_click: u32,
	pub case_quality: u32,
	pub multi_open: u32,
}

impl Default for UpgradeSet {
	fn default() -> Self {
		Self {
			click_value: 1,
			max_multiplier: 1,
			auto_clicker: 0,
			combo_speed: 1,
			critical_strike: 0,
			progress_per_click: 1,
			case_quality: 1,
			multi_open: 1,
		}
	}
}

impl UpgradeSet {
	/// Overwrites every level present in `levels`, returns whether anything changed
	pub fn apply(&mut self, levels: &UpgradeLevels) -> bool {
		let before = *self;

		let UpgradeLevels {
			click_value,
			max_multiplier,
			auto_clicker,
			combo_speed,
			critical_strike,
			progress_per_click,
			case_quality,
			multi_open,
		} = *levels;

		for (slot, level) in [
			(&mut self.click_value, click_value),
			(&mut self.max_multiplier, max_multiplier),
			(&mut self.auto_clicker, auto_clicker),
			(&mut self.combo_speed, combo_speed),
			(&mut self.critical_strike, critical_strike),
			(&mut self.progress_per_click, progress_per_click),
			(&mut self.case_quality, case_quality),
			(&mut self.multi_open, multi_open),
		] {
			if let Some(level) = level {
				*slot = level;
			}
		}

		before != *self
	}

	/// Probability in `[0, 1]` that an auto tick is a critical hit
	#[must_use]
	pub fn critical_chance(&self) -> f64 {
		(f64::from(self.critical_strike) / 100.0).clamp(0.0, 1.0)
	}
}

/// Clicker parameters that are pure functions of the upgrade levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedParams {
	pub base_click_value: f64,
	pub clicks_to_combo: u32,
	pub max_multiplier: f64,
}

impl DerivedParams {
	#[must_use]
	pub fn from_upgrades(upgrades: &UpgradeSet) -> Self {
		Self {
			base_click_value: 0.01 * 1.5_f64.powf(f64::from(upgrades.click_value) - 1.0),
			clicks_to_combo: 21_u32.saturating_sub(upgrades.combo_speed).max(1),
			max_multiplier: 0.5_f64.mul_add(f64::from(upgrades.max_multiplier) - 1.0, 1.5),
		}
	}
}

impl Default for DerivedParams {
	fn default() -> Self {
		Self::from_upgrades(&UpgradeSet::default())
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserState {
	pub rank: u32,
	pub experience: u64,
	pub balance: Decimal,
	pub inventory: Vec<ItemRef>,
	pub upgrades: UpgradeSet,
	pub last_synced_at_ms: Option<i64>,
}

/// What a merge changed that the rest of the context has to react to
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MergeOutcome {
	/// `(previous, new)` auto-clicker level, only when it actually changed
	pub auto_clicker: Option<(u32, u32)>,
	pub upgrades_changed: bool,
	/// New rank, only when it went up
	pub rank_up: Option<u32>,
	pub case_progress: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct StateReconciler {
	user: UserState,
	derived: DerivedParams,
}

impl StateReconciler {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub const fn user(&self) -> &UserState {
		&self.user
	}

	#[must_use]
	pub const fn derived(&self) -> &DerivedParams {
		&self.derived
	}

	/// Whether the mirror was never synced or is older than `max_age`
	#[must_use]
	pub fn is_stale(&self, now_ms: i64, max_age: Duration) -> bool {
		self.user.last_synced_at_ms.map_or(true, |synced_at| {
			let max_age = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
			now_ms.saturating_sub(synced_at) > max_age
		})
	}

	/// Applies every field present in `payload`, leaving absent ones untouched.
	///
	/// A rank lower than the current one or a negative balance are rejected, the server is the
	/// authority on both but neither may ever move that way locally.
	pub fn merge(&mut self, payload: &UserPayload, now_ms: i64) -> MergeOutcome {
		let mut outcome = MergeOutcome::default();

		if payload.is_empty() {
			return outcome;
		}

		if let Some(rank) = payload.rank {
			if rank >= self.user.rank {
				if rank > self.user.rank {
					outcome.rank_up = Some(rank);
				}
				self.user.rank = rank;
			} else {
				warn!(
					current = self.user.rank,
					received = rank,
					"Ignoring rank regression from server"
				);
			}
		}

		if let Some(exp) = payload.exp {
			self.user.experience = exp;
		}

		if let Some(balance) = payload.balance {
			if balance.is_sign_negative() && !balance.is_zero() {
				warn!(%balance, "Ignoring negative balance from server");
			} else {
				self.user.balance = balance;
			}
		}

		if let Some(inventory) = &payload.inventory {
			self.user.inventory.clone_from(inventory);
		}

		if let Some(levels) = &payload.upgrades {
			let previous_auto_clicker = self.user.upgrades.auto_clicker;

			if self.user.upgrades.apply(levels) {
				outcome.upgrades_changed = true;
				self.derived = DerivedParams::from_upgrades(&self.user.upgrades);

				debug!(upgrades = ?self.user.upgrades, derived = ?self.derived, "Upgrades changed");
			}

			if previous_auto_clicker != self.user.upgrades.auto_clicker {
				outcome.auto_clicker = Some((previous_auto_clicker, self.user.upgrades.auto_clicker));
			}
		}

		outcome.case_progress = payload.case_progress;

		self.user.last_synced_at_ms = Some(now_ms);

		outcome
	}
}
