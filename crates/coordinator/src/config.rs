use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and sizing knobs of one execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
	/// Maximum heartbeat age before an ownership claim is considered abandoned
	pub stale_threshold_ms: u64,
	/// How often the owner re-checks and refreshes its heartbeat
	pub renew_period_ms: u64,
	/// Queued clicks that force a batch flush
	pub batch_size_threshold: u32,
	/// Maximum time queued clicks wait before a batch flush
	pub flush_interval_ms: u64,
	/// Local state older than this is fetched again from the server
	pub state_max_age_ms: u64,
	/// Value multiplier of a critical click
	pub critical_multiplier: u32,
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			stale_threshold_ms: 2_000,
			renew_period_ms: 1_000,
			batch_size_threshold: 10,
			flush_interval_ms: 1_000,
			state_max_age_ms: 5_000,
			critical_multiplier: 4,
		}
	}
}

impl CoordinatorConfig {
	#[must_use]
	pub const fn stale_threshold(&self) -> Duration {
		Duration::from_millis(self.stale_threshold_ms)
	}

	#[must_use]
	pub const fn renew_period(&self) -> Duration {
		Duration::from_millis(self.renew_period_ms)
	}

	#[must_use]
	pub const fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}

	#[must_use]
	pub const fn state_max_age(&self) -> Duration {
		Duration::from_millis(self.state_max_age_ms)
	}
}
