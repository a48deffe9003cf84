use std::fmt;

use chrono::Utc;
use tokio::time::Instant;

/// Source of wall-clock milliseconds since the Unix epoch.
///
/// Heartbeats are compared across contexts (and across processes when the registry lives on disk),
/// so every implementation must stay anchored to real wall-clock time.
pub trait Clock: fmt::Debug + Send + Sync + 'static {
	fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_millis(&self) -> i64 {
		Utc::now().timestamp_millis()
	}
}

/// Wall clock sampled once at creation and then advanced by tokio's monotonic clock.
///
/// Under `tokio::time::pause` this clock only moves when tokio's time does, which keeps heartbeat
/// ages in lockstep with the intervals that produce them.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
	anchor_millis: i64,
	anchor: Instant,
}

impl TokioClock {
	#[must_use]
	pub fn new() -> Self {
		Self {
			anchor_millis: Utc::now().timestamp_millis(),
			anchor: Instant::now(),
		}
	}
}

impl Default for TokioClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for TokioClock {
	fn now_millis(&self) -> i64 {
		let elapsed = i64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
		self.anchor_millis.saturating_add(elapsed)
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[tokio::test(start_paused = true)]
	async fn tokio_clock_follows_paused_time() {
		let clock = TokioClock::new();
		let before = clock.now_millis();

		tokio::time::advance(Duration::from_millis(2_500)).await;

		assert_eq!(clock.now_millis() - before, 2_500);
	}

	#[test]
	fn system_clock_is_after_2020() {
		assert!(SystemClock.now_millis() > 1_577_836_800_000);
	}
}
