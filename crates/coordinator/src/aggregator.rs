//! Click aggregator.
//!
//! Accumulates manual and auto clicks and decides when to send them as one batch. The aggregator
//! itself is plain state, the owning context performs the request and reports the outcome back.

use std::time::Duration;

use cc_gateway::BatchClickRequest;
use serde::Serialize;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClickKind {
	Normal,
	Critical,
}

impl ClickKind {
	#[must_use]
	pub const fn from_critical(critical: bool) -> Self {
		if critical {
			Self::Critical
		} else {
			Self::Normal
		}
	}

	#[must_use]
	pub const fn is_critical(self) -> bool {
		matches!(self, Self::Critical)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClickOrigin {
	Manual,
	Auto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClickCounts {
	pub normal: u32,
	pub critical: u32,
}

impl ClickCounts {
	#[must_use]
	pub const fn total(&self) -> u32 {
		self.normal.saturating_add(self.critical)
	}

	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.total() == 0
	}

	fn add(&mut self, kind: ClickKind) {
		match kind {
			ClickKind::Normal => self.normal = self.normal.saturating_add(1),
			ClickKind::Critical => self.critical = self.critical.saturating_add(1),
		}
	}

	fn subtract(&mut self, sent: Self) {
		self.normal = self.normal.saturating_sub(sent.normal);
		self.critical = self.critical.saturating_sub(sent.critical);
	}
}

/// Everything currently waiting to be flushed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueuedClicks {
	pub manual: ClickCounts,
	/// The auto-click queue
	pub auto: ClickCounts,
}

impl QueuedClicks {
	#[must_use]
	pub const fn total(&self) -> u32 {
		self.manual.total().saturating_add(self.auto.total())
	}

	const fn as_request(&self) -> BatchClickRequest {
		BatchClickRequest {
			normal_clicks: self.manual.normal,
			critical_clicks: self.manual.critical,
			auto_normal_clicks: self.auto.normal,
			auto_critical_clicks: self.auto.critical,
		}
	}
}

#[derive(Debug)]
pub struct ClickAggregator {
	queued: QueuedClicks,
	/// The batch being sent and when it was issued
	in_flight: Option<(QueuedClicks, i64)>,
	flush_deferred: bool,
	last_flush_at_ms: i64,
	batch_size_threshold: u32,
	flush_interval_ms: i64,
}

impl ClickAggregator {
	#[must_use]
	pub fn new(batch_size_threshold: u32, flush_interval: Duration, now_ms: i64) -> Self {
		Self {
			queued: QueuedClicks::default(),
			in_flight: None,
			flush_deferred: false,
			last_flush_at_ms: now_ms,
			batch_size_threshold: batch_size_threshold.max(1),
			flush_interval_ms: i64::try_from(flush_interval.as_millis()).unwrap_or(i64::MAX),
		}
	}

	#[must_use]
	pub const fn queued(&self) -> QueuedClicks {
		self.queued
	}

	#[must_use]
	pub const fn last_flush_at_ms(&self) -> i64 {
		self.last_flush_at_ms
	}

	#[must_use]
	pub const fn is_flushing(&self) -> bool {
		self.in_flight.is_some()
	}

	/// Milliseconds until the age trigger would fire, or `None` if it is already due
	#[must_use]
	pub fn until_age_trigger(&self, now_ms: i64) -> Option<u64> {
		let remaining = self
			.last_flush_at_ms
			.saturating_add(self.flush_interval_ms)
			.saturating_sub(now_ms);

		(remaining > 0).then(|| remaining.unsigned_abs())
	}

	pub fn enqueue(&mut self, origin: ClickOrigin, kind: ClickKind) {
		match origin {
			ClickOrigin::Manual => self.queued.manual.add(kind),
			ClickOrigin::Auto => self.queued.auto.add(kind),
		}

		trace!(?origin, ?kind, queued = self.queued.total(), "Click queued");
	}

	pub fn enqueue_manual(&mut self, kind: ClickKind) {
		self.enqueue(ClickOrigin::Manual, kind);
	}

	pub fn enqueue_auto(&mut self, kind: ClickKind) {
		self.enqueue(ClickOrigin::Auto, kind);
	}

	/// Size or age trigger, whichever comes first, and never for an empty queue
	#[must_use]
	pub fn should_flush(&self, now_ms: i64) -> bool {
		let queued = self.queued.total();

		queued > 0
			&& (queued >= self.batch_size_threshold
				|| now_ms.saturating_sub(self.last_flush_at_ms) >= self.flush_interval_ms)
	}

	/// Returns the batch to send if a flush is due.
	///
	/// While another flush is in flight nothing is returned, the request is remembered instead and
	/// reported back by [`Self::complete_flush`].
	pub fn begin_flush(&mut self, now_ms: i64) -> Option<BatchClickRequest> {
		if !self.should_flush(now_ms) {
			return None;
		}

		if self.in_flight.is_some() {
			trace!("Flush already in flight, deferring");
			self.flush_deferred = true;
			return None;
		}

		let batch = self.queued;
		self.in_flight = Some((batch, now_ms));

		debug!(total = batch.total(), "Flushing queued clicks");

		Some(batch.as_request())
	}

	/// Settles the in-flight batch, returns whether a deferred flush should be attempted now.
	///
	/// Success removes exactly what was sent and records the time the batch was issued, so request
	/// latency never delays the next age trigger. Clicks queued meanwhile wait for the next flush.
	/// Failure keeps everything queued so the next attempt carries at least the same volume.
	pub fn complete_flush(&mut self, succeeded: bool) -> bool {
		if let Some((sent, issued_at_ms)) = self.in_flight.take() {
			if succeeded {
				self.queued.manual.subtract(sent.manual);
				self.queued.auto.subtract(sent.auto);
				self.last_flush_at_ms = issued_at_ms;
			} else {
				debug!(total = sent.total(), "Flush failed, keeping clicks queued");
			}
		}

		std::mem::take(&mut self.flush_deferred)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SECOND: Duration = Duration::from_secs(1);

	#[test]
	fn size_trigger_fires_exactly_once_at_the_threshold() {
		let mut aggregator = ClickAggregator::new(10, SECOND, 0);

		let mut flushes = Vec::new();
		for _ in 0..12 {
			aggregator.enqueue_auto(ClickKind::Normal);
			flushes.extend(aggregator.begin_flush(10));
		}

		assert_eq!(flushes.len(), 1);
		assert_eq!(flushes[0].auto_normal_clicks, 10);
		// the two extra clicks asked for a flush while one was in flight
		assert!(aggregator.complete_flush(true));
		assert_eq!(aggregator.queued().auto, ClickCounts { normal: 2, critical: 0 });
	}

	#[test]
	fn time_trigger_fires_once_per_interval() {
		let mut aggregator = ClickAggregator::new(10, SECOND, 0);

		aggregator.enqueue_manual(ClickKind::Critical);
		assert_eq!(aggregator.begin_flush(999), None);

		let batch = aggregator.begin_flush(1_000).unwrap();
		assert_eq!(batch.critical_clicks, 1);
		assert!(!aggregator.complete_flush(true));

		aggregator.enqueue_manual(ClickKind::Normal);
		assert_eq!(aggregator.begin_flush(1_500), None);
		assert!(aggregator.begin_flush(2_000).is_some());
	}

	#[test]
	fn empty_queue_never_flushes() {
		let mut aggregator = ClickAggregator::new(10, SECOND, 0);

		assert_eq!(aggregator.begin_flush(60_000), None);
	}

	#[test]
	fn success_resets_the_queue_and_records_the_flush() {
		let mut aggregator = ClickAggregator::new(10, SECOND, 0);
		for _ in 0..3 {
			aggregator.enqueue_auto(ClickKind::Normal);
		}

		let batch = aggregator.begin_flush(1_200).unwrap();
		assert_eq!(
			batch,
			BatchClickRequest {
				auto_normal_clicks: 3,
				..Default::default()
			}
		);

		aggregator.complete_flush(true);

		assert_eq!(aggregator.queued(), QueuedClicks::default());
		assert_eq!(aggregator.last_flush_at_ms(), 1_200);
	}

	#[test]
	fn failure_keeps_everything_for_the_retry() {
		let mut aggregator = ClickAggregator::new(10, SECOND, 0);
		aggregator.enqueue_auto(ClickKind::Normal);
		aggregator.enqueue_auto(ClickKind::Critical);
		aggregator.enqueue_manual(ClickKind::Normal);

		let first = aggregator.begin_flush(1_000).unwrap();
		aggregator.enqueue_auto(ClickKind::Normal);
		aggregator.complete_flush(false);

		assert_eq!(aggregator.last_flush_at_ms(), 0);

		let retry = aggregator.begin_flush(1_100).unwrap();
		assert!(retry.total() >= first.total());
		assert_eq!(retry.auto_normal_clicks, 2);
		assert_eq!(retry.auto_critical_clicks, 1);
		assert_eq!(retry.normal_clicks, 1);
	}

	#[test]
	fn slow_response_does_not_push_back_the_next_age_trigger() {
		let mut aggregator = ClickAggregator::new(10, SECOND, 0);

		aggregator.enqueue_manual(ClickKind::Normal);
		assert!(aggregator.begin_flush(1_000).is_some());
		// a click arrives while the request is still out, the reply takes 300ms
		aggregator.enqueue_manual(ClickKind::Normal);
		aggregator.complete_flush(true);

		assert_eq!(aggregator.last_flush_at_ms(), 1_000);
		assert_eq!(aggregator.until_age_trigger(1_300), Some(700));
		assert_eq!(aggregator.until_age_trigger(2_000), None);
		assert_eq!(
			aggregator.begin_flush(2_000).map(|batch| batch.normal_clicks),
			Some(1)
		);
	}
}
