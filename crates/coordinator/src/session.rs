//! Per-context manual clicking state: combo multiplier and case-opening progress.

use serde::Serialize;

use super::reconciler::DerivedParams;

const MULTIPLIER_STEP: f64 = 0.1;

/// Ephemeral per-context clicker state, never shared with other contexts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClickerSession {
	pub current_multiplier: f64,
	pub combo_count: u32,
	/// Case clicks sent but not yet confirmed by the server
	pub pending_clicks: u32,
	pub case_progress: f64,
	/// Last progress confirmed by the server, sent back with the next case click
	pub last_progress: f64,
}

impl Default for ClickerSession {
	fn default() -> Self {
		Self {
			current_multiplier: 1.0,
			combo_count: 0,
			pending_clicks: 0,
			case_progress: 0.0,
			last_progress: 0.0,
		}
	}
}

impl ClickerSession {
	/// Counts one manual click towards the combo, returns whether the multiplier went up
	pub fn register_click(&mut self, derived: &DerivedParams) -> bool {
		self.combo_count += 1;

		if self.combo_count < derived.clicks_to_combo {
			return false;
		}

		self.combo_count = 0;

		let raised = ((self.current_multiplier + MULTIPLIER_STEP) * 10.0).round() / 10.0;
		let next = raised.min(derived.max_multiplier).max(1.0);
		let went_up = next > self.current_multiplier;

		self.current_multiplier = next;

		went_up
	}

	pub fn break_combo(&mut self) {
		self.current_multiplier = 1.0;
		self.combo_count = 0;
	}

	/// Keeps the multiplier within `[1.0, max_multiplier]` after the upgrades changed
	pub fn apply_limits(&mut self, derived: &DerivedParams) {
		self.current_multiplier = self.current_multiplier.min(derived.max_multiplier).max(1.0);
		self.combo_count = self.combo_count.min(derived.clicks_to_combo.saturating_sub(1));
	}

	/// Progress confirmed by the server
	pub fn confirm_progress(&mut self, progress: f64) {
		self.case_progress = progress;
		self.last_progress = progress;
	}
}
