use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Upgrade tracks the server sells, spelled as they are on the wire
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	Serialize,
	Deserialize,
	strum_macros::Display,
	strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UpgradeKind {
	ClickValue,
	MaxMultiplier,
	AutoClicker,
	ComboSpeed,
	CriticalStrike,
	ProgressPerClick,
	CaseQuality,
	MultiOpen,
}

/// Upgrade levels as sent by the server, any of them may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeLevels {
	pub click_value: Option<u32>,
	pub max_multiplier: Option<u32>,
	pub auto_clicker: Option<u32>,
	pub combo_speed: Option<u32>,
	pub critical_strike: Option<u32>,
	pub progress_per_click: Option<u32>,
	pub case_quality: Option<u32>,
	pub multi_open: Option<u32>,
}

/// An inventory entry. Only the fields the coordinator looks at are typed, the rest is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemRef {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub is_case: bool,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub kind: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub quantity: Option<u32>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Partial user state. Every field is optional, absent fields must leave local state untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPayload {
	pub rank: Option<u32>,
	#[serde(deserialize_with = "truncated_count")]
	pub exp: Option<u64>,
	pub balance: Option<Decimal>,
	pub inventory: Option<Vec<ItemRef>>,
	pub upgrades: Option<UpgradeLevels>,
	pub case_progress: Option<f64>,
}

impl UserPayload {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self == &Self::default()
	}
}

/// Counters the server keeps as floats, truncated toward zero and clamped at zero
fn truncated_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
	D: Deserializer<'de>,
{
	Option::<Decimal>::deserialize(deserializer)?
		.map(|value| u64::try_from(value.trunc().max(Decimal::ZERO)).map_err(de::Error::custom))
		.transpose()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClickRequest {
	pub multiplier: f64,
	pub is_crit: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchClickRequest {
	pub normal_clicks: u32,
	pub critical_clicks: u32,
	pub auto_normal_clicks: u32,
	pub auto_critical_clicks: u32,
}

impl BatchClickRequest {
	#[must_use]
	pub const fn total(&self) -> u32 {
		self.normal_clicks
			.saturating_add(self.critical_clicks)
			.saturating_add(self.auto_normal_clicks)
			.saturating_add(self.auto_critical_clicks)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CaseClickRequest {
	pub current_progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchCaseClickRequest {
	pub click_count: u32,
	pub current_progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRef {
	pub name: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub image: Option<String>,
	#[serde(default)]
	pub price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaseProgress {
	pub progress: f64,
	/// Set by the single click endpoint
	#[serde(default)]
	pub earned_case: Option<CaseRef>,
	/// Set by the batched endpoint
	#[serde(default)]
	pub earned_cases: Vec<CaseRef>,
	#[serde(default)]
	pub progress_per_click: Option<f64>,
}

impl CaseProgress {
	/// Every case earned by this response, whichever endpoint produced it
	pub fn earned(&self) -> impl Iterator<Item = &CaseRef> {
		self.earned_case.iter().chain(&self.earned_cases)
	}
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PurchaseReceipt {
	#[serde(flatten)]
	pub payload: UserPayload,
	#[serde(rename = "nextCost", default)]
	pub next_cost: Option<Decimal>,
}
