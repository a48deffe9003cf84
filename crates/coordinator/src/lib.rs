//!
//! # Clicker Coordinator
//!
//! Everything one execution context of the clicker client runs: the synthetic auto-click
//! generator, the leader election that keeps at most one context generating at a time, the batch
//! aggregator that turns clicks into few network calls and the reconciler that mirrors the
//! server's view of the user.
//!
//! ## Basic example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cc_coordinator::{ClickKind, ClickerContext, CoordinatorConfig};
//! use cc_gateway::{HttpGateway, RequestConfig};
//! use cc_heartbeat::{MemoryStore, SystemClock};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), cc_coordinator::Error> {
//! let context = ClickerContext::create(
//! 	CoordinatorConfig::default(),
//! 	Arc::new(HttpGateway::new(RequestConfig::new("http://localhost:5000"))),
//! 	Arc::new(MemoryStore::default()),
//! 	Arc::new(SystemClock),
//! );
//!
//! context.manual_click(ClickKind::Normal).await?;
//! println!("{:?}", context.snapshot().queued);
//!
//! context.dispose().await?;
//! # Ok(())
//! # }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod aggregator;
mod config;
mod context;
mod error;
mod generator;
mod leader;
mod reconciler;
mod session;

pub use aggregator::{ClickAggregator, ClickCounts, ClickKind, ClickOrigin, QueuedClicks};
pub use config::CoordinatorConfig;
pub use context::{ClickerContext, ContextEvent, Snapshot, Surface, Tab, View};
pub use error::Error;
pub use generator::{tick_interval, ticks_per_second, Generator, Tick};
pub use leader::{LeaderCoordinator, LeaderState};
pub use reconciler::{DerivedParams, MergeOutcome, StateReconciler, UpgradeSet, UserState};
pub use session::ClickerSession;
