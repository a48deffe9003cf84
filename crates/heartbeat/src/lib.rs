//!
//! # Heartbeat Registry
//!
//! A tiny durable key-value surface shared by every execution context of the same client, and the
//! ownership record that contexts use to elect a single auto-clicker owner on top of it.
//!
//! All reads and writes are last-write-wins, there are no cross-context transactions. A record is
//! only "valid" while its heartbeat is younger than the caller's staleness window, so a crashed
//! owner is abandoned implicitly instead of having to be cleaned up.
//!
//! ## Basic example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use cc_heartbeat::{Clock, HeartbeatRegistry, MemoryStore, OwnerToken, OwnershipRecord, SystemClock};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), cc_heartbeat::Error> {
//! let registry = HeartbeatRegistry::new(Arc::new(MemoryStore::default()));
//! let clock = SystemClock;
//!
//! let record = OwnershipRecord::new(OwnerToken::new(), clock.now_millis());
//! registry.write(&record).await?;
//!
//! let current = registry.read().await?.expect("just written");
//! assert!(current.is_fresh(clock.now_millis(), Duration::from_secs(2)));
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

mod clock;
mod error;
mod registry;
mod store;

pub use clock::{Clock, SystemClock, TokioClock};
pub use error::{Error, FileIOError};
pub use registry::{
	HeartbeatRegistry, OwnerToken, OwnershipRecord, HEARTBEAT_KEY, OWNER_KEY,
};
pub use store::{FileStore, KeyValueStore, MemoryStore};
