use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use tracing::warn;
use uuid::Uuid;

use super::{error::Error, store::KeyValueStore};

/// Entry holding the token of the context that currently owns the auto-clicker
pub const OWNER_KEY: &str = "auto_clicker_owner";
/// Entry holding the owner's last heartbeat, in milliseconds since the Unix epoch
pub const HEARTBEAT_KEY: &str = "auto_clicker_heartbeat";

/// Opaque identity of one ownership claim. A context mints a new token on every claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for OwnerToken {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for OwnerToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl FromStr for OwnerToken {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s.trim()).map(Self)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipRecord {
	pub owner: OwnerToken,
	pub last_heartbeat_ms: i64,
}

impl OwnershipRecord {
	#[must_use]
	pub const fn new(owner: OwnerToken, last_heartbeat_ms: i64) -> Self {
		Self {
			owner,
			last_heartbeat_ms,
		}
	}

	#[must_use]
	pub const fn age_ms(&self, now_ms: i64) -> i64 {
		now_ms.saturating_sub(self.last_heartbeat_ms)
	}

	/// A record is valid while `now - last_heartbeat < stale_threshold`
	#[must_use]
	pub fn is_fresh(&self, now_ms: i64, stale_threshold: Duration) -> bool {
		let threshold = i64::try_from(stale_threshold.as_millis()).unwrap_or(i64::MAX);
		self.age_ms(now_ms) < threshold
	}
}

/// Ownership record stored as two independent entries of a [`KeyValueStore`].
#[derive(Clone)]
pub struct HeartbeatRegistry {
	store: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for HeartbeatRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HeartbeatRegistry").finish_non_exhaustive()
	}
}

impl HeartbeatRegistry {
	#[must_use]
	pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
		Self { store }
	}

	/// Reads the current record, if any.
	///
	/// A missing or garbled owner entry means there is no record. A missing or garbled heartbeat
	/// reads as the epoch, so the record is stale and free to be claimed.
	pub async fn read(&self) -> Result<Option<OwnershipRecord>, Error> {
		let Some(raw_owner) = self.store.get(OWNER_KEY).await? else {
			return Ok(None);
		};

		let owner = match raw_owner.parse::<OwnerToken>() {
			Ok(owner) => owner,
			Err(e) => {
				warn!(%raw_owner, ?e, "Ignoring unparseable owner token in registry");
				return Ok(None);
			}
		};

		let last_heartbeat_ms = self
			.store
			.get(HEARTBEAT_KEY)
			.await?
			.and_then(|raw| raw.trim().parse::<i64>().ok())
			.unwrap_or(0);

		Ok(Some(OwnershipRecord {
			owner,
			last_heartbeat_ms,
		}))
	}

	pub async fn write(&self, record: &OwnershipRecord) -> Result<(), Error> {
		self.store
			.set(OWNER_KEY, record.owner.to_string())
			.await?;
		self.touch(record.last_heartbeat_ms).await
	}

	/// Refreshes only the heartbeat entry
	pub async fn touch(&self, now_ms: i64) -> Result<(), Error> {
		self.store.set(HEARTBEAT_KEY, now_ms.to_string()).await
	}

	pub async fn clear(&self) -> Result<(), Error> {
		self.store.remove(OWNER_KEY).await?;
		self.store.remove(HEARTBEAT_KEY).await
	}
}

#[cfg(test)]
mod tests {
	use crate::MemoryStore;

	use super::*;

	const STALE: Duration = Duration::from_secs(2);

	#[test]
	fn freshness_boundary_is_exclusive() {
		let record = OwnershipRecord::new(OwnerToken::new(), 10_000);

		assert!(record.is_fresh(10_000, STALE));
		assert!(record.is_fresh(11_999, STALE));
		assert!(!record.is_fresh(12_000, STALE));
	}

	#[tokio::test]
	async fn garbled_entries_never_make_a_fresh_record() {
		let store = MemoryStore::default();
		let registry = HeartbeatRegistry::new(Arc::new(store.clone()));

		store.set(OWNER_KEY, "not-a-token".to_string()).await.unwrap();
		store.set(HEARTBEAT_KEY, "123".to_string()).await.unwrap();
		assert_eq!(registry.read().await.unwrap(), None);

		let owner = OwnerToken::new();
		store.set(OWNER_KEY, owner.to_string()).await.unwrap();
		store.set(HEARTBEAT_KEY, "yesterday".to_string()).await.unwrap();

		let record = registry.read().await.unwrap().unwrap();
		assert_eq!(record.owner, owner);
		assert_eq!(record.last_heartbeat_ms, 0);
		assert!(!record.is_fresh(5_000, STALE));
	}

	#[tokio::test]
	async fn clear_removes_both_entries() {
		let store = MemoryStore::default();
		let registry = HeartbeatRegistry::new(Arc::new(store.clone()));

		registry
			.write(&OwnershipRecord::new(OwnerToken::new(), 1))
			.await
			.unwrap();
		registry.clear().await.unwrap();

		assert_eq!(store.get(OWNER_KEY).await.unwrap(), None);
		assert_eq!(store.get(HEARTBEAT_KEY).await.unwrap(), None);
	}
}
