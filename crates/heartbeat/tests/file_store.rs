use cc_heartbeat::{
	Clock, FileStore, HeartbeatRegistry, KeyValueStore, OwnerToken, OwnershipRecord, TokioClock,
	HEARTBEAT_KEY, OWNER_KEY,
};

use std::{sync::Arc, time::Duration};

use tempfile::tempdir;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn file_store_round_trips_and_tolerates_missing_entries() {
	let dir = tempdir().unwrap();
	let store = FileStore::open(dir.path().join("registry")).await.unwrap();

	assert_eq!(store.get(OWNER_KEY).await.unwrap(), None);
	store.remove(OWNER_KEY).await.unwrap();

	store.set(OWNER_KEY, "first".to_string()).await.unwrap();
	store.set(OWNER_KEY, "second".to_string()).await.unwrap();
	assert_eq!(store.get(OWNER_KEY).await.unwrap().as_deref(), Some("second"));

	// no temporary files are left behind after a replace
	let leftovers = std::fs::read_dir(store.dir())
		.unwrap()
		.filter_map(Result::ok)
		.filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
		.count();
	assert_eq!(leftovers, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn concurrent_writes_of_one_key_all_succeed() {
	let dir = tempdir().unwrap();
	let store = Arc::new(FileStore::open(dir.path()).await.unwrap());

	let writers = (0..16)
		.map(|i| {
			let store = Arc::clone(&store);
			tokio::spawn(async move { store.set(OWNER_KEY, format!("writer-{i}")).await })
		})
		.collect::<Vec<_>>();

	for writer in writers {
		writer.await.unwrap().unwrap();
	}

	let value = store.get(OWNER_KEY).await.unwrap().unwrap();
	assert!(value.starts_with("writer-"));
}

#[tokio::test]
#[traced_test]
async fn two_stores_on_the_same_directory_share_ownership() {
	let dir = tempdir().unwrap();
	let clock = TokioClock::new();

	let first = HeartbeatRegistry::new(Arc::new(FileStore::open(dir.path()).await.unwrap()));
	let second = HeartbeatRegistry::new(Arc::new(FileStore::open(dir.path()).await.unwrap()));

	let record = OwnershipRecord::new(OwnerToken::new(), clock.now_millis());
	first.write(&record).await.unwrap();

	let seen = second.read().await.unwrap().unwrap();
	assert_eq!(seen, record);
	assert!(seen.is_fresh(clock.now_millis(), Duration::from_secs(2)));

	second.touch(record.last_heartbeat_ms + 500).await.unwrap();
	assert_eq!(
		first.read().await.unwrap().unwrap().last_heartbeat_ms,
		record.last_heartbeat_ms + 500
	);

	first.clear().await.unwrap();
	assert!(second.read().await.unwrap().is_none());
	assert!(!dir.path().join(HEARTBEAT_KEY).exists());
}
