use std::{
	collections::HashMap,
	io::ErrorKind,
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use tokio::{fs, sync::RwLock};
use tracing::trace;
use uuid::Uuid;

use super::error::{Error, FileIOError};

/// Durable string-keyed entries visible to every execution context of the same client.
///
/// Implementations only promise last-write-wins per key, callers must never assume two keys are
/// written together.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
	async fn get(&self, key: &str) -> Result<Option<String>, Error>;

	async fn set(&self, key: &str, value: String) -> Result<(), Error>;

	async fn remove(&self, key: &str) -> Result<(), Error>;
}

fn check_key(key: &str) -> Result<(), Error> {
	if !key.is_empty()
		&& key
			.bytes()
			.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
	{
		Ok(())
	} else {
		Err(Error::InvalidKey(key.to_string()))
	}
}

/// In-process store, every clone sees the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	entries: Arc<RwLock<HashMap<String, String>>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<String>, Error> {
		check_key(key)?;
		Ok(self.entries.read().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: String) -> Result<(), Error> {
		check_key(key)?;
		self.entries.write().await.insert(key.to_string(), value);
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), Error> {
		check_key(key)?;
		self.entries.write().await.remove(key);
		Ok(())
	}
}

/// One file per key inside a directory, shared by every process pointed at it.
#[derive(Debug, Clone)]
pub struct FileStore {
	dir: PathBuf,
}

impl FileStore {
	pub async fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
		let dir = dir.as_ref();

		fs::create_dir_all(dir)
			.await
			.map_err(|e| FileIOError::new(dir, e, "failed to create registry directory"))?;

		Ok(Self {
			dir: dir.to_path_buf(),
		})
	}

	#[must_use]
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn entry_path(&self, key: &str) -> Result<PathBuf, Error> {
		check_key(key)?;
		Ok(self.dir.join(key))
	}
}

#[async_trait]
impl KeyValueStore for FileStore {
	async fn get(&self, key: &str) -> Result<Option<String>, Error> {
		let path = self.entry_path(key)?;

		match fs::read_to_string(&path).await {
			Ok(value) => Ok(Some(value)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(FileIOError::new(&path, e, "failed to read registry entry").into()),
		}
	}

	async fn set(&self, key: &str, value: String) -> Result<(), Error> {
		let path = self.entry_path(key)?;
		// Every write gets its own temp file, concurrent writers of one key must not share it
		let tmp_path = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));

		fs::write(&tmp_path, value)
			.await
			.map_err(|e| FileIOError::new(&tmp_path, e, "failed to write registry entry"))?;

		// Rename is atomic on the same filesystem, readers see either the old or the new value
		fs::rename(&tmp_path, &path)
			.await
			.map_err(|e| FileIOError::new(&path, e, "failed to replace registry entry"))?;

		trace!(?path, "Registry entry written");

		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), Error> {
		let path = self.entry_path(key)?;

		match fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(FileIOError::new(&path, e, "failed to remove registry entry").into()),
		}
	}
}
