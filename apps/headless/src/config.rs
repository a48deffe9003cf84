use std::{
	fs,
	path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use cc_coordinator::CoordinatorConfig;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const CONFIG_FILE_NAME: &str = "headless.json";

/// Default data directory of the current user, created if missing
pub fn default_data_dir() -> Result<PathBuf> {
	let dir = ProjectDirs::from("", "", "clicker-coordinator")
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.data_local_dir()
		.to_path_buf();

	fs::create_dir_all(&dir)
		.with_context(|| format!("Failed to create data directory {}", dir.display()))?;

	Ok(dir)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlessConfig {
	/// Config schema version
	pub version: u32,

	/// Base URL of the clicker server
	pub api_url: String,

	/// Raw `Cookie` header of a logged-in session
	#[serde(default)]
	pub session_cookie: Option<String>,

	/// Directory of the file-backed heartbeat registry, shared by every process of the same user
	pub registry_dir: PathBuf,

	/// Level for our own crates, anything else logs warnings only
	pub log_level: String,

	#[serde(default)]
	pub coordinator: CoordinatorConfig,
}

impl HeadlessConfig {
	const fn target_version() -> u32 {
		2
	}

	pub fn path(data_dir: &Path) -> PathBuf {
		data_dir.join(CONFIG_FILE_NAME)
	}

	pub fn default_with_dir(data_dir: &Path) -> Self {
		Self {
			version: Self::target_version(),
			api_url: "http://localhost:5000".to_string(),
			session_cookie: None,
			registry_dir: data_dir.join("registry"),
			log_level: if cfg!(debug_assertions) {
				"debug"
			} else {
				"info"
			}
			.to_string(),
			coordinator: CoordinatorConfig::default(),
		}
	}

	/// Loads the config from `data_dir`, creating a default one if there is none yet
	pub fn load_or_create(data_dir: &Path) -> Result<Self> {
		let config_path = Self::path(data_dir);

		if !config_path.exists() {
			warn!("No config found, creating default at {}", config_path.display());
			let config = Self::default_with_dir(data_dir);
			config.save(data_dir)?;
			return Ok(config);
		}

		info!("Loading config from {}", config_path.display());

		let json = fs::read_to_string(&config_path)
			.with_context(|| format!("Failed to read {}", config_path.display()))?;
		let mut config: Self = serde_json::from_str(&json)
			.with_context(|| format!("Failed to parse {}", config_path.display()))?;

		if config.version < Self::target_version() {
			info!(
				"Migrating config from v{} to v{}",
				config.version,
				Self::target_version()
			);
			config.migrate(data_dir);
			config.save(data_dir)?;
		}

		Ok(config)
	}

	fn migrate(&mut self, data_dir: &Path) {
		loop {
			match self.version {
				// v1 kept the registry inside the data directory root
				0 | 1 => {
					if self.registry_dir.as_os_str().is_empty() {
						self.registry_dir = data_dir.join("registry");
					}
					self.version = 2;
				}
				_ => break,
			}
		}
	}

	pub fn save(&self, data_dir: &Path) -> Result<()> {
		fs::create_dir_all(data_dir)?;

		let config_path = Self::path(data_dir);
		fs::write(&config_path, serde_json::to_string_pretty(self)?)
			.with_context(|| format!("Failed to write {}", config_path.display()))?;

		info!("Saved config to {}", config_path.display());

		Ok(())
	}
}
