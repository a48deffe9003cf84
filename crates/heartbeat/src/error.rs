use std::{fmt, path::Path};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid registry key <key='{0}'>, only ASCII alphanumerics, '_' and '-' are allowed")]
	InvalidKey(String),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

/// Store I/O error that includes the path of the entry that caused it
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: std::io::Error,
	pub maybe_context: Option<&'static str>,
}

impl fmt::Display for FileIOError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"registry entry I/O error{}: {}; path: '{}'",
			self.maybe_context
				.map(|ctx| format!(" ({ctx})"))
				.unwrap_or_default(),
			self.source,
			self.path.display()
		)
	}
}

impl FileIOError {
	pub fn new(path: impl AsRef<Path>, source: std::io::Error, context: &'static str) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(context),
		}
	}
}
