use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("heartbeat registry error: {0}")]
	Registry(#[from] cc_heartbeat::Error),
	#[error(transparent)]
	Gateway(#[from] cc_gateway::Error),

	#[error("clicker context is no longer running")]
	ContextClosed,
}
