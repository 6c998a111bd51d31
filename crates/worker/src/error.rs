//! Error types for the offload pipeline.

use thiserror::Error;

/// Failure to materialize a background context.
///
/// Cloneable so a single failed setup can be reported to every caller that
/// raced on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpawnError {
	/// The host's execution policy forbids creating background contexts.
	#[error("host denied background context creation")]
	Denied,

	/// The host could not start the thread backing the context.
	#[error("failed to start context thread: {0}")]
	Thread(String),

	/// The script resource was revoked before the host loaded it.
	#[error("script resource {0} is no longer addressable")]
	Revoked(String),

	/// The script body threw while it was being evaluated.
	#[error("script failed during load: {0}")]
	Script(String),

	/// The script body finished loading without installing a message listener.
	#[error("script installed no message listener")]
	NoListener,

	/// The context went away before it reported readiness.
	#[error("context exited before reporting readiness")]
	Disconnected,
}

/// Errors surfaced by [`crate::executor::BackgroundExecutor::call`].
#[derive(Debug, Error)]
pub enum ExecutorError {
	/// Lazy setup could not create the background context.
	#[error("background context could not be created: {0}")]
	ContextSpawnFailed(#[source] SpawnError),

	/// The call was issued after `destroy()`.
	#[error("executor has been destroyed")]
	ExecutorDestroyed,

	/// The input cannot cross the context boundary.
	#[error("input is not serializable across the context boundary: {0}")]
	Serialize(#[source] serde_json::Error),

	/// A correlated reply did not have the expected output shape.
	#[error("reply does not match the expected output shape: {0}")]
	MalformedReply(#[source] serde_json::Error),

	/// The background handler failed while processing the request.
	#[error("background handler failed: {0}")]
	Handler(String),

	/// The context exited before answering.
	#[error("background context exited before replying")]
	ContextLost,
}

/// Result type for executor calls.
pub type Result<T, E = ExecutorError> = std::result::Result<T, E>;

/// Errors raised when starting a [`crate::monitor::TaskMonitor`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
	/// The host has no observation facility for the requested entry type.
	#[error("host does not support `{entry_type}` observation")]
	UnsupportedEnvironment {
		/// The entry type that was requested.
		entry_type: String,
	},
}
