//! Error types for command-server connections.

use std::path::PathBuf;

use hgcs_protocol::LocationError;
use thiserror::Error;

/// Result type alias using the runtime [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by sessions, connections, the pool, and clone.
#[derive(Debug, Error)]
pub enum Error {
	/// The command server could not be launched or failed its handshake.
	#[error("failed to start command server for {}: {reason}", path.display())]
	StartFailure { path: PathBuf, reason: String },

	/// A command finished with a non-zero result code.
	#[error("\"hg {command}\" failed with result code {result_code}: {output}")]
	CommandFailed { command: String, result_code: i32, output: String },

	/// The clone command finished with a non-zero result code.
	#[error("clone failed with result code {result_code}")]
	CloneFailed { result_code: i32 },

	/// The session died or broke protocol while running a command.
	#[error("command server terminated: {0}")]
	SessionTerminated(String),

	/// The connection was disposed before the command could run.
	#[error("connection to {} is closed", .0.display())]
	ConnectionClosed(PathBuf),

	/// A prompt responder could not supply an answer.
	#[error("prompt response unavailable: {0}")]
	Prompt(String),

	#[error("invalid repository location: {0}")]
	InvalidLocation(#[from] LocationError),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns `true` when the failure came from the session rather than from
	/// the command it ran.
	pub fn is_session_failure(&self) -> bool {
		matches!(self, Error::StartFailure { .. } | Error::SessionTerminated(_))
	}
}
