//! Contract of the command-server session collaborator.
//!
//! A [`Session`] wraps one helper process speaking the line-oriented command
//! protocol. Its wire encoding is owned by the implementation; this crate only
//! relies on the contract documented on each method.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use hgcs_protocol::{CommandArgs, CommandResult};

use crate::error::Result;

/// Answers interactive prompts raised by the command server.
///
/// Receives the prompt key and resolves with the text to send back.
pub type PromptResponder = Arc<dyn Fn(String) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Receives each output line as the command server emits it.
pub type OutputLineSink<'a> = &'a mut (dyn FnMut(&str) + Send + 'a);

/// Wraps an async closure into a [`PromptResponder`].
pub fn prompt_responder<F, Fut>(respond: F) -> PromptResponder
where
	F: Fn(String) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<String>> + Send + 'static,
{
	Arc::new(move |key: String| -> BoxFuture<'static, Result<String>> { Box::pin(respond(key)) })
}

/// One helper-process instance.
///
/// Implementations may assume `run_command` is never re-entered: callers go
/// through a [`Connection`](crate::Connection), whose queue hands the session
/// to exactly one command at a time.
pub trait Session: Send + 'static {
	/// Launches the backing process rooted at `path` and completes the
	/// handshake.
	fn start<'a>(&'a mut self, path: &'a Path) -> BoxFuture<'a, Result<()>>;

	/// Sends one command and resolves once the process signals completion.
	///
	/// Output lines are streamed to `on_output_line` as they arrive, and
	/// interactive prompts are forwarded to `prompt`. A non-zero result code
	/// is a successful call; `Err` means the session itself failed.
	fn run_command<'a>(
		&'a mut self,
		args: &'a CommandArgs,
		on_output_line: Option<OutputLineSink<'a>>,
		prompt: Option<PromptResponder>,
	) -> BoxFuture<'a, Result<CommandResult>>;

	/// Terminates the backing process. Idempotent, and safe to call when
	/// `start` never ran or never completed.
	fn stop(&mut self);
}

/// Creates unstarted sessions.
///
/// This is where the surrounding system decides how the helper process is
/// located and launched; the runtime never hard-codes a binary.
pub trait SessionFactory: Send + Sync + 'static {
	type Session: Session;

	fn create_session(&self) -> Self::Session;
}

impl<F: SessionFactory> SessionFactory for Arc<F> {
	type Session = F::Session;

	fn create_session(&self) -> Self::Session {
		(**self).create_session()
	}
}

/// Owns a session and stops it when dropped.
pub(crate) struct StopOnDrop<S: Session>(S);

impl<S: Session> StopOnDrop<S> {
	pub(crate) fn new(session: S) -> Self {
		Self(session)
	}
}

impl<S: Session> Deref for StopOnDrop<S> {
	type Target = S;

	fn deref(&self) -> &S {
		&self.0
	}
}

impl<S: Session> DerefMut for StopOnDrop<S> {
	fn deref_mut(&mut self) -> &mut S {
		&mut self.0
	}
}

impl<S: Session> Drop for StopOnDrop<S> {
	fn drop(&mut self) {
		self.0.stop();
	}
}
