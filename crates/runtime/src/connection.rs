//! Serialized command execution over one command-server session.
//!
//! A [`Connection`] presents a multi-caller API over a single-caller
//! [`Session`]. It handles:
//! - Queueing commands from concurrent callers in call order
//! - Handing the session to exactly one command at a time
//! - Mapping non-zero result codes to [`Error::CommandFailed`]
//! - Tracking the activity counter used by pool eviction
//!
//! # Command Flow
//!
//! 1. Caller invokes `run_command()`; the job is pushed onto the queue
//!    immediately, before the returned future is polled
//! 2. The worker task, which exclusively owns the session, pops jobs in order
//! 3. The worker awaits `Session::run_command` for that job alone
//! 4. The result is sent back through the job's oneshot channel
//! 5. The caller's future resolves
//!
//! # Disposal
//!
//! `dispose()` enqueues a stop behind everything already queued: earlier
//! commands still run, the session is stopped, and commands enqueued after
//! the stop fail with [`Error::ConnectionClosed`]. Dropping the last handle
//! also stops the session once the queue drains.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hgcs_protocol::{CommandArgs, CommandResult, RepositoryPath};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::session::{PromptResponder, Session};

/// A command plus the optional responder for interactive prompts.
#[derive(Clone)]
pub struct CommandRequest {
	args: CommandArgs,
	prompt: Option<PromptResponder>,
}

impl CommandRequest {
	pub fn new(args: impl Into<CommandArgs>) -> Self {
		Self { args: args.into(), prompt: None }
	}

	/// Forwards prompts raised while this command runs to `responder`.
	pub fn with_prompt_responder(mut self, responder: PromptResponder) -> Self {
		self.prompt = Some(responder);
		self
	}

	pub fn args(&self) -> &CommandArgs {
		&self.args
	}
}

impl fmt::Debug for CommandRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CommandRequest")
			.field("args", &self.args)
			.field("prompt", &self.prompt.is_some())
			.finish()
	}
}

impl From<CommandArgs> for CommandRequest {
	fn from(args: CommandArgs) -> Self {
		Self::new(args)
	}
}

impl From<&str> for CommandRequest {
	fn from(token: &str) -> Self {
		Self::new(token)
	}
}

impl From<String> for CommandRequest {
	fn from(token: String) -> Self {
		Self::new(token)
	}
}

impl From<Vec<String>> for CommandRequest {
	fn from(tokens: Vec<String>) -> Self {
		Self::new(tokens)
	}
}

impl From<Vec<&str>> for CommandRequest {
	fn from(tokens: Vec<&str>) -> Self {
		Self::new(tokens)
	}
}

impl From<&[&str]> for CommandRequest {
	fn from(tokens: &[&str]) -> Self {
		Self::new(tokens)
	}
}

impl<const N: usize> From<[&str; N]> for CommandRequest {
	fn from(tokens: [&str; N]) -> Self {
		Self::new(tokens)
	}
}

enum Job {
	Start {
		reply: oneshot::Sender<Result<()>>,
	},
	Run {
		request: CommandRequest,
		reply: oneshot::Sender<Result<CommandResult>>,
	},
	Stop,
}

#[derive(Default)]
struct Status {
	activity: AtomicU64,
	disposed: AtomicBool,
	faulted: AtomicBool,
}

struct Inner {
	path: RepositoryPath,
	jobs: mpsc::UnboundedSender<Job>,
	status: Arc<Status>,
}

/// Queue-serialized handle onto one command-server session.
///
/// Cloning is cheap and yields another handle onto the same queue and
/// session; use [`Connection::ptr_eq`] to compare identity.
///
/// Must be created inside a tokio runtime: the session is driven by a task
/// spawned on construction.
#[derive(Clone)]
pub struct Connection {
	inner: Arc<Inner>,
}

impl Connection {
	/// Wraps an unstarted session for `path`.
	///
	/// The session starts on [`Connection::start`] or, failing that, right
	/// before the first queued command.
	pub fn new<S: Session>(session: S, path: impl Into<RepositoryPath>) -> Self {
		let path = path.into();
		let (jobs, queue) = mpsc::unbounded_channel();
		let status = Arc::new(Status::default());

		tokio::spawn(drive(session, path.clone(), Arc::clone(&status), queue));

		Self {
			inner: Arc::new(Inner { path, jobs, status }),
		}
	}

	pub fn repository_path(&self) -> &RepositoryPath {
		&self.inner.path
	}

	/// Number of times the pool has handed this connection to a caller.
	pub fn activity(&self) -> u64 {
		self.inner.status.activity.load(Ordering::SeqCst)
	}

	/// Bumps the activity counter and returns the new value.
	pub(crate) fn record_acquisition(&self) -> u64 {
		self.inner.status.activity.fetch_add(1, Ordering::SeqCst) + 1
	}

	/// `true` until the connection is disposed or its session fails.
	pub fn is_usable(&self) -> bool {
		!self.is_disposed() && !self.is_faulted() && !self.inner.jobs.is_closed()
	}

	pub fn is_disposed(&self) -> bool {
		self.inner.status.disposed.load(Ordering::SeqCst)
	}

	/// `true` once the session failed while running a command.
	pub fn is_faulted(&self) -> bool {
		self.inner.status.faulted.load(Ordering::SeqCst)
	}

	/// Returns `true` when both handles refer to the same connection.
	pub fn ptr_eq(a: &Connection, b: &Connection) -> bool {
		Arc::ptr_eq(&a.inner, &b.inner)
	}

	/// Starts the session, queued like any command.
	///
	/// Succeeds immediately when the session is already running.
	pub async fn start(&self) -> Result<()> {
		let (reply, response) = oneshot::channel();
		let _ = self.inner.jobs.send(Job::Start { reply });
		response.await.unwrap_or_else(|_| Err(self.closed()))
	}

	/// Runs a command and returns its output lines.
	///
	/// The command is queued when this method is called. A non-zero result
	/// code fails with [`Error::CommandFailed`], carrying the joined output
	/// and error lines; queued sibling commands are unaffected.
	pub fn run_command<R>(&self, request: R) -> impl Future<Output = Result<Vec<String>>> + Send + use<R>
	where
		R: Into<CommandRequest>,
	{
		let request = request.into();
		let command = request.args.to_string();
		let pending = self.enqueue(request);

		async move {
			let result = pending.await?;
			if result.is_success() {
				return Ok(result.output_lines);
			}
			Err(Error::CommandFailed {
				command,
				result_code: result.result_code,
				output: result.combined_output(),
			})
		}
	}

	/// Runs a command and returns the raw result, including non-zero codes.
	///
	/// Only session-level failures produce `Err`.
	pub fn run_command_returning_errors<R>(&self, request: R) -> impl Future<Output = Result<CommandResult>> + Send + use<R>
	where
		R: Into<CommandRequest>,
	{
		self.enqueue(request.into())
	}

	/// Stops the session once every command queued so far has run.
	///
	/// Idempotent. Commands queued afterwards fail with
	/// [`Error::ConnectionClosed`].
	pub fn dispose(&self) {
		if self.inner.status.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		debug!(target = "hgcs.connection", path = %self.inner.path, "disposing connection");
		let _ = self.inner.jobs.send(Job::Stop);
	}

	fn enqueue(&self, request: CommandRequest) -> impl Future<Output = Result<CommandResult>> + Send + use<> {
		let (reply, response) = oneshot::channel();
		trace!(target = "hgcs.connection", path = %self.inner.path, command = %request.args, "queueing command");
		// A failed send drops the reply sender, which resolves below as closed.
		let _ = self.inner.jobs.send(Job::Run { request, reply });

		let closed = self.closed();
		async move { response.await.unwrap_or(Err(closed)) }
	}

	fn closed(&self) -> Error {
		Error::ConnectionClosed(self.inner.path.as_path().to_path_buf())
	}
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection")
			.field("path", &self.inner.path)
			.field("activity", &self.activity())
			.field("disposed", &self.is_disposed())
			.field("faulted", &self.is_faulted())
			.finish()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Idle,
	Running,
	Stopped,
}

/// Worker loop: the only code that ever touches the session.
async fn drive<S: Session>(mut session: S, path: RepositoryPath, status: Arc<Status>, mut queue: mpsc::UnboundedReceiver<Job>) {
	let mut phase = Phase::Idle;

	while let Some(job) = queue.recv().await {
		match job {
			Job::Start { reply } => {
				let outcome = ensure_started(&mut session, &path, &mut phase).await;
				let _ = reply.send(outcome);
			}
			Job::Run { request, reply } => {
				if status.faulted.load(Ordering::SeqCst) {
					trace!(target = "hgcs.connection", path = %path, command = %request.args, "rejecting command on faulted session");
					let _ = reply.send(Err(Error::SessionTerminated(format!(
						"command server for {path} failed earlier; \"hg {}\" was not sent",
						request.args
					))));
					continue;
				}
				let outcome = match ensure_started(&mut session, &path, &mut phase).await {
					Ok(()) => run_one(&mut session, &path, &status, request).await,
					Err(err) => Err(err),
				};
				// The caller may have stopped waiting; the command still ran.
				let _ = reply.send(outcome);
			}
			Job::Stop => {
				if phase != Phase::Stopped {
					session.stop();
					phase = Phase::Stopped;
					debug!(target = "hgcs.connection", path = %path, "session stopped");
				}
				queue.close();
			}
		}
	}

	if phase != Phase::Stopped {
		session.stop();
	}
	trace!(target = "hgcs.connection", path = %path, "connection worker finished");
}

async fn ensure_started<S: Session>(session: &mut S, path: &RepositoryPath, phase: &mut Phase) -> Result<()> {
	match *phase {
		Phase::Running => Ok(()),
		Phase::Stopped => Err(Error::ConnectionClosed(path.as_path().to_path_buf())),
		Phase::Idle => match session.start(path.as_path()).await {
			Ok(()) => {
				*phase = Phase::Running;
				debug!(target = "hgcs.connection", path = %path, "session started");
				Ok(())
			}
			Err(err) => {
				// A half-started process must not outlive the failed attempt.
				session.stop();
				warn!(target = "hgcs.connection", path = %path, error = %err, "session failed to start");
				Err(start_failure(path, err))
			}
		},
	}
}

async fn run_one<S: Session>(session: &mut S, path: &RepositoryPath, status: &Status, request: CommandRequest) -> Result<CommandResult> {
	let CommandRequest { args, prompt } = request;
	debug!(target = "hgcs.connection", path = %path, command = %args, "running command");

	match session.run_command(&args, None, prompt).await {
		Ok(result) => {
			if !result.is_success() {
				debug!(
					target = "hgcs.connection",
					path = %path,
					command = %args,
					result_code = result.result_code,
					"command returned non-zero result"
				);
			}
			Ok(result)
		}
		Err(err @ Error::Prompt(_)) => Err(err),
		Err(err) => {
			status.faulted.store(true, Ordering::SeqCst);
			warn!(target = "hgcs.connection", path = %path, command = %args, error = %err, "session failed while running command");
			Err(err)
		}
	}
}

pub(crate) fn start_failure(path: &RepositoryPath, err: Error) -> Error {
	match err {
		Error::StartFailure { .. } => err,
		other => Error::StartFailure {
			path: path.as_path().to_path_buf(),
			reason: other.to_string(),
		},
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::fake_session::{FakeEvent, FakeReply, FakeSessionFactory};
	use crate::session::{SessionFactory, prompt_responder};

	fn connection(factory: &FakeSessionFactory) -> Connection {
		Connection::new(factory.create_session(), "/repo")
	}

	#[test]
	fn command_request_from_token_forms() {
		assert_eq!(CommandRequest::from("status").args().as_slice(), ["status".to_string()]);
		assert_eq!(CommandRequest::from(["log", "-l", "1"]).args().len(), 3);
		assert_eq!(CommandRequest::from(vec!["id".to_string()]).args().name(), Some("id"));
	}

	#[tokio::test]
	async fn run_command_returns_output_lines() {
		let factory = FakeSessionFactory::new().with_script(|_| FakeReply::ok(["default"]));
		let conn = connection(&factory);
		conn.start().await.unwrap();

		let lines = conn.run_command(["branch"]).await.unwrap();
		assert_eq!(lines, vec!["default"]);
	}

	#[tokio::test]
	async fn non_zero_result_fails_with_combined_output() {
		let factory = FakeSessionFactory::new().with_script(|_| FakeReply::failure(255, ["abort: unknown revision 'nope'"]).with_output(["partial"]));
		let conn = connection(&factory);

		let err = conn.run_command(["log", "-r", "nope"]).await.unwrap_err();
		match err {
			Error::CommandFailed {
				command,
				result_code,
				output,
			} => {
				assert_eq!(command, "log -r nope");
				assert_eq!(result_code, 255);
				assert!(output.contains("partial"));
				assert!(output.contains("abort: unknown revision 'nope'"));
			}
			other => panic!("expected CommandFailed, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn returning_errors_variant_resolves_with_raw_code() {
		let factory = FakeSessionFactory::new().with_script(|_| FakeReply::failure(1, ["nothing changed"]));
		let conn = connection(&factory);

		let result = conn.run_command_returning_errors("commit").await.unwrap();
		assert_eq!(result.result_code, 1);
		assert_eq!(result.error_lines, vec!["nothing changed"]);
		assert!(conn.is_usable());
	}

	#[tokio::test]
	async fn session_starts_lazily_before_first_command() {
		let factory = FakeSessionFactory::new();
		let conn = connection(&factory);
		conn.run_command("status").await.unwrap();

		let log = factory.log();
		assert_eq!(log.started.len(), 1);
		assert!(matches!(log.events.first(), Some(FakeEvent::Started { .. })));
	}

	#[tokio::test]
	async fn start_failure_is_reported_and_session_stopped() {
		let factory = FakeSessionFactory::new();
		factory.fail_starts("no hg on PATH");
		let conn = connection(&factory);

		let err = conn.start().await.unwrap_err();
		assert!(matches!(err, Error::StartFailure { ref reason, .. } if reason == "no hg on PATH"));
		assert_eq!(factory.log().stopped, 1);
		assert_eq!(factory.log().live, 0);
	}

	#[tokio::test]
	async fn failed_command_does_not_affect_queued_siblings() {
		let factory = FakeSessionFactory::new().with_script(|args| match args.name() {
			Some("bad") => FakeReply::failure(255, ["abort"]),
			_ => FakeReply::ok(["fine"]),
		});
		let conn = connection(&factory);

		let first = conn.run_command("bad");
		let second = conn.run_command("good");
		assert!(first.await.is_err());
		assert_eq!(second.await.unwrap(), vec!["fine"]);
	}

	#[tokio::test]
	async fn prompt_responder_is_forwarded() {
		let factory = FakeSessionFactory::new().with_script(|_| FakeReply::default().with_prompt("password"));
		let conn = connection(&factory);

		let request = CommandRequest::new(["pull"]).with_prompt_responder(prompt_responder(|key| async move { Ok(format!("{key}-secret")) }));
		let lines = conn.run_command(request).await.unwrap();
		assert_eq!(lines, vec!["password-secret"]);
	}

	#[tokio::test]
	async fn session_crash_marks_connection_faulted() {
		let factory = FakeSessionFactory::new().with_script(|_| FakeReply::crashing("helper exited with signal 9"));
		let conn = connection(&factory);

		let err = conn.run_command("status").await.unwrap_err();
		assert!(matches!(err, Error::SessionTerminated(_)));
		assert!(conn.is_faulted());
		assert!(!conn.is_usable());
	}

	/// Reports a failure for `crash` but keeps accepting later commands.
	struct ResilientSession {
		received: Arc<AtomicU64>,
	}

	impl Session for ResilientSession {
		fn start<'a>(&'a mut self, _path: &'a std::path::Path) -> futures_util::future::BoxFuture<'a, Result<()>> {
			Box::pin(async { Ok(()) })
		}

		fn run_command<'a>(
			&'a mut self,
			args: &'a CommandArgs,
			_on_output_line: Option<crate::session::OutputLineSink<'a>>,
			_prompt: Option<PromptResponder>,
		) -> futures_util::future::BoxFuture<'a, Result<CommandResult>> {
			Box::pin(async move {
				self.received.fetch_add(1, Ordering::SeqCst);
				match args.name() {
					Some("crash") => Err(Error::SessionTerminated("pipe closed".to_string())),
					_ => Ok(CommandResult::success(vec!["ok".to_string()])),
				}
			})
		}

		fn stop(&mut self) {}
	}

	#[tokio::test]
	async fn commands_queued_behind_a_crash_never_reach_the_session() {
		let received = Arc::new(AtomicU64::new(0));
		let conn = Connection::new(
			ResilientSession {
				received: Arc::clone(&received),
			},
			"/repo",
		);

		let crash = conn.run_command("crash");
		let queued = conn.run_command("status");

		assert!(matches!(crash.await, Err(Error::SessionTerminated(_))));
		assert!(matches!(queued.await, Err(Error::SessionTerminated(_))));
		assert!(matches!(conn.run_command("log").await, Err(Error::SessionTerminated(_))));
		assert_eq!(received.load(Ordering::SeqCst), 1);
		assert!(conn.is_faulted());
	}

	#[tokio::test]
	async fn dispose_drains_earlier_commands_and_rejects_later_ones() {
		let factory = FakeSessionFactory::new().with_script(|_| FakeReply::ok(["ran"]).with_delay(Duration::from_millis(5)));
		let conn = connection(&factory);

		let before = conn.run_command("first");
		conn.dispose();
		let after = conn.run_command("second");

		assert_eq!(before.await.unwrap(), vec!["ran"]);
		assert!(matches!(after.await, Err(Error::ConnectionClosed(_))));
		assert!(conn.is_disposed());

		let log = factory.log();
		assert_eq!(log.commands(), vec![CommandArgs::from("first")]);
		assert_eq!(log.stopped, 1);
		assert_eq!(log.live, 0);
	}

	#[tokio::test]
	async fn dispose_is_idempotent() {
		let factory = FakeSessionFactory::new();
		let conn = connection(&factory);
		conn.start().await.unwrap();

		conn.dispose();
		conn.dispose();
		assert!(matches!(conn.start().await, Err(Error::ConnectionClosed(_))));
		assert_eq!(factory.log().stop_calls, 1);
	}

	#[tokio::test]
	async fn clones_share_one_connection() {
		let factory = FakeSessionFactory::new();
		let a = connection(&factory);
		let b = a.clone();
		let other = connection(&factory);

		assert!(Connection::ptr_eq(&a, &b));
		assert!(!Connection::ptr_eq(&a, &other));
		assert_eq!(a.record_acquisition(), 1);
		assert_eq!(b.activity(), 1);
	}
}
