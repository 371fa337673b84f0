//! Scripted in-memory sessions for testing connections, pooling, and clone.
//!
//! Replaces the helper process with a script that maps each command to a
//! canned reply, and records everything the runtime does to its sessions.
//!
//! # Example
//!
//! ```ignore
//! let factory = FakeSessionFactory::new().with_script(|args| match args.name() {
//!     Some("status") => FakeReply::ok(["M src/lib.rs"]),
//!     _ => FakeReply::failure(255, ["abort: unknown command"]),
//! });
//! let pool = ConnectionPool::new(factory.clone(), PoolConfig::default());
//! let connection = pool.acquire("/repo").await?;
//! assert_eq!(connection.run_command("status").await?, vec!["M src/lib.rs"]);
//! assert_eq!(factory.log().started.len(), 1);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use hgcs_protocol::{CommandArgs, CommandResult};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::session::{OutputLineSink, PromptResponder, Session, SessionFactory};

type Script = Arc<dyn Fn(&CommandArgs) -> FakeReply + Send + Sync>;

/// Canned reply for one command.
#[derive(Debug, Clone, Default)]
pub struct FakeReply {
	pub result_code: i32,
	pub output_lines: Vec<String>,
	pub error_lines: Vec<String>,
	/// Time the fake process takes before answering.
	pub delay: Option<Duration>,
	/// Prompt key to ask the responder; the answer is appended to the output.
	pub prompt: Option<String>,
	/// Simulates the process dying mid-command.
	pub crash: Option<String>,
}

impl FakeReply {
	pub fn ok<I, S>(lines: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			output_lines: lines.into_iter().map(Into::into).collect(),
			..Self::default()
		}
	}

	pub fn failure<I, S>(result_code: i32, errors: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			result_code,
			error_lines: errors.into_iter().map(Into::into).collect(),
			..Self::default()
		}
	}

	pub fn crashing(reason: impl Into<String>) -> Self {
		Self {
			crash: Some(reason.into()),
			..Self::default()
		}
	}

	pub fn with_output<I, S>(mut self, lines: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.output_lines = lines.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);
		self
	}

	pub fn with_prompt(mut self, key: impl Into<String>) -> Self {
		self.prompt = Some(key.into());
		self
	}
}

/// Something a fake session observed, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
	Started { session: usize, path: PathBuf },
	Begin { session: usize, args: CommandArgs },
	End { session: usize, args: CommandArgs },
	Stopped { session: usize },
}

/// Snapshot of everything the factory's sessions recorded.
#[derive(Debug, Clone, Default)]
pub struct FakeLog {
	/// Sessions handed out by the factory.
	pub created: usize,
	/// Paths passed to `start`, one entry per attempt.
	pub started: Vec<PathBuf>,
	/// Sessions that were stopped at least once.
	pub stopped: usize,
	/// Total `stop` calls, including repeated ones.
	pub stop_calls: usize,
	/// Sessions started and not yet stopped.
	pub live: usize,
	pub events: Vec<FakeEvent>,
}

impl FakeLog {
	/// Commands in the order sessions began running them.
	pub fn commands(&self) -> Vec<CommandArgs> {
		self.events
			.iter()
			.filter_map(|event| match event {
				FakeEvent::Begin { args, .. } => Some(args.clone()),
				_ => None,
			})
			.collect()
	}
}

struct FakeState {
	script: Mutex<Script>,
	start_failure: Mutex<Option<String>>,
	start_delay: Mutex<Option<Duration>>,
	log: Mutex<FakeLog>,
}

/// Factory of scripted sessions sharing one log.
///
/// Cloning the factory shares the script and the log, so a test can hand one
/// clone to the pool and inspect the other.
#[derive(Clone)]
pub struct FakeSessionFactory {
	state: Arc<FakeState>,
}

impl FakeSessionFactory {
	/// Creates a factory whose sessions answer every command with success and
	/// no output.
	pub fn new() -> Self {
		let script: Script = Arc::new(|_: &CommandArgs| FakeReply::default());
		Self {
			state: Arc::new(FakeState {
				script: Mutex::new(script),
				start_failure: Mutex::new(None),
				start_delay: Mutex::new(None),
				log: Mutex::new(FakeLog::default()),
			}),
		}
	}

	pub fn with_script<F>(self, script: F) -> Self
	where
		F: Fn(&CommandArgs) -> FakeReply + Send + Sync + 'static,
	{
		let script: Script = Arc::new(script);
		*self.state.script.lock() = script;
		self
	}

	/// Makes every subsequent `start` fail with `reason`.
	pub fn fail_starts(&self, reason: impl Into<String>) {
		*self.state.start_failure.lock() = Some(reason.into());
	}

	pub fn allow_starts(&self) {
		*self.state.start_failure.lock() = None;
	}

	/// Delays the handshake of every subsequent `start`.
	pub fn set_start_delay(&self, delay: Duration) {
		*self.state.start_delay.lock() = Some(delay);
	}

	pub fn log(&self) -> FakeLog {
		self.state.log.lock().clone()
	}
}

impl Default for FakeSessionFactory {
	fn default() -> Self {
		Self::new()
	}
}

impl SessionFactory for FakeSessionFactory {
	type Session = FakeSession;

	fn create_session(&self) -> FakeSession {
		let mut log = self.state.log.lock();
		log.created += 1;
		FakeSession {
			id: log.created,
			state: Arc::clone(&self.state),
			running: false,
			stopped: false,
		}
	}
}

/// Session driven by the factory's script.
pub struct FakeSession {
	id: usize,
	state: Arc<FakeState>,
	running: bool,
	stopped: bool,
}

impl FakeSession {
	pub fn id(&self) -> usize {
		self.id
	}

	fn record(&self, event: FakeEvent) {
		self.state.log.lock().events.push(event);
	}
}

impl Session for FakeSession {
	fn start<'a>(&'a mut self, path: &'a Path) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.state.log.lock().started.push(path.to_path_buf());

			let delay = *self.state.start_delay.lock();
			if let Some(delay) = delay {
				tokio::time::sleep(delay).await;
			}

			let failure = self.state.start_failure.lock().clone();
			if let Some(reason) = failure {
				return Err(Error::StartFailure {
					path: path.to_path_buf(),
					reason,
				});
			}

			self.running = true;
			self.state.log.lock().live += 1;
			self.record(FakeEvent::Started {
				session: self.id,
				path: path.to_path_buf(),
			});
			Ok(())
		})
	}

	fn run_command<'a>(
		&'a mut self,
		args: &'a CommandArgs,
		mut on_output_line: Option<OutputLineSink<'a>>,
		prompt: Option<PromptResponder>,
	) -> BoxFuture<'a, Result<CommandResult>> {
		Box::pin(async move {
			if !self.running {
				return Err(Error::SessionTerminated(format!("session {} is not running", self.id)));
			}

			self.record(FakeEvent::Begin {
				session: self.id,
				args: args.clone(),
			});

			let script = Arc::clone(&*self.state.script.lock());
			let reply = script(args);

			match reply.delay {
				Some(delay) => tokio::time::sleep(delay).await,
				None => tokio::task::yield_now().await,
			}

			if let Some(reason) = reply.crash {
				self.running = false;
				self.state.log.lock().live -= 1;
				return Err(Error::SessionTerminated(reason));
			}

			let mut output_lines = reply.output_lines;
			if let Some(key) = reply.prompt {
				let responder = prompt.ok_or_else(|| Error::Prompt(format!("no responder for prompt {key:?}")))?;
				output_lines.push(responder(key).await?);
			}

			if let Some(sink) = on_output_line.as_deref_mut() {
				for line in &output_lines {
					sink(line);
				}
			}

			self.record(FakeEvent::End {
				session: self.id,
				args: args.clone(),
			});
			Ok(CommandResult::new(reply.result_code, output_lines, reply.error_lines))
		})
	}

	fn stop(&mut self) {
		let mut log = self.state.log.lock();
		log.stop_calls += 1;
		if self.stopped {
			return;
		}
		self.stopped = true;
		log.stopped += 1;
		if self.running {
			self.running = false;
			log.live -= 1;
		}
		log.events.push(FakeEvent::Stopped { session: self.id });
	}
}
