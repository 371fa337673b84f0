//! Pooled connections to the Mercurial command server.
//!
//! Spawning `hg serve --cmdserver` is expensive, and a running command
//! server holds the repository open. This crate keeps one session per
//! repository alive while it is in use and closes it shortly after:
//!
//! * [`Connection`] serializes commands from concurrent callers onto a single
//!   [`Session`]
//! * [`ConnectionPool`] shares one connection per repository path and evicts
//!   it after an idle grace period
//! * [`clone()`] runs `hg clone` through a transient session and reports
//!   coarse progress
//!
//! Launching the helper process is left to a [`SessionFactory`]
//! implementation supplied by the caller. [`fake_session`] provides a
//! scripted one for tests.

pub mod clone;
pub mod config;
pub mod connection;
pub mod error;
pub mod fake_session;
pub mod pool;
pub mod session;

pub use clone::{CLONE_MILESTONES, CloneOptions, clone, milestone_progress};
pub use config::{DEFAULT_IDLE_GRACE, IDLE_GRACE_ENV, PoolConfig};
pub use connection::{CommandRequest, Connection};
pub use error::{Error, Result};
pub use hgcs_protocol::{CommandArgs, CommandResult, LocationError, RepositoryPath};
pub use pool::ConnectionPool;
pub use session::{OutputLineSink, PromptResponder, Session, SessionFactory, prompt_responder};
