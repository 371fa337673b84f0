//! Pooled connections to the Mercurial command server.
//!
//! [`Repositories`] is the usual entry point: hand it a [`SessionFactory`]
//! that knows how to launch the helper process, then open or clone
//! repositories by location. The lower-level pool and connection types are
//! re-exported from `hgcs-runtime` for callers that manage paths themselves.

pub mod logging;
pub mod repositories;

pub use hgcs_protocol::{CommandArgs, CommandResult, LocationError, RepositoryPath, location_to_path, normalize_clone_source};
pub use hgcs_runtime::{
	CLONE_MILESTONES, CloneOptions, CommandRequest, Connection, ConnectionPool, DEFAULT_IDLE_GRACE, Error, IDLE_GRACE_ENV, OutputLineSink, PoolConfig,
	PromptResponder, Result, Session, SessionFactory, clone, fake_session, milestone_progress, prompt_responder,
};
pub use repositories::Repositories;
