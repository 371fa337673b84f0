//! Value types shared by the command-server runtime.
//!
//! These are the shapes that cross the boundary between callers, the
//! connection pool and the session collaborator: command argument vectors,
//! command results, and the canonical repository location used as a pool key.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: no process or runtime behavior
//! * Protocol agnostic: the session's wire encoding lives elsewhere
//! * Stable: changes only when the session contract changes
//!
//! Higher-level APIs are built on top of these types in `hgcs-runtime`.

pub mod command;
pub mod location;

pub use command::*;
pub use location::*;
