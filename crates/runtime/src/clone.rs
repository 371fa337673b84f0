//! Repository cloning through a transient command-server session.
//!
//! `hg clone` runs outside any repository, so it cannot use a pooled
//! connection. A dedicated session is started for the duration of the clone
//! and stopped afterwards regardless of outcome. Progress is estimated from a
//! few well-known milestone lines in the clone output.

use std::path::PathBuf;

use hgcs_protocol::{CommandArgs, RepositoryPath, normalize_clone_source};
use tracing::{debug, info, warn};

use crate::connection::{self, Connection};
use crate::error::{Error, Result};
use crate::session::{Session, SessionFactory, StopOnDrop};

/// Output lines `hg clone` prints at known points, with the fraction of the
/// work done when each appears.
pub const CLONE_MILESTONES: [(&str, f64); 3] = [
	("requesting all changes", 0.1),
	("adding changesets", 0.5),
	("adding manifests", 0.9),
];

/// Returns the progress fraction for a milestone line.
pub fn milestone_progress(line: &str) -> Option<f64> {
	let line = line.trim();
	CLONE_MILESTONES
		.iter()
		.find(|(milestone, _)| *milestone == line)
		.map(|(_, fraction)| *fraction)
}

/// Extra settings for [`clone`].
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
	/// Arguments appended after source and destination, e.g. `--noupdate`.
	pub extra_args: Vec<String>,
	/// Directory the transient session runs in. Defaults to the process's
	/// current directory.
	pub working_dir: Option<PathBuf>,
}

impl CloneOptions {
	pub fn with_args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.extra_args.extend(args.into_iter().map(Into::into));
		self
	}

	pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.working_dir = Some(dir.into());
		self
	}
}

/// Reports milestones as they appear, dropping any that would go backwards.
struct ProgressTracker<'a> {
	report: Option<&'a mut (dyn FnMut(f64) + Send)>,
	last: f64,
}

impl ProgressTracker<'_> {
	fn observe(&mut self, line: &str) {
		let Some(fraction) = milestone_progress(line) else {
			return;
		};
		if fraction < self.last {
			return;
		}
		self.last = fraction;
		if let Some(report) = self.report.as_deref_mut() {
			report(fraction);
		}
	}
}

/// Clones `from_url` into `to_path` and returns an unstarted connection to
/// the new repository.
///
/// `file://` sources are converted to local paths; any other source is
/// passed to Mercurial untouched. The returned connection starts its own
/// session on first use and is not registered with any pool.
pub async fn clone<F: SessionFactory>(
	factory: &F,
	from_url: &str,
	to_path: impl Into<RepositoryPath>,
	options: CloneOptions,
	progress: Option<&mut (dyn FnMut(f64) + Send)>,
) -> Result<Connection> {
	let destination = to_path.into();
	let source = normalize_clone_source(from_url)?;
	let working_dir = match options.working_dir {
		Some(dir) => RepositoryPath::new(dir),
		None => RepositoryPath::new(std::env::current_dir()?),
	};

	let mut args = CommandArgs::new(["clone".to_string(), source.clone(), destination.to_string()]);
	args.extend(options.extra_args);

	info!(target = "hgcs.clone", source = %source, destination = %destination, "cloning repository");

	let result = {
		let mut session = StopOnDrop::new(factory.create_session());
		session
			.start(working_dir.as_path())
			.await
			.map_err(|err| connection::start_failure(&working_dir, err))?;

		let mut tracker = ProgressTracker { report: progress, last: 0.0 };
		let mut on_line = |line: &str| tracker.observe(line);
		session.run_command(&args, Some(&mut on_line), None).await?
	};

	if !result.is_success() {
		warn!(
			target = "hgcs.clone",
			source = %source,
			result_code = result.result_code,
			"clone failed"
		);
		return Err(Error::CloneFailed {
			result_code: result.result_code,
		});
	}

	debug!(target = "hgcs.clone", destination = %destination, "clone finished");
	Ok(Connection::new(factory.create_session(), destination))
}
