//! Application-facing entry point for working with repositories.

use hgcs_runtime::{CloneOptions, CommandRequest, Connection, ConnectionPool, PoolConfig, RepositoryPath, Result, SessionFactory};
use tracing::{debug, info};

/// Opens, clones and closes repositories over a shared connection pool.
///
/// Accepts caller-supplied locations (plain paths or `file://` URIs) and
/// resolves them to canonical pool keys, so differently spelled locations of
/// one repository share one command server.
pub struct Repositories<F: SessionFactory> {
	pool: ConnectionPool<F>,
}

impl<F: SessionFactory> Repositories<F> {
	pub fn new(factory: F) -> Self {
		Self::with_config(factory, PoolConfig::default())
	}

	pub fn with_config(factory: F, config: PoolConfig) -> Self {
		debug!(target = "hgcs.repositories", idle_grace_ms = config.idle_grace_ms, "creating repository service");
		Self {
			pool: ConnectionPool::new(factory, config),
		}
	}

	/// Uses the default configuration adjusted by environment overrides.
	pub fn from_env(factory: F) -> Result<Self> {
		let config = PoolConfig::default().with_env_overrides()?;
		Ok(Self::with_config(factory, config))
	}

	pub fn pool(&self) -> &ConnectionPool<F> {
		&self.pool
	}

	/// Returns the pooled connection for `location`.
	pub async fn open(&self, location: &str) -> Result<Connection> {
		let path = RepositoryPath::resolve(location)?;
		self.pool.acquire(path).await
	}

	/// Opens `location` and runs a single command on it.
	pub async fn run<R>(&self, location: &str, request: R) -> Result<Vec<String>>
	where
		R: Into<CommandRequest>,
	{
		let connection = self.open(location).await?;
		connection.run_command(request).await
	}

	/// Clones `from_url` into `to_location`.
	///
	/// The returned connection is not pooled; later [`open`](Self::open)
	/// calls for the same location get their own pooled connection.
	pub async fn clone_repository(
		&self,
		from_url: &str,
		to_location: &str,
		options: CloneOptions,
		progress: Option<&mut (dyn FnMut(f64) + Send)>,
	) -> Result<Connection> {
		let destination = RepositoryPath::resolve(to_location)?;
		hgcs_runtime::clone(self.pool.factory(), from_url, destination, options, progress).await
	}

	/// Closes every pooled connection.
	pub fn shutdown(&self) {
		info!(target = "hgcs.repositories", open = self.pool.len(), "shutting down repositories");
		self.pool.close_all();
	}
}
