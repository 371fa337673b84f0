//! Registry of live connections keyed by repository path.
//!
//! The pool hands out one [`Connection`] per repository and closes it after a
//! grace period without acquisitions. The command server usually holds a lock
//! on the repository, so idle connections must not linger, but back-to-back
//! commands should not respawn the process either.
//!
//! # Eviction
//!
//! Every acquisition bumps the connection's activity counter and arms a timer
//! capturing the new value. When a timer fires it compares the captured value
//! with the current one: equal means no acquisition happened since, so the
//! connection is removed and disposed; different means a later acquisition
//! armed a later timer, and this one does nothing. Stale timers are never
//! cancelled, only outlived.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use hgcs_protocol::RepositoryPath;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::session::SessionFactory;

/// In-flight start shared by every caller acquiring the same path.
type PendingStart = Shared<BoxFuture<'static, std::result::Result<Option<Connection>, String>>>;

enum Entry {
	Starting { id: u64, pending: PendingStart },
	Ready(Connection),
}

enum Lookup {
	Ready(Connection, u64),
	Pending(PendingStart),
	Start(PendingStart),
}

struct PoolInner<F: SessionFactory> {
	factory: F,
	config: PoolConfig,
	entries: Mutex<HashMap<RepositoryPath, Entry>>,
	next_start: AtomicU64,
}

/// Owns at most one live connection per repository path.
///
/// Cloning yields another handle onto the same registry. Dropping the last
/// handle disposes every registered connection.
pub struct ConnectionPool<F: SessionFactory> {
	inner: Arc<PoolInner<F>>,
}

impl<F: SessionFactory> Clone for ConnectionPool<F> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<F: SessionFactory> ConnectionPool<F> {
	pub fn new(factory: F, config: PoolConfig) -> Self {
		Self {
			inner: Arc::new(PoolInner {
				factory,
				config,
				entries: Mutex::new(HashMap::new()),
				next_start: AtomicU64::new(0),
			}),
		}
	}

	pub fn config(&self) -> &PoolConfig {
		&self.inner.config
	}

	pub fn factory(&self) -> &F {
		&self.inner.factory
	}

	/// Returns the connection for `path`, starting one if necessary.
	///
	/// A registered, usable connection is returned as is and its idle timer
	/// restarts. Otherwise a new session is started and registered; if the
	/// start fails nothing is registered and the failure is returned.
	/// Concurrent first acquisitions share a single start.
	pub async fn acquire(&self, path: impl Into<RepositoryPath>) -> Result<Connection> {
		let path = path.into();

		loop {
			let lookup = {
				let mut entries = self.inner.entries.lock();
				let existing = match entries.get(&path) {
					Some(Entry::Ready(connection)) if connection.is_usable() => {
						let epoch = connection.record_acquisition();
						Some(Lookup::Ready(connection.clone(), epoch))
					}
					Some(Entry::Starting { pending, .. }) => Some(Lookup::Pending(pending.clone())),
					_ => None,
				};

				match existing {
					Some(lookup) => lookup,
					None => {
						if let Some(Entry::Ready(stale)) = entries.remove(&path) {
							warn!(
								target = "hgcs.pool",
								path = %path,
								faulted = stale.is_faulted(),
								"replacing unusable connection"
							);
							stale.dispose();
						}
						let id = self.inner.next_start.fetch_add(1, Ordering::SeqCst);
						let pending = self.start_connection(&path, id);
						entries.insert(
							path.clone(),
							Entry::Starting {
								id,
								pending: pending.clone(),
							},
						);
						Lookup::Start(pending)
					}
				}
			};

			let pending = match lookup {
				Lookup::Ready(connection, epoch) => {
					trace!(target = "hgcs.pool", path = %path, epoch, "reusing connection");
					self.arm_eviction(&path, &connection, epoch);
					return Ok(connection);
				}
				Lookup::Pending(pending) => {
					trace!(target = "hgcs.pool", path = %path, "waiting for in-flight start");
					pending
				}
				Lookup::Start(pending) => pending,
			};

			let started = pending.await.map_err(|reason| Error::StartFailure {
				path: path.as_path().to_path_buf(),
				reason,
			})?;

			let Some(connection) = started else {
				debug!(target = "hgcs.pool", path = %path, "start superseded by close; retrying");
				continue;
			};

			// Lease under the lock so an eviction cannot slip in between the
			// registry check and the counter bump.
			let epoch = {
				let entries = self.inner.entries.lock();
				match entries.get(&path) {
					Some(Entry::Ready(registered)) if Connection::ptr_eq(registered, &connection) => Some(connection.record_acquisition()),
					_ => None,
				}
			};

			match epoch {
				Some(epoch) => {
					self.arm_eviction(&path, &connection, epoch);
					return Ok(connection);
				}
				None => {
					debug!(target = "hgcs.pool", path = %path, "connection left the pool before lease; retrying");
				}
			}
		}
	}

	/// Returns the registered connection for `path` without leasing it.
	pub fn get(&self, path: impl Into<RepositoryPath>) -> Option<Connection> {
		match self.inner.entries.lock().get(&path.into()) {
			Some(Entry::Ready(connection)) => Some(connection.clone()),
			_ => None,
		}
	}

	/// `true` when a started connection is registered for `path`.
	pub fn contains(&self, path: impl Into<RepositoryPath>) -> bool {
		self.get(path).is_some()
	}

	/// Number of started connections. Starts still in flight are not counted.
	pub fn len(&self) -> usize {
		self.inner.entries.lock().values().filter(|entry| matches!(entry, Entry::Ready(_))).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Paths with a started connection, sorted.
	pub fn paths(&self) -> Vec<RepositoryPath> {
		let mut paths: Vec<_> = self
			.inner
			.entries
			.lock()
			.iter()
			.filter(|(_, entry)| matches!(entry, Entry::Ready(_)))
			.map(|(path, _)| path.clone())
			.collect();
		paths.sort();
		paths
	}

	/// Disposes every registered connection and empties the registry.
	///
	/// Starts still in flight finish unregistered and are disposed.
	pub fn close_all(&self) {
		let closed = self.inner.close_all();
		if closed > 0 {
			info!(target = "hgcs.pool", count = closed, "closed all connections");
		}
	}

	/// Builds the shared start for entry `id`.
	///
	/// Resolves to `Ok(None)` when the entry was closed or replaced while the
	/// session was starting; the fresh connection is disposed in that case.
	fn start_connection(&self, path: &RepositoryPath, id: u64) -> PendingStart {
		let connection = Connection::new(self.inner.factory.create_session(), path.clone());
		let pool = Arc::downgrade(&self.inner);
		let path = path.clone();

		async move {
			debug!(target = "hgcs.pool", path = %path, "starting connection");
			let outcome = connection.start().await;

			let Some(pool) = pool.upgrade() else {
				connection.dispose();
				return Ok(None);
			};

			let mut entries = pool.entries.lock();
			let still_pending = matches!(entries.get(&path), Some(Entry::Starting { id: current, .. }) if *current == id);

			match outcome {
				Ok(()) if still_pending => {
					entries.insert(path.clone(), Entry::Ready(connection.clone()));
					drop(entries);
					info!(target = "hgcs.pool", path = %path, "connection registered");
					Ok(Some(connection))
				}
				Ok(()) => {
					drop(entries);
					connection.dispose();
					Ok(None)
				}
				Err(err) => {
					if still_pending {
						entries.remove(&path);
					}
					drop(entries);
					connection.dispose();
					warn!(target = "hgcs.pool", path = %path, error = %err, "connection failed to start");
					Err(match err {
						Error::StartFailure { reason, .. } => reason,
						other => other.to_string(),
					})
				}
			}
		}
		.boxed()
		.shared()
	}

	fn arm_eviction(&self, path: &RepositoryPath, connection: &Connection, epoch: u64) {
		let pool: Weak<PoolInner<F>> = Arc::downgrade(&self.inner);
		let grace = self.inner.config.idle_grace();
		let path = path.clone();
		let connection = connection.clone();

		tokio::spawn(async move {
			tokio::time::sleep(grace).await;
			if let Some(pool) = pool.upgrade() {
				pool.evict_if_idle(&path, &connection, epoch);
			}
		});
	}
}

impl<F: SessionFactory> PoolInner<F> {
	fn evict_if_idle(&self, path: &RepositoryPath, connection: &Connection, epoch: u64) {
		let mut entries = self.entries.lock();
		if connection.activity() != epoch {
			trace!(target = "hgcs.pool", path = %path, epoch, "eviction superseded by later acquisition");
			return;
		}

		let registered = matches!(entries.get(path), Some(Entry::Ready(current)) if Connection::ptr_eq(current, connection));
		if !registered {
			return;
		}

		entries.remove(path);
		drop(entries);
		info!(target = "hgcs.pool", path = %path, "closing idle connection");
		connection.dispose();
	}

	fn close_all(&self) -> usize {
		let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, entry)| entry).collect();
		let count = drained.len();
		for entry in drained {
			if let Entry::Ready(connection) = entry {
				connection.dispose();
			}
		}
		count
	}
}

impl<F: SessionFactory> Drop for PoolInner<F> {
	fn drop(&mut self) {
		self.close_all();
	}
}
