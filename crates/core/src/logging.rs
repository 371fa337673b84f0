//! Tracing subscriber setup.
//!
//! Library code only emits events through `tracing`; installing a subscriber
//! is left to the application, which calls [`init_logging`] once at startup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Environment variable holding an `EnvFilter` directive, e.g.
/// `hgcs.pool=trace`.
pub const LOG_ENV: &str = "HGCS_LOG";

/// Filter used when [`LOG_ENV`] is unset or unparsable.
pub fn default_directive(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn",
		1 => "warn,hgcs=info",
		2 => "warn,hgcs=debug",
		_ => "warn,hgcs=trace",
	}
}

fn env_filter(env: Option<&str>, verbosity: u8) -> EnvFilter {
	env.and_then(|directive| EnvFilter::try_new(directive).ok())
		.unwrap_or_else(|| EnvFilter::new(default_directive(verbosity)))
}

/// Installs a stderr fmt subscriber as the global default.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(verbosity: u8) -> Result<(), TryInitError> {
	let env = std::env::var(LOG_ENV).ok();
	tracing_subscriber::fmt()
		.with_env_filter(env_filter(env.as_deref(), verbosity))
		.with_target(true)
		.with_writer(std::io::stderr)
		.finish()
		.try_init()
}

/// Routes log output through the test harness's captured writer.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
	let env = std::env::var(LOG_ENV).ok();
	let _ = tracing_subscriber::fmt()
		.with_env_filter(env_filter(env.as_deref(), 3))
		.with_test_writer()
		.finish()
		.try_init();
}
