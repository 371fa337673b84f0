//! Pool configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Grace period after the last acquisition before an idle connection closes.
///
/// Short enough that the repository lock held by the command server is
/// released promptly, long enough to absorb back-to-back commands.
pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(10);

/// Environment variable overriding [`PoolConfig::idle_grace_ms`].
pub const IDLE_GRACE_ENV: &str = "HGCS_IDLE_GRACE_MS";

/// Settings for a [`ConnectionPool`](crate::ConnectionPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PoolConfig {
	/// Idle grace period in milliseconds.
	#[serde(default = "default_idle_grace_ms")]
	pub idle_grace_ms: u64,
}

fn default_idle_grace_ms() -> u64 {
	DEFAULT_IDLE_GRACE.as_millis() as u64
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			idle_grace_ms: default_idle_grace_ms(),
		}
	}
}

impl PoolConfig {
	pub fn with_idle_grace(idle_grace: Duration) -> Self {
		Self {
			idle_grace_ms: idle_grace.as_millis() as u64,
		}
	}

	pub fn idle_grace(&self) -> Duration {
		Duration::from_millis(self.idle_grace_ms)
	}

	/// Parses a JSON document such as `{"idleGraceMs": 5000}`.
	pub fn from_json(json: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(json)?;
		config.validate()
	}

	/// Loads configuration from a JSON file.
	pub fn from_file(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)?;
		Self::from_json(&content)
	}

	/// Applies [`IDLE_GRACE_ENV`] when it is set.
	pub fn with_env_overrides(self) -> Result<Self> {
		let value = std::env::var(IDLE_GRACE_ENV).ok();
		self.with_idle_grace_override(value.as_deref())
	}

	fn with_idle_grace_override(mut self, value: Option<&str>) -> Result<Self> {
		let Some(value) = value else {
			return Ok(self);
		};
		self.idle_grace_ms = value
			.trim()
			.parse()
			.map_err(|err| Error::Config(format!("{IDLE_GRACE_ENV}={value:?} is not a millisecond count: {err}")))?;
		self.validate()
	}

	fn validate(self) -> Result<Self> {
		if self.idle_grace_ms == 0 {
			return Err(Error::Config("idleGraceMs must be greater than zero".to_string()));
		}
		Ok(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_grace_is_ten_seconds() {
		assert_eq!(PoolConfig::default().idle_grace(), Duration::from_secs(10));
	}

	#[test]
	fn parses_camel_case_json() {
		let config = PoolConfig::from_json(r#"{"idleGraceMs": 2500}"#).unwrap();
		assert_eq!(config.idle_grace(), Duration::from_millis(2500));
	}

	#[test]
	fn missing_fields_fall_back_to_defaults() {
		assert_eq!(PoolConfig::from_json("{}").unwrap(), PoolConfig::default());
	}

	#[test]
	fn unknown_fields_are_rejected() {
		assert!(matches!(PoolConfig::from_json(r#"{"idleGrace": 1}"#), Err(Error::Json(_))));
	}

	#[test]
	fn zero_grace_is_rejected() {
		assert!(matches!(PoolConfig::from_json(r#"{"idleGraceMs": 0}"#), Err(Error::Config(_))));
	}

	#[test]
	fn override_replaces_grace() {
		let config = PoolConfig::default().with_idle_grace_override(Some(" 750 ")).unwrap();
		assert_eq!(config.idle_grace(), Duration::from_millis(750));
		assert_eq!(PoolConfig::default().with_idle_grace_override(None).unwrap(), PoolConfig::default());
	}

	#[test]
	fn malformed_override_is_a_config_error() {
		let err = PoolConfig::default().with_idle_grace_override(Some("soon")).unwrap_err();
		assert!(err.to_string().contains(IDLE_GRACE_ENV));
	}

	#[test]
	fn loads_from_file() {
		let tmp = tempfile::TempDir::new().unwrap();
		let path = tmp.path().join("pool.json");
		std::fs::write(&path, r#"{"idleGraceMs": 300}"#).unwrap();
		assert_eq!(PoolConfig::from_file(&path).unwrap().idle_grace_ms, 300);
		assert!(matches!(PoolConfig::from_file(&tmp.path().join("missing.json")), Err(Error::Io(_))));
	}
}
