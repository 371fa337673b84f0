//! Canonical repository locations.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors produced while turning a caller-supplied location into a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
	#[error("repository location is empty")]
	Empty,
	#[error("invalid file URI {uri}: {reason}")]
	InvalidUri { uri: String, reason: String },
	#[error("file URI {0} does not denote a local path")]
	NotLocal(String),
	#[error("unsupported scheme {scheme:?} in repository location {location}")]
	UnsupportedScheme { scheme: String, location: String },
}

/// Canonical filesystem location of a repository; the pool's lookup key.
///
/// Two spellings of the same location (`/r/./a`, `/r/b/../a/`) compare equal
/// once wrapped. Construction through [`RepositoryPath::new`] is purely
/// lexical; [`RepositoryPath::resolve`] also consults the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryPath(PathBuf);

impl RepositoryPath {
	/// Wraps `path` after lexical normalization.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self(normalize(&path.into()))
	}

	/// Resolves a caller-supplied location, which may be a plain path or a
	/// `file://` URI.
	///
	/// Existing locations are canonicalized through the filesystem so that
	/// symlinked spellings share one key. Missing locations fall back to
	/// lexical normalization.
	pub fn resolve(location: &str) -> Result<Self, LocationError> {
		let path = location_to_path(location)?;
		match std::fs::canonicalize(&path) {
			Ok(canonical) => Ok(Self(canonical)),
			Err(_) => Ok(Self::new(path)),
		}
	}

	pub fn as_path(&self) -> &Path {
		&self.0
	}

	pub fn into_path_buf(self) -> PathBuf {
		self.0
	}
}

impl AsRef<Path> for RepositoryPath {
	fn as_ref(&self) -> &Path {
		&self.0
	}
}

impl fmt::Display for RepositoryPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.display().fmt(f)
	}
}

impl From<PathBuf> for RepositoryPath {
	fn from(path: PathBuf) -> Self {
		Self::new(path)
	}
}

impl From<&Path> for RepositoryPath {
	fn from(path: &Path) -> Self {
		Self::new(path)
	}
}

impl From<&str> for RepositoryPath {
	fn from(path: &str) -> Self {
		Self::new(path)
	}
}

impl From<String> for RepositoryPath {
	fn from(path: String) -> Self {
		Self::new(path)
	}
}

impl From<&RepositoryPath> for RepositoryPath {
	fn from(path: &RepositoryPath) -> Self {
		path.clone()
	}
}

/// Converts a plain path or `file://` URI into a filesystem path.
///
/// Any other URI scheme is rejected; a repository handled by a local command
/// server always lives on the local filesystem.
pub fn location_to_path(location: &str) -> Result<PathBuf, LocationError> {
	if location.is_empty() {
		return Err(LocationError::Empty);
	}

	if is_file_uri(location) {
		return file_uri_to_path(location);
	}

	// Single-letter schemes are Windows drive letters, not URIs.
	if let Ok(url) = Url::parse(location) {
		if url.scheme().len() > 1 {
			return Err(LocationError::UnsupportedScheme {
				scheme: url.scheme().to_string(),
				location: location.to_string(),
			});
		}
	}

	Ok(PathBuf::from(location))
}

/// Normalizes a clone source for the command server.
///
/// `file://` URIs become plain paths because the command server does not
/// accept percent-encoded drive prefixes. Every other form (remote URLs,
/// plain paths, ssh shorthands) is forwarded unchanged.
pub fn normalize_clone_source(source: &str) -> Result<String, LocationError> {
	if is_file_uri(source) {
		let path = file_uri_to_path(source)?;
		return Ok(path.to_string_lossy().into_owned());
	}
	Ok(source.to_string())
}

fn is_file_uri(location: &str) -> bool {
	location.get(..7).is_some_and(|prefix| prefix.eq_ignore_ascii_case("file://"))
}

fn file_uri_to_path(uri: &str) -> Result<PathBuf, LocationError> {
	let url = Url::parse(uri).map_err(|err| LocationError::InvalidUri {
		uri: uri.to_string(),
		reason: err.to_string(),
	})?;
	url.to_file_path().map_err(|()| LocationError::NotLocal(uri.to_string()))
}

fn normalize(path: &Path) -> PathBuf {
	let mut out = PathBuf::new();
	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => match out.components().next_back() {
				Some(Component::Normal(_)) => {
					out.pop();
				}
				Some(Component::RootDir | Component::Prefix(_)) => {}
				_ => out.push(".."),
			},
			other => out.push(other.as_os_str()),
		}
	}

	if out.as_os_str().is_empty() {
		out.push(".");
	}
	out
}
