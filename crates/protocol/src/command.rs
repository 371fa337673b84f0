//! Command argument vectors and command results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered command tokens forwarded verbatim to the command server.
///
/// A command is either a single token (`"status"`) or an ordered sequence
/// (`["log", "-r", "."]`). Tokens are never validated or escaped here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandArgs(Vec<String>);

impl CommandArgs {
	/// Creates an argument vector from any sequence of tokens.
	pub fn new<I, S>(tokens: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self(tokens.into_iter().map(Into::into).collect())
	}

	/// Returns the tokens in order.
	pub fn as_slice(&self) -> &[String] {
		&self.0
	}

	/// Returns the first token, which names the command.
	pub fn name(&self) -> Option<&str> {
		self.0.first().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Appends the given tokens after the existing ones.
	pub fn extend<I, S>(&mut self, tokens: I)
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.0.extend(tokens.into_iter().map(Into::into));
	}

	pub fn into_vec(self) -> Vec<String> {
		self.0
	}
}

impl fmt::Display for CommandArgs {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0.join(" "))
	}
}

impl From<&str> for CommandArgs {
	fn from(token: &str) -> Self {
		Self(vec![token.to_string()])
	}
}

impl From<String> for CommandArgs {
	fn from(token: String) -> Self {
		Self(vec![token])
	}
}

impl From<Vec<String>> for CommandArgs {
	fn from(tokens: Vec<String>) -> Self {
		Self(tokens)
	}
}

impl From<Vec<&str>> for CommandArgs {
	fn from(tokens: Vec<&str>) -> Self {
		Self::new(tokens)
	}
}

impl From<&[&str]> for CommandArgs {
	fn from(tokens: &[&str]) -> Self {
		Self::new(tokens.iter().copied())
	}
}

impl<const N: usize> From<[&str; N]> for CommandArgs {
	fn from(tokens: [&str; N]) -> Self {
		Self::new(tokens)
	}
}

/// Outcome of one command executed by the command server.
///
/// Produced once by the session and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
	/// Numeric result code; zero means success.
	pub result_code: i32,
	/// Lines written to the output channel, in order.
	#[serde(default)]
	pub output_lines: Vec<String>,
	/// Lines written to the error channel, in order.
	#[serde(default)]
	pub error_lines: Vec<String>,
}

impl CommandResult {
	pub fn new(result_code: i32, output_lines: Vec<String>, error_lines: Vec<String>) -> Self {
		Self {
			result_code,
			output_lines,
			error_lines,
		}
	}

	/// Successful result carrying only output lines.
	pub fn success(output_lines: Vec<String>) -> Self {
		Self::new(0, output_lines, Vec::new())
	}

	pub fn is_success(&self) -> bool {
		self.result_code == 0
	}

	/// Output and error lines joined for diagnostics.
	///
	/// Output lines come first, newline separated, followed by the error
	/// lines when there are any.
	pub fn combined_output(&self) -> String {
		let output = self.output_lines.join("\n");
		if self.error_lines.is_empty() {
			return output;
		}
		let errors = self.error_lines.join("\n");
		if output.is_empty() { errors } else { format!("{output}\n{errors}") }
	}
}
