//! Configuration for starting a session.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for starting a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Repository root the server indexes; also the process working directory.
	pub repository_root: PathBuf,
	/// Explicit server command. When `None`, `ivy_lsp` is resolved on `PATH`.
	pub command: Option<PathBuf>,
	/// Extra environment variables for the spawned process, applied after
	/// the include/exclude filters.
	pub env: Vec<(String, String)>,
	/// Deadline for the whole initialize/initialized handshake.
	pub startup_timeout: Duration,
	/// Default per-request timeout for custom requests.
	pub request_timeout: Duration,
}

impl SessionConfig {
	/// Create a configuration with default timeouts.
	pub fn new(repository_root: impl Into<PathBuf>) -> Self {
		Self {
			repository_root: repository_root.into(),
			command: None,
			env: Vec::new(),
			startup_timeout: Duration::from_secs(30),
			request_timeout: Duration::from_secs(30),
		}
	}

	/// Override the server command instead of resolving `ivy_lsp` on `PATH`.
	#[must_use]
	pub fn command(mut self, command: impl Into<PathBuf>) -> Self {
		self.command = Some(command.into());
		self
	}

	/// Add environment variables for the spawned process.
	#[must_use]
	pub fn env(
		mut self,
		env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
	) -> Self {
		self.env
			.extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
		self
	}

	/// Set the handshake deadline.
	#[must_use]
	pub fn startup_timeout(mut self, timeout: Duration) -> Self {
		self.startup_timeout = timeout;
		self
	}

	/// Set the default per-request timeout.
	#[must_use]
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_config_builder() {
		let config = SessionConfig::new("/srv/proto")
			.command("/opt/bin/ivy_lsp")
			.env([("IVY_LSP_EXCLUDE_PATHS", "submodules")])
			.startup_timeout(Duration::from_secs(5))
			.request_timeout(Duration::from_secs(120));

		assert_eq!(config.repository_root, PathBuf::from("/srv/proto"));
		assert_eq!(config.command.as_deref(), Some(std::path::Path::new("/opt/bin/ivy_lsp")));
		assert_eq!(config.env.len(), 1);
		assert_eq!(config.startup_timeout, Duration::from_secs(5));
		assert_eq!(config.request_timeout, Duration::from_secs(120));
	}
}
