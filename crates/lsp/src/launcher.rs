//! Locates the `ivy_lsp` executable and its environment configuration.
//!
//! Unlike most language servers, `ivy_lsp` is never auto-downloaded: it has
//! to be installed separately and discovered on `PATH`. Discovery is
//! uncached and side-effect free so callers (and tests) can observe "tool
//! absent" at any point.

use std::path::PathBuf;

use tracing::info;

use crate::{Error, Result};

/// Environment variable carrying the comma-separated include path filter.
pub const INCLUDE_PATHS_ENV: &str = "IVY_LSP_INCLUDE_PATHS";

/// Environment variable carrying the comma-separated exclude path filter.
pub const EXCLUDE_PATHS_ENV: &str = "IVY_LSP_EXCLUDE_PATHS";

/// Directories excluded from indexing when the host sets no filter.
pub const DEFAULT_EXCLUDE_PATHS: &str = "submodules,test";

/// Locate the `ivy_lsp` executable on `PATH`.
///
/// Returns its absolute path. This never substitutes a different binary.
///
/// # Errors
///
/// [`Error::ServerNotFound`] (carrying install guidance) when `ivy_lsp`
/// cannot be resolved.
pub fn find_ivy_lsp() -> Result<PathBuf> {
	find_server("ivy_lsp")
}

fn find_server(name: &str) -> Result<PathBuf> {
	let path = which::which(name).map_err(|_| Error::ServerNotFound)?;
	info!(path = %path.display(), "Found {name}");
	Ok(path)
}

/// Build the environment passed to the spawned `ivy_lsp` process.
///
/// Include/exclude filters are inherited from the host environment;
/// the exclude filter falls back to [`DEFAULT_EXCLUDE_PATHS`].
pub fn server_env() -> Vec<(String, String)> {
	let include = std::env::var(INCLUDE_PATHS_ENV).unwrap_or_default();
	let exclude =
		std::env::var(EXCLUDE_PATHS_ENV).unwrap_or_else(|_| DEFAULT_EXCLUDE_PATHS.to_string());
	vec![
		(INCLUDE_PATHS_ENV.to_string(), include),
		(EXCLUDE_PATHS_ENV.to_string(), exclude),
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_find_missing_server_is_server_not_found() {
		let err = find_server("ivy_lsp_definitely_not_installed_zz").unwrap_err();
		assert!(matches!(err, Error::ServerNotFound));
		assert!(err.to_string().contains("pip install ivy-lsp"));
	}

	#[test]
	fn test_find_server_returns_absolute_path() {
		// `sh` is on PATH everywhere these crates run.
		let path = find_server("sh").unwrap();
		assert!(path.is_absolute());
	}

	#[test]
	fn test_server_env_carries_both_filters() {
		let env = server_env();
		assert_eq!(env.len(), 2);
		assert_eq!(env[0].0, INCLUDE_PATHS_ENV);
		assert_eq!(env[1].0, EXCLUDE_PATHS_ENV);
	}
}
