//! Verification operations for Ivy projects.
//!
//! Each operation is exposed by the [`Orchestrator`]: verify, compile,
//! show model, cached diagnostics, structural lint, include graph, server
//! status, and test-scope management. Operations that the `ivy_lsp`
//! session can serve go through it first; toolchain operations fall back
//! to invoking `ivy_check`/`ivyc`/`ivy_show` directly when no session is
//! ready, and the include graph falls back to a filesystem scan. The
//! lint never leaves the local process.

use std::path::{Component, Path, PathBuf};

mod cli;
mod dispatch;
mod graph;
mod lint;
mod parse;
mod record;

pub use cli::{ToolOutput, require_tool, run_tool};
pub use dispatch::{
	AllDiagnosticsReport, FileDiagnosticsEntry, FileDiagnosticsReport, Orchestrator,
	ServerStatusReport, SessionBackend, TestScopeReport, ToolchainReport, Via,
};
pub use graph::{
	FileIncludeReport, IncludeSummary, ProjectIncludeReport, ResolvedInclude, SkippedFile,
	file_include_report, project_include_report,
};
pub use lint::{LintReport, structural_lint};
pub use parse::parse_check_output;
pub use record::{DiagnosticRecord, Severity};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The operation was given a path that is not an `.ivy` file.
	#[error("expected an .ivy file, got: {0}")]
	NotIvyFile(String),
	/// The operation was given a path that does not exist in the project.
	#[error("Ivy file not found: {0}")]
	FileNotFound(String),
	/// The operation was given a path that escapes the project root.
	#[error("path escapes the project root: {0}")]
	PathTraversal(String),
	/// A required Ivy CLI tool is absent from `PATH`.
	#[error(
		"'{tool}' is not installed or not on PATH.\n\
		 Install the Ivy toolchain to use this tool."
	)]
	ToolNotFound {
		/// Name of the missing executable.
		tool: String,
	},
	/// A rendered report exceeded the configured output limit.
	#[error("output of {size} bytes exceeds the limit of {limit}")]
	OutputTooLarge {
		/// Size the report rendered to.
		size: usize,
		/// Configured limit.
		limit: usize,
	},
	/// Reading a source file or spawning a tool failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// Serializing a report failed.
	#[error("serialization failed: {0}")]
	Serialize(#[from] serde_json::Error),
}

/// Validate that `relative_path` names an existing `.ivy` file inside
/// `project_root` and return its absolute path.
///
/// Validation runs before any dispatch decision, so a bad path fails the
/// same way whether or not a session is available.
///
/// # Errors
///
/// [`Error::NotIvyFile`] for non-`.ivy` paths, [`Error::PathTraversal`]
/// for absolute paths or paths containing `..`, and
/// [`Error::FileNotFound`] when the file does not exist.
pub fn validate_ivy_path(project_root: &Path, relative_path: &str) -> Result<PathBuf> {
	if !relative_path.ends_with(".ivy") {
		return Err(Error::NotIvyFile(relative_path.to_string()));
	}
	let rel = Path::new(relative_path);
	if rel.is_absolute()
		|| rel
			.components()
			.any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
	{
		return Err(Error::PathTraversal(relative_path.to_string()));
	}
	let abs = project_root.join(rel);
	if !abs.is_file() {
		return Err(Error::FileNotFound(relative_path.to_string()));
	}
	Ok(abs)
}
