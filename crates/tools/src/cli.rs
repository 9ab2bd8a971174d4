//! Direct invocation of the Ivy CLI tools.
//!
//! Arguments are passed as a vector to the process, never through a
//! shell, so paths and isolate names need no quoting.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info};

use crate::{Error, Result};

/// Captured output of one tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
	/// Decoded standard output.
	pub stdout: String,
	/// Decoded standard error.
	pub stderr: String,
	/// Exit code; `None` when the process died to a signal.
	pub return_code: Option<i32>,
	/// Wall-clock runtime.
	pub duration: Duration,
}

impl ToolOutput {
	/// Whether the tool exited zero.
	#[must_use]
	pub fn success(&self) -> bool {
		self.return_code == Some(0)
	}

	/// Stdout and stderr joined, the way the diagnostics parser reads it.
	#[must_use]
	pub fn combined(&self) -> String {
		format!("{}\n{}", self.stdout, self.stderr)
	}
}

/// Resolve an Ivy CLI tool on `PATH`.
///
/// # Errors
///
/// [`Error::ToolNotFound`] with install guidance when the tool is absent.
pub fn require_tool(name: &str) -> Result<PathBuf> {
	which::which(name).map_err(|_| Error::ToolNotFound {
		tool: name.to_string(),
	})
}

/// Run a tool to completion in `cwd`, capturing both output streams.
///
/// # Errors
///
/// [`Error::Io`] when the process cannot be spawned.
pub async fn run_tool(program: &Path, args: &[String], cwd: &Path) -> Result<ToolOutput> {
	info!(program = %program.display(), ?args, "Running Ivy tool");
	let start = Instant::now();
	let output = Command::new(program)
		.args(args)
		.current_dir(cwd)
		.kill_on_drop(true)
		.output()
		.await?;
	let duration = start.elapsed();
	debug!(
		program = %program.display(),
		code = ?output.status.code(),
		elapsed_ms = duration.as_millis() as u64,
		"Ivy tool finished"
	);

	Ok(ToolOutput {
		stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
		stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		return_code: output.status.code(),
		duration,
	})
}
