//! Client session for the `ivy_lsp` verification server.
//!
//! This crate owns the session side of the Ivy toolchain integration: it
//! locates and spawns the `ivy_lsp` companion process, drives the
//! initialize/initialized handshake, routes server-to-client traffic
//! through a fixed dispatch table, and captures `publishDiagnostics`
//! notifications into a queryable per-session cache.
//!
//! # Architecture
//!
//! A [`Session`] spawns `ivy_lsp` and communicates via stdin/stdout using
//! JSON-RPC 2.0 with Content-Length framing. A single background task
//! drains the process output and invokes the handlers registered on the
//! session's [`Router`]; it is the only writer to the [`DiagnosticsCache`].
//! Outbound messages are serialized through an mpsc queue so writes keep
//! total ordering.
//!
//! ```ignore
//! use probe_lsp::{Session, SessionConfig};
//!
//! let session = Session::start(SessionConfig::new("/path/to/project")).await?;
//! let status = session.send_custom_request("ivy/serverStatus", None).await?;
//! let diags = session.diagnostics_for("file:///path/to/project/model.ivy");
//! session.shutdown().await?;
//! ```

use std::path::Path;
use std::str::FromStr;

use lsp_types::Uri;

mod capabilities;
mod config;
mod diagnostics;
mod launcher;
mod router;
mod session;
mod transport;
mod types;

pub use capabilities::{client_capabilities, optional_capabilities, validate_server_capabilities};
pub use config::SessionConfig;
pub use diagnostics::DiagnosticsCache;
pub use launcher::{
	DEFAULT_EXCLUDE_PATHS, EXCLUDE_PATHS_ENV, INCLUDE_PATHS_ENV, find_ivy_lsp, server_env,
};
pub use router::Router;
pub use session::{Session, SessionState};
pub use types::{AnyNotification, AnyRequest, AnyResponse, RequestId, ResponseError};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The `ivy_lsp` executable could not be located on `PATH`.
	#[error(
		"ivy_lsp is not installed or is not in PATH.\n\
		 Install it via: pip install ivy-lsp\n\
		 Or from the panther_ivy package: pip install -e '.[lsp]'\n\
		 After installation, make sure 'ivy_lsp' is available on your PATH."
	)]
	ServerNotFound,
	/// The server process could not be spawned.
	#[error("failed to spawn {server}: {reason}")]
	ServerSpawn {
		/// Command that failed to start.
		server: String,
		/// Underlying failure description.
		reason: String,
	},
	/// The session I/O loop stopped (process exited or session closed).
	#[error("session stopped")]
	SessionStopped,
	/// A request did not receive a response within its timeout.
	#[error("request {0} timed out")]
	RequestTimeout(String),
	/// The server replied an undecodable or invalid message.
	#[error("deserialization failed: {0}")]
	Deserialize(#[from] serde_json::Error),
	/// The server replied an error.
	#[error("{0}")]
	Response(#[from] ResponseError),
	/// The server violated the wire protocol.
	#[error("protocol error: {0}")]
	Protocol(String),
	/// Input/output errors from the underlying channels.
	#[error("{0}")]
	Io(#[from] std::io::Error),
	/// The server's initialize response omitted a mandatory capability.
	#[error("ivy_lsp did not report the {0} capability")]
	MissingCapability(&'static str),
}

/// Build a `file://` URI from an absolute filesystem path.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for non-UTF-8 paths and paths that do not
/// form a valid URI.
pub fn uri_from_path(path: &Path) -> Result<Uri> {
	let raw = path
		.to_str()
		.ok_or_else(|| Error::Protocol(format!("non-UTF-8 path: {}", path.display())))?;
	let escaped = raw.replace(' ', "%20");
	let s = if escaped.starts_with('/') {
		format!("file://{escaped}")
	} else {
		format!("file:///{}", escaped.replace('\\', "/"))
	};
	Uri::from_str(&s).map_err(|e| Error::Protocol(format!("invalid file URI {s}: {e}")))
}

/// Strip the `file://` scheme from a URI string, yielding a filesystem path.
pub fn path_from_uri(uri: &str) -> &str {
	uri.strip_prefix("file://").unwrap_or(uri)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_uri_from_path_absolute() {
		let uri = uri_from_path(Path::new("/home/user/model.ivy")).unwrap();
		assert_eq!(uri.as_str(), "file:///home/user/model.ivy");
	}

	#[test]
	fn test_uri_from_path_escapes_spaces() {
		let uri = uri_from_path(Path::new("/tmp/my project/a.ivy")).unwrap();
		assert_eq!(uri.as_str(), "file:///tmp/my%20project/a.ivy");
	}

	#[test]
	fn test_path_from_uri_roundtrip() {
		assert_eq!(path_from_uri("file:///srv/proto/a.ivy"), "/srv/proto/a.ivy");
		assert_eq!(path_from_uri("/already/a/path"), "/already/a/path");
	}
}
