//! Lifecycle and request surface of one `ivy_lsp` session.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use lsp_types::{Diagnostic, InitializeResult, ServerCapabilities, WorkspaceFolder};
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::capabilities::{client_capabilities, validate_server_capabilities};
use crate::config::SessionConfig;
use crate::diagnostics::DiagnosticsCache;
use crate::launcher::{find_ivy_lsp, server_env};
use crate::router::Router;
use crate::transport::{OUTBOUND_QUEUE_LEN, Outbound, run_session_io};
use crate::types::{AnyNotification, AnyRequest, RequestId};
use crate::{Error, Result, uri_from_path};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Constructed but not started.
	Created,
	/// Process spawned; initialize handshake in flight.
	Handshaking,
	/// Handshake complete; requests are accepted.
	Ready,
	/// Spawn or handshake failed, or the process died unexpectedly
	/// before becoming ready.
	Failed,
	/// Shutdown initiated; draining.
	ShuttingDown,
	/// Terminal. The process has exited or the session was closed.
	Closed,
}

/// A live connection to one `ivy_lsp` process rooted at one repository.
///
/// Dropping the session kills the child process. Prefer [`shutdown`] for
/// an orderly exit.
///
/// [`shutdown`]: Session::shutdown
pub struct Session {
	repository_root: PathBuf,
	outbound_tx: mpsc::Sender<Outbound>,
	state_tx: watch::Sender<SessionState>,
	state_rx: watch::Receiver<SessionState>,
	next_id: AtomicI64,
	diagnostics: Arc<DiagnosticsCache>,
	server_capabilities: parking_lot::RwLock<Option<ServerCapabilities>>,
	request_timeout: std::time::Duration,
	child: Mutex<Option<Child>>,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("repository_root", &self.repository_root)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl Session {
	/// Spawn `ivy_lsp` for the configured repository and complete the
	/// initialize/initialized handshake.
	///
	/// # Errors
	///
	/// [`Error::ServerNotFound`] when no command override is given and
	/// `ivy_lsp` is absent from `PATH`; [`Error::ServerSpawn`] when the
	/// process fails to start; [`Error::RequestTimeout`] when the
	/// handshake exceeds the configured startup deadline;
	/// [`Error::MissingCapability`] when the server omits
	/// `textDocumentSync`.
	pub async fn start(config: SessionConfig) -> Result<Self> {
		let command = match &config.command {
			Some(cmd) => cmd.clone(),
			None => find_ivy_lsp()?,
		};

		info!(
			command = %command.display(),
			root = %config.repository_root.display(),
			"Starting ivy_lsp session"
		);

		let mut child = Command::new(&command)
			.current_dir(&config.repository_root)
			.envs(server_env())
			.envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::ServerSpawn {
				server: command.display().to_string(),
				reason: e.to_string(),
			})?;

		let stdin = child.stdin.take().ok_or_else(|| Error::ServerSpawn {
			server: command.display().to_string(),
			reason: "no stdin handle".into(),
		})?;
		let stdout = child.stdout.take().ok_or_else(|| Error::ServerSpawn {
			server: command.display().to_string(),
			reason: "no stdout handle".into(),
		})?;
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(async move {
				let mut lines = BufReader::new(stderr).lines();
				while let Ok(Some(line)) = lines.next_line().await {
					warn!(line, "ivy_lsp stderr");
				}
			});
		}

		let diagnostics = Arc::new(DiagnosticsCache::new());
		let router = Arc::new(build_router(Arc::clone(&diagnostics)));

		let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
		let (state_tx, state_rx) = watch::channel(SessionState::Created);
		tokio::spawn(run_session_io(
			stdout,
			stdin,
			outbound_rx,
			router,
			state_tx.clone(),
		));

		let session = Self {
			repository_root: config.repository_root.clone(),
			outbound_tx,
			state_tx,
			state_rx,
			next_id: AtomicI64::new(1),
			diagnostics,
			server_capabilities: parking_lot::RwLock::new(None),
			request_timeout: config.request_timeout,
			child: Mutex::new(Some(child)),
		};

		session.set_state(SessionState::Handshaking);
		match tokio::time::timeout(config.startup_timeout, session.handshake()).await {
			Ok(Ok(())) => {
				session.set_state(SessionState::Ready);
				info!(root = %config.repository_root.display(), "ivy_lsp session ready");
				Ok(session)
			}
			Ok(Err(e)) => {
				session.set_state(SessionState::Failed);
				session.kill().await;
				Err(e)
			}
			Err(_) => {
				session.set_state(SessionState::Failed);
				session.kill().await;
				Err(Error::RequestTimeout("initialize".into()))
			}
		}
	}

	async fn handshake(&self) -> Result<()> {
		let root_uri = uri_from_path(&self.repository_root)?;
		let folder_name = self
			.repository_root
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_else(|| "workspace".to_string());

		#[allow(deprecated)]
		let params = lsp_types::InitializeParams {
			process_id: Some(std::process::id()),
			root_uri: Some(root_uri.clone()),
			capabilities: client_capabilities(),
			locale: Some("en".into()),
			workspace_folders: Some(vec![WorkspaceFolder {
				uri: root_uri,
				name: folder_name,
			}]),
			client_info: Some(lsp_types::ClientInfo {
				name: env!("CARGO_PKG_NAME").into(),
				version: Some(env!("CARGO_PKG_VERSION").into()),
			}),
			..Default::default()
		};

		let raw = self
			.raw_request("initialize", serde_json::to_value(params)?)
			.await?;
		let init: InitializeResult = serde_json::from_value(raw)?;
		validate_server_capabilities(&init.capabilities)?;
		*self.server_capabilities.write() = Some(init.capabilities);

		self.send_notification("initialized", serde_json::json!({}))
			.await?;
		Ok(())
	}

	/// Send a custom request (an `ivy/*` method) and await its result.
	///
	/// # Errors
	///
	/// [`Error::SessionStopped`] when the session is not ready,
	/// [`Error::RequestTimeout`] when the server does not answer within
	/// the configured request timeout, and [`Error::Response`] when the
	/// server replies an error object.
	pub async fn send_custom_request(
		&self,
		method: &str,
		params: Option<JsonValue>,
	) -> Result<JsonValue> {
		if self.state() != SessionState::Ready {
			return Err(Error::SessionStopped);
		}
		self.raw_request(method, params.unwrap_or(JsonValue::Null))
			.await
	}

	async fn raw_request(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
		let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
		debug!(method, id = %id, "Sending request");
		let (response_tx, response_rx) = oneshot::channel();
		self.outbound_tx
			.send(Outbound::Request {
				request: AnyRequest {
					id,
					method: method.to_string(),
					params,
				},
				response_tx,
			})
			.await
			.map_err(|_| Error::SessionStopped)?;

		let response = tokio::time::timeout(self.request_timeout, response_rx)
			.await
			.map_err(|_| Error::RequestTimeout(method.to_string()))?
			.map_err(|_| Error::SessionStopped)??;

		if let Some(error) = response.error {
			return Err(Error::Response(error));
		}
		Ok(response.result.unwrap_or(JsonValue::Null))
	}

	/// Send a notification to the server.
	///
	/// # Errors
	///
	/// [`Error::SessionStopped`] when the I/O loop has exited.
	pub async fn send_notification(&self, method: &str, params: JsonValue) -> Result<()> {
		self.outbound_tx
			.send(Outbound::Notification {
				notification: AnyNotification {
					method: method.to_string(),
					params,
				},
			})
			.await
			.map_err(|_| Error::SessionStopped)
	}

	/// Current lifecycle state.
	pub fn state(&self) -> SessionState {
		*self.state_rx.borrow()
	}

	/// Whether the session accepts requests.
	pub fn is_ready(&self) -> bool {
		self.state() == SessionState::Ready
	}

	/// Repository root this session indexes.
	pub fn repository_root(&self) -> &std::path::Path {
		&self.repository_root
	}

	/// Capability set the server reported at initialize, once ready.
	pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
		self.server_capabilities.read().clone()
	}

	/// Snapshot of the cached diagnostics for one document URI.
	pub fn diagnostics_for(&self, uri: &str) -> Vec<Diagnostic> {
		self.diagnostics.get(uri)
	}

	/// Snapshot of the whole diagnostics cache.
	pub fn all_diagnostics(&self) -> std::collections::HashMap<String, Vec<Diagnostic>> {
		self.diagnostics.all()
	}

	/// Shared handle to the diagnostics cache.
	pub fn diagnostics(&self) -> Arc<DiagnosticsCache> {
		Arc::clone(&self.diagnostics)
	}

	/// Orderly shutdown: `shutdown` request, `exit` notification, then
	/// reap the process. Idempotent; calling on a non-ready session only
	/// reaps.
	pub async fn shutdown(&self) -> Result<()> {
		match self.state() {
			SessionState::Closed => return Ok(()),
			SessionState::Ready => {
				self.set_state(SessionState::ShuttingDown);
				// Best-effort protocol goodbye; the reap below is what
				// guarantees termination.
				let goodbye = tokio::time::timeout(
					std::time::Duration::from_secs(5),
					self.raw_request("shutdown", JsonValue::Null),
				);
				match goodbye.await {
					Ok(Ok(_)) => {}
					Ok(Err(e)) => debug!(error = %e, "shutdown request not acknowledged"),
					Err(_) => debug!("shutdown request timed out"),
				}
				let _ = self.send_notification("exit", JsonValue::Null).await;
			}
			_ => self.set_state(SessionState::ShuttingDown),
		}

		self.kill().await;

		let mut state_rx = self.state_rx.clone();
		let closed = state_rx.wait_for(|s| *s == SessionState::Closed);
		if tokio::time::timeout(std::time::Duration::from_secs(5), closed)
			.await
			.is_err()
		{
			self.set_state(SessionState::Closed);
		}
		Ok(())
	}

	async fn kill(&self) {
		if let Some(mut child) = self.child.lock().await.take() {
			if let Err(e) = child.kill().await {
				debug!(error = %e, "ivy_lsp already exited");
			}
			let _ = child.wait().await;
		}
	}

	fn set_state(&self, state: SessionState) {
		self.state_tx.send_if_modified(|current| {
			// Closed is terminal; never leave it.
			if *current == SessionState::Closed || *current == state {
				false
			} else {
				debug!(from = ?*current, to = ?state, "Session state change");
				*current = state;
				true
			}
		});
	}
}

fn build_router(diagnostics: Arc<DiagnosticsCache>) -> Router {
	let mut router = Router::new();

	router.notification("textDocument/publishDiagnostics", move |params| {
		diagnostics.ingest(&params);
	});
	router.notification("window/logMessage", |params| {
		let message = params.get("message").and_then(JsonValue::as_str).unwrap_or("");
		// MessageType: 1 = error, 2 = warning, 3 = info, 4 = log.
		match params.get("type").and_then(JsonValue::as_u64) {
			Some(1) => tracing::error!(message, "ivy_lsp log"),
			Some(2) => warn!(message, "ivy_lsp log"),
			Some(3) => info!(message, "ivy_lsp log"),
			_ => debug!(message, "ivy_lsp log"),
		}
	});
	router.notification("window/showMessage", |params| {
		let message = params.get("message").and_then(JsonValue::as_str).unwrap_or("");
		info!(message, "ivy_lsp message");
	});
	router.notification("$/progress", |_| {});

	router.request("client/registerCapability", |_| Ok(JsonValue::Null));
	router.request("client/unregisterCapability", |_| Ok(JsonValue::Null));
	router.request("window/workDoneProgress/create", |_| Ok(JsonValue::Null));
	router.request("workspace/configuration", |params| {
		let n = params
			.get("items")
			.and_then(JsonValue::as_array)
			.map_or(0, Vec::len);
		Ok(JsonValue::Array(vec![JsonValue::Null; n]))
	});

	router
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_router_acknowledges_standard_server_requests() {
		let router = build_router(Arc::new(DiagnosticsCache::new()));
		assert!(
			router
				.handle_request("client/registerCapability", serde_json::json!({}))
				.is_ok()
		);
		let configs = router
			.handle_request(
				"workspace/configuration",
				serde_json::json!({"items": [{"section": "ivy"}, {"section": "lint"}]}),
			)
			.unwrap();
		assert_eq!(configs, serde_json::json!([null, null]));
	}

	#[test]
	fn test_router_stores_published_diagnostics() {
		let cache = Arc::new(DiagnosticsCache::new());
		let router = build_router(Arc::clone(&cache));
		router.handle_notification(
			"textDocument/publishDiagnostics",
			serde_json::json!({
				"uri": "file:///p/a.ivy",
				"diagnostics": [{
					"range": {"start": {"line": 2, "character": 0}, "end": {"line": 2, "character": 4}},
					"severity": 1,
					"message": "assertion may fail",
				}],
			}),
		);
		assert_eq!(cache.error_count("file:///p/a.ivy"), 1);
	}
}
