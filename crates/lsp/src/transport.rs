//! Content-Length framed JSON-RPC transport and the per-session I/O loop.
//!
//! One [`run_session_io`] task exists per session. It serializes all
//! outbound writes through an mpsc queue (total ordering), correlates
//! responses to pending requests, and invokes the session's [`Router`]
//! for inbound notifications and server-initiated requests. It is the
//! only writer to the diagnostics cache, by way of the router handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::router::Router;
use crate::session::SessionState;
use crate::types::{AnyNotification, AnyRequest, AnyResponse, RequestId, ResponseError};
use crate::{Error, Result};

/// Depth of the outbound message queue.
pub(crate) const OUTBOUND_QUEUE_LEN: usize = 64;

/// A message queued for the server.
pub(crate) enum Outbound {
	/// A request expecting a correlated response.
	Request {
		request: AnyRequest,
		response_tx: oneshot::Sender<Result<AnyResponse>>,
	},
	/// A fire-and-forget notification.
	Notification { notification: AnyNotification },
}

/// Drive the I/O for one session until the stream closes or a write fails.
///
/// Framing runs in its own task: `select!` cancels and re-creates the
/// future of every losing branch, which would drop a half-read frame and
/// desynchronize the stream whenever an outbound write lands while the
/// server is mid-frame. The loop below therefore multiplexes only whole,
/// already-decoded messages against outbound writes.
///
/// On teardown every pending request is failed with
/// [`Error::SessionStopped`] and the session state is advanced to its
/// terminal value (`Closed` after Ready/ShuttingDown, `Failed` otherwise).
pub(crate) async fn run_session_io(
	reader: impl AsyncRead + Send + Unpin + 'static,
	mut writer: impl AsyncWrite + Unpin,
	mut outbound_rx: mpsc::Receiver<Outbound>,
	router: Arc<Router>,
	state_tx: tokio::sync::watch::Sender<SessionState>,
) {
	let (inbound_tx, mut inbound_rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
	let reader_task = tokio::spawn(read_frames(reader, inbound_tx));
	let mut pending: HashMap<RequestId, oneshot::Sender<Result<AnyResponse>>> = HashMap::new();

	loop {
		tokio::select! {
			out = outbound_rx.recv() => {
				let Some(out) = out else { break };
				let write_res = match out {
					Outbound::Notification { notification } => {
						write_payload(&mut writer, &notification_envelope(&notification)).await
					}
					Outbound::Request { request, response_tx } => {
						let id = request.id.clone();
						match write_payload(&mut writer, &request_envelope(&request)).await {
							Ok(()) => {
								pending.insert(id, response_tx);
								Ok(())
							}
							Err(e) => {
								let _ = response_tx.send(Err(Error::SessionStopped));
								Err(e)
							}
						}
					}
				};
				if let Err(e) = write_res {
					error!(error = %e, "Outbound write failed; terminating session I/O");
					break;
				}
			}

			inbound = inbound_rx.recv() => {
				// None: the reader task ended on EOF or a read error.
				let Some(msg) = inbound else { break };
				if let Some(reply) = handle_inbound(msg, &mut pending, &router) {
					if let Err(e) = write_payload(&mut writer, &reply).await {
						error!(error = %e, "Reply write failed; terminating session I/O");
						break;
					}
				}
			}
		}
	}

	reader_task.abort();

	for (_, tx) in pending.drain() {
		let _ = tx.send(Err(Error::SessionStopped));
	}
	while let Ok(out) = outbound_rx.try_recv() {
		if let Outbound::Request { response_tx, .. } = out {
			let _ = response_tx.send(Err(Error::SessionStopped));
		}
	}

	let terminal = match *state_tx.borrow() {
		SessionState::Ready | SessionState::ShuttingDown | SessionState::Closed => {
			SessionState::Closed
		}
		_ => SessionState::Failed,
	};
	let _ = state_tx.send(terminal);
}

/// Decode frames off the server's stream until EOF or a read error,
/// forwarding each complete message. Partial-frame state never leaves
/// this task.
async fn read_frames(reader: impl AsyncRead + Unpin, inbound_tx: mpsc::Sender<JsonValue>) {
	let mut reader = BufReader::new(reader);
	let mut header_buf = String::new();
	loop {
		match read_message(&mut reader, &mut header_buf).await {
			Ok(Some(msg)) => {
				if inbound_tx.send(msg).await.is_err() {
					break;
				}
			}
			Ok(None) => {
				info!("ivy_lsp closed its output stream");
				break;
			}
			Err(e) => {
				error!(error = %e, "Error reading from ivy_lsp");
				break;
			}
		}
	}
}

/// Routes one inbound message; returns a reply payload for server requests.
fn handle_inbound(
	msg: JsonValue,
	pending: &mut HashMap<RequestId, oneshot::Sender<Result<AnyResponse>>>,
	router: &Router,
) -> Option<JsonValue> {
	let has_id = msg.get("id").is_some();
	let has_method = msg.get("method").is_some();

	// Response to one of our requests.
	if has_id && !has_method {
		match serde_json::from_value::<AnyResponse>(msg) {
			Ok(resp) => {
				if let Some(tx) = pending.remove(&resp.id) {
					let _ = tx.send(Ok(resp));
				} else {
					warn!(id = %resp.id, "Response for unknown request id");
				}
			}
			Err(e) => warn!(error = %e, "Undecodable response"),
		}
		return None;
	}

	let method = msg.get("method").and_then(JsonValue::as_str).unwrap_or("");
	let params = msg.get("params").cloned().unwrap_or(JsonValue::Null);

	// Notification from the server.
	if has_method && !has_id {
		router.handle_notification(method, params);
		return None;
	}

	// Server-initiated request; reply through the dispatch table.
	if has_method && has_id {
		let id = match serde_json::from_value::<RequestId>(msg.get("id").cloned()?) {
			Ok(id) => id,
			Err(e) => {
				warn!(error = %e, "Server request with undecodable id");
				return None;
			}
		};
		return Some(response_envelope(&id, router.handle_request(method, params)));
	}

	warn!("Message with neither id nor method; dropped");
	None
}

fn request_envelope(req: &AnyRequest) -> JsonValue {
	serde_json::json!({
		"jsonrpc": "2.0",
		"id": req.id,
		"method": req.method,
		"params": req.params,
	})
}

fn notification_envelope(notif: &AnyNotification) -> JsonValue {
	serde_json::json!({
		"jsonrpc": "2.0",
		"method": notif.method,
		"params": notif.params,
	})
}

fn response_envelope(id: &RequestId, resp: Result<JsonValue, ResponseError>) -> JsonValue {
	match resp {
		Ok(result) => serde_json::json!({
			"jsonrpc": "2.0",
			"id": id,
			"result": result,
		}),
		Err(err) => serde_json::json!({
			"jsonrpc": "2.0",
			"id": id,
			"error": err,
		}),
	}
}

/// Write one framed JSON-RPC payload.
pub(crate) async fn write_payload(
	writer: &mut (impl AsyncWrite + Unpin),
	payload: &JsonValue,
) -> Result<()> {
	let body = serde_json::to_string(payload)?;
	let msg = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
	writer.write_all(msg.as_bytes()).await?;
	writer.flush().await?;
	Ok(())
}

/// Read one framed JSON-RPC payload. `Ok(None)` signals EOF.
pub(crate) async fn read_message(
	reader: &mut (impl AsyncBufRead + Unpin),
	buf: &mut String,
) -> Result<Option<JsonValue>> {
	let mut content_length: Option<usize> = None;
	loop {
		buf.clear();
		let bytes_read = reader.read_line(buf).await?;
		if bytes_read == 0 {
			return Ok(None);
		}
		let line = buf.trim();
		if line.is_empty() {
			break;
		}
		if let Some(len_str) = line.strip_prefix("Content-Length: ") {
			content_length = len_str.trim().parse().ok();
		}
	}

	let length = content_length.ok_or_else(|| Error::Protocol("missing Content-Length".into()))?;
	let mut body = vec![0u8; length];
	reader.read_exact(&mut body).await?;

	let json: JsonValue = serde_json::from_slice(&body)?;
	Ok(Some(json))
}
