//! Routing of server-to-client messages.
//!
//! The session builds one [`Router`] at start time: a fixed dispatch table
//! mapping method names to handler closures. Methods without a handler are
//! logged at debug level and dropped; they never abort the I/O loop.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::types::ResponseError;

type NotificationHandler = Box<dyn Fn(JsonValue) + Send + Sync>;
type RequestHandler =
	Box<dyn Fn(JsonValue) -> Result<JsonValue, ResponseError> + Send + Sync>;

/// Dispatch table for inbound notifications and server-initiated requests.
#[derive(Default)]
pub struct Router {
	notifications: HashMap<String, NotificationHandler>,
	requests: HashMap<String, RequestHandler>,
}

impl std::fmt::Debug for Router {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Router")
			.field("notifications", &self.notifications.keys())
			.field("requests", &self.requests.keys())
			.finish()
	}
}

impl Router {
	/// Create an empty router.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a handler for an inbound notification method.
	pub fn notification(
		&mut self,
		method: impl Into<String>,
		handler: impl Fn(JsonValue) + Send + Sync + 'static,
	) -> &mut Self {
		self.notifications.insert(method.into(), Box::new(handler));
		self
	}

	/// Register a handler for an inbound server-to-client request method.
	pub fn request(
		&mut self,
		method: impl Into<String>,
		handler: impl Fn(JsonValue) -> Result<JsonValue, ResponseError> + Send + Sync + 'static,
	) -> &mut Self {
		self.requests.insert(method.into(), Box::new(handler));
		self
	}

	/// Dispatch a notification. Unhandled methods are logged and dropped.
	pub(crate) fn handle_notification(&self, method: &str, params: JsonValue) {
		match self.notifications.get(method) {
			Some(handler) => handler(params),
			None => debug!(method, "Unhandled notification"),
		}
	}

	/// Dispatch a server-initiated request.
	///
	/// Unhandled methods reply a "method not found" error rather than
	/// stopping the session.
	pub(crate) fn handle_request(
		&self,
		method: &str,
		params: JsonValue,
	) -> Result<JsonValue, ResponseError> {
		match self.requests.get(method) {
			Some(handler) => handler(params),
			None => {
				debug!(method, "Unhandled server request");
				Err(ResponseError::method_not_found(method))
			}
		}
	}
}
