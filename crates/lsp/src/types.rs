//! JSON-RPC message types for the `ivy_lsp` wire protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Identifier of a request, either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	/// Numeric request id.
	Number(i64),
	/// String request id.
	String(String),
}

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Number(n) => write!(f, "{n}"),
			Self::String(s) => write!(f, "{s}"),
		}
	}
}

/// A dynamically typed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyRequest {
	/// Request id.
	pub id: RequestId,
	/// Method name.
	pub method: String,
	/// Method parameters.
	#[serde(default)]
	pub params: JsonValue,
}

/// A dynamically typed notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyNotification {
	/// Method name.
	pub method: String,
	/// Method parameters.
	#[serde(default)]
	pub params: JsonValue,
}

/// A dynamically typed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyResponse {
	/// Id of the request this responds to.
	pub id: RequestId,
	/// Result payload, when the request succeeded.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<JsonValue>,
	/// Error payload, when the request failed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

/// An error object replied by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("jsonrpc error {code}: {message}")]
pub struct ResponseError {
	/// A number indicating the error type.
	pub code: i64,
	/// A short description of the error.
	pub message: String,
	/// Additional structured details.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	/// JSON-RPC "method not found" error code.
	pub const METHOD_NOT_FOUND: i64 = -32601;

	/// Create a "method not found" error for the given method.
	pub fn method_not_found(method: &str) -> Self {
		Self {
			code: Self::METHOD_NOT_FOUND,
			message: format!("method not found: {method}"),
			data: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn test_request_id_untagged() {
		let n: RequestId = serde_json::from_str("7").unwrap();
		assert_eq!(n, RequestId::Number(7));
		let s: RequestId = serde_json::from_str("\"abc\"").unwrap();
		assert_eq!(s, RequestId::String("abc".into()));
	}

	#[test]
	fn test_response_error_deserialize() {
		let json = r#"{"code":-32600,"message":"Invalid Request"}"#;
		let err: ResponseError = serde_json::from_str(json).unwrap();
		assert_eq!(err.code, -32600);
		assert_eq!(err.message, "Invalid Request");
		assert!(err.data.is_none());
	}

	#[test]
	fn test_response_skips_absent_fields() {
		let resp = AnyResponse {
			id: RequestId::Number(1),
			result: Some(serde_json::json!({"ok": true})),
			error: None,
		};
		let json = serde_json::to_string(&resp).unwrap();
		assert!(!json.contains("\"error\""));
	}
}
