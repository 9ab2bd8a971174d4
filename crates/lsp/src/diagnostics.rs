//! Per-session diagnostics cache.
//!
//! Stores the latest `publishDiagnostics` payload per document URI. The
//! session's notification handler is the sole writer; any number of
//! concurrent callers may read. Writes replace the previous list for a URI
//! wholesale, so a reader always observes either the old or the new
//! complete list, never a partial one. Readers receive snapshots, never
//! references into the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use lsp_types::{Diagnostic, DiagnosticSeverity};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

/// Latest published diagnostics keyed by document URI.
#[derive(Debug, Default)]
pub struct DiagnosticsCache {
	store: RwLock<HashMap<String, Vec<Diagnostic>>>,
	/// Incremented on every accepted write; lets callers detect change.
	generation: AtomicU64,
}

impl DiagnosticsCache {
	/// Create an empty cache.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Ingest a raw `textDocument/publishDiagnostics` payload.
	///
	/// Malformed payloads (not an object, missing or empty `uri`, or an
	/// undecodable `diagnostics` array) are logged and dropped. Returns
	/// whether the payload was accepted.
	pub fn ingest(&self, params: &JsonValue) -> bool {
		let Some(obj) = params.as_object() else {
			warn!("publishDiagnostics payload is not an object; dropped");
			return false;
		};
		let uri = obj.get("uri").and_then(JsonValue::as_str).unwrap_or("");
		if uri.is_empty() {
			warn!("publishDiagnostics payload has no uri; dropped");
			return false;
		}
		let raw = obj.get("diagnostics").cloned().unwrap_or(JsonValue::Array(Vec::new()));
		let diagnostics: Vec<Diagnostic> = match serde_json::from_value(raw) {
			Ok(list) => list,
			Err(e) => {
				warn!(uri, error = %e, "Undecodable diagnostics payload; dropped");
				return false;
			}
		};
		debug!(uri, count = diagnostics.len(), "Stored diagnostics");
		self.replace(uri, diagnostics);
		true
	}

	/// Replace the diagnostics for one URI with a new complete list.
	pub fn replace(&self, uri: &str, diagnostics: Vec<Diagnostic>) {
		self.store.write().insert(uri.to_string(), diagnostics);
		self.generation.fetch_add(1, Ordering::Relaxed);
	}

	/// Snapshot of the diagnostics for one URI, or empty when unknown.
	pub fn get(&self, uri: &str) -> Vec<Diagnostic> {
		self.store.read().get(uri).cloned().unwrap_or_default()
	}

	/// Snapshot of the whole cache.
	pub fn all(&self) -> HashMap<String, Vec<Diagnostic>> {
		self.store.read().clone()
	}

	/// Number of documents with stored diagnostics.
	pub fn len(&self) -> usize {
		self.store.read().len()
	}

	/// Whether no document has stored diagnostics.
	pub fn is_empty(&self) -> bool {
		self.store.read().is_empty()
	}

	/// Error count for one URI.
	pub fn error_count(&self, uri: &str) -> usize {
		self.count_severity(uri, DiagnosticSeverity::ERROR)
	}

	/// Warning count for one URI.
	pub fn warning_count(&self, uri: &str) -> usize {
		self.count_severity(uri, DiagnosticSeverity::WARNING)
	}

	/// Current write generation. Increments on every accepted write.
	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::Relaxed)
	}

	fn count_severity(&self, uri: &str, severity: DiagnosticSeverity) -> usize {
		self.store
			.read()
			.get(uri)
			.map(|list| list.iter().filter(|d| d.severity == Some(severity)).count())
			.unwrap_or(0)
	}
}
