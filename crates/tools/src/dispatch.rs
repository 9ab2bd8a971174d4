//! Operation dispatch: session first, direct tool invocation second.
//!
//! The [`Orchestrator`] owns the routing policy. Path validation always
//! runs before any dispatch decision, so a bad request fails identically
//! with or without a session. A session error on a toolchain operation is
//! logged at debug level and the operation retried via the CLI; it never
//! surfaces to the caller as long as the fallback can run.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::Diagnostic;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use tracing::debug;

use probe_lsp::{Session, path_from_uri, uri_from_path};

use crate::cli::{require_tool, run_tool};
use crate::graph::{
	FileIncludeReport, IncludeSummary, ProjectIncludeReport, file_include_report,
	project_include_report,
};
use crate::lint::{LintReport, structural_lint};
use crate::parse::parse_check_output;
use crate::record::{self, DiagnosticRecord, Severity};
use crate::{Error, Result, validate_ivy_path};

/// How a report was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Via {
	/// Served by the `ivy_lsp` session.
	#[serde(rename = "lsp")]
	Session,
	/// Produced by invoking a CLI tool directly.
	Cli,
	/// Produced by scanning the filesystem.
	Filesystem,
}

/// The slice of a session the orchestrator depends on.
///
/// [`probe_lsp::Session`] is the production implementation; tests
/// substitute a scripted one.
#[async_trait]
pub trait SessionBackend: Send + Sync {
	/// Whether the session accepts requests right now.
	fn is_ready(&self) -> bool;

	/// Send a custom request and await its result.
	async fn custom_request(
		&self,
		method: &str,
		params: Option<JsonValue>,
	) -> probe_lsp::Result<JsonValue>;

	/// Cached diagnostics for one document URI.
	fn diagnostics_for(&self, uri: &str) -> Vec<Diagnostic>;

	/// Cached diagnostics for all documents.
	fn all_diagnostics(&self) -> HashMap<String, Vec<Diagnostic>>;
}

#[async_trait]
impl SessionBackend for Session {
	fn is_ready(&self) -> bool {
		Session::is_ready(self)
	}

	async fn custom_request(
		&self,
		method: &str,
		params: Option<JsonValue>,
	) -> probe_lsp::Result<JsonValue> {
		self.send_custom_request(method, params).await
	}

	fn diagnostics_for(&self, uri: &str) -> Vec<Diagnostic> {
		Session::diagnostics_for(self, uri)
	}

	fn all_diagnostics(&self) -> HashMap<String, Vec<Diagnostic>> {
		Session::all_diagnostics(self)
	}
}

/// Result of a toolchain operation (verify, compile, show model).
#[derive(Debug, Serialize)]
pub struct ToolchainReport {
	/// Whether the tool reported success.
	pub success: bool,
	/// Parsed diagnostics, present for verification runs.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub diagnostics: Option<Vec<DiagnosticRecord>>,
	/// Number of diagnostics the producer reported.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub diagnostic_count: Option<usize>,
	/// Parsed records with error severity.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_count: Option<usize>,
	/// Parsed records with warning severity.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub warning_count: Option<usize>,
	/// Combined tool output, trimmed.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub raw_output: Option<String>,
	/// Exit code, present for CLI runs.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub return_code: Option<i32>,
	/// Runtime in seconds, rounded to centiseconds.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_seconds: Option<f64>,
	/// Isolate the producer settled on.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub isolate: Option<String>,
	/// Compilation target, for compile runs.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub target: Option<String>,
	/// How the report was produced.
	pub via: Via,
	/// Set when the tool failed but nothing parseable explains why.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parse_warning: Option<String>,
	/// Extra fields passed through from the session response.
	#[serde(flatten)]
	pub extra: Map<String, JsonValue>,
}

impl ToolchainReport {
	fn empty(via: Via) -> Self {
		Self {
			success: false,
			diagnostics: None,
			diagnostic_count: None,
			error_count: None,
			warning_count: None,
			raw_output: None,
			return_code: None,
			duration_seconds: None,
			isolate: None,
			target: None,
			via,
			parse_warning: None,
			extra: Map::new(),
		}
	}
}

/// Cached diagnostics for one file.
#[derive(Debug, Serialize)]
pub struct FileDiagnosticsReport {
	/// Path as given in the request.
	pub file: String,
	/// Cached diagnostics for the file.
	pub diagnostics: Vec<Diagnostic>,
	/// Number of cached diagnostics.
	pub diagnostic_count: usize,
	/// Whether a ready session served the request.
	pub server_active: bool,
	/// Per-feature availability, when the server reports it.
	#[serde(rename = "featureStatus", skip_serializing_if = "Option::is_none")]
	pub feature_status: Option<JsonValue>,
}

/// Cached diagnostics for one file within a project-wide report.
#[derive(Debug, Serialize)]
pub struct FileDiagnosticsEntry {
	/// Cached diagnostics for the file.
	pub diagnostics: Vec<Diagnostic>,
	/// Number of cached diagnostics.
	pub diagnostic_count: usize,
}

/// Cached diagnostics across every document the server has reported on.
#[derive(Debug, Serialize)]
pub struct AllDiagnosticsReport {
	/// Entries keyed by filesystem path.
	pub files: BTreeMap<String, FileDiagnosticsEntry>,
	/// Number of files with cached diagnostics.
	pub total_files: usize,
	/// Whether a ready session served the request.
	pub server_active: bool,
	/// Per-feature availability, when the server reports it.
	#[serde(rename = "featureStatus", skip_serializing_if = "Option::is_none")]
	pub feature_status: Option<JsonValue>,
}

/// Operational status of the session's server.
#[derive(Debug, Serialize)]
pub struct ServerStatusReport {
	/// Whether a ready session exists.
	pub server_active: bool,
	/// Why no status is available, when it is not.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Status fields as reported by the server.
	#[serde(flatten)]
	pub status: Map<String, JsonValue>,
}

/// Result of a test-scope operation.
#[derive(Debug, Serialize)]
pub struct TestScopeReport {
	/// Whether a ready session exists.
	pub server_active: bool,
	/// Why the operation failed, when it did.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Scope fields as reported by the server.
	#[serde(flatten)]
	pub scopes: Map<String, JsonValue>,
}

/// Routes verification operations to the session or the CLI tools.
pub struct Orchestrator {
	project_root: PathBuf,
	session: Option<Arc<dyn SessionBackend>>,
	max_output_bytes: Option<usize>,
	tool_overrides: HashMap<String, PathBuf>,
}

impl std::fmt::Debug for Orchestrator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Orchestrator")
			.field("project_root", &self.project_root)
			.field("has_session", &self.session.is_some())
			.field("max_output_bytes", &self.max_output_bytes)
			.finish()
	}
}

impl Orchestrator {
	/// Create an orchestrator without a session; every toolchain
	/// operation will go through the CLI.
	#[must_use]
	pub fn new(project_root: impl Into<PathBuf>) -> Self {
		Self {
			project_root: project_root.into(),
			session: None,
			max_output_bytes: None,
			tool_overrides: HashMap::new(),
		}
	}

	/// Attach a session to serve operations before any CLI fallback.
	#[must_use]
	pub fn with_session(mut self, session: Arc<dyn SessionBackend>) -> Self {
		self.session = Some(session);
		self
	}

	/// Cap the rendered size of any report.
	#[must_use]
	pub fn max_output_bytes(mut self, limit: usize) -> Self {
		self.max_output_bytes = Some(limit);
		self
	}

	/// Use an explicit executable for one CLI tool instead of resolving
	/// it on `PATH`.
	#[must_use]
	pub fn tool_override(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
		self.tool_overrides.insert(name.into(), path.into());
		self
	}

	fn resolve_tool(&self, name: &str) -> Result<PathBuf> {
		match self.tool_overrides.get(name) {
			Some(path) => Ok(path.clone()),
			None => require_tool(name),
		}
	}

	/// Project root operations resolve paths against.
	pub fn project_root(&self) -> &Path {
		&self.project_root
	}

	fn ready_session(&self) -> Option<&Arc<dyn SessionBackend>> {
		self.session.as_ref().filter(|s| s.is_ready())
	}

	/// Serialize a report, enforcing the configured output cap.
	///
	/// # Errors
	///
	/// [`Error::OutputTooLarge`] when the rendered report exceeds the cap.
	pub fn render<T: Serialize>(&self, report: &T) -> Result<String> {
		let rendered = serde_json::to_string(report)?;
		if let Some(limit) = self.max_output_bytes
			&& rendered.len() > limit
		{
			return Err(Error::OutputTooLarge {
				size: rendered.len(),
				limit,
			});
		}
		Ok(rendered)
	}

	/// Verify a file's formal properties.
	///
	/// Prefers `ivy/verify` on the session (staging-directory resolution,
	/// automatic isolate detection); falls back to running `ivy_check`.
	pub async fn verify(
		&self,
		relative_path: &str,
		isolate: Option<&str>,
	) -> Result<ToolchainReport> {
		let abs = validate_ivy_path(&self.project_root, relative_path)?;

		if let Some(session) = self.ready_session() {
			match verify_via_session(session.as_ref(), &abs, isolate).await {
				Ok(report) => return Ok(report),
				Err(e) => debug!(error = %e, "ivy/verify via session failed, falling back to CLI"),
			}
		}

		let tool = self.resolve_tool("ivy_check")?;
		let args = check_args(relative_path, isolate);
		let out = run_tool(&tool, &args, &self.project_root).await?;

		let raw_output = out.combined();
		let diagnostics = parse_check_output(&raw_output);
		let parse_warning = (!out.success() && diagnostics.is_empty()).then(|| {
			"ivy_check exited with non-zero status but no structured diagnostics \
			 could be parsed. Check raw_output for details."
				.to_string()
		});

		Ok(ToolchainReport {
			success: out.success(),
			diagnostic_count: Some(diagnostics.len()),
			error_count: Some(record::count(&diagnostics, Severity::Error)),
			warning_count: Some(record::count(&diagnostics, Severity::Warning)),
			raw_output: Some(raw_output.trim().to_string()),
			return_code: out.return_code,
			duration_seconds: Some(round2(out.duration.as_secs_f64())),
			isolate: isolate.map(str::to_string),
			parse_warning,
			diagnostics: Some(diagnostics),
			..ToolchainReport::empty(Via::Cli)
		})
	}

	/// Compile a file, by default to a test executable.
	///
	/// Prefers `ivy/compile` on the session; falls back to running `ivyc`.
	pub async fn compile(
		&self,
		relative_path: &str,
		target: &str,
		isolate: Option<&str>,
	) -> Result<ToolchainReport> {
		let abs = validate_ivy_path(&self.project_root, relative_path)?;

		if let Some(session) = self.ready_session() {
			let attempt = async {
				let uri = uri_from_path(&abs)?;
				let params = json!({"textDocument": {"uri": uri.as_str()}, "target": target});
				session.custom_request("ivy/compile", Some(params)).await
			};
			match attempt.await {
				Ok(resp) => return Ok(passthrough_report(resp, Via::Session)),
				Err(e) => debug!(error = %e, "ivy/compile via session failed, falling back to CLI"),
			}
		}

		let tool = self.resolve_tool("ivyc")?;
		let args = compile_args(relative_path, target, isolate);
		let out = run_tool(&tool, &args, &self.project_root).await?;

		Ok(ToolchainReport {
			success: out.success(),
			raw_output: Some(out.combined().trim().to_string()),
			return_code: out.return_code,
			duration_seconds: Some(round2(out.duration.as_secs_f64())),
			isolate: isolate.map(str::to_string),
			target: Some(target.to_string()),
			..ToolchainReport::empty(Via::Cli)
		})
	}

	/// Show the structure of a model: types, relations, actions,
	/// invariants, and isolates.
	///
	/// Prefers `ivy/showModel` on the session; falls back to `ivy_show`.
	pub async fn show_model(
		&self,
		relative_path: &str,
		isolate: Option<&str>,
	) -> Result<ToolchainReport> {
		let abs = validate_ivy_path(&self.project_root, relative_path)?;

		if let Some(session) = self.ready_session() {
			let attempt = async {
				let uri = uri_from_path(&abs)?;
				let mut params = json!({"textDocument": {"uri": uri.as_str()}});
				if let Some(isolate) = isolate {
					params["isolate"] = json!(isolate);
				}
				session.custom_request("ivy/showModel", Some(params)).await
			};
			match attempt.await {
				Ok(resp) => return Ok(passthrough_report(resp, Via::Session)),
				Err(e) => debug!(error = %e, "ivy/showModel via session failed, falling back to CLI"),
			}
		}

		let tool = self.resolve_tool("ivy_show")?;
		let args = check_args(relative_path, isolate);
		let out = run_tool(&tool, &args, &self.project_root).await?;

		Ok(ToolchainReport {
			success: out.success(),
			raw_output: Some(out.combined().trim().to_string()),
			return_code: out.return_code,
			duration_seconds: Some(round2(out.duration.as_secs_f64())),
			isolate: isolate.map(str::to_string),
			..ToolchainReport::empty(Via::Cli)
		})
	}

	/// Cached diagnostics for one file, without running any tool.
	pub async fn cached_diagnostics_for(&self, relative_path: &str) -> Result<FileDiagnosticsReport> {
		let abs = validate_ivy_path(&self.project_root, relative_path)?;
		let session = self.ready_session();
		let feature_status = self.feature_status().await;

		let diagnostics = match (&session, uri_from_path(&abs)) {
			(Some(s), Ok(uri)) => s.diagnostics_for(uri.as_str()),
			_ => Vec::new(),
		};
		Ok(FileDiagnosticsReport {
			file: relative_path.to_string(),
			diagnostic_count: diagnostics.len(),
			diagnostics,
			server_active: session.is_some(),
			feature_status,
		})
	}

	/// Cached diagnostics for every document the server has reported on.
	pub async fn cached_diagnostics_all(&self) -> AllDiagnosticsReport {
		let session = self.ready_session();
		let feature_status = self.feature_status().await;

		let files: BTreeMap<String, FileDiagnosticsEntry> = session
			.map(|s| s.all_diagnostics())
			.unwrap_or_default()
			.into_iter()
			.map(|(uri, diagnostics)| {
				(
					path_from_uri(&uri).to_string(),
					FileDiagnosticsEntry {
						diagnostic_count: diagnostics.len(),
						diagnostics,
					},
				)
			})
			.collect();
		AllDiagnosticsReport {
			total_files: files.len(),
			files,
			server_active: session.is_some(),
			feature_status,
		}
	}

	async fn feature_status(&self) -> Option<JsonValue> {
		let session = self.ready_session()?;
		match session.custom_request("ivy/featureStatus", None).await {
			Ok(status) => Some(status),
			Err(e) => {
				debug!(error = %e, "ivy/featureStatus request failed");
				None
			}
		}
	}

	/// Structural lint of one file. Always local, never dispatched.
	pub fn lint(&self, relative_path: &str) -> Result<LintReport> {
		let abs = validate_ivy_path(&self.project_root, relative_path)?;
		let source = String::from_utf8_lossy(&std::fs::read(&abs)?).into_owned();
		Ok(LintReport::new(relative_path, structural_lint(&source, &abs)))
	}

	/// Project-wide include graph.
	///
	/// Prefers the server's indexed graph via `ivy/includeGraph`; falls
	/// back to scanning the filesystem.
	pub async fn project_include_graph(&self) -> ProjectIncludeReport {
		if let Some(session) = self.ready_session() {
			match project_graph_via_session(session.as_ref()).await {
				Ok(report) => return report,
				Err(e) => {
					debug!(error = %e, "ivy/includeGraph via session failed, falling back to filesystem");
				}
			}
		}
		project_include_report(&self.project_root)
	}

	/// Include graph centered on one file. Always served by the
	/// filesystem scan; the server's graph query has no per-file shape.
	pub fn file_include_graph(&self, relative_path: &str) -> Result<FileIncludeReport> {
		validate_ivy_path(&self.project_root, relative_path)?;
		Ok(file_include_report(&self.project_root, relative_path))
	}

	/// Query the server's operational status: mode, version, uptime,
	/// tool availability, and indexing state.
	pub async fn server_status(&self) -> ServerStatusReport {
		let Some(session) = self.ready_session() else {
			return ServerStatusReport {
				server_active: false,
				error: Some("Ivy language server is not running".into()),
				status: Map::new(),
			};
		};
		match session.custom_request("ivy/serverStatus", None).await {
			Ok(resp) => ServerStatusReport {
				server_active: true,
				error: None,
				status: into_object(resp),
			},
			Err(e) => ServerStatusReport {
				server_active: true,
				error: Some(format!("Failed to query server status: {e}")),
				status: Map::new(),
			},
		}
	}

	/// List the test scopes the server knows about.
	pub async fn list_test_scopes(&self) -> TestScopeReport {
		self.test_scope_request("ivy/listTests", None).await
	}

	/// Set or, with `None`, clear the active test scope.
	pub async fn set_test_scope(&self, test_file: Option<&str>) -> TestScopeReport {
		let mut params = Map::new();
		if let Some(test_file) = test_file {
			params.insert("testFile".into(), json!(test_file));
		}
		self.test_scope_request("ivy/setActiveTest", Some(JsonValue::Object(params)))
			.await
	}

	async fn test_scope_request(&self, method: &str, params: Option<JsonValue>) -> TestScopeReport {
		let Some(session) = self.ready_session() else {
			return TestScopeReport {
				server_active: false,
				error: Some("Ivy language server is not running".into()),
				scopes: Map::new(),
			};
		};
		match session.custom_request(method, params).await {
			Ok(resp) => TestScopeReport {
				server_active: true,
				error: None,
				scopes: into_object(resp),
			},
			Err(e) => TestScopeReport {
				server_active: true,
				error: Some(format!("Test scope operation failed: {e}")),
				scopes: Map::new(),
			},
		}
	}
}

async fn verify_via_session(
	session: &dyn SessionBackend,
	abs_path: &Path,
	isolate: Option<&str>,
) -> probe_lsp::Result<ToolchainReport> {
	let uri = uri_from_path(abs_path)?;
	let mut params = json!({"textDocument": {"uri": uri.as_str()}});
	if let Some(isolate) = isolate {
		params["isolate"] = json!(isolate);
	}
	let resp = session.custom_request("ivy/verify", Some(params)).await?;

	let output_lines: Vec<String> = resp
		.get("output")
		.and_then(|v| serde_json::from_value(v.clone()).ok())
		.unwrap_or_default();
	let raw_output = output_lines.join("\n");
	let diagnostics = parse_check_output(&raw_output);
	let diagnostic_count = resp
		.get("diagnosticCount")
		.and_then(JsonValue::as_u64)
		.map_or(diagnostics.len(), |n| n as usize);

	Ok(ToolchainReport {
		success: resp.get("success").and_then(JsonValue::as_bool).unwrap_or(false),
		diagnostic_count: Some(diagnostic_count),
		error_count: Some(record::count(&diagnostics, Severity::Error)),
		warning_count: Some(record::count(&diagnostics, Severity::Warning)),
		raw_output: Some(raw_output.trim().to_string()),
		duration_seconds: Some(round2(
			resp.get("duration").and_then(JsonValue::as_f64).unwrap_or(0.0),
		)),
		isolate: resp
			.get("isolate")
			.and_then(JsonValue::as_str)
			.map(str::to_string),
		diagnostics: Some(diagnostics),
		..ToolchainReport::empty(Via::Session)
	})
}

async fn project_graph_via_session(
	session: &dyn SessionBackend,
) -> probe_lsp::Result<ProjectIncludeReport> {
	let resp = session.custom_request("ivy/includeGraph", None).await?;
	let nodes = resp
		.get("nodes")
		.and_then(JsonValue::as_array)
		.cloned()
		.unwrap_or_default();
	let edges = resp
		.get("edges")
		.and_then(JsonValue::as_array)
		.cloned()
		.unwrap_or_default();

	let mut files = BTreeMap::new();
	for node in &nodes {
		let Some(uri) = node.get("uri").and_then(JsonValue::as_str) else {
			continue;
		};
		let includes: Vec<String> = edges
			.iter()
			.filter(|e| e.get("from").and_then(JsonValue::as_str) == Some(uri))
			.filter_map(|e| e.get("to").and_then(JsonValue::as_str))
			.map(|to| path_from_uri(to).to_string())
			.collect();
		files.insert(
			path_from_uri(uri).to_string(),
			IncludeSummary {
				include_count: includes.len(),
				includes,
				symbol_count: node.get("symbolCount").and_then(JsonValue::as_u64),
			},
		);
	}

	Ok(ProjectIncludeReport {
		total_files: files.len(),
		total_include_edges: edges.len(),
		files,
		skipped_files: Vec::new(),
		via: Via::Session,
	})
}

/// Lift a session response into a report, pulling out the fields the
/// report types and leaving the rest flattened.
fn passthrough_report(resp: JsonValue, via: Via) -> ToolchainReport {
	let mut extra = into_object(resp);
	// A reply that never says "success" is not a clean success.
	let success = extra
		.remove("success")
		.and_then(|v| v.as_bool())
		.unwrap_or(false);
	let duration_seconds = extra
		.remove("duration")
		.and_then(|v| v.as_f64())
		.map(round2);
	let isolate = extra
		.remove("isolate")
		.and_then(|v| v.as_str().map(str::to_string));
	let target = extra
		.remove("target")
		.and_then(|v| v.as_str().map(str::to_string));

	ToolchainReport {
		success,
		duration_seconds,
		isolate,
		target,
		extra,
		..ToolchainReport::empty(via)
	}
}

fn into_object(value: JsonValue) -> Map<String, JsonValue> {
	match value {
		JsonValue::Object(map) => map,
		JsonValue::Null => Map::new(),
		other => {
			let mut map = Map::new();
			map.insert("result".into(), other);
			map
		}
	}
}

fn round2(value: f64) -> f64 {
	(value * 100.0).round() / 100.0
}

/// Argument vector for `ivy_check` and `ivy_show`: optional isolate,
/// then the positional path. No shell is involved at any point.
fn check_args(relative_path: &str, isolate: Option<&str>) -> Vec<String> {
	let mut args = Vec::new();
	if let Some(isolate) = isolate {
		args.push(format!("isolate={isolate}"));
	}
	args.push(relative_path.to_string());
	args
}

/// Argument vector for `ivyc`: target, optional isolate, positional path.
fn compile_args(relative_path: &str, target: &str, isolate: Option<&str>) -> Vec<String> {
	let mut args = vec![format!("target={target}")];
	if let Some(isolate) = isolate {
		args.push(format!("isolate={isolate}"));
	}
	args.push(relative_path.to_string());
	args
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use parking_lot::Mutex;
	use pretty_assertions::assert_eq;

	use super::*;

	#[derive(Default)]
	struct FakeBackend {
		ready: bool,
		responses: HashMap<String, JsonValue>,
		failing: HashSet<String>,
		diagnostics: HashMap<String, Vec<Diagnostic>>,
		seen: Mutex<Vec<(String, Option<JsonValue>)>>,
	}

	impl FakeBackend {
		fn ready() -> Self {
			Self {
				ready: true,
				..Self::default()
			}
		}

		fn respond(mut self, method: &str, response: JsonValue) -> Self {
			self.responses.insert(method.to_string(), response);
			self
		}

		fn fail(mut self, method: &str) -> Self {
			self.failing.insert(method.to_string());
			self
		}
	}

	#[async_trait]
	impl SessionBackend for FakeBackend {
		fn is_ready(&self) -> bool {
			self.ready
		}

		async fn custom_request(
			&self,
			method: &str,
			params: Option<JsonValue>,
		) -> probe_lsp::Result<JsonValue> {
			self.seen.lock().push((method.to_string(), params));
			if self.failing.contains(method) {
				return Err(probe_lsp::Error::SessionStopped);
			}
			match self.responses.get(method) {
				Some(resp) => Ok(resp.clone()),
				None => Err(probe_lsp::Error::Response(
					probe_lsp::ResponseError::method_not_found(method),
				)),
			}
		}

		fn diagnostics_for(&self, uri: &str) -> Vec<Diagnostic> {
			self.diagnostics.get(uri).cloned().unwrap_or_default()
		}

		fn all_diagnostics(&self) -> HashMap<String, Vec<Diagnostic>> {
			self.diagnostics.clone()
		}
	}

	fn project_with_model() -> tempfile::TempDir {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("model.ivy"), "#lang ivy1.7\n").unwrap();
		dir
	}

	fn stub_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
		use std::os::unix::fs::PermissionsExt;

		let path = dir.join(name);
		std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
		std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
		path
	}

	#[tokio::test]
	async fn test_verify_via_session_parses_output() {
		let dir = project_with_model();
		let backend = FakeBackend::ready().respond(
			"ivy/verify",
			json!({
				"success": false,
				"output": ["checking...", "model.ivy:4: error: invariant fails"],
				"diagnosticCount": 1,
				"duration": 1.237,
				"isolate": "proto",
			}),
		);
		let orchestrator = Orchestrator::new(dir.path()).with_session(Arc::new(backend));

		let report = orchestrator.verify("model.ivy", None).await.unwrap();
		assert!(!report.success);
		assert!(matches!(report.via, Via::Session));
		assert_eq!(report.diagnostic_count, Some(1));
		assert_eq!(report.error_count, Some(1));
		assert_eq!(report.duration_seconds, Some(1.24));
		assert_eq!(report.isolate.as_deref(), Some("proto"));
		let diags = report.diagnostics.unwrap();
		assert_eq!(diags[0].line, 4);
		assert_eq!(diags[0].message, "invariant fails");
	}

	#[tokio::test]
	async fn test_verify_validates_before_dispatch() {
		let dir = project_with_model();
		// The session would answer, but validation must fail first.
		let backend = FakeBackend::ready().respond("ivy/verify", json!({"success": true}));
		let orchestrator = Orchestrator::new(dir.path()).with_session(Arc::new(backend));

		let err = orchestrator.verify("missing.ivy", None).await.unwrap_err();
		assert!(matches!(err, Error::FileNotFound(_)));
		let err = orchestrator.verify("model.txt", None).await.unwrap_err();
		assert!(matches!(err, Error::NotIvyFile(_)));
	}

	#[tokio::test]
	async fn test_verify_without_tool_reports_not_found() {
		let dir = project_with_model();
		let orchestrator = Orchestrator::new(dir.path());
		// No session attached and ivy_check is not installed here.
		let err = orchestrator.verify("model.ivy", None).await.unwrap_err();
		assert!(matches!(err, Error::ToolNotFound { tool } if tool == "ivy_check"));
	}

	#[tokio::test]
	async fn test_verify_via_cli_parses_structured_output() {
		let dir = project_with_model();
		let check = stub_tool(
			dir.path(),
			"ivy_check",
			"echo 'checking isolate proto...'\n\
			 echo 'model.ivy:4: error: invariant fails'\n\
			 echo 'model.ivy:9: warning: unused relation' >&2\n\
			 exit 1",
		);
		let orchestrator = Orchestrator::new(dir.path()).tool_override("ivy_check", check);

		let report = orchestrator.verify("model.ivy", Some("proto")).await.unwrap();
		assert!(matches!(report.via, Via::Cli));
		assert!(!report.success);
		assert_eq!(report.return_code, Some(1));
		assert_eq!(report.diagnostic_count, Some(2));
		assert_eq!(report.error_count, Some(1));
		assert_eq!(report.warning_count, Some(1));
		assert_eq!(report.isolate.as_deref(), Some("proto"));
		assert!(report.parse_warning.is_none());
		assert!(report.raw_output.unwrap().contains("invariant fails"));
	}

	#[tokio::test]
	async fn test_verify_via_cli_clean_run() {
		let dir = project_with_model();
		let check = stub_tool(dir.path(), "ivy_check", "echo 'all checks PASS'\nexit 0");
		let orchestrator = Orchestrator::new(dir.path()).tool_override("ivy_check", check);

		let report = orchestrator.verify("model.ivy", None).await.unwrap();
		assert!(report.success);
		assert!(matches!(report.via, Via::Cli));
		assert_eq!(report.diagnostic_count, Some(0));
		assert!(report.parse_warning.is_none());
	}

	#[tokio::test]
	async fn test_verify_cli_failure_without_diagnostics_is_flagged() {
		let dir = project_with_model();
		let check = stub_tool(dir.path(), "ivy_check", "echo 'traceback garbage'\nexit 2");
		let orchestrator = Orchestrator::new(dir.path()).tool_override("ivy_check", check);

		let report = orchestrator.verify("model.ivy", None).await.unwrap();
		assert!(!report.success);
		assert_eq!(report.return_code, Some(2));
		assert_eq!(report.diagnostic_count, Some(0));
		assert!(report.parse_warning.unwrap().contains("no structured diagnostics"));
	}

	#[tokio::test]
	async fn test_session_failure_falls_back_to_working_cli() {
		let dir = project_with_model();
		let check = stub_tool(
			dir.path(),
			"ivy_check",
			"echo 'model.ivy:2: warning: shadowed name'\nexit 0",
		);
		let backend = FakeBackend::ready().fail("ivy/verify");
		let orchestrator = Orchestrator::new(dir.path())
			.with_session(Arc::new(backend))
			.tool_override("ivy_check", check);

		let report = orchestrator.verify("model.ivy", None).await.unwrap();
		assert!(matches!(report.via, Via::Cli));
		assert!(report.success);
		assert_eq!(report.warning_count, Some(1));
	}

	#[tokio::test]
	async fn test_compile_reply_without_success_field_is_not_clean() {
		let dir = project_with_model();
		let backend = FakeBackend::ready()
			.respond("ivy/compile", json!({"output": "staging", "duration": 0.5}));
		let orchestrator = Orchestrator::new(dir.path()).with_session(Arc::new(backend));

		let report = orchestrator.compile("model.ivy", "test", None).await.unwrap();
		assert!(matches!(report.via, Via::Session));
		assert!(!report.success);
		assert_eq!(report.duration_seconds, Some(0.5));
		assert_eq!(report.extra["output"], "staging");
	}

	#[tokio::test]
	async fn test_session_errors_never_reach_the_caller() {
		let dir = project_with_model();
		let backend = FakeBackend::ready().fail("ivy/verify");
		let orchestrator = Orchestrator::new(dir.path()).with_session(Arc::new(backend));

		// The session failure is swallowed; what surfaces is the state of
		// the fallback path (here: ivy_check is not installed).
		let err = orchestrator.verify("model.ivy", None).await.unwrap_err();
		assert!(matches!(err, Error::ToolNotFound { tool } if tool == "ivy_check"));
	}

	#[tokio::test]
	async fn test_project_graph_falls_back_to_filesystem() {
		let dir = project_with_model();
		let backend = FakeBackend::ready().fail("ivy/includeGraph");
		let orchestrator = Orchestrator::new(dir.path()).with_session(Arc::new(backend));

		let report = orchestrator.project_include_graph().await;
		assert!(matches!(report.via, Via::Filesystem));
		assert_eq!(report.total_files, 1);
		assert!(report.files.contains_key("model.ivy"));
	}

	#[tokio::test]
	async fn test_project_graph_via_session_converts_nodes() {
		let dir = project_with_model();
		let backend = FakeBackend::ready().respond(
			"ivy/includeGraph",
			json!({
				"nodes": [
					{"uri": "file:///p/model.ivy", "symbolCount": 12},
					{"uri": "file:///p/order.ivy", "symbolCount": 3},
				],
				"edges": [{"from": "file:///p/model.ivy", "to": "file:///p/order.ivy"}],
			}),
		);
		let orchestrator = Orchestrator::new(dir.path()).with_session(Arc::new(backend));

		let report = orchestrator.project_include_graph().await;
		assert!(matches!(report.via, Via::Session));
		assert_eq!(report.total_files, 2);
		assert_eq!(report.total_include_edges, 1);
		let model = &report.files["/p/model.ivy"];
		assert_eq!(model.includes, vec!["/p/order.ivy"]);
		assert_eq!(model.symbol_count, Some(12));
	}

	#[tokio::test]
	async fn test_cached_diagnostics_without_session() {
		let dir = project_with_model();
		let orchestrator = Orchestrator::new(dir.path());

		let report = orchestrator.cached_diagnostics_for("model.ivy").await.unwrap();
		assert!(!report.server_active);
		assert_eq!(report.diagnostic_count, 0);
		assert!(report.feature_status.is_none());

		let all = orchestrator.cached_diagnostics_all().await;
		assert!(!all.server_active);
		assert_eq!(all.total_files, 0);
	}

	#[tokio::test]
	async fn test_cached_diagnostics_maps_uris_to_paths() {
		let dir = project_with_model();
		let uri = probe_lsp::uri_from_path(&dir.path().join("model.ivy")).unwrap();
		let mut backend = FakeBackend::ready()
			.respond("ivy/featureStatus", json!({"diagnostics": true}));
		backend.diagnostics.insert(
			uri.as_str().to_string(),
			vec![Diagnostic {
				message: "unmatched brace".into(),
				..Default::default()
			}],
		);
		let orchestrator = Orchestrator::new(dir.path()).with_session(Arc::new(backend));

		let report = orchestrator.cached_diagnostics_for("model.ivy").await.unwrap();
		assert!(report.server_active);
		assert_eq!(report.diagnostic_count, 1);
		assert_eq!(report.feature_status, Some(json!({"diagnostics": true})));

		let all = orchestrator.cached_diagnostics_all().await;
		assert_eq!(all.total_files, 1);
		let path = dir.path().join("model.ivy");
		let entry = &all.files[path.to_str().unwrap()];
		assert_eq!(entry.diagnostic_count, 1);
	}

	#[tokio::test]
	async fn test_server_status_shapes() {
		let dir = project_with_model();
		let orchestrator = Orchestrator::new(dir.path());
		let status = orchestrator.server_status().await;
		assert!(!status.server_active);
		assert!(status.error.is_some());

		let backend = FakeBackend::ready()
			.respond("ivy/serverStatus", json!({"mode": "full", "version": "0.9"}));
		let orchestrator = Orchestrator::new(dir.path()).with_session(Arc::new(backend));
		let status = orchestrator.server_status().await;
		assert!(status.server_active);
		assert!(status.error.is_none());
		assert_eq!(status.status["mode"], "full");

		let rendered = serde_json::to_value(&status).unwrap();
		assert_eq!(rendered["server_active"], true);
		assert_eq!(rendered["mode"], "full");
	}

	#[tokio::test]
	async fn test_set_test_scope_params() {
		let dir = project_with_model();
		let backend = Arc::new(
			FakeBackend::ready().respond("ivy/setActiveTest", json!({"activeTest": "t.ivy"})),
		);
		let orchestrator =
			Orchestrator::new(dir.path()).with_session(Arc::clone(&backend) as Arc<dyn SessionBackend>);

		let report = orchestrator.set_test_scope(Some("t.ivy")).await;
		assert!(report.server_active);
		assert_eq!(report.scopes["activeTest"], "t.ivy");

		let _ = orchestrator.set_test_scope(None).await;
		let seen = backend.seen.lock();
		assert_eq!(seen[0].1, Some(json!({"testFile": "t.ivy"})));
		assert_eq!(seen[1].1, Some(json!({})));
	}

	#[tokio::test]
	async fn test_render_enforces_output_cap() {
		let dir = project_with_model();
		let orchestrator = Orchestrator::new(dir.path()).max_output_bytes(16);
		let report = orchestrator.lint("model.ivy").unwrap();
		let err = orchestrator.render(&report).unwrap_err();
		assert!(matches!(err, Error::OutputTooLarge { limit: 16, .. }));

		let orchestrator = Orchestrator::new(dir.path());
		assert!(orchestrator.render(&json!({"ok": true})).is_ok());
	}

	#[test]
	fn test_cli_argument_construction() {
		assert_eq!(check_args("model.ivy", None), vec!["model.ivy"]);
		assert_eq!(
			check_args("model.ivy", Some("proto")),
			vec!["isolate=proto", "model.ivy"]
		);
		assert_eq!(
			compile_args("model.ivy", "test", None),
			vec!["target=test", "model.ivy"]
		);
		assert_eq!(
			compile_args("model.ivy", "repl", Some("proto")),
			vec!["target=repl", "isolate=proto", "model.ivy"]
		);
	}

	#[test]
	fn test_via_wire_names() {
		assert_eq!(serde_json::to_string(&Via::Session).unwrap(), "\"lsp\"");
		assert_eq!(serde_json::to_string(&Via::Cli).unwrap(), "\"cli\"");
		assert_eq!(
			serde_json::to_string(&Via::Filesystem).unwrap(),
			"\"filesystem\""
		);
	}
}
