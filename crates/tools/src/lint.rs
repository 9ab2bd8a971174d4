//! Structural lint for Ivy source, no toolchain involved.
//!
//! Catches the mistakes that otherwise cost a full `ivy_check` run to
//! surface: a missing `#lang` header, unbalanced braces, and `include`
//! directives that resolve to nothing next to the file.

use std::path::Path;

use serde::Serialize;

use crate::parse::include_directives;
use crate::record::{self, DiagnosticRecord, Severity};

const LINT_SOURCE: &str = "ivy-lint";

/// Report for one linted file.
#[derive(Debug, Serialize)]
pub struct LintReport {
	/// Path as given in the request.
	pub file: String,
	/// Findings, in document order per check.
	pub diagnostics: Vec<DiagnosticRecord>,
	/// Total findings.
	pub diagnostic_count: usize,
	/// Findings with error severity.
	pub error_count: usize,
	/// Findings with warning severity.
	pub warning_count: usize,
}

impl LintReport {
	/// Build a report from lint findings.
	#[must_use]
	pub fn new(file: impl Into<String>, diagnostics: Vec<DiagnosticRecord>) -> Self {
		let error_count = record::count(&diagnostics, Severity::Error);
		let warning_count = record::count(&diagnostics, Severity::Warning);
		Self {
			file: file.into(),
			diagnostic_count: diagnostics.len(),
			error_count,
			warning_count,
			diagnostics,
		}
	}
}

/// Lint Ivy source for structural problems.
///
/// `file_path` is the absolute location of the source; include resolution
/// looks for `NAME.ivy` in the same directory.
pub fn structural_lint(source: &str, file_path: &Path) -> Vec<DiagnosticRecord> {
	let mut diags = Vec::new();

	if !source.trim_start().starts_with("#lang") {
		diags.push(lint_record(1, Severity::Warning, "Missing '#lang ivy1.7' header"));
	}

	// Brace balance, with `#` starting a comment except on the #lang line.
	let lines: Vec<&str> = source.split('\n').collect();
	let mut depth: i64 = 0;
	for (i, line) in lines.iter().enumerate() {
		let code = if line.trim_start().starts_with("#lang") {
			*line
		} else {
			line.split('#').next().unwrap_or("")
		};
		for ch in code.chars() {
			match ch {
				'{' => depth += 1,
				'}' => depth -= 1,
				_ => {}
			}
			if depth < 0 {
				diags.push(lint_record(
					i as u64 + 1,
					Severity::Error,
					"Unmatched closing brace",
				));
				depth = 0;
			}
		}
	}
	if depth > 0 {
		diags.push(lint_record(
			lines.len() as u64,
			Severity::Error,
			format!("Unmatched opening brace ({depth} unclosed)"),
		));
	}

	let parent = file_path.parent().unwrap_or_else(|| Path::new(""));
	for (line, name) in include_directives(source) {
		if !parent.join(format!("{name}.ivy")).is_file() {
			diags.push(lint_record(
				line,
				Severity::Warning,
				format!("Unresolved include: {name} (not found in same directory)"),
			));
		}
	}

	diags
}

fn lint_record(line: u64, severity: Severity, message: impl Into<String>) -> DiagnosticRecord {
	DiagnosticRecord {
		file: None,
		line,
		severity,
		message: message.into(),
		source: Some(LINT_SOURCE.to_string()),
	}
}
