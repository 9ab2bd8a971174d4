//! Structured diagnostic records shared by the parsers and reports.

use serde::{Deserialize, Serialize};

/// Severity of a diagnostic, matching the toolchain's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	/// A verification or structural error.
	Error,
	/// A non-fatal issue.
	Warning,
}

impl std::fmt::Display for Severity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Error => f.write_str("error"),
			Self::Warning => f.write_str("warning"),
		}
	}
}

/// One diagnostic extracted from tool output or the structural lint.
///
/// Toolchain diagnostics carry a file; lint diagnostics carry a source
/// tag instead, the file being implied by the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
	/// Path as printed by the tool, when present.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub file: Option<String>,
	/// One-based line number.
	pub line: u64,
	/// Severity class.
	pub severity: Severity,
	/// Human-readable message.
	pub message: String,
	/// Producer tag, e.g. `ivy-lint`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub source: Option<String>,
}

/// Count the records of one severity.
pub fn count(records: &[DiagnosticRecord], severity: Severity) -> usize {
	records.iter().filter(|r| r.severity == severity).count()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_severity_serializes_lowercase() {
		assert_eq!(serde_json::to_string(&Severity::Error).unwrap(), "\"error\"");
		assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"warning\"");
	}

	#[test]
	fn test_record_omits_absent_fields() {
		let record = DiagnosticRecord {
			file: None,
			line: 3,
			severity: Severity::Warning,
			message: "Missing '#lang ivy1.7' header".into(),
			source: Some("ivy-lint".into()),
		};
		let json = serde_json::to_value(&record).unwrap();
		assert!(json.get("file").is_none());
		assert_eq!(json["source"], "ivy-lint");
	}
}
