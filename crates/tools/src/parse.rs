//! Parsing of `ivy_check` output into structured diagnostics.

use std::sync::OnceLock;

use regex::Regex;

use crate::record::{DiagnosticRecord, Severity};

fn check_line_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| {
		Regex::new(r"^(.*?):(\d+):\s*(error|warning):\s*(.*)").unwrap()
	})
}

fn include_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| Regex::new(r"(?m)^include\s+(\w+)").unwrap())
}

/// Extract diagnostics from `ivy_check` output.
///
/// Scans for lines of the form `file:LINE: error|warning: message`. Lines
/// that do not match, including multi-line counterexample dumps, are
/// ignored; the caller keeps the raw output alongside the parsed records.
pub fn parse_check_output(output: &str) -> Vec<DiagnosticRecord> {
	output
		.lines()
		.filter_map(|line| {
			let caps = check_line_pattern().captures(line)?;
			let line_no: u64 = caps[2].parse().ok()?;
			let severity = match &caps[3] {
				"error" => Severity::Error,
				_ => Severity::Warning,
			};
			Some(DiagnosticRecord {
				file: Some(caps[1].to_string()),
				line: line_no,
				severity,
				message: caps[4].to_string(),
				source: None,
			})
		})
		.collect()
}

/// Find `include NAME` directives in Ivy source.
///
/// Returns `(one_based_line, module_name)` pairs. Only directives at the
/// start of a line count; an indented or commented `include` does not.
pub(crate) fn include_directives(source: &str) -> Vec<(u64, String)> {
	include_pattern()
		.captures_iter(source)
		.map(|caps| {
			let offset = caps.get(0).map_or(0, |m| m.start());
			let line = source[..offset].matches('\n').count() as u64 + 1;
			(line, caps[1].to_string())
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn test_parse_mixed_output() {
		let output = "\
checking isolate protocol_model...
model.ivy:42: error: assertion failed
model.ivy:10:  warning: unused variable
searching for counterexample...
some unrelated line";
		let diags = parse_check_output(output);
		assert_eq!(diags.len(), 2);
		assert_eq!(diags[0].file.as_deref(), Some("model.ivy"));
		assert_eq!(diags[0].line, 42);
		assert_eq!(diags[0].severity, Severity::Error);
		assert_eq!(diags[0].message, "assertion failed");
		assert_eq!(diags[1].severity, Severity::Warning);
		assert_eq!(diags[1].message, "unused variable");
	}

	#[test]
	fn test_parse_tolerates_paths_with_colons() {
		let diags = parse_check_output("/home/u/proj/model.ivy:7: error: boom");
		assert_eq!(diags.len(), 1);
		assert_eq!(diags[0].file.as_deref(), Some("/home/u/proj/model.ivy"));
		assert_eq!(diags[0].line, 7);
	}

	#[test]
	fn test_parse_preserves_order_and_counts() {
		let output =
			"a.ivy:1: error: missing type\nb.ivy:2: warning: shadowed name\nnoise\na.ivy:10: error: undeclared\n";
		let diags = parse_check_output(output);
		assert_eq!(diags.len(), 3);
		assert_eq!(diags[0].file.as_deref(), Some("a.ivy"));
		assert_eq!(diags[1].file.as_deref(), Some("b.ivy"));
		assert_eq!(diags[2].line, 10);
		assert_eq!(crate::record::count(&diags, Severity::Error), 2);
		assert_eq!(crate::record::count(&diags, Severity::Warning), 1);
		// Single-pass scanning is deterministic.
		assert_eq!(parse_check_output(output), diags);
	}

	#[test]
	fn test_parse_empty_output() {
		assert!(parse_check_output("").is_empty());
		assert!(parse_check_output("all checks PASS\n").is_empty());
	}

	#[test]
	fn test_include_directives_line_numbers() {
		let source = "#lang ivy1.7\ninclude order\n  include indented\ninclude network\n";
		let directives = include_directives(source);
		assert_eq!(
			directives,
			vec![(2, "order".to_string()), (4, "network".to_string())]
		);
	}
}
