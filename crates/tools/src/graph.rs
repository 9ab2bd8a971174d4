//! Include dependency graph, built by scanning the project tree.
//!
//! This is the fallback path behind `ivy/includeGraph`: it walks the
//! project for `.ivy` files, reads their `include` directives, and
//! resolves module names by file basename. Directories that never hold
//! model sources are pruned, and the scan stops at a file-count cap so a
//! stray scan of a huge tree stays bounded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use ignore::WalkBuilder;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dispatch::Via;
use crate::parse::include_directives;

const SKIP_DIRS: &[&str] = &[
	".git",
	".venv",
	"venv",
	"node_modules",
	"__pycache__",
	"build",
	"dist",
	"submodules",
];

/// Cap on the number of `.ivy` files one scan will read.
const MAX_IVY_FILES: usize = 5000;

/// A file the scan could not read.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
	/// Project-relative path.
	pub file: String,
	/// The read error.
	pub error: String,
}

/// One `include` directive with its resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedInclude {
	/// Module name as written in the directive.
	pub module: String,
	/// Project-relative path of the file providing the module, when found.
	pub resolved_path: Option<String>,
}

/// Per-file summary in a project-wide report.
#[derive(Debug, Clone, Serialize)]
pub struct IncludeSummary {
	/// Module names this file includes.
	pub includes: Vec<String>,
	/// Number of includes.
	pub include_count: usize,
	/// Indexed symbol count, present only for session-built reports.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub symbol_count: Option<u64>,
}

/// Include graph centered on one file.
#[derive(Debug, Serialize)]
pub struct FileIncludeReport {
	/// Project-relative path of the queried file.
	pub file: String,
	/// Direct includes with resolution results.
	pub includes: Vec<ResolvedInclude>,
	/// Files that include the queried file.
	pub included_by: Vec<String>,
	/// Module names reachable through includes, sorted.
	pub transitive_includes: Vec<String>,
	/// Number of transitive includes.
	pub transitive_include_count: usize,
	/// Files the scan could not read.
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub skipped_files: Vec<SkippedFile>,
	/// How the report was produced.
	pub via: Via,
}

/// Include graph for the whole project.
#[derive(Debug, Serialize)]
pub struct ProjectIncludeReport {
	/// Per-file summaries keyed by project-relative path.
	pub files: BTreeMap<String, IncludeSummary>,
	/// Number of scanned files.
	pub total_files: usize,
	/// Number of include edges across all files.
	pub total_include_edges: usize,
	/// Files the scan could not read.
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub skipped_files: Vec<SkippedFile>,
	/// How the report was produced.
	pub via: Via,
}

struct GraphScan {
	/// Include names per project-relative file path.
	graph: BTreeMap<String, Vec<String>>,
	/// Module basename to the file providing it.
	by_basename: HashMap<String, String>,
	skipped: Vec<SkippedFile>,
}

fn scan(project_root: &Path) -> GraphScan {
	let mut graph = BTreeMap::new();
	let mut by_basename = HashMap::new();
	let mut skipped = Vec::new();

	let walker = WalkBuilder::new(project_root)
		.standard_filters(false)
		.filter_entry(|entry| {
			let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
			!(is_dir && SKIP_DIRS.iter().any(|d| entry.file_name() == *d))
		})
		.build();

	for entry in walker {
		let entry = match entry {
			Ok(entry) => entry,
			Err(e) => {
				debug!(error = %e, "Walk error during include scan");
				continue;
			}
		};
		if !entry.file_type().is_some_and(|t| t.is_file()) {
			continue;
		}
		let Some(name) = entry.file_name().to_str() else {
			continue;
		};
		let Some(basename) = name.strip_suffix(".ivy") else {
			continue;
		};
		if graph.len() >= MAX_IVY_FILES {
			warn!(limit = MAX_IVY_FILES, "Include scan hit the file cap; graph is partial");
			break;
		}

		let rel_path = entry
			.path()
			.strip_prefix(project_root)
			.unwrap_or(entry.path())
			.to_string_lossy()
			.into_owned();
		by_basename.insert(basename.to_string(), rel_path.clone());

		match std::fs::read_to_string(entry.path()) {
			Ok(source) => {
				let includes = include_directives(&source)
					.into_iter()
					.map(|(_, name)| name)
					.collect();
				graph.insert(rel_path, includes);
			}
			Err(e) => skipped.push(SkippedFile {
				file: rel_path,
				error: e.to_string(),
			}),
		}
	}

	GraphScan {
		graph,
		by_basename,
		skipped,
	}
}

/// Build the project-wide include graph by scanning the filesystem.
pub fn project_include_report(project_root: &Path) -> ProjectIncludeReport {
	let scan = scan(project_root);
	let total_include_edges = scan.graph.values().map(Vec::len).sum();
	let files = scan
		.graph
		.into_iter()
		.map(|(path, includes)| {
			let include_count = includes.len();
			(
				path,
				IncludeSummary {
					includes,
					include_count,
					symbol_count: None,
				},
			)
		})
		.collect::<BTreeMap<_, _>>();
	ProjectIncludeReport {
		total_files: files.len(),
		total_include_edges,
		files,
		skipped_files: scan.skipped,
		via: Via::Filesystem,
	}
}

/// Build the include graph centered on one file by scanning the filesystem.
///
/// Includes resolve by basename across the whole project, so a module in
/// another directory still counts as resolved here even though the
/// structural lint, which only looks at siblings, would flag it.
pub fn file_include_report(project_root: &Path, relative_path: &str) -> FileIncludeReport {
	let scan = scan(project_root);
	let direct = scan.graph.get(relative_path).cloned().unwrap_or_default();

	let includes = direct
		.iter()
		.map(|name| ResolvedInclude {
			module: name.clone(),
			resolved_path: scan.by_basename.get(name).cloned(),
		})
		.collect();

	let target_module = Path::new(relative_path)
		.file_name()
		.map(|n| n.to_string_lossy().into_owned())
		.unwrap_or_default();
	let target_module = target_module.strip_suffix(".ivy").unwrap_or(&target_module);
	let included_by = scan
		.graph
		.iter()
		.filter(|(_, includes)| includes.iter().any(|i| i == target_module))
		.map(|(path, _)| path.clone())
		.collect();

	let mut transitive = HashSet::new();
	let mut stack = direct;
	while let Some(module) = stack.pop() {
		if !transitive.insert(module.clone()) {
			continue;
		}
		if let Some(deps) = scan
			.by_basename
			.get(&module)
			.and_then(|path| scan.graph.get(path))
		{
			stack.extend(deps.iter().cloned());
		}
	}
	let mut transitive_includes: Vec<String> = transitive.into_iter().collect();
	transitive_includes.sort_unstable();

	FileIncludeReport {
		file: relative_path.to_string(),
		includes,
		included_by,
		transitive_include_count: transitive_includes.len(),
		transitive_includes,
		skipped_files: scan.skipped,
		via: Via::Filesystem,
	}
}
