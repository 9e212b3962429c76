//! Common types for compiler output

use indexmap::IndexMap;
use serde::Deserialize;
use tower_lsp::lsp_types::{Diagnostic, Url};

/// Diagnostics grouped by the file they belong to, in the order the files
/// were first reported.
pub type DiagnosticMap = IndexMap<Url, Vec<Diagnostic>>;

/// Top level of a compiler run's JSON output. Any field may be missing.
///
/// Entries stay loosely typed so one malformed element does not discard the
/// rest of the run.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CompilerOutput {
    pub diagnostics: Option<Vec<serde_json::Value>>,
    pub items: Option<Vec<serde_json::Value>>,
}

/// Adds a diagnostic under `uri`, keeping first-seen file order.
pub fn add_diagnostic(map: &mut DiagnosticMap, uri: Url, diagnostic: Diagnostic) {
    map.entry(uri).or_default().push(diagnostic);
}
