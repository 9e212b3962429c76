//! Mapping of compiler diagnostics into per-file LSP diagnostics

use serde::Deserialize;
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticRelatedInformation, DiagnosticSeverity, Location, NumberOrString,
};
use tracing::{debug, info, warn};

use crate::compiler::json::parse_json;
use crate::compiler::normalize::{PathResolver, RangeShift, RawRange, fix_range};
use crate::compiler::text_log;
use crate::compiler::types::{CompilerOutput, DiagnosticMap, add_diagnostic};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDiagnostic {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    range: Option<RawRange>,
    #[serde(default)]
    severity: Option<DiagnosticSeverity>,
    #[serde(default)]
    code: Option<NumberOrString>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    related_information: Option<Vec<RawRelatedInformation>>,
    /// Present on diagnostics that use 1-based lines
    #[serde(default)]
    tab: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRelatedInformation {
    location: Option<RawLocation>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLocation {
    uri: Option<String>,
    range: Option<RawRange>,
}

/// Turns the output of a validation run into diagnostics keyed by file.
///
/// JSON output is preferred; anything that does not decode is handed to the
/// text log parser. Empty output yields no diagnostics.
pub fn collect_diagnostics(
    output: &str,
    document_path: &str,
    resolver: &PathResolver,
    related_information: bool,
) -> DiagnosticMap {
    if output.trim().is_empty() {
        return DiagnosticMap::new();
    }

    match parse_json::<CompilerOutput>(output) {
        Ok(parsed) => from_json(
            parsed.diagnostics.unwrap_or_default(),
            document_path,
            resolver,
        ),
        Err(e) => {
            debug!("Compiler output is not JSON: {}", e);
            info!("Falling back to text log parser");
            text_log::parse(output, document_path, resolver, related_information)
        }
    }
}

fn from_json(
    items: Vec<serde_json::Value>,
    document_path: &str,
    resolver: &PathResolver,
) -> DiagnosticMap {
    let mut diagnostics = DiagnosticMap::new();

    for item in items {
        let raw: RawDiagnostic = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping malformed diagnostic: {}", e);
                continue;
            }
        };
        let Some(message) = raw.message else {
            continue;
        };

        let local_path = raw
            .uri
            .filter(|uri| !uri.trim().is_empty())
            .unwrap_or_else(|| document_path.to_string());
        let Some(uri) = resolver.to_url(&local_path) else {
            warn!("Skipping diagnostic without a usable file: {:?}", local_path);
            continue;
        };

        let shift = if raw.tab.is_some() {
            RangeShift::TABBED_DIAGNOSTIC
        } else {
            RangeShift::DIAGNOSTIC
        };

        let related_information = raw.related_information.map(|infos| {
            infos
                .into_iter()
                .map(|info| {
                    let location = info.location.unwrap_or_default();
                    let path = location.uri.unwrap_or_else(|| local_path.clone());
                    let uri = resolver.to_url(&path).unwrap_or_else(|| uri.clone());
                    DiagnosticRelatedInformation {
                        location: Location {
                            uri,
                            range: fix_range(&location.range.unwrap_or_default(), shift),
                        },
                        message: info.message.unwrap_or_default(),
                    }
                })
                .collect()
        });

        let diagnostic = Diagnostic {
            range: fix_range(&raw.range.unwrap_or_default(), shift),
            severity: raw.severity,
            code: raw.code,
            source: raw.source,
            message,
            related_information,
            ..Default::default()
        };
        add_diagnostic(&mut diagnostics, uri, diagnostic);
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::{Position, Range, Url};

    fn collect(output: &str) -> DiagnosticMap {
        collect_diagnostics(output, "/work/main.das", &PathResolver::default(), true)
    }

    fn url(path: &str) -> Url {
        Url::from_file_path(path).unwrap()
    }

    #[test]
    fn collect_diagnostics_returns_nothing_for_blank_output() {
        assert!(collect("  \n").is_empty());
    }

    #[test]
    fn collect_diagnostics_defaults_to_document_path() {
        let diagnostics = collect(
            r#"{"diagnostics":[{"message":"unused variable","severity":2,"range":{"start":{"line":4,"character":2},"end":{"line":5,"character":7}}}]}"#,
        );

        let entries = &diagnostics[&url("/work/main.das")];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "unused variable");
        assert_eq!(entries[0].severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(
            entries[0].range,
            Range::new(Position::new(4, 2), Position::new(4, 7))
        );
    }

    #[test]
    fn collect_diagnostics_groups_by_reported_file() {
        let diagnostics = collect(
            r#"{"diagnostics":[
                {"uri":"/work/a.das","message":"one"},
                {"uri":"/work/b.das","message":"two"},
                {"uri":"/work/a.das","message":"three","code":31}
            ]}"#,
        );

        let files: Vec<_> = diagnostics.keys().cloned().collect();
        assert_eq!(files, vec![url("/work/a.das"), url("/work/b.das")]);
        assert_eq!(diagnostics[&url("/work/a.das")].len(), 2);
        assert_eq!(
            diagnostics[&url("/work/a.das")][1].code,
            Some(NumberOrString::Number(31))
        );
    }

    #[test]
    fn collect_diagnostics_shifts_tabbed_ranges() {
        let diagnostics = collect(
            r#"{"diagnostics":[{"message":"bad","tab":4,"range":{"start":{"line":3,"character":1},"end":{"line":4,"character":5}}}]}"#,
        );

        assert_eq!(
            diagnostics[&url("/work/main.das")][0].range,
            Range::new(Position::new(2, 1), Position::new(2, 6))
        );
    }

    #[test]
    fn collect_diagnostics_skips_entries_without_message() {
        let diagnostics = collect(
            r#"{"diagnostics":[{"uri":"/work/a.das"},{"message":"kept"},{"message":17}]}"#,
        );

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[&url("/work/main.das")][0].message, "kept");
    }

    #[test]
    fn collect_diagnostics_fills_related_information_defaults() {
        let diagnostics = collect(
            r#"{"diagnostics":[{"uri":"/work/a.das","message":"redefinition","relatedInformation":[
                {"message":"previous declaration here","location":{"uri":"/work/b.das","range":{"start":{"line":7,"character":0},"end":{"line":8,"character":3}}}},
                {"message":"in this file"}
            ]}]}"#,
        );

        let related = diagnostics[&url("/work/a.das")][0]
            .related_information
            .clone()
            .unwrap();
        assert_eq!(related[0].location.uri, url("/work/b.das"));
        assert_eq!(
            related[0].location.range,
            Range::new(Position::new(7, 0), Position::new(7, 3))
        );
        assert_eq!(related[1].location.uri, url("/work/a.das"));
        assert_eq!(related[1].location.range, Range::default());
    }

    #[test]
    fn collect_diagnostics_recovers_json_from_noisy_output() {
        let diagnostics = collect(
            "loading modules...\n{\"diagnostics\":[{\"message\":\"oops\"}]}\nexit code 1\n",
        );

        assert_eq!(diagnostics[&url("/work/main.das")][0].message, "oops");
    }

    #[test]
    fn collect_diagnostics_falls_back_to_text_log() {
        let diagnostics = collect("/work/lib.das:3:7: expecting ')'\n");

        let entries = &diagnostics[&url("/work/lib.das")];
        assert_eq!(entries[0].message, "expecting ')'");
        assert_eq!(entries[0].severity, Some(DiagnosticSeverity::ERROR));
    }

    #[test]
    fn collect_diagnostics_treats_truncated_json_as_text() {
        let diagnostics = collect(r#"{"diagnostics":[{"message":"cut of"#);
        assert!(diagnostics.is_empty());
    }
}
