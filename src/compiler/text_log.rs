//! Fallback parser for plain-text compiler logs
//!
//! Used when the compiler prints a human-readable log instead of JSON. Lines
//! are matched against these shapes, in order:
//!
//! 1. `<message> at <path>:<line>:<col>` (only while no diagnostic is open),
//!    an informational diagnostic finished on the spot
//! 2. `<path>:<line>:<col>: <message>`, an error
//! 3. `<path>:<line>:<col>:`, an error whose message comes on a later line
//! 4. `<code>: <message>`, message and code for the open diagnostic; the
//!    unmatched lines after it are collected as a hint

use std::sync::LazyLock;

use regex::Regex;
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticRelatedInformation, DiagnosticSeverity, Location, NumberOrString,
    Position, Range, Url,
};
use tracing::warn;

use crate::compiler::normalize::PathResolver;
use crate::compiler::types::{DiagnosticMap, add_diagnostic};

static EXECUTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.+) at (.+):(\d+):(\d+)").expect("valid regex"));
static FILE_WITH_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+):(\d+):(\d+):\s*(.+)").expect("valid regex"));
static FILE_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+):(\d+):(\d+):").expect("valid regex"));
static ERROR_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):\s*(.*)").expect("valid regex"));

/// Extracts diagnostics from a text log.
///
/// Diagnostics without a file are attributed to `document_path`. Hint lines
/// are attached as related information only when `related_information` is
/// supported by the client.
pub fn parse(
    data: &str,
    document_path: &str,
    resolver: &PathResolver,
    related_information: bool,
) -> DiagnosticMap {
    let mut parser = TextLogParser {
        resolver,
        document: resolver.to_url(document_path),
        related_information,
        current: None,
        hint: String::new(),
        read_hint: false,
        diagnostics: DiagnosticMap::new(),
    };

    for line in data.lines().flat_map(|line| line.split('\r')) {
        parser.feed(line);
    }
    parser.finish(true);

    parser.diagnostics
}

/// Diagnostic being assembled from one or more lines.
struct Pending {
    uri: Option<Url>,
    position: Position,
    severity: DiagnosticSeverity,
    message: Option<String>,
    code: Option<String>,
}

struct TextLogParser<'a> {
    resolver: &'a PathResolver,
    document: Option<Url>,
    related_information: bool,
    current: Option<Pending>,
    hint: String,
    read_hint: bool,
    diagnostics: DiagnosticMap,
}

impl TextLogParser<'_> {
    fn feed(&mut self, line: &str) {
        let execution = match self.current {
            None => EXECUTION_LINE.captures(line),
            Some(_) => None,
        };
        if let Some(caps) = execution {
            self.current = Some(Pending {
                uri: self.resolver.to_url(&caps[2]),
                position: position(&caps[3], &caps[4]),
                severity: DiagnosticSeverity::INFORMATION,
                message: Some(caps[1].to_string()),
                code: None,
            });
            self.finish(true);
            return;
        }

        if let Some(caps) = FILE_WITH_ERROR.captures(line) {
            self.finish(true);
            self.current = Some(Pending {
                uri: self.resolver.to_url(&caps[1]),
                position: position(&caps[2], &caps[3]),
                severity: DiagnosticSeverity::ERROR,
                message: Some(caps[4].to_string()),
                code: None,
            });
            return;
        }

        if let Some(caps) = FILE_ONLY.captures(line) {
            self.finish(true);
            self.current = Some(Pending {
                uri: self.resolver.to_url(&caps[1]),
                position: position(&caps[2], &caps[3]),
                severity: DiagnosticSeverity::ERROR,
                message: None,
                code: None,
            });
            return;
        }

        if let Some(caps) = ERROR_CODE.captures(line) {
            if self
                .current
                .as_ref()
                .is_some_and(|current| current.message.is_some())
            {
                self.finish(false);
            }
            let current = self.current.get_or_insert_with(|| Pending {
                uri: None,
                position: Position::default(),
                severity: DiagnosticSeverity::ERROR,
                message: Some(String::new()),
                code: None,
            });
            current.message = Some(caps[2].to_string());
            current.code = Some(caps[1].to_string());
            self.read_hint = true;
            return;
        }

        if self.read_hint {
            self.hint.push_str(line);
        }
    }

    /// Moves the open diagnostic into the result. Without `force`, a
    /// diagnostic still waiting for its message stays open.
    fn finish(&mut self, force: bool) {
        let Some(pending) = self
            .current
            .take_if(|pending| force || pending.message.is_some())
        else {
            return;
        };

        let hint = std::mem::take(&mut self.hint);
        self.read_hint = false;

        let Some(uri) = pending.uri.or_else(|| self.document.clone()) else {
            warn!("Dropping diagnostic without a file: {:?}", pending.message);
            return;
        };

        let range = Range::new(pending.position, pending.position);
        let related_information = (self.related_information && !hint.is_empty()).then(|| {
            vec![DiagnosticRelatedInformation {
                location: Location {
                    uri: uri.clone(),
                    range,
                },
                message: hint,
            }]
        });

        let diagnostic = Diagnostic {
            range,
            severity: Some(pending.severity),
            code: pending.code.map(NumberOrString::String),
            message: pending.message.unwrap_or_default(),
            related_information,
            ..Default::default()
        };
        add_diagnostic(&mut self.diagnostics, uri, diagnostic);
    }
}

/// Compiler lines are 1-based, columns are taken as-is.
fn position(line: &str, column: &str) -> Position {
    let line = line.parse::<u32>().unwrap_or(u32::MAX).saturating_sub(1);
    let character = column.parse::<u32>().unwrap_or(u32::MAX);
    Position::new(line, character)
}
