//! Global completion list and the features built on it
//!
//! The list comes from compiling dedicated source files whose JSON output
//! carries `items`. It is shared by every document and replaced wholesale by
//! the last successful refresh.

use std::sync::RwLock;

use tower_lsp::lsp_types::{
    CompletionItem, Documentation, Position, SignatureHelp, SignatureInformation,
};
use tracing::{debug, warn};

use crate::compiler::{CompilerOutput, parse_json};

#[derive(Debug, Default)]
pub struct CompletionCache {
    items: RwLock<Vec<CompletionItem>>,
}

impl CompletionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, items: Vec<CompletionItem>) {
        debug!("Replacing global completion list with {} items", items.len());
        *self.items.write().unwrap() = items;
    }

    pub fn items(&self) -> Vec<CompletionItem> {
        self.items.read().unwrap().clone()
    }

    /// Documentation of items whose filter text is exactly `short_name`.
    pub fn function_documentation(&self, short_name: &str) -> Vec<String> {
        if short_name.is_empty() {
            return Vec::new();
        }
        self.documentation_where(|filter| filter == short_name)
    }

    /// Documentation of items naming `ty` or its leading word
    /// (`array<int>` matches `array<int>`, `Foo const` matches `Foo`).
    pub fn type_documentation(&self, ty: &str) -> Vec<String> {
        if ty.is_empty() {
            return Vec::new();
        }
        self.documentation_where(|filter| {
            !filter.is_empty()
                && ty.starts_with(filter)
                && (ty.len() == filter.len() || ty[filter.len()..].starts_with(' '))
        })
    }

    fn documentation_where(&self, matches: impl Fn(&str) -> bool) -> Vec<String> {
        self.items
            .read()
            .unwrap()
            .iter()
            .filter(|item| item.filter_text.as_deref().is_some_and(&matches))
            .filter_map(|item| item.documentation.as_ref().map(documentation_text))
            .collect()
    }

    /// Signature help for the call surrounding `position`.
    ///
    /// Scans back to the nearest `(` or `::` (giving up at a `)`), takes the
    /// token in front of it and shows the documentation of the first item
    /// naming that token, one signature per documentation line.
    pub fn signature_help(&self, text: &str, position: Position) -> Option<SignatureHelp> {
        let items = self.items.read().unwrap();
        if items.is_empty() {
            return None;
        }

        let token = call_token(text, position)?;
        find_signature(&items, &token, |item| item.filter_text.as_deref())
            .or_else(|| find_signature(&items, &token, |item| Some(item.label.as_str())))
    }
}

/// Completion items from a compiler run, or `None` when the output carries
/// no `items` list.
pub fn parse_items(output: &str) -> Option<Vec<CompletionItem>> {
    let parsed: CompilerOutput = parse_json(output)
        .inspect_err(|e| warn!("Failed to decode completion output: {}", e))
        .ok()?;

    let items = parsed.items?;
    Some(
        items
            .into_iter()
            .filter_map(|item| {
                serde_json::from_value(item)
                    .inspect_err(|e| warn!("Skipping malformed completion item: {}", e))
                    .ok()
            })
            .collect(),
    )
}

/// Plain text of an item's documentation, without code fences.
pub fn documentation_text(documentation: &Documentation) -> String {
    let text = match documentation {
        Documentation::String(text) => text.as_str(),
        Documentation::MarkupContent(markup) => markup.value.as_str(),
    };
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn find_signature(
    items: &[CompletionItem],
    token: &str,
    key: impl Fn(&CompletionItem) -> Option<&str>,
) -> Option<SignatureHelp> {
    for item in items {
        let Some(documentation) = &item.documentation else {
            continue;
        };
        let Some(name) = key(item).filter(|name| !name.is_empty()) else {
            continue;
        };
        if !token.starts_with(name) {
            continue;
        }
        let rest = &token[name.len()..];
        if !(rest.is_empty() || rest.starts_with('(') || rest.starts_with('.')) {
            continue;
        }

        let text = documentation_text(documentation);
        let signatures: Vec<SignatureInformation> = text
            .split('\n')
            .map(|line| SignatureInformation {
                label: line.to_string(),
                documentation: None,
                parameters: None,
                active_parameter: None,
            })
            .collect();
        if signatures.is_empty() {
            return None;
        }
        return Some(SignatureHelp {
            signatures,
            active_signature: Some(0),
            active_parameter: Some(0),
        });
    }
    None
}

/// Name in front of the innermost open call before `position`.
fn call_token(text: &str, position: Position) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let offset = offset_at(&chars, position);
    if offset == 0 {
        return None;
    }

    let mut idx = offset - 1;
    loop {
        match chars[idx] {
            '(' => break,
            ':' if chars.get(idx + 1) == Some(&':') => break,
            ')' => return None,
            _ => {}
        }
        if idx == 0 {
            return None;
        }
        idx -= 1;
    }

    let mut start = idx;
    while start > 0 && !is_token_boundary(chars[start - 1]) {
        start -= 1;
    }
    let token: String = chars[start..idx].iter().collect();
    (!token.is_empty()).then_some(token)
}

fn is_token_boundary(c: char) -> bool {
    matches!(c, '\t' | '\r' | ' ' | '\n' | '.' | '{' | ')' | ',' | '(')
}

/// Character offset of `position`, clamped to the text. Columns count chars.
fn offset_at(chars: &[char], position: Position) -> usize {
    let mut line = 0u32;
    let mut line_start = 0usize;
    for (i, c) in chars.iter().enumerate() {
        if line == position.line {
            break;
        }
        if *c == '\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    if line < position.line {
        return chars.len();
    }

    let line_end = chars[line_start..]
        .iter()
        .position(|c| *c == '\n')
        .map_or(chars.len(), |end| line_start + end);
    (line_start + position.character as usize).min(line_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tower_lsp::lsp_types::{MarkupContent, MarkupKind};

    fn item(label: &str, filter: &str, doc: &str) -> CompletionItem {
        CompletionItem {
            label: label.to_string(),
            filter_text: Some(filter.to_string()),
            documentation: Some(Documentation::MarkupContent(MarkupContent {
                kind: MarkupKind::Markdown,
                value: doc.to_string(),
            })),
            ..Default::default()
        }
    }

    fn cache() -> CompletionCache {
        let cache = CompletionCache::new();
        cache.replace(vec![
            item(
                "sqrt",
                "sqrt",
                "```dascript\ndef sqrt(x: float): float\ndef sqrt(x: double): double\n```",
            ),
            item("print", "print", "def print(text: string)"),
            item("array", "array", "builtin array type"),
        ]);
        cache
    }

    #[test]
    fn parse_items_reads_items_and_skips_malformed_ones() {
        let items =
            parse_items(r#"noise {"items":[{"label":"sqrt"},{"nolabel":true},{"label":"abs"}]}"#)
                .unwrap();

        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["sqrt", "abs"]);
    }

    #[rstest]
    #[case::no_items(r#"{"diagnostics":[]}"#)]
    #[case::not_json("compiler crashed")]
    fn parse_items_returns_none_without_item_list(#[case] output: &str) {
        assert_eq!(parse_items(output), None);
    }

    #[test]
    fn documentation_text_drops_code_fences() {
        let doc = Documentation::String("```\ndef f()\n```".to_string());
        assert_eq!(documentation_text(&doc), "def f()");
    }

    #[test]
    fn function_documentation_matches_exact_filter_text() {
        let cache = cache();

        assert_eq!(
            cache.function_documentation("print"),
            vec!["def print(text: string)"]
        );
        assert!(cache.function_documentation("prin").is_empty());
    }

    #[rstest]
    #[case::exact("array", 1)]
    #[case::first_word("array const", 1)]
    #[case::longer_name("array2", 0)]
    fn type_documentation_matches_leading_word(#[case] ty: &str, #[case] expected: usize) {
        assert_eq!(cache().type_documentation(ty).len(), expected);
    }

    #[test]
    fn signature_help_lists_documentation_lines() {
        let text = "def main()\n    let y = sqrt(";

        let help = cache()
            .signature_help(text, Position::new(1, 17))
            .unwrap();

        let labels: Vec<_> = help.signatures.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["def sqrt(x: float): float", "def sqrt(x: double): double"]
        );
        assert_eq!(help.active_signature, Some(0));
    }

    #[test]
    fn signature_help_finds_call_before_arguments() {
        let text = "print(\"a\", ";

        let help = cache().signature_help(text, Position::new(0, 11)).unwrap();

        assert_eq!(help.signatures[0].label, "def print(text: string)");
    }

    #[test]
    fn signature_help_stops_at_closed_call() {
        let text = "print(\"a\") ";
        assert_eq!(cache().signature_help(text, Position::new(0, 11)), None);
    }

    #[test]
    fn signature_help_requires_completion_items() {
        let cache = CompletionCache::new();
        assert_eq!(cache.signature_help("sqrt(", Position::new(0, 5)), None);
    }

    #[test]
    fn signature_help_falls_back_to_label() {
        let cache = CompletionCache::new();
        let mut entry = item("lerp", "", "def lerp(a, b, t: float)");
        entry.filter_text = None;
        cache.replace(vec![entry]);

        let help = cache.signature_help("lerp(", Position::new(0, 5)).unwrap();

        assert_eq!(help.signatures[0].label, "def lerp(a, b, t: float)");
    }

    #[test]
    fn offset_at_clamps_to_line_end() {
        let chars: Vec<char> = "ab\ncd".chars().collect();

        assert_eq!(offset_at(&chars, Position::new(0, 10)), 2);
        assert_eq!(offset_at(&chars, Position::new(1, 1)), 4);
        assert_eq!(offset_at(&chars, Position::new(5, 0)), 5);
    }
}
