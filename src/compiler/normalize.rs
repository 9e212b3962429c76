//! Conversion of compiler coordinates and paths into editor coordinates and URIs

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tower_lsp::lsp_types::{Position, Range, Url};
use tracing::warn;

/// Position as reported by the compiler; may be negative or 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawPosition {
    pub line: i64,
    pub character: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawRange {
    pub start: RawPosition,
    pub end: RawPosition,
}

impl RawRange {
    pub fn new(start: (i64, i64), end: (i64, i64)) -> Self {
        Self {
            start: RawPosition {
                line: start.0,
                character: start.1,
            },
            end: RawPosition {
                line: end.0,
                character: end.1,
            },
        }
    }
}

/// Offsets applied when converting a compiler range.
///
/// Compiler end lines point one past the last covered line, so the end line
/// always loses one extra line on top of `line_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeShift {
    pub line_offset: i64,
    pub end_offset: i64,
}

impl RangeShift {
    /// Cursor query records use 1-based lines.
    pub const CURSOR: Self = Self {
        line_offset: -1,
        end_offset: 0,
    };
    /// Plain diagnostics use 0-based lines.
    pub const DIAGNOSTIC: Self = Self {
        line_offset: 0,
        end_offset: 0,
    };
    /// Diagnostics carrying a `tab` field use 1-based lines and an end
    /// character that excludes the last column.
    pub const TABBED_DIAGNOSTIC: Self = Self {
        line_offset: -1,
        end_offset: 1,
    };
}

/// Converts a compiler range into a non-negative editor range with
/// `start <= end`.
pub fn fix_range(raw: &RawRange, shift: RangeShift) -> Range {
    let start_line = raw.start.line.saturating_add(shift.line_offset).max(0);
    let start_character = raw.start.character.max(0);
    let end_line = raw.end.line.saturating_add(shift.line_offset).max(0);
    let mut end_character = raw.end.character.saturating_add(shift.end_offset).max(0);

    let end_line = start_line.max(end_line - 1);
    if start_line == end_line {
        end_character = end_character.max(start_character);
    }

    Range::new(
        Position::new(clamp(start_line), clamp(start_character)),
        Position::new(clamp(end_line), clamp(end_character)),
    )
}

/// Like [`fix_range`], keeping "no location" (`None`) apart from a real range
/// at the origin.
pub fn fix_optional_range(raw: Option<&RawRange>, shift: RangeShift) -> Option<Range> {
    raw.map(|raw| fix_range(raw, shift))
}

fn clamp(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// `l:c-l:c`, as shown in verbose hovers.
pub fn range_to_string(range: &Range) -> String {
    format!(
        "{}:{}-{}:{}",
        range.start.line, range.start.character, range.end.line, range.end.character
    )
}

/// Turns a `file://` URI into a local path string.
///
/// Non-file URIs are returned decoded but otherwise untouched. A leading
/// slash before a drive letter (`/C:/...`) is dropped.
pub fn uri_to_file(uri: &str) -> String {
    let decoded = urlencoding::decode(uri)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| uri.to_string());

    let Some(rest) = decoded.strip_prefix("file://") else {
        return decoded;
    };

    if has_drive_prefix(rest) {
        rest[1..].to_string()
    } else {
        rest.to_string()
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0] == b'/'
        && (bytes[1].is_ascii_alphanumeric() || bytes[1] == b'_')
        && bytes[2] == b':'
}

/// Resolves compiler-reported paths against project roots and workspace
/// folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathResolver {
    roots: Vec<PathBuf>,
}

impl PathResolver {
    /// Project roots are tried before workspace folders.
    pub fn new(project_roots: &[PathBuf], workspace_folders: &[PathBuf]) -> Self {
        Self {
            roots: project_roots
                .iter()
                .chain(workspace_folders)
                .cloned()
                .collect(),
        }
    }

    /// Returns `path` unchanged when absolute, otherwise the first existing
    /// candidate under a root, otherwise `path` unchanged.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path.trim());
        if path.as_os_str().is_empty() || path.is_absolute() {
            return path.to_path_buf();
        }

        self.roots
            .iter()
            .map(|root| normalize_path(&root.join(path)))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| path.to_path_buf())
    }

    /// URI under which diagnostics for `path` are published.
    ///
    /// Paths that stay relative after resolution are anchored at the current
    /// directory, so the result always names an absolute file.
    pub fn to_url(&self, path: &str) -> Option<Url> {
        let resolved = self.resolve(path);
        if resolved.as_os_str().is_empty() {
            return None;
        }

        let absolute = if resolved.is_absolute() {
            normalize_path(&resolved)
        } else {
            std::path::absolute(&resolved)
                .map(|p| normalize_path(&p))
                .ok()?
        };

        Url::from_file_path(&absolute)
            .inspect_err(|_| warn!("Cannot convert {:?} to a file URI", absolute))
            .ok()
    }
}

/// Lexically folds `.` and `..` components.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn range(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
        Range::new(Position::new(sl, sc), Position::new(el, ec))
    }

    #[rstest]
    #[case::single_line(RawRange::new((3, 4), (4, 9)), RangeShift::CURSOR, range(2, 4, 2, 9))]
    #[case::multi_line(RawRange::new((3, 4), (7, 1)), RangeShift::CURSOR, range(2, 4, 5, 1))]
    #[case::end_before_start(RawRange::new((5, 8), (6, 2)), RangeShift::CURSOR, range(4, 8, 4, 8))]
    #[case::negative(RawRange::new((0, -3), (-1, -1)), RangeShift::CURSOR, range(0, 0, 0, 0))]
    #[case::plain_diagnostic(RawRange::new((2, 1), (3, 5)), RangeShift::DIAGNOSTIC, range(2, 1, 2, 5))]
    #[case::tabbed_diagnostic(RawRange::new((2, 1), (3, 5)), RangeShift::TABBED_DIAGNOSTIC, range(1, 1, 1, 6))]
    #[case::huge_values(RawRange::new((i64::MAX, i64::MAX), (i64::MAX, i64::MAX)), RangeShift::TABBED_DIAGNOSTIC, range(u32::MAX, u32::MAX, u32::MAX, u32::MAX))]
    #[case::extreme_negative_line(RawRange::new((i64::MIN, 0), (i64::MIN, i64::MAX)), RangeShift::TABBED_DIAGNOSTIC, range(0, 0, 0, u32::MAX))]
    fn fix_range_converts_compiler_coordinates(
        #[case] raw: RawRange,
        #[case] shift: RangeShift,
        #[case] expected: Range,
    ) {
        assert_eq!(fix_range(&raw, shift), expected);
    }

    #[test]
    fn fix_range_is_deterministic() {
        let raw = RawRange::new((12, 3), (14, 0));
        assert_eq!(
            fix_range(&raw, RangeShift::CURSOR),
            fix_range(&raw, RangeShift::CURSOR)
        );
    }

    #[test]
    fn fix_optional_range_keeps_missing_location_apart_from_origin() {
        assert_eq!(fix_optional_range(None, RangeShift::CURSOR), None);
        assert_eq!(
            fix_optional_range(Some(&RawRange::new((1, 0), (2, 0))), RangeShift::CURSOR),
            Some(range(0, 0, 0, 0))
        );
    }

    #[rstest]
    #[case::unix("file:///home/user/game/main.das", "/home/user/game/main.das")]
    #[case::encoded("file:///home/user/my%20game/main.das", "/home/user/my game/main.das")]
    #[case::windows_drive("file:///c%3A/work/main.das", "c:/work/main.das")]
    #[case::not_a_file("untitled:Untitled-1", "untitled:Untitled-1")]
    fn uri_to_file_strips_scheme(#[case] uri: &str, #[case] expected: &str) {
        assert_eq!(uri_to_file(uri), expected);
    }

    #[test]
    fn resolve_returns_absolute_path_unchanged() {
        let resolver = PathResolver::new(&[PathBuf::from("/nowhere")], &[]);
        assert_eq!(
            resolver.resolve("/abs/path.das"),
            PathBuf::from("/abs/path.das")
        );
    }

    #[test]
    fn resolve_uses_the_root_containing_the_file() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::create_dir_all(second.path().join("lib")).unwrap();
        std::fs::write(second.path().join("lib/math.das"), "").unwrap();

        let resolver = PathResolver::new(
            &[first.path().to_path_buf()],
            &[second.path().to_path_buf()],
        );

        assert_eq!(
            resolver.resolve("lib/math.das"),
            second.path().join("lib/math.das")
        );
    }

    #[test]
    fn resolve_prefers_project_roots_over_workspace_folders() {
        let project = TempDir::new().unwrap();
        let folder = TempDir::new().unwrap();
        std::fs::write(project.path().join("a.das"), "").unwrap();
        std::fs::write(folder.path().join("a.das"), "").unwrap();

        let resolver = PathResolver::new(
            &[project.path().to_path_buf()],
            &[folder.path().to_path_buf()],
        );

        assert_eq!(resolver.resolve("a.das"), project.path().join("a.das"));
    }

    #[test]
    fn resolve_returns_unknown_relative_path_unchanged() {
        let root = TempDir::new().unwrap();
        let resolver = PathResolver::new(&[root.path().to_path_buf()], &[]);

        assert_eq!(
            resolver.resolve(" missing/file.das "),
            PathBuf::from("missing/file.das")
        );
    }

    #[test]
    fn to_url_encodes_absolute_path() {
        let resolver = PathResolver::default();

        let url = resolver.to_url("/work/my game/main.das").unwrap();

        assert_eq!(url.as_str(), "file:///work/my%20game/main.das");
    }

    #[test]
    fn to_url_never_yields_relative_location() {
        let resolver = PathResolver::default();

        let url = resolver.to_url("does/not/exist.das").unwrap();

        assert!(url.path().ends_with("/does/not/exist.das"));
        assert!(url.to_file_path().unwrap().is_absolute());
    }

    #[test]
    fn to_url_rejects_empty_path() {
        assert_eq!(PathResolver::default().to_url("  "), None);
    }
}
