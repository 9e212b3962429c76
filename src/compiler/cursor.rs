//! Cursor query results
//!
//! A cursor query asks the compiler what lives at a source position. The
//! answer may hold several overlapping interpretations (an overloaded call,
//! the variable it is stored into, a literal), all of which are kept.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use tower_lsp::lsp_types::Range;

use crate::compiler::normalize::{
    PathResolver, RangeShift, RawRange, fix_optional_range, range_to_string,
};

// Wire records

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawCursorOutput {
    cursor: Option<RawCursor>,
    function: Option<RawFunction>,
    functions: Option<Vec<RawFunction>>,
    call: Option<RawCall>,
    calls: Option<Vec<RawCall>>,
    variable: Option<RawVariable>,
    variables: Option<Vec<RawVariable>>,
    constants: Option<Vec<RawConstant>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCursor {
    uri: Option<String>,
    range: Option<RawRange>,
    tab: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFunction {
    name: Option<String>,
    shortname: Option<String>,
    uri: Option<String>,
    range: Option<RawRange>,
    generic: Option<Box<RawFunction>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCall {
    name: Option<String>,
    uri: Option<String>,
    range: Option<RawRange>,
    function: Option<RawFunction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVariable {
    name: Option<String>,
    uri: Option<String>,
    range: Option<RawRange>,
    #[serde(rename = "type")]
    ty: Option<String>,
    category: Option<String>,
    index: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConstant {
    value: serde_json::Value,
    #[serde(rename = "type")]
    ty: Option<String>,
}

// Model

/// Anchor of a cursor query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub path: PathBuf,
    pub range: Option<Range>,
    /// Distinguishes overlapping scopes that share one source range.
    pub tab: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncData {
    pub name: String,
    /// Name used to look up documentation in the completion list
    pub short_name: Option<String>,
    pub path: PathBuf,
    pub range: Option<Range>,
}

/// A function; `generic` is the template a concrete instance came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionData {
    pub concrete: FuncData,
    pub generic: Option<FuncData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallData {
    pub name: String,
    pub path: PathBuf,
    pub range: Option<Range>,
    /// `None` when the callee could not be resolved.
    pub function: Option<FunctionData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableCategory {
    Local,
    Global,
    BlockArgument,
    FunctionArgument,
    StructureField,
    TupleField,
    VariantField,
    SwizzleField,
    FieldLookup,
    Capture,
    AnnotationField,
    Unknown,
    /// A label this server does not know about, shown verbatim
    Other(String),
}

impl VariableCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
            Self::BlockArgument => "block argument",
            Self::FunctionArgument => "function argument",
            Self::StructureField => "structure field",
            Self::TupleField => "tuple field",
            Self::VariantField => "variant field",
            Self::SwizzleField => "vector swizzle field",
            Self::FieldLookup => "field lookup",
            Self::Capture => "capture",
            Self::AnnotationField => "annotation field",
            Self::Unknown => "unknown",
            Self::Other(label) => label,
        }
    }
}

impl From<&str> for VariableCategory {
    fn from(label: &str) -> Self {
        match label {
            "local" => Self::Local,
            "global" => Self::Global,
            "block argument" => Self::BlockArgument,
            "function argument" => Self::FunctionArgument,
            "structure field" => Self::StructureField,
            "tuple field" => Self::TupleField,
            "variant field" => Self::VariantField,
            "vector swizzle field" => Self::SwizzleField,
            "field lookup" => Self::FieldLookup,
            "capture" | "lambda capture" | "generator capture" => Self::Capture,
            "annotation field" => Self::AnnotationField,
            "unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for VariableCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableData {
    pub name: String,
    pub path: PathBuf,
    pub range: Option<Range>,
    pub ty: Option<String>,
    pub category: Option<VariableCategory>,
    /// Stack slot or similar ordinal, shown in verbose mode only
    pub index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantValue {
    pub value: String,
    pub ty: Option<String>,
}

/// Everything the compiler reported for one cursor position.
///
/// The singular and plural forms of each field in the wire format are merged:
/// the plural list wins when non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorData {
    pub cursor: Option<Cursor>,
    pub functions: Vec<FunctionData>,
    pub calls: Vec<CallData>,
    pub variables: Vec<VariableData>,
    pub constants: Vec<ConstantValue>,
}

impl CursorData {
    pub fn from_raw(raw: RawCursorOutput, resolver: &PathResolver) -> Self {
        let cursor = raw.cursor.map(|c| Cursor {
            path: resolver.resolve(c.uri.as_deref().unwrap_or_default()),
            range: fix_optional_range(c.range.as_ref(), RangeShift::CURSOR),
            tab: c.tab,
        });

        Self {
            cursor,
            functions: merge(raw.function, raw.functions)
                .into_iter()
                .map(|f| function_data(f, resolver))
                .collect(),
            calls: merge(raw.call, raw.calls)
                .into_iter()
                .map(|c| CallData {
                    name: c.name.unwrap_or_default(),
                    path: resolver.resolve(c.uri.as_deref().unwrap_or_default()),
                    range: fix_optional_range(c.range.as_ref(), RangeShift::CURSOR),
                    function: c.function.map(|f| function_data(f, resolver)),
                })
                .collect(),
            variables: merge(raw.variable, raw.variables)
                .into_iter()
                .map(|v| VariableData {
                    name: v.name.unwrap_or_default(),
                    path: resolver.resolve(v.uri.as_deref().unwrap_or_default()),
                    range: fix_optional_range(v.range.as_ref(), RangeShift::CURSOR),
                    ty: v.ty.filter(|t| !t.is_empty()),
                    category: v
                        .category
                        .filter(|c| !c.is_empty())
                        .map(|c| VariableCategory::from(c.as_str())),
                    index: v.index,
                })
                .collect(),
            constants: raw
                .constants
                .unwrap_or_default()
                .into_iter()
                .map(|c| ConstantValue {
                    value: match c.value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    },
                    ty: c.ty.filter(|t| !t.is_empty()),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
            && self.calls.is_empty()
            && self.variables.is_empty()
            && self.constants.is_empty()
    }
}

fn merge<T>(single: Option<T>, many: Option<Vec<T>>) -> Vec<T> {
    match many {
        Some(many) if !many.is_empty() => many,
        _ => single.into_iter().collect(),
    }
}

fn func_data(raw: &RawFunction, resolver: &PathResolver) -> FuncData {
    FuncData {
        name: raw.name.clone().unwrap_or_default(),
        short_name: raw.shortname.clone().filter(|s| !s.is_empty()),
        path: resolver.resolve(raw.uri.as_deref().unwrap_or_default()),
        range: fix_optional_range(raw.range.as_ref(), RangeShift::CURSOR),
    }
}

fn function_data(raw: RawFunction, resolver: &PathResolver) -> FunctionData {
    let generic = raw.generic.as_deref().map(|g| func_data(g, resolver));
    let concrete = func_data(&raw, resolver);

    // A record that only carries its generic stands for that generic.
    let concrete = match &generic {
        Some(generic) if concrete.is_blank() => generic.clone(),
        _ => concrete,
    };

    FunctionData { concrete, generic }
}

// Rendering

impl FuncData {
    fn is_blank(&self) -> bool {
        self.name.is_empty() && self.path.as_os_str().is_empty() && self.range.is_none()
    }

    pub fn render(&self, verbose: bool) -> String {
        let mut res = format!("def {}", self.name);
        if verbose {
            push_location(&mut res, &self.path, self.range.as_ref());
        }
        res
    }

    /// Documentation key for this function.
    pub fn lookup_name(&self) -> &str {
        self.short_name.as_deref().unwrap_or_default()
    }
}

impl FunctionData {
    /// Documentation key, preferring the generic's short name.
    pub fn lookup_name(&self) -> &str {
        self.generic
            .as_ref()
            .and_then(|g| g.short_name.as_deref())
            .unwrap_or_else(|| self.concrete.lookup_name())
    }
}

impl CallData {
    /// Text for a call whose callee is unknown.
    pub fn render(&self, verbose: bool) -> String {
        let mut res = format!("{} // call", self.name);
        if verbose {
            push_location(&mut res, &self.path, self.range.as_ref());
        }
        res
    }
}

impl VariableData {
    pub fn render(&self, verbose: bool) -> String {
        let mut res = self.name.clone();
        if let Some(ty) = &self.ty {
            res.push_str(": ");
            res.push_str(ty);
        }
        match &self.category {
            Some(category) => {
                res.push_str(" // ");
                res.push_str(category.as_str());
            }
            None => res.push_str(" // variable"),
        }
        if !verbose {
            return res;
        }
        if let Some(index) = self.index.filter(|i| *i != 0) {
            res.push_str(&format!(" @{}", index));
        }
        push_location(&mut res, &self.path, self.range.as_ref());
        res
    }
}

impl ConstantValue {
    pub fn render(&self) -> String {
        match &self.ty {
            Some(ty) => format!("{}: {} // constant", self.value, ty),
            None => format!("{} // constant", self.value),
        }
    }
}

/// Appends the location of a rendered item. An all-zero range stands for
/// "no location" and is left out.
fn push_location(res: &mut String, path: &std::path::Path, range: Option<&Range>) {
    let has_path = !path.as_os_str().is_empty();
    if has_path {
        res.push_str(&format!("\n// {}", path.display()));
    }
    if let Some(range) = range.filter(|r| **r != Range::default()) {
        res.push_str(if has_path { " " } else { "\n// " });
        res.push_str(&range_to_string(range));
    }
}
