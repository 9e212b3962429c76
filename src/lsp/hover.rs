//! Hover and go-to-definition answers built from cursor query results

use tower_lsp::lsp_types::{Hover, HoverContents, LanguageString, Location, MarkedString, Range};

use crate::compiler::PathResolver;
use crate::compiler::cursor::{CallData, CursorData, FuncData, FunctionData, VariableData};
use crate::lsp::completion::CompletionCache;

/// Language tag of hover code blocks.
const HOVER_LANGUAGE: &str = "dascript";

/// Collects hover entries. Outside verbose mode repeated entries are shown
/// once, at their first position.
struct HoverBuilder<'a> {
    verbose: bool,
    completion: &'a CompletionCache,
    entries: Vec<String>,
    range: Option<Range>,
}

impl HoverBuilder<'_> {
    fn add(&mut self, value: String) {
        if self.verbose || !self.entries.contains(&value) {
            self.entries.push(value);
        }
    }

    fn describe_function(&mut self, data: &FunctionData, include_generic: bool) {
        if let Some(generic) = data.generic.as_ref().filter(|_| include_generic) {
            self.add(generic.render(self.verbose));
        }
        self.add(data.concrete.render(self.verbose));
    }

    fn describe_call(&mut self, data: &CallData, include_generic: bool, with_docs: bool) {
        match &data.function {
            Some(function) => {
                self.describe_function(function, include_generic);
                if with_docs {
                    for doc in self.completion.function_documentation(function.lookup_name()) {
                        self.add(doc);
                    }
                }
            }
            None => self.add(data.render(self.verbose)),
        }
        self.range = None;
    }

    fn describe_variable(&mut self, data: &VariableData, with_docs: bool) {
        self.add(data.render(self.verbose));
        self.range = None;
        let Some(ty) = data.ty.as_ref().filter(|_| with_docs) else {
            return;
        };
        for doc in self.completion.type_documentation(ty) {
            self.add(doc);
        }
    }

    fn describe(&mut self, data: &CursorData) {
        if data.calls.is_empty() && data.variables.is_empty() && data.constants.is_empty() {
            let single = data.functions.len() == 1;
            for function in &data.functions {
                self.describe_function(function, single);
            }
        }

        if self.verbose || data.variables.is_empty() {
            let single = data.calls.len() == 1;
            let last = data.calls.len().saturating_sub(1);
            for (idx, call) in data.calls.iter().enumerate() {
                self.describe_call(call, single, idx == last);
            }
        }

        let last = data.variables.len().saturating_sub(1);
        for (idx, variable) in data.variables.iter().enumerate() {
            self.describe_variable(variable, idx == last);
        }

        for constant in &data.constants {
            self.add(constant.render());
            self.range = None;
        }
    }
}

/// Builds the hover for a cursor query result.
///
/// The hover range is the cursor's own range, dropped once a call, variable
/// or constant is shown. An empty verbose hover shows the range as JSON.
pub fn hover(
    data: Option<&CursorData>,
    verbose: bool,
    completion: &CompletionCache,
) -> Option<Hover> {
    let mut builder = HoverBuilder {
        verbose,
        completion,
        entries: Vec::new(),
        range: data.and_then(|d| d.cursor.as_ref()).and_then(|c| c.range),
    };
    if let Some(data) = data {
        builder.describe(data);
    }

    if builder.entries.is_empty() {
        if !verbose {
            return None;
        }
        return Some(Hover {
            contents: HoverContents::Scalar(MarkedString::LanguageString(LanguageString {
                language: "json".to_string(),
                value: serde_json::to_string(&builder.range).unwrap_or_default(),
            })),
            range: None,
        });
    }

    let contents = builder
        .entries
        .into_iter()
        .map(|value| {
            MarkedString::LanguageString(LanguageString {
                language: HOVER_LANGUAGE.to_string(),
                value,
            })
        })
        .collect();
    Some(Hover {
        contents: HoverContents::Array(contents),
        range: builder.range,
    })
}

/// Where go-to-definition leads for a cursor query result.
///
/// A variable wins over a call, a call over a plain function. For functions
/// the concrete instance is the target; its generic is used only when the
/// instance has no location.
pub fn definition(data: &CursorData, resolver: &PathResolver) -> Option<Location> {
    let (path, range) = if let Some(variable) = data.variables.first() {
        (variable.path.as_path(), variable.range)
    } else if let Some(function) = data.calls.first().and_then(|c| c.function.as_ref()) {
        function_target(function)
    } else if let Some(function) = data.functions.first() {
        function_target(function)
    } else {
        return None;
    };

    let path = path.to_str()?;
    if path.is_empty() {
        return None;
    }
    let uri = resolver.to_url(path)?;
    Some(Location {
        uri,
        range: range.unwrap_or_default(),
    })
}

fn function_target(function: &FunctionData) -> (&std::path::Path, Option<Range>) {
    let target: &FuncData = match &function.generic {
        Some(generic) if function.concrete.path.as_os_str().is_empty() => generic,
        _ => &function.concrete,
    };
    (target.path.as_path(), target.range)
}
