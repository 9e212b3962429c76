//! Compiler output protocol layer
//! - runner.rs: builds compiler command lines and captures their output
//! - json.rs: recovers JSON payloads from noisy output
//! - normalize.rs: range, path and URI conversion
//! - cursor.rs: cursor query results and their hover text
//! - diagnostics.rs: JSON diagnostics, with text_log.rs as the fallback
//! - types.rs: shared output types

pub mod cursor;
pub mod diagnostics;
pub mod error;
pub mod json;
pub mod normalize;
pub mod runner;
pub mod text_log;
pub mod types;

pub use cursor::{CursorData, RawCursorOutput};
pub use diagnostics::collect_diagnostics;
pub use json::parse_json;
pub use normalize::PathResolver;
pub use runner::{Invocation, ProcessRunner, Runner};
pub use types::{CompilerOutput, DiagnosticMap};
