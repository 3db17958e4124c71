//! Diagnostics shared by every compiler stage.
//!
//! Stages never fail on bad input. They return an [`Outcome`] carrying a
//! best-effort value plus the diagnostics found while producing it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in a source document. `line` and `column` are 0-based, the
/// column counts chars, `offset` counts bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl Position {
    pub fn new(line: u32, column: u32, offset: usize) -> Self {
        Position {
            line,
            column,
            offset,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Range { start, end }
    }

    /// Zero-width range at `pos`.
    pub fn point(pos: Position) -> Self {
        Range {
            start: pos,
            end: pos,
        }
    }

    /// Smallest range covering both `self` and `other`.
    pub fn cover(self, other: Range) -> Range {
        Range {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Range {
    /// 1-based `line:column`, the form editors and terminals expect.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start.line + 1, self.start.column + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Hint => "hint",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedInformation {
    pub message: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub range: Range,
    /// Document the diagnostic belongs to when it is not the one being
    /// compiled (e.g. an imported file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(
        default,
        rename = "relatedInformation",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub related: Vec<RelatedInformation>,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: &str, message: impl Into<String>, range: Range) -> Self {
        Diagnostic {
            severity,
            message: message.into(),
            code: Some(code.to_owned()),
            range,
            source: None,
            related: Vec::new(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>, range: Range) -> Self {
        Diagnostic::new(Severity::Error, code, message, range)
    }

    pub fn warning(code: &str, message: impl Into<String>, range: Range) -> Self {
        Diagnostic::new(Severity::Warning, code, message, range)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_related(mut self, message: impl Into<String>, range: Range) -> Self {
        self.related.push(RelatedInformation {
            message: message.into(),
            range,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

/// Stable diagnostic codes.
pub mod codes {
    // lexical
    pub const INCONSISTENT_INDENTATION: &str = "inconsistent-indentation";
    pub const TAB_INDENTATION: &str = "tab-indentation";
    pub const MIXED_INDENTATION: &str = "mixed-indentation";
    pub const UNTERMINATED_STRING: &str = "unterminated-string";
    pub const UNEXPECTED_CHARACTER: &str = "unexpected-character";
    // syntax
    pub const UNEXPECTED_TOKEN: &str = "unexpected-token";
    pub const UNEXPECTED_INDENT: &str = "unexpected-indent";
    pub const NESTING_TOO_DEEP: &str = "nesting-too-deep";
    // structural
    pub const MISSING_AGENT: &str = "missing-agent";
    pub const DUPLICATE_AGENT: &str = "duplicate-agent";
    pub const MISSING_DISPLAY_NAME: &str = "missing-display-name";
    pub const MISSING_FLOW_START: &str = "missing-flow-start";
    pub const MISSING_FLOWS: &str = "missing-flows";
    pub const EMPTY_FLOW: &str = "empty-flow";
    pub const SYNTAX_ERROR_NODE: &str = "syntax-error-node";
    // semantic
    pub const DUPLICATE_FLOW: &str = "duplicate-flow";
    pub const DUPLICATE_STATE: &str = "duplicate-state";
    pub const DUPLICATE_MESSAGE: &str = "duplicate-message";
    pub const DUPLICATE_DEFAULT: &str = "duplicate-default";
    pub const UNRESOLVED_FLOW: &str = "unresolved-flow";
    pub const UNRESOLVED_SPREAD: &str = "unresolved-spread";
    pub const UNREFERENCED_STATE: &str = "unreferenced-state";
    // extraction
    pub const INVALID_MESSAGE: &str = "invalid-message";
    // construction
    pub const UNRESOLVED_TARGET: &str = "unresolved-target";
    pub const MISSING_START_STATE: &str = "missing-start-state";
    pub const UNREACHABLE_STATE: &str = "unreachable-state";
    pub const MISSING_INITIAL_FLOW: &str = "missing-initial-flow";
    // imports
    pub const IMPORT_CYCLE: &str = "import-cycle";
    pub const IMPORT_NOT_FOUND: &str = "import-not-found";
}

/// A stage result: the value produced plus everything worth reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, diagnostics: Vec<Diagnostic>) -> Self {
        Outcome { value, diagnostics }
    }

    pub fn ok(value: T) -> Self {
        Outcome {
            value,
            diagnostics: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            diagnostics: self.diagnostics,
        }
    }

    pub fn into_parts(self) -> (T, Vec<Diagnostic>) {
        (self.value, self.diagnostics)
    }
}

/// Drop repeated reports of the same problem, keeping first-seen order.
/// Two diagnostics are the same problem when code, range and source agree.
pub fn dedup(diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut seen = std::collections::HashSet::new();
    diagnostics
        .into_iter()
        .filter(|d| seen.insert((d.code.clone(), d.range, d.source.clone())))
        .collect()
}
