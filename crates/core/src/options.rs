//! Compiler configuration.

use serde::{Deserialize, Serialize};

/// Default cap on syntax errors before the parser stops recovering.
pub const DEFAULT_MAX_ERRORS: usize = 100;
/// Default nesting limit for sections, blocks and collection literals.
pub const DEFAULT_MAX_DEPTH: usize = 64;
pub const DEFAULT_TAB_WIDTH: usize = 4;

/// How tabs inside an indentation run are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabPolicy {
    /// Any tab in indentation is a lexical error.
    #[default]
    Reject,
    /// Tabs expand to `tab_width` columns; mixing tabs and spaces in one run
    /// is still an error.
    Normalize,
}

/// Options for one compilation. Deserializes from the `[compiler]` table of
/// `rcl.toml`; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    /// Stop the validation pipeline after the first validator that reports
    /// an error.
    pub strict: bool,
    pub tabs: TabPolicy,
    pub tab_width: usize,
    pub max_errors: usize,
    pub max_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            strict: false,
            tabs: TabPolicy::Reject,
            tab_width: DEFAULT_TAB_WIDTH,
            max_errors: DEFAULT_MAX_ERRORS,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl CompileOptions {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            tabs: self.tabs,
            tab_width: self.tab_width.max(1),
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            max_errors: self.max_errors.max(1),
            max_depth: self.max_depth.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub tabs: TabPolicy,
    pub tab_width: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        CompileOptions::default().scan_options()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub max_errors: usize,
    pub max_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        CompileOptions::default().parse_options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() {
        let opts: CompileOptions =
            serde_json::from_value(serde_json::json!({ "strict": true, "tabs": "normalize" }))
                .unwrap();
        assert!(opts.strict);
        assert_eq!(opts.tabs, TabPolicy::Normalize);
        assert_eq!(opts.tab_width, DEFAULT_TAB_WIDTH);
        assert_eq!(opts.max_errors, DEFAULT_MAX_ERRORS);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let res: Result<CompileOptions, _> =
            serde_json::from_value(serde_json::json!({ "strictness": true }));
        assert!(res.is_err());
    }
}
