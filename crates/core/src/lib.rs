//! rcl-core: the RCL compiler core.
//!
//! Turns `.rcl` agent definitions into a validated conversation state
//! machine plus a runtime message bundle.
//!
//! # Pipeline
//!
//! - [`lexer::scan`] -- indentation-aware scanner (INDENT / DEDENT / NEWLINE)
//! - [`parser::Parser`] -- error-tolerant parser into a [`syntax::SyntaxTree`]
//! - [`pass1_canonicalize`] -- syntax tree to the typed [`ast::File`]
//! - [`pass2_validate`] -- ordered validator pipeline
//! - [`pass3_extract`] -- agent config, messages and per-flow rules
//! - [`pass4_csm`] -- lowering to an [`rcl_csm::Machine`]
//! - [`pass5_assemble`] -- bundle assembly and interchange JSON
//!
//! [`Compiler`] runs the whole chain, resolving imports through a
//! [`SourceProvider`] and a shared [`ImportCache`].

/// Interchange bundle version (semver).
pub const RCL_BUNDLE_VERSION: &str = "1.0.0";

pub mod ast;
pub mod cancel;
pub mod compile;
pub mod diagnostic;
pub mod imports;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod pass1_canonicalize;
pub mod pass2_validate;
pub mod pass3_extract;
pub mod pass4_csm;
pub mod pass5_assemble;
pub mod source;
pub mod syntax;

// ── Convenience re-exports: key types ────────────────────────────────

pub use ast::File;
pub use cancel::{CancellationToken, Cancelled};
pub use compile::{Analysis, CompileError, CompileOutput, Compiler, SourceInput};
pub use diagnostic::{Diagnostic, Outcome, Position, Range, Severity};
pub use imports::{ImportCache, ImportError, ImportResolver, ParsedDocument};
pub use options::{CompileOptions, TabPolicy};
pub use pass2_validate::{ValidationPipeline, ValidationReport, Validator};
pub use pass3_extract::{AgentConfig, ExtractedFlow, MessageContent, Messages};
pub use pass5_assemble::{AgentBundle, AssembleError, AssembleInput, Bundle};
pub use source::{FileSystemProvider, InMemoryProvider, SourceProvider};

// ── Convenience re-exports: pipeline entry points ────────────────────

pub use compile::compile_many;
pub use lexer::scan;
pub use pass1_canonicalize::{parse_document, to_ast};
pub use pass3_extract::{extract_agent, extract_flows, extract_messages};
pub use pass4_csm::build_machine;
pub use pass5_assemble::assemble;
