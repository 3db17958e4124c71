//! End-to-end compilation of one document, or many in parallel.
//!
//! scan → parse → canonicalize → imports → validate → extract → build →
//! assemble. Every stage runs even when an earlier one reported errors, so
//! callers always receive the best partial result with the full diagnostic
//! list; only cancellation and an unreadable root document are Rust errors.

use crate::ast::File;
use crate::cancel::{CancellationToken, Cancelled};
use crate::diagnostic::{dedup, Diagnostic};
use crate::imports::{ImportCache, ImportResolver};
use crate::options::CompileOptions;
use crate::pass1_canonicalize::parse_document;
use crate::pass2_validate::{ValidationContext, ValidationPipeline};
use crate::pass3_extract::{extract_agent, extract_flows, extract_messages, AgentConfig, Messages};
use crate::pass4_csm::build_machine_cancellable;
use crate::pass5_assemble::{assemble, AssembleInput, Bundle};
use crate::source::{FileSystemProvider, SourceProvider};
use rcl_csm::Machine;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    /// In-memory text. `uri` names it in diagnostics; imports resolve
    /// against its parent directory.
    Text { uri: String, text: String },
    Path(PathBuf),
}

impl SourceInput {
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        SourceInput::Text {
            uri: uri.into(),
            text: text.into(),
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        SourceInput::Path(path.into())
    }

    pub fn uri(&self) -> String {
        match self {
            SourceInput::Text { uri, .. } => uri.clone(),
            SourceInput::Path(p) => p.display().to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of the editor path: AST plus diagnostics up to validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub ast: File,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileOutput {
    pub ast: File,
    pub diagnostics: Vec<Diagnostic>,
    pub agent: Option<AgentConfig>,
    pub messages: Messages,
    pub machine: Option<Machine>,
    /// Present when both an agent and a machine were produced.
    pub bundle: Option<Bundle>,
}

impl CompileOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

pub struct Compiler {
    options: CompileOptions,
    provider: Arc<dyn SourceProvider>,
    cache: ImportCache,
    pipeline: ValidationPipeline,
}

struct Front {
    ast: File,
    imports: Vec<Arc<File>>,
    diagnostics: Vec<Diagnostic>,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Compiler {
            options,
            provider: Arc::new(FileSystemProvider),
            cache: ImportCache::new(),
            pipeline: ValidationPipeline::with_defaults(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Share parsed imports with other compilers.
    pub fn with_cache(mut self, cache: ImportCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_pipeline(mut self, pipeline: ValidationPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn cache(&self) -> &ImportCache {
        &self.cache
    }

    /// Parse and validate only. Never fails on bad input.
    pub fn analyze(
        &self,
        input: &SourceInput,
        cancel: &CancellationToken,
    ) -> Result<Analysis, CompileError> {
        let front = self.front(input, cancel)?;
        Ok(Analysis {
            ast: front.ast,
            diagnostics: dedup(front.diagnostics),
        })
    }

    pub fn compile(
        &self,
        input: &SourceInput,
        cancel: &CancellationToken,
    ) -> Result<CompileOutput, CompileError> {
        let uri = input.uri();
        let Front {
            ast,
            imports,
            mut diagnostics,
        } = self.front(input, cancel)?;

        let (agent, found) = extract_agent(&ast, &imports).into_parts();
        diagnostics.extend(found);
        let (messages, found) = extract_messages(&ast, &imports, cancel)?.into_parts();
        diagnostics.extend(found);
        let (flows, found) = extract_flows(&ast, &imports, &messages, cancel)?.into_parts();
        diagnostics.extend(found);

        let machine_id = agent
            .as_ref()
            .map(|a| a.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| stem(&uri));
        let initial = agent.as_ref().and_then(|a| a.start_flow.as_deref());
        let (machine, found) =
            build_machine_cancellable(&flows, initial, &machine_id, cancel)?.into_parts();
        diagnostics.extend(found);

        let bundle = match assemble(AssembleInput {
            agent: agent.clone(),
            messages: Some(messages.clone()),
            machine: machine.clone(),
        }) {
            Ok(bundle) => Some(bundle),
            Err(e) => {
                debug!(uri = %uri, error = %e, "no bundle");
                None
            }
        };

        let diagnostics = dedup(diagnostics);
        debug!(
            uri = %uri,
            diagnostics = diagnostics.len(),
            bundle = bundle.is_some(),
            "compiled"
        );
        Ok(CompileOutput {
            ast,
            diagnostics,
            agent,
            messages,
            machine,
            bundle,
        })
    }

    /// Compile every input on a bounded set of scoped worker threads sharing
    /// this compiler's import cache. Results keep input order.
    pub fn compile_many(
        &self,
        inputs: &[SourceInput],
        cancel: &CancellationToken,
    ) -> Vec<Result<CompileOutput, CompileError>> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(inputs.len());
        let next = AtomicUsize::new(0);
        let done: Mutex<Vec<(usize, Result<CompileOutput, CompileError>)>> =
            Mutex::new(Vec::with_capacity(inputs.len()));

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(input) = inputs.get(i) else {
                        break;
                    };
                    let result = self.compile(input, cancel);
                    done.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push((i, result));
                });
            }
        });

        let mut done = done
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        done.sort_by_key(|(i, _)| *i);
        done.into_iter().map(|(_, r)| r).collect()
    }

    fn front(&self, input: &SourceInput, cancel: &CancellationToken) -> Result<Front, CompileError> {
        let (text, root_path, base) = match input {
            SourceInput::Text { uri, text } => {
                let base = Path::new(uri).parent().map(Path::to_path_buf).unwrap_or_default();
                (text.clone(), None, base)
            }
            SourceInput::Path(path) => {
                let text = self
                    .provider
                    .read_source(path)
                    .map_err(|source| CompileError::Io {
                        path: path.clone(),
                        source,
                    })?;
                let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
                (text, Some(path.as_path()), base)
            }
        };

        let (ast, mut diagnostics) = parse_document(&text, &self.options, cancel)?.into_parts();
        debug!(uri = %input.uri(), sections = ast.sections.len(), "parsed");

        let resolved = ImportResolver::new(self.provider.as_ref(), &self.cache, &self.options, cancel)
            .resolve(&ast, root_path, &base)?;
        for doc in &resolved.documents {
            let source = doc.path.display().to_string();
            diagnostics.extend(
                doc.diagnostics
                    .iter()
                    .map(|d| d.clone().with_source(source.clone())),
            );
        }
        diagnostics.extend(resolved.diagnostics.iter().cloned());

        let imports = resolved.files();
        let ctx = ValidationContext::new(imports.clone(), cancel.clone());
        let report = self.pipeline.run(&ast, &ctx, self.options.strict)?;
        diagnostics.extend(report.diagnostics);

        Ok(Front {
            ast,
            imports,
            diagnostics,
        })
    }
}

/// Compile many documents with default collaborators and one shared cache.
pub fn compile_many(
    inputs: &[SourceInput],
    options: &CompileOptions,
) -> Vec<Result<CompileOutput, CompileError>> {
    Compiler::new(options.clone()).compile_many(inputs, &CancellationToken::new())
}

fn stem(uri: &str) -> String {
    Path::new(uri)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "machine".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::codes;
    use crate::source::InMemoryProvider;

    const COFFEE: &str = "\
import Shared/Menu

agent Coffee
  displayName: \"Quick Coffee\"
  start: OrderFlow
  flow OrderFlow
    start: Welcome
    on Welcome
      match @reply.text
        \"Order\" -> Done
        \"Menu\" -> start MenuFlow
          on :end -> Welcome
        :default -> Welcome
    on Done
      -> :end
  messages Messages
    text Welcome \"Hello!\"
";

    const MENU: &str = "flow MenuFlow\n  start: Show\n  on Show\n    -> :end\n";

    fn compiler() -> Compiler {
        let provider = InMemoryProvider::default().with_file("/app/Shared/Menu.rcl", MENU);
        Compiler::new(CompileOptions::default()).with_provider(Arc::new(provider))
    }

    #[test]
    fn compiles_with_imported_flow() {
        let out = compiler()
            .compile(&SourceInput::text("/app/coffee.rcl", COFFEE), &CancellationToken::new())
            .unwrap();
        assert!(!out.has_errors(), "{:?}", out.diagnostics);
        let machine = out.machine.as_ref().unwrap();
        assert_eq!(machine.initial_flow().as_str(), "OrderFlow");
        assert!(machine.flow("MenuFlow").is_some());
        let bundle = out.bundle.as_ref().unwrap();
        assert_eq!(bundle.agent().display_name.as_deref(), Some("Quick Coffee"));
        assert!(bundle.messages().contains("Welcome"));
        assert_eq!(
            machine
                .flow("OrderFlow")
                .and_then(|f| f.state("Welcome"))
                .and_then(|s| s.meta().message_id.as_deref()),
            Some("Welcome")
        );
    }

    #[test]
    fn imported_document_diagnostics_carry_their_path() {
        let provider = InMemoryProvider::default()
            .with_file("/app/Shared/Menu.rcl", "flow MenuFlow\n  start: Show\n  on Show\n    -> \"oops\n");
        let out = Compiler::new(CompileOptions::default())
            .with_provider(Arc::new(provider))
            .compile(&SourceInput::text("/app/coffee.rcl", COFFEE), &CancellationToken::new())
            .unwrap();
        assert!(out
            .diagnostics
            .iter()
            .any(|d| d.source.as_deref() == Some("/app/Shared/Menu.rcl") && d.is_error()));
    }

    #[test]
    fn analyze_returns_partial_ast_with_diagnostics() {
        let analysis = compiler()
            .analyze(
                &SourceInput::text("/app/x.rcl", "agent X\n  flow F\n    start: A\n    on A\n      -> start Ghost\n"),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(analysis.ast.sections.len(), 1);
        let codes: Vec<_> = analysis.diagnostics.iter().filter_map(|d| d.code()).collect();
        assert!(codes.contains(&codes::MISSING_DISPLAY_NAME));
        assert!(codes.contains(&codes::UNRESOLVED_FLOW));
    }

    #[test]
    fn unresolved_flow_is_reported_once() {
        let out = compiler()
            .compile(
                &SourceInput::text("/app/x.rcl", "agent X\n  displayName: \"X\"\n  flow F\n    start: A\n    on A\n      -> start Ghost\n"),
                &CancellationToken::new(),
            )
            .unwrap();
        let unresolved = out
            .diagnostics
            .iter()
            .filter(|d| d.code() == Some(codes::UNRESOLVED_FLOW))
            .count();
        assert_eq!(unresolved, 1);
        assert!(out.machine.is_none());
        assert!(out.bundle.is_none());
    }

    #[test]
    fn unreadable_root_is_an_io_error() {
        let err = compiler()
            .compile(&SourceInput::path("/app/missing.rcl"), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
        assert!(err.to_string().contains("/app/missing.rcl"));
    }

    #[test]
    fn cancelled_compile_stops() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = compiler()
            .compile(&SourceInput::text("/app/coffee.rcl", COFFEE), &cancel)
            .unwrap_err();
        assert!(matches!(err, CompileError::Cancelled(Cancelled)));
    }

    #[test]
    fn compile_many_keeps_input_order_and_shares_imports() {
        let compiler = compiler();
        let inputs: Vec<_> = (0..6)
            .map(|i| SourceInput::text(format!("/app/c{}.rcl", i), COFFEE))
            .collect();
        let results = compiler.compile_many(&inputs, &CancellationToken::new());
        assert_eq!(results.len(), 6);
        for result in &results {
            assert!(!result.as_ref().unwrap().has_errors());
        }
        assert_eq!(compiler.cache().len(), 1);
    }
}
