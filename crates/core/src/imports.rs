//! Import resolution.
//!
//! Imports are followed depth first. Before recursing into a document the
//! resolver checks the stack of documents currently being resolved, so a
//! cycle is reported instead of followed. Parsed documents live in an
//! [`ImportCache`] keyed by canonical path; concurrent requests for the same
//! path wait for a single parse.

use crate::ast::File;
use crate::cancel::{CancellationToken, Cancelled};
use crate::diagnostic::{codes, Diagnostic};
use crate::options::CompileOptions;
use crate::pass1_canonicalize::parse_document;
use crate::source::SourceProvider;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// An imported document after scan, parse and canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub path: PathBuf,
    pub file: Arc<File>,
    /// Lexical, syntax and canonicalization diagnostics of this document.
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImportError {
    #[error("cannot read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

type Slot = Arc<Mutex<Option<Arc<ParsedDocument>>>>;

/// Parsed imports shared between compilations. Cloning shares the cache.
///
/// Only successful parses are kept. A read failure or a cancelled parse is
/// returned to the caller that ran it and the next request tries again, so
/// a file created after a failed import is picked up without `invalidate`.
#[derive(Debug, Clone, Default)]
pub struct ImportCache {
    entries: Arc<DashMap<PathBuf, Slot>>,
}

impl ImportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached document at `path`. Concurrent callers for the same path
    /// wait for a single parse; if that parse fails, each waiter then runs
    /// its own `parse`.
    pub fn get_or_parse(
        &self,
        path: &Path,
        parse: impl FnOnce() -> Result<ParsedDocument, ImportError>,
    ) -> Result<Arc<ParsedDocument>, ImportError> {
        // Clone the slot out so the shard lock is released before parsing.
        let slot = self.entries.entry(path.to_path_buf()).or_default().clone();
        let mut cell = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(done) = cell.as_ref() {
            trace!(path = %path.display(), "import cache hit");
            return Ok(Arc::clone(done));
        }
        match parse() {
            Ok(doc) => {
                let doc = Arc::new(doc);
                *cell = Some(Arc::clone(&doc));
                Ok(doc)
            }
            Err(e) => {
                // Drop the empty slot unless another caller is already waiting on it.
                self.entries
                    .remove_if(path, |_, s| Arc::ptr_eq(s, &slot) && Arc::strong_count(s) <= 2);
                Err(e)
            }
        }
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Imported documents in dependency order (a document follows everything
/// it imports), plus import-level diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ResolvedImports {
    pub documents: Vec<Arc<ParsedDocument>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolvedImports {
    pub fn files(&self) -> Vec<Arc<File>> {
        self.documents.iter().map(|d| Arc::clone(&d.file)).collect()
    }
}

pub struct ImportResolver<'a> {
    provider: &'a dyn SourceProvider,
    cache: &'a ImportCache,
    options: &'a CompileOptions,
    cancel: &'a CancellationToken,
}

#[derive(Default)]
struct Walk {
    stack: Vec<PathBuf>,
    visited: HashSet<PathBuf>,
    out: ResolvedImports,
}

impl<'a> ImportResolver<'a> {
    pub fn new(
        provider: &'a dyn SourceProvider,
        cache: &'a ImportCache,
        options: &'a CompileOptions,
        cancel: &'a CancellationToken,
    ) -> Self {
        ImportResolver {
            provider,
            cache,
            options,
            cancel,
        }
    }

    /// Resolve everything `root` imports, transitively. `root_path` is the
    /// document's own location when it has one; imports of in-memory text
    /// resolve against `base`.
    pub fn resolve(
        &self,
        root: &File,
        root_path: Option<&Path>,
        base: &Path,
    ) -> Result<ResolvedImports, Cancelled> {
        let mut walk = Walk::default();
        if let Some(path) = root_path.and_then(|p| self.provider.canonicalize(p).ok()) {
            walk.visited.insert(path.clone());
            walk.stack.push(path);
        }
        self.visit(root, base, None, &mut walk)?;
        debug!(
            documents = walk.out.documents.len(),
            diagnostics = walk.out.diagnostics.len(),
            "resolved imports"
        );
        Ok(walk.out)
    }

    fn visit(
        &self,
        file: &File,
        dir: &Path,
        origin: Option<&Path>,
        walk: &mut Walk,
    ) -> Result<(), Cancelled> {
        let report = |walk: &mut Walk, d: Diagnostic| {
            walk.out.diagnostics.push(match origin {
                Some(p) => d.with_source(p.display().to_string()),
                None => d,
            });
        };

        for import in &file.imports {
            self.cancel.check()?;
            let target = self.provider.resolve_import(dir, &import.path);
            let key = match self.provider.canonicalize(&target) {
                Ok(key) => key,
                Err(_) => {
                    report(
                        walk,
                        Diagnostic::error(
                            codes::IMPORT_NOT_FOUND,
                            format!(
                                "cannot find imported document '{}' at {}",
                                import.joined(),
                                target.display()
                            ),
                            import.range,
                        ),
                    );
                    continue;
                }
            };

            if let Some(at) = walk.stack.iter().position(|p| *p == key) {
                let chain: Vec<String> = walk.stack[at..]
                    .iter()
                    .chain(std::iter::once(&key))
                    .map(|p| p.display().to_string())
                    .collect();
                report(
                    walk,
                    Diagnostic::error(
                        codes::IMPORT_CYCLE,
                        format!("import cycle: {}", chain.join(" -> ")),
                        import.range,
                    ),
                );
                continue;
            }
            if !walk.visited.insert(key.clone()) {
                continue;
            }

            let doc = match self.cache.get_or_parse(&key, || self.parse(&key)) {
                Ok(doc) => doc,
                Err(ImportError::Cancelled(c)) => return Err(c),
                Err(e) => {
                    report(
                        walk,
                        Diagnostic::error(codes::IMPORT_NOT_FOUND, e.to_string(), import.range),
                    );
                    continue;
                }
            };

            let child_dir = key.parent().map(Path::to_path_buf).unwrap_or_default();
            walk.stack.push(key.clone());
            self.visit(&doc.file, &child_dir, Some(&key), walk)?;
            walk.stack.pop();
            walk.out.documents.push(doc);
        }
        Ok(())
    }

    fn parse(&self, path: &Path) -> Result<ParsedDocument, ImportError> {
        let text = self
            .provider
            .read_source(path)
            .map_err(|e| ImportError::Read {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let (file, diagnostics) = parse_document(&text, self.options, self.cancel)?.into_parts();
        debug!(path = %path.display(), sections = file.sections.len(), "parsed import");
        Ok(ParsedDocument {
            path: path.to_path_buf(),
            file: Arc::new(file),
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass1_canonicalize::parse_ok;
    use crate::source::InMemoryProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolve(provider: &InMemoryProvider, root: &str) -> ResolvedImports {
        let file = parse_ok(root);
        let cache = ImportCache::new();
        let options = CompileOptions::default();
        let cancel = CancellationToken::new();
        ImportResolver::new(provider, &cache, &options, &cancel)
            .resolve(&file, None, Path::new("/app"))
            .unwrap()
    }

    fn paths(r: &ResolvedImports) -> Vec<String> {
        r.documents
            .iter()
            .map(|d| d.path.display().to_string())
            .collect()
    }

    #[test]
    fn diamond_imports_are_listed_once_in_dependency_order() {
        let provider = InMemoryProvider::default()
            .with_file("/app/b.rcl", "import d\nflow B\n  start: S\n  S -> :end\n")
            .with_file("/app/c.rcl", "import d\nflow C\n  start: S\n  S -> :end\n")
            .with_file("/app/d.rcl", "flow D\n  start: S\n  S -> :end\n");
        let out = resolve(&provider, "import b\nimport c\nagent A\n");
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(paths(&out), vec!["/app/d.rcl", "/app/b.rcl", "/app/c.rcl"]);
    }

    #[test]
    fn cycles_are_reported_not_followed() {
        let provider = InMemoryProvider::default()
            .with_file("/app/a.rcl", "import b\nflow A\n  start: S\n  S -> :end\n")
            .with_file("/app/b.rcl", "import a\nflow B\n  start: S\n  S -> :end\n");
        let out = resolve(&provider, "import a\nagent X\n");
        assert_eq!(out.diagnostics.len(), 1);
        let d = &out.diagnostics[0];
        assert_eq!(d.code(), Some(codes::IMPORT_CYCLE));
        assert!(d.message.contains("/app/a.rcl -> /app/b.rcl -> /app/a.rcl"));
        assert_eq!(d.source.as_deref(), Some("/app/b.rcl"));
        assert_eq!(paths(&out), vec!["/app/b.rcl", "/app/a.rcl"]);
    }

    #[test]
    fn self_import_is_a_cycle() {
        let provider = InMemoryProvider::default()
            .with_file("/app/main.rcl", "import main\nagent A\n");
        let file = parse_ok("import main\nagent A\n");
        let cache = ImportCache::new();
        let options = CompileOptions::default();
        let cancel = CancellationToken::new();
        let out = ImportResolver::new(&provider, &cache, &options, &cancel)
            .resolve(&file, Some(Path::new("/app/main.rcl")), Path::new("/app"))
            .unwrap();
        assert_eq!(out.diagnostics[0].code(), Some(codes::IMPORT_CYCLE));
        assert!(out.documents.is_empty());
    }

    #[test]
    fn missing_import_points_at_the_statement() {
        let out = resolve(&InMemoryProvider::default(), "import Shared/Gone\nagent A\n");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code(), Some(codes::IMPORT_NOT_FOUND));
        assert!(out.diagnostics[0].message.contains("Shared/Gone"));
        assert_eq!(out.diagnostics[0].range.start.line, 0);
    }

    #[test]
    fn concurrent_requests_parse_once() {
        let cache = ImportCache::new();
        let parses = AtomicUsize::new(0);
        let path = Path::new("/lib/shared.rcl");
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    cache
                        .get_or_parse(path, || {
                            parses.fetch_add(1, Ordering::SeqCst);
                            Ok(ParsedDocument {
                                path: path.to_path_buf(),
                                file: Arc::new(parse_ok("flow F\n  start: S\n  S -> :end\n")),
                                diagnostics: Vec::new(),
                            })
                        })
                        .unwrap();
                });
            }
        });
        assert_eq!(parses.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cancelled_parse_leaves_no_entry() {
        let cache = ImportCache::new();
        let path = Path::new("/lib/shared.rcl");
        let err = cache.get_or_parse(path, || Err(Cancelled.into())).unwrap_err();
        assert_eq!(err, ImportError::Cancelled(Cancelled));
        assert!(cache.is_empty());
    }

    fn shared_doc(path: &Path) -> ParsedDocument {
        ParsedDocument {
            path: path.to_path_buf(),
            file: Arc::new(parse_ok("flow F\n  start: S\n  S -> :end\n")),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn cancelled_parse_does_not_reach_a_waiting_caller() {
        let cache = ImportCache::new();
        let path = Path::new("/lib/shared.rcl");
        let started = std::sync::Barrier::new(2);
        let (stale, live) = std::thread::scope(|s| {
            let stale = s.spawn(|| {
                cache.get_or_parse(path, || {
                    started.wait();
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    Err(Cancelled.into())
                })
            });
            let live = s.spawn(|| {
                started.wait();
                cache.get_or_parse(path, || Ok(shared_doc(path)))
            });
            (stale.join().unwrap(), live.join().unwrap())
        });
        assert_eq!(stale.unwrap_err(), ImportError::Cancelled(Cancelled));
        assert_eq!(live.unwrap().path, path);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn read_failures_are_retried() {
        let cache = ImportCache::new();
        let path = Path::new("/lib/later.rcl");
        let err = cache
            .get_or_parse(path, || {
                Err(ImportError::Read {
                    path: path.to_path_buf(),
                    message: "not found".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, ImportError::Read { .. }));
        assert!(cache.is_empty());

        let doc = cache.get_or_parse(path, || Ok(shared_doc(path))).unwrap();
        assert_eq!(doc.path, path);
        assert_eq!(cache.len(), 1);
    }
}
