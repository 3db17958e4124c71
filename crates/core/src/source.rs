//! Where import paths point and how their text is read.
//!
//! `import Shared/Common` names `Shared/Common.rcl` relative to the
//! directory of the importing document. [`FileSystemProvider`] reads from
//! disk; [`InMemoryProvider`] serves a fixed set of documents to editors
//! and tests.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

pub const SOURCE_EXTENSION: &str = "rcl";

/// File access for import resolution. Shared across compiler threads.
pub trait SourceProvider: Send + Sync {
    fn read_source(&self, path: &Path) -> io::Result<String>;

    /// The document an import statement names, relative to `base` (the
    /// importing document's directory).
    fn resolve_import(&self, base: &Path, segments: &[String]) -> PathBuf {
        let mut path = segments.iter().fold(base.to_path_buf(), |p, s| p.join(s));
        path.set_extension(SOURCE_EXTENSION);
        normalize(&path)
    }

    /// Stable key for cycle detection and caching.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemProvider;

impl SourceProvider for FileSystemProvider {
    fn read_source(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        path.canonicalize()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    files: HashMap<PathBuf, String>,
}

impl InMemoryProvider {
    pub fn new(files: HashMap<PathBuf, String>) -> Self {
        InMemoryProvider {
            files: files
                .into_iter()
                .map(|(path, text)| (normalize(&path), text))
                .collect(),
        }
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.files.insert(normalize(path.as_ref()), text.into());
        self
    }
}

impl SourceProvider for InMemoryProvider {
    fn read_source(&self, path: &Path) -> io::Result<String> {
        let key = normalize(path);
        self.files.get(&key).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no document at {}", key.display()),
            )
        })
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let key = normalize(path);
        if self.files.contains_key(&key) {
            Ok(key)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no document at {}", key.display()),
            ))
        }
    }
}

/// Drop `.` and fold `..` without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}
