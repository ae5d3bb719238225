use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A handle to some source text, plus the path it came from (if any).
///
/// `Source` is reference-counted everywhere it's stored (tokens,
/// diagnostics) so that cloning a handle never copies the underlying
/// text.
pub struct Source {
    pub path: Option<PathBuf>,
    pub contents: String,
}

impl Source {
    /// Wraps an in-memory string as a `Source`, e.g. for a single REPL
    /// line.
    pub fn repl(contents: impl Into<String>) -> Source {
        Source {
            path: None,
            contents: contents.into(),
        }
    }

    /// Reads a file fully into memory.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Source> {
        let path = path.as_ref().to_path_buf();
        let contents = fs::read_to_string(&path)?;
        Ok(Source {
            path: Some(path),
            contents,
        })
    }

    /// A human-readable name for this source, used in diagnostics.
    pub fn name(&self) -> String {
        match &self.path {
            Some(p) => p.display().to_string(),
            None => "<repl>".to_string(),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source").field("path", &self.path).finish()
    }
}
