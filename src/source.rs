use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Yields template text one line at a time, line terminators included.
///
/// The source is released when dropped.
pub trait LineSource {
    fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Locates and opens templates by path.
pub trait Loader {
    /// Canonical form of `path`, used for include cycle detection.
    fn resolve(&self, path: &Path) -> Result<PathBuf>;

    /// Opens an already resolved template.
    fn open(&self, path: &Path) -> Result<Box<dyn LineSource>>;
}

/// Reads templates from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl Loader for FileLoader {
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        path.canonicalize().map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => Error::NotFound {
                path: path.to_path_buf(),
            },
            _ => Error::Io {
                path: path.to_path_buf(),
                source,
            },
        })
    }

    fn open(&self, path: &Path) -> Result<Box<dyn LineSource>> {
        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Box::new(ReaderSource::new(BufReader::new(file))))
    }
}

/// Adapts any buffered reader.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        match self.reader.read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    }
}

/// Serves lines out of an owned string.
#[derive(Debug, Clone)]
pub struct StrSource {
    text: String,
    pos: usize,
}

impl StrSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pos: 0,
        }
    }
}

impl LineSource for StrSource {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        let rest = &self.text[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        let len = rest.find('\n').map_or(rest.len(), |idx| idx + 1);
        self.pos += len;
        Ok(Some(rest[..len].to_string()))
    }
}

/// Keeps templates in memory, keyed by normalized path.
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader {
    templates: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) -> &mut Self {
        self.templates.insert(normalize(path.as_ref()), text.into());
        self
    }

    pub fn with(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }
}

impl Loader for MemoryLoader {
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let normalized = normalize(path);
        if self.templates.contains_key(&normalized) {
            Ok(normalized)
        } else {
            Err(Error::NotFound {
                path: path.to_path_buf(),
            })
        }
    }

    fn open(&self, path: &Path) -> Result<Box<dyn LineSource>> {
        let text = self.templates.get(path).ok_or_else(|| Error::NotFound {
            path: path.to_path_buf(),
        })?;
        Ok(Box::new(StrSource::new(text.clone())))
    }
}

/// Folds `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut source: impl LineSource) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn str_source_keeps_terminators() {
        let lines = drain(StrSource::new("a\r\nb\n\nc"));
        assert_eq!(lines, vec!["a\r\n", "b\n", "\n", "c"]);
    }

    #[test]
    fn reader_source_reads_lines() {
        let lines = drain(ReaderSource::new("x\ny\n".as_bytes()));
        assert_eq!(lines, vec!["x\n", "y\n"]);
    }

    #[test]
    fn memory_loader_normalizes_paths() {
        let loader = MemoryLoader::new().with("tpl/parts/header.html", "hi");
        let resolved = loader
            .resolve(Path::new("tpl/pages/../parts/./header.html"))
            .unwrap();
        assert_eq!(resolved, PathBuf::from("tpl/parts/header.html"));
        assert!(matches!(
            loader.resolve(Path::new("tpl/missing.html")),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn file_loader_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileLoader.resolve(&dir.path().join("nope.html")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
