use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while compiling or rendering a template.
///
/// Parse failures abort the whole compile; there is no resynchronization.
/// Malformed `FOR` ranges and missing `LOOP` lists are not errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Syntax error at a known template location.
    #[error("{message} in {} on line {line}", file.display())]
    Parse {
        file: PathBuf,
        line: usize,
        message: String,
    },

    /// A condition did not match the closed expression grammar.
    #[error("invalid expression `{expr}`: {reason}")]
    InvalidExpression { expr: String, reason: String },

    /// A template includes itself directly or through another template.
    #[error("'{}' is included recursively in {} on line {line}", included.display(), file.display())]
    RecursiveInclude {
        file: PathBuf,
        line: usize,
        included: PathBuf,
    },

    #[error("cannot open template '{}'", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read template '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing to the output sink failed.
    #[error("failed to write output: {0}")]
    Render(#[from] io::Error),

    /// Marker delimiters produced an unusable pattern.
    #[error("invalid marker syntax: {0}")]
    InvalidSyntax(#[from] regex::Error),
}

impl Error {
    /// Template file and line the error points at, when it has one.
    pub fn location(&self) -> Option<(&Path, usize)> {
        match self {
            Error::Parse { file, line, .. } | Error::RecursiveInclude { file, line, .. } => {
                Some((file.as_path(), *line))
            }
            Error::NotFound { path } | Error::Io { path, .. } => Some((path.as_path(), 0)),
            _ => None,
        }
    }
}

/// Receives one report per failed compile or render.
pub trait Diagnostics {
    fn report(&self, file: &Path, line: usize, message: &str);
}

/// Default sink: forwards reports to `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, file: &Path, line: usize, message: &str) {
        tracing::error!(file = %file.display(), line, "{message}");
    }
}
