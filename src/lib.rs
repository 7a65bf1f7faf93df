//! sifter: a small HTML-friendly template engine.
//!
//! Templates are plain text with two kinds of markers:
//!
//! - Control markers: `<!--@IF(cond)-->` ... `<!--@END_IF-->`, plus `LOOP`,
//!   `FOR`, `ELSE`, `EMBED`, `NOBREAK`, `LITERAL`, `INCLUDE` and the
//!   `<!--@?(cond ? yes : no)-->` shorthand.
//! - Substitution markers: `{name}`, `{#name_index}`, `{price,2}`,
//!   `{total * 1.1}`, `{note:b}`, `{label/q}`.
//!
//! A template is parsed once into an immutable block tree (includes are
//! resolved at that point) and can then be rendered any number of times.
//! Conditions are compiled into a closed expression tree and never run
//! through a general-purpose evaluator.
//!
//! Whitespace semantics:
//! - A line holding only control markers and whitespace disappears
//!   entirely, line break included.
//! - Text around a marker on a line with other content is kept as written.
//! - `NOBREAK` removes line breaks from the text it encloses.
//!
//! ```
//! use sifter::{MemoryLoader, Sifter};
//!
//! let loader = MemoryLoader::new().with("hello.html", "Hello, {who}!\n");
//! let mut sifter = Sifter::with_loader(loader);
//! sifter.set_var("who", "world");
//! assert_eq!(sifter.fetch("hello.html").unwrap(), "Hello, world!\n");
//! ```

use std::io::Write;
use std::path::Path;

pub mod ast;
pub mod context;
pub mod embed;
pub mod error;
pub mod eval;
pub mod expr;
pub mod format;
pub mod lexer;
pub mod parser;
pub mod source;
pub mod syntax;

pub use ast::{EmbedMode, Node, Template};
pub use context::{record, Context, Value, Vars};
pub use error::{Diagnostics, Error, Result, TracingDiagnostics};
pub use expr::Condition;
pub use parser::Parser;
pub use source::{FileLoader, LineSource, Loader, MemoryLoader, ReaderSource, StrSource};
pub use syntax::Syntax;

/// Template engine front end: marker syntax, template loader, diagnostics
/// sink and the variables templates are rendered against.
pub struct Sifter {
    syntax: Syntax,
    loader: Box<dyn Loader>,
    diagnostics: Box<dyn Diagnostics>,
    vars: Context,
}

impl Default for Sifter {
    fn default() -> Self {
        Self::new()
    }
}

impl Sifter {
    /// Reads templates from the filesystem.
    pub fn new() -> Self {
        Self::with_loader(FileLoader)
    }

    pub fn with_loader(loader: impl Loader + 'static) -> Self {
        Self {
            syntax: Syntax::default(),
            loader: Box::new(loader),
            diagnostics: Box::new(TracingDiagnostics),
            vars: Context::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Diagnostics + 'static) -> Self {
        self.diagnostics = Box::new(diagnostics);
        self
    }

    pub fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    /// Changes the control marker delimiters. With `escape` the delimiters
    /// are taken literally, otherwise as regex fragments.
    pub fn set_control_tag(&mut self, begin: &str, end: &str, escape: bool) -> Result<()> {
        self.syntax = self.syntax.clone().with_control_tag(begin, end, escape)?;
        Ok(())
    }

    /// Changes the substitution marker delimiters.
    pub fn set_replace_tag(&mut self, begin: &str, end: &str, escape: bool) -> Result<()> {
        self.syntax = self.syntax.clone().with_replace_tag(begin, end, escape)?;
        Ok(())
    }

    /// Sets a variable with HTML special characters escaped.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.set_html(name, value);
    }

    /// Sets a variable exactly as given.
    pub fn set_var_raw(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.set(name, value);
    }

    /// Appends to a list variable, escaping HTML like [`Sifter::set_var`].
    /// Returns false when `name` is not a list.
    pub fn append_var(&mut self, name: &str, value: impl Into<Value>) -> bool {
        self.vars.append(name, context::escape_html(value.into()))
    }

    pub fn context(&self) -> &Context {
        &self.vars
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.vars
    }

    /// Parses a template and everything it includes.
    pub fn compile(&self, path: impl AsRef<Path>) -> Result<Template> {
        let path = path.as_ref();
        self.reported(path, self.parse(path))
    }

    /// Parses template text held in memory. `name` is used in error
    /// messages and as the base for relative includes.
    pub fn compile_str(&self, name: impl AsRef<Path>, text: &str) -> Result<Template> {
        let name = name.as_ref();
        let parsed = Parser::new(&self.syntax, self.loader.as_ref())
            .parse_source(name, Box::new(StrSource::new(text)));
        self.reported(name, parsed)
    }

    /// Renders a compiled template into `out`. Output already written is
    /// kept when rendering fails.
    pub fn render(&self, template: &Template, out: &mut dyn Write) -> Result<()> {
        let rendered = eval::render(template, &self.syntax, &self.vars, out);
        self.reported(template.path(), rendered)
    }

    pub fn render_to_string(&self, template: &Template) -> Result<String> {
        let rendered = eval::render_to_string(template, &self.syntax, &self.vars);
        self.reported(template.path(), rendered)
    }

    /// Compiles `path` and streams the result into `out`.
    pub fn display(&self, path: impl AsRef<Path>, out: &mut dyn Write) -> Result<()> {
        let path = path.as_ref();
        let rendered = self
            .parse(path)
            .and_then(|template| eval::render(&template, &self.syntax, &self.vars, out));
        self.reported(path, rendered)
    }

    /// Compiles `path` and returns the output as a string.
    pub fn fetch(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let rendered = self
            .parse(path)
            .and_then(|template| eval::render_to_string(&template, &self.syntax, &self.vars));
        self.reported(path, rendered)
    }

    /// Outline of the block tree of `path`, for debugging templates.
    pub fn display_tree(&self, path: impl AsRef<Path>, max_length: usize) -> Result<String> {
        self.compile(path)
            .map(|template| template.dump_tree(max_length))
    }

    fn parse(&self, path: &Path) -> Result<Template> {
        Parser::new(&self.syntax, self.loader.as_ref()).parse_file(path)
    }

    /// Sends a failure to the diagnostics sink, once, and passes it on.
    fn reported<T>(&self, path: &Path, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let (file, line) = err.location().unwrap_or((path, 0));
            let message = match err {
                Error::Parse { message, .. } => message.clone(),
                other => other.to_string(),
            };
            self.diagnostics.report(file, line, &message);
        }
        result
    }
}
