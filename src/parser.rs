use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::ast::{push_text, EmbedMode, Node, Template};
use crate::error::{Error, Result};
use crate::expr::Condition;
use crate::lexer::{Tag, Token, Tokenizer};
use crate::source::{LineSource, Loader};
use crate::syntax::Syntax;

/// `cond ? yes : no`, where `yes` may escape `:` and `cond` may quote `?`.
static TERNARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:[^'?]+|'(?:\\.|[^'])*?')+)\?\s*((?:\\.|[^:])*?)\s*:\s*(.*)")
        .expect("valid ternary pattern")
});
static BACKSLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(.)").expect("valid escape pattern"));

/// How a block body ended.
enum Exit {
    /// Matching `END_` marker.
    Closed,
    /// An `ELSE` marker; the caller opens the sibling `Else` block.
    Else(Option<Condition>),
    /// Source exhausted.
    Eof,
}

/// Builds block trees from templates, resolving includes as it goes.
pub struct Parser<'a> {
    syntax: &'a Syntax,
    loader: &'a dyn Loader,
}

impl<'a> Parser<'a> {
    pub fn new(syntax: &'a Syntax, loader: &'a dyn Loader) -> Self {
        Self { syntax, loader }
    }

    pub fn parse_file(&self, path: &Path) -> Result<Template> {
        let canonical = self.loader.resolve(path)?;
        self.parse_unit(canonical, &[])
    }

    /// Parses text that does not come from the loader. Includes inside it
    /// still do, relative to `path`'s directory.
    pub fn parse_source(&self, path: &Path, source: Box<dyn LineSource>) -> Result<Template> {
        self.parse_with(path.to_path_buf(), source, &[])
    }

    fn parse_unit(&self, path: PathBuf, ancestors: &[PathBuf]) -> Result<Template> {
        let source = self.loader.open(&path)?;
        self.parse_with(path, source, ancestors)
    }

    fn parse_with(
        &self,
        path: PathBuf,
        source: Box<dyn LineSource>,
        ancestors: &[PathBuf],
    ) -> Result<Template> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut chain = ancestors.to_vec();
        chain.push(path.clone());
        tracing::debug!(path = %path.display(), depth = ancestors.len(), "parsing template");

        let mut unit = UnitParser {
            parser: self,
            tokens: Tokenizer::new(source, self.syntax),
            path,
            dir,
            chain,
        };
        let mut root = Vec::new();
        match unit.parse_block(None, &mut root)? {
            Exit::Eof => {}
            Exit::Closed | Exit::Else(_) => return Err(unit.error("unexpected marker")),
        }

        let UnitParser { tokens, path, .. } = unit;
        tracing::debug!(path = %path.display(), lines = tokens.line(), "parsed template");
        Ok(Template { path, root })
    }
}

/// Parse state for a single template file.
struct UnitParser<'p, 'a> {
    parser: &'p Parser<'a>,
    tokens: Tokenizer<'a>,
    path: PathBuf,
    dir: PathBuf,
    /// This template and every template that includes it.
    chain: Vec<PathBuf>,
}

impl UnitParser<'_, '_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            file: self.path.clone(),
            line: self.tokens.line(),
            message: message.into(),
        }
    }

    fn condition(&self, raw: &str) -> Result<Condition> {
        Condition::compile(raw, self.parser.syntax).map_err(|e| self.error(e.to_string()))
    }

    /// Fills `body` until the block named by `kind` ends (`None` is the
    /// template root).
    fn parse_block(&mut self, kind: Option<Tag>, body: &mut Vec<Node>) -> Result<Exit> {
        let literal = kind == Some(Tag::Literal);

        loop {
            let token = self
                .tokens
                .next_token(literal)
                .map_err(|source| Error::Io {
                    path: self.path.clone(),
                    source,
                })?;
            let (leading, marker) = match token {
                None => return Ok(Exit::Eof),
                Some(Token::Text(text)) => {
                    push_text(body, &text);
                    continue;
                }
                Some(Token::Marker { leading, marker }) => (leading, marker),
            };
            push_text(body, &leading);

            if marker.closing {
                let closes = marker.param.is_empty()
                    && (kind == Some(marker.tag)
                        || (kind == Some(Tag::Else) && matches!(marker.tag, Tag::If | Tag::Loop)));
                if closes {
                    return Ok(Exit::Closed);
                }
                return Err(self.error(format!("unexpected {marker}")));
            }

            let param = marker.param.as_str();
            match marker.tag {
                Tag::Loop | Tag::For | Tag::If if !param.is_empty() => {
                    let condition = match marker.tag {
                        Tag::If => Some(self.condition(param)?),
                        _ => None,
                    };
                    let mut child = Vec::new();
                    let exit = self.parse_block(Some(marker.tag), &mut child)?;
                    body.push(match marker.tag {
                        Tag::Loop => Node::Loop {
                            name: param.to_string(),
                            body: child,
                        },
                        Tag::For => Node::For {
                            range: param.to_string(),
                            body: child,
                        },
                        _ => Node::If {
                            condition,
                            body: child,
                        },
                    });
                    self.finish(marker.tag, exit, body)?;
                }
                Tag::Else => {
                    return match kind {
                        Some(Tag::Loop | Tag::If | Tag::Else) if param.is_empty() => {
                            Ok(Exit::Else(None))
                        }
                        Some(Tag::If | Tag::Else) => Ok(Exit::Else(Some(self.condition(param)?))),
                        Some(Tag::Loop) => {
                            Err(self.error(format!("conditional {marker} after LOOP")))
                        }
                        _ => Err(self.error(format!("{marker} outside IF or LOOP"))),
                    };
                }
                Tag::Ternary if !param.is_empty() => self.ternary(param, body)?,
                Tag::Embed => {
                    let mode = match param.to_ascii_lowercase().as_str() {
                        "" | "xml" => EmbedMode::XmlVerbose,
                        "html" => EmbedMode::Html,
                        _ => return Err(self.error(format!("unknown embed mode in {marker}"))),
                    };
                    let mut child = Vec::new();
                    let exit = self.parse_block(Some(Tag::Embed), &mut child)?;
                    body.push(Node::Embed { mode, body: child });
                    self.finish(Tag::Embed, exit, body)?;
                }
                Tag::Nobreak | Tag::Literal if param.is_empty() => {
                    let mut child = Vec::new();
                    let exit = self.parse_block(Some(marker.tag), &mut child)?;
                    body.push(match marker.tag {
                        Tag::Nobreak => Node::Nobreak { body: child },
                        _ => Node::Literal { body: child },
                    });
                    self.finish(marker.tag, exit, body)?;
                }
                Tag::Include if !param.is_empty() => self.include(param, body)?,
                _ => return Err(self.error(format!("syntax error in {marker}"))),
            }
        }
    }

    /// Closes a block opened with `tag`, following any `ELSE` chain.
    fn finish(&mut self, tag: Tag, mut exit: Exit, body: &mut Vec<Node>) -> Result<()> {
        loop {
            match exit {
                Exit::Closed => return Ok(()),
                Exit::Eof => return Err(self.error(format!("missing END_{tag}"))),
                Exit::Else(condition) => {
                    let mut child = Vec::new();
                    exit = self.parse_block(Some(Tag::Else), &mut child)?;
                    body.push(Node::Else {
                        condition,
                        body: child,
                    });
                }
            }
        }
    }

    /// Expands `cond ? yes : no` into an `If` / `Else` pair.
    fn ternary(&self, param: &str, body: &mut Vec<Node>) -> Result<()> {
        let caps = TERNARY
            .captures(param)
            .ok_or_else(|| self.error(format!("malformed ?({param})")))?;
        let condition = self.condition(caps[1].trim())?;

        let mut yes = Vec::new();
        push_text(&mut yes, &BACKSLASH.replace_all(&caps[2], "$1"));
        let mut no = Vec::new();
        push_text(&mut no, &BACKSLASH.replace_all(&caps[3], "$1"));

        body.push(Node::If {
            condition: Some(condition),
            body: yes,
        });
        body.push(Node::Else {
            condition: None,
            body: no,
        });
        Ok(())
    }

    /// Parses the included template in place.
    fn include(&self, param: &str, body: &mut Vec<Node>) -> Result<()> {
        let requested = Path::new(param);
        let target = if param.starts_with('/') || requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.dir.join(requested)
        };

        let canonical = match self.parser.loader.resolve(&target) {
            Ok(path) => path,
            Err(Error::NotFound { path }) => {
                return Err(self.error(format!("cannot open template '{}'", path.display())))
            }
            Err(e) => return Err(e),
        };
        if self.chain.contains(&canonical) {
            return Err(Error::RecursiveInclude {
                file: self.path.clone(),
                line: self.tokens.line(),
                included: canonical,
            });
        }

        tracing::debug!(
            from = %self.path.display(),
            include = %canonical.display(),
            "including template"
        );
        let template = self.parser.parse_unit(canonical, &self.chain)?;
        body.push(Node::Root(Box::new(template)));
        Ok(())
    }
}
