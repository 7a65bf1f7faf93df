use std::fmt;

use crate::source::LineSource;
use crate::syntax::Syntax;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Loop,
    For,
    If,
    Else,
    Embed,
    Nobreak,
    Literal,
    Include,
    /// `?(cond ? yes : no)` shorthand.
    Ternary,
}

impl Tag {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "LOOP" => Tag::Loop,
            "FOR" => Tag::For,
            "IF" => Tag::If,
            "ELSE" => Tag::Else,
            "EMBED" => Tag::Embed,
            "NOBREAK" => Tag::Nobreak,
            "LITERAL" => Tag::Literal,
            "INCLUDE" => Tag::Include,
            "?" => Tag::Ternary,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::Loop => "LOOP",
            Tag::For => "FOR",
            Tag::If => "IF",
            Tag::Else => "ELSE",
            Tag::Embed => "EMBED",
            Tag::Nobreak => "NOBREAK",
            Tag::Literal => "LITERAL",
            Tag::Include => "INCLUDE",
            Tag::Ternary => "?",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A control marker such as `<!--@IF(x)-->` or `<!--@END_LOOP-->`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub tag: Tag,
    pub closing: bool,
    /// Parameter with surrounding whitespace trimmed; empty when absent.
    pub param: String,
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.closing {
            f.write_str("END_")?;
        }
        f.write_str(self.tag.name())?;
        if !self.param.is_empty() {
            write!(f, "({})", self.param)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(String),
    /// Text that precedes the marker on its line (after whitespace policy),
    /// then the marker itself.
    Marker { leading: String, marker: Marker },
}

/// Pulls lines from a source and splits them around control markers.
///
/// A line holding nothing but markers and whitespace produces no text, its
/// line break included. Once a marker shares its line with other content,
/// the rest of that line keeps its line breaks.
pub struct Tokenizer<'a> {
    source: Box<dyn LineSource>,
    syntax: &'a Syntax,
    buffer: String,
    line: usize,
    preserve_spaces: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: Box<dyn LineSource>, syntax: &'a Syntax) -> Self {
        Self {
            source,
            syntax,
            buffer: String::new(),
            line: 0,
            preserve_spaces: false,
        }
    }

    /// Number of lines read so far.
    pub fn line(&self) -> usize {
        self.line
    }

    fn read_line(&mut self) -> std::io::Result<bool> {
        match self.source.next_line()? {
            Some(line) => {
                self.buffer = line;
                self.line += 1;
                self.preserve_spaces = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Next piece of the template, or `None` once the source is exhausted.
    ///
    /// Inside a `LITERAL` block every marker other than `END_LITERAL` comes
    /// back as plain text.
    pub fn next_token(&mut self, literal: bool) -> std::io::Result<Option<Token>> {
        if self.buffer.is_empty() && !self.read_line()? {
            return Ok(None);
        }

        let Some(caps) = self.syntax.control().captures(&self.buffer) else {
            return Ok(Some(Token::Text(std::mem::take(&mut self.buffer))));
        };

        let leading = caps[1].to_string();
        let whole = caps[2].to_string();
        let closing = caps.get(3).is_some();
        let tag = Tag::from_name(&caps[4]);
        let param = caps.get(5).map_or("", |m| m.as_str()).trim().to_string();
        let trailing = caps[6].to_string();

        let Some(tag) = tag else {
            // the pattern only admits known tags
            return Ok(Some(Token::Text(std::mem::take(&mut self.buffer))));
        };

        if literal && !(closing && tag == Tag::Literal) {
            self.buffer = trailing;
            self.preserve_spaces = true;
            return Ok(Some(Token::Text(leading + &whole)));
        }

        let leading = if has_content(&leading) || has_content(&trailing) {
            self.buffer = trailing;
            self.preserve_spaces = true;
            leading
        } else if self.preserve_spaces || (closing && tag == Tag::Nobreak) {
            self.buffer = line_breaks(&trailing);
            line_breaks(&leading)
        } else {
            self.buffer.clear();
            String::new()
        };

        let marker = Marker {
            tag,
            closing,
            param,
        };
        tracing::trace!(line = self.line, %marker, "marker");
        Ok(Some(Token::Marker { leading, marker }))
    }
}

fn has_content(s: &str) -> bool {
    s.chars().any(|c| !c.is_whitespace())
}

fn line_breaks(s: &str) -> String {
    s.chars().filter(|c| matches!(c, '\r' | '\n')).collect()
}
