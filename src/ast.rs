use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::expr::Condition;

/// How rendered text inside an `EMBED` block is synchronized with form
/// controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedMode {
    #[default]
    None,
    /// `EMBED(html)`: bare `checked` / `selected`.
    Html,
    /// `EMBED` or `EMBED(xml)`: `checked="checked"` / `selected="selected"`.
    XmlVerbose,
}

impl EmbedMode {
    pub fn is_active(self) -> bool {
        self != EmbedMode::None
    }

    pub fn is_verbose(self) -> bool {
        self == EmbedMode::XmlVerbose
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Text(String),
    /// `condition` is `None` for the true branch of the `?` shorthand.
    If {
        condition: Option<Condition>,
        body: Vec<Node>,
    },
    /// Runs when the preceding `If`, `Else` or `Loop` sibling did not.
    Else {
        condition: Option<Condition>,
        body: Vec<Node>,
    },
    Loop {
        name: String,
        body: Vec<Node>,
    },
    For {
        range: String,
        body: Vec<Node>,
    },
    Embed {
        mode: EmbedMode,
        body: Vec<Node>,
    },
    Nobreak {
        body: Vec<Node>,
    },
    /// Holds only `Text`, emitted verbatim.
    Literal {
        body: Vec<Node>,
    },
    /// Root of an included template.
    Root(Box<Template>),
}

impl Node {
    pub fn body(&self) -> &[Node] {
        match self {
            Node::Text(_) => &[],
            Node::If { body, .. }
            | Node::Else { body, .. }
            | Node::Loop { body, .. }
            | Node::For { body, .. }
            | Node::Embed { body, .. }
            | Node::Nobreak { body }
            | Node::Literal { body } => body,
            Node::Root(template) => &template.root,
        }
    }

    fn label(&self) -> String {
        let conditional = |name: &str, condition: &Option<Condition>| match condition {
            Some(condition) => format!("{name}({condition})"),
            None => name.to_string(),
        };
        match self {
            Node::Text(_) => "TEXT".to_string(),
            Node::If { condition, .. } => conditional("IF", condition),
            Node::Else { condition, .. } => conditional("ELSE", condition),
            Node::Loop { name, .. } => format!("LOOP({name})"),
            Node::For { range, .. } => format!("FOR({range})"),
            Node::Embed { mode, .. } => match mode {
                EmbedMode::Html => "EMBED(html)".to_string(),
                _ => "EMBED".to_string(),
            },
            Node::Nobreak { .. } => "NOBREAK".to_string(),
            Node::Literal { .. } => "LITERAL".to_string(),
            Node::Root(template) => format!("TEMPLATE:{}", template.path.display()),
        }
    }
}

/// Appends text to `body`, merging with a trailing `Text` node.
pub(crate) fn push_text(body: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    match body.last_mut() {
        Some(Node::Text(existing)) => existing.push_str(text),
        _ => body.push(Node::Text(text.to_string())),
    }
}

/// One parsed template file: the block tree plus where it came from.
///
/// The tree is read-only once parsed and can be rendered any number of times.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) path: PathBuf,
    pub(crate) root: Vec<Node>,
}

impl Template {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn nodes(&self) -> &[Node] {
        &self.root
    }

    /// Indented outline of the block tree. Text nodes show at most
    /// `max_length` characters with line breaks flattened.
    pub fn dump_tree(&self, max_length: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[TEMPLATE:{}]", self.path.display());
        dump_nodes(&self.root, max_length, 1, &mut out);
        out
    }
}

fn dump_nodes(nodes: &[Node], max_length: usize, depth: usize, out: &mut String) {
    let tabs = "\t".repeat(depth);
    for node in nodes {
        match node {
            Node::Text(text) => {
                let shown: String = text
                    .chars()
                    .take(max_length)
                    .map(|c| if matches!(c, '\r' | '\n') { ' ' } else { c })
                    .collect();
                let _ = writeln!(out, "{tabs}[TEXT:{shown}]");
            }
            other => {
                let _ = writeln!(out, "{tabs}[{}]", other.label());
                dump_nodes(other.body(), max_length, depth + 1, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_text_merges_neighbours() {
        let mut body = Vec::new();
        push_text(&mut body, "a");
        push_text(&mut body, "");
        push_text(&mut body, "b");
        body.push(Node::Nobreak { body: vec![] });
        push_text(&mut body, "c");
        assert_eq!(body.len(), 3);
        assert!(matches!(&body[0], Node::Text(t) if t == "ab"));
        assert!(matches!(&body[2], Node::Text(t) if t == "c"));
    }

    #[test]
    fn dump_tree_outlines_blocks() {
        let template = Template {
            path: PathBuf::from("page.html"),
            root: vec![
                Node::Text("hello\nworld".into()),
                Node::Loop {
                    name: "rows".into(),
                    body: vec![Node::Text("row".into())],
                },
            ],
        };
        assert_eq!(
            template.dump_tree(8),
            "[TEMPLATE:page.html]\n\t[TEXT:hello wo]\n\t[LOOP(rows)]\n\t\t[TEXT:row]\n"
        );
    }
}
