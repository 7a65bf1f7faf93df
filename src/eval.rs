use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::LazyLock;

use regex::Regex;

use crate::ast::{EmbedMode, Node, Template};
use crate::context::{Value, Vars};
use crate::embed::FormState;
use crate::error::{Error, Result};
use crate::expr::Condition;
use crate::format;
use crate::syntax::Syntax;

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-?\d+),\s*(-?\d+)(?:,\s*(-?\d+))?$").expect("valid range pattern")
});

/// Variables visible while rendering: loop frames over the caller's
/// variables, innermost first.
pub struct Scope<'c> {
    base: &'c dyn Vars,
    frames: Vec<HashMap<String, Value>>,
}

impl<'c> Scope<'c> {
    pub fn new(base: &'c dyn Vars) -> Self {
        Self {
            base,
            frames: Vec::new(),
        }
    }

    fn push(&mut self, frame: HashMap<String, Value>) {
        self.frames.push(frame);
    }

    fn pop(&mut self) {
        self.frames.pop();
    }
}

impl Vars for Scope<'_> {
    fn var(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| self.base.var(name))
    }
}

/// Modes inherited from enclosing blocks.
#[derive(Debug, Clone, Copy, Default)]
struct Mode {
    embed: EmbedMode,
    nobreak: bool,
}

/// Walks a block tree depth first, writing output as it goes.
///
/// All render-time state lives here, so one `Template` can be rendered any
/// number of times, including from several threads at once.
pub struct Evaluator<'a> {
    syntax: &'a Syntax,
    scope: Scope<'a>,
    form: FormState,
}

impl<'a> Evaluator<'a> {
    pub fn new(syntax: &'a Syntax, vars: &'a dyn Vars) -> Self {
        Self {
            syntax,
            scope: Scope::new(vars),
            form: FormState::new(),
        }
    }

    pub fn render(&mut self, template: &Template, out: &mut dyn Write) -> Result<()> {
        tracing::debug!(path = %template.path().display(), "rendering template");
        self.render_nodes(template.nodes(), Mode::default(), out)?;
        out.flush()?;
        Ok(())
    }

    /// Renders one sibling list. `prior` records whether the last `If`,
    /// `Else` or `Loop` in this list produced output.
    fn render_nodes(&mut self, nodes: &[Node], mode: Mode, out: &mut dyn Write) -> Result<()> {
        let mut prior = true;

        for node in nodes {
            match node {
                Node::Text(text) => self.text(text, mode, out)?,
                Node::If { condition, body } => {
                    prior = self.branch(condition.as_ref(), body, mode, out)?;
                }
                Node::Else { condition, body } => {
                    if !prior {
                        prior = self.branch(condition.as_ref(), body, mode, out)?;
                    }
                }
                Node::Loop { name, body } => prior = self.each(name, body, mode, out)?,
                Node::For { range, body } => self.range(range, body, mode, out)?,
                Node::Embed { mode: embed, body } => {
                    let mode = Mode {
                        embed: *embed,
                        ..mode
                    };
                    self.render_nodes(body, mode, out)?;
                }
                Node::Nobreak { body } => {
                    let mode = Mode {
                        nobreak: true,
                        ..mode
                    };
                    self.render_nodes(body, mode, out)?;
                }
                Node::Literal { body } => {
                    for child in body {
                        if let Node::Text(text) = child {
                            out.write_all(text.as_bytes())?;
                        }
                    }
                }
                Node::Root(template) => self.render_nodes(template.nodes(), mode, out)?,
            }
        }
        Ok(())
    }

    fn text(&mut self, text: &str, mode: Mode, out: &mut dyn Write) -> Result<()> {
        let flattened;
        let text = if mode.nobreak {
            flattened = text.replace(['\r', '\n'], "");
            flattened.as_str()
        } else {
            text
        };

        let mut rendered = format::substitute(text, self.syntax, &self.scope);
        if mode.embed.is_active() {
            rendered = self
                .form
                .embed(&rendered, &self.scope, mode.embed.is_verbose());
        }
        out.write_all(rendered.as_bytes())?;
        Ok(())
    }

    /// A missing condition always holds.
    fn branch(
        &mut self,
        condition: Option<&Condition>,
        body: &[Node],
        mode: Mode,
        out: &mut dyn Write,
    ) -> Result<bool> {
        let taken = condition.is_none_or(|c| c.is_true(&self.scope));
        if taken {
            self.render_nodes(body, mode, out)?;
        }
        Ok(taken)
    }

    /// Renders `body` once per element of the list `name`. A missing or
    /// empty list renders nothing and lets a following `Else` run.
    fn each(&mut self, name: &str, body: &[Node], mode: Mode, out: &mut dyn Write) -> Result<bool> {
        let items = match self.scope.var(name) {
            Some(Value::List(items)) if !items.is_empty() => items.clone(),
            Some(Value::List(_)) | None => return Ok(false),
            Some(_) => {
                tracing::debug!(name, "LOOP variable is not a list; skipped");
                return Ok(false);
            }
        };

        let count = items.len();
        for (index, item) in items.into_iter().enumerate() {
            let mut frame = match item {
                Value::Record(fields) => fields,
                scalar => HashMap::from([("#value".to_string(), scalar)]),
            };
            frame.insert(format!("#{name}_index"), Value::from(index));
            frame.insert(format!("#{name}_count"), Value::from(count));

            self.scope.push(frame);
            let rendered = self.render_nodes(body, mode, out);
            self.scope.pop();
            rendered?;
        }
        Ok(true)
    }

    /// Counts from start to stop inclusive. A range that does not read as
    /// `start,stop[,step]` once substituted renders nothing.
    fn range(&mut self, range: &str, body: &[Node], mode: Mode, out: &mut dyn Write) -> Result<()> {
        let expanded = format::substitute(range, self.syntax, &self.scope);
        let Some((start, stop, step)) = parse_range(expanded.trim()) else {
            tracing::debug!(range = %expanded, "FOR range is not start,stop[,step]; skipped");
            return Ok(());
        };
        if step == 0 {
            return Ok(());
        }

        let mut value = start;
        while (step > 0 && value <= stop) || (step < 0 && value >= stop) {
            self.scope.push(HashMap::from([(
                "#value".to_string(),
                Value::Integer(value),
            )]));
            let rendered = self.render_nodes(body, mode, out);
            self.scope.pop();
            rendered?;

            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
        Ok(())
    }
}

/// `(start, stop, step)`; the step defaults toward `stop`.
fn parse_range(text: &str) -> Option<(i64, i64, i64)> {
    let caps = RANGE.captures(text)?;
    let start = caps[1].parse::<i64>().ok()?;
    let stop = caps[2].parse::<i64>().ok()?;
    let step = match caps.get(3) {
        Some(step) => step.as_str().parse::<i64>().ok()?,
        None if start <= stop => 1,
        None => -1,
    };
    Some((start, stop, step))
}

/// Renders `template` against `vars` into `out`.
pub fn render(template: &Template, syntax: &Syntax, vars: &dyn Vars, out: &mut dyn Write) -> Result<()> {
    Evaluator::new(syntax, vars).render(template, out)
}

pub fn render_to_string(template: &Template, syntax: &Syntax, vars: &dyn Vars) -> Result<String> {
    let mut buffer = Vec::new();
    render(template, syntax, vars, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::Render(io::Error::new(io::ErrorKind::InvalidData, e)))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::context::{record, Context};
    use crate::parser::Parser;
    use crate::source::{MemoryLoader, StrSource};

    fn compile(text: &str) -> Template {
        let syntax = Syntax::default();
        let loader = MemoryLoader::new();
        Parser::new(&syntax, &loader)
            .parse_source(Path::new("t.html"), Box::new(StrSource::new(text)))
            .unwrap()
    }

    fn run(text: &str, ctx: &Context) -> String {
        render_to_string(&compile(text), &Syntax::default(), ctx).unwrap()
    }

    fn count(range: &str, ctx: &Context) -> String {
        run(&format!("<!--@FOR({range})-->{{#value}} <!--@END_FOR-->\n"), ctx)
    }

    #[test]
    fn else_if_chain() {
        let template = "<!--@IF({n} > 1)-->\nmany\n<!--@ELSE({n} == 1)-->\none\n<!--@ELSE-->\nnone\n<!--@END_IF-->\n";
        let mut ctx = Context::new();
        ctx.set("n", 2);
        assert_eq!(run(template, &ctx), "many\n");
        ctx.set("n", 1);
        assert_eq!(run(template, &ctx), "one\n");
        ctx.set("n", 0);
        assert_eq!(run(template, &ctx), "none\n");
    }

    #[test]
    fn branch_state_is_per_sibling_list() {
        let template =
            "<!--@IF(1)-->\n<!--@IF(0)-->\nx\n<!--@END_IF-->\nA\n<!--@ELSE-->\nB\n<!--@END_IF-->\n";
        assert_eq!(run(template, &Context::new()), "A\n");
    }

    #[test]
    fn loop_injects_fields_and_meta_keys() {
        let mut ctx = Context::new();
        ctx.set("name", "outer");
        ctx.set(
            "rows",
            Value::List(vec![record([("name", "a")]), record([("name", "b")])]),
        );
        let template = "<!--@LOOP(rows)-->\n{#rows_index + 1}/{#rows_count} {name}\n<!--@END_LOOP-->\n{name}\n";
        assert_eq!(run(template, &ctx), "1/2 a\n2/2 b\nouter\n");
    }

    #[test]
    fn loop_wraps_scalars() {
        let mut ctx = Context::new();
        ctx.set("items", vec!["x", "y"]);
        assert_eq!(
            run("<!--@LOOP(items)-->{#value},<!--@END_LOOP-->\n", &ctx),
            "x,y,\n"
        );
    }

    #[test]
    fn empty_or_missing_loop_runs_else() {
        let template = "<!--@LOOP(rows)-->\nrow\n<!--@ELSE-->\nempty\n<!--@END_LOOP-->\n";
        let mut ctx = Context::new();
        assert_eq!(run(template, &ctx), "empty\n");
        ctx.set("rows", Vec::<Value>::new());
        assert_eq!(run(template, &ctx), "empty\n");
        ctx.set("rows", vec![1]);
        assert_eq!(run(template, &ctx), "row\n");
    }

    #[test]
    fn for_ranges() {
        let mut ctx = Context::new();
        assert_eq!(count("1,3", &ctx), "1 2 3 \n");
        assert_eq!(count("3,1", &ctx), "3 2 1 \n");
        assert_eq!(count("1, 10, 4", &ctx), "1 5 9 \n");
        assert_eq!(count("-1,-2", &ctx), "-1 -2 \n");
        ctx.set("n", 2);
        assert_eq!(count("{n},1", &ctx), "2 1 \n");
    }

    #[test]
    fn for_leniency() {
        let ctx = Context::new();
        assert_eq!(count("abc", &ctx), "\n");
        assert_eq!(count("1,3,0", &ctx), "\n");
        assert_eq!(count("1,3,-1", &ctx), "\n");
        assert_eq!(count("{missing},3", &ctx), "\n");
    }

    #[test]
    fn for_stops_at_integer_limit() {
        let ctx = Context::new();
        let range = format!("{},{}", i64::MAX - 1, i64::MAX);
        assert_eq!(count(&range, &ctx), "9223372036854775806 9223372036854775807 \n");
        let range = format!("{},{}", i64::MIN + 1, i64::MIN);
        assert_eq!(count(&range, &ctx), "-9223372036854775807 -9223372036854775808 \n");
    }

    #[test]
    fn for_values_beyond_float_precision_are_exact() {
        assert_eq!(
            count("9007199254740993,9007199254740993", &Context::new()),
            "9007199254740993 \n"
        );
    }

    #[test]
    fn nobreak_strips_line_breaks() {
        let template = "<!--@NOBREAK-->\na\r\nb\n<!--@END_NOBREAK-->\nc\n";
        assert_eq!(run(template, &Context::new()), "ab\nc\n");
    }

    #[test]
    fn literal_is_verbatim() {
        let mut ctx = Context::new();
        ctx.set("x", 1);
        let template = "<!--@LITERAL-->\n{x} <!--@IF(y)-->\n<!--@END_LITERAL-->\n{x}\n";
        assert_eq!(run(template, &ctx), "{x} <!--@IF(y)-->\n1\n");
    }

    #[test]
    fn embed_applies_to_substituted_text() {
        let mut ctx = Context::new();
        ctx.set("flag", "1");
        ctx.set("v", "1");
        let template = "<!--@EMBED(html)-->\n<input name=\"flag\" type=\"checkbox\" value=\"{v}\">\n<!--@END_EMBED-->\n<input name=\"flag\" type=\"checkbox\" value=\"1\">\n";
        assert_eq!(
            run(template, &ctx),
            "<input name=\"flag\" type=\"checkbox\" value=\"1\" checked>\n<input name=\"flag\" type=\"checkbox\" value=\"1\">\n"
        );
    }

    #[test]
    fn included_template_shares_context() {
        let syntax = Syntax::default();
        let loader = MemoryLoader::new()
            .with("a.html", "<!--@LOOP(names)-->\n<!--@INCLUDE(b.html)-->\n<!--@END_LOOP-->\n")
            .with("b.html", "hi {#value}\n");
        let template = Parser::new(&syntax, &loader)
            .parse_file(Path::new("a.html"))
            .unwrap();
        let mut ctx = Context::new();
        ctx.set("names", vec!["ann", "bob"]);
        assert_eq!(
            render_to_string(&template, &syntax, &ctx).unwrap(),
            "hi ann\nhi bob\n"
        );
    }

    #[test]
    fn template_renders_repeatedly() {
        let template = compile("<!--@IF(x)-->\nyes\n<!--@ELSE-->\nno\n<!--@END_IF-->\n");
        let syntax = Syntax::default();
        let mut ctx = Context::new();
        ctx.set("x", 1);
        assert_eq!(render_to_string(&template, &syntax, &ctx).unwrap(), "yes\n");
        ctx.set("x", 0);
        assert_eq!(render_to_string(&template, &syntax, &ctx).unwrap(), "no\n");
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_failure_is_a_render_error() {
        let template = compile("text\n");
        let err = render(&template, &Syntax::default(), &Context::new(), &mut Broken).unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }
}
