//! Form-state synchronization for text rendered inside `EMBED` blocks.
//!
//! `<input>`, `<textarea>` and `<option>` elements are rewritten so their
//! value, `checked` or `selected` state reflects the variable named by the
//! element's `id` (or `name`). The one piece of state carried between text
//! chunks is the name of the `<select>` currently open.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex, RegexBuilder};

use crate::context::{Value, Vars};

/// One character of an opening tag, quoted attribute values taken whole.
const TAG_CHAR: &str = r#"(?:[^"'>]|"[^"]*"|'[^']*')"#;

static FORM_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(&format!(
        r"<(?:input|/?select)\b{TAG_CHAR}*>|<option\b{TAG_CHAR}*>.*?(?:</option>|[\r\n])|<textarea\b{TAG_CHAR}*>.*?</textarea>"
    ))
    .case_insensitive(true)
    .dot_matches_new_line(true)
    .build()
    .expect("valid form element pattern")
});
static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^<{TAG_CHAR}*>")).expect("valid open tag pattern"));
static ELEMENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(/?[A-Za-z]+)").expect("valid element name pattern"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`/]+)))?"#)
        .expect("valid attribute pattern")
});

const TEXTAREA_CLOSE: usize = "</textarea>".len();
const OPTION_CLOSE: &str = "</option>";

/// Render-time form state; one per render call.
#[derive(Debug, Default)]
pub struct FormState {
    select: Option<String>,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the `<select>` whose options are being synchronized.
    pub fn open_select(&self) -> Option<&str> {
        self.select.as_deref()
    }

    /// Rewrites every form element in `text`. `verbose` spells boolean
    /// attributes out as `checked="checked"`.
    pub fn embed(&mut self, text: &str, vars: &dyn Vars, verbose: bool) -> String {
        FORM_ELEMENT
            .replace_all(text, |caps: &Captures<'_>| self.element(&caps[0], vars, verbose))
            .into_owned()
    }

    fn element(&mut self, element: &str, vars: &dyn Vars, verbose: bool) -> String {
        let open = open_tag(element);
        let name = ELEMENT_NAME
            .captures(open)
            .map(|caps| caps[1].to_ascii_lowercase())
            .unwrap_or_default();

        match name.as_str() {
            "input" => input(element, vars, verbose),
            "textarea" => textarea(element, vars),
            "select" => {
                if self.select.is_none() {
                    if let Some(id) = element_id(open) {
                        let id = id.strip_suffix("[]").unwrap_or(id);
                        self.select = Some(id.to_string());
                    }
                }
                element.to_string()
            }
            "/select" => {
                self.select = None;
                element.to_string()
            }
            "option" => match &self.select {
                Some(select) => option(element, select, vars, verbose),
                None => element.to_string(),
            },
            _ => element.to_string(),
        }
    }
}

fn input(element: &str, vars: &dyn Vars, verbose: bool) -> String {
    let open = open_tag(element);
    let Some(value) = element_id(open).and_then(|id| lookup(vars, id)) else {
        return element.to_string();
    };

    let kind = attribute_value(open, "type").unwrap_or("text");
    if kind.eq_ignore_ascii_case("radio") || kind.eq_ignore_ascii_case("checkbox") {
        let own = attribute_value(open, "value").unwrap_or("");
        if selects(value, own) {
            set_attribute(element, "checked", verbose.then_some("checked"))
        } else {
            remove_attribute(element, "checked")
        }
    } else {
        set_attribute(element, "value", Some(&value.to_text()))
    }
}

fn textarea(element: &str, vars: &dyn Vars) -> String {
    let open = open_tag(element);
    let Some(value) = element_id(open).and_then(|id| lookup(vars, id)) else {
        return element.to_string();
    };
    let close = &element[element.len() - TEXTAREA_CLOSE..];
    format!("{open}{}{close}", value.to_text())
}

fn option(element: &str, select: &str, vars: &dyn Vars, verbose: bool) -> String {
    let Some(current) = lookup(vars, select).filter(|v| v.is_truthy()) else {
        return element.to_string();
    };
    let open = open_tag(element);
    let own = match attribute_value(open, "value") {
        Some(value) if !value.is_empty() => value,
        _ => option_text(&element[open.len()..]),
    };

    if selects(current, own) {
        set_attribute(element, "selected", verbose.then_some("selected"))
    } else {
        remove_attribute(element, "selected")
    }
}

/// Label of an `<option>` without its closing tag or line break.
fn option_text(rest: &str) -> &str {
    let cut = rest.len().saturating_sub(OPTION_CLOSE.len());
    match rest.get(cut..) {
        Some(tail) if tail.eq_ignore_ascii_case(OPTION_CLOSE) => &rest[..cut],
        _ => rest.trim_end_matches(['\r', '\n']),
    }
}

/// Lists select by membership, scalars by equality of their text.
fn selects(value: &Value, candidate: &str) -> bool {
    match value {
        Value::List(items) => items.iter().any(|item| item.to_text() == candidate),
        other => other.to_text() == candidate,
    }
}

/// Variable for a control name, trying `opts[]` as `opts` too.
fn lookup<'v>(vars: &'v dyn Vars, id: &str) -> Option<&'v Value> {
    vars.var(id)
        .or_else(|| id.strip_suffix("[]").and_then(|name| vars.var(name)))
}

fn open_tag(element: &str) -> &str {
    OPEN_TAG.find(element).map_or(element, |m| m.as_str())
}

fn element_id(open: &str) -> Option<&str> {
    attribute_value(open, "id")
        .filter(|id| !id.is_empty())
        .or_else(|| attribute_value(open, "name").filter(|name| !name.is_empty()))
}

struct Attribute<'t> {
    /// Includes the whitespace before the name.
    span: Range<usize>,
    value: Option<&'t str>,
}

fn find_attribute<'t>(open: &'t str, name: &str) -> Option<Attribute<'t>> {
    ATTRIBUTE.captures_iter(open).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        let whole = caps.get(0)?;
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str());
        Some(Attribute {
            span: whole.range(),
            value,
        })
    })
}

/// Bare attributes read as the empty string.
fn attribute_value<'t>(open: &'t str, name: &str) -> Option<&'t str> {
    find_attribute(open, name).map(|attr| attr.value.unwrap_or(""))
}

/// Replaces `name` in the opening tag, or adds it before `>` / `/>`.
fn set_attribute(element: &str, name: &str, value: Option<&str>) -> String {
    let open = open_tag(element);
    let text = match value {
        Some(value) => format!(" {name}=\"{}\"", value.replace('"', "&quot;")),
        None => format!(" {name}"),
    };
    let span = match find_attribute(open, name) {
        Some(attr) => attr.span,
        None => {
            let at = insertion_point(open);
            at..at
        }
    };
    let mut out = String::with_capacity(element.len() + text.len());
    out.push_str(&element[..span.start]);
    out.push_str(&text);
    out.push_str(&element[span.end..]);
    out
}

fn remove_attribute(element: &str, name: &str) -> String {
    match find_attribute(open_tag(element), name) {
        Some(attr) => format!("{}{}", &element[..attr.span.start], &element[attr.span.end..]),
        None => element.to_string(),
    }
}

fn insertion_point(open: &str) -> usize {
    let inner = &open[..open.len().saturating_sub(1)];
    match inner.trim_end().strip_suffix('/') {
        Some(before_slash) => before_slash.trim_end().len(),
        None => inner.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn embed(text: &str, ctx: &Context, verbose: bool) -> String {
        FormState::new().embed(text, ctx, verbose)
    }

    #[test]
    fn checkbox_follows_value() {
        let tag = r#"<input id="flag" type="checkbox" value="1">"#;
        let mut ctx = Context::new();
        ctx.set("flag", "1");
        assert_eq!(
            embed(tag, &ctx, true),
            r#"<input id="flag" type="checkbox" value="1" checked="checked">"#
        );
        assert_eq!(
            embed(tag, &ctx, false),
            r#"<input id="flag" type="checkbox" value="1" checked>"#
        );

        ctx.set("flag", "0");
        assert_eq!(embed(tag, &ctx, true), tag);
        assert_eq!(
            embed(r#"<input id="flag" type="checkbox" value="1" checked>"#, &ctx, true),
            tag
        );
    }

    #[test]
    fn radio_group_by_name() {
        let mut ctx = Context::new();
        ctx.set("size", "m");
        let html = "<input type=radio name=size value=s checked />\n<input type=radio name=size value=m />";
        assert_eq!(
            embed(html, &ctx, true),
            "<input type=radio name=size value=s />\n<input type=radio name=size value=m checked=\"checked\" />"
        );
    }

    #[test]
    fn text_input_value_is_replaced_or_added() {
        let mut ctx = Context::new();
        ctx.set("title", "new");
        assert_eq!(
            embed(r#"<input type="text" name="title" value="old" />"#, &ctx, true),
            r#"<input type="text" name="title" value="new" />"#
        );
        assert_eq!(
            embed(r#"<INPUT name='title'>"#, &ctx, false),
            r#"<INPUT name='title' value="new">"#
        );
    }

    #[test]
    fn unknown_controls_are_untouched() {
        let html = r#"<input name="other" value="x"><textarea id="t">keep</textarea>"#;
        assert_eq!(embed(html, &Context::new(), true), html);
    }

    #[test]
    fn textarea_body_is_replaced() {
        let mut ctx = Context::new();
        ctx.set("note", "hello");
        assert_eq!(
            embed("<textarea id=\"note\" rows=\"3\">old\ntext</textarea>", &ctx, true),
            "<textarea id=\"note\" rows=\"3\">hello</textarea>"
        );
    }

    #[test]
    fn select_state_spans_calls() {
        let mut ctx = Context::new();
        ctx.set("color", "green");
        let mut form = FormState::new();

        let head = form.embed("<select name=\"color\">\n", &ctx, false);
        assert_eq!(head, "<select name=\"color\">\n");
        assert_eq!(form.open_select(), Some("color"));

        let options = form.embed(
            "<option value=\"red\" selected>Red</option>\n<option>green\n",
            &ctx,
            false,
        );
        assert_eq!(
            options,
            "<option value=\"red\">Red</option>\n<option selected>green\n"
        );

        form.embed("</select>", &ctx, false);
        assert_eq!(form.open_select(), None);
        assert_eq!(
            form.embed("<option>green</option>", &ctx, false),
            "<option>green</option>"
        );
    }

    #[test]
    fn multi_select_uses_membership() {
        let mut ctx = Context::new();
        ctx.set("tags", vec!["a", "c"]);
        let html = "<select name=\"tags[]\" multiple><option value=\"a\">A</option><option value=\"b\">B</option><option value=\"c\">C</option></select>";
        assert_eq!(
            embed(html, &ctx, true),
            "<select name=\"tags[]\" multiple><option value=\"a\" selected=\"selected\">A</option><option value=\"b\">B</option><option value=\"c\" selected=\"selected\">C</option></select>"
        );
    }
}
