//! Substitution markers: `{name[op number][,width][:opts|/opts]}`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::context::{Value, Vars};
use crate::syntax::{Syntax, DECIMAL};

static LEADING_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{DECIMAL}")).expect("valid decimal pattern"));
static WHOLE_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{DECIMAL}$")).expect("valid decimal pattern"));
static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n").expect("valid line break pattern"));
static QUOTABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'\\]|&quot;"#).expect("valid quote pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(ArithOp::Add),
            '-' => Some(ArithOp::Sub),
            '*' => Some(ArithOp::Mul),
            '/' => Some(ArithOp::Div),
            '%' => Some(ArithOp::Rem),
            _ => None,
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            ArithOp::Add => lhs + rhs,
            ArithOp::Sub => lhs - rhs,
            ArithOp::Mul => lhs * rhs,
            ArithOp::Div if rhs == 0.0 => 0.0,
            ArithOp::Div => lhs / rhs,
            ArithOp::Rem if rhs == 0.0 => 0.0,
            // floored, so the result takes the sign of the divisor
            ArithOp::Rem => lhs - rhs * (lhs / rhs).floor(),
        }
    }
}

/// One parsed substitution marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub name: String,
    pub arith: Option<(ArithOp, f64)>,
    /// Decimal places for thousands-grouped output.
    pub comma: Option<usize>,
    /// Option letters: `b` line breaks to `<br />`, `q` quote escaping.
    pub options: String,
}

impl Placeholder {
    pub(crate) fn from_captures(caps: &Captures<'_>) -> Self {
        let arith = caps.get(2).and_then(|m| {
            let text = m.as_str().trim_start();
            let mut chars = text.chars();
            let op = chars.next().and_then(ArithOp::from_char)?;
            let operand = chars.as_str().trim().parse::<f64>().ok()?;
            Some((op, operand))
        });
        let comma = caps
            .get(3)
            .map(|m| m.as_str()[1..].parse::<usize>().unwrap_or(0));
        let options = caps
            .get(4)
            .map(|m| m.as_str()[1..].to_string())
            .unwrap_or_default();
        Self {
            name: caps[1].to_string(),
            arith,
            comma,
            options,
        }
    }

    /// True for a bare `{name}` with no arithmetic or formatting.
    pub fn is_plain(&self) -> bool {
        self.arith.is_none() && self.comma.is_none() && self.options.is_empty()
    }

    pub fn render(&self, vars: &dyn Vars) -> String {
        let mut value = vars.var(&self.name).map(Value::to_text).unwrap_or_default();

        if let Some((op, operand)) = self.arith {
            let lhs = leading_decimal(&value).unwrap_or(0.0);
            value = Value::Number(op.apply(lhs, operand)).to_text();
        }

        value = match self.comma {
            Some(places) => group_thousands(leading_decimal(&value).unwrap_or(0.0), places),
            None => trim_zero_fraction(value),
        };

        if self.options.contains('b') {
            value = LINE_BREAK
                .replace_all(&value, |caps: &Captures<'_>| format!("<br />{}", &caps[0]))
                .into_owned();
        }
        if self.options.contains('q') {
            value = QUOTABLE
                .replace_all(&value, |caps: &Captures<'_>| format!("\\{}", &caps[0]))
                .into_owned();
            value = value.replace('\r', "\\r").replace('\n', "\\n");
        }
        value
    }
}

/// Replaces every substitution marker in `text`.
pub fn substitute(text: &str, syntax: &Syntax, vars: &dyn Vars) -> String {
    syntax
        .replace()
        .replace_all(text, |caps: &Captures<'_>| {
            Placeholder::from_captures(caps).render(vars)
        })
        .into_owned()
}

fn leading_decimal(text: &str) -> Option<f64> {
    LEADING_DECIMAL
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// `"3.0"` becomes `"3"`; anything else is left alone.
fn trim_zero_fraction(value: String) -> String {
    if !WHOLE_DECIMAL.is_match(&value) {
        return value;
    }
    match value.split_once('.') {
        Some((int, frac)) if frac.bytes().all(|b| b == b'0') => match int {
            "" | "-" => "0".to_string(),
            _ => int.to_string(),
        },
        _ => value,
    }
}

fn group_thousands(number: f64, places: usize) -> String {
    let fixed = format!("{number:.places$}");
    let (int, frac) = match fixed.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (fixed.as_str(), None),
    };
    let (sign, digits) = match int.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", int),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn render(text: &str, ctx: &Context) -> String {
        substitute(text, &Syntax::default(), ctx)
    }

    #[test]
    fn numbers_drop_zero_fraction() {
        let mut ctx = Context::new();
        ctx.set("x", 3.0);
        assert_eq!(render("{x}", &ctx), "3");
        ctx.set("x", 3.5);
        assert_eq!(render("{x}", &ctx), "3.5");
        ctx.set("x", "4.00");
        assert_eq!(render("{x}", &ctx), "4");
        ctx.set("x", "4.50");
        assert_eq!(render("{x}", &ctx), "4.50");
    }

    #[test]
    fn comma_grouping() {
        let mut ctx = Context::new();
        ctx.set("x", 1234.5);
        assert_eq!(render("{x,2}", &ctx), "1,234.50");
        ctx.set("x", 1234567);
        assert_eq!(render("{x,}", &ctx), "1,234,567");
        ctx.set("x", -999999.5);
        assert_eq!(render("{x,1}", &ctx), "-999,999.5");
        ctx.set("x", 12);
        assert_eq!(render("{x,0}", &ctx), "12");
    }

    #[test]
    fn arithmetic_offset() {
        let mut ctx = Context::new();
        ctx.set("#items_index", 0);
        assert_eq!(render("{#items_index + 1}", &ctx), "1");
        ctx.set("n", "10 apples");
        assert_eq!(render("{n*2.5}", &ctx), "25");
        assert_eq!(render("{n / 4}", &ctx), "2.5");
        assert_eq!(render("{n % 3}", &ctx), "1");
        assert_eq!(render("{missing - 1}", &ctx), "-1");
    }

    #[test]
    fn line_break_and_quote_options() {
        let mut ctx = Context::new();
        ctx.set("t", "a\nb");
        assert_eq!(render("{t:b}", &ctx), "a<br />\nb");
        ctx.set("t", "say \"hi\"\r\n");
        assert_eq!(render("{t/q}", &ctx), "say \\\"hi\\\"\\r\\n");
    }

    #[test]
    fn quote_option_escapes_apostrophes_backslashes_and_entities() {
        let mut ctx = Context::new();
        ctx.set("t", "it's a\\b");
        assert_eq!(render("{t/q}", &ctx), "it\\'s a\\\\b");
        ctx.set_html("t", "say \"hi\"");
        assert_eq!(render("{t/q}", &ctx), "say \\&quot;hi\\&quot;");
    }

    #[test]
    fn missing_variable_renders_empty() {
        assert_eq!(render("[{nothing}]", &Context::new()), "[]");
    }

    #[test]
    fn non_markers_are_left_alone() {
        let ctx = Context::new();
        assert_eq!(render("{ x }, {1}, {}", &ctx), "{ x }, {1}, {}");
    }
}
