//! Conditions for `IF`, `ELSE` and the `?` shorthand.
//!
//! The grammar is closed: substitution markers or bare names, decimal
//! numbers, single-quoted strings, `(x =~ /re/flags)` match tests, unary
//! `- ~ !`, arithmetic and bitwise `+ - * / % & | ^ << >>`, comparisons
//! `== != > >= < <=`, logic `and or xor && ||`, and parentheses. Anything
//! else is rejected at compile time. The result is a small AST that is
//! evaluated directly against the render-time variables.
//!
//! Match patterns use the `regex` crate dialect. It has no look-around and
//! no backreferences, so patterns using them fail to compile.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::context::{Value, Vars};
use crate::error::{Error, Result};
use crate::format::Placeholder;
use crate::syntax::Syntax;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d*?\.\d+|\d+\.?)").expect("valid number pattern"));
static STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^'((?:[^'\\]|\\.)*)'").expect("valid string pattern"));
static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#?[A-Za-z_][A-Za-z0-9_]*").expect("valid name pattern"));
static MATCH_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*=~\s*/((?:[^/\\]|\\.)+)/([imsx]*)\s*\)").expect("valid match pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    BitNot,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

/// Binary operator levels, loosest first.
const LEVELS: &[&[BinOp]] = &[
    &[BinOp::Or, BinOp::Xor],
    &[BinOp::And],
    &[BinOp::Eq, BinOp::Ne],
    &[BinOp::Lt, BinOp::Le, BinOp::Gt, BinOp::Ge],
    &[BinOp::BitOr, BinOp::BitXor],
    &[BinOp::BitAnd],
    &[BinOp::Shl, BinOp::Shr],
    &[BinOp::Add, BinOp::Sub],
    &[BinOp::Mul, BinOp::Div, BinOp::Rem],
];

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    /// Bare name or plain `{name}` marker.
    Var(String),
    /// Marker with arithmetic or formatting, evaluated to its rendered text.
    Marker(Placeholder),
    Match {
        operand: Box<Expr>,
        regex: Regex,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone)]
enum Token {
    Operand(Expr),
    Op(&'static str),
    LParen,
    RParen,
}

/// A validated condition, ready to evaluate.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn compile(raw: &str, syntax: &Syntax) -> Result<Self> {
        let tokens = tokenize(raw, syntax)?;
        let mut parser = ExprParser {
            raw,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_level(0)?;
        if let Some(tok) = parser.tokens.get(parser.pos) {
            return Err(invalid(raw, format!("unexpected {tok:?}")));
        }
        tracing::trace!(condition = raw, "compiled condition");
        Ok(Self {
            source: raw.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn eval(&self, vars: &dyn Vars) -> Value {
        eval(&self.expr, vars)
    }

    pub fn is_true(&self, vars: &dyn Vars) -> bool {
        self.eval(vars).is_truthy()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn invalid(raw: &str, reason: impl Into<String>) -> Error {
    Error::InvalidExpression {
        expr: raw.to_string(),
        reason: reason.into(),
    }
}

/// Operators, longest spelling first.
const OPERATORS: &[&str] = &[
    "<<", ">>", "==", "!=", ">=", "<=", "&&", "||", "+", "-", "*", "/", "%", "&", "|", "^", "~",
    "!", "<", ">",
];

fn tokenize(raw: &str, syntax: &Syntax) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = raw;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        if rest.starts_with('(') {
            if let Some((token, len)) = match_test(&rest[1..], raw, syntax)? {
                tokens.push(token);
                rest = &rest[1 + len..];
                continue;
            }
            tokens.push(Token::LParen);
            rest = &rest[1..];
            continue;
        }
        if rest.starts_with(')') {
            tokens.push(Token::RParen);
            rest = &rest[1..];
            continue;
        }

        if let Some((token, len)) = operand(rest, syntax) {
            tokens.push(token);
            rest = &rest[len..];
            continue;
        }

        if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(Token::Op(*op));
            rest = &rest[op.len()..];
            continue;
        }

        return Err(invalid(raw, format!("unsupported syntax at `{rest}`")));
    }

    Ok(tokens)
}

/// Marker, number, string, name or keyword operator at the start of `rest`.
fn operand(rest: &str, syntax: &Syntax) -> Option<(Token, usize)> {
    if let Some(caps) = syntax.replace_anchored().captures(rest) {
        let len = caps[0].len();
        let placeholder = Placeholder::from_captures(&caps);
        let expr = if placeholder.is_plain() {
            Expr::Var(placeholder.name)
        } else {
            Expr::Marker(placeholder)
        };
        return Some((Token::Operand(expr), len));
    }
    if let Some(m) = NUMBER.find(rest) {
        let literal = match m.as_str().parse::<i64>() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::Number(m.as_str().parse::<f64>().ok()?),
        };
        return Some((Token::Operand(Expr::Literal(literal)), m.end()));
    }
    if let Some(caps) = STRING.captures(rest) {
        let s = unescape(&caps[1]);
        return Some((Token::Operand(Expr::Literal(Value::String(s))), caps[0].len()));
    }
    if let Some(m) = IDENT.find(rest) {
        let token = match m.as_str() {
            "and" => Token::Op("and"),
            "or" => Token::Op("or"),
            "xor" => Token::Op("xor"),
            name => Token::Operand(Expr::Var(name.to_string())),
        };
        return Some((token, m.end()));
    }
    None
}

/// Tries `operand =~ /re/flags)` right after an opening parenthesis.
fn match_test(rest: &str, raw: &str, syntax: &Syntax) -> Result<Option<(Token, usize)>> {
    let lead = rest.len() - rest.trim_start().len();
    let (subject, len) = match operand(&rest[lead..], syntax) {
        Some((
            Token::Operand(
                expr @ (Expr::Var(_) | Expr::Marker(_) | Expr::Literal(Value::String(_))),
            ),
            len,
        )) => (expr, len),
        _ => return Ok(None),
    };
    let after = &rest[lead + len..];
    let Some(caps) = MATCH_TAIL.captures(after) else {
        return Ok(None);
    };

    let flags = &caps[2];
    let regex = RegexBuilder::new(&caps[1].replace("\\/", "/"))
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|e| invalid(raw, e.to_string()))?;

    let expr = Expr::Match {
        operand: Box::new(subject),
        regex,
    };
    Ok(Some((Token::Operand(expr), lead + len + caps[0].len())))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn bin_op(op: &str) -> Option<BinOp> {
    Some(match op {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Rem,
        "&" => BinOp::BitAnd,
        "|" => BinOp::BitOr,
        "^" => BinOp::BitXor,
        "<<" => BinOp::Shl,
        ">>" => BinOp::Shr,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "and" | "&&" => BinOp::And,
        "or" | "||" => BinOp::Or,
        "xor" => BinOp::Xor,
        _ => return None,
    })
}

struct ExprParser<'a> {
    raw: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_level(&mut self, level: usize) -> Result<Expr> {
        if level == LEVELS.len() {
            return self.parse_unary();
        }
        let mut lhs = self.parse_level(level + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => match bin_op(op) {
                    Some(op) if LEVELS[level].contains(&op) => op,
                    _ => break,
                },
                _ => break,
            };
            self.consume();
            let rhs = self.parse_level(level + 1)?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Op("-")) => UnaryOp::Neg,
            Some(Token::Op("~")) => UnaryOp::BitNot,
            Some(Token::Op("!")) => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.consume();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::LParen) => {
                let expr = self.parse_level(0)?;
                match self.consume() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(invalid(self.raw, "unbalanced parentheses")),
                }
            }
            Some(Token::Operand(expr)) => Ok(expr),
            Some(tok) => Err(invalid(self.raw, format!("unexpected {tok:?}"))),
            None => Err(invalid(self.raw, "unexpected end of expression")),
        }
    }
}

pub fn eval(expr: &Expr, vars: &dyn Vars) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Var(name) => vars
            .var(name)
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())),
        Expr::Marker(placeholder) => Value::String(placeholder.render(vars)),
        Expr::Match { operand, regex } => {
            let subject = eval(operand, vars).to_text();
            Value::from(regex.is_match(&subject))
        }
        Expr::Unary(op, operand) => {
            let value = eval(operand, vars);
            match op {
                UnaryOp::Neg => Value::Number(-number(&value)),
                UnaryOp::BitNot => Value::Integer(!integer(&value)),
                UnaryOp::Not => Value::from(!value.is_truthy()),
            }
        }
        Expr::Binary(lhs, op, rhs) => {
            let l = eval(lhs, vars);
            match op {
                BinOp::And if !l.is_truthy() => return Value::from(false),
                BinOp::Or if l.is_truthy() => return Value::from(true),
                _ => {}
            }
            let r = eval(rhs, vars);
            binary(&l, *op, &r)
        }
    }
}

fn number(value: &Value) -> f64 {
    value.as_number().unwrap_or(0.0)
}

fn integer(value: &Value) -> i64 {
    match value {
        Value::Integer(n) => *n,
        other => number(other).trunc() as i64,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    if let (Value::Integer(a), Value::Integer(b)) = (l, r) {
        return Some(a.cmp(b));
    }
    match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(l.to_text().cmp(&r.to_text())),
    }
}

fn binary(l: &Value, op: BinOp, r: &Value) -> Value {
    use crate::format::ArithOp;

    let arith = |op: ArithOp| Value::Number(op.apply(number(l), number(r)));
    let bits = |f: fn(i64, i64) -> i64| Value::Integer(f(integer(l), integer(r)));

    match op {
        BinOp::Add => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => Value::Number(a + b),
            _ => Value::String(l.to_text() + &r.to_text()),
        },
        BinOp::Sub => arith(ArithOp::Sub),
        BinOp::Mul => arith(ArithOp::Mul),
        BinOp::Div => arith(ArithOp::Div),
        BinOp::Rem => arith(ArithOp::Rem),
        BinOp::BitAnd => bits(|a, b| a & b),
        BinOp::BitOr => bits(|a, b| a | b),
        BinOp::BitXor => bits(|a, b| a ^ b),
        BinOp::Shl => bits(|a, b| {
            u32::try_from(b)
                .ok()
                .and_then(|b| a.checked_shl(b))
                .unwrap_or(0)
        }),
        BinOp::Shr => bits(|a, b| {
            u32::try_from(b)
                .ok()
                .and_then(|b| a.checked_shr(b))
                .unwrap_or(0)
        }),
        BinOp::Eq => Value::from(compare(l, r) == Some(Ordering::Equal)),
        BinOp::Ne => Value::from(compare(l, r) != Some(Ordering::Equal)),
        BinOp::Lt => Value::from(compare(l, r) == Some(Ordering::Less)),
        BinOp::Le => Value::from(matches!(
            compare(l, r),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinOp::Gt => Value::from(compare(l, r) == Some(Ordering::Greater)),
        BinOp::Ge => Value::from(matches!(
            compare(l, r),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinOp::And => Value::from(l.is_truthy() && r.is_truthy()),
        BinOp::Or => Value::from(l.is_truthy() || r.is_truthy()),
        BinOp::Xor => Value::from(l.is_truthy() != r.is_truthy()),
    }
}
