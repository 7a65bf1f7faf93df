use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// A template variable.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Number(f64),
    /// Iterated by `LOOP`; elements are usually records.
    List(Vec<Value>),
    Record(HashMap<String, Value>),
}

impl Value {
    /// Non-empty strings and non-zero numbers are true. Lists and records are
    /// true when they have at least one entry.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::String(s) => !s.is_empty(),
            Value::Integer(n) => *n != 0,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::List(items) => !items.is_empty(),
            Value::Record(fields) => !fields.is_empty(),
        }
    }

    /// Numeric view of the value. Strings qualify only when the whole string
    /// is a decimal literal.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Number(n) => Some(*n),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                s.parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Text used when the value is substituted. Lists and records have no
    /// textual form and produce the empty string.
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(n) => n.to_string(),
            Value::Number(n) => n.to_string(),
            Value::List(_) | Value::Record(_) => String::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or(Value::Number(n as f64), Value::Integer)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(i64::from(b))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(fields: HashMap<String, Value>) -> Self {
        Value::Record(fields)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::String(String::new()),
            serde_json::Value::Bool(b) => b.into(),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Builds a record value from `(name, value)` pairs.
pub fn record<K, V, I>(fields: I) -> Value
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    Value::Record(
        fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}

/// Replaces `& " < >` with their entities in every string inside `value`.
pub fn escape_html(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(
            s.replace('&', "&amp;")
                .replace('"', "&quot;")
                .replace('<', "&lt;")
                .replace('>', "&gt;"),
        ),
        Value::List(items) => Value::List(items.into_iter().map(escape_html).collect()),
        Value::Record(fields) => Value::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k, escape_html(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Read access to variables during rendering.
pub trait Vars {
    fn var(&self, name: &str) -> Option<&Value>;
}

/// The variables a template is rendered against. Serializes as a JSON
/// object that [`Context::from_json`] reads back.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Context {
    vars: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` verbatim.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Sets `name` with HTML entities escaped in every contained string.
    pub fn set_html(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), escape_html(value.into()));
    }

    /// Pushes onto the list stored under `name`. Does nothing when `name` is
    /// missing or not a list.
    pub fn append(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.vars.get_mut(name) {
            Some(Value::List(items)) => {
                items.push(value.into());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Builds a context from a JSON object. Other JSON values give an empty
    /// context.
    pub fn from_json(json: serde_json::Value) -> Self {
        match Value::from(json) {
            Value::Record(vars) => Self { vars },
            _ => Self::default(),
        }
    }
}

impl Vars for Context {
    fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
