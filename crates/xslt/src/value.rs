//! Values produced by expressions.
use arbor_tree::NodeRef;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub enum Value<'a> {
    /// Nodes in document order, without duplicates.
    NodeSet(Vec<NodeRef<'a>>),
    String(String),
    Number(f64),
    Boolean(bool),
    /// An object owned by an extension, opaque to the engine.
    External(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::NodeSet(nodes) => f.debug_tuple("NodeSet").field(nodes).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            Value::External(_) => f.write_str("External(..)"),
        }
    }
}

impl<'a> Value<'a> {
    pub fn empty() -> Self {
        Value::NodeSet(Vec::new())
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::NodeSet(nodes) => nodes
                .first()
                .map(|n| n.string_value().into_owned())
                .unwrap_or_default(),
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
            Value::External(_) => String::new(),
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::String(s) => parse_number(s),
            Value::NodeSet(_) => parse_number(&self.as_string()),
            Value::External(_) => f64::NAN,
        }
    }

    pub fn as_boolean(&self) -> bool {
        match self {
            Value::NodeSet(nodes) => !nodes.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
            Value::External(_) => true,
        }
    }

    pub fn nodes(&self) -> Option<&[NodeRef<'a>]> {
        match self {
            Value::NodeSet(nodes) => Some(nodes),
            _ => None,
        }
    }

    pub fn into_nodes(self) -> Option<Vec<NodeRef<'a>>> {
        match self {
            Value::NodeSet(nodes) => Some(nodes),
            _ => None,
        }
    }
}

impl From<&str> for Value<'_> {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value<'_> {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value<'_> {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value<'_> {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl<'a> From<Vec<NodeRef<'a>>> for Value<'a> {
    fn from(nodes: Vec<NodeRef<'a>>) -> Self {
        Value::NodeSet(nodes)
    }
}

/// XPath 1.0 number to string conversion.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// XPath 1.0 string to number conversion: optional minus, digits, optional
/// fraction; anything else is NaN.
pub fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    let digits = t.strip_prefix('-').unwrap_or(t);
    let valid = !digits.is_empty()
        && digits != "."
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1;
    if valid { t.parse().unwrap_or(f64::NAN) } else { f64::NAN }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(parse_number(" 12.5 "), 12.5);
        assert_eq!(parse_number("-.5"), -0.5);
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("").is_nan());
    }

    #[test]
    fn test_boolean_conversion() {
        assert!(!Value::empty().as_boolean());
        assert!(Value::from("x").as_boolean());
        assert!(!Value::from(f64::NAN).as_boolean());
        assert_eq!(Value::from(true).as_number(), 1.0);
    }
}
