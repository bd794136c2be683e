//! Runtime value model.
//!
//! Every value a script manipulates is a [`TagValue`]: a tagged union of
//! text, integer, floating number, boolean, null, binary blob, ordered list,
//! and ordered key/value map.  Values stringify canonically through
//! [`std::fmt::Display`]; a value whose canonical string parses back to an
//! equal value is said to round-trip, which is what literal type inference
//! relies on (see `argument.rs`).
//!
//! In-place mutation (`set`/`add`/`subtract`/`multiply`/`divide`) is a
//! capability, not a guarantee: the [`ValueOps`] trait implements each
//! operation per variant and rejects the rest with an
//! "unsupported operation" error.

use std::fmt;

use crate::error::ScriptError;

/// Canonical text spelling of the null value.
pub const NULL_TOKEN: &str = "&{NULL}";

// ── TagValue ──────────────────────────────────────────────────────────────────

/// A script runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Null,
    Binary(Vec<u8>),
    /// Ordered list of values; stringifies with `|` between elements.
    List(Vec<TagValue>),
    /// Insertion-ordered key/value map; stringifies as `key:value|key:value`.
    Map(Vec<(String, TagValue)>),
}

impl Default for TagValue {
    fn default() -> Self {
        TagValue::Text(String::new())
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Text(s) => write!(f, "{s}"),
            TagValue::Integer(n) => write!(f, "{n}"),
            TagValue::Number(x) => write!(f, "{x}"),
            TagValue::Boolean(b) => write!(f, "{b}"),
            TagValue::Null => write!(f, "{NULL_TOKEN}"),
            TagValue::Binary(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            TagValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            TagValue::Map(entries) => {
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                Ok(())
            }
        }
    }
}

impl TagValue {
    /// Registry name of this value's tag type.
    pub fn type_name(&self) -> &'static str {
        match self {
            TagValue::Text(_) => "text",
            TagValue::Integer(_) => "integer",
            TagValue::Number(_) => "number",
            TagValue::Boolean(_) => "boolean",
            TagValue::Null => "null",
            TagValue::Binary(_) => "binary",
            TagValue::List(_) => "list",
            TagValue::Map(_) => "map",
        }
    }

    /// An independent deep copy.
    ///
    /// Required whenever a stored value (a compiled literal, a cached chain
    /// result) could otherwise be handed to two consumers that both mutate it.
    pub fn duplicate(&self) -> TagValue {
        self.clone()
    }

    // ── Coercions ─────────────────────────────────────────────────────────────

    /// Coerce to `i64`.  Accepts integers, whole numbers, and integral text.
    pub fn to_integer(&self) -> Result<i64, ScriptError> {
        match self {
            TagValue::Integer(n) => Ok(*n),
            TagValue::Number(x) if x.fract() == 0.0 => Ok(*x as i64),
            TagValue::Text(s) => s.trim().parse().map_err(|_| ScriptError::Conversion {
                to: "integer",
                input: s.clone(),
            }),
            other => Err(ScriptError::Conversion { to: "integer", input: other.to_string() }),
        }
    }

    /// Coerce to `f64`.
    pub fn to_number(&self) -> Result<f64, ScriptError> {
        match self {
            TagValue::Integer(n) => Ok(*n as f64),
            TagValue::Number(x) => Ok(*x),
            TagValue::Text(s) => s.trim().parse().map_err(|_| ScriptError::Conversion {
                to: "number",
                input: s.clone(),
            }),
            other => Err(ScriptError::Conversion { to: "number", input: other.to_string() }),
        }
    }

    /// Coerce to `bool`.  Only booleans and the text `true`/`false` qualify.
    pub fn to_boolean(&self) -> Result<bool, ScriptError> {
        match self {
            TagValue::Boolean(b) => Ok(*b),
            TagValue::Text(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ScriptError::Conversion { to: "boolean", input: s.clone() }),
            },
            other => Err(ScriptError::Conversion { to: "boolean", input: other.to_string() }),
        }
    }

    /// Coerce to a list of values (lists pass through, text splits on `|`).
    pub fn to_list(&self) -> Result<Vec<TagValue>, ScriptError> {
        match self {
            TagValue::List(items) => Ok(items.clone()),
            TagValue::Text(s) => Ok(match TagValue::list_for(s) {
                TagValue::List(items) => items,
                _ => unreachable!(),
            }),
            other => Err(ScriptError::Conversion { to: "list", input: other.to_string() }),
        }
    }

    /// Coerce to map entries (maps pass through, text parses as `k:v|k:v`).
    pub fn to_map(&self) -> Result<Vec<(String, TagValue)>, ScriptError> {
        match self {
            TagValue::Map(entries) => Ok(entries.clone()),
            TagValue::Text(s) => match TagValue::map_for(s) {
                Some(TagValue::Map(entries)) => Ok(entries),
                _ => Err(ScriptError::Conversion { to: "map", input: s.clone() }),
            },
            other => Err(ScriptError::Conversion { to: "map", input: other.to_string() }),
        }
    }

    /// Coerce to bytes (binary passes through, text parses as lowercase hex).
    pub fn to_binary(&self) -> Result<Vec<u8>, ScriptError> {
        match self {
            TagValue::Binary(bytes) => Ok(bytes.clone()),
            TagValue::Text(s) => binary_for(s)
                .ok_or_else(|| ScriptError::Conversion { to: "binary", input: s.clone() }),
            other => Err(ScriptError::Conversion { to: "binary", input: other.to_string() }),
        }
    }

    // ── Literal parsers ───────────────────────────────────────────────────────

    /// Build a list value from `|`-separated text.  Elements are kept as text;
    /// the result always stringifies back to an input that splits identically.
    pub fn list_for(text: &str) -> TagValue {
        TagValue::List(
            text.split('|')
                .map(|part| TagValue::Text(part.to_owned()))
                .collect(),
        )
    }

    /// Build a map value from `k:v|k:v` text.  Returns `None` when any entry
    /// lacks a `:` separator.
    pub fn map_for(text: &str) -> Option<TagValue> {
        let mut entries = Vec::new();
        for part in text.split('|') {
            let (k, v) = part.split_once(':')?;
            entries.push((k.to_owned(), TagValue::Text(v.to_owned())));
        }
        Some(TagValue::Map(entries))
    }
}

/// Parse an even-length lowercase/uppercase hex string into bytes.
fn binary_for(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

impl From<i64> for TagValue {
    fn from(n: i64) -> Self {
        TagValue::Integer(n)
    }
}

impl From<f64> for TagValue {
    fn from(x: f64) -> Self {
        TagValue::Number(x)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Boolean(b)
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Text(s.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Text(s)
    }
}

// ── ValueOps ──────────────────────────────────────────────────────────────────

/// In-place mutation capability.
///
/// Implemented once for [`TagValue`]; each operation handles the variants
/// that support it and falls through to an "unsupported operation" error for
/// the rest.
pub trait ValueOps {
    /// Replace this value's payload with `val`, coerced to this value's type.
    fn set(&mut self, val: &TagValue) -> Result<(), ScriptError>;
    /// Numeric addition, text/binary append, list push, map merge.
    fn add(&mut self, val: &TagValue) -> Result<(), ScriptError>;
    fn subtract(&mut self, val: &TagValue) -> Result<(), ScriptError>;
    fn multiply(&mut self, val: &TagValue) -> Result<(), ScriptError>;
    fn divide(&mut self, val: &TagValue) -> Result<(), ScriptError>;
}

fn unsupported(op: &'static str, value: &TagValue) -> ScriptError {
    ScriptError::UnsupportedOperation { op, type_name: value.type_name() }
}

impl ValueOps for TagValue {
    fn set(&mut self, val: &TagValue) -> Result<(), ScriptError> {
        match self {
            TagValue::Text(s) => {
                *s = val.to_string();
                Ok(())
            }
            TagValue::Integer(n) => {
                *n = val.to_integer()?;
                Ok(())
            }
            TagValue::Number(x) => {
                *x = val.to_number()?;
                Ok(())
            }
            TagValue::Boolean(b) => {
                *b = val.to_boolean()?;
                Ok(())
            }
            TagValue::Binary(bytes) => {
                *bytes = val.to_binary()?;
                Ok(())
            }
            TagValue::List(items) => {
                *items = val.to_list()?;
                Ok(())
            }
            TagValue::Map(entries) => {
                *entries = val.to_map()?;
                Ok(())
            }
            TagValue::Null => Err(unsupported("set", self)),
        }
    }

    fn add(&mut self, val: &TagValue) -> Result<(), ScriptError> {
        match self {
            TagValue::Text(s) => {
                s.push_str(&val.to_string());
                Ok(())
            }
            TagValue::Integer(n) => {
                *n += val.to_integer()?;
                Ok(())
            }
            TagValue::Number(x) => {
                *x += val.to_number()?;
                Ok(())
            }
            TagValue::Binary(bytes) => {
                bytes.extend(val.to_binary()?);
                Ok(())
            }
            TagValue::List(items) => {
                items.push(val.duplicate());
                Ok(())
            }
            TagValue::Map(entries) => {
                for (k, v) in val.to_map()? {
                    match entries.iter_mut().find(|(ek, _)| *ek == k) {
                        Some((_, ev)) => *ev = v,
                        None => entries.push((k, v)),
                    }
                }
                Ok(())
            }
            _ => Err(unsupported("add", self)),
        }
    }

    fn subtract(&mut self, val: &TagValue) -> Result<(), ScriptError> {
        match self {
            TagValue::Integer(n) => {
                *n -= val.to_integer()?;
                Ok(())
            }
            TagValue::Number(x) => {
                *x -= val.to_number()?;
                Ok(())
            }
            _ => Err(unsupported("subtract", self)),
        }
    }

    fn multiply(&mut self, val: &TagValue) -> Result<(), ScriptError> {
        match self {
            TagValue::Integer(n) => {
                *n *= val.to_integer()?;
                Ok(())
            }
            TagValue::Number(x) => {
                *x *= val.to_number()?;
                Ok(())
            }
            _ => Err(unsupported("multiply", self)),
        }
    }

    fn divide(&mut self, val: &TagValue) -> Result<(), ScriptError> {
        match self {
            TagValue::Integer(n) => {
                let d = val.to_integer()?;
                if d == 0 {
                    return Err(ScriptError::DivisionByZero);
                }
                *n /= d;
                Ok(())
            }
            TagValue::Number(x) => {
                // IEEE semantics: no error, zero divisors produce inf/NaN.
                *x /= val.to_number()?;
                Ok(())
            }
            _ => Err(unsupported("divide", self)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_scalars() {
        assert_eq!(TagValue::Integer(42).to_string(), "42");
        assert_eq!(TagValue::Number(1.5).to_string(), "1.5");
        assert_eq!(TagValue::Boolean(true).to_string(), "true");
        assert_eq!(TagValue::Null.to_string(), "&{NULL}");
        assert_eq!(TagValue::Text("hi".into()).to_string(), "hi");
    }

    #[test]
    fn display_binary_hex() {
        assert_eq!(TagValue::Binary(vec![0x01, 0xfe]).to_string(), "01fe");
        assert_eq!(TagValue::Binary(vec![]).to_string(), "");
    }

    #[test]
    fn display_list_and_map() {
        let list = TagValue::list_for("a|b|c");
        assert_eq!(list.to_string(), "a|b|c");
        let map = TagValue::map_for("x:1|y:2").unwrap();
        assert_eq!(map.to_string(), "x:1|y:2");
    }

    #[test]
    fn map_for_rejects_missing_colon() {
        assert!(TagValue::map_for("x:1|bare").is_none());
    }

    #[test]
    fn coerce_integer() {
        assert_eq!(TagValue::Text(" 7 ".into()).to_integer().unwrap(), 7);
        assert_eq!(TagValue::Number(3.0).to_integer().unwrap(), 3);
        assert!(TagValue::Text("abc".into()).to_integer().is_err());
        assert!(TagValue::Null.to_integer().is_err());
    }

    #[test]
    fn coerce_boolean_is_strict() {
        assert!(TagValue::Text("TRUE".into()).to_boolean().unwrap());
        assert!(!TagValue::Boolean(false).to_boolean().unwrap());
        assert!(TagValue::Integer(1).to_boolean().is_err());
    }

    #[test]
    fn binary_round_trip() {
        let v = TagValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]);
        let parsed = TagValue::Text(v.to_string()).to_binary().unwrap();
        assert_eq!(parsed, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn duplicate_is_independent() {
        let original = TagValue::List(vec![TagValue::Integer(1)]);
        let mut copy = original.duplicate();
        copy.add(&TagValue::Integer(2)).unwrap();
        assert_eq!(original.to_string(), "1");
        assert_eq!(copy.to_string(), "1|2");
    }

    #[test]
    fn integer_arithmetic_ops() {
        let mut v = TagValue::Integer(10);
        v.add(&TagValue::Integer(5)).unwrap();
        v.subtract(&TagValue::Text("3".into())).unwrap();
        v.multiply(&TagValue::Integer(2)).unwrap();
        v.divide(&TagValue::Integer(4)).unwrap();
        assert_eq!(v, TagValue::Integer(6));
    }

    #[test]
    fn integer_divide_by_zero() {
        let mut v = TagValue::Integer(1);
        assert_eq!(v.divide(&TagValue::Integer(0)), Err(ScriptError::DivisionByZero));
    }

    #[test]
    fn text_set_and_add() {
        let mut v = TagValue::Text("x=".into());
        v.add(&TagValue::Integer(5)).unwrap();
        assert_eq!(v.to_string(), "x=5");
        v.set(&TagValue::Boolean(false)).unwrap();
        assert_eq!(v.to_string(), "false");
    }

    #[test]
    fn unsupported_ops_error() {
        let mut v = TagValue::Boolean(true);
        let err = v.add(&TagValue::Integer(1)).unwrap_err();
        assert_eq!(
            err,
            ScriptError::UnsupportedOperation { op: "add", type_name: "boolean" }
        );
        assert!(TagValue::Null.duplicate().set(&TagValue::Integer(1)).is_err());
    }

    #[test]
    fn map_add_merges() {
        let mut v = TagValue::map_for("a:1|b:2").unwrap();
        v.add(&TagValue::map_for("b:9|c:3").unwrap()).unwrap();
        assert_eq!(v.to_string(), "a:1|b:9|c:3");
    }
}
