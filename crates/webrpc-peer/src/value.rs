//! Values held by an environment and passed to registered functions.
//!
//! A [`Value`] is a JSON tree that may also hold [`Callable`]s. Only the
//! JSON part ever crosses the wire: [`Value::to_json`] drops functions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Number;
use webrpc_protocol::CheckKind;

use crate::callable::Callable;
use crate::error::AddressError;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent or empty.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A JSON number.
    Number(Number),
    /// A string.
    String(String),
    /// An ordered list.
    Array(Vec<Value>),
    /// A keyed mapping.
    Object(BTreeMap<String, Value>),
    /// A registered function.
    Function(Callable),
}

impl Value {
    /// Creates an empty mapping.
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Returns the kind reported to `var` checks.
    pub fn kind(&self) -> CheckKind {
        match self {
            Self::Null => CheckKind::Undefined,
            Self::Bool(_) => CheckKind::Boolean,
            Self::Number(_) => CheckKind::Number,
            Self::String(_) => CheckKind::String,
            Self::Array(_) | Self::Object(_) => CheckKind::Object,
            Self::Function(_) => CheckKind::Function,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Self::Function(callable) => Some(callable),
            _ => None,
        }
    }

    /// Converts to wire JSON. Functions inside arrays become `null`,
    /// functions inside mappings are omitted.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null | Self::Function(_) => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Self::Function(_)))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// String form used by `$[path]` interpolation.
    pub fn interpolate(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::String(s) => s.clone(),
            Self::Array(items) => items
                .iter()
                .map(Value::interpolate)
                .collect::<Vec<_>>()
                .join(","),
            Self::Object(_) => self.to_json().to_string(),
            Self::Function(_) => "[function]".to_string(),
        }
    }

    /// Looks up a dotted path below this value.
    ///
    /// An empty path addresses the value itself. A missing key, an
    /// out-of-range index or a `null` on the way yields `Ok(None)`; passing
    /// through a string, number, boolean or function is an error.
    pub fn lookup(&self, path: &str) -> Result<Option<&Value>, AddressError> {
        if path.is_empty() {
            return Ok(Some(self));
        }

        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Self::Object(map) => match map.get(segment) {
                    Some(next) => next,
                    None => return Ok(None),
                },
                Self::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(next) => next,
                    None => return Ok(None),
                },
                Self::Null => return Ok(None),
                other => {
                    return Err(AddressError::NotAMapping {
                        path: path.to_string(),
                        segment: segment.to_string(),
                        kind: other.kind().as_str(),
                    });
                }
            };
        }
        Ok(Some(current))
    }

    /// Writes `value` at a dotted path, creating intermediate mappings.
    ///
    /// `null` intermediates are replaced with empty mappings. Array slots
    /// are addressed by index; one past the end appends.
    pub fn insert(&mut self, path: &str, value: Value) -> Result<(), AddressError> {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return Ok(());
        };

        let mut current = self;
        for segment in parents {
            if current.is_null() {
                *current = Self::object();
            }
            current = match current {
                Self::Object(map) => map.entry((*segment).to_string()).or_insert_with(Self::object),
                Self::Array(items) => match segment.parse::<usize>().ok().filter(|i| *i < items.len()) {
                    Some(index) => &mut items[index],
                    None => return Err(not_writable(path, segment, "array")),
                },
                other => {
                    return Err(AddressError::NotAMapping {
                        path: path.to_string(),
                        segment: (*segment).to_string(),
                        kind: other.kind().as_str(),
                    });
                }
            };
        }

        if current.is_null() {
            *current = Self::object();
        }
        match current {
            Self::Object(map) => {
                map.insert((*last).to_string(), value);
                Ok(())
            }
            Self::Array(items) => match last.parse::<usize>() {
                Ok(index) if index < items.len() => {
                    items[index] = value;
                    Ok(())
                }
                Ok(index) if index == items.len() => {
                    items.push(value);
                    Ok(())
                }
                _ => Err(not_writable(path, last, "array")),
            },
            other => Err(not_writable(path, last, other.kind().as_str())),
        }
    }
}

fn not_writable(path: &str, segment: &str, kind: &'static str) -> AddressError {
    AddressError::NotWritable {
        path: path.to_string(),
        segment: segment.to_string(),
        kind,
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Array(items) => f.debug_list().entries(items).finish(),
            Self::Object(map) => f.debug_map().entries(map).finish(),
            Self::Function(callable) => callable.fmt(f),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.same(b),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        Self::from(value.clone())
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite numbers have no JSON spelling and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Object(map)
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Self::Function(callable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> Callable {
        Callable::plain(|_, _| async { Ok(Value::Null) })
    }

    #[test]
    fn kinds() {
        assert_eq!(Value::Null.kind(), CheckKind::Undefined);
        assert_eq!(Value::from(true).kind(), CheckKind::Boolean);
        assert_eq!(Value::from(1).kind(), CheckKind::Number);
        assert_eq!(Value::from("x").kind(), CheckKind::String);
        assert_eq!(Value::from(json!([1])).kind(), CheckKind::Object);
        assert_eq!(Value::object().kind(), CheckKind::Object);
        assert_eq!(Value::from(noop()).kind(), CheckKind::Function);
    }

    #[test]
    fn to_json_drops_functions() {
        let mut value = Value::from(json!({"a": 1, "list": [1, 2]}));
        value.insert("f", noop().into()).unwrap();
        value.insert("list.1", noop().into()).unwrap();

        assert_eq!(value.to_json(), json!({"a": 1, "list": [1, null]}));
        assert_eq!(serde_json::to_value(&value).unwrap(), value.to_json());
    }

    #[test]
    fn interpolation_forms() {
        assert_eq!(Value::from("hi").interpolate(), "hi");
        assert_eq!(Value::from(5).interpolate(), "5");
        assert_eq!(Value::from(false).interpolate(), "false");
        assert_eq!(Value::Null.interpolate(), "");
        assert_eq!(Value::from(json!(["a", 1, null])).interpolate(), "a,1,");
        assert_eq!(Value::from(json!({"b": 2})).interpolate(), r#"{"b":2}"#);
        assert_eq!(Value::from(noop()).interpolate(), "[function]");
    }

    #[test]
    fn lookup_paths() {
        let value = Value::from(json!({"a": {"b": [10, {"c": "deep"}]}, "n": null, "s": "str"}));

        assert_eq!(value.lookup("a.b.0").unwrap(), Some(&Value::from(10)));
        assert_eq!(value.lookup("a.b.1.c").unwrap(), Some(&Value::from("deep")));
        assert_eq!(value.lookup("").unwrap(), Some(&value));
        assert_eq!(value.lookup("missing.x").unwrap(), None);
        assert_eq!(value.lookup("a.b.7").unwrap(), None);
        assert_eq!(value.lookup("n.x").unwrap(), None);
    }

    #[test]
    fn lookup_through_scalar_is_an_error() {
        let value = Value::from(json!({"s": "str"}));
        let error = value.lookup("s.len").unwrap_err();
        assert_eq!(
            error,
            AddressError::NotAMapping {
                path: "s.len".to_string(),
                segment: "len".to_string(),
                kind: "string",
            }
        );
    }

    #[test]
    fn insert_creates_levels() {
        let mut value = Value::object();
        value.insert("a.b.c", Value::from(1)).unwrap();
        assert_eq!(value.to_json(), json!({"a": {"b": {"c": 1}}}));

        value.insert("a.b.c", Value::from(2)).unwrap();
        assert_eq!(value.lookup("a.b.c").unwrap(), Some(&Value::from(2)));
    }

    #[test]
    fn insert_into_arrays() {
        let mut value = Value::from(json!({"list": [1]}));
        value.insert("list.0", Value::from(5)).unwrap();
        value.insert("list.1", Value::from(6)).unwrap();
        assert_eq!(value.to_json(), json!({"list": [5, 6]}));
        assert!(value.insert("list.9", Value::from(7)).is_err());
    }

    #[test]
    fn insert_through_scalar_is_an_error() {
        let mut value = Value::from(json!({"a": 1}));
        assert!(matches!(
            value.insert("a.b", Value::Null),
            Err(AddressError::NotWritable { .. })
        ));
        assert!(matches!(
            value.insert("a.b.c", Value::Null),
            Err(AddressError::NotAMapping { .. })
        ));
    }

    #[test]
    fn insert_below_function_is_an_error() {
        let mut value = Value::object();
        value.insert("echo", noop().into()).unwrap();

        assert_eq!(
            value.insert("echo.pipe", noop().into()).unwrap_err(),
            AddressError::NotWritable {
                path: "echo.pipe".to_string(),
                segment: "pipe".to_string(),
                kind: "function",
            }
        );
        assert!(matches!(
            value.insert("echo.a.b", Value::Null),
            Err(AddressError::NotAMapping { kind: "function", .. })
        ));
        assert!(value.lookup("echo").unwrap().is_some_and(|v| v.as_callable().is_some()));
    }

    #[test]
    fn functions_compare_by_identity() {
        let f = noop();
        assert_eq!(Value::from(f.clone()), Value::from(f));
        assert_ne!(Value::from(noop()), Value::from(noop()));
    }

    #[test]
    fn non_finite_float_is_null() {
        assert!(Value::from(f64::NAN).is_null());
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
    }
}
