use crate::error::DeferredError;
use crate::promise::{Promise, Resolvers};
use crate::raise_type_error;
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/// A foreign async value that can be assimilated by the engine.
///
/// `then` receives a fresh one-shot [`Resolvers`] pair routed to the cell
/// being resolved. Only the first `fulfill`/`reject` call on it is honored.
/// Returning `Err` models a `then` that raised; the error is ignored if the
/// pair was already used.
pub trait Thenable {
    fn then(&self, resolvers: Resolvers) -> Result<(), Value>;
}

/// Closure-backed [`Thenable`].
pub struct FnThenable<F>(F);

impl<F> Thenable for FnThenable<F>
where
    F: Fn(Resolvers) -> Result<(), Value>,
{
    fn then(&self, resolvers: Resolvers) -> Result<(), Value> {
        (self.0)(resolvers)
    }
}

/// Result of probing a value for a `then` capability.
pub enum Thenability {
    NotThenable,
    Native(Promise),
    Foreign(Rc<dyn Thenable>),
}

/// Opaque payload carried by fulfillment values and rejection reasons.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Error(Rc<DeferredError>),
    Promise(Promise),
    Thenable(Rc<dyn Thenable>),
}

impl Value {
    /// Wrap a closure as a foreign thenable value.
    pub fn thenable<F>(then: F) -> Value
    where
        F: Fn(Resolvers) -> Result<(), Value> + 'static,
    {
        Value::Thenable(Rc::new(FnThenable(then)))
    }

    pub fn thenability(&self) -> Thenability {
        match self {
            Value::Promise(promise) => Thenability::Native(promise.clone()),
            Value::Thenable(thenable) => Thenability::Foreign(thenable.clone()),
            _ => Thenability::NotThenable,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&DeferredError> {
        match self {
            Value::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Property lookup on `Object` values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(props) => props.get(key),
            _ => None,
        }
    }

    /// Convert the plain-data subset to JSON. Cells, thenables and errors
    /// have no JSON form.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect::<Option<Vec<_>>>()?),
            Value::Object(props) => {
                let mut map = serde_json::Map::new();
                for (key, value) in props {
                    map.insert(key.clone(), value.to_json()?);
                }
                serde_json::Value::Object(map)
            }
            Value::Error(_) | Value::Promise(_) | Value::Thenable(_) => return None,
        })
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Error(_) => "error",
            Value::Promise(_) => "promise",
            Value::Thenable(_) => "thenable",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Thenable(a), Value::Thenable(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            _ => false,
        }
    }
}

/// Script-style number text: exponent form outside `[1e-6, 1e21)`, no
/// trailing zeros otherwise.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        return format!("{sign}Infinity");
    }
    // -0 prints as 0
    if n == 0.0 {
        return "0".to_string();
    }
    // Smallest subnormal and f64::MAX have fixed shortest forms.
    if n.to_bits() == 1 {
        return "5e-324".to_string();
    }
    if n == f64::MAX {
        return "1.7976931348623157e+308".to_string();
    }
    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let precision = if abs >= 1e21 { 16 } else { 15 };
        let s = format!("{:.*e}", precision, n);
        if let Some((mant, exp)) = s.split_once('e') {
            let mant = mant.trim_end_matches('0').trim_end_matches('.');
            if let Ok(exp_int) = exp.parse::<i32>() {
                return format!("{mant}e{exp_int:+}");
            }
        }
        return s;
    }

    let mut s = format!("{n}");
    if s.contains('.') {
        s = s.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    s
}

/// JSON text for the plain-data subset, numbers formatted like [`format_number`].
/// Non-finite numbers become `null` as in JSON.
fn write_json_text(out: &mut String, json: &serde_json::Value) {
    match json {
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if f.is_finite() => out.push_str(&format_number(f)),
            _ => out.push_str(&n.to_string()),
        },
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_text(out, item);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            out.push('{');
            for (i, (key, value)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_json_text(out, value);
            }
            out.push('}');
        }
        other => out.push_str(&other.to_string()),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Object(_) => match self.to_json() {
                Some(json) => {
                    let mut text = String::new();
                    write_json_text(&mut text, &json);
                    write!(f, "{text}")
                }
                None => write!(f, "[object Object]"),
            },
            Value::Error(err) => write!(f, "{err}"),
            Value::Promise(_) => write!(f, "[object Promise]"),
            Value::Thenable(_) => write!(f, "[object Thenable]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Number(n) => write!(f, "Number({})", format_number(*n)),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(props) => f.debug_map().entries(props).finish(),
            Value::Error(err) => write!(f, "Error({err})"),
            Value::Promise(p) => write!(f, "Promise(id={})", p.id()),
            Value::Thenable(t) => write!(f, "Thenable({:p})", Rc::as_ptr(t)),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
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

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Promise(promise)
    }
}

impl From<DeferredError> for Value {
    fn from(err: DeferredError) -> Self {
        Value::Error(Rc::new(err))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = DeferredError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) => Ok(n),
            other => Err(raise_type_error!("expected number, got {}", other.type_name())),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = DeferredError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Boolean(b) => Ok(b),
            other => Err(raise_type_error!("expected boolean, got {}", other.type_name())),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = DeferredError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(raise_type_error!("expected string, got {}", other.type_name())),
        }
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = DeferredError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => Ok(items),
            other => Err(raise_type_error!("expected array, got {}", other.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_matches_script_conventions() {
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::from(vec![Value::from(1), Value::from(2)]).to_string(), "1,2");
        assert_eq!(Value::Undefined.to_string(), "undefined");
        assert_eq!(Value::from(-0.0).to_string(), "0");
        assert_eq!(Value::from(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(Value::from(DeferredError::CyclicResolution).to_string(), "Chaining cycle detected for promise");
    }

    #[test]
    fn test_large_and_small_numbers() {
        assert_eq!(Value::from(1e20).to_string(), "100000000000000000000");
        assert_eq!(Value::from(1e21).to_string(), "1e+21");
        assert_eq!(Value::from(1e-7).to_string(), "1e-7");
        assert_eq!(Value::from(0.000001).to_string(), "0.000001");
        assert_eq!(Value::from(9007199254740993i64).to_string(), "9007199254740992");
    }

    #[test]
    fn test_object_display_formats_numbers_like_scalars() {
        let record = Value::from(json!({"n": 1, "big": 1e21, "half": 0.5, "s": "a\"b"}));
        assert_eq!(record.to_string(), r#"{"n":1,"big":1e+21,"half":0.5,"s":"a\"b"}"#);
        assert_eq!(Value::from(json!({"n": 1})).to_string(), r#"{"n":1}"#);
    }

    #[test]
    fn test_json_conversion() {
        let value = Value::from(json!({"status": "fulfilled", "value": [1, "two", null]}));
        assert_eq!(value.get("status"), Some(&Value::from("fulfilled")));
        assert_eq!(value.to_json(), Some(json!({"status": "fulfilled", "value": [1.0, "two", null]})));
        assert_eq!(value.to_string(), r#"{"status":"fulfilled","value":[1,"two",null]}"#);
    }

    #[test]
    fn test_thenability_is_a_capability_check() {
        let thenable = Value::thenable(|resolvers| {
            resolvers.fulfill(1);
            Ok(())
        });
        assert!(matches!(thenable.thenability(), Thenability::Foreign(_)));
        assert!(matches!(Value::from(3).thenability(), Thenability::NotThenable));
        assert!(matches!(Value::from(json!({"then": 1})).thenability(), Thenability::NotThenable));
        assert_eq!(thenable, thenable.clone());
    }

    #[test]
    fn test_accessors_match_only_their_variant() {
        assert!(Value::default().is_undefined());
        assert!(!Value::Null.is_undefined());
        assert_eq!(Value::from(2.5).as_number(), Some(2.5));
        assert_eq!(Value::from("2.5").as_number(), None);
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
        assert_eq!(Value::from(1).as_str(), None);
        assert_eq!(Value::from(json!([1, 2])).as_array().map(<[Value]>::len), Some(2));
        assert!(Value::from(1).as_error().is_none());
    }

    #[test]
    fn test_try_from_reports_type_errors() {
        assert_eq!(f64::try_from(Value::from(2)).unwrap(), 2.0);
        let err = f64::try_from(Value::from("x")).unwrap_err();
        assert_eq!(err, DeferredError::TypeError { message: "expected number, got string".into() });
        assert!(String::try_from(Value::Null).is_err());
    }
}
