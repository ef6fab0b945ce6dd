//! Coercion of platform-native values into the shared data model.
//!
//! Agents serialize what they can as plain JSON. Values they cannot map
//! themselves (sets, dates, raw data, boxed numbers) arrive wrapped as
//! `{"$native": "<class name>", "value": <best effort>}`. Everything passes
//! through `coerce` exactly once, at the capture boundary, and leaves as one
//! of null, boolean, integer, float, string, list or map. Sets become lists
//! sorted by their JSON text so two captures of the same set compare equal.

use serde_json::{Map, Number, Value};

const NATIVE_TAG: &str = "$native";
const NATIVE_VALUE: &str = "value";

#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Integer(i64),
    /// Integers above `i64::MAX`.
    Unsigned(u64),
    Float(f64),
    String(String),
    List(Vec<NativeValue>),
    Set(Vec<NativeValue>),
    Map(Vec<(String, NativeValue)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NativeKind {
    Null,
    Bool,
    Integer,
    Float,
    Number,
    Text,
    List,
    Set,
    Map,
    Unknown,
}

pub fn coerce(value: Value) -> Value {
    classify(value).into_json()
}

pub fn coerce_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().map(|(k, v)| (k, coerce(v))).collect()
}

pub fn classify(value: Value) -> NativeValue {
    match value {
        Value::Null => NativeValue::Null,
        Value::Bool(b) => NativeValue::Bool(b),
        Value::Number(n) => classify_number(&n),
        Value::String(s) => NativeValue::String(s),
        Value::Array(items) => NativeValue::List(items.into_iter().map(classify).collect()),
        Value::Object(map) => match native_wrapper(&map) {
            Some(class) => {
                let kind = kind_of(&class);
                let inner = map.get(NATIVE_VALUE).cloned().unwrap_or(Value::Null);
                classify_native(kind, inner)
            }
            None => NativeValue::Map(map.into_iter().map(|(k, v)| (k, classify(v))).collect()),
        },
    }
}

fn native_wrapper(map: &Map<String, Value>) -> Option<String> {
    if map.len() > 2 || !map.keys().all(|k| k == NATIVE_TAG || k == NATIVE_VALUE) {
        return None;
    }
    map.get(NATIVE_TAG)?.as_str().map(str::to_string)
}

fn classify_number(n: &Number) -> NativeValue {
    if let Some(i) = n.as_i64() {
        NativeValue::Integer(i)
    } else if let Some(u) = n.as_u64() {
        NativeValue::Unsigned(u)
    } else {
        NativeValue::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn parse_integer(s: &str) -> Option<NativeValue> {
    let s = s.trim();
    s.parse::<i64>()
        .map(NativeValue::Integer)
        .or_else(|_| s.parse::<u64>().map(NativeValue::Unsigned))
        .ok()
}

fn kind_of(class: &str) -> NativeKind {
    let simple = class.rsplit('.').next().unwrap_or(class).to_ascii_lowercase();
    let simple = simple.trim_start_matches('_');

    match simple {
        "null" | "nsnull" => NativeKind::Null,
        "boolean" | "bool" | "nscfboolean" => NativeKind::Bool,
        "integer" | "int" | "long" | "short" | "byte" | "biginteger" | "atomicinteger" | "atomiclong" => {
            NativeKind::Integer
        }
        "float" | "double" | "bigdecimal" => NativeKind::Float,
        "number" | "nsnumber" | "nscfnumber" => NativeKind::Number,
        "string" | "nsstring" | "nsmutablestring" | "nscfstring" | "nscfconstantstring"
        | "nstaggedpointerstring" | "charsequence" => NativeKind::Text,
        s if s.ends_with("set") => NativeKind::Set,
        s if s.ends_with("array") || s.ends_with("list") => NativeKind::List,
        s if s.ends_with("dictionary") || s.ends_with("map") => NativeKind::Map,
        _ => NativeKind::Unknown,
    }
}

fn classify_native(kind: NativeKind, inner: Value) -> NativeValue {
    match (kind, inner) {
        (NativeKind::Null, _) => NativeValue::Null,
        (NativeKind::Bool, Value::Bool(b)) => NativeValue::Bool(b),
        (NativeKind::Bool, Value::Number(n)) => NativeValue::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        (NativeKind::Bool, Value::String(s)) if s.eq_ignore_ascii_case("true") || s == "1" => NativeValue::Bool(true),
        (NativeKind::Bool, Value::String(s)) if s.eq_ignore_ascii_case("false") || s == "0" => {
            NativeValue::Bool(false)
        }
        (NativeKind::Integer, Value::Number(n)) => classify_number(&n),
        (NativeKind::Integer, Value::String(s)) => parse_integer(&s).unwrap_or(NativeValue::String(s)),
        (NativeKind::Float, Value::Number(n)) => NativeValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        (NativeKind::Float, Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) => NativeValue::Float(f),
            Err(_) => NativeValue::String(s),
        },
        (NativeKind::Number, Value::Number(n)) => classify_number(&n),
        (NativeKind::Number, Value::String(s)) => {
            if let Some(integer) = parse_integer(&s) {
                integer
            } else if let Ok(f) = s.trim().parse::<f64>() {
                NativeValue::Float(f)
            } else {
                NativeValue::String(s)
            }
        }
        (NativeKind::Text, Value::String(s)) => NativeValue::String(s),
        (NativeKind::List, Value::Array(items)) => NativeValue::List(items.into_iter().map(classify).collect()),
        (NativeKind::Set, Value::Array(items)) => {
            let mut items: Vec<NativeValue> = items.into_iter().map(classify).collect();
            items.sort_by_cached_key(|item| item.clone().into_json().to_string());
            NativeValue::Set(items)
        }
        (NativeKind::Map, Value::Object(map)) => {
            NativeValue::Map(map.into_iter().map(|(k, v)| (k, classify(v))).collect())
        }
        // unrecognized class or a payload that does not fit its class
        (_, other) => NativeValue::String(display(other)),
    }
}

fn display(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl NativeValue {
    pub fn into_json(self) -> Value {
        match self {
            NativeValue::Null => Value::Null,
            NativeValue::Bool(b) => Value::Bool(b),
            NativeValue::Integer(i) => Value::Number(i.into()),
            NativeValue::Unsigned(u) => Value::Number(u.into()),
            NativeValue::Float(f) => Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            NativeValue::String(s) => Value::String(s),
            NativeValue::List(items) | NativeValue::Set(items) => {
                Value::Array(items.into_iter().map(NativeValue::into_json).collect())
            }
            NativeValue::Map(entries) => {
                Value::Object(entries.into_iter().map(|(k, v)| (k, v.into_json())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn native(class: &str, value: Value) -> Value {
        json!({ "$native": class, "value": value })
    }

    #[test]
    fn plain_json_passes_through() {
        let value = json!({"a": 1, "b": [true, null, "x"], "c": {"d": 1.5}});
        assert_eq!(coerce(value.clone()), value);
    }

    #[test]
    fn boxed_numbers_and_booleans() {
        assert_eq!(coerce(native("java.lang.Integer", json!(42))), json!(42));
        assert_eq!(coerce(native("java.lang.Long", json!("9000000000"))), json!(9_000_000_000i64));
        assert_eq!(coerce(native("java.lang.Float", json!(1.5))), json!(1.5));
        assert_eq!(coerce(native("__NSCFBoolean", json!(1))), json!(true));
        assert_eq!(coerce(native("NSNumber", json!("3.25"))), json!(3.25));
    }

    #[test]
    fn large_unsigned_integers_keep_precision() {
        assert_eq!(coerce(json!(u64::MAX)), json!(u64::MAX));
        assert_ne!(coerce(json!(u64::MAX)), coerce(json!(u64::MAX - 1)));
        assert_eq!(classify(json!(u64::MAX)), NativeValue::Unsigned(u64::MAX));
        assert_eq!(coerce(native("java.math.BigInteger", json!("18446744073709551615"))), json!(u64::MAX));
        assert_eq!(coerce(native("NSNumber", json!("18446744073709551614"))), json!(u64::MAX - 1));
        assert_eq!(coerce(native("java.lang.Long", json!(u64::MAX))), json!(u64::MAX));
    }

    #[test]
    fn sets_become_sorted_lists() {
        let set = native("java.util.HashSet", json!(["b", "a", "c"]));
        assert_eq!(coerce(set), json!(["a", "b", "c"]));
    }

    #[test]
    fn unknown_classes_fall_back_to_text() {
        assert_eq!(coerce(native("NSDate", json!("2024-01-01T00:00:00Z"))), json!("2024-01-01T00:00:00Z"));
        assert_eq!(coerce(native("android.net.Uri", json!({"x": 1}))), json!("{\"x\":1}"));
    }

    #[test]
    fn mismatched_payload_falls_back_to_text() {
        assert_eq!(coerce(native("java.lang.Integer", json!("twelve"))), json!("twelve"));
        assert_eq!(coerce(native("java.util.HashSet", json!("not-a-list"))), json!("not-a-list"));
    }

    #[test]
    fn non_finite_floats_become_strings() {
        assert_eq!(NativeValue::Float(f64::INFINITY).into_json(), json!("inf"));
    }

    #[test]
    fn maps_with_extra_keys_are_not_wrappers() {
        let value = json!({"$native": "NSString", "value": "x", "other": 1});
        assert_eq!(coerce(value.clone()), value);
    }

    #[test]
    fn nested_wrappers_are_coerced() {
        let value = json!({"tags": native("NSSet", json!([3, 1, 2])), "n": native("NSNull", Value::Null)});
        assert_eq!(coerce(value), json!({"tags": [1, 2, 3], "n": null}));
    }

    #[test]
    fn coercion_is_idempotent() {
        let once = coerce(json!({"s": native("NSMutableSet", json!(["z", "y"])), "f": 2.5}));
        assert_eq!(coerce(once.clone()), once);
    }
}
