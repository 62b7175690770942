//! Deep comparison between a candidate's resolved value and expected JSON.

use std::fmt;
use std::rc::Rc;

use crate::script::value::{number_to_string, Obj, ObjKind};
use crate::script::{Interp, Value};

/// Containers nested deeper than this are captured as `[Too deep]`.
pub const MAX_CAPTURE_DEPTH: usize = 10_000;

/// Detached, JSON-like copy of a script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Snapshot>),
    /// Own enumerable properties in property order.
    Map(Vec<(String, Snapshot)>),
    /// Anything without a JSON form; shown as text, never equal.
    Opaque(String),
}

impl Snapshot {
    pub fn capture(interp: &Interp, value: &Value) -> Snapshot {
        capture_nested(interp, value, &mut Vec::new())
    }
}

fn capture_nested(interp: &Interp, value: &Value, seen: &mut Vec<*const Obj>) -> Snapshot {
    let obj = match value {
        Value::Undefined => return Snapshot::Undefined,
        Value::Null => return Snapshot::Null,
        Value::Bool(b) => return Snapshot::Bool(*b),
        Value::Number(n) => return Snapshot::Number(*n),
        Value::Str(s) => return Snapshot::Str(s.to_string()),
        Value::Object(obj) => obj,
    };
    if seen.contains(&Rc::as_ptr(obj)) {
        return Snapshot::Opaque("[Circular]".into());
    }
    // `seen` holds the current path, so its length is the nesting depth
    if seen.len() >= MAX_CAPTURE_DEPTH {
        return Snapshot::Opaque("[Too deep]".into());
    }
    seen.push(Rc::as_ptr(obj));
    let snapshot = match &obj.kind {
        ObjKind::Array(items) => {
            let items = items.borrow().clone();
            Snapshot::List(items.iter().map(|v| capture_nested(interp, v, seen)).collect())
        }
        ObjKind::Plain => {
            let mut fields = Vec::new();
            for key in obj.own_keys() {
                let field = obj.get_own(&key).unwrap_or_default();
                // JSON drops undefined-valued and function-valued properties
                if matches!(field, Value::Undefined) || field.is_callable() {
                    continue;
                }
                fields.push((key.to_string(), capture_nested(interp, &field, seen)));
            }
            Snapshot::Map(fields)
        }
        ObjKind::Error(_) => Snapshot::Opaque(interp.describe_error(value)),
        _ => Snapshot::Opaque(interp.inspect(value)),
    };
    seen.pop();
    snapshot
}

/// Structural equality: lists by position, maps by key set.
pub fn json_equal(actual: &Snapshot, expected: &serde_json::Value) -> bool {
    match (actual, expected) {
        (Snapshot::Null, serde_json::Value::Null) => true,
        (Snapshot::Bool(a), serde_json::Value::Bool(b)) => a == b,
        (Snapshot::Number(a), serde_json::Value::Number(b)) => b.as_f64().is_some_and(|b| *a == b),
        (Snapshot::Str(a), serde_json::Value::String(b)) => a == b,
        (Snapshot::List(a), serde_json::Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| json_equal(x, y))
        }
        (Snapshot::Map(a), serde_json::Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, x)| b.get(key).is_some_and(|y| json_equal(x, y)))
        }
        _ => false,
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snapshot::Undefined => write!(f, "undefined"),
            Snapshot::Null => write!(f, "null"),
            Snapshot::Bool(b) => write!(f, "{}", b),
            Snapshot::Number(n) => write!(f, "{}", number_to_string(*n)),
            Snapshot::Str(s) => write!(f, "{}", quote(s)),
            Snapshot::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Snapshot::Map(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", quote(key), value)?;
                }
                write!(f, "}}")
            }
            Snapshot::Opaque(text) => write!(f, "{}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_expression_source;
    use crate::script::Limits;
    use serde_json::json;

    fn snap(src: &str) -> Snapshot {
        let interp = Interp::new(Limits::default(), 0.0);
        let expr = parse_expression_source(src).unwrap();
        let value = interp.eval_standalone(&expr).unwrap();
        Snapshot::capture(&interp, &value)
    }

    #[test]
    fn test_list_order_matters() {
        assert!(json_equal(&snap("[1, 2, 3]"), &json!([1, 2, 3])));
        assert!(!json_equal(&snap("[1, 2]"), &json!([2, 1])));
        assert!(!json_equal(&snap("[1, 2]"), &json!([1, 2, 3])));
    }

    #[test]
    fn test_map_keys_are_unordered() {
        assert!(json_equal(&snap("({ a: 1, b: 2 })"), &json!({ "b": 2, "a": 1 })));
        assert!(!json_equal(&snap("({ a: 1 })"), &json!({ "a": 1, "b": 2 })));
        assert!(json_equal(&snap("({ a: [1, { c: 'x' }], skip: undefined })"), &json!({ "a": [1, { "c": "x" }] })));
    }

    #[test]
    fn test_scalars_and_undefined() {
        assert!(json_equal(&snap("-1"), &json!(-1)));
        assert!(json_equal(&snap("0.5 + 0.25"), &json!(0.75)));
        assert!(!json_equal(&snap("'1'"), &json!(1)));
        assert!(!json_equal(&snap("undefined"), &json!(null)));
        assert!(json_equal(&snap("null"), &json!(null)));
    }

    #[test]
    fn test_opaque_values_never_match() {
        let set = snap("new Set([1])");
        assert!(matches!(set, Snapshot::Opaque(_)));
        assert!(!json_equal(&set, &json!({})));
        let cyclic = snap("(() => { const a = [1]; a.push(a); return a; })()");
        assert_eq!(cyclic.to_string(), "[1,[Circular]]");
    }

    #[test]
    fn test_display_matches_json_text() {
        assert_eq!(snap("[1, 'a\"b', { k: true, n: null }]").to_string(), r#"[1,"a\"b",{"k":true,"n":null}]"#);
        assert_eq!(snap("undefined").to_string(), "undefined");
    }
}
