use std::fmt;
use std::sync::Arc;

pub type ObjectMap = ahash::AHashMap<Arc<str>, Value>;

/// Dynamic value flowing through session variables, templates and captures.
///
/// `Null` stands for both "explicitly null" and "absent" (a session variable
/// that was never set resolves to `Null`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(Arc<str>),
    Array(Vec<Value>),
    Object(ObjectMap),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Arc::from(s.as_ref()))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view: integers widen to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::I64(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Truthiness for guard expressions: null and false are falsy, zero and
    /// the empty string are falsy, everything else is truthy.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(v) => *v,
            Self::I64(v) => *v != 0,
            Self::F64(v) => *v != 0.0,
            Self::String(v) => !v.is_empty(),
            Self::Array(_) | Self::Object(_) => true,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key),
            Self::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Dotted-path lookup (`a.b.0.c`). Returns `None` when any path segment
    /// is missing or the value at a segment is not indexable.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for seg in path.split('.') {
            cur = cur.get(seg)?;
        }
        Some(cur)
    }

    /// String form used when a value is interpolated into surrounding text.
    /// `Null` renders as the empty string; composites render as JSON.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(v) => v.to_string(),
            Self::I64(v) => v.to_string(),
            Self::F64(v) => format_f64(*v),
            Self::String(v) => v.to_string(),
            Self::Array(_) | Self::Object(_) => self.to_json().to_string(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::I64(v) => serde_json::Value::from(*v),
            Self::F64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(v) => serde_json::Value::String(v.to_string()),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn from_json(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::I64(i)
                } else {
                    Self::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (Arc::<str>::from(k.as_str()), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

// Integral floats print without the trailing ".0" so templated numbers look
// the way they were written in the script.
fn format_f64(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 9e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(Arc::from(v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (Arc::<str>::from(*k), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn dotted_path_lookup() {
        let v = obj(&[(
            "nested",
            obj(&[
                ("str", Value::from("someText")),
                ("int", Value::from(5i64)),
                ("deeply", obj(&[("some", Value::from("data"))])),
            ]),
        )]);

        assert_eq!(v.get_path("nested.str"), Some(&Value::from("someText")));
        assert_eq!(v.get_path("nested.int"), Some(&Value::from(5i64)));
        assert_eq!(
            v.get_path("nested.deeply.some"),
            Some(&Value::from("data"))
        );
        assert_eq!(v.get_path("nested.missing"), None);
        assert_eq!(v.get_path("nested.str.deeper"), None);
    }

    #[test]
    fn array_index_path() {
        let v = obj(&[(
            "items",
            Value::Array(vec![Value::from(10i64), Value::from(20i64)]),
        )]);
        assert_eq!(v.get_path("items.1"), Some(&Value::from(20i64)));
        assert_eq!(v.get_path("items.2"), None);
    }

    #[test]
    fn display_preserves_integral_floats() {
        assert_eq!(Value::F64(5.0).to_display_string(), "5");
        assert_eq!(Value::F64(5.25).to_display_string(), "5.25");
        assert_eq!(Value::I64(-3).to_display_string(), "-3");
        assert_eq!(Value::Null.to_display_string(), "");
    }

    #[test]
    fn json_roundtrip() {
        let json: serde_json::Value = match serde_json::from_str(
            r#"{"a": 1, "b": [true, null, "x"], "c": {"d": 2.5}}"#,
        ) {
            Ok(v) => v,
            Err(err) => panic!("parse failed: {err}"),
        };

        let v = Value::from_json(json.clone());
        assert_eq!(v.get_path("a"), Some(&Value::I64(1)));
        assert_eq!(v.get_path("b.0"), Some(&Value::Bool(true)));
        assert_eq!(v.get_path("c.d"), Some(&Value::F64(2.5)));
        assert_eq!(v.to_json(), json);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(!Value::I64(0).truthy());
        assert!(!Value::from("").truthy());
        assert!(Value::from("x").truthy());
        assert!(Value::Array(Vec::new()).truthy());
    }
}
