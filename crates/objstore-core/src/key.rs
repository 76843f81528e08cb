//! Record keys
//!
//! Keys are either numbers or strings. All numbers sort before all strings,
//! which matches the ordering IndexedDB applies to the same key types.
//! `-0` and `0` are the same key; `NaN` is never a valid key.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

/// Primary or index key.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
}

impl Key {
    /// Convert a JSON value into a key.
    ///
    /// Returns `None` for values that cannot act as keys (null, bool, arrays,
    /// objects, NaN).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().filter(|f| !f.is_nan()).map(Key::Number),
            Value::String(s) => Some(Key::String(s.clone())),
            _ => None,
        }
    }

    /// Convert the key back into a JSON value.
    ///
    /// Integral numbers come back as JSON integers so generated keys injected
    /// into records read naturally.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                Value::from(*n as i64)
            }
            Key::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Key::String(s) => Value::String(s.clone()),
        }
    }

    /// Numeric value, if this is a number key.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            Key::String(_) => None,
        }
    }

    /// String value, if this is a string key.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            Key::Number(_) => None,
        }
    }

    /// Whether an engine may store or look up this key.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Key::Number(n) if n.is_nan())
    }
}

/// Fold `-0.0` into `0.0` so both compare equal.
fn canonical(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => canonical(*a).total_cmp(&canonical(*b)),
            (Key::Number(_), Key::String(_)) => Ordering::Less,
            (Key::String(_), Key::Number(_)) => Ordering::Greater,
            (Key::String(a), Key::String(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                write!(f, "{}", *n as i64)
            }
            Key::Number(n) => write!(f, "{}", n),
            Key::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_sort_before_strings() {
        let mut keys = vec![
            Key::from("b"),
            Key::from(10),
            Key::from("a"),
            Key::Number(-1.5),
            Key::from(2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Number(-1.5),
                Key::from(2),
                Key::from(10),
                Key::from("a"),
                Key::from("b"),
            ]
        );
    }

    #[test]
    fn test_from_value() {
        assert_eq!(Key::from_value(&json!(7)), Some(Key::from(7)));
        assert_eq!(Key::from_value(&json!("x")), Some(Key::from("x")));
        assert_eq!(Key::from_value(&json!(null)), None);
        assert_eq!(Key::from_value(&json!(true)), None);
        assert_eq!(Key::from_value(&json!([1, 2])), None);
        assert_eq!(Key::from_value(&json!({"a": 1})), None);
    }

    #[test]
    fn test_integral_keys_become_json_integers() {
        assert_eq!(Key::from(3).to_value(), json!(3));
        assert_eq!(Key::Number(2.5).to_value(), json!(2.5));
        assert_eq!(Key::from("id").to_value(), json!("id"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Key::from(42).to_string(), "42");
        assert_eq!(Key::Number(0.5).to_string(), "0.5");
        assert_eq!(Key::Number(-0.0).to_string(), "0");
        assert_eq!(Key::Number(1e20).to_string(), "100000000000000000000");
        assert_eq!(Key::from("k").to_string(), "\"k\"");
    }

    #[test]
    fn test_negative_zero_equals_zero() {
        assert_eq!(Key::Number(-0.0), Key::Number(0.0));
        assert!(Key::Number(-0.0) < Key::Number(f64::MIN_POSITIVE));
        assert!(Key::Number(-0.0) > Key::Number(-f64::MIN_POSITIVE));
    }

    #[test]
    fn test_validity_and_accessors() {
        assert!(!Key::Number(f64::NAN).is_valid());
        assert!(Key::Number(f64::INFINITY).is_valid());
        assert!(Key::from("").is_valid());
        assert_eq!(Key::from("id").as_str(), Some("id"));
        assert_eq!(Key::from(3).as_str(), None);
        assert_eq!(Key::from(3).as_number(), Some(3.0));
    }
}
