//! Attribute value model: declared value types, typed values, raw property maps.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw property map as delivered by the configuration substrate.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Declared scalar type of a property attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    Double,
    String,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::String => "string",
        };
        f.write_str(s)
    }
}

/// A typed attribute value after conversion from the raw property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Array(Vec<AttrValue>),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(i64::from(*v)),
            AttrValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Convert back into the raw JSON representation.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Bool(b) => serde_json::Value::Bool(*b),
            AttrValue::Int(v) => serde_json::Value::from(*v),
            AttrValue::Long(v) => serde_json::Value::from(*v),
            AttrValue::Double(v) => serde_json::Value::from(*v),
            AttrValue::String(s) => serde_json::Value::String(s.clone()),
            AttrValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(AttrValue::to_json).collect())
            }
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Long(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Double(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::String(v)
    }
}

/// Convert a single raw JSON scalar into the declared type.
///
/// Numbers and booleans may also be given as text; text is trimmed and parsed
/// with `str::parse`, which does not depend on the process locale.
pub(crate) fn convert_scalar(raw: &serde_json::Value, ty: ValueType) -> Result<AttrValue, String> {
    use serde_json::Value;

    match (ty, raw) {
        (ValueType::Bool, Value::Bool(b)) => Ok(AttrValue::Bool(*b)),
        (ValueType::Bool, Value::String(s)) => match s.trim() {
            "true" => Ok(AttrValue::Bool(true)),
            "false" => Ok(AttrValue::Bool(false)),
            other => Err(format!("malformed bool literal '{other}'")),
        },
        (ValueType::Int, Value::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(AttrValue::Int)
            .ok_or_else(|| format!("number {n} is not a 32-bit integer")),
        (ValueType::Int, Value::String(s)) => s
            .trim()
            .parse::<i32>()
            .map(AttrValue::Int)
            .map_err(|e| format!("malformed int literal '{s}': {e}")),
        (ValueType::Long, Value::Number(n)) => n
            .as_i64()
            .map(AttrValue::Long)
            .ok_or_else(|| format!("number {n} is not a 64-bit integer")),
        (ValueType::Long, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(AttrValue::Long)
            .map_err(|e| format!("malformed long literal '{s}': {e}")),
        (ValueType::Double, Value::Number(n)) => n
            .as_f64()
            .map(AttrValue::Double)
            .ok_or_else(|| format!("number {n} is not representable as double")),
        (ValueType::Double, Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(AttrValue::Double(v)),
            Ok(_) => Err(format!("double literal '{s}' is not finite")),
            Err(e) => Err(format!("malformed double literal '{s}': {e}")),
        },
        (ValueType::String, Value::String(s)) => Ok(AttrValue::String(s.clone())),
        (ty, other) => Err(format!("expected {ty}, got {}", json_kind(other))),
    }
}

/// Coerce an already typed value (a descriptor default) into the declared
/// type and shape, with the same rules as raw configuration values.
pub(crate) fn conform(value: &AttrValue, ty: ValueType, multiple: bool) -> Result<AttrValue, String> {
    match (multiple, value) {
        (true, AttrValue::Array(items)) => items
            .iter()
            .map(|item| convert_scalar(&item.to_json(), ty))
            .collect::<Result<Vec<_>, _>>()
            .map(AttrValue::Array),
        (true, _) => Err(format!("expected an array of {ty}, got a single value")),
        (false, AttrValue::Array(_)) => Err(format!("expected a single {ty}, got an array")),
        (false, scalar) => convert_scalar(&scalar.to_json(), ty),
    }
}

pub(crate) fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_literals_convert_to_declared_scalars() {
        assert_eq!(convert_scalar(&json!("42"), ValueType::Int), Ok(AttrValue::Int(42)));
        assert_eq!(convert_scalar(&json!(" -7 "), ValueType::Long), Ok(AttrValue::Long(-7)));
        assert_eq!(convert_scalar(&json!("true"), ValueType::Bool), Ok(AttrValue::Bool(true)));
        assert_eq!(
            convert_scalar(&json!("2.5"), ValueType::Double),
            Ok(AttrValue::Double(2.5))
        );
    }

    #[test]
    fn malformed_literals_are_rejected() {
        assert!(convert_scalar(&json!("4,2"), ValueType::Double).is_err());
        assert!(convert_scalar(&json!("yes"), ValueType::Bool).is_err());
        assert!(convert_scalar(&json!("12abc"), ValueType::Int).is_err());
    }

    #[test]
    fn strings_are_not_converted_from_numbers() {
        let err = convert_scalar(&json!(12), ValueType::String).unwrap_err();
        assert!(err.contains("expected string"), "{err}");
    }

    #[test]
    fn int_range_is_enforced() {
        assert!(convert_scalar(&json!(i64::from(i32::MAX) + 1), ValueType::Int).is_err());
        assert_eq!(
            convert_scalar(&json!(i64::from(i32::MAX) + 1), ValueType::Long),
            Ok(AttrValue::Long(i64::from(i32::MAX) + 1))
        );
    }

    #[test]
    fn non_finite_doubles_are_rejected() {
        assert!(convert_scalar(&json!("NaN"), ValueType::Double).is_err());
        assert!(convert_scalar(&json!(" inf "), ValueType::Double).is_err());
        assert!(convert_scalar(&json!("-infinity"), ValueType::Double).is_err());
    }

    #[test]
    fn defaults_conform_to_declared_type() {
        assert_eq!(conform(&AttrValue::Int(80), ValueType::Long, false), Ok(AttrValue::Long(80)));
        assert_eq!(
            conform(&AttrValue::Int(2), ValueType::Double, false),
            Ok(AttrValue::Double(2.0))
        );
        assert_eq!(
            conform(&AttrValue::Array(vec![AttrValue::Long(1)]), ValueType::Int, true),
            Ok(AttrValue::Array(vec![AttrValue::Int(1)]))
        );
        assert!(conform(&AttrValue::Double(f64::NAN), ValueType::Double, false).is_err());
        assert!(conform(&AttrValue::Int(1), ValueType::String, false).is_err());
        assert!(conform(&AttrValue::Int(1), ValueType::Int, true).is_err());
        assert!(conform(&AttrValue::Long(i64::MAX), ValueType::Int, false).is_err());
    }

    #[test]
    fn arrays_compare_element_wise() {
        let a = AttrValue::Array(vec![AttrValue::Int(1), AttrValue::Int(2)]);
        let b = AttrValue::Array(vec![AttrValue::Int(1), AttrValue::Int(2)]);
        let c = AttrValue::Array(vec![AttrValue::Int(2), AttrValue::Int(1)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
