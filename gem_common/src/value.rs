//! Runtime values and their type systems.
//!
//! Two type vocabularies meet in the bridge:
//! - [`ValueType`] - the host-facing SECS item type declared per variable
//! - [`DataType`] - the controller-facing type used for a read or write
//!
//! [`Value`] is the neutral representation shared by both sides.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A runtime value held by a variable or exchanged with the controller.
///
/// Serialized untagged so the equipment document can carry plain JSON
/// literals (`true`, `3`, `2.5`, `"abc"`, `[1, 2]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Compare two values the way PLC handshakes are written in configuration:
    /// `true == 1`, `1 == 1.0`, strings and lists compare structurally.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Value::Str(a), Value::Str(b)) => a == b,
                (Value::List(a), Value::List(b)) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
                }
                _ => false,
            },
        }
    }

    /// Truthiness: zero, empty string and empty list are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Numeric view of scalar values (bools count as 0/1).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view; floats qualify only when they carry no fraction.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short variant name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

// ─── Host Value Types ───────────────────────────────────────────────

/// SECS item type declared for a status variable, data value or constant.
///
/// Fixed at registration; updates are coerced into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "ASCII")]
    Ascii,
    #[serde(rename = "BINARY")]
    Binary,
    #[serde(rename = "BOOL")]
    Bool,
    #[serde(rename = "INT_1")]
    I1,
    #[serde(rename = "INT_2")]
    I2,
    #[serde(rename = "INT_4")]
    I4,
    #[serde(rename = "INT_8")]
    I8,
    #[serde(rename = "UINT_1")]
    U1,
    #[serde(rename = "UINT_2")]
    U2,
    #[serde(rename = "UINT_4")]
    U4,
    #[serde(rename = "UINT_8")]
    U8,
    #[serde(rename = "F4")]
    F4,
    #[serde(rename = "F8")]
    F8,
    #[serde(rename = "ARRAY")]
    Array,
}

impl ValueType {
    /// Value a variable takes when the document omits one.
    pub fn default_value(self) -> Value {
        match self {
            ValueType::Ascii => Value::Str(String::new()),
            ValueType::Bool => Value::Bool(false),
            ValueType::F4 | ValueType::F8 => Value::Float(0.0),
            ValueType::Array => Value::List(Vec::new()),
            _ => Value::Int(0),
        }
    }

    /// Inclusive integer range for the integral item types.
    fn int_range(self) -> Option<(i64, i64)> {
        match self {
            ValueType::Binary | ValueType::U1 => Some((0, u8::MAX as i64)),
            ValueType::I1 => Some((i8::MIN as i64, i8::MAX as i64)),
            ValueType::I2 => Some((i16::MIN as i64, i16::MAX as i64)),
            ValueType::I4 => Some((i32::MIN as i64, i32::MAX as i64)),
            ValueType::I8 => Some((i64::MIN, i64::MAX)),
            ValueType::U2 => Some((0, u16::MAX as i64)),
            ValueType::U4 => Some((0, u32::MAX as i64)),
            ValueType::U8 => Some((0, i64::MAX)),
            _ => None,
        }
    }

    /// Convert `value` into this type, or `None` when it cannot represent it.
    ///
    /// `base` is the element type used for `ARRAY` variables.
    pub fn coerce(self, value: &Value, base: Option<ValueType>) -> Option<Value> {
        if let Some((min, max)) = self.int_range() {
            if self == ValueType::Binary {
                if let Value::List(items) = value {
                    return items
                        .iter()
                        .map(|item| ValueType::U1.coerce(item, None))
                        .collect::<Option<Vec<_>>>()
                        .map(Value::List);
                }
            }
            let raw = match value {
                Value::Str(s) => s.trim().parse::<i64>().ok()?,
                other => other.as_i64()?,
            };
            return (min..=max).contains(&raw).then_some(Value::Int(raw));
        }
        match self {
            ValueType::Ascii => match value {
                Value::Str(s) => Some(Value::Str(s.clone())),
                Value::List(_) => None,
                other => Some(Value::Str(other.to_string())),
            },
            ValueType::Bool => match value {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::Int(i) => Some(Value::Bool(*i != 0)),
                Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Some(Value::Bool(true)),
                    "false" | "0" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            ValueType::F4 | ValueType::F8 => match value {
                Value::Str(s) => s.trim().parse::<f64>().ok().map(Value::Float),
                other => other.as_f64().map(Value::Float),
            },
            ValueType::Array => match value {
                Value::List(items) => match base {
                    Some(base) if base != ValueType::Array => items
                        .iter()
                        .map(|item| base.coerce(item, None))
                        .collect::<Option<Vec<_>>>()
                        .map(Value::List),
                    _ => Some(Value::List(items.clone())),
                },
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Ascii => "ASCII",
            ValueType::Binary => "BINARY",
            ValueType::Bool => "BOOL",
            ValueType::I1 => "INT_1",
            ValueType::I2 => "INT_2",
            ValueType::I4 => "INT_4",
            ValueType::I8 => "INT_8",
            ValueType::U1 => "UINT_1",
            ValueType::U2 => "UINT_2",
            ValueType::U4 => "UINT_4",
            ValueType::U8 => "UINT_8",
            ValueType::F4 => "F4",
            ValueType::F8 => "F8",
            ValueType::Array => "ARRAY",
        };
        f.write_str(name)
    }
}

/// A variable value typed for transmission to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportValue {
    /// Declared item type.
    pub value_type: ValueType,
    /// Element type for `ARRAY` items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ValueType>,
    pub value: Value,
}

impl ReportValue {
    /// Type a stored value according to its declaration.
    ///
    /// Arrays without a declared element type are sent as `UINT_4` when every
    /// element is a non-negative integer and as `ASCII` otherwise.
    pub fn typed(value_type: ValueType, base: Option<ValueType>, value: &Value) -> Self {
        if value_type != ValueType::Array {
            return Self {
                value_type,
                item_type: None,
                value: value.clone(),
            };
        }
        let items = value.as_list().unwrap_or_default();
        let (item_type, items) = match base {
            Some(base) => (base, items.to_vec()),
            None => {
                let as_u4: Option<Vec<Value>> = items
                    .iter()
                    .map(|item| ValueType::U4.coerce(item, None))
                    .collect();
                match as_u4 {
                    Some(ints) => (ValueType::U4, ints),
                    None => (
                        ValueType::Ascii,
                        items
                            .iter()
                            .map(|item| {
                                ValueType::Ascii
                                    .coerce(item, None)
                                    .unwrap_or_else(|| Value::Str(item.to_string()))
                            })
                            .collect(),
                    ),
                }
            }
        };
        Self {
            value_type,
            item_type: Some(item_type),
            value: Value::List(items),
        }
    }
}

// ─── Controller Data Types ──────────────────────────────────────────

/// Data type of a controller address or tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    #[serde(alias = "dint", alias = "lint", alias = "sint", alias = "uint", alias = "udint")]
    Int,
    #[serde(alias = "real", alias = "lreal")]
    Float,
    #[serde(alias = "str")]
    String,
}

impl DataType {
    pub fn default_value(self) -> Value {
        match self {
            DataType::Bool => Value::Bool(false),
            DataType::Int => Value::Int(0),
            DataType::Float => Value::Float(0.0),
            DataType::String => Value::Str(String::new()),
        }
    }

    /// Convert a scalar into the representation this data type reads back as.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match self {
            DataType::Bool => ValueType::Bool.coerce(value, None),
            DataType::Int => ValueType::I8.coerce(value, None),
            DataType::Float => ValueType::F8.coerce(value, None),
            DataType::String => ValueType::Ascii.coerce(value, None),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::String => "string",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_untagged_deserialization() {
        let values: Vec<Value> = serde_json::from_str(r#"[true, 3, 2.5, "abc", [1, 2]]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Bool(true),
                Value::Int(3),
                Value::Float(2.5),
                Value::Str("abc".to_string()),
                Value::List(vec![Value::Int(1), Value::Int(2)]),
            ]
        );
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Bool(true).loosely_eq(&Value::Int(1)));
        assert!(Value::Int(1).loosely_eq(&Value::Float(1.0)));
        assert!(!Value::Int(0).loosely_eq(&Value::Bool(true)));
        assert!(!Value::Str("1".into()).loosely_eq(&Value::Int(1)));
        assert!(Value::from("a").loosely_eq(&Value::from("a")));
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::List(vec![Value::Int(0)]).is_truthy());
    }

    #[test]
    fn test_coerce_unsigned_range() {
        assert_eq!(ValueType::U1.coerce(&Value::Int(255), None), Some(Value::Int(255)));
        assert_eq!(ValueType::U1.coerce(&Value::Int(256), None), None);
        assert_eq!(ValueType::U4.coerce(&Value::Int(-1), None), None);
        assert_eq!(ValueType::U4.coerce(&Value::Bool(true), None), Some(Value::Int(1)));
        assert_eq!(ValueType::I2.coerce(&Value::Float(12.0), None), Some(Value::Int(12)));
        assert_eq!(ValueType::I2.coerce(&Value::Float(12.5), None), None);
    }

    #[test]
    fn test_coerce_text_and_float() {
        assert_eq!(ValueType::Ascii.coerce(&Value::Int(7), None), Some(Value::from("7")));
        assert_eq!(ValueType::F4.coerce(&Value::Int(2), None), Some(Value::Float(2.0)));
        assert_eq!(ValueType::F8.coerce(&Value::from("1.5"), None), Some(Value::Float(1.5)));
        assert_eq!(ValueType::Bool.coerce(&Value::from("true"), None), Some(Value::Bool(true)));
        assert_eq!(ValueType::Bool.coerce(&Value::Float(1.0), None), None);
    }

    #[test]
    fn test_coerce_array_with_base() {
        let list = Value::List(vec![Value::Int(1), Value::Bool(true)]);
        assert_eq!(
            ValueType::Array.coerce(&list, Some(ValueType::U4)),
            Some(Value::List(vec![Value::Int(1), Value::Int(1)]))
        );
        assert_eq!(ValueType::Array.coerce(&Value::Int(1), None), None);
    }

    #[test]
    fn test_report_value_array_fallback() {
        let ints = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let typed = ReportValue::typed(ValueType::Array, None, &ints);
        assert_eq!(typed.item_type, Some(ValueType::U4));

        let mixed = Value::List(vec![Value::Int(1), Value::from("x")]);
        let typed = ReportValue::typed(ValueType::Array, None, &mixed);
        assert_eq!(typed.item_type, Some(ValueType::Ascii));
        assert_eq!(typed.value, Value::List(vec![Value::from("1"), Value::from("x")]));
    }

    #[test]
    fn test_value_type_serde_names() {
        let vt: ValueType = serde_json::from_str("\"UINT_4\"").unwrap();
        assert_eq!(vt, ValueType::U4);
        assert_eq!(vt.to_string(), "UINT_4");
        let dt: DataType = serde_json::from_str("\"str\"").unwrap();
        assert_eq!(dt, DataType::String);
        let dt: DataType = serde_json::from_str("\"real\"").unwrap();
        assert_eq!(dt, DataType::Float);
    }
}
