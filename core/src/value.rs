//! 运行时字段值与绑定参数

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, Serializer};

use crate::schema::ColumnType;

/// 字段值，同时也是 SQL 绑定值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Blob(Vec<u8>),
}

impl Value {
    /// 值对应的列类型；`Null` 没有类型
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Text(_) => Some(ColumnType::Text),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::Blob(_) => Some(ColumnType::Blob),
        }
    }

    /// `Null` 与任何列类型兼容
    pub fn is_compatible(&self, column_type: ColumnType) -> bool {
        match self.column_type() {
            None => true,
            Some(ty) => ty == column_type,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// 用于错误信息的类型名
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
            Value::Blob(_) => "blob",
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Timestamp(t) => serializer.serialize_str(&t.to_rfc3339()),
            Value::Blob(b) => b.serialize(serializer),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f64::from(f))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// 单个位置参数；列类型用于给 NULL 绑定正确的 SQL 类型
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    pub column_type: ColumnType,
}

impl Param {
    pub fn new(value: Value, column_type: ColumnType) -> Self {
        Self { value, column_type }
    }

    /// 根据值本身推断列类型（NULL 视为文本）
    pub fn infer(value: Value) -> Self {
        let column_type = value.column_type().unwrap_or(ColumnType::Text);
        Self { value, column_type }
    }
}

/// 参数化语句：SQL 文本 + 按顺序排列的绑定参数
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn values(&self) -> Vec<&Value> {
        self.params.iter().map(|p| &p.value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_compatible_with_every_type() {
        for ty in [
            ColumnType::Text,
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::Boolean,
            ColumnType::Timestamp,
            ColumnType::Blob,
        ] {
            assert!(Value::Null.is_compatible(ty));
        }
    }

    #[test]
    fn test_strict_type_compatibility() {
        assert!(Value::from("Test").is_compatible(ColumnType::Text));
        assert!(!Value::from("Test").is_compatible(ColumnType::Integer));
        assert!(!Value::from(1_i64).is_compatible(ColumnType::Float));
        assert!(Value::from(true).is_compatible(ColumnType::Boolean));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(3_i32)), Value::Integer(3));
    }

    #[test]
    fn test_param_infer() {
        assert_eq!(Param::infer(Value::Null).column_type, ColumnType::Text);
        assert_eq!(
            Param::infer(Value::Float(1.5)).column_type,
            ColumnType::Float
        );
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&vec![
            Value::Null,
            Value::from("about:blank"),
            Value::from(7_i64),
            Value::from(false),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,"about:blank",7,false]"#);
    }
}
