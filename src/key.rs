//! 容器查询键
//!
//! 目标对象上的键字段可能是数字、字符串或布尔值；容器的数据也可能以不同的
//! 类型作为键（例如字典表以字符串 "1" 存储，而目标对象上是整数 1）。
//! `Key` 统一了这些情况，并提供数字与字符串之间的互相转换用于匹配。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// 一次查询请求的键集合（有序、去重）
pub type KeySet = BTreeSet<Key>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Key {
    /// 从 JSON 值提取键；null、数组、对象以及非整数浮点数不构成键
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Key::Int(i))
                } else if let Some(u) = n.as_u64() {
                    i64::try_from(u).ok().map(Key::Int)
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Key::Int(f as i64))
                }
            }
            Value::String(s) => Some(Key::Str(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// 多对多键字段：数组逐项提取，字符串按逗号拆分（数字片段视为整数），其余同 `from_value`
    ///
    /// 保持字段上的顺序；不能构成键的元素被跳过，嵌套数组不再展开。
    pub fn from_value_list(value: &Value) -> Vec<Key> {
        match value {
            Value::Array(items) => items.iter().filter_map(Key::from_value).collect(),
            Value::String(s) => s
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(Key::parse_lenient)
                .collect(),
            other => Key::from_value(other).into_iter().collect(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::from(*i),
            Key::Str(s) => Value::String(s.clone()),
        }
    }

    /// 另一种表示形式：`Int(1)` <-> `Str("1")`
    pub fn coerced(&self) -> Option<Key> {
        match self {
            Key::Int(i) => Some(Key::Str(i.to_string())),
            Key::Str(s) => s.trim().parse::<i64>().ok().map(Key::Int),
            Key::Bool(_) => None,
        }
    }

    /// 解析配置文件中的字符串键：能解析为整数则视为整数
    pub fn parse_lenient(raw: &str) -> Key {
        match raw.parse::<i64>() {
            Ok(i) => Key::Int(i),
            Err(_) => Key::Str(raw.to_string()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bool(b) => write!(f, "{}", b),
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(value as i64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(value)
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Key::Bool(value)
    }
}

/// 便捷构造 `KeySet`
pub fn key_set<I, K>(keys: I) -> KeySet
where
    I: IntoIterator<Item = K>,
    K: Into<Key>,
{
    keys.into_iter().map(Into::into).collect()
}
