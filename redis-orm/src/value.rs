use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 一条记录的声明字段，按字段名排序
pub type Fields = BTreeMap<String, Value>;

/// 字段值：字符串叶子，或在哈希中展平为 `field:sub` 的映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Map(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

impl Value {
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            Value::Text(_) => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            Value::Text(_) => None,
        }
    }

    /// 映射的子节点；叶子返回 `None`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// 空字符串或空映射
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Text(text) => text.is_empty(),
            Value::Map(map) => map.is_empty(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// 构造 [`Fields`]：`fields! { "name" => "Alice" }`
#[macro_export]
macro_rules! fields {
    () => {
        $crate::Fields::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::Fields::new();
        $(
            fields.insert(::std::string::String::from($name), $crate::Value::from($value));
        )+
        fields
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_nested_maps() {
        let value: Value = [("a", Value::from("1")), ("b", [("c", "2")].into_iter().collect())]
            .into_iter()
            .collect();
        assert_eq!(value.get("a"), Some(&Value::from("1")));
        assert_eq!(
            value.get("b").and_then(|b| b.get("c")).and_then(Value::as_str),
            Some("2")
        );
        assert!(value.get("a").unwrap().get("x").is_none());
    }

    #[test]
    fn serializes_untagged() {
        let value: Value = [("k", "v")].into_iter().collect();
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"k":"v"}"#);
        let back: Value = serde_json::from_str(r#"{"k":{"x":"y"}}"#).unwrap();
        assert_eq!(back.get("k").and_then(|k| k.get("x")), Some(&Value::from("y")));
    }

    #[test]
    fn fields_macro() {
        let fields = fields! { "name" => "Alice", "role" => String::from("admin") };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["name"], Value::from("Alice"));
        assert!(fields!().is_empty());
    }
}
