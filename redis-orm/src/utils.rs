use std::collections::BTreeMap;

use rand::Rng;

use crate::value::Value;

pub const ALPHABET: &str = "0123456789abcdef";
pub const DEFAULT_ID_LENGTH: usize = 10;

/// 基于 [`ALPHABET`] 的随机 id，唯一性由调用方检查
pub fn new_id(length: usize) -> String {
    random_string(ALPHABET, length)
}

pub fn random_string(alphabet: &str, length: usize) -> String {
    let symbols: Vec<char> = alphabet.chars().collect();
    if symbols.is_empty() {
        return String::new();
    }
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| symbols[rng.gen_range(0..symbols.len())])
        .collect()
}

/// 当前 UTC 时间，如 `2024-01-15T09:30:00Z`
pub fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// 把嵌套值展平为以 `:` 连接的哈希字段名
pub fn flatten(value: &Value, prefix: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    flatten_into(value, prefix, &mut out);
    out
}

pub(crate) fn flatten_fields(fields: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in fields {
        flatten_into(value, name, &mut out);
    }
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Text(text) => {
            out.insert(prefix.to_string(), text.clone());
        }
        Value::Map(map) => {
            for (key, child) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}:{key}")
                };
                flatten_into(child, &name, out);
            }
        }
    }
}

/// 由 `:` 连接的字段名还原嵌套结构。同时作为中间节点的叶子会被映射取代。
pub fn unflatten<'a, I>(flat: I) -> BTreeMap<String, Value>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut root = BTreeMap::new();
    for (name, value) in flat {
        let path: Vec<&str> = name.split(':').collect();
        insert_path(&mut root, &path, value);
    }
    root
}

fn insert_path(node: &mut BTreeMap<String, Value>, path: &[&str], value: &str) {
    let [segment, rest @ ..] = path else {
        return;
    };
    if rest.is_empty() {
        // 保留更长字段名已写入的嵌套数据
        if !matches!(node.get(*segment), Some(Value::Map(_))) {
            node.insert(segment.to_string(), Value::Text(value.to_string()));
        }
        return;
    }
    match node.entry(segment.to_string()).or_insert_with(Value::map) {
        Value::Map(child) => insert_path(child, rest, value),
        leaf => {
            let mut child = BTreeMap::new();
            insert_path(&mut child, rest, value);
            *leaf = Value::Map(child);
        }
    }
}
