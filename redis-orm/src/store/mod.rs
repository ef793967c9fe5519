//! 映射层依赖的存储原语：哈希读写、键存在性、过期、模式扫描以及乐观事务。
//!
//! [`RedisStore`] 连接 Redis 服务，[`MemoryStore`] 把数据保存在进程内。

mod memory;
mod redis_store;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Error;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// 从存储读出的一条哈希记录
pub type Hash = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    HDel {
        key: String,
        fields: Vec<String>,
    },
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    Expire {
        key: String,
        seconds: i64,
    },
}

/// 原子执行的一组命令（`MULTI`/`EXEC`）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset<K, V>(&mut self, key: &str, fields: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields: Vec<(String, String)> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if !fields.is_empty() {
            self.ops.push(Op::HSet {
                key: key.to_string(),
                fields,
            });
        }
        self
    }

    pub fn hdel<K: Into<String>>(&mut self, key: &str, fields: impl IntoIterator<Item = K>) -> &mut Self {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if !fields.is_empty() {
            self.ops.push(Op::HDel {
                key: key.to_string(),
                fields,
            });
        }
        self
    }

    pub fn hincr_by(&mut self, key: &str, field: &str, delta: i64) -> &mut Self {
        self.ops.push(Op::HIncrBy {
            key: key.to_string(),
            field: field.to_string(),
            delta,
        });
        self
    }

    pub fn expire(&mut self, key: &str, seconds: i64) -> &mut Self {
        self.ops.push(Op::Expire {
            key: key.to_string(),
            seconds,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// 键是否存在，包括软删除中的记录
    async fn exists(&self, key: &str) -> Result<bool, Error>;

    /// 一次往返同时取得键是否存在及其中一个字段
    async fn exists_with_field(&self, key: &str, field: &str) -> Result<(bool, Option<String>), Error>;

    async fn hgetall(&self, key: &str) -> Result<Hash, Error>;

    /// 流水线方式读取多个键，不存在的键得到空哈希
    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<Hash>, Error>;

    /// 单步 `SCAN`，返回游标为 0 表示扫描结束
    ///
    /// 与 Redis 相同：整个扫描期间一直存在的键至少返回一次。
    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), Error>;

    async fn apply(&self, batch: Batch) -> Result<(), Error>;

    /// 开始监视 `key` 的乐观事务
    async fn watch(&self, key: &str) -> Result<Box<dyn Watch>, Error>;
}

/// 处于 `WATCH` 下的键，未提交即丢弃时事务作废
#[async_trait]
pub trait Watch: Send {
    async fn hget(&mut self, field: &str) -> Result<Option<String>, Error>;

    async fn hkeys(&mut self) -> Result<Vec<String>, Error>;

    /// 监视期间键未被改动时原子执行 `batch`；事务被放弃时返回 `false`
    async fn commit(self: Box<Self>, batch: Batch) -> Result<bool, Error>;
}

/// 转义 glob 元字符，使 `text` 在模式中只匹配自身
pub fn escape_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Redis 风格的 glob 匹配，支持 `*`、`?`、字符类 `[a-z]`/`[^a]` 以及 `\` 转义
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    match_from(&pattern, &text)
}

fn match_from(pattern: &[char], text: &[char]) -> bool {
    let Some(&head) = pattern.first() else {
        return text.is_empty();
    };
    match head {
        '*' => {
            let mut rest = pattern;
            while rest.first() == Some(&'*') {
                rest = &rest[1..];
            }
            if rest.is_empty() {
                return true;
            }
            (0..=text.len()).any(|skip| match_from(rest, &text[skip..]))
        }
        '?' => !text.is_empty() && match_from(&pattern[1..], &text[1..]),
        '\\' if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && match_from(&pattern[2..], &text[1..])
        }
        '[' => {
            let Some(&c) = text.first() else {
                return false;
            };
            match match_class(&pattern[1..], c) {
                Some((matched, rest)) => matched && match_from(rest, &text[1..]),
                None => c == '[' && match_from(&pattern[1..], &text[1..]),
            }
        }
        literal => text.first() == Some(&literal) && match_from(&pattern[1..], &text[1..]),
    }
}

/// 用 `[...]` 字符类匹配 `c`，返回结果与右括号之后的模式；字符类未闭合时返回 `None`
fn match_class(class: &[char], c: char) -> Option<(bool, &[char])> {
    let (negate, mut i) = match class.first() {
        Some('^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;
    while i < class.len() {
        match class[i] {
            ']' => return Some((matched != negate, &class[i + 1..])),
            '\\' if i + 1 < class.len() => {
                matched |= class[i + 1] == c;
                i += 2;
            }
            low if i + 2 < class.len() && class[i + 1] == '-' && class[i + 2] != ']' => {
                let high = class[i + 2];
                let (low, high) = if low <= high { (low, high) } else { (high, low) };
                matched |= low <= c && c <= high;
                i += 3;
            }
            single => {
                matched |= single == c;
                i += 1;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_wildcards() {
        assert!(glob_match("user:*", "user:abc"));
        assert!(glob_match("user:*", "user:"));
        assert!(!glob_match("user:*", "room:abc"));
        assert!(glob_match("h?llo", "hello"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("member::user:*::room:42", "member::user:a1::room:42"));
        assert!(!glob_match("member::user:*::room:42", "member::user:a1::room:420"));
    }

    #[test]
    fn glob_classes() {
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("id[0-9]", "id7"));
        assert!(!glob_match("id[0-9]", "idx"));
    }

    #[test]
    fn escaped_text_matches_literally() {
        let id = "a*b?[c]";
        let pattern = format!("code:{}", escape_pattern(id));
        assert!(glob_match(&pattern, "code:a*b?[c]"));
        assert!(!glob_match(&pattern, "code:aXXb?[c]"));
    }

    #[test]
    fn batch_skips_empty_writes() {
        let mut batch = Batch::new();
        batch
            .hset("k", Vec::<(String, String)>::new())
            .hdel("k", Vec::<String>::new());
        assert!(batch.is_empty());
        batch.hset("k", [("a", "1")]).hincr_by("k", "_version", 1).expire("k", 60);
        assert_eq!(batch.ops().len(), 3);
    }
}
