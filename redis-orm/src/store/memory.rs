use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Batch, Hash, Op, Store, Watch, glob_match};
use crate::Error;

/// 进程内存储，语义与 Redis 哈希一致，用于测试和本地运行。
///
/// 每次写入都会给键打上新的修订号；提交时修订号已变化的 [`Watch`] 会放弃事务，与 `WATCH` 相同。
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Record>,
    clock: u64,
    /// 已发出的扫描游标 → 该页最后一个键
    cursors: HashMap<u64, String>,
    next_cursor: u64,
}

struct Record {
    fields: BTreeMap<String, String>,
    expires_at: Option<Instant>,
    revision: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn purge(&mut self, key: &str) {
        let expired = self
            .records
            .get(key)
            .and_then(|r| r.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.records.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&Record> {
        self.purge(key);
        self.records.get(key)
    }

    fn revision(&mut self, key: &str) -> Option<u64> {
        self.live(key).map(|r| r.revision)
    }

    fn apply(&mut self, batch: &Batch) -> Result<(), Error> {
        for op in batch.ops() {
            match op {
                Op::HSet { key, fields } => {
                    self.purge(key);
                    let revision = self.tick();
                    let record = self.records.entry(key.clone()).or_insert_with(|| Record {
                        fields: BTreeMap::new(),
                        expires_at: None,
                        revision,
                    });
                    record.revision = revision;
                    for (field, value) in fields {
                        record.fields.insert(field.clone(), value.clone());
                    }
                }
                Op::HDel { key, fields } => {
                    self.purge(key);
                    let revision = self.tick();
                    let Some(record) = self.records.get_mut(key) else {
                        continue;
                    };
                    record.revision = revision;
                    for field in fields {
                        record.fields.remove(field);
                    }
                    if record.fields.is_empty() {
                        self.records.remove(key);
                    }
                }
                Op::HIncrBy { key, field, delta } => {
                    self.purge(key);
                    let revision = self.tick();
                    let record = self.records.entry(key.clone()).or_insert_with(|| Record {
                        fields: BTreeMap::new(),
                        expires_at: None,
                        revision,
                    });
                    let current: i64 = match record.fields.get(field) {
                        Some(value) => value.parse().map_err(Error::InvalidVersion)?,
                        None => 0,
                    };
                    record.fields.insert(field.clone(), (current + delta).to_string());
                    record.revision = revision;
                }
                Op::Expire { key, seconds } => {
                    self.purge(key);
                    if *seconds <= 0 {
                        self.records.remove(key);
                        continue;
                    }
                    let revision = self.tick();
                    if let Some(record) = self.records.get_mut(key) {
                        record.expires_at =
                            Some(Instant::now() + Duration::from_secs(*seconds as u64));
                        record.revision = revision;
                    }
                }
            }
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, Inner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::LockPoisoned(operation))
    }

    /// 未过期的键数量
    pub fn len(&self) -> Result<usize, Error> {
        let mut inner = self.lock("len")?;
        let keys: Vec<String> = inner.records.keys().cloned().collect();
        Ok(keys.iter().filter(|k| inner.live(k).is_some()).count())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// `key` 剩余的存活时间
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>, Error> {
        let mut inner = self.lock("ttl")?;
        Ok(inner
            .live(key)
            .and_then(|r| r.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    fn sync_hgetall(&self, key: &str) -> Result<Hash, Error> {
        let mut inner = self.lock("hgetall")?;
        Ok(inner
            .live(key)
            .map(|r| r.fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    // 游标记录上一页的最后一个键，下一页从其后的第一个存活键开始，
    // 中途删除的键不会让后面的键错位
    fn sync_scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>), Error> {
        let mut inner = self.lock("scan")?;
        let after = match cursor {
            0 => None,
            cursor => Some(inner.cursors.get(&cursor).cloned().ok_or_else(|| {
                Error::InvalidKey(format!("unknown scan cursor {cursor}"))
            })?),
        };

        let mut keys: Vec<String> = inner
            .records
            .keys()
            .filter(|k| after.as_ref().is_none_or(|last| k.as_str() > last.as_str()))
            .cloned()
            .collect();
        keys.retain(|k| inner.live(k).is_some());
        keys.sort();

        let end = count.max(1).min(keys.len());
        let next = match keys[..end].last() {
            Some(last) if end < keys.len() => {
                inner.next_cursor += 1;
                let issued = inner.next_cursor;
                inner.cursors.insert(issued, last.clone());
                issued
            }
            _ => 0,
        };
        let matched = keys[..end]
            .iter()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        Ok((next, matched))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, Error> {
        Ok(self.lock("exists")?.live(key).is_some())
    }

    async fn exists_with_field(&self, key: &str, field: &str) -> Result<(bool, Option<String>), Error> {
        let mut inner = self.lock("exists_with_field")?;
        Ok(match inner.live(key) {
            Some(record) => (true, record.fields.get(field).cloned()),
            None => (false, None),
        })
    }

    async fn hgetall(&self, key: &str) -> Result<Hash, Error> {
        self.sync_hgetall(key)
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<Hash>, Error> {
        keys.iter().map(|k| self.sync_hgetall(k)).collect()
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), Error> {
        self.sync_scan(pattern, cursor, count)
    }

    async fn apply(&self, batch: Batch) -> Result<(), Error> {
        self.lock("apply")?.apply(&batch)
    }

    async fn watch(&self, key: &str) -> Result<Box<dyn Watch>, Error> {
        let revision = self.lock("watch")?.revision(key);
        Ok(Box::new(MemoryWatch {
            store: self.clone(),
            key: key.to_string(),
            revision,
        }))
    }
}

struct MemoryWatch {
    store: MemoryStore,
    key: String,
    revision: Option<u64>,
}

#[async_trait]
impl Watch for MemoryWatch {
    async fn hget(&mut self, field: &str) -> Result<Option<String>, Error> {
        let mut inner = self.store.lock("watch hget")?;
        Ok(inner
            .live(&self.key)
            .and_then(|r| r.fields.get(field).cloned()))
    }

    async fn hkeys(&mut self) -> Result<Vec<String>, Error> {
        let mut inner = self.store.lock("watch hkeys")?;
        Ok(inner
            .live(&self.key)
            .map(|r| r.fields.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(self: Box<Self>, batch: Batch) -> Result<bool, Error> {
        let mut inner = self.store.lock("commit")?;
        if inner.revision(&self.key) != self.revision {
            return Ok(false);
        }
        inner.apply(&batch)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_roundtrip() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.hset("user:1", [("name", "Alice"), ("_version", "0")]);
        store.apply(batch).await.unwrap();

        assert!(store.exists("user:1").await.unwrap());
        let hash = store.hgetall("user:1").await.unwrap();
        assert_eq!(hash.get("name").map(String::as_str), Some("Alice"));
        assert_eq!(
            store.exists_with_field("user:1", "_deleted").await.unwrap(),
            (true, None)
        );
        assert_eq!(store.exists_with_field("user:2", "name").await.unwrap(), (false, None));
    }

    #[tokio::test]
    async fn deleting_last_field_removes_key() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.hset("k", [("a", "1")]).hdel("k", ["a"]);
        store.apply(batch).await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn incr_by_counts_from_zero() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.hincr_by("k", "_version", 1).hincr_by("k", "_version", 1);
        store.apply(batch).await.unwrap();
        assert_eq!(store.hgetall("k").await.unwrap()["_version"], "2");

        let mut bad = Batch::new();
        bad.hset("k", [("name", "x")]).hincr_by("k", "name", 1);
        assert!(matches!(
            store.apply(bad).await,
            Err(Error::InvalidVersion(_))
        ));
    }

    #[tokio::test]
    async fn expiry() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.hset("a", [("f", "1")]).expire("a", 60);
        batch.hset("b", [("f", "1")]).expire("b", 0);
        batch.expire("missing", 60);
        store.apply(batch).await.unwrap();

        assert!(store.ttl("a").unwrap().is_some());
        assert!(!store.exists("b").await.unwrap());
        assert!(!store.exists("missing").await.unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn scan_pages_through_matches() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        for i in 0..25 {
            batch.hset(&format!("user:{i:02}"), [("name", "x")]);
        }
        batch.hset("room:1", [("name", "x")]);
        store.apply(batch).await.unwrap();

        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, keys) = store.scan("user:*", cursor, 10).await.unwrap();
            found.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(found.len(), 25);
        assert!(found.iter().all(|k| k.starts_with("user:")));
    }

    #[tokio::test]
    async fn watch_aborts_on_concurrent_write() {
        let store = MemoryStore::new();
        let mut seed = Batch::new();
        seed.hset("k", [("_version", "0")]);
        store.apply(seed).await.unwrap();

        let mut watch = store.watch("k").await.unwrap();
        assert_eq!(watch.hget("_version").await.unwrap().as_deref(), Some("0"));

        let mut other = Batch::new();
        other.hincr_by("k", "_version", 1);
        store.apply(other).await.unwrap();

        let mut mine = Batch::new();
        mine.hset("k", [("_version", "1")]);
        assert!(!watch.commit(mine).await.unwrap());
        assert_eq!(store.hgetall("k").await.unwrap()["_version"], "1");
    }

    #[tokio::test]
    async fn watch_commits_when_untouched() {
        let store = MemoryStore::new();
        let watch = store.watch("fresh").await.unwrap();
        let mut batch = Batch::new();
        batch.hset("fresh", [("_version", "0")]);
        assert!(watch.commit(batch).await.unwrap());

        // 监视开始后才创建的键也算作改动
        let watch = store.watch("later").await.unwrap();
        let mut batch = Batch::new();
        batch.hset("later", [("x", "1")]);
        store.apply(batch.clone()).await.unwrap();
        assert!(!watch.commit(batch).await.unwrap());
    }

    #[tokio::test]
    async fn scan_survives_removal_between_pages() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        for key in ["k:a", "k:b", "k:c", "k:d"] {
            batch.hset(key, [("f", "1")]);
        }
        store.apply(batch).await.unwrap();

        let (cursor, first) = store.scan("k:*", 0, 2).await.unwrap();
        assert_eq!(first, ["k:a", "k:b"]);
        assert_ne!(cursor, 0);

        let mut removal = Batch::new();
        removal.hdel("k:a", ["f"]);
        store.apply(removal).await.unwrap();

        let (next, second) = store.scan("k:*", cursor, 2).await.unwrap();
        assert_eq!(second, ["k:c", "k:d"]);
        assert_eq!(next, 0);
    }

    #[tokio::test]
    async fn scan_rejects_unknown_cursor() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.scan("*", 42, 10).await,
            Err(Error::InvalidKey(_))
        ));
    }
}
