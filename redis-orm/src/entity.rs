use std::{fmt, marker::PhantomData, pin::Pin};

use async_stream::try_stream;
use futures::Stream;

use crate::{
    Batch, Error, Fields, Value, connection,
    store::Hash,
    utils::{flatten_fields, now, unflatten},
};

pub const CREATED: &str = "_created";
pub const EDITED: &str = "_edited";
pub const VERSION: &str = "_version";
pub const DELETED: &str = "_deleted";

/// 由系统维护的元字段
pub const META_FIELDS: [&str; 4] = [CREATED, EDITED, VERSION, DELETED];

/// 软删除后记录在存储中保留的秒数
pub const DEL_EXPIRE: i64 = 60;

/// 一类哈希记录的静态描述
pub trait Model: Send + Sync + 'static {
    /// 类型名；对象以其小写形式作为键前缀，关系以其作为键的首段
    const NAME: &'static str;

    /// 允许读写的字段名
    const FIELDS: &'static [&'static str];
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    pub created: String,
    pub edited: String,
    /// 保存前为 -1，首次保存后为 0
    pub version: i64,
}

/// 存放在任意键上的一条哈希记录
pub struct Entity<M> {
    key: String,
    data: Fields,
    meta: Meta,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for Entity<M> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            data: self.data.clone(),
            meta: self.meta.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M: Model> fmt::Debug for Entity<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(M::NAME)
            .field("key", &self.key)
            .field("data", &self.data)
            .field("meta", &self.meta)
            .finish()
    }
}

pub(crate) fn is_meta(name: &str) -> bool {
    META_FIELDS.contains(&name)
}

fn is_deleted(hash: &Hash) -> bool {
    hash.get(DELETED).is_some_and(|stamp| !stamp.is_empty())
}

fn parse_version(raw: Option<&String>) -> Result<i64, Error> {
    match raw {
        Some(version) if !version.is_empty() => version.parse().map_err(Error::InvalidVersion),
        _ => Ok(-1),
    }
}

fn unknown_field<M: Model>(name: &str) -> Error {
    Error::ValidationError(format!("'{}' has no field '{}'", M::NAME, name))
}

impl<M: Model> Entity<M> {
    /// 未保存的新记录，未赋值的声明字段读作 `""`
    pub fn new(key: impl Into<String>, fields: Fields) -> Result<Self, Error> {
        let mut entity = Self {
            key: key.into(),
            data: M::FIELDS
                .iter()
                .map(|name| (name.to_string(), Value::default()))
                .collect(),
            meta: Meta {
                version: -1,
                ..Meta::default()
            },
            _marker: PhantomData,
        };
        for (name, value) in fields {
            entity.set_field(&name, value)?;
        }
        Ok(entity)
    }

    pub(crate) fn from_hash(key: String, hash: &Hash) -> Result<Option<Self>, Error> {
        if hash.is_empty() {
            log::warn!("No match for {} with key {}", M::NAME, key);
            return Ok(None);
        }
        if is_deleted(hash) {
            log::warn!("{} with key {} marked for deletion", M::NAME, key);
            return Ok(None);
        }

        let mut data = unflatten(hash.iter().filter(|(name, _)| !is_meta(name)));
        data.retain(|name, _| {
            let declared = M::FIELDS.contains(&name.as_str());
            if !declared {
                log::warn!("Dropping undeclared field '{}' of {} {}", name, M::NAME, key);
            }
            declared
        });
        for name in M::FIELDS {
            data.entry(name.to_string()).or_default();
        }

        let meta = Meta {
            created: hash.get(CREATED).cloned().unwrap_or_default(),
            edited: hash.get(EDITED).cloned().unwrap_or_default(),
            version: parse_version(hash.get(VERSION))?,
        };

        Ok(Some(Self {
            key,
            data,
            meta,
            _marker: PhantomData,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn version(&self) -> i64 {
        self.meta.version
    }

    pub fn fields(&self) -> &Fields {
        &self.data
    }

    pub fn field(&self, name: &str) -> Result<&Value, Error> {
        self.data.get(name).ok_or_else(|| unknown_field::<M>(name))
    }

    /// 文本字段的值；字段存放嵌套数据时报错
    pub fn text(&self, name: &str) -> Result<&str, Error> {
        self.field(name)?.as_str().ok_or_else(|| {
            Error::ValidationError(format!("field '{}' of {} holds nested data", name, M::NAME))
        })
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        let Some(slot) = self.data.get_mut(name) else {
            return Err(unknown_field::<M>(name));
        };
        *slot = value.into();
        Ok(())
    }

    /// 字段与元字段合并后的 JSON 形式
    pub fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut attributes: serde_json::Map<String, serde_json::Value> = self
            .data
            .iter()
            .map(|(name, value)| (name.clone(), to_json(value)))
            .collect();
        attributes.insert(CREATED.to_string(), self.meta.created.clone().into());
        attributes.insert(EDITED.to_string(), self.meta.edited.clone().into());
        attributes.insert(VERSION.to_string(), self.meta.version.into());
        attributes
    }

    /// 新建记录；键已存在（包括软删除中的）时返回冲突
    pub async fn create(key: impl Into<String>, fields: Fields) -> Result<Self, Error> {
        let mut entity = Self::new(key, fields)?;
        if connection::get()?.exists(&entity.key).await? {
            log::error!("Create conflict: {} key {} already exists", M::NAME, entity.key);
            return Err(Error::ConflictError(format!(
                "{}.create: {} already exists",
                M::NAME,
                entity.key
            )));
        }
        entity.meta.created = now();
        entity.save().await
    }

    /// 键存在且未被软删除
    pub async fn exists(key: &str) -> Result<bool, Error> {
        let (exists, deleted) = connection::get()?.exists_with_field(key, DELETED).await?;
        Ok(exists && deleted.is_none_or(|stamp| stamp.is_empty()))
    }

    pub async fn get(key: &str) -> Result<Option<Self>, Error> {
        log::info!("Loading {} with key {}", M::NAME, key);
        let hash = connection::get()?.hgetall(key).await?;
        Self::from_hash(key.to_string(), &hash)
    }

    /// 乐观锁保存：服务端版本与本地不一致、记录已删除或提交时键被改动，
    /// 均返回 [`Error::ConflictError`]。成功后本地记录刷新为提交后的状态。
    pub async fn save(&mut self) -> Result<Self, Error> {
        let store = connection::get()?;
        let mut watch = store.watch(&self.key).await?;

        if watch.hget(DELETED).await?.is_some_and(|stamp| !stamp.is_empty()) {
            log::error!("Save conflict: {} {} is marked for deletion", M::NAME, self.key);
            return Err(Error::ConflictError(format!(
                "{} is marked for deletion",
                self.key
            )));
        }

        let server_version = parse_version(watch.hget(VERSION).await?.as_ref())?;
        if server_version != self.meta.version {
            log::error!(
                "Optimistic lock failure: {} server version {} != instance version {}",
                self.key,
                server_version,
                self.meta.version
            );
            return Err(Error::ConflictError(format!(
                "Version mismatch: on server {}, on instance {}.",
                server_version, self.meta.version
            )));
        }

        let flattened = flatten_fields(&self.data);
        // 旧结构中不再出现的子字段需要一并删除
        let stale: Vec<String> = watch
            .hkeys()
            .await?
            .into_iter()
            .filter(|name| !is_meta(name) && !flattened.contains_key(name))
            .filter(|name| {
                let root = name.split(':').next().unwrap_or(name);
                M::FIELDS.contains(&root)
            })
            .collect();

        let created = if self.meta.created.is_empty() {
            now()
        } else {
            self.meta.created.clone()
        };
        let mut batch = Batch::new();
        batch.hdel(&self.key, stale).hset(
            &self.key,
            flattened.into_iter().chain([
                (CREATED.to_string(), created),
                (EDITED.to_string(), now()),
                (VERSION.to_string(), (self.meta.version + 1).to_string()),
            ]),
        );

        if !watch.commit(batch).await? {
            log::error!("Concurrent edit detected for {}, aborting save", self.key);
            return Err(Error::ConflictError(
                "Concurrent edit detected, aborting.".to_string(),
            ));
        }

        let Some(fresh) = Self::get(&self.key).await? else {
            return Err(Error::ConflictError(format!(
                "{} vanished right after save",
                self.key
            )));
        };
        log::info!("{} with key {} saved (version {})", M::NAME, self.key, fresh.meta.version);
        *self = fresh.clone();
        Ok(fresh)
    }

    /// 软删除：写入删除时间并设置过期，不会立即移除键
    pub async fn delete(&self) -> Result<bool, Error> {
        let store = connection::get()?;
        let (exists, deleted) = store.exists_with_field(&self.key, DELETED).await?;
        if !exists || deleted.is_some_and(|stamp| !stamp.is_empty()) {
            log::warn!("{} with key {} already gone, skipping delete", M::NAME, self.key);
            return Ok(false);
        }

        let mut batch = Batch::new();
        batch
            .hset(&self.key, [(DELETED, now())])
            .expire(&self.key, DEL_EXPIRE);
        store.apply(batch).await?;
        log::info!("{} with key {} deleted", M::NAME, self.key);
        Ok(true)
    }

    /// 不做版本校验的单字段更新，版本号仍然加一
    ///
    /// `field` 可以是 `email:domain` 形式的展开路径。`is_new` 为 `true` 时要求
    /// 字段尚不存在，为 `false` 时要求已存在。记录不存在或已删除时返回 `false`。
    pub async fn patch(
        key: &str,
        field: &str,
        value: impl Into<String>,
        is_new: bool,
    ) -> Result<bool, Error> {
        let root = field.split(':').next().unwrap_or(field);
        if is_meta(root) || !M::FIELDS.contains(&root) {
            return Err(unknown_field::<M>(root));
        }

        let store = connection::get()?;
        let hash = store.hgetall(key).await?;
        if hash.is_empty() || is_deleted(&hash) {
            log::warn!("{} {} missing or deleted, skipping patch", M::NAME, key);
            return Ok(false);
        }

        let segments: Vec<&str> = field.split(':').collect();
        let mut empty_markers = Vec::new();
        for depth in 1..segments.len() {
            let ancestor = segments[..depth].join(":");
            match hash.get(&ancestor) {
                Some(data) if !data.is_empty() => {
                    log::error!("Patch conflict: {} base field '{}' contains data", key, ancestor);
                    return Err(Error::ConflictError(format!(
                        "Cannot patch nested field '{}': base field '{}' contains data",
                        field, ancestor
                    )));
                }
                Some(_) => empty_markers.push(ancestor),
                None => {}
            }
        }

        let present = hash.contains_key(field);
        if is_new && present {
            log::error!("Patch conflict: {} already has field '{}'", key, field);
            return Err(Error::ConflictError(format!(
                "'{}' already has attribute '{}'",
                M::NAME,
                field
            )));
        }
        if !is_new && !present {
            log::error!("Patch conflict: {} has no field '{}'", key, field);
            return Err(Error::ConflictError(format!(
                "'{}' object has no attribute '{}'",
                M::NAME,
                field
            )));
        }

        let nested = format!("{field}:");
        if hash.keys().any(|name| name.starts_with(&nested)) {
            log::error!("Patch conflict: {} field '{}' holds nested fields", key, field);
            return Err(Error::ConflictError(format!(
                "Cannot patch field '{}': it holds nested fields",
                field
            )));
        }

        let value = value.into();
        let mut batch = Batch::new();
        batch
            .hdel(key, empty_markers)
            .hset(key, [(field.to_string(), value.clone()), (EDITED.to_string(), now())])
            .hincr_by(key, VERSION, 1);
        store.apply(batch).await?;
        log::info!("Patched {}:{} for {}", field, value, key);
        Ok(true)
    }

    /// 按模式扫描一步，返回本批记录和下一个游标（0 表示结束）
    pub async fn search(pattern: &str, cursor: u64, count: usize) -> Result<(Vec<Self>, u64), Error> {
        Self::search_where(pattern, cursor, count, |_| true).await
    }

    pub(crate) async fn search_where(
        pattern: &str,
        cursor: u64,
        count: usize,
        keep: impl Fn(&str) -> bool,
    ) -> Result<(Vec<Self>, u64), Error> {
        let store = connection::get()?;
        let (next, mut keys) = store.scan(pattern, cursor, count).await?;
        keys.retain(|key| keep(key));
        let hashes = store.hgetall_many(&keys).await?;

        let mut entities = Vec::with_capacity(keys.len());
        for (key, hash) in keys.into_iter().zip(hashes) {
            if let Some(entity) = Self::from_hash(key, &hash)? {
                entities.push(entity);
            }
        }
        Ok((entities, next))
    }

    /// 遍历所有匹配 `pattern` 的存活记录
    pub fn scan(
        pattern: impl Into<String>,
    ) -> Pin<Box<dyn Stream<Item = Result<Self, Error>> + Send>> {
        const PAGE_SIZE: usize = 128;

        let pattern = pattern.into();

        Box::pin(try_stream! {
            let store = connection::get()?;
            let mut cursor = 0;
            loop {
                let (next, keys) = store.scan(&pattern, cursor, PAGE_SIZE).await?;
                let hashes = store.hgetall_many(&keys).await?;
                for (key, hash) in keys.into_iter().zip(hashes) {
                    if let Some(entity) = Self::from_hash(key, &hash)? {
                        yield entity;
                    }
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
        })
    }
}

pub(crate) fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Text(text) => serde_json::Value::String(text.clone()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(name, child)| (name.clone(), to_json(child)))
                .collect(),
        ),
    }
}
