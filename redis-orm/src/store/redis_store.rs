use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;

use super::{Batch, Hash, Op, Store, Watch};
use crate::{Error, config::StoreConfig};

/// 空闲事务连接的上限
const IDLE_WATCH_CONNECTIONS: usize = 8;

type IdlePool = Arc<Mutex<Vec<MultiplexedConnection>>>;

/// 基于 Redis 服务的 [`Store`]。
///
/// 普通命令共用一条多路复用连接。`WATCH` 绑定在连接上，所以每个事务独占一条连接，
/// 事务结束（`EXEC` 会清除监视）后连接放回空闲池复用。
pub struct RedisStore {
    client: redis::Client,
    shared: OnceCell<MultiplexedConnection>,
    idle: IdlePool,
}

impl RedisStore {
    pub fn new(config: &StoreConfig) -> Result<Self, Error> {
        let client = redis::Client::open(config.url()).map_err(Error::RedisError)?;
        log::info!(
            "Redis client created: {}:{}/{}",
            config.host,
            config.port,
            config.db
        );
        Ok(Self {
            client,
            shared: OnceCell::new(),
            idle: Arc::new(Mutex::new(Vec::new())),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, Error> {
        let connection = self
            .shared
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(Error::RedisError)
            })
            .await?;
        Ok(connection.clone())
    }

    async fn watch_connection(&self) -> Result<MultiplexedConnection, Error> {
        let reused = self
            .idle
            .lock()
            .map_err(|_| Error::LockPoisoned("redis idle pool"))?
            .pop();
        match reused {
            Some(con) => Ok(con),
            None => {
                log::debug!("Opening a new Redis connection for WATCH");
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(Error::RedisError)
            }
        }
    }
}

fn pipeline_for(batch: &Batch) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in batch.ops() {
        match op {
            Op::HSet { key, fields } => {
                pipe.cmd("HSET").arg(key);
                for (field, value) in fields {
                    pipe.arg(field).arg(value);
                }
                pipe.ignore();
            }
            Op::HDel { key, fields } => {
                pipe.cmd("HDEL").arg(key).arg(fields).ignore();
            }
            Op::HIncrBy { key, field, delta } => {
                pipe.cmd("HINCRBY").arg(key).arg(field).arg(*delta).ignore();
            }
            Op::Expire { key, seconds } => {
                pipe.cmd("EXPIRE").arg(key).arg(*seconds).ignore();
            }
        }
    }
    pipe
}

#[async_trait]
impl Store for RedisStore {
    async fn exists(&self, key: &str) -> Result<bool, Error> {
        let mut con = self.connection().await?;
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(Error::RedisError)
    }

    async fn exists_with_field(&self, key: &str, field: &str) -> Result<(bool, Option<String>), Error> {
        let mut con = self.connection().await?;
        redis::pipe()
            .cmd("EXISTS")
            .arg(key)
            .cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut con)
            .await
            .map_err(Error::RedisError)
    }

    async fn hgetall(&self, key: &str) -> Result<Hash, Error> {
        let mut con = self.connection().await?;
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(Error::RedisError)
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<Hash>, Error> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HGETALL").arg(key);
        }
        let mut con = self.connection().await?;
        pipe.query_async(&mut con).await.map_err(Error::RedisError)
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), Error> {
        let mut con = self.connection().await?;
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut con)
            .await
            .map_err(Error::RedisError)
    }

    async fn apply(&self, batch: Batch) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut con = self.connection().await?;
        let () = pipeline_for(&batch)
            .query_async(&mut con)
            .await
            .map_err(Error::RedisError)?;
        Ok(())
    }

    async fn watch(&self, key: &str) -> Result<Box<dyn Watch>, Error> {
        let mut con = self.watch_connection().await?;
        let () = redis::cmd("WATCH")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(Error::RedisError)?;
        Ok(Box::new(RedisWatch {
            con,
            key: key.to_string(),
            idle: self.idle.clone(),
        }))
    }
}

// 未提交就丢弃时连接仍处于 WATCH 状态，直接关闭而不放回空闲池
struct RedisWatch {
    con: MultiplexedConnection,
    key: String,
    idle: IdlePool,
}

#[async_trait]
impl Watch for RedisWatch {
    async fn hget(&mut self, field: &str) -> Result<Option<String>, Error> {
        redis::cmd("HGET")
            .arg(&self.key)
            .arg(field)
            .query_async(&mut self.con)
            .await
            .map_err(Error::RedisError)
    }

    async fn hkeys(&mut self) -> Result<Vec<String>, Error> {
        redis::cmd("HKEYS")
            .arg(&self.key)
            .query_async(&mut self.con)
            .await
            .map_err(Error::RedisError)
    }

    async fn commit(self: Box<Self>, batch: Batch) -> Result<bool, Error> {
        let RedisWatch { mut con, idle, .. } = *self;
        // 被监视的键有改动时 EXEC 返回 nil
        let committed: Option<()> = if batch.is_empty() {
            let () = redis::cmd("UNWATCH")
                .query_async(&mut con)
                .await
                .map_err(Error::RedisError)?;
            Some(())
        } else {
            pipeline_for(&batch)
                .query_async(&mut con)
                .await
                .map_err(Error::RedisError)?
        };

        let mut idle = idle
            .lock()
            .map_err(|_| Error::LockPoisoned("redis idle pool"))?;
        if idle.len() < IDLE_WATCH_CONNECTIONS {
            idle.push(con);
        }
        Ok(committed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(batch: &Batch) -> String {
        String::from_utf8_lossy(&pipeline_for(batch).get_packed_pipeline()).into_owned()
    }

    #[test]
    fn pipeline_wraps_ops_in_multi_exec() {
        let mut batch = Batch::new();
        batch
            .hdel("user:1", ["profile:city"])
            .hset("user:1", [("name", "Alice")])
            .hincr_by("user:1", "_version", 1)
            .expire("user:1", 60);
        let wire = packed(&batch);

        let order: Vec<usize> = ["MULTI", "HDEL", "HSET", "HINCRBY", "EXPIRE", "EXEC"]
            .iter()
            .map(|cmd| wire.find(cmd).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(wire.contains("profile:city"));
    }

    // 需要本地 Redis：cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn aborted_exec_reports_conflict() {
        let store = RedisStore::new(&StoreConfig::from_env().unwrap()).unwrap();
        let key = format!("redis-orm-test:{}", crate::utils::new_id(10));

        let mut seed = Batch::new();
        seed.hset(&key, [("_version", "0")]).expire(&key, 60);
        store.apply(seed).await.unwrap();

        let mut watch = store.watch(&key).await.unwrap();
        assert_eq!(watch.hget("_version").await.unwrap().as_deref(), Some("0"));

        let mut other = Batch::new();
        other.hincr_by(&key, "_version", 1);
        store.apply(other).await.unwrap();

        let mut mine = Batch::new();
        mine.hset(&key, [("_version", "1"), ("name", "stale")]);
        assert!(!watch.commit(mine).await.unwrap());

        let hash = store.hgetall(&key).await.unwrap();
        assert_eq!(hash.get("_version").map(String::as_str), Some("1"));
        assert!(!hash.contains_key("name"));

        // 放回池中的连接已不再监视，可以正常提交
        let watch = store.watch(&key).await.unwrap();
        let mut next = Batch::new();
        next.hset(&key, [("name", "fresh")]);
        assert!(watch.commit(next).await.unwrap());

        let mut cleanup = Batch::new();
        cleanup.expire(&key, 0);
        store.apply(cleanup).await.unwrap();
    }
}
