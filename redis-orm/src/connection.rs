use std::sync::{Arc, LazyLock, RwLock};

use crate::{Error, RedisStore, Store, config::StoreConfig};

// 进程内共享的存储句柄
static STORE: LazyLock<RwLock<Option<Arc<dyn Store>>>> = LazyLock::new(|| RwLock::new(None));

/// 返回全局存储句柄，首次调用时按环境变量创建 Redis 客户端
pub fn get() -> Result<Arc<dyn Store>, Error> {
    if let Some(store) = STORE
        .read()
        .map_err(|_| Error::LockPoisoned("connection get"))?
        .as_ref()
    {
        return Ok(store.clone());
    }

    let mut slot = STORE
        .write()
        .map_err(|_| Error::LockPoisoned("connection init"))?;
    // 等待写锁期间可能已被其他调用者初始化
    if let Some(store) = slot.as_ref() {
        return Ok(store.clone());
    }
    let store: Arc<dyn Store> = Arc::new(RedisStore::new(&StoreConfig::from_env()?)?);
    *slot = Some(store.clone());
    Ok(store)
}

/// 替换全局存储句柄，测试中用于注入 [`MemoryStore`](crate::MemoryStore)
pub fn set(store: Arc<dyn Store>) -> Result<(), Error> {
    *STORE
        .write()
        .map_err(|_| Error::LockPoisoned("connection set"))? = Some(store);
    Ok(())
}

/// 清除全局句柄，下次 [`get`] 时重新创建
pub fn reset() -> Result<(), Error> {
    *STORE
        .write()
        .map_err(|_| Error::LockPoisoned("connection reset"))? = None;
    Ok(())
}
