use crate::Error;

pub const HOST_VAR: &str = "REDIS_HOST";
pub const PORT_VAR: &str = "REDIS_PORT";
pub const DB_VAR: &str = "REDIS_DATA_DB";

/// Redis 连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

impl StoreConfig {
    pub fn new(host: impl Into<String>, port: u16, db: i64) -> Self {
        Self {
            host: host.into(),
            port,
            db,
        }
    }

    /// 读取 `REDIS_HOST`、`REDIS_PORT` 与 `REDIS_DATA_DB`，未设置的变量取默认值
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(host) = lookup(HOST_VAR).filter(|h| !h.is_empty()) {
            config.host = host;
        }
        if let Some(port) = lookup(PORT_VAR) {
            config.port = port
                .parse()
                .map_err(|e| Error::ConfigError(format!("{PORT_VAR}={port}: {e}")))?;
        }
        if let Some(db) = lookup(DB_VAR) {
            config.db = db
                .parse()
                .map_err(|e| Error::ConfigError(format!("{DB_VAR}={db}: {e}")))?;
        }
        Ok(config)
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}
