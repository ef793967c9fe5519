#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
    #[error("Conflict: {0}")]
    ConflictError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Relation error: {0}")]
    RelationError(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid version: {0}")]
    InvalidVersion(std::num::ParseIntError),
    #[error("Invalid config: {0}")]
    ConfigError(String),
    #[error("Lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

impl Error {
    /// 调用方重新读取后可以重试的错误
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConflictError(_))
    }
}
