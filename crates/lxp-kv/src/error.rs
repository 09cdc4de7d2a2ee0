use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv transport error: {0}")]
    Transport(String),

    #[error("lock '{0}' could not be acquired before timeout")]
    LockTimeout(String),

    #[error("value encoding error: {0}")]
    Encoding(String),
}

pub type KvResult<T> = Result<T, KvError>;
