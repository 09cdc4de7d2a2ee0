use lxp_kv::KvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("kv store error: {0}")]
    Kv(#[from] KvError),

    #[error("no ports available in range {start}-{end}")]
    PortsExhausted { start: u16, end: u16 },

    #[error("corrupt allocator record at key '{0}': {1}")]
    Corrupt(String, String),
}

pub type AllocatorResult<T> = Result<T, AllocatorError>;
