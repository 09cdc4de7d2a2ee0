use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("create failed: {0}")]
    Create(String),

    #[error("execute failed: {0}")]
    Execute(String),

    #[error("save failed: {0}")]
    Save(String),
}

pub type DriverResult<T> = Result<T, DriverError>;
