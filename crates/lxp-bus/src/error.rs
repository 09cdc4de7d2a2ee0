use thiserror::Error;

/// Errors the generic bus transport can report back to the adapter.
///
/// `Fatal` covers auth, protocol, and unrecoverable channel errors —
/// spec.md §4.6's reconnect trigger. `Transient` is everything else a
/// transport wants to surface without tearing the consumer down (a single
/// delivery that couldn't be nacked, say); the adapter logs and continues.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("fatal transport error: {0}")]
    Fatal(String),

    #[error("transient transport error: {0}")]
    Transient(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
