use thiserror::Error;

/// Crate-spanning error type. Component crates (`lxp-kv`, `lxp-driver`, ...)
/// define their own narrower error enums and convert into this one at the
/// seams where `lxp-service`/`lxp-server` compose them, the way
/// `kftray_server::proxy::ProxyError` composes `PortForwardError`. Variant
/// names track the error kinds the bus adapter surfaces on the wire.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("permission denied for user {user}")]
    PermissionDenied { user: String },

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template render error: {0}")]
    TemplateRenderError(String),

    #[error("no ports available: requested {requested}, only {available} free")]
    ResourceExhausted { requested: usize, available: usize },

    #[error("lock '{0}' could not be acquired before timeout")]
    LockTimeout(String),

    #[error("kv store unavailable: {0}")]
    KVUnavailable(String),

    #[error("host driver error: {0}")]
    DriverError(String),

    #[error("unsupported operation: {0}")]
    InvalidOperation(String),

    #[error("bus transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ProvisionerError {
    /// The `type` field of an `error`-typed reply envelope — spec.md §7's
    /// error kind names verbatim, not the `Display` text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "ValidationError",
            Self::PermissionDenied { .. } => "PermissionDenied",
            Self::NotFound(_) => "NotFound",
            Self::TemplateNotFound(_) => "TemplateNotFound",
            Self::TemplateRenderError(_) => "TemplateRenderError",
            Self::ResourceExhausted { .. } => "ResourceExhausted",
            Self::LockTimeout(_) => "LockTimeout",
            Self::KVUnavailable(_) => "KVUnavailable",
            Self::DriverError(_) => "DriverError",
            Self::InvalidOperation(_) => "InvalidOperation",
            Self::Transport(_) => "TransportError",
            Self::Config(_) => "ConfigError",
        }
    }

    /// Whether the bus adapter should nack and requeue the delivery
    /// instead of replying with an error envelope — transient backend
    /// trouble rather than a problem with the message itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::KVUnavailable(_) | Self::LockTimeout(_) | Self::Transport(_)
        )
    }
}

pub type ProvisionerResult<T> = Result<T, ProvisionerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_are_the_transient_ones() {
        assert!(ProvisionerError::KVUnavailable("down".into()).is_retryable());
        assert!(ProvisionerError::LockTimeout("port-pool".into()).is_retryable());
        assert!(!ProvisionerError::NotFound("i1".into()).is_retryable());
        assert!(!ProvisionerError::PermissionDenied {
            user: "bob".into()
        }
        .is_retryable());
    }

    #[test]
    fn kind_matches_wire_error_type_names() {
        assert_eq!(
            ProvisionerError::ResourceExhausted { requested: 3, available: 1 }.kind(),
            "ResourceExhausted"
        );
        assert_eq!(ProvisionerError::LockTimeout("port-pool".into()).kind(), "LockTimeout");
    }
}
