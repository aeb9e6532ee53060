//! Error types for origin access.

use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The origin did not answer. Not retried.
    #[error("origin unreachable: {0}")]
    OriginUnreachable(String),

    /// No object exists for the requested path.
    #[error("object not found: {0}")]
    NotFound(String),

    /// HTML was requested before the challenge script was resolved.
    #[error("challenge script configuration is not ready")]
    ConfigNotReady,

    /// The object store failed.
    #[error("object store error: {0}")]
    Store(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
