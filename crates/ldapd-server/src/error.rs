//! Server error types.

use std::net::SocketAddr;

/// Errors surfaced by [`Server`](crate::Server) entry points.
///
/// Connection-level failures never appear here; they terminate only the
/// session they belong to.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `serve` was called before a connection handler was installed.
    #[error("no connection handler defined")]
    NoHandler,

    /// The listen address string could not be understood.
    #[error("invalid listen address {0:?}")]
    BadListenAddr(String),

    /// Binding the TCP listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The accept loop hit a non-retryable error.
    #[error("accept failed: {0}")]
    Accept(#[from] std::io::Error),
}
