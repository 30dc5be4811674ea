//! Transport error types.

use std::io;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address binding failed
    #[error("Failed to bind to {network}: {reason}")]
    BindFailed {
        /// Network the socket was bound to
        network: String,
        /// Underlying failure
        reason: String,
    },

    /// Connection failed
    #[error("Connection to {addr} failed: {reason}")]
    ConnectionFailed {
        /// Remote address
        addr: std::net::SocketAddr,
        /// Underlying failure
        reason: String,
    },
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
