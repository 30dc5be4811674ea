//! Error types for the relay session engine.
//!
//! Almost every relay failure is transient: the relay tears the session down
//! and reconnects after [`crate::RECONNECT_DELAY`]. The exceptions are
//! configuration problems and a rejected password, which need the operator.

use crate::tunnel::TunnelSide;
use moblink_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// Streamer URL could not be used
    #[error("Invalid streamer URL '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Host name resolution failed
    #[error("Failed to resolve {host}: {reason}")]
    Resolve {
        /// Host that was looked up
        host: String,
        /// Resolver error
        reason: String,
    },

    /// Socket creation or connection failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Websocket protocol or I/O error
    #[error("Websocket failure: {0}")]
    Websocket(String),

    /// Websocket closed by the streamer
    #[error("Websocket closed: {0}")]
    ChannelClosed(String),

    /// Control channel could not be established in time
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Streamer stopped answering keepalive pings
    #[error("Keepalive timeout")]
    KeepaliveTimeout,

    /// Malformed control message
    #[error("Message handling failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// Start tunnel requested while the uplink is down
    #[error("Start tunnel without destination network")]
    NoDataPlaneNetwork,

    /// Data-plane network changed under an active tunnel
    #[error("Destination network changed")]
    DataPlaneNetworkChanged,

    /// A tunnel socket failed
    #[error("{side} socket error: {reason}")]
    Tunnel {
        /// Which tunnel socket failed
        side: TunnelSide,
        /// Socket error
        reason: String,
    },

    /// Streamer rejected the password
    #[error("Wrong password")]
    WrongPassword,

    /// Relay task is no longer running
    #[error("Relay closed")]
    Closed,
}

impl RelayError {
    /// Check if the relay recovers from this error by reconnecting.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::InvalidUrl { .. } | Self::WrongPassword | Self::Closed
        )
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
