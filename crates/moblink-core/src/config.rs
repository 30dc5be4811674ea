//! Relay configuration.

use std::fmt;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Relay timing parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTimings {
    /// Delay before reconnecting after a failure
    pub reconnect_delay: Duration,

    /// Websocket ping interval; a missing pong by the next tick fails the channel
    pub keepalive_interval: Duration,

    /// Receive timeout on the destination socket of a tunnel
    pub destination_recv_timeout: Duration,

    /// Upper bound on TCP connect plus websocket handshake
    pub connect_timeout: Duration,

    /// Reconnect this long after a wrong password if the streamer keeps the
    /// channel open. `None` waits for the streamer to close it.
    pub wrong_password_timeout: Option<Duration>,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            reconnect_delay: crate::RECONNECT_DELAY,
            keepalive_interval: crate::KEEPALIVE_INTERVAL,
            destination_recv_timeout: crate::DESTINATION_RECV_TIMEOUT,
            connect_timeout: crate::CONNECT_TIMEOUT,
            wrong_password_timeout: None,
        }
    }
}

/// Identity and password a relay presents to a streamer.
///
/// Zeroized on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Stable relay identifier
    pub relay_id: String,
    /// Human readable relay name
    pub name: String,
    /// Shared streamer password
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(
        relay_id: impl Into<String>,
        name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            relay_id: relay_id.into(),
            name: name.into(),
            password: password.into(),
        }
    }

    /// Same identity with a different password.
    #[must_use]
    pub fn with_password(&self, password: impl Into<String>) -> Self {
        Self::new(self.relay_id.clone(), self.name.clone(), password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("relay_id", &self.relay_id)
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}
