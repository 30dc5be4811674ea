//! # Moblink Core
//!
//! Relay session engine for Moblink.
//!
//! A relay sits between a streamer on the local network and an ingest server
//! reachable over a second uplink. The streamer drives the relay over a
//! websocket control channel and asks it to open a UDP tunnel.
//!
//! This crate provides:
//! - Control channel wire messages ([`protocol`])
//! - The per-streamer relay actor ([`relay`])
//! - The UDP tunnel data plane ([`tunnel`])
//! - Automatic and manual multi-relay orchestration ([`orchestrator`])
//! - Relay and aggregate status ([`status`])
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  found/lost   ┌──────────────┐  commands  ┌─────────┐
//! │   Scanner    │ ────────────► │ Orchestrator │ ─────────► │  Relay  │
//! └──────────────┘               └──────────────┘            └────┬────┘
//!                                       ▲  status                 │
//!                                       └─────────────────────────┤
//!                                                                 ▼
//!                                   streamer ◄── UDP tunnel ──► ingest
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod relay;
pub mod status;
pub mod tunnel;

mod channel;

use std::time::Duration;

pub use config::{Credentials, RelayTimings};
pub use error::{RelayError, Result};
pub use orchestrator::{ManualRelays, ManualSettings, Orchestrator};
pub use relay::{Endpoint, Relay, RelayContext, RelayState};
pub use status::{
    AutomaticStatus, FixedStatus, RelayStatus, StatusSnapshot, StatusSource, ThermalState,
};
pub use tunnel::TunnelSession;

/// Delay before reconnecting after a control channel failure
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Interval between websocket keepalive pings
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Receive timeout on the destination side of a tunnel
pub const DESTINATION_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on establishing the control channel
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunnel datagram buffer size in bytes
pub const TUNNEL_BUFFER_SIZE: usize = 2048;
