//! # Moblink Transport
//!
//! Socket creation for the Moblink relay.
//!
//! A relay node has (at least) two network paths: the local network where the
//! streamer lives and the uplink toward the ingest server. Every socket the
//! relay opens is bound to one of them through a [`Network`] handle, so that
//! the kernel routes its traffic over the intended interface.
//!
//! This crate provides:
//! - [`Network`]: a bindable local interface
//! - [`SocketFactory`]: the seam used by the relay to open sockets
//! - [`SystemSocketFactory`]: the `socket2`-backed implementation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod network;
pub mod socket;

pub use error::{TransportError, TransportResult};
pub use network::{Network, interface_index};
pub use socket::{SocketFactory, SystemSocketFactory};

/// Default socket receive buffer size (256 KB)
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 256 * 1024;

/// Default socket send buffer size (256 KB)
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 256 * 1024;
