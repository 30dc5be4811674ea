//! UDP tunnel data plane.
//!
//! ```text
//!            source socket                     destination socket
//! streamer ───────────────► forward task ───────────────────────► destination
//!    ▲                                                                 │
//!    └────────────── reverse task ◄────────────────────────────────────┘
//!       (to the learned streamer address)          (recv timeout)
//! ```
//!
//! The sender of the first datagram on the source socket becomes the learned
//! streamer address and stays fixed for the life of the session. The reverse
//! task only starts receiving once that address is known.

use crate::error::{RelayError, Result};
use moblink_transport::{Network, SocketFactory, TransportError};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Side of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelSide {
    /// Socket facing the streamer
    Source,
    /// Socket facing the destination, bound to the uplink
    Destination,
}

impl fmt::Display for TunnelSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("Streamer"),
            Self::Destination => f.write_str("Destination"),
        }
    }
}

/// An open tunnel.
///
/// Dropping the session aborts both forwarding tasks, which closes the
/// sockets. [`TunnelSession::close`] additionally waits for that to happen.
#[derive(Debug)]
pub struct TunnelSession {
    source_port: u16,
    destination: SocketAddr,
    forward: JoinHandle<()>,
    reverse: JoinHandle<()>,
}

impl TunnelSession {
    /// Open the two tunnel sockets and start forwarding.
    ///
    /// The source socket is bound to `source_network` (any address if
    /// `None`), the destination socket to `data_plane`. `on_error` is called
    /// when a forwarding task stops on a socket error or receive timeout.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Transport` if a socket cannot be bound.
    pub async fn open<F>(
        factory: &dyn SocketFactory,
        source_network: Option<&Network>,
        data_plane: &Network,
        destination: SocketAddr,
        destination_recv_timeout: Duration,
        on_error: F,
    ) -> Result<Self>
    where
        F: Fn(RelayError) + Send + Sync + 'static,
    {
        let source = Arc::new(factory.bind_udp(source_network).await?);
        let data_plane = data_plane.for_peer(destination);
        let destination_socket = Arc::new(factory.bind_udp(Some(&data_plane)).await?);
        let source_port = source.local_addr().map_err(TransportError::Io)?.port();

        tracing::info!(
            "Tunnel open: streamer port {} -> {} via {}",
            source_port,
            destination,
            data_plane
        );

        let on_error = Arc::new(on_error);
        let (peer_tx, peer_rx) = oneshot::channel();

        let forward = tokio::spawn(forward_loop(
            source.clone(),
            destination_socket.clone(),
            destination,
            peer_tx,
            on_error.clone(),
        ));
        let reverse = tokio::spawn(reverse_loop(
            source,
            destination_socket,
            peer_rx,
            destination_recv_timeout,
            on_error,
        ));

        Ok(Self {
            source_port,
            destination,
            forward,
            reverse,
        })
    }

    /// Local port of the streamer-side socket.
    #[must_use]
    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    /// Destination datagrams are forwarded to.
    #[must_use]
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Stop forwarding and wait until both sockets are closed.
    pub async fn close(mut self) {
        self.forward.abort();
        self.reverse.abort();
        let _ = (&mut self.forward).await;
        let _ = (&mut self.reverse).await;
        tracing::debug!("Tunnel closed: streamer port {}", self.source_port);
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.forward.abort();
        self.reverse.abort();
    }
}

fn socket_error(side: TunnelSide, reason: impl ToString) -> RelayError {
    RelayError::Tunnel {
        side,
        reason: reason.to_string(),
    }
}

async fn forward_loop<F>(
    source: Arc<UdpSocket>,
    destination: Arc<UdpSocket>,
    target: SocketAddr,
    peer_tx: oneshot::Sender<SocketAddr>,
    on_error: Arc<F>,
) where
    F: Fn(RelayError) + Send + Sync,
{
    let mut buf = vec![0u8; crate::TUNNEL_BUFFER_SIZE];
    let mut peer_tx = Some(peer_tx);

    loop {
        let (len, from) = match source.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                on_error(socket_error(TunnelSide::Source, e));
                return;
            }
        };

        if let Some(tx) = peer_tx.take() {
            tracing::info!("Tunnel learned streamer address {}", from);
            let _ = tx.send(from);
        }

        if let Err(e) = destination.send_to(&buf[..len], target).await {
            on_error(socket_error(TunnelSide::Destination, e));
            return;
        }
    }
}

async fn reverse_loop<F>(
    source: Arc<UdpSocket>,
    destination: Arc<UdpSocket>,
    peer_rx: oneshot::Receiver<SocketAddr>,
    recv_timeout: Duration,
    on_error: Arc<F>,
) where
    F: Fn(RelayError) + Send + Sync,
{
    let Ok(peer) = peer_rx.await else {
        return;
    };
    let mut buf = vec![0u8; crate::TUNNEL_BUFFER_SIZE];

    loop {
        let len = match tokio::time::timeout(recv_timeout, destination.recv_from(&mut buf)).await
        {
            Ok(Ok((len, _))) => len,
            Ok(Err(e)) => {
                on_error(socket_error(TunnelSide::Destination, e));
                return;
            }
            Err(_) => {
                on_error(socket_error(
                    TunnelSide::Destination,
                    format!("no datagram for {recv_timeout:?}"),
                ));
                return;
            }
        };

        if let Err(e) = source.send_to(&buf[..len], peer).await {
            on_error(socket_error(TunnelSide::Source, e));
            return;
        }
    }
}

/// Resolve `host:port`, preferring addresses of the same family as `prefer`.
///
/// IP literals are used as is.
///
/// # Errors
///
/// Returns `RelayError::Resolve` if the lookup fails or yields nothing.
pub async fn resolve_address(host: &str, port: u16, prefer: Option<IpAddr>) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let resolve_failed = |reason: String| RelayError::Resolve {
        host: host.to_string(),
        reason,
    };
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| resolve_failed(e.to_string()))?
        .collect();

    let preferred = prefer.and_then(|prefer| {
        addrs
            .iter()
            .find(|addr| addr.is_ipv4() == prefer.is_ipv4())
            .copied()
    });
    preferred
        .or_else(|| addrs.first().copied())
        .ok_or_else(|| resolve_failed("no addresses".to_string()))
}
