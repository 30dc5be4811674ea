//! Interface-bound socket creation.
//!
//! The relay never creates sockets directly. It goes through a
//! [`SocketFactory`] so that every socket is bound to the right [`Network`]
//! and so tests can observe socket creation.

use crate::error::{TransportError, TransportResult};
use crate::network::Network;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::{TcpSocket, TcpStream, UdpSocket};

/// Opens sockets bound to local networks.
///
/// # Examples
///
/// ```no_run
/// use moblink_transport::{Network, SocketFactory, SystemSocketFactory};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let factory = SystemSocketFactory::default();
/// let uplink = Network::new("wwan0", "10.64.12.7".parse()?);
/// let socket = factory.bind_udp(Some(&uplink)).await?;
/// println!("Bound to {}", socket.local_addr()?);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// Bind a UDP socket with an OS-assigned port.
    ///
    /// `None` binds to the unspecified IPv4 address.
    ///
    /// # Errors
    /// Returns `TransportError` if the socket cannot be created or bound.
    async fn bind_udp(&self, network: Option<&Network>) -> TransportResult<UdpSocket>;

    /// Open a TCP connection, optionally from a specific network.
    ///
    /// # Errors
    /// Returns `TransportError` if binding or connecting fails.
    async fn connect_tcp(
        &self,
        addr: SocketAddr,
        network: Option<&Network>,
    ) -> TransportResult<TcpStream>;
}

/// `socket2`-backed socket factory.
#[derive(Debug, Clone)]
pub struct SystemSocketFactory {
    recv_buffer_size: usize,
    send_buffer_size: usize,
}

impl SystemSocketFactory {
    /// Create a factory with custom socket buffer sizes.
    #[must_use]
    pub fn with_buffer_sizes(recv_buffer_size: usize, send_buffer_size: usize) -> Self {
        Self {
            recv_buffer_size,
            send_buffer_size,
        }
    }

    /// Create a socket2 socket bound to `network`.
    fn bound_socket(
        &self,
        network: &Network,
        ty: Type,
        protocol: Protocol,
    ) -> TransportResult<Socket> {
        let bind_failed = |e: std::io::Error| TransportError::BindFailed {
            network: network.to_string(),
            reason: e.to_string(),
        };

        let domain = if network.address.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, ty, Some(protocol)).map_err(bind_failed)?;

        socket
            .set_recv_buffer_size(self.recv_buffer_size)
            .map_err(bind_failed)?;
        socket
            .set_send_buffer_size(self.send_buffer_size)
            .map_err(bind_failed)?;

        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        {
            if network.pins_device() {
                socket
                    .bind_device(Some(network.name.as_bytes()))
                    .map_err(bind_failed)?;
            }
        }
        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        {
            if network.pins_device() {
                tracing::debug!(
                    "Device pinning not supported on this platform, binding {} by address only",
                    network
                );
            }
        }

        socket
            .bind(&network.bind_addr().into())
            .map_err(bind_failed)?;
        socket.set_nonblocking(true).map_err(bind_failed)?;

        Ok(socket)
    }
}

impl Default for SystemSocketFactory {
    fn default() -> Self {
        Self::with_buffer_sizes(
            crate::DEFAULT_RECV_BUFFER_SIZE,
            crate::DEFAULT_SEND_BUFFER_SIZE,
        )
    }
}

#[async_trait]
impl SocketFactory for SystemSocketFactory {
    async fn bind_udp(&self, network: Option<&Network>) -> TransportResult<UdpSocket> {
        let any = Network::any_v4();
        let network = network.unwrap_or(&any);
        let socket = self.bound_socket(network, Type::DGRAM, Protocol::UDP)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        tracing::trace!("Bound UDP socket {:?} on {}", socket.local_addr(), network);
        Ok(socket)
    }

    async fn connect_tcp(
        &self,
        addr: SocketAddr,
        network: Option<&Network>,
    ) -> TransportResult<TcpStream> {
        let connection_failed = |e: std::io::Error| TransportError::ConnectionFailed {
            addr,
            reason: e.to_string(),
        };

        let Some(network) = network else {
            return TcpStream::connect(addr).await.map_err(connection_failed);
        };

        if network.address.is_ipv4() != addr.is_ipv4() {
            return Err(TransportError::BindFailed {
                network: network.to_string(),
                reason: format!("address family does not match {addr}"),
            });
        }

        let socket = self.bound_socket(network, Type::STREAM, Protocol::TCP)?;
        let std_stream: std::net::TcpStream = socket.into();
        let socket = TcpSocket::from_std_stream(std_stream);
        socket.connect(addr).await.map_err(connection_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn loopback() -> Network {
        Network::new("lo", "127.0.0.1".parse().unwrap())
    }

    #[tokio::test]
    async fn test_bind_udp_on_network() {
        let factory = SystemSocketFactory::default();
        let socket = factory.bind_udp(Some(&loopback())).await.unwrap();
        let addr = socket.local_addr().unwrap();
        assert_eq!(addr.ip(), loopback().address);
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_udp_any() {
        let factory = SystemSocketFactory::default();
        let socket = factory.bind_udp(None).await.unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.ip().is_unspecified());
        assert!(addr.is_ipv4());
    }

    #[tokio::test]
    async fn test_udp_send_recv() {
        let factory = SystemSocketFactory::default();
        let server = factory.bind_udp(Some(&loopback())).await.unwrap();
        let client = factory.bind_udp(Some(&loopback())).await.unwrap();

        client
            .send_to(b"Hello, Moblink!", server.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = vec![0u8; 1500];
        let (size, from) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("Timeout")
            .unwrap();
        assert_eq!(&buf[..size], b"Hello, Moblink!");
        assert_eq!(from, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_connect_tcp_from_network() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let factory = SystemSocketFactory::default();
        let lo = loopback();

        let (client, accepted) = tokio::join!(
            factory.connect_tcp(addr, Some(&lo)),
            listener.accept()
        );
        let mut client = client.unwrap();
        let (mut server, peer) = accepted.unwrap();
        assert_eq!(peer, client.local_addr().unwrap());

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_connect_tcp_family_mismatch() {
        let factory = SystemSocketFactory::default();
        let result = factory
            .connect_tcp("[::1]:9".parse().unwrap(), Some(&loopback()))
            .await;
        assert!(matches!(result, Err(TransportError::BindFailed { .. })));
    }

    #[tokio::test]
    async fn test_connect_tcp_refused() {
        let factory = SystemSocketFactory::default();
        // Reserve a port and release it so nothing listens there.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let result = factory
            .connect_tcp(SocketAddr::from(([127, 0, 0, 1], port)), None)
            .await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed { .. })));
    }
}
