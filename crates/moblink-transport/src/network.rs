//! Bindable local network interfaces.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// A local network interface that sockets can be bound to.
///
/// Sockets are bound to `address`. On Linux the socket is additionally pinned
/// to the device with `SO_BINDTODEVICE` when `bind_device` is set, which needs
/// `CAP_NET_RAW` on older kernels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Network {
    /// Interface name (`wwan0`, `eth0`, ...). May be empty.
    pub name: String,
    /// Local address used as the bind address
    pub address: IpAddr,
    /// Pin sockets to the device as well as the address
    pub bind_device: bool,
}

impl Network {
    /// Create a network handle for an interface and its local address.
    #[must_use]
    pub fn new(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            address,
            bind_device: false,
        }
    }

    /// The "any interface" IPv4 network, routed by the kernel's default route.
    #[must_use]
    pub fn any_v4() -> Self {
        Self::new("", IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// The "any interface" IPv6 network.
    #[must_use]
    pub fn any_v6() -> Self {
        Self::new("", IpAddr::V6(Ipv6Addr::UNSPECIFIED))
    }

    /// Enable device pinning (builder pattern)
    #[must_use]
    pub fn with_bind_device(mut self, bind_device: bool) -> Self {
        self.bind_device = bind_device;
        self
    }

    /// Local socket address with an OS-assigned port.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, 0)
    }

    /// Network to use for traffic to `peer`.
    ///
    /// An unspecified address of the other family is swapped for the
    /// unspecified address of `peer`'s family, keeping the interface name.
    /// A concrete address is kept as is.
    #[must_use]
    pub fn for_peer(&self, peer: SocketAddr) -> Self {
        if !self.address.is_unspecified() || self.address.is_ipv4() == peer.is_ipv4() {
            return self.clone();
        }
        let address = if peer.is_ipv4() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        };
        Self {
            address,
            ..self.clone()
        }
    }

    /// Whether the handle names a concrete device to pin to.
    #[must_use]
    pub fn pins_device(&self) -> bool {
        self.bind_device && !self.name.is_empty()
    }
}

/// Index of the interface called `name`, as used for IPv6 scope ids.
///
/// Read from `/sys/class/net`. Returns `None` for unknown interfaces and on
/// platforms without sysfs.
#[must_use]
pub fn interface_index(name: &str) -> Option<u32> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return None;
    }
    std::fs::read_to_string(format!("/sys/class/net/{name}/ifindex"))
        .ok()?
        .trim()
        .parse()
        .ok()
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}
