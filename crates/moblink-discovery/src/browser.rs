//! Browse and resolve seams.
//!
//! Platform DNS-SD APIs are callback driven. Here they are expressed as a
//! channel of [`BrowseEvent`]s plus an async [`ServiceResolver`], which keeps
//! the scanner independent of any platform threading model.

use crate::error::DiscoveryError;
use async_trait::async_trait;
use dashmap::DashMap;
use moblink_transport::Network;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::{Mutex, mpsc};

/// An unresolved service advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised service name (the streamer's identity)
    pub name: String,
    /// Network the advertisement was seen on
    pub network: Option<Network>,
}

/// Raw browse notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// A service appeared or was re-announced
    Found(Advertisement),
    /// A service disappeared
    Lost {
        /// Advertised service name
        name: String,
    },
}

/// Result of resolving an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedService {
    /// Host address
    pub host: IpAddr,
    /// Service port
    pub port: u16,
    /// IPv6 scope (interface index) of a link-local host, 0 if none
    pub scope_id: u32,
}

impl From<SocketAddr> for ResolvedService {
    fn from(addr: SocketAddr) -> Self {
        let scope_id = match addr {
            SocketAddr::V4(_) => 0,
            SocketAddr::V6(addr) => addr.scope_id(),
        };
        Self {
            host: addr.ip(),
            port: addr.port(),
            scope_id,
        }
    }
}

/// Source of browse notifications for a service type.
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Start browsing `service_type`.
    ///
    /// Browsing stops when the returned receiver is dropped.
    ///
    /// # Errors
    /// Returns `DiscoveryError::BrowseFailed` if browsing cannot start.
    async fn browse(
        &self,
        service_type: &str,
    ) -> Result<mpsc::Receiver<BrowseEvent>, DiscoveryError>;
}

/// Resolves advertisements to host and port.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    /// Resolve one advertisement.
    ///
    /// # Errors
    /// Returns `DiscoveryError::ResolveFailed` if the service cannot be resolved.
    async fn resolve(
        &self,
        advertisement: &Advertisement,
    ) -> Result<ResolvedService, DiscoveryError>;
}

/// Browser fed through a channel.
///
/// Platform glue (or a test) pushes events through the paired
/// [`ChannelBrowserHandle`]. Only one browse session can be active.
#[derive(Debug)]
pub struct ChannelBrowser {
    rx: Mutex<Option<mpsc::Receiver<BrowseEvent>>>,
}

/// Sending half of a [`ChannelBrowser`].
#[derive(Debug, Clone)]
pub struct ChannelBrowserHandle {
    tx: mpsc::Sender<BrowseEvent>,
}

impl ChannelBrowser {
    /// Create a browser and the handle that feeds it.
    #[must_use]
    pub fn channel() -> (Self, ChannelBrowserHandle) {
        let (tx, rx) = mpsc::channel(crate::BROWSE_CHANNEL_CAPACITY);
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            ChannelBrowserHandle { tx },
        )
    }
}

#[async_trait]
impl ServiceBrowser for ChannelBrowser {
    async fn browse(
        &self,
        service_type: &str,
    ) -> Result<mpsc::Receiver<BrowseEvent>, DiscoveryError> {
        self.rx
            .lock()
            .await
            .take()
            .ok_or_else(|| DiscoveryError::BrowseFailed {
                service_type: service_type.to_string(),
                reason: "browser already in use".to_string(),
            })
    }
}

impl ChannelBrowserHandle {
    /// Announce a found service. Returns false once browsing has stopped.
    pub async fn found(&self, name: impl Into<String>, network: Option<Network>) -> bool {
        self.send(BrowseEvent::Found(Advertisement {
            name: name.into(),
            network,
        }))
        .await
    }

    /// Announce a lost service. Returns false once browsing has stopped.
    pub async fn lost(&self, name: impl Into<String>) -> bool {
        self.send(BrowseEvent::Lost { name: name.into() }).await
    }

    /// Send a raw browse event.
    pub async fn send(&self, event: BrowseEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Resolver backed by a fixed name -> address table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: DashMap<String, SocketAddr>,
}

impl StaticResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the address for `name`.
    pub fn insert(&self, name: impl Into<String>, addr: SocketAddr) {
        self.entries.insert(name.into(), addr);
    }

    /// Remove the address for `name`.
    pub fn remove(&self, name: &str) {
        self.entries.remove(name);
    }
}

#[async_trait]
impl ServiceResolver for StaticResolver {
    async fn resolve(
        &self,
        advertisement: &Advertisement,
    ) -> Result<ResolvedService, DiscoveryError> {
        self.entries
            .get(&advertisement.name)
            .map(|entry| ResolvedService::from(*entry.value()))
            .ok_or_else(|| DiscoveryError::ResolveFailed {
                name: advertisement.name.clone(),
                reason: "unknown service".to_string(),
            })
    }
}
