//! Multicast DNS discovery.
//!
//! [`MdnsDiscovery`] implements both seams on top of an `mdns-sd` daemon.
//! The daemon resolves services itself, so browsing records each resolution
//! and resolving is a lookup of the latest one.

use crate::browser::{
    Advertisement, BrowseEvent, ResolvedService, ServiceBrowser, ServiceResolver,
};
use crate::error::DiscoveryError;
use async_trait::async_trait;
use dashmap::DashMap;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How often the browse loop checks whether its consumer went away.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// DNS-SD over multicast on all local interfaces.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    resolved: Arc<DashMap<String, ResolvedService>>,
}

impl MdnsDiscovery {
    /// Start an mDNS daemon.
    ///
    /// # Errors
    /// Returns `DiscoveryError::BrowseFailed` if the daemon cannot start.
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::BrowseFailed {
            service_type: crate::SERVICE_TYPE.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            daemon,
            resolved: Arc::new(DashMap::new()),
        })
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!("mDNS daemon shutdown: {}", e);
        }
    }
}

impl std::fmt::Debug for MdnsDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsDiscovery")
            .field("resolved", &self.resolved.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceBrowser for MdnsDiscovery {
    async fn browse(
        &self,
        service_type: &str,
    ) -> Result<mpsc::Receiver<BrowseEvent>, DiscoveryError> {
        let domain = format!("{service_type}.local.");
        let events = self
            .daemon
            .browse(&domain)
            .map_err(|e| DiscoveryError::BrowseFailed {
                service_type: service_type.to_string(),
                reason: e.to_string(),
            })?;
        let (tx, rx) = mpsc::channel(crate::BROWSE_CHANNEL_CAPACITY);
        let daemon = self.daemon.clone();
        let resolved = Arc::clone(&self.resolved);

        tokio::task::spawn_blocking(move || {
            loop {
                if tx.is_closed() {
                    break;
                }
                let event = match events.recv_timeout(POLL_INTERVAL) {
                    Ok(event) => event,
                    Err(_) if events.is_disconnected() => break,
                    Err(_) => continue,
                };
                let browse_event = match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let name = instance_name(info.get_fullname(), &domain);
                        let addresses = info.get_addresses().iter().copied();
                        let Some(service) = pick_address(addresses, info.get_port()) else {
                            warn!("No usable address for {}", name);
                            continue;
                        };
                        resolved.insert(name.clone(), service);
                        BrowseEvent::Found(Advertisement {
                            name,
                            network: None,
                        })
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        let name = instance_name(&fullname, &domain);
                        resolved.remove(&name);
                        BrowseEvent::Lost { name }
                    }
                    _ => continue,
                };
                if tx.blocking_send(browse_event).is_err() {
                    break;
                }
            }
            if let Err(e) = daemon.stop_browse(&domain) {
                debug!("Stop browse of {}: {}", domain, e);
            }
        });
        Ok(rx)
    }
}

#[async_trait]
impl ServiceResolver for MdnsDiscovery {
    async fn resolve(
        &self,
        advertisement: &Advertisement,
    ) -> Result<ResolvedService, DiscoveryError> {
        self.resolved
            .get(&advertisement.name)
            .map(|entry| *entry.value())
            .ok_or_else(|| DiscoveryError::ResolveFailed {
                name: advertisement.name.clone(),
                reason: "not resolved by mDNS".to_string(),
            })
    }
}

/// Instance name of a full service name such as
/// `Studio._moblink._tcp.local.`.
fn instance_name(fullname: &str, domain: &str) -> String {
    fullname
        .strip_suffix(domain)
        .and_then(|name| name.strip_suffix('.'))
        .unwrap_or(fullname)
        .to_string()
}

/// Choose the address to connect to.
///
/// IPv4 wins over IPv6. Link-local IPv6 is skipped because the daemon does
/// not report the interface it was seen on.
fn pick_address(
    addresses: impl IntoIterator<Item = IpAddr>,
    port: u16,
) -> Option<ResolvedService> {
    addresses
        .into_iter()
        .filter(|ip| match ip {
            IpAddr::V4(_) => true,
            IpAddr::V6(v6) => !v6.is_unicast_link_local(),
        })
        .min_by_key(|ip| (ip.is_ipv6(), *ip))
        .map(|host| ResolvedService {
            host,
            port,
            scope_id: 0,
        })
}
