//! Discovery scanner.
//!
//! Turns raw browse notifications into resolved streamer endpoints.
//!
//! # Resolve cancellation
//!
//! ```text
//! Found(A) ──► resolve #1 ──────────────────────► done (discarded)
//! Found(A) ──► cancel #1, resolve #2 ──► done ──► ScannerEvent::Found(A)
//! Lost(A)  ──► cancel pending, ScannerEvent::Lost(A) immediately
//! ```
//!
//! Each pending resolve is tagged with an id. A completion is only reported
//! if its id is still the pending one for that name.

use crate::browser::{
    Advertisement, BrowseEvent, ResolvedService, ServiceBrowser, ServiceResolver,
};
use crate::error::DiscoveryError;
use moblink_transport::Network;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerEvent {
    /// A streamer was resolved to a websocket URL
    Found {
        /// Advertised name (identity)
        name: String,
        /// `ws://` URL of the streamer
        url: String,
        /// Network the advertisement was seen on
        network: Option<Network>,
    },
    /// A streamer stopped advertising
    Lost {
        /// Advertised name (identity)
        name: String,
    },
}

/// Build the websocket URL for a resolved service.
///
/// IPv6 hosts are bracketed, with a scope as a `%25` zone.
#[must_use]
pub fn service_url(service: &ResolvedService) -> String {
    match service.host {
        IpAddr::V4(host) => format!("ws://{}:{}", host, service.port),
        IpAddr::V6(host) if service.scope_id != 0 => {
            format!("ws://[{}%25{}]:{}", host, service.scope_id, service.port)
        }
        IpAddr::V6(host) => format!("ws://[{}]:{}", host, service.port),
    }
}

/// Running discovery scanner.
///
/// Stops when [`Scanner::stop`] is called or the scanner is dropped.
#[derive(Debug)]
pub struct Scanner {
    task: JoinHandle<()>,
}

impl Scanner {
    /// Start browsing for streamers.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::BrowseFailed` if the browser cannot start.
    pub async fn start<B>(
        browser: &B,
        resolver: Arc<dyn ServiceResolver>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ScannerEvent>), DiscoveryError>
    where
        B: ServiceBrowser + ?Sized,
    {
        tracing::info!("Scanner start");
        let browse_rx = browser.browse(crate::SERVICE_TYPE).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();

        let scanner_loop = ScannerLoop {
            resolver,
            pending: HashMap::new(),
            next_resolve_id: 0,
            events_tx,
            resolved_tx,
        };
        let task = tokio::spawn(scanner_loop.run(browse_rx, resolved_rx));

        Ok((Self { task }, events_rx))
    }

    /// Stop browsing. Pending resolves are cancelled.
    pub fn stop(&self) {
        tracing::info!("Scanner stop");
        self.task.abort();
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct PendingResolve {
    id: u64,
    task: JoinHandle<()>,
}

struct ResolveDone {
    name: String,
    id: u64,
    network: Option<Network>,
    result: Result<ResolvedService, DiscoveryError>,
}

struct ScannerLoop {
    resolver: Arc<dyn ServiceResolver>,
    pending: HashMap<String, PendingResolve>,
    next_resolve_id: u64,
    events_tx: mpsc::UnboundedSender<ScannerEvent>,
    resolved_tx: mpsc::UnboundedSender<ResolveDone>,
}

impl ScannerLoop {
    async fn run(
        mut self,
        mut browse_rx: mpsc::Receiver<BrowseEvent>,
        mut resolved_rx: mpsc::UnboundedReceiver<ResolveDone>,
    ) {
        loop {
            tokio::select! {
                event = browse_rx.recv() => match event {
                    Some(BrowseEvent::Found(advertisement)) => self.handle_found(advertisement),
                    Some(BrowseEvent::Lost { name }) => self.handle_lost(name),
                    None => break,
                },
                Some(done) = resolved_rx.recv() => self.handle_resolved(done),
            }
        }
        tracing::debug!("Browse stream ended");
    }

    fn handle_found(&mut self, advertisement: Advertisement) {
        tracing::info!("Service found: {}", advertisement.name);

        let id = self.next_resolve_id;
        self.next_resolve_id += 1;

        let resolver = self.resolver.clone();
        let resolved_tx = self.resolved_tx.clone();
        let name = advertisement.name.clone();
        let task = tokio::spawn(async move {
            let result = resolver.resolve(&advertisement).await;
            let _ = resolved_tx.send(ResolveDone {
                name: advertisement.name,
                id,
                network: advertisement.network,
                result,
            });
        });

        if let Some(previous) = self.pending.insert(name, PendingResolve { id, task }) {
            previous.task.abort();
        }
    }

    fn handle_lost(&mut self, name: String) {
        tracing::info!("Service lost {}", name);
        if let Some(previous) = self.pending.remove(&name) {
            previous.task.abort();
        }
        let _ = self.events_tx.send(ScannerEvent::Lost { name });
    }

    fn handle_resolved(&mut self, done: ResolveDone) {
        let current = self
            .pending
            .get(&done.name)
            .is_some_and(|pending| pending.id == done.id);
        if !current {
            tracing::debug!("Service resolve cancelled {}", done.name);
            return;
        }
        self.pending.remove(&done.name);

        match done.result {
            Ok(service) => {
                let url = service_url(&service);
                tracing::info!("Service resolved: {} at {}", done.name, url);
                let _ = self.events_tx.send(ScannerEvent::Found {
                    name: done.name,
                    url,
                    network: done.network,
                });
            }
            Err(e) => {
                tracing::debug!("{}", e);
            }
        }
    }
}

impl Drop for ScannerLoop {
    fn drop(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.task.abort();
        }
    }
}
