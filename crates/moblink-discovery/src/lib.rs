//! # Moblink Discovery
//!
//! Finds streamers advertising the `_moblink._tcp` service on the local
//! network and turns their advertisements into websocket endpoints.
//!
//! The platform's DNS-SD machinery is split in two seams:
//! - [`ServiceBrowser`] delivers found/lost advertisements as a channel
//! - [`ServiceResolver`] resolves one advertisement to an address and port
//!
//! [`MdnsDiscovery`] implements both over multicast DNS; [`ChannelBrowser`]
//! and [`StaticResolver`] let callers feed advertisements directly.
//!
//! The [`Scanner`] coordinates them. A second advertisement for the same name
//! cancels the resolve still in flight for it, so at most one resolve per name
//! is ever outstanding and stale resolutions are never reported.
//!
//! ## Example
//!
//! ```rust,no_run
//! use moblink_discovery::{ChannelBrowser, Scanner, ScannerEvent, StaticResolver};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (browser, announcer) = ChannelBrowser::channel();
//! let resolver = StaticResolver::new();
//! resolver.insert("Studio", "192.168.1.20:7777".parse()?);
//!
//! let (scanner, mut events) = Scanner::start(&browser, Arc::new(resolver)).await?;
//! announcer.found("Studio", None).await;
//!
//! while let Some(event) = events.recv().await {
//!     if let ScannerEvent::Found { name, url, .. } = event {
//!         println!("{name} at {url}");
//!     }
//! }
//! scanner.stop();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod browser;
pub mod error;
pub mod mdns;
pub mod scanner;

pub use browser::{
    Advertisement, BrowseEvent, ChannelBrowser, ChannelBrowserHandle, ResolvedService,
    ServiceBrowser, ServiceResolver, StaticResolver,
};
pub use error::DiscoveryError;
pub use mdns::MdnsDiscovery;
pub use scanner::{Scanner, ScannerEvent, service_url};

/// DNS-SD service type advertised by streamers
pub const SERVICE_TYPE: &str = "_moblink._tcp";

/// Capacity of the browse event channel
pub const BROWSE_CHANNEL_CAPACITY: usize = 64;
