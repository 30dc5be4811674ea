//! Streamer endpoints and round-robin failover.

use moblink_transport::Network;

/// One reachable streamer address.
///
/// Two endpoints are equal when their URLs are equal, whatever network they
/// were seen on.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// `ws://` or `wss://` URL of the streamer
    pub url: String,
    /// Local network to connect from, if pinned
    pub network: Option<Network>,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(url: impl Into<String>, network: Option<Network>) -> Self {
        Self {
            url: url.into(),
            network,
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Endpoint {}

/// Ordered, deduplicated endpoints with a current index.
#[derive(Debug, Clone, Default)]
pub struct EndpointList {
    endpoints: Vec<Endpoint>,
    index: usize,
}

impl EndpointList {
    /// Build a list, dropping duplicate URLs. The index starts at 0.
    #[must_use]
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        let mut list = Self::default();
        for endpoint in endpoints {
            list.add(endpoint);
        }
        list
    }

    /// Append `endpoint` unless its URL is already present.
    ///
    /// Returns true if it was added.
    pub fn add(&mut self, endpoint: Endpoint) -> bool {
        if self.endpoints.contains(&endpoint) {
            return false;
        }
        self.endpoints.push(endpoint);
        true
    }

    /// Move to the next endpoint.
    ///
    /// Only advances when there is more than one endpoint. Returns true if
    /// the index changed.
    pub fn advance(&mut self) -> bool {
        if self.endpoints.len() > 1 {
            self.index = (self.index + 1) % self.endpoints.len();
            true
        } else {
            false
        }
    }

    /// The current endpoint.
    #[must_use]
    pub fn current(&self) -> Option<&Endpoint> {
        self.endpoints
            .get(self.index)
            .or_else(|| self.endpoints.first())
    }

    /// URL of the current endpoint, empty if there is none.
    #[must_use]
    pub fn current_url(&self) -> &str {
        self.current().map_or("", |endpoint| endpoint.url.as_str())
    }

    /// Index of the current endpoint.
    #[must_use]
    pub fn index(&self) -> usize {
        if self.index < self.endpoints.len() {
            self.index
        } else {
            0
        }
    }

    /// Number of endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Check if there are no endpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
