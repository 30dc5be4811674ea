//! Discovery error types.

use thiserror::Error;

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Browsing for the service type could not be started
    #[error("Browse for {service_type} failed: {reason}")]
    BrowseFailed {
        /// Service type being browsed
        service_type: String,
        /// Underlying failure
        reason: String,
    },

    /// An advertisement could not be resolved
    #[error("Resolve of {name} failed: {reason}")]
    ResolveFailed {
        /// Advertised service name
        name: String,
        /// Underlying failure
        reason: String,
    },
}
