//! Error types for the node record controller

use thiserror::Error;

/// Main error type for nodeptr operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid startup configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A provider credential was not present in the environment
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(&'static str),

    /// The domain suffix has no registrable base domain
    #[error("invalid domain suffix '{0}': no registrable domain")]
    InvalidSuffix(String),

    /// No DNS zone matches the base domain of the suffix
    #[error("no DNS zone found for {0}")]
    ZoneNotFound(String),

    /// More than one DNS zone matches the base domain of the suffix
    #[error("{count} DNS zones match {zone}, refusing to guess")]
    AmbiguousZone {
        /// Zone name that was looked up
        zone: String,
        /// Number of zones returned
        count: usize,
    },

    /// A provider API call failed
    #[error("provider error [{provider}]: {message}")]
    Provider {
        /// Provider that failed (vultr, cloudflare)
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// A provider call did not finish within the per-call timeout
    #[error("provider call [{provider}] timed out after {secs}s")]
    ProviderTimeout {
        /// Provider that timed out
        provider: String,
        /// Timeout that was exceeded, in seconds
        secs: u64,
    },

    /// HTTP transport error talking to a provider API
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A watch event whose payload could not be decoded as a node
    #[error("malformed watch event: {0}")]
    MalformedEvent(String),

    /// The watch stream reported an error
    #[error("watch stream error: {0}")]
    WatchStream(String),

    /// The watch stream closed without shutdown being requested
    #[error("watch stream closed unexpectedly")]
    WatchClosed,
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider error for the named provider
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed event error with the given message
    pub fn malformed_event(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    /// Create a watch stream error with the given message
    pub fn watch_stream(msg: impl Into<String>) -> Self {
        Self::WatchStream(msg.into())
    }

    /// Whether this error can only come out of startup and must stop the process
    ///
    /// Everything else happens per node or per watch session and is handled
    /// by logging and moving on.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::MissingCredential(_)
                | Self::InvalidSuffix(_)
                | Self::ZoneNotFound(_)
                | Self::AmbiguousZone { .. }
        )
    }

    /// Whether a failed HTTP call is worth retrying inside a provider
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(false)
            }
            _ => false,
        }
    }
}
