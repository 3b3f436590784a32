//! Controller configuration
//!
//! Everything the controller needs is collected into one [`ControllerConfig`]
//! at startup and passed explicitly to the providers and the reconciler.

use std::time::Duration;

use crate::controller::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_CONCURRENT_NODES};
use crate::provider::{DnsKind, DomainSuffix, HostingKind};
use crate::retry::BackoffPolicy;
use crate::{Error, Result};

/// Default number of node polls before giving up on an address
pub const DEFAULT_RESOLVE_ATTEMPTS: u32 = 6;

/// Default delay between node polls
pub const DEFAULT_RESOLVE_DELAY: Duration = Duration::from_secs(5);

/// Validated controller configuration
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Provider that sets PTR records
    pub hosting: HostingKind,
    /// Provider that creates A records, if any
    pub dns: Option<DnsKind>,
    /// Domain that node names are published under
    pub suffix: DomainSuffix,
    /// How often and how long to poll a node for its address
    pub resolve_policy: BackoffPolicy,
    /// Bound on a single provider call
    pub call_timeout: Duration,
    /// Node workflows allowed to run at the same time
    pub max_concurrent_nodes: usize,
}

impl ControllerConfig {
    /// Build a config with default resolution and timeout settings
    pub fn new(hosting: HostingKind, dns: Option<DnsKind>, suffix: &str) -> Result<Self> {
        Ok(Self {
            hosting,
            dns,
            suffix: DomainSuffix::parse(suffix)?,
            resolve_policy: BackoffPolicy::fixed(DEFAULT_RESOLVE_ATTEMPTS, DEFAULT_RESOLVE_DELAY),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_concurrent_nodes: DEFAULT_MAX_CONCURRENT_NODES,
        })
    }

    /// Set the address resolution budget
    pub fn with_resolve(mut self, attempts: u32, delay: Duration, jitter: f64) -> Result<Self> {
        if attempts == 0 {
            return Err(Error::config("resolve attempts must be at least 1"));
        }
        if !(0.0..1.0).contains(&jitter) {
            return Err(Error::config(format!(
                "resolve jitter must be in [0, 1), got {jitter}"
            )));
        }
        self.resolve_policy = BackoffPolicy::fixed(attempts, delay).with_jitter(jitter);
        Ok(self)
    }

    /// Set the per-call provider timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::config("provider call timeout must be greater than zero"));
        }
        self.call_timeout = timeout;
        Ok(self)
    }

    /// Set how many nodes are reconciled at the same time
    pub fn with_max_concurrent_nodes(mut self, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(Error::config("max concurrent nodes must be at least 1"));
        }
        self.max_concurrent_nodes = limit;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_budget() {
        let config = ControllerConfig::new(HostingKind::Vultr, None, "scanning.example.com").unwrap();

        assert_eq!(config.resolve_policy.max_attempts, 6);
        assert_eq!(config.resolve_policy.initial_delay, Duration::from_secs(5));
        assert_eq!(config.resolve_policy.max_total_delay(), Duration::from_secs(25));
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_nodes, DEFAULT_MAX_CONCURRENT_NODES);
        assert_eq!(config.suffix.as_str(), "scanning.example.com");
    }

    #[test]
    fn test_suffix_without_registrable_domain_is_rejected() {
        let err = ControllerConfig::new(HostingKind::Vultr, None, "com").unwrap_err();
        assert!(matches!(err, Error::InvalidSuffix(_)));
        assert!(err.is_startup_fatal());
    }

    #[test]
    fn test_resolve_settings_are_validated() {
        let config = ControllerConfig::new(HostingKind::Vultr, Some(DnsKind::Cloudflare), "example.com")
            .unwrap();

        assert!(matches!(
            config.clone().with_resolve(0, Duration::from_secs(5), 0.0),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config.clone().with_resolve(3, Duration::from_secs(5), 1.0),
            Err(Error::Config(_))
        ));

        let config = config.with_resolve(10, Duration::from_secs(2), 0.2).unwrap();
        assert_eq!(config.resolve_policy.max_attempts, 10);
        assert_eq!(config.resolve_policy.jitter, 0.2);
    }

    #[test]
    fn test_zero_call_timeout_is_rejected() {
        let config = ControllerConfig::new(HostingKind::Vultr, None, "example.com").unwrap();
        assert!(config.with_call_timeout(Duration::ZERO).is_err());
    }

    #[test]
    fn test_concurrency_limit_must_allow_progress() {
        let config = ControllerConfig::new(HostingKind::Vultr, None, "example.com").unwrap();
        assert!(matches!(
            config.clone().with_max_concurrent_nodes(0),
            Err(Error::Config(_))
        ));
        assert_eq!(config.with_max_concurrent_nodes(3).unwrap().max_concurrent_nodes, 3);
    }
}
