//! Fans a resolved address out to the configured providers
//!
//! The PTR and A updates are independent: each runs under its own timeout,
//! and a failure of one never retries, cancels, or rolls back the other.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::provider::{DnsKind, DnsProvider, HostingKind, HostingProvider, ProviderKind};
use crate::{Error, Result};

/// Default bound for a single provider call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one provider call
#[derive(Debug)]
pub struct ProviderResult {
    /// Provider that was called
    pub kind: ProviderKind,
    /// What it returned
    pub result: Result<()>,
}

impl ProviderResult {
    /// Whether the call succeeded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Calls the hosting and DNS providers for a resolved node
pub struct Dispatcher {
    hosting: Option<(HostingKind, Arc<dyn HostingProvider>)>,
    dns: Option<(DnsKind, Arc<dyn DnsProvider>)>,
    call_timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl Dispatcher {
    /// Create a dispatcher with no providers
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            hosting: None,
            dns: None,
            call_timeout,
        }
    }

    /// Set the PTR provider
    pub fn with_hosting(mut self, kind: HostingKind, provider: Arc<dyn HostingProvider>) -> Self {
        self.hosting = Some((kind, provider));
        self
    }

    /// Set the A record provider
    pub fn with_dns(mut self, kind: DnsKind, provider: Arc<dyn DnsProvider>) -> Self {
        self.dns = Some((kind, provider));
        self
    }

    /// Update every configured provider for `node_name` at `ip`
    ///
    /// Returns one result per configured provider, hosting first.
    pub async fn dispatch(&self, ip: IpAddr, node_name: &str) -> Vec<ProviderResult> {
        let hosting = async {
            match &self.hosting {
                Some((kind, provider)) => Some(
                    self.call(
                        ProviderKind::Hosting(*kind),
                        ip,
                        node_name,
                        provider.update_ptr(ip, node_name),
                    )
                    .await,
                ),
                None => None,
            }
        };
        let dns = async {
            match &self.dns {
                Some((kind, provider)) => Some(
                    self.call(
                        ProviderKind::Dns(*kind),
                        ip,
                        node_name,
                        provider.update_a(ip, node_name),
                    )
                    .await,
                ),
                None => None,
            }
        };

        let (hosting, dns) = tokio::join!(hosting, dns);
        hosting.into_iter().chain(dns).collect()
    }

    async fn call<F>(&self, kind: ProviderKind, ip: IpAddr, node_name: &str, call: F) -> ProviderResult
    where
        F: Future<Output = Result<()>>,
    {
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::ProviderTimeout {
                provider: kind.to_string(),
                secs: self.call_timeout.as_secs(),
            }),
        };

        let record = match kind {
            ProviderKind::Hosting(_) => "PTR",
            ProviderKind::Dns(_) => "A",
        };
        match &result {
            Ok(()) => info!(node = %node_name, %ip, provider = %kind, record, "Record updated"),
            Err(e) => error!(
                node = %node_name,
                %ip,
                provider = %kind,
                record,
                error = %e,
                "Record update failed"
            ),
        }

        ProviderResult { kind, result }
    }
}
