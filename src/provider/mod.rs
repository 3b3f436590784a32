//! Record provider abstraction layer
//!
//! Two capabilities are needed to publish a node's records:
//!
//! - [`HostingProvider`] sets the reverse-DNS (PTR) pointer for an IP the
//!   hosting company owns
//! - [`DnsProvider`] creates the forward (A) record in the DNS zone
//!
//! Which implementation backs each capability is a closed set chosen once at
//! startup ([`HostingKind`], [`DnsKind`]) and built into [`Hosting`] / [`Dns`].
//!
//! # Supported Providers
//!
//! - [`VultrProvider`] - PTR records on Vultr instances
//! - [`CloudflareProvider`] - A records in a Cloudflare zone

mod cloudflare;
pub mod record;
mod vultr;

pub use cloudflare::CloudflareProvider;
pub use record::{record_name, DomainSuffix, RecordName};
pub use vultr::VultrProvider;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Timeout applied by the HTTP client to every provider request
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Sets reverse-DNS pointers
///
/// Implementations must tolerate repeated calls with identical arguments:
/// setting a PTR is a replace, never a duplicate-conflict.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostingProvider: Send + Sync {
    /// Point the reverse record of `ip` at the name derived from `node_name`
    async fn update_ptr(&self, ip: IpAddr, node_name: &str) -> Result<()>;
}

/// Creates forward A records
///
/// "Record already exists" is a success, not an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Ensure the name derived from `node_name` resolves to `ip`
    async fn update_a(&self, ip: IpAddr, node_name: &str) -> Result<()>;
}

/// Hosting providers that can set PTR records
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum HostingKind {
    /// Vultr cloud instances
    Vultr,
}

impl std::fmt::Display for HostingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vultr => write!(f, "vultr"),
        }
    }
}

/// DNS providers that can create A records
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum DnsKind {
    /// Cloudflare DNS
    Cloudflare,
}

impl std::fmt::Display for DnsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cloudflare => write!(f, "cloudflare"),
        }
    }
}

/// Which provider produced a dispatch result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// PTR update through a hosting provider
    Hosting(HostingKind),
    /// A record update through a DNS provider
    Dns(DnsKind),
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hosting(kind) => write!(f, "{kind}"),
            Self::Dns(kind) => write!(f, "{kind}"),
        }
    }
}

/// Configured hosting provider
pub enum Hosting {
    /// Vultr
    Vultr(VultrProvider),
}

impl Hosting {
    /// Build the hosting provider of the given kind, reading credentials from the environment
    pub fn from_env(kind: HostingKind, suffix: &DomainSuffix) -> Result<Self> {
        match kind {
            HostingKind::Vultr => Ok(Self::Vultr(VultrProvider::from_env(suffix.clone())?)),
        }
    }

    /// Kind of this provider
    pub fn kind(&self) -> HostingKind {
        match self {
            Self::Vultr(_) => HostingKind::Vultr,
        }
    }
}

#[async_trait]
impl HostingProvider for Hosting {
    async fn update_ptr(&self, ip: IpAddr, node_name: &str) -> Result<()> {
        match self {
            Self::Vultr(p) => p.update_ptr(ip, node_name).await,
        }
    }
}

/// Configured DNS provider
pub enum Dns {
    /// Cloudflare
    Cloudflare(CloudflareProvider),
}

impl Dns {
    /// Build the DNS provider of the given kind, reading credentials from the environment
    ///
    /// Cloudflare resolves its zone here, so a missing or ambiguous zone fails
    /// startup instead of every later update.
    pub async fn from_env(kind: DnsKind, suffix: &DomainSuffix) -> Result<Self> {
        match kind {
            DnsKind::Cloudflare => Ok(Self::Cloudflare(
                CloudflareProvider::connect_from_env(suffix.clone()).await?,
            )),
        }
    }

    /// Kind of this provider
    pub fn kind(&self) -> DnsKind {
        match self {
            Self::Cloudflare(_) => DnsKind::Cloudflare,
        }
    }
}

#[async_trait]
impl DnsProvider for Dns {
    async fn update_a(&self, ip: IpAddr, node_name: &str) -> Result<()> {
        match self {
            Self::Cloudflare(p) => p.update_a(ip, node_name).await,
        }
    }
}

/// Read a non-empty credential from the environment
pub(crate) fn credential_from_env(var: &'static str) -> Result<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(Error::MissingCredential(var))
}

/// HTTP client shared by a provider's requests
pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("nodeptr/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Turn a non-success response into an error
///
/// 429 and 5xx become [`Error::Http`] so they are retried; other failures
/// become [`Error::Provider`] carrying the response body.
pub(crate) async fn check_response(provider: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        if let Err(e) = resp.error_for_status_ref() {
            return Err(Error::Http(e));
        }
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::provider(provider, format!("{status}: {}", body.trim())))
}
