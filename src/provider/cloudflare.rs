//! Cloudflare DNS provider
//!
//! Creates A records in the Cloudflare zone matching the registrable base
//! domain of the configured suffix. The zone is resolved once, when the
//! provider is built.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{credential_from_env, http_client, DnsProvider, DomainSuffix};
use crate::retry::{retry_if, BackoffPolicy, Clock, TokioClock};
use crate::{Error, Result};

const PROVIDER: &str = "cloudflare";
const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
const RECORD_TTL: u32 = 60;

/// Cloudflare error code for "An identical record already exists."
const IDENTICAL_RECORD_EXISTS: u32 = 81058;

const IDENTICAL_RECORD_MESSAGE: &str = "an identical record already exists";

/// Cloudflare A record provider
pub struct CloudflareProvider {
    client: reqwest::Client,
    base_url: String,
    token: String,
    zone_id: String,
    suffix: DomainSuffix,
    retry: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

/// Response envelope shared by every Cloudflare v4 endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: u32,
    message: String,
}

impl ApiMessage {
    /// Only an identical record counts; a different record on the same
    /// host (81053) leaves the name pointing somewhere else
    fn is_identical_record(&self) -> bool {
        self.code == IDENTICAL_RECORD_EXISTS
            || self
                .message
                .to_lowercase()
                .starts_with(IDENTICAL_RECORD_MESSAGE)
    }
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct NewRecord<'a> {
    #[serde(rename = "type")]
    type_: &'static str,
    name: &'a str,
    content: String,
    ttl: u32,
    proxied: bool,
}

/// Outcome of a record creation call
#[derive(Debug, PartialEq, Eq)]
enum Created {
    New,
    AlreadyExists,
}

fn describe(errors: &[ApiMessage]) -> String {
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CloudflareProvider {
    /// Environment variable holding the API token
    pub const API_TOKEN_ENV: &'static str = "CLOUDFLARE_API_TOKEN";

    /// Connect using the token from [`Self::API_TOKEN_ENV`]
    pub async fn connect_from_env(suffix: DomainSuffix) -> Result<Self> {
        let token = credential_from_env(Self::API_TOKEN_ENV)?;
        Self::new(token, suffix)?.connect().await
    }

    /// Create a provider whose zone is not resolved yet
    ///
    /// [`Self::connect`] must succeed before records can be created.
    pub fn new(token: impl Into<String>, suffix: DomainSuffix) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            zone_id: String::new(),
            suffix,
            retry: BackoffPolicy::exponential(3),
            clock: Arc::new(TokioClock),
        })
    }

    /// Point the provider at a different API endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the retry policy for transient API failures
    pub fn with_retry(mut self, retry: BackoffPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Clock used to wait between retries
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve the zone for the suffix's base domain
    pub async fn connect(mut self) -> Result<Self> {
        self.zone_id = self.lookup_zone().await?;
        Ok(self)
    }

    /// Identifier of the resolved zone
    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    async fn lookup_zone(&self) -> Result<String> {
        let zone_name = self.suffix.base().to_string();
        let zones: Vec<Zone> = retry_if(
            &self.retry,
            self.clock.as_ref(),
            "cloudflare.list_zones",
            Error::is_transient,
            || self.list_zones(&zone_name),
        )
        .await?;

        match zones.as_slice() {
            [] => Err(Error::ZoneNotFound(zone_name)),
            [zone] => {
                debug!(zone = %zone.name, id = %zone.id, "Resolved Cloudflare zone");
                Ok(zone.id.clone())
            }
            many => Err(Error::AmbiguousZone {
                zone: zone_name,
                count: many.len(),
            }),
        }
    }

    async fn list_zones(&self, name: &str) -> Result<Vec<Zone>> {
        let resp = self
            .client
            .get(format!("{}/zones", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("name", name)])
            .send()
            .await?;
        self.read_envelope(resp).await
    }

    /// Decode a response, mapping API failures to errors
    async fn read_envelope<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            if let Err(e) = resp.error_for_status_ref() {
                return Err(Error::Http(e));
            }
        }

        let envelope: Envelope<T> = resp.json().await?;
        if !envelope.success {
            return Err(Error::provider(
                PROVIDER,
                format!("{status}: {}", describe(&envelope.errors)),
            ));
        }
        envelope
            .result
            .ok_or_else(|| Error::provider(PROVIDER, "response has no result"))
    }

    async fn create_record(&self, name: &str, ip: IpAddr) -> Result<Created> {
        let resp = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.base_url, self.zone_id))
            .bearer_auth(&self.token)
            .json(&NewRecord {
                type_: "A",
                name,
                content: ip.to_string(),
                ttl: RECORD_TTL,
                proxied: false,
            })
            .send()
            .await?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            if let Err(e) = resp.error_for_status_ref() {
                return Err(Error::Http(e));
            }
        }

        let envelope: Envelope<serde_json::Value> = resp.json().await?;
        if envelope.success {
            return Ok(Created::New);
        }
        if envelope.errors.iter().any(ApiMessage::is_identical_record) {
            return Ok(Created::AlreadyExists);
        }
        Err(Error::provider(
            PROVIDER,
            format!("{status}: {}", describe(&envelope.errors)),
        ))
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn update_a(&self, ip: IpAddr, node_name: &str) -> Result<()> {
        if !ip.is_ipv4() {
            return Err(Error::provider(
                PROVIDER,
                format!("A records need an IPv4 address, got {ip}"),
            ));
        }

        if self.zone_id.is_empty() {
            return Err(Error::provider(PROVIDER, "zone not resolved, call connect first"));
        }

        let record = self.suffix.record_for(node_name);
        let created = retry_if(
            &self.retry,
            self.clock.as_ref(),
            "cloudflare.create_record",
            Error::is_transient,
            || self.create_record(record.label(), ip),
        )
        .await?;

        match created {
            Created::New => debug!(record = %record.fqdn(), %ip, "Cloudflare A record created"),
            Created::AlreadyExists => {
                debug!(record = %record.fqdn(), %ip, "Cloudflare A record already exists")
            }
        }
        Ok(())
    }
}
