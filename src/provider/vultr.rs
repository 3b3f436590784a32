//! Vultr hosting provider
//!
//! Sets the reverse DNS of an instance's main IP through the Vultr v2 API.
//! The instance owning an address is found by paging through the instance
//! list, since the API has no lookup by IP.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_response, credential_from_env, http_client, DomainSuffix, HostingProvider};
use crate::retry::{retry_if, BackoffPolicy, Clock, TokioClock};
use crate::{Error, Result};

const PROVIDER: &str = "vultr";
const DEFAULT_BASE_URL: &str = "https://api.vultr.com/v2";
const PAGE_SIZE: u32 = 100;

/// Vultr PTR provider
pub struct VultrProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    suffix: DomainSuffix,
    retry: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Deserialize)]
struct InstancePage {
    #[serde(default)]
    instances: Vec<Instance>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct Instance {
    id: String,
    #[serde(default)]
    main_ip: String,
    #[serde(default)]
    v6_main_ip: String,
}

impl Instance {
    fn owns(&self, ip: IpAddr) -> bool {
        let candidate = match ip {
            IpAddr::V4(_) => &self.main_ip,
            IpAddr::V6(_) => &self.v6_main_ip,
        };
        candidate.parse::<IpAddr>().map(|c| c == ip).unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    #[serde(default)]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: String,
}

#[derive(Debug, Serialize)]
struct ReverseRequest<'a> {
    ip: String,
    reverse: &'a str,
}

impl VultrProvider {
    /// Environment variable holding the API key
    pub const API_KEY_ENV: &'static str = "VULTR_API_KEY";

    /// Create a provider using the API key from [`Self::API_KEY_ENV`]
    pub fn from_env(suffix: DomainSuffix) -> Result<Self> {
        Self::new(credential_from_env(Self::API_KEY_ENV)?, suffix)
    }

    /// Create a provider with an explicit API key
    pub fn new(api_key: impl Into<String>, suffix: DomainSuffix) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
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

    /// PTR value for a node: the node's fully-qualified name under the suffix
    pub fn ptr_name(&self, node_name: &str) -> String {
        self.suffix.record_for(node_name).fqdn()
    }

    async fn list_page(&self, cursor: Option<&str>) -> Result<InstancePage> {
        let mut request = self
            .client
            .get(format!("{}/instances", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("per_page", PAGE_SIZE.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let resp = check_response(PROVIDER, request.send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn find_instance(&self, ip: IpAddr) -> Result<String> {
        let mut cursor: Option<String> = None;

        loop {
            let page = retry_if(
                &self.retry,
                self.clock.as_ref(),
                "vultr.list_instances",
                Error::is_transient,
                || self.list_page(cursor.as_deref()),
            )
            .await?;

            if let Some(instance) = page.instances.iter().find(|i| i.owns(ip)) {
                return Ok(instance.id.clone());
            }

            match page.meta.map(|m| m.links.next).filter(|n| !n.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Err(Error::provider(
            PROVIDER,
            format!("instance not found for IP {ip}"),
        ))
    }

    async fn set_reverse(&self, instance_id: &str, ip: IpAddr, reverse: &str) -> Result<()> {
        let family = match ip {
            IpAddr::V4(_) => "ipv4",
            IpAddr::V6(_) => "ipv6",
        };
        let resp = self
            .client
            .post(format!(
                "{}/instances/{}/{}/reverse",
                self.base_url, instance_id, family
            ))
            .bearer_auth(&self.api_key)
            .json(&ReverseRequest {
                ip: ip.to_string(),
                reverse,
            })
            .send()
            .await?;
        check_response(PROVIDER, resp).await?;
        Ok(())
    }
}

#[async_trait]
impl HostingProvider for VultrProvider {
    async fn update_ptr(&self, ip: IpAddr, node_name: &str) -> Result<()> {
        let instance_id = self.find_instance(ip).await?;
        let ptr = self.ptr_name(node_name);

        retry_if(
            &self.retry,
            self.clock.as_ref(),
            "vultr.set_reverse",
            Error::is_transient,
            || self.set_reverse(&instance_id, ip, &ptr),
        )
        .await?;

        debug!(instance = %instance_id, %ip, %ptr, "Vultr reverse DNS set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::testing::ManualClock;
    use std::time::Duration;
    use wiremock::matchers::{bearer_token, body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_with_clock(server: &MockServer, clock: Arc<ManualClock>) -> VultrProvider {
        VultrProvider::new("test-key", DomainSuffix::parse("scanning.example.com").unwrap())
            .unwrap()
            .with_base_url(server.uri())
            .with_retry(BackoffPolicy::fixed(3, Duration::from_millis(500)))
            .with_clock(clock)
    }

    async fn provider(server: &MockServer) -> VultrProvider {
        provider_with_clock(server, Arc::new(ManualClock::new()))
    }

    fn page(instances: serde_json::Value, next: &str) -> serde_json::Value {
        serde_json::json!({
            "instances": instances,
            "meta": { "total": 0, "links": { "next": next, "prev": "" } }
        })
    }

    #[tokio::test]
    async fn test_sets_ptr_on_matching_instance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instances"))
            .and(bearer_token("test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                serde_json::json!([
                    { "id": "other", "main_ip": "5.6.7.8", "v6_main_ip": "" },
                    { "id": "inst-1", "main_ip": "1.2.3.4", "v6_main_ip": "" }
                ]),
                "",
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/instances/inst-1/ipv4/reverse"))
            .and(body_json(serde_json::json!({
                "ip": "1.2.3.4",
                "reverse": "node-1.scanning.example.com"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let vultr = provider(&server).await;
        vultr
            .update_ptr("1.2.3.4".parse().unwrap(), "node-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_follows_pagination_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instances"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                serde_json::json!([{ "id": "inst-2", "main_ip": "1.2.3.4" }]),
                "",
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                serde_json::json!([{ "id": "inst-1", "main_ip": "9.9.9.9" }]),
                "page2",
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/instances/inst-2/ipv4/reverse"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let vultr = provider(&server).await;
        vultr
            .update_ptr("1.2.3.4".parse().unwrap(), "node-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ipv6_uses_ipv6_reverse_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                serde_json::json!([{ "id": "inst-6", "main_ip": "1.1.1.1", "v6_main_ip": "2001:db8::1" }]),
                "",
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/instances/inst-6/ipv6/reverse"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let vultr = provider(&server).await;
        vultr
            .update_ptr("2001:db8::1".parse().unwrap(), "node-6")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_ip_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instances"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(page(serde_json::json!([]), "")),
            )
            .mount(&server)
            .await;

        let vultr = provider(&server).await;
        let err = vultr
            .update_ptr("1.2.3.4".parse().unwrap(), "node-1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("instance not found for IP 1.2.3.4"));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instances"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                serde_json::json!([{ "id": "inst-1", "main_ip": "1.2.3.4" }]),
                "",
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/instances/inst-1/ipv4/reverse"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new());
        let vultr = provider_with_clock(&server, clock.clone());
        vultr
            .update_ptr("1.2.3.4".parse().unwrap(), "node-1")
            .await
            .unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instances"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "error": "Invalid API token", "status": 401 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let vultr = provider(&server).await;
        let err = vultr
            .update_ptr("1.2.3.4".parse().unwrap(), "node-1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        assert!(err.to_string().contains("Invalid API token"));
    }

    #[test]
    fn test_ptr_name_is_fully_qualified() {
        let vultr =
            VultrProvider::new("k", DomainSuffix::parse("example.com").unwrap()).unwrap();
        assert_eq!(vultr.ptr_name("node-3"), "node-3.example.com");
    }
}
