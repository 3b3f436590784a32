//! Node record controller
//!
//! Watches for nodes joining the cluster and publishes their records:
//!
//! - [`AddressResolver`] waits for a node's `ExternalIP`
//! - [`Dispatcher`] sends the address to the hosting and DNS providers
//! - [`Reconciler`] turns watch events into per-node workflows

mod dispatch;
mod reconciler;
mod resolver;

pub use dispatch::{Dispatcher, ProviderResult, DEFAULT_CALL_TIMEOUT};
pub use reconciler::{ReconciliationReport, Reconciler, DEFAULT_MAX_CONCURRENT_NODES};
pub use resolver::{AddressResolver, Outcome, ReconciliationAttempt};

use std::sync::Arc;

use kube::Client;
use tracing::info;

use crate::config::ControllerConfig;
use crate::provider::{Dns, Hosting};
use crate::retry::TokioClock;
use crate::watch::KubeNodeSource;
use crate::Result;

/// Build a reconciler for `config`, backed by the cluster behind `client`
///
/// Provider credentials are read from the environment here, and the DNS zone
/// is looked up, so configuration problems surface before any event is handled.
pub async fn from_config(config: &ControllerConfig, client: Client) -> Result<Reconciler> {
    let hosting = Hosting::from_env(config.hosting, &config.suffix)?;
    let mut dispatcher =
        Dispatcher::new(config.call_timeout).with_hosting(hosting.kind(), Arc::new(hosting));

    if let Some(kind) = config.dns {
        let dns = Dns::from_env(kind, &config.suffix).await?;
        dispatcher = dispatcher.with_dns(dns.kind(), Arc::new(dns));
    }

    info!(
        hosting = %config.hosting,
        dns = ?config.dns,
        suffix = %config.suffix.as_str(),
        max_concurrent_nodes = config.max_concurrent_nodes,
        "Providers configured"
    );

    let resolver = AddressResolver::new(
        Arc::new(KubeNodeSource::new(client)),
        config.resolve_policy.clone(),
        Arc::new(TokioClock),
    );

    Ok(Reconciler::new(resolver, dispatcher).with_max_concurrent(config.max_concurrent_nodes))
}
