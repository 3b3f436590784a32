//! Kubernetes node event source
//!
//! [`KubeNodeWatcher`] opens list+watch sessions over cluster nodes and
//! [`KubeNodeSource`] re-reads a single node on demand. Both sit behind
//! traits so the reconciler can be driven without a cluster.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use parking_lot::Mutex;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::node::{EventKind, NodeEvent, NodeSnapshot};
use crate::{Error, Result};

/// Server-side watch timeout, kept below the client's read timeout so the
/// API server ends the session before the client gives up on it
const WATCH_TIMEOUT_SECS: u32 = 290;

/// HTTP status the API server uses when a resource version is too old
const GONE: u16 = 410;

/// Stream of node events from one watch session
pub type NodeEventStream = BoxStream<'static, Result<NodeEvent>>;

/// Opens watch sessions over cluster nodes
#[async_trait]
pub trait NodeEventSource: Send + Sync {
    /// Start a new watch session
    ///
    /// Items are [`Error::MalformedEvent`] for payloads that could not be
    /// decoded and [`Error::WatchStream`] for failures of the session itself.
    async fn watch(&self) -> Result<NodeEventStream>;
}

/// Reads the current state of a single node
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Fetch a node by name, `None` if it no longer exists
    async fn get_node(&self, name: &str) -> Result<Option<NodeSnapshot>>;
}

/// Node reads through the Kubernetes API
#[derive(Clone)]
pub struct KubeNodeSource {
    api: Api<Node>,
}

impl KubeNodeSource {
    /// Create a source reading cluster-scoped nodes
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeSource for KubeNodeSource {
    async fn get_node(&self, name: &str) -> Result<Option<NodeSnapshot>> {
        self.api
            .get_opt(name)
            .await?
            .as_ref()
            .map(NodeSnapshot::try_from)
            .transpose()
    }
}

/// Node watch sessions through the Kubernetes API
///
/// The first session starts at resource version `"0"`, which makes the API
/// server replay every existing node as `Added`. Later sessions resume from
/// the last version seen, unless the server reported it as expired.
#[derive(Clone)]
pub struct KubeNodeWatcher {
    api: Api<Node>,
    resource_version: Arc<Mutex<Option<String>>>,
}

impl KubeNodeWatcher {
    /// Create a watcher over cluster-scoped nodes
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
            resource_version: Arc::new(Mutex::new(None)),
        }
    }

    /// Resource version the next session will resume from
    pub fn resume_version(&self) -> Option<String> {
        self.resource_version.lock().clone()
    }
}

#[async_trait]
impl NodeEventSource for KubeNodeWatcher {
    async fn watch(&self) -> Result<NodeEventStream> {
        let version = self.resume_version().unwrap_or_else(|| "0".to_string());
        info!(resource_version = %version, "Opening node watch");

        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = self.api.watch(&params, &version).await?;

        let tracker = self.resource_version.clone();
        Ok(stream
            .map(move |item| translate(&tracker, item))
            .boxed())
    }
}

fn remember(tracker: &Mutex<Option<String>>, version: Option<&str>) {
    if let Some(v) = version.filter(|v| !v.is_empty()) {
        *tracker.lock() = Some(v.to_string());
    }
}

/// Map a raw watch item to a node event, tracking the resume version
fn translate(
    tracker: &Mutex<Option<String>>,
    item: std::result::Result<WatchEvent<Node>, kube::Error>,
) -> Result<NodeEvent> {
    let (kind, node) = match item {
        Ok(WatchEvent::Added(node)) => (EventKind::Added, node),
        Ok(WatchEvent::Modified(node)) => (EventKind::Modified, node),
        Ok(WatchEvent::Deleted(node)) => (EventKind::Deleted, node),
        Ok(WatchEvent::Bookmark(bookmark)) => {
            remember(tracker, Some(&bookmark.metadata.resource_version));
            return Ok(NodeEvent::bookmark());
        }
        Ok(WatchEvent::Error(e)) => {
            if e.code == GONE {
                debug!("Resource version expired, next watch will relist");
                *tracker.lock() = None;
            }
            return Err(Error::watch_stream(format!("{} ({})", e.message, e.code)));
        }
        Err(kube::Error::SerdeError(e)) => return Err(Error::malformed_event(e.to_string())),
        Err(kube::Error::Api(e)) if e.code == GONE => {
            *tracker.lock() = None;
            return Err(Error::watch_stream(format!("{} ({})", e.message, e.code)));
        }
        Err(e) => return Err(Error::watch_stream(e.to_string())),
    };

    remember(tracker, node.metadata.resource_version.as_deref());
    Ok(NodeEvent::new(kind, node))
}
