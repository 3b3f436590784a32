//! Node snapshots and lifecycle events
//!
//! The controller only cares about a node's name and its address list, so
//! the full `k8s_openapi` [`Node`] is reduced to a [`NodeSnapshot`] as soon as
//! it arrives.

use std::net::IpAddr;

use k8s_openapi::api::core::v1::Node;

use crate::{Error, Result};

/// Kind of address reported in `status.addresses`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressType {
    /// Externally routable IP (`ExternalIP`)
    ExternalIp,
    /// Cluster-internal IP (`InternalIP`)
    InternalIp,
    /// Node hostname (`Hostname`)
    Hostname,
    /// External DNS name (`ExternalDNS`)
    ExternalDns,
    /// Internal DNS name (`InternalDNS`)
    InternalDns,
    /// Any type this controller does not know about
    Other(String),
}

impl From<&str> for AddressType {
    fn from(value: &str) -> Self {
        match value {
            "ExternalIP" => Self::ExternalIp,
            "InternalIP" => Self::InternalIp,
            "Hostname" => Self::Hostname,
            "ExternalDNS" => Self::ExternalDns,
            "InternalDNS" => Self::InternalDns,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One entry of a node's address list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAddress {
    /// Address type
    pub type_: AddressType,
    /// Address value as reported by the kubelet / cloud controller
    pub address: String,
}

/// A node's name and addresses, observed at one point in time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Node name; also the DNS label of its records
    pub name: String,
    /// Reported addresses, in status order
    pub addresses: Vec<NodeAddress>,
}

impl NodeSnapshot {
    /// Create a snapshot with no addresses
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
        }
    }

    /// Add an address to the snapshot
    pub fn with_address(mut self, type_: AddressType, address: impl Into<String>) -> Self {
        self.addresses.push(NodeAddress {
            type_,
            address: address.into(),
        });
        self
    }

    /// First `ExternalIP` that parses as an IP address
    pub fn external_ip(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .filter(|a| a.type_ == AddressType::ExternalIp)
            .find_map(|a| a.address.trim().parse().ok())
    }
}

impl TryFrom<&Node> for NodeSnapshot {
    type Error = Error;

    fn try_from(node: &Node) -> Result<Self> {
        let name = node
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::malformed_event("node has no name"))?;

        let addresses = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .map(|addrs| {
                addrs
                    .iter()
                    .map(|a| NodeAddress {
                        type_: AddressType::from(a.type_.as_str()),
                        address: a.address.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { name, addresses })
    }
}

/// Type tag of a watch event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Node was created (or listed at the start of a watch)
    Added,
    /// Node changed
    Modified,
    /// Node was removed
    Deleted,
    /// Progress marker carrying only a resource version
    Bookmark,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "Added"),
            Self::Modified => write!(f, "Modified"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Bookmark => write!(f, "Bookmark"),
        }
    }
}

/// A node lifecycle event
#[derive(Clone, Debug)]
pub struct NodeEvent {
    /// Event type
    pub kind: EventKind,
    /// Node payload as delivered by the watch (absent for bookmarks)
    pub node: Option<Node>,
}

impl NodeEvent {
    /// Create an event for the given node payload
    pub fn new(kind: EventKind, node: Node) -> Self {
        Self {
            kind,
            node: Some(node),
        }
    }

    /// Create a bookmark event
    pub fn bookmark() -> Self {
        Self {
            kind: EventKind::Bookmark,
            node: None,
        }
    }

    /// Reduce the payload to a snapshot
    pub fn snapshot(&self) -> Result<NodeSnapshot> {
        self.node
            .as_ref()
            .ok_or_else(|| Error::malformed_event(format!("{} event has no node", self.kind)))
            .and_then(NodeSnapshot::try_from)
    }
}
