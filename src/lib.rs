//! nodeptr - publishes DNS records for Kubernetes nodes as they join
//!
//! When a node is added to the cluster, nodeptr waits for the cloud
//! controller to assign its `ExternalIP`, then points the hosting provider's
//! reverse record (PTR) at the node name and optionally creates the forward
//! (A) record with a DNS provider.
//!
//! # Modules
//!
//! - [`config`] - Validated controller configuration
//! - [`controller`] - Event handling, address resolution and provider dispatch
//! - [`watch`] - Kubernetes node watch and node reads
//! - [`node`] - Node snapshots and watch events
//! - [`provider`] - Hosting and DNS provider integrations (Vultr, Cloudflare)
//! - [`retry`] - Backoff policies and the retry clock
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod node;
pub mod provider;
pub mod retry;
pub mod watch;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
