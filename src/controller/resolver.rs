//! Waits for a node's external address
//!
//! Cloud controllers assign `ExternalIP` some time after the node object is
//! created, so the address is polled with a bounded number of attempts. Every
//! attempt re-reads the node; a snapshot is never reused across attempts.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::retry::{BackoffPolicy, Clock};
use crate::watch::NodeSource;

/// How a resolution attempt ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The node reported an external address
    Resolved(IpAddr),
    /// No external address within the attempt budget
    TimedOut,
    /// The node was deleted before an address appeared
    NodeGone,
}

/// In-memory record of one node's address resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciliationAttempt {
    /// Node being resolved
    pub node_name: String,
    /// Number of polls made
    pub attempts: u32,
    /// Time spent from the first poll to the outcome
    pub elapsed: Duration,
    /// Terminal outcome
    pub outcome: Outcome,
}

impl ReconciliationAttempt {
    /// Resolved address, if any
    pub fn address(&self) -> Option<IpAddr> {
        match self.outcome {
            Outcome::Resolved(ip) => Some(ip),
            _ => None,
        }
    }
}

/// Polls a node until it has an `ExternalIP` or the budget runs out
pub struct AddressResolver {
    nodes: Arc<dyn NodeSource>,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl AddressResolver {
    /// Create a resolver reading nodes from `nodes`
    pub fn new(nodes: Arc<dyn NodeSource>, policy: BackoffPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes,
            policy,
            clock,
        }
    }

    /// Poll `node_name` until an external address appears
    ///
    /// A failed read counts as an attempt. No delay follows the last attempt.
    pub async fn resolve(&self, node_name: &str) -> ReconciliationAttempt {
        let started = self.clock.now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;

            match self.nodes.get_node(node_name).await {
                Ok(Some(node)) => {
                    if let Some(ip) = node.external_ip() {
                        break Outcome::Resolved(ip);
                    }
                    debug!(node = %node_name, attempt, "ExternalIP not assigned yet");
                }
                Ok(None) => break Outcome::NodeGone,
                Err(e) => {
                    warn!(node = %node_name, attempt, error = %e, "Failed to fetch node");
                }
            }

            if attempt >= max_attempts {
                break Outcome::TimedOut;
            }

            self.clock.sleep(self.policy.delay_for(attempt)).await;
        };

        ReconciliationAttempt {
            node_name: node_name.to_string(),
            attempts: attempt,
            elapsed: self.clock.now().saturating_duration_since(started),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AddressType, NodeSnapshot};
    use crate::retry::testing::ManualClock;
    use crate::watch::MockNodeSource;
    use crate::Error;
    use mockall::Sequence;

    fn resolver(nodes: MockNodeSource, clock: Arc<ManualClock>) -> AddressResolver {
        AddressResolver::new(
            Arc::new(nodes),
            BackoffPolicy::fixed(6, Duration::from_secs(5)),
            clock,
        )
    }

    fn without_ip(name: &str) -> NodeSnapshot {
        NodeSnapshot::new(name).with_address(AddressType::InternalIp, "10.0.0.1")
    }

    fn with_ip(name: &str, ip: &str) -> NodeSnapshot {
        without_ip(name).with_address(AddressType::ExternalIp, ip)
    }

    /// Story: The address shows up on the third poll
    #[tokio::test]
    async fn story_address_appears_after_two_empty_polls() {
        let mut nodes = MockNodeSource::new();
        let mut seq = Sequence::new();
        nodes
            .expect_get_node()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|name| Ok(Some(without_ip(name))));
        nodes
            .expect_get_node()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Ok(Some(with_ip(name, "1.2.3.4"))));

        let clock = Arc::new(ManualClock::new());
        let attempt = resolver(nodes, clock.clone()).resolve("node-1").await;

        assert_eq!(attempt.outcome, Outcome::Resolved("1.2.3.4".parse().unwrap()));
        assert_eq!(attempt.attempts, 3);
        assert_eq!(attempt.elapsed, Duration::from_secs(10));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    /// Story: The address never shows up and the node is given up on
    #[tokio::test]
    async fn story_address_never_appears() {
        let mut nodes = MockNodeSource::new();
        nodes
            .expect_get_node()
            .times(6)
            .returning(|name| Ok(Some(without_ip(name))));

        let clock = Arc::new(ManualClock::new());
        let attempt = resolver(nodes, clock.clone()).resolve("node-2").await;

        assert_eq!(attempt.outcome, Outcome::TimedOut);
        assert_eq!(attempt.attempts, 6);
        assert_eq!(attempt.address(), None);
        // no sleep after the final poll
        assert_eq!(clock.sleeps().len(), 5);
        assert_eq!(attempt.elapsed, Duration::from_secs(25));
    }

    #[tokio::test]
    async fn test_address_already_present_needs_one_poll() {
        let mut nodes = MockNodeSource::new();
        nodes
            .expect_get_node()
            .times(1)
            .returning(|name| Ok(Some(with_ip(name, "5.6.7.8"))));

        let clock = Arc::new(ManualClock::new());
        let attempt = resolver(nodes, clock.clone()).resolve("node-1").await;

        assert_eq!(attempt.address(), Some("5.6.7.8".parse().unwrap()));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_errors_count_as_attempts() {
        let mut nodes = MockNodeSource::new();
        let mut seq = Sequence::new();
        nodes
            .expect_get_node()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::watch_stream("connection reset")));
        nodes
            .expect_get_node()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Ok(Some(with_ip(name, "1.2.3.4"))));

        let clock = Arc::new(ManualClock::new());
        let attempt = resolver(nodes, clock).resolve("node-1").await;

        assert_eq!(attempt.attempts, 2);
        assert_eq!(attempt.address(), Some("1.2.3.4".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_deleted_node_stops_polling() {
        let mut nodes = MockNodeSource::new();
        nodes.expect_get_node().times(1).returning(|_| Ok(None));

        let clock = Arc::new(ManualClock::new());
        let attempt = resolver(nodes, clock.clone()).resolve("node-9").await;

        assert_eq!(attempt.outcome, Outcome::NodeGone);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_polls_the_requested_node() {
        let mut nodes = MockNodeSource::new();
        nodes
            .expect_get_node()
            .withf(|name| name == "node-42")
            .times(1)
            .returning(|name| Ok(Some(with_ip(name, "1.2.3.4"))));

        let clock = Arc::new(ManualClock::new());
        let attempt = resolver(nodes, clock).resolve("node-42").await;
        assert_eq!(attempt.node_name, "node-42");
    }

    #[tokio::test]
    async fn test_zero_attempt_policy_still_polls_once() {
        let mut nodes = MockNodeSource::new();
        nodes
            .expect_get_node()
            .times(1)
            .returning(|name| Ok(Some(without_ip(name))));

        let clock = Arc::new(ManualClock::new());
        let resolver = AddressResolver::new(
            Arc::new(nodes),
            BackoffPolicy::fixed(0, Duration::from_secs(5)),
            clock,
        );
        assert_eq!(resolver.resolve("node-1").await.outcome, Outcome::TimedOut);
    }
}
