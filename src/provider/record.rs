//! Record naming shared by every provider integration
//!
//! A node's records live under a configured domain suffix such as
//! `scanning.example.com`. DNS APIs want the record name relative to the
//! registrable zone (`example.com`), while PTR values want the full name.
//! Both are derived here so the two integrations can never disagree.

use crate::{Error, Result};

/// Normalized domain suffix with its registrable base domain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainSuffix {
    suffix: String,
    base: String,
}

impl DomainSuffix {
    /// Parse a configured suffix
    ///
    /// The suffix is lower-cased and a single trailing `.` is stripped. Fails
    /// when the suffix has no registrable domain (e.g. `com` or `co.uk`).
    pub fn parse(raw: &str) -> Result<Self> {
        let suffix = raw.to_lowercase();
        let suffix = suffix.strip_suffix('.').unwrap_or(&suffix).to_string();

        if suffix.is_empty() || suffix.starts_with('.') || suffix.contains("..") {
            return Err(Error::InvalidSuffix(raw.to_string()));
        }

        let base = psl::domain_str(&suffix)
            .ok_or_else(|| Error::InvalidSuffix(raw.to_string()))?
            .to_string();

        Ok(Self { suffix, base })
    }

    /// The normalized suffix
    pub fn as_str(&self) -> &str {
        &self.suffix
    }

    /// Registrable base domain (the DNS zone)
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Labels between the node name and the base domain, if any
    ///
    /// `scanning.example.com` yields `Some("scanning")`, `example.com` yields `None`.
    pub fn subdomain(&self) -> Option<&str> {
        if self.suffix == self.base {
            return None;
        }
        self.suffix
            .strip_suffix(&self.base)
            .and_then(|rest| rest.strip_suffix('.'))
    }

    /// Record name for a node under this suffix
    pub fn record_for(&self, node_name: &str) -> RecordName {
        let label = match self.subdomain() {
            Some(sub) => format!("{node_name}.{sub}"),
            None => node_name.to_string(),
        };
        RecordName {
            label,
            zone: self.base.clone(),
        }
    }
}

impl std::fmt::Display for DomainSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.suffix)
    }
}

/// A node's record name, relative to its zone
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordName {
    label: String,
    zone: String,
}

impl RecordName {
    /// Name relative to the zone (what DNS record APIs expect)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Zone the record belongs to
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Fully-qualified name, without a trailing dot
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.label, self.zone)
    }
}

/// Compute the zone-relative record name for `node_name` under `suffix`
pub fn record_name(suffix: &str, node_name: &str) -> Result<String> {
    Ok(DomainSuffix::parse(suffix)?
        .record_for(node_name)
        .label()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdomain_suffix_keeps_subdomain_labels() {
        assert_eq!(
            record_name("scanning.example.com", "node-1").unwrap(),
            "node-1.scanning"
        );
        assert_eq!(
            record_name("a.b.example.com", "node-1").unwrap(),
            "node-1.a.b"
        );
    }

    #[test]
    fn test_apex_suffix_is_just_the_node_name() {
        assert_eq!(record_name("example.com", "node-3").unwrap(), "node-3");
    }

    #[test]
    fn test_suffix_is_normalized() {
        assert_eq!(
            record_name("Scanning.Example.COM.", "node-1").unwrap(),
            "node-1.scanning"
        );
        assert_eq!(record_name("EXAMPLE.com.", "node-3").unwrap(), "node-3");
    }

    #[test]
    fn test_multi_label_public_suffix() {
        let suffix = DomainSuffix::parse("k8s.example.co.uk").unwrap();
        assert_eq!(suffix.base(), "example.co.uk");
        assert_eq!(suffix.subdomain(), Some("k8s"));
        assert_eq!(suffix.record_for("n").label(), "n.k8s");
    }

    #[test]
    fn test_suffix_without_registrable_domain_is_rejected() {
        assert!(matches!(
            DomainSuffix::parse("com"),
            Err(Error::InvalidSuffix(_))
        ));
        assert!(matches!(
            DomainSuffix::parse("co.uk"),
            Err(Error::InvalidSuffix(_))
        ));
        assert!(DomainSuffix::parse("").is_err());
        assert!(DomainSuffix::parse(".").is_err());
        assert!(DomainSuffix::parse("a..example.com").is_err());
    }

    #[test]
    fn test_fqdn_is_node_name_plus_suffix() {
        let suffix = DomainSuffix::parse("scanning.example.com").unwrap();
        let name = suffix.record_for("node-1");
        assert_eq!(name.zone(), "example.com");
        assert_eq!(name.fqdn(), "node-1.scanning.example.com");

        let apex = DomainSuffix::parse("example.com").unwrap();
        assert_eq!(apex.record_for("node-3").fqdn(), "node-3.example.com");
    }

    #[test]
    fn test_naming_is_deterministic() {
        let first = record_name("scanning.example.com", "node-7").unwrap();
        let second = record_name("scanning.example.com", "node-7").unwrap();
        assert_eq!(first, second);
    }
}
