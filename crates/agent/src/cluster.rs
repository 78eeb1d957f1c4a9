//! Cluster declaration and instance naming.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Port the agent sidecar listens on.
pub const AGENT_PORT: u16 = 9080;

/// Port mysqld listens on for replication traffic.
pub const MYSQL_PORT: u16 = 3306;

const RESOURCE_PREFIX: &str = "replicant";

/// Position of an instance within its cluster.
pub type InstanceIndex = usize;

/// Declared configuration of one replicated cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Namespace the cluster lives in.
    pub namespace: String,

    /// Cluster name, unique within the namespace.
    pub name: String,

    /// Number of instances.
    pub replicas: usize,

    /// Secret holding the external replication source. When set, the
    /// cluster's primary is itself a replica of that source.
    #[serde(default)]
    pub replication_source_secret: Option<String>,

    /// Secret holding the password of the replication account.
    pub credentials_secret: String,
}

impl ClusterSpec {
    /// Creates a spec with the default credentials secret and no external source.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, replicas: usize) -> Self {
        let name = name.into();
        Self {
            namespace: namespace.into(),
            credentials_secret: format!("{RESOURCE_PREFIX}-{name}-credentials"),
            name,
            replicas,
            replication_source_secret: None,
        }
    }

    /// Returns a copy of this spec replicating from the source in `secret`.
    #[must_use]
    pub fn with_replication_source(mut self, secret: impl Into<String>) -> Self {
        self.replication_source_secret = Some(secret.into());
        self
    }

    /// Whether the cluster replicates from an external source.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.replication_source_secret.is_some()
    }

    /// All instance indices, in order.
    #[must_use]
    pub const fn indices(&self) -> Range<InstanceIndex> {
        0..self.replicas
    }

    /// Name shared by the cluster's generated resources.
    #[must_use]
    pub fn prefixed_name(&self) -> String {
        format!("{RESOURCE_PREFIX}-{}", self.name)
    }

    /// Pod name of instance `index`.
    #[must_use]
    pub fn pod_name(&self, index: InstanceIndex) -> String {
        format!("{}-{index}", self.prefixed_name())
    }

    /// Stable DNS name of instance `index`; survives pod IP changes.
    #[must_use]
    pub fn pod_hostname(&self, index: InstanceIndex) -> String {
        format!(
            "{}.{}.{}.svc",
            self.pod_name(index),
            self.prefixed_name(),
            self.namespace
        )
    }

    /// Maps a hostname back to the member it names, if any.
    #[must_use]
    pub fn index_of_hostname(&self, host: &str) -> Option<InstanceIndex> {
        self.indices().find(|&index| self.pod_hostname(index) == host)
    }
}

impl fmt::Display for ClusterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_hostname() {
        let spec = ClusterSpec::new("foo", "single", 3);

        assert_eq!(spec.pod_name(2), "replicant-single-2");
        assert_eq!(
            spec.pod_hostname(0),
            "replicant-single-0.replicant-single.foo.svc"
        );
        assert_eq!(spec.credentials_secret, "replicant-single-credentials");
    }

    #[test]
    fn test_index_of_hostname() {
        let spec = ClusterSpec::new("foo", "trio", 3);

        assert_eq!(spec.index_of_hostname(&spec.pod_hostname(1)), Some(1));
        assert_eq!(spec.index_of_hostname("db.example.com"), None);
        // Index 3 is outside the declared instance count.
        assert_eq!(
            spec.index_of_hostname("replicant-trio-3.replicant-trio.foo.svc"),
            None
        );
    }

    #[test]
    fn test_intermediate_mode() {
        let spec = ClusterSpec::new("foo", "single", 1);
        assert!(!spec.is_intermediate());

        let spec = spec.with_replication_source("replication-source");
        assert!(spec.is_intermediate());
        assert_eq!(spec.to_string(), "foo/single");
    }
}
