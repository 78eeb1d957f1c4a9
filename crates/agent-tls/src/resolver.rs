//! Instance address resolution.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use replicant_agent::{ClusterSpec, Error, InstanceIndex};
use tracing::debug;

/// Resolves the current address of a cluster member.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Returns the address of instance `index` in `cluster`.
    async fn resolve(&self, cluster: &ClusterSpec, index: InstanceIndex) -> Result<IpAddr, Error>;
}

/// Resolves instances through DNS using their stable pod hostnames.
#[derive(Clone, Copy, Debug, Default)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, cluster: &ClusterSpec, index: InstanceIndex) -> Result<IpAddr, Error> {
        let host = cluster.pod_hostname(index);
        let mut addrs = tokio::net::lookup_host((host.as_str(), 0))
            .await
            .map_err(|e| Error::Resolution {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        let addr = addrs.next().ok_or_else(|| Error::Resolution {
            host: host.clone(),
            reason: "no addresses returned".to_string(),
        })?;
        debug!("resolved {} to {}", host, addr.ip());

        Ok(addr.ip())
    }
}

/// Resolves instances from a fixed hostname table.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    addrs: HashMap<String, IpAddr>,
}

impl StaticResolver {
    /// Creates a resolver over `addrs`, keyed by pod hostname.
    #[must_use]
    pub const fn new(addrs: HashMap<String, IpAddr>) -> Self {
        Self { addrs }
    }

    /// Adds or replaces the address of `hostname`.
    pub fn insert(&mut self, hostname: impl Into<String>, addr: IpAddr) {
        self.addrs.insert(hostname.into(), addr);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, cluster: &ClusterSpec, index: InstanceIndex) -> Result<IpAddr, Error> {
        let host = cluster.pod_hostname(index);
        self.addrs
            .get(&host)
            .copied()
            .ok_or_else(|| Error::Resolution {
                host,
                reason: "no static address".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_static_resolver() {
        let spec = ClusterSpec::new("foo", "trio", 3);
        let mut resolver = StaticResolver::default();
        resolver.insert(spec.pod_hostname(1), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));

        assert_eq!(
            resolver.resolve(&spec, 1).await.unwrap(),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))
        );
        assert_matches!(
            resolver.resolve(&spec, 0).await,
            Err(Error::Resolution { host, .. }) if host == spec.pod_hostname(0)
        );
    }
}
