//! Cluster manifest loading.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use replicant_agent::ClusterSpec;
use replicant_agent_tls::StaticResolver;
use replicant_cluster::{SecretData, StaticSecrets};
use serde::Deserialize;

use crate::Error;

/// One managed cluster with the secrets and addresses it needs.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    /// Declared cluster.
    pub cluster: ClusterSpec,

    /// Secrets in the cluster's namespace, by name.
    #[serde(default)]
    pub secrets: HashMap<String, SecretData>,

    /// Fixed instance addresses by pod hostname; DNS is used when empty.
    #[serde(default)]
    pub addresses: HashMap<String, IpAddr>,
}

impl Manifest {
    /// Reads a JSON manifest from `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::Manifest {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&raw)
    }

    /// Parses a JSON manifest.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let manifest: Self = serde_json::from_str(raw)?;
        if manifest.cluster.replicas == 0 {
            return Err(Error::InvalidManifest(format!(
                "cluster {} declares no instances",
                manifest.cluster
            )));
        }

        Ok(manifest)
    }

    /// Secret store scoped to the cluster's namespace.
    pub fn secrets(&self) -> StaticSecrets {
        let mut secrets = StaticSecrets::new();
        for (name, data) in &self.secrets {
            secrets.insert(self.cluster.namespace.clone(), name.clone(), data.clone());
        }
        secrets
    }

    /// Static resolver over the declared addresses, if any were given.
    pub fn static_resolver(&self) -> Option<StaticResolver> {
        if self.addresses.is_empty() {
            return None;
        }

        Some(StaticResolver::new(self.addresses.clone()))
    }
}
