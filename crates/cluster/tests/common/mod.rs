//! Common setup for reconcile integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use replicant_agent::{ClusterSpec, InstanceIndex, MYSQL_PORT, SourceEndpoint};
use replicant_agent_mock::MockAgentFactory;
use replicant_cluster::{
    LogSink, PRIMARY_HOST_KEY, PRIMARY_PASSWORD_KEY, PRIMARY_PORT_KEY, PRIMARY_USER_KEY,
    REPLICATION_PASSWORD_KEY, REPLICATION_USER, ReconcileConfig, Reconciler, SecretData,
    StaticSecrets,
};

/// Password of the in-cluster replication account
pub const REPLICATION_PASSWORD: &str = "repl-password";

/// Name of the replication source secret used by intermediate clusters
pub const SOURCE_SECRET: &str = "replication-source";

pub type MockReconciler = Reconciler<MockAgentFactory, StaticSecrets, LogSink>;

/// Endpoint members use to replicate from member `index`
pub fn member(cluster: &ClusterSpec, index: InstanceIndex) -> SourceEndpoint {
    SourceEndpoint::new(
        cluster.pod_hostname(index),
        MYSQL_PORT,
        REPLICATION_USER,
        REPLICATION_PASSWORD,
    )
}

/// External source intermediate clusters replicate from
pub fn upstream() -> SourceEndpoint {
    SourceEndpoint::new("upstream.example.com", 3307, "root", "upstream-password")
}

/// Secrets holding the cluster's credentials, plus the upstream source
/// when the cluster declares one
pub fn secrets_for(cluster: &ClusterSpec) -> StaticSecrets {
    let mut secrets = StaticSecrets::new();
    secrets.insert(
        cluster.namespace.clone(),
        cluster.credentials_secret.clone(),
        SecretData::from([(
            REPLICATION_PASSWORD_KEY.to_string(),
            REPLICATION_PASSWORD.to_string(),
        )]),
    );

    if let Some(name) = &cluster.replication_source_secret {
        let source = upstream();
        secrets.insert(
            cluster.namespace.clone(),
            name.clone(),
            SecretData::from([
                (PRIMARY_HOST_KEY.to_string(), source.host),
                (PRIMARY_PORT_KEY.to_string(), source.port.to_string()),
                (PRIMARY_USER_KEY.to_string(), source.user),
                (PRIMARY_PASSWORD_KEY.to_string(), source.password),
            ]),
        );
    }

    secrets
}

/// Config with short timeouts for tests
pub fn test_config() -> ReconcileConfig {
    ReconcileConfig {
        pass_timeout: Duration::from_secs(5),
        instance_timeout: Duration::from_secs(1),
        resync_interval: Duration::from_millis(10),
        unreachable_tolerance: 0,
    }
}

pub fn reconciler(factory: &MockAgentFactory, cluster: &ClusterSpec) -> MockReconciler {
    reconciler_with(factory, cluster, test_config())
}

pub fn reconciler_with(
    factory: &MockAgentFactory,
    cluster: &ClusterSpec,
    config: ReconcileConfig,
) -> MockReconciler {
    Reconciler::with_config(
        Arc::new(factory.clone()),
        Arc::new(secrets_for(cluster)),
        Arc::new(LogSink),
        config,
    )
}

/// Indices of instances currently accepting writes
pub fn writable(factory: &MockAgentFactory, cluster: &ClusterSpec) -> Vec<InstanceIndex> {
    cluster
        .indices()
        .filter(|&index| factory.status(index).is_writable())
        .collect()
}
