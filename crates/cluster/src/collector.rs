//! Concurrent per-instance status collection.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use replicant_agent::{AgentConnection, AgentFactory, ClusterSpec, InstanceIndex, InstanceStatus};
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

/// Outcome of querying one instance.
#[derive(Clone, Debug)]
pub enum Observation {
    /// The agent answered.
    Reachable(InstanceStatus),
    /// The agent could not be reached, or the query failed or timed out.
    Unreachable(replicant_agent::Error),
}

impl Observation {
    /// The reported status, if the instance answered.
    #[must_use]
    pub const fn status(&self) -> Option<&InstanceStatus> {
        match self {
            Self::Reachable(status) => Some(status),
            Self::Unreachable(_) => None,
        }
    }
}

/// Queries every instance of a cluster concurrently.
#[derive(Debug)]
pub struct StatusCollector<F>
where
    F: AgentFactory,
{
    factory: Arc<F>,
    instance_timeout: Duration,
}

impl<F> StatusCollector<F>
where
    F: AgentFactory,
{
    /// Creates a collector bounding each query by `instance_timeout`.
    pub const fn new(factory: Arc<F>, instance_timeout: Duration) -> Self {
        Self {
            factory,
            instance_timeout,
        }
    }

    /// Collects one observation per instance, in index order.
    ///
    /// Each query gets its own connection and finishes by `deadline` at the
    /// latest. A failed query yields `Observation::Unreachable` at its index
    /// and never affects the others.
    pub async fn collect(&self, cluster: &ClusterSpec, deadline: Instant) -> Vec<Observation> {
        join_all(
            cluster
                .indices()
                .map(|index| self.observe(cluster, index, deadline)),
        )
        .await
    }

    async fn observe(
        &self,
        cluster: &ClusterSpec,
        index: InstanceIndex,
        deadline: Instant,
    ) -> Observation {
        let budget = self
            .instance_timeout
            .min(deadline.saturating_duration_since(Instant::now()));

        let result = match timeout(budget, self.query(cluster, index)).await {
            Ok(result) => result,
            Err(_) => Err(replicant_agent::Error::Timeout(budget)),
        };

        match result {
            Ok(status) => {
                debug!(
                    "instance {} of {}: read_only={} position={}",
                    index, cluster, status.read_only, status.executed_position
                );
                Observation::Reachable(status)
            }
            Err(e) => {
                warn!(
                    "instance {} of {} unreachable ({}): {}",
                    index,
                    cluster,
                    e.kind(),
                    e
                );
                Observation::Unreachable(e)
            }
        }
    }

    async fn query(
        &self,
        cluster: &ClusterSpec,
        index: InstanceIndex,
    ) -> Result<InstanceStatus, replicant_agent::Error> {
        let connection = self.factory.connect(cluster, index).await?;
        let status = connection.get_status().await;

        if let Err(e) = connection.close().await {
            debug!("closing connection to instance {} failed: {}", index, e);
        }

        status
    }
}
