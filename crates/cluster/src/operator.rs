//! Idempotent single-instance topology actions.

use std::fmt;

use replicant_agent::{
    AgentConnection, AgentFactory, ClusterSpec, InstanceIndex, InstanceStatus, SourceEndpoint,
};
use tracing::{debug, info, instrument};

use crate::error::Error;
use crate::fault::ReplicationFault;

/// What an operator does to its target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    /// Make the target a read-only replica of `source`, a cluster member.
    ConfigureReplica {
        /// Member to follow
        source: SourceEndpoint,
    },
    /// Make the target the cluster's primary, replicating from an external source.
    ConfigureIntermediatePrimary {
        /// Declared external source
        source: SourceEndpoint,
    },
    /// Stop accepting writes.
    SetReadOnly,
    /// Start accepting writes.
    SetWritable,
    /// Stop both replication threads.
    StopReplication,
    /// Replace the target's data with a copy of `donor`'s.
    Clone {
        /// Member to copy from
        donor: SourceEndpoint,
        /// Donor position observed when the clone was planned
        expected_position: u64,
    },
}

impl Action {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConfigureReplica { .. } => "configure-replica",
            Self::ConfigureIntermediatePrimary { .. } => "configure-intermediate-primary",
            Self::SetReadOnly => "set-read-only",
            Self::SetWritable => "set-writable",
            Self::StopReplication => "stop-replication",
            Self::Clone { .. } => "clone",
        }
    }
}

/// One topology action against one instance.
///
/// Operators hold no state; running one twice against an instance already
/// in the target state performs no mutation the second time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operator {
    /// Target instance.
    pub index: InstanceIndex,
    /// Action to apply.
    pub action: Action,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on instance {}", self.action.name(), self.index)
    }
}

impl Operator {
    /// Creates an operator.
    #[must_use]
    pub const fn new(index: InstanceIndex, action: Action) -> Self {
        Self { index, action }
    }

    /// Applies the action through a fresh connection and verifies the result.
    ///
    /// Transient failures are returned as-is for the next pass to retry;
    /// nothing is retried here.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent cannot be reached, a call fails, or the
    /// instance does not reach the expected state.
    #[instrument(skip(self, factory, cluster), fields(cluster = %cluster, operator = %self))]
    pub async fn run<F>(&self, factory: &F, cluster: &ClusterSpec) -> Result<(), Error>
    where
        F: AgentFactory + ?Sized,
    {
        let connection = factory
            .connect(cluster, self.index)
            .await
            .map_err(|e| Error::agent(self.index, e))?;

        let result = self.apply(&connection).await;

        if let Err(e) = connection.close().await {
            debug!("closing connection to instance {} failed: {}", self.index, e);
        }

        result
    }

    async fn apply<C>(&self, connection: &C) -> Result<(), Error>
    where
        C: AgentConnection,
    {
        let status = self.status(connection).await?;

        match &self.action {
            Action::ConfigureReplica { source } => {
                self.replicate_from(connection, &status, source, true).await
            }
            Action::ConfigureIntermediatePrimary { source } => {
                self.replicate_from(connection, &status, source, false).await
            }
            Action::SetReadOnly => self.set_read_only(connection, &status, true).await,
            Action::SetWritable => self.set_read_only(connection, &status, false).await,
            Action::StopReplication => self.stop_replication(connection, &status).await,
            Action::Clone {
                donor,
                expected_position,
            } => {
                self.clone_from(connection, &status, donor, *expected_position)
                    .await
            }
        }
    }

    async fn status<C>(&self, connection: &C) -> Result<InstanceStatus, Error>
    where
        C: AgentConnection,
    {
        connection
            .get_status()
            .await
            .map_err(|e| Error::agent(self.index, e))
    }

    async fn replicate_from<C>(
        &self,
        connection: &C,
        status: &InstanceStatus,
        source: &SourceEndpoint,
        check_sql_thread: bool,
    ) -> Result<(), Error>
    where
        C: AgentConnection,
    {
        if status.is_replicating_from(source) {
            debug!("instance {} already replicates from {}", self.index, source.host);
            return Ok(());
        }

        let agent_error = |e| Error::agent(self.index, e);

        if status.is_writable() {
            connection.set_read_only(true).await.map_err(agent_error)?;
        }
        connection.stop_replication().await.map_err(agent_error)?;
        connection
            .change_replication_source(source)
            .await
            .map_err(agent_error)?;
        connection.start_replication().await.map_err(agent_error)?;

        info!(
            "instance {} now replicates from {}:{}",
            self.index, source.host, source.port
        );

        let status = self.status(connection).await?;
        let Some(replica) = status.replica.as_ref() else {
            return Err(self.unverified("replication is not configured"));
        };

        if replica.source_host != source.host {
            return Err(self.unverified(format!(
                "source host is {}, expected {}",
                replica.source_host, source.host
            )));
        }

        match ReplicationFault::from_replica(replica) {
            Some(fault) if check_sql_thread || replica.last_io_errno != 0 => Err(Error::Replication {
                index: self.index,
                fault,
            }),
            _ => Ok(()),
        }
    }

    async fn set_read_only<C>(
        &self,
        connection: &C,
        status: &InstanceStatus,
        read_only: bool,
    ) -> Result<(), Error>
    where
        C: AgentConnection,
    {
        if status.read_only == read_only {
            debug!("instance {} already has read_only={}", self.index, read_only);
            return Ok(());
        }

        connection
            .set_read_only(read_only)
            .await
            .map_err(|e| Error::agent(self.index, e))?;
        info!("instance {} set read_only={}", self.index, read_only);

        if self.status(connection).await?.read_only != read_only {
            return Err(self.unverified(format!("read_only is not {read_only}")));
        }

        Ok(())
    }

    async fn stop_replication<C>(&self, connection: &C, status: &InstanceStatus) -> Result<(), Error>
    where
        C: AgentConnection,
    {
        if status.replica.as_ref().is_none_or(|replica| replica.is_stopped()) {
            debug!("instance {} has no running replication", self.index);
            return Ok(());
        }

        connection
            .stop_replication()
            .await
            .map_err(|e| Error::agent(self.index, e))?;
        info!("instance {} stopped replication", self.index);

        let stopped = self
            .status(connection)
            .await?
            .replica
            .is_none_or(|replica| replica.is_stopped());
        if !stopped {
            return Err(self.unverified("replication threads still running"));
        }

        Ok(())
    }

    async fn clone_from<C>(
        &self,
        connection: &C,
        status: &InstanceStatus,
        donor: &SourceEndpoint,
        expected_position: u64,
    ) -> Result<(), Error>
    where
        C: AgentConnection,
    {
        let faulty = status
            .replica
            .as_ref()
            .and_then(ReplicationFault::from_replica)
            .is_some();
        if status.executed_position >= expected_position && !faulty {
            debug!(
                "instance {} already holds position {}",
                self.index, expected_position
            );
            return Ok(());
        }

        connection
            .clone_from(donor)
            .await
            .map_err(|e| Error::agent(self.index, e))?;
        info!("instance {} cloned from {}", self.index, donor.host);

        let position = self.status(connection).await?.executed_position;
        if position < expected_position {
            return Err(self.unverified(format!(
                "position {position} is behind donor position {expected_position}"
            )));
        }

        Ok(())
    }

    fn unverified(&self, reason: impl Into<String>) -> Error {
        Error::Verification {
            index: self.index,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use replicant_agent::{ErrorKind, MYSQL_PORT};
    use replicant_agent::errno::{ER_CLONE_DONOR, ER_SOURCE_FATAL_ERROR_READING_BINLOG};
    use replicant_agent_mock::{MockAgentFactory, MockInstance};
    use tracing_test::traced_test;

    fn member(cluster: &ClusterSpec, index: InstanceIndex) -> SourceEndpoint {
        SourceEndpoint::new(cluster.pod_hostname(index), MYSQL_PORT, "replicant-repl", "pw")
    }

    #[tokio::test]
    async fn test_configure_replica_is_idempotent() {
        let cluster = ClusterSpec::new("foo", "pair", 2);
        let factory = MockAgentFactory::new(
            &cluster,
            vec![MockInstance::primary(4), MockInstance::primary(1)],
        );
        let operator = Operator::new(
            1,
            Action::ConfigureReplica {
                source: member(&cluster, 0),
            },
        );

        operator.run(&factory, &cluster).await.unwrap();
        let status = factory.status(1);
        assert!(status.is_replicating_from(&member(&cluster, 0)));
        let mutations = factory.mutations(1);

        operator.run(&factory, &cluster).await.unwrap();
        assert_eq!(factory.mutations(1), mutations);
        assert_eq!(factory.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_configure_replica_surfaces_fault() {
        let cluster = ClusterSpec::new("foo", "pair", 2);
        let factory = MockAgentFactory::new(
            &cluster,
            vec![MockInstance::primary(4).unreachable(), MockInstance::replica(1)],
        );
        let operator = Operator::new(
            1,
            Action::ConfigureReplica {
                source: member(&cluster, 0),
            },
        );

        assert_matches!(
            operator.run(&factory, &cluster).await,
            Err(Error::Replication { index: 1, fault }) if fault.is_retryable()
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_set_writable_twice() {
        let cluster = ClusterSpec::new("foo", "single", 1);
        let factory = MockAgentFactory::new(&cluster, vec![MockInstance::replica(0)]);
        let operator = Operator::new(0, Action::SetWritable);

        operator.run(&factory, &cluster).await.unwrap();
        operator.run(&factory, &cluster).await.unwrap();

        assert!(!factory.status(0).read_only);
        assert_eq!(factory.mutations(0), 1);
        assert!(logs_contain("set read_only=false"));
    }

    #[tokio::test]
    async fn test_stop_replication_without_replica() {
        let cluster = ClusterSpec::new("foo", "single", 1);
        let factory = MockAgentFactory::new(&cluster, vec![MockInstance::replica(0)]);

        Operator::new(0, Action::StopReplication)
            .run(&factory, &cluster)
            .await
            .unwrap();
        assert_eq!(factory.mutations(0), 0);
    }

    #[tokio::test]
    async fn test_clone_reprovisions_gap() {
        let cluster = ClusterSpec::new("foo", "pair", 2);
        let factory = MockAgentFactory::new(
            &cluster,
            vec![
                MockInstance::primary(30),
                MockInstance::replica(2)
                    .replicating_from(member(&cluster, 0))
                    .with_io_fault(ER_SOURCE_FATAL_ERROR_READING_BINLOG, "purged"),
            ],
        );
        let operator = Operator::new(
            1,
            Action::Clone {
                donor: member(&cluster, 0),
                expected_position: 30,
            },
        );

        operator.run(&factory, &cluster).await.unwrap();
        assert_eq!(factory.status(1).executed_position, 30);

        let mutations = factory.mutations(1);
        operator.run(&factory, &cluster).await.unwrap();
        assert_eq!(factory.mutations(1), mutations);
    }

    #[tokio::test]
    async fn test_clone_without_donor() {
        let cluster = ClusterSpec::new("foo", "pair", 2);
        let factory = MockAgentFactory::new(
            &cluster,
            vec![MockInstance::primary(30).unreachable(), MockInstance::replica(2)],
        );
        let operator = Operator::new(
            1,
            Action::Clone {
                donor: member(&cluster, 0),
                expected_position: 30,
            },
        );

        assert_matches!(
            operator.run(&factory, &cluster).await,
            Err(Error::Agent {
                index: 1,
                source: replicant_agent::Error::Rpc {
                    errno: Some(ER_CLONE_DONOR),
                    ..
                }
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        let cluster = ClusterSpec::new("foo", "single", 1);
        let factory = MockAgentFactory::new(&cluster, vec![MockInstance::primary(0).unreachable()]);

        let result = Operator::new(0, Action::SetReadOnly)
            .run(&factory, &cluster)
            .await;
        assert_matches!(
            &result,
            Err(Error::Agent { index: 0, source }) if source.kind() == ErrorKind::Connection
        );
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_configure_intermediate_primary_is_idempotent() {
        let cluster = ClusterSpec::new("foo", "single", 1);
        let factory = MockAgentFactory::new(&cluster, vec![MockInstance::primary(3)]);
        let upstream = SourceEndpoint::new("upstream.example.com", 3307, "root", "secret");
        factory.add_external_source(upstream.clone());
        let operator = Operator::new(
            0,
            Action::ConfigureIntermediatePrimary {
                source: upstream.clone(),
            },
        );

        operator.run(&factory, &cluster).await.unwrap();
        let status = factory.status(0);
        assert!(status.read_only);
        assert!(status.is_replicating_from(&upstream));
        let mutations = factory.mutations(0);

        operator.run(&factory, &cluster).await.unwrap();
        assert_eq!(factory.mutations(0), mutations);
        assert_eq!(factory.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable_agent_error() {
        let cluster = ClusterSpec::new("foo", "single", 1);
        let factory = MockAgentFactory::new(&cluster, vec![MockInstance::primary(3)]);
        factory.update(0, |instance| {
            instance.rpc_failure = Some("connection reset by peer".to_string());
        });

        let result = Operator::new(0, Action::SetReadOnly)
            .run(&factory, &cluster)
            .await;
        assert_matches!(
            &result,
            Err(Error::Agent { index: 0, source }) if source.kind() == ErrorKind::Rpc
        );
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(factory.mutations(0), 0);
        assert_eq!(factory.open_connections(), 0);
    }
}
