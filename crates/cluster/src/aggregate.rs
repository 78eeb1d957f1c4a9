//! Reduction of per-instance observations to one cluster judgment.

use std::cmp::Reverse;
use std::fmt;

use replicant_agent::{ClusterSpec, InstanceIndex, InstanceStatus, MYSQL_PORT, SourceEndpoint};
use serde::Serialize;
use tracing::warn;

use crate::collector::Observation;
use crate::fault::ReplicationFault;

/// Role of one instance, derived from its observation alone.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum InstanceRole {
    /// No status could be obtained.
    Unreachable,
    /// Read-only with both replication threads running error-free.
    ReplicaHealthy,
    /// Read-only but not replicating cleanly, or not replicating at all.
    ReplicaBroken,
    /// Accepts writes.
    PrimaryCandidate,
}

/// Why a cluster is not healthy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum DegradedReason {
    /// No instance acts as primary.
    NoPrimary,
    /// More than one instance accepts writes.
    MultiplePrimaries,
    /// A replica is stopped or reporting errors.
    BrokenReplicas,
    /// A healthy replica follows something other than the primary.
    MisdirectedReplicas,
    /// More instances are unreachable than tolerated.
    UnreachableInstances,
    /// No instance answered.
    AllUnreachable,
    /// The primary does not follow the declared external source.
    SourceDrift,
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Overall cluster health.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Health {
    /// Exactly one primary, every reachable replica following it.
    Healthy,
    /// Anything else.
    Degraded(DegradedReason),
}

/// Topology anomaly needing a corrective plan.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Anomaly {
    /// Several instances accept writes.
    SplitBrain {
        /// Writable instances, in index order.
        writable: Vec<InstanceIndex>,
    },
    /// Instances answered but none acts as primary.
    PrimaryLost,
}

/// Tunables for health evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct HealthPolicy {
    /// Unreachable instances tolerated before the cluster is degraded.
    pub unreachable_tolerance: usize,
}

/// One instance's observation with its derived role.
#[derive(Clone, Debug)]
pub struct ObservedInstance {
    /// Instance position.
    pub index: InstanceIndex,
    /// Derived role.
    pub role: InstanceRole,
    /// Raw observation.
    pub observation: Observation,
}

impl ObservedInstance {
    fn new(index: InstanceIndex, observation: Observation) -> Self {
        let role = match &observation {
            Observation::Unreachable(_) => InstanceRole::Unreachable,
            Observation::Reachable(status) if status.is_writable() => InstanceRole::PrimaryCandidate,
            Observation::Reachable(status)
                if status.replica.as_ref().is_some_and(|replica| replica.is_running()) =>
            {
                InstanceRole::ReplicaHealthy
            }
            Observation::Reachable(_) => InstanceRole::ReplicaBroken,
        };

        Self {
            index,
            role,
            observation,
        }
    }

    /// Reported status, if reachable.
    #[must_use]
    pub const fn status(&self) -> Option<&InstanceStatus> {
        self.observation.status()
    }

    /// Executed position, 0 when unreachable.
    #[must_use]
    pub fn executed_position(&self) -> u64 {
        self.status().map_or(0, |status| status.executed_position)
    }

    /// Replication faults the instance reports, IO thread first.
    #[must_use]
    pub fn faults(&self) -> Vec<ReplicationFault> {
        self.status()
            .and_then(|status| status.replica.as_ref())
            .map(ReplicationFault::all_from_replica)
            .unwrap_or_default()
    }

    /// Whether the instance replicates from `host` on the MySQL port.
    #[must_use]
    pub fn follows(&self, host: &str) -> bool {
        self.status()
            .and_then(|status| status.replica.as_ref())
            .is_some_and(|replica| replica.source_host == host && replica.source_port == MYSQL_PORT)
    }

    /// Whether the instance replicates from a host outside `cluster`.
    fn follows_external(&self, cluster: &ClusterSpec) -> bool {
        self.status()
            .and_then(|status| status.replica.as_ref())
            .is_some_and(|replica| cluster.index_of_hostname(&replica.source_host).is_none())
    }

    /// Whether the instance could take over from a lost primary.
    ///
    /// Healthy replicas qualify, as do read-only replicas whose only fault is
    /// an IO thread unable to reach its source.
    #[must_use]
    pub fn is_failover_candidate(&self) -> bool {
        match self.role {
            InstanceRole::ReplicaHealthy => true,
            InstanceRole::ReplicaBroken => self
                .status()
                .and_then(|status| status.replica.as_ref())
                .is_some_and(|replica| {
                    replica.sql_thread == replicant_agent::ThreadState::Running
                        && replica.last_sql_errno == 0
                        && ReplicationFault::from_replica(replica)
                            .is_some_and(|fault| fault.is_source_unreachable())
                }),
            InstanceRole::Unreachable | InstanceRole::PrimaryCandidate => false,
        }
    }
}

/// Picks the instance holding the most data, preferring lower indices on ties.
pub(crate) fn most_advanced<'a>(
    instances: impl IntoIterator<Item = &'a ObservedInstance>,
) -> Option<&'a ObservedInstance> {
    instances
        .into_iter()
        .min_by_key(|instance| (Reverse(instance.executed_position()), instance.index))
}

/// Cluster-wide judgment built fresh from one round of observations.
#[derive(Clone, Debug)]
pub struct ClusterStatus {
    /// Overall health.
    pub health: Health,
    /// Selected primary, recorded even when degraded.
    pub primary: Option<InstanceIndex>,
    /// Every instance, in index order.
    pub instances: Vec<ObservedInstance>,
    /// Detected anomaly, if any.
    pub anomaly: Option<Anomaly>,
}

impl ClusterStatus {
    /// Whether the cluster is healthy.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self.health, Health::Healthy)
    }

    /// Instance `index`.
    #[must_use]
    pub fn instance(&self, index: InstanceIndex) -> Option<&ObservedInstance> {
        self.instances.get(index)
    }

    /// Instances accepting writes.
    pub fn writable(&self) -> impl Iterator<Item = &ObservedInstance> {
        self.instances
            .iter()
            .filter(|instance| instance.role == InstanceRole::PrimaryCandidate)
    }

    /// Instances that answered.
    pub fn reachable(&self) -> impl Iterator<Item = &ObservedInstance> {
        self.instances
            .iter()
            .filter(|instance| instance.role != InstanceRole::Unreachable)
    }

    /// Number of instances that did not answer.
    #[must_use]
    pub fn unreachable_count(&self) -> usize {
        self.instances.len() - self.reachable().count()
    }

    /// Serializable digest for status reporting.
    #[must_use]
    pub fn summary(&self) -> StatusSummary {
        StatusSummary {
            health: self.health,
            primary: self.primary,
            roles: self.instances.iter().map(|instance| instance.role).collect(),
            anomaly: self.anomaly.clone(),
        }
    }
}

/// Digest of a `ClusterStatus` handed to status reporting.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StatusSummary {
    /// Overall health.
    pub health: Health,
    /// Selected primary.
    pub primary: Option<InstanceIndex>,
    /// Role of each instance, in index order.
    pub roles: Vec<InstanceRole>,
    /// Detected anomaly.
    pub anomaly: Option<Anomaly>,
}

/// Aggregates `observations` (one per instance, in index order) into a
/// cluster judgment.
///
/// With a `declared_source` the cluster is in intermediate mode: its primary
/// is the instance replicating from outside the cluster, or failing that the
/// most advanced writable instance, and it must follow the declared source.
#[must_use]
pub fn aggregate(
    cluster: &ClusterSpec,
    observations: Vec<Observation>,
    declared_source: Option<&SourceEndpoint>,
    policy: HealthPolicy,
) -> ClusterStatus {
    let instances: Vec<_> = observations
        .into_iter()
        .enumerate()
        .map(|(index, observation)| ObservedInstance::new(index, observation))
        .collect();

    let writable: Vec<_> = instances
        .iter()
        .filter(|instance| instance.role == InstanceRole::PrimaryCandidate)
        .collect();

    let primary = if declared_source.is_some() {
        most_advanced(
            instances
                .iter()
                .filter(|instance| instance.follows_external(cluster)),
        )
        .or_else(|| most_advanced(writable.iter().copied()))
    } else {
        most_advanced(writable.iter().copied())
    };
    let primary = primary.map(|instance| instance.index);

    let anomaly = if writable.len() > 1 {
        Some(Anomaly::SplitBrain {
            writable: writable.iter().map(|instance| instance.index).collect(),
        })
    } else if primary.is_none() && instances.iter().any(|i| i.role != InstanceRole::Unreachable) {
        Some(Anomaly::PrimaryLost)
    } else {
        None
    };

    let reason = degraded_reason(
        cluster,
        &instances,
        writable.len(),
        primary,
        declared_source,
        policy,
    );

    let health = reason.map_or(Health::Healthy, Health::Degraded);
    if let Some(reason) = reason {
        warn!("cluster {} degraded: {}", cluster, reason);
    }

    ClusterStatus {
        health,
        primary,
        instances,
        anomaly,
    }
}

fn degraded_reason(
    cluster: &ClusterSpec,
    instances: &[ObservedInstance],
    writable: usize,
    primary: Option<InstanceIndex>,
    declared_source: Option<&SourceEndpoint>,
    policy: HealthPolicy,
) -> Option<DegradedReason> {
    let unreachable = instances
        .iter()
        .filter(|instance| instance.role == InstanceRole::Unreachable)
        .count();

    if unreachable == instances.len() {
        return Some(DegradedReason::AllUnreachable);
    }

    if writable > 1 {
        return Some(DegradedReason::MultiplePrimaries);
    }

    let Some(primary) = primary else {
        return Some(DegradedReason::NoPrimary);
    };

    if let Some(source) = declared_source {
        let follows_source = instances[primary]
            .status()
            .is_some_and(|status| status.is_replicating_from(source));
        if !follows_source {
            return Some(DegradedReason::SourceDrift);
        }
    }

    let mut replicas = instances
        .iter()
        .filter(|instance| instance.index != primary && instance.role != InstanceRole::Unreachable);

    if replicas
        .clone()
        .any(|instance| instance.role != InstanceRole::ReplicaHealthy)
    {
        return Some(DegradedReason::BrokenReplicas);
    }

    let primary_host = cluster.pod_hostname(primary);
    if replicas.any(|instance| !instance.follows(&primary_host)) {
        return Some(DegradedReason::MisdirectedReplicas);
    }

    if unreachable > policy.unreachable_tolerance {
        return Some(DegradedReason::UnreachableInstances);
    }

    None
}
