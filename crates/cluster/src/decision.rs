//! Failover and repair planning.

use std::collections::HashSet;
use std::fmt;

use replicant_agent::{ClusterSpec, InstanceIndex};
use tracing::{info, warn};

use crate::aggregate::{ClusterStatus, InstanceRole, ObservedInstance, most_advanced};
use crate::error::Error;
use crate::fault::ReplicationFault;
use crate::operator::{Action, Operator};
use crate::secrets::Intent;

/// Operators that may run concurrently; each targets a different instance.
#[derive(Clone, Debug)]
pub struct Phase {
    /// Short description for logs.
    pub label: &'static str,
    /// Operators in this phase.
    pub operators: Vec<Operator>,
}

/// Outcome of planning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Nothing to change.
    Steady,
    /// The plan holds corrective operators.
    Act,
    /// No safe correction exists; re-evaluated every pass until resolved.
    Failed(String),
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Steady => write!(f, "steady"),
            Self::Act => write!(f, "act"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Ordered phases plus the verdict that produced them.
///
/// Phases run strictly in order, and a failing phase stops the rest.
#[derive(Clone, Debug)]
pub struct Plan {
    /// Phases in execution order.
    pub phases: Vec<Phase>,
    /// Planning outcome.
    pub verdict: Verdict,
    /// Faults no operator can repair.
    pub needs_intervention: Vec<(InstanceIndex, ReplicationFault)>,
}

impl Plan {
    fn steady() -> Self {
        Self {
            phases: Vec::new(),
            verdict: Verdict::Steady,
            needs_intervention: Vec::new(),
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            phases: Vec::new(),
            verdict: Verdict::Failed(reason.into()),
            needs_intervention: Vec::new(),
        }
    }

    fn push(&mut self, label: &'static str, operators: Vec<Operator>) {
        if !operators.is_empty() {
            self.phases.push(Phase { label, operators });
        }
    }

    /// Every operator, in execution order.
    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.phases.iter().flat_map(|phase| phase.operators.iter())
    }

    /// Checks the invariants execution relies on: no phase targets an
    /// instance twice, and at most one instance is made writable.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvariantViolation` describing the first breach.
    pub fn check(&self) -> Result<(), Error> {
        for phase in &self.phases {
            let mut targets = HashSet::new();
            if let Some(operator) = phase
                .operators
                .iter()
                .find(|operator| !targets.insert(operator.index))
            {
                return Err(Error::InvariantViolation(format!(
                    "phase {} targets instance {} more than once",
                    phase.label, operator.index
                )));
            }
        }

        let promoted: Vec<_> = self
            .operators()
            .filter(|operator| matches!(operator.action, Action::SetWritable))
            .map(|operator| operator.index)
            .collect();
        if promoted.len() > 1 {
            return Err(Error::InvariantViolation(format!(
                "plan makes instances {promoted:?} writable"
            )));
        }

        Ok(())
    }

    fn settle(mut self) -> Self {
        self.verdict = match self.needs_intervention.first() {
            _ if !self.phases.is_empty() => Verdict::Act,
            Some((index, fault)) => {
                Verdict::Failed(format!("instance {index} needs intervention: {fault}"))
            }
            None => Verdict::Steady,
        };
        self
    }
}

/// Decides what, if anything, to change.
///
/// Split-brain is handled first and alone: every writable instance but the
/// most advanced one is demoted, and repair waits for the next pass to see
/// the demoted instances' fresh state. Without a primary, the most advanced
/// failover candidate is promoted; no candidate means `Verdict::Failed`.
/// Members not healthily following the primary, old or newly promoted, are
/// reconfigured to follow it, re-provisioned by clone first when binlogs are
/// gone, or listed as needing intervention when their data diverged.
#[must_use]
pub fn decide(status: &ClusterStatus, cluster: &ClusterSpec, intent: &Intent) -> Plan {
    let writable: Vec<_> = status.writable().collect();

    if writable.len() > 1 {
        return demote_all_but_survivor(&writable);
    }

    if status.reachable().next().is_none() {
        return Plan::failed("no instance is reachable");
    }

    match status.primary {
        None => fail_over(status, cluster, intent),
        Some(primary) => repair(status, cluster, intent, primary),
    }
}

fn demote_all_but_survivor(writable: &[&ObservedInstance]) -> Plan {
    let Some(survivor) = most_advanced(writable.iter().copied()) else {
        return Plan::steady();
    };

    let demotions: Vec<_> = writable
        .iter()
        .filter(|instance| instance.index != survivor.index)
        .map(|instance| Operator::new(instance.index, Action::SetReadOnly))
        .collect();

    warn!(
        "split brain: keeping instance {} writable, demoting {:?}",
        survivor.index,
        demotions.iter().map(|op| op.index).collect::<Vec<_>>()
    );

    let mut plan = Plan::steady();
    plan.push("demote", demotions);
    plan.settle()
}

fn fail_over(status: &ClusterStatus, cluster: &ClusterSpec, intent: &Intent) -> Plan {
    let Some(target) = most_advanced(
        status
            .instances
            .iter()
            .filter(|instance| instance.is_failover_candidate()),
    ) else {
        return Plan::failed("no replica is eligible for promotion");
    };

    info!(
        "cluster {} has no primary, promoting instance {}",
        cluster, target.index
    );

    let mut plan = Plan::steady();
    if let Some(source) = &intent.declared_source {
        plan.push(
            "promote",
            vec![Operator::new(
                target.index,
                Action::ConfigureIntermediatePrimary {
                    source: source.clone(),
                },
            )],
        );
    } else {
        plan.push(
            "stop-replication",
            vec![Operator::new(target.index, Action::StopReplication)],
        );
        plan.push(
            "promote",
            vec![Operator::new(target.index, Action::SetWritable)],
        );
    }

    let followers = followers(status, cluster, intent, target, &mut plan);
    plan.push("reprovision", followers.clones);
    plan.push("repoint", followers.replicas);

    plan.settle()
}

fn repair(
    status: &ClusterStatus,
    cluster: &ClusterSpec,
    intent: &Intent,
    primary: InstanceIndex,
) -> Plan {
    let mut plan = Plan::steady();
    let Some(primary) = status.instance(primary) else {
        return plan;
    };

    // The primary's upstream fix never gates in-cluster repair.
    let source = intent.declared_source.as_ref().and_then(|source| {
        primary
            .status()
            .is_some_and(|observed| !observed.is_replicating_from(source))
            .then(|| {
                Operator::new(
                    primary.index,
                    Action::ConfigureIntermediatePrimary {
                        source: source.clone(),
                    },
                )
            })
    });

    let mut followers = followers(status, cluster, intent, primary, &mut plan);
    if let Some(operator) = source {
        match [&mut followers.clones, &mut followers.replicas]
            .into_iter()
            .find(|operators| !operators.is_empty())
        {
            Some(operators) => operators.insert(0, operator),
            None => plan.push("source", vec![operator]),
        }
    }

    plan.push("reprovision", followers.clones);
    plan.push("replicate", followers.replicas);
    plan.settle()
}

/// Operators bringing reachable members back behind a primary.
struct Followers {
    /// Re-provisioning clones, run before `replicas`.
    clones: Vec<Operator>,
    /// Replication reconfigurations.
    replicas: Vec<Operator>,
}

/// How a member that does not healthily follow the primary is handled.
enum Remedy {
    Intervene(ReplicationFault),
    Reprovision,
    Reconfigure,
}

impl Remedy {
    /// Divergence outranks a binlog gap, which outranks any retryable fault.
    fn for_instance(instance: &ObservedInstance) -> Self {
        let faults = instance.faults();

        if let Some(fault) = faults
            .iter()
            .find(|fault| !fault.is_retryable() && !fault.is_binlog_gap())
        {
            return Self::Intervene(fault.clone());
        }

        if faults.iter().any(ReplicationFault::is_binlog_gap) {
            return Self::Reprovision;
        }

        Self::Reconfigure
    }
}

fn followers(
    status: &ClusterStatus,
    cluster: &ClusterSpec,
    intent: &Intent,
    primary: &ObservedInstance,
    plan: &mut Plan,
) -> Followers {
    let member_source = intent.member_source(cluster, primary.index);
    let mut followers = Followers {
        clones: Vec::new(),
        replicas: Vec::new(),
    };

    for instance in status
        .reachable()
        .filter(|instance| instance.index != primary.index)
    {
        if instance.role == InstanceRole::ReplicaHealthy && instance.follows(&member_source.host) {
            continue;
        }

        match Remedy::for_instance(instance) {
            Remedy::Intervene(fault) => {
                warn!(
                    "instance {} of {} needs intervention: {}",
                    instance.index, cluster, fault
                );
                plan.needs_intervention.push((instance.index, fault));
                continue;
            }
            Remedy::Reprovision => followers.clones.push(Operator::new(
                instance.index,
                Action::Clone {
                    donor: member_source.clone(),
                    expected_position: primary.executed_position(),
                },
            )),
            Remedy::Reconfigure => {}
        }

        followers.replicas.push(Operator::new(
            instance.index,
            Action::ConfigureReplica {
                source: member_source.clone(),
            },
        ));
    }

    followers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{HealthPolicy, aggregate};
    use crate::collector::Observation;
    use assert_matches::assert_matches;
    use replicant_agent::errno::{
        CR_CONN_HOST_ERROR, ER_DUP_ENTRY, ER_SOURCE_FATAL_ERROR_READING_BINLOG,
    };
    use replicant_agent::{
        InstanceStatus, MYSQL_PORT, ReplicaStatus, SourceEndpoint, ThreadState,
    };

    fn writable(position: u64) -> Observation {
        Observation::Reachable(InstanceStatus {
            read_only: false,
            replica: None,
            executed_position: position,
        })
    }

    fn replica(host: &str, position: u64, io_errno: u32, sql_errno: u32) -> Observation {
        Observation::Reachable(InstanceStatus {
            read_only: true,
            replica: Some(ReplicaStatus {
                source_host: host.to_string(),
                source_port: MYSQL_PORT,
                source_user: crate::secrets::REPLICATION_USER.to_string(),
                io_thread: ThreadState::Running,
                sql_thread: if sql_errno == 0 {
                    ThreadState::Running
                } else {
                    ThreadState::Stopped
                },
                last_io_errno: io_errno,
                last_io_error: String::new(),
                last_sql_errno: sql_errno,
                last_sql_error: String::new(),
            }),
            executed_position: position,
        })
    }

    fn plan(cluster: &ClusterSpec, observations: Vec<Observation>, intent: &Intent) -> Plan {
        let status = aggregate(
            cluster,
            observations,
            intent.declared_source.as_ref(),
            HealthPolicy::default(),
        );
        decide(&status, cluster, intent)
    }

    fn actions(plan: &Plan) -> Vec<(&'static str, InstanceIndex)> {
        plan.phases
            .iter()
            .flat_map(|phase| phase.operators.iter().map(|op| (phase.label, op.index)))
            .collect()
    }

    #[test]
    fn test_healthy_cluster_is_steady() {
        let cluster = ClusterSpec::new("foo", "trio", 3);
        let host = cluster.pod_hostname(0);
        let plan = plan(
            &cluster,
            vec![writable(5), replica(&host, 5, 0, 0), replica(&host, 4, 0, 0)],
            &Intent::new(None, "pw"),
        );

        assert_eq!(plan.verdict, Verdict::Steady);
        assert!(plan.phases.is_empty());
    }

    #[test]
    fn test_split_brain_only_demotes() {
        let cluster = ClusterSpec::new("foo", "trio", 3);
        let host = cluster.pod_hostname(0);
        let plan = plan(
            &cluster,
            vec![writable(5), writable(9), replica(&host, 0, 0, ER_DUP_ENTRY)],
            &Intent::new(None, "pw"),
        );

        assert_eq!(plan.verdict, Verdict::Act);
        assert_eq!(actions(&plan), vec![("demote", 0)]);
        assert_matches!(
            plan.operators().next().map(|op| &op.action),
            Some(Action::SetReadOnly)
        );
    }

    #[test]
    fn test_failover_picks_most_advanced_candidate() {
        let cluster = ClusterSpec::new("foo", "trio", 3);
        let host = cluster.pod_hostname(0);
        let plan = plan(
            &cluster,
            vec![
                Observation::Unreachable(replicant_agent::Error::Timeout(
                    std::time::Duration::from_secs(5),
                )),
                replica(&host, 7, CR_CONN_HOST_ERROR, 0),
                replica(&host, 7, CR_CONN_HOST_ERROR, 0),
            ],
            &Intent::new(None, "pw"),
        );

        assert_eq!(
            actions(&plan),
            vec![("stop-replication", 1), ("promote", 1), ("repoint", 2)]
        );
    }

    #[test]
    fn test_no_candidate_fails() {
        let cluster = ClusterSpec::new("foo", "pair", 2);
        let host = cluster.pod_hostname(0);
        let plan = plan(
            &cluster,
            vec![
                replica(&host, 3, ER_SOURCE_FATAL_ERROR_READING_BINLOG, 0),
                Observation::Reachable(InstanceStatus {
                    read_only: true,
                    replica: None,
                    executed_position: 3,
                }),
            ],
            &Intent::new(None, "pw"),
        );

        assert_matches!(plan.verdict, Verdict::Failed(_));
        assert!(plan.phases.is_empty());
    }

    #[test]
    fn test_repair_plan() {
        let cluster = ClusterSpec::new("foo", "quad", 4);
        let host = cluster.pod_hostname(0);
        let plan = plan(
            &cluster,
            vec![
                writable(20),
                replica(&host, 2, ER_SOURCE_FATAL_ERROR_READING_BINLOG, 0),
                replica(&host, 19, 0, ER_DUP_ENTRY),
                replica(&cluster.pod_hostname(1), 18, 0, 0),
            ],
            &Intent::new(None, "pw"),
        );

        assert_eq!(
            actions(&plan),
            vec![("reprovision", 1), ("replicate", 1), ("replicate", 3)]
        );
        assert_eq!(plan.needs_intervention.len(), 1);
        assert_eq!(plan.needs_intervention[0].0, 2);
        assert_matches!(
            &plan.phases[0].operators[0].action,
            Action::Clone { expected_position: 20, .. }
        );
    }

    #[test]
    fn test_intervention_only_fails() {
        let cluster = ClusterSpec::new("foo", "pair", 2);
        let host = cluster.pod_hostname(0);
        let plan = plan(
            &cluster,
            vec![writable(4), replica(&host, 4, 0, ER_DUP_ENTRY)],
            &Intent::new(None, "pw"),
        );

        assert_matches!(plan.verdict, Verdict::Failed(reason) if reason.contains("instance 1"));
    }

    #[test]
    fn test_intermediate_drift() {
        let cluster = ClusterSpec::new("foo", "single", 1).with_replication_source("src");
        let source = SourceEndpoint::new("upstream", MYSQL_PORT, "root", "pw");
        let plan = plan(
            &cluster,
            vec![writable(1)],
            &Intent::new(Some(source), "pw"),
        );

        assert_eq!(actions(&plan), vec![("source", 0)]);
        assert_matches!(
            &plan.phases[0].operators[0].action,
            Action::ConfigureIntermediatePrimary { source } if source.host == "upstream"
        );
    }

    #[test]
    fn test_divergence_outranks_io_fault() {
        let cluster = ClusterSpec::new("foo", "pair", 2);
        let host = cluster.pod_hostname(0);
        let plan = plan(
            &cluster,
            vec![writable(9), replica(&host, 8, CR_CONN_HOST_ERROR, ER_DUP_ENTRY)],
            &Intent::new(None, "pw"),
        );

        assert!(plan.phases.is_empty());
        assert_matches!(plan.verdict, Verdict::Failed(_));
        assert_eq!(plan.needs_intervention.len(), 1);
        assert_eq!(plan.needs_intervention[0].0, 1);
        assert_eq!(plan.needs_intervention[0].1.errno, ER_DUP_ENTRY);
    }

    #[test]
    fn test_failover_classifies_remaining_members() {
        let cluster = ClusterSpec::new("foo", "quad", 4);
        let host = cluster.pod_hostname(0);
        let plan = plan(
            &cluster,
            vec![
                Observation::Unreachable(replicant_agent::Error::Timeout(
                    std::time::Duration::from_secs(5),
                )),
                replica(&host, 9, CR_CONN_HOST_ERROR, 0),
                replica(&host, 8, 0, ER_DUP_ENTRY),
                replica(&host, 3, ER_SOURCE_FATAL_ERROR_READING_BINLOG, 0),
            ],
            &Intent::new(None, "pw"),
        );

        assert_eq!(plan.verdict, Verdict::Act);
        assert_eq!(
            actions(&plan),
            vec![
                ("stop-replication", 1),
                ("promote", 1),
                ("reprovision", 3),
                ("repoint", 3)
            ]
        );
        assert_eq!(plan.needs_intervention.len(), 1);
        assert_eq!(plan.needs_intervention[0].0, 2);
        assert_matches!(
            &plan.phases[2].operators[0].action,
            Action::Clone { donor, expected_position: 9 } if donor.host == cluster.pod_hostname(1)
        );
    }

    #[test]
    fn test_intermediate_source_shares_repair_phase() {
        let cluster = ClusterSpec::new("foo", "trio", 3).with_replication_source("src");
        let source = SourceEndpoint::new("upstream", MYSQL_PORT, "root", "pw");
        let plan = plan(
            &cluster,
            vec![
                writable(5),
                replica(&cluster.pod_hostname(0), 5, 0, 0),
                replica(&cluster.pod_hostname(1), 4, 0, 0),
            ],
            &Intent::new(Some(source), "pw"),
        );

        assert_eq!(actions(&plan), vec![("replicate", 0), ("replicate", 2)]);
        assert_matches!(
            &plan.phases[0].operators[0].action,
            Action::ConfigureIntermediatePrimary { .. }
        );
        assert!(plan.check().is_ok());
    }

    #[test]
    fn test_check_rejects_unsafe_plans() {
        let phase = |label, operators| Phase { label, operators };
        let mut plan = Plan::steady();

        plan.phases = vec![phase(
            "demote",
            vec![
                Operator::new(1, Action::SetReadOnly),
                Operator::new(1, Action::StopReplication),
            ],
        )];
        assert_matches!(plan.check(), Err(Error::InvariantViolation(reason)) if reason.contains("instance 1"));

        plan.phases = vec![
            phase("promote", vec![Operator::new(0, Action::SetWritable)]),
            phase("promote", vec![Operator::new(2, Action::SetWritable)]),
        ];
        assert_matches!(plan.check(), Err(Error::InvariantViolation(_)));

        plan.phases.pop();
        assert!(plan.check().is_ok());
    }
}
