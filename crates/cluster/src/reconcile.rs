//! Reconcile passes and their periodic driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use replicant_agent::{AgentFactory, ClusterSpec};
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregate::{ClusterStatus, HealthPolicy, aggregate};
use crate::collector::StatusCollector;
use crate::decision::{Plan, Verdict, decide};
use crate::error::Error;
use crate::secrets::{Intent, SecretSource};

/// Default bound on a whole pass
const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on one instance's status query
const DEFAULT_INSTANCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between passes
const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(15);

/// Configuration for the reconciler
#[derive(Clone, Copy, Debug)]
pub struct ReconcileConfig {
    /// Bound on a whole pass, collection and execution included
    pub pass_timeout: Duration,
    /// Bound on one instance's status query
    pub instance_timeout: Duration,
    /// Interval between passes when run periodically
    pub resync_interval: Duration,
    /// Unreachable instances tolerated before the cluster is degraded
    pub unreachable_tolerance: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pass_timeout: DEFAULT_PASS_TIMEOUT,
            instance_timeout: DEFAULT_INSTANCE_TIMEOUT,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            unreachable_tolerance: 0,
        }
    }
}

/// What one pass observed, planned and did.
#[derive(Clone, Debug)]
pub struct PassReport {
    /// Cluster judgment taken at the start of the pass.
    pub status: ClusterStatus,
    /// Plan derived from it.
    pub plan: Plan,
    /// Phases that completed successfully.
    pub completed_phases: usize,
    /// Errors of the first failing phase, if any.
    pub errors: Vec<Error>,
}

impl PassReport {
    /// Whether every planned phase completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.completed_phases == self.plan.phases.len()
    }
}

/// Receives the outcome of every pass.
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    /// Records `report` for `cluster`.
    async fn publish(&self, cluster: &ClusterSpec, report: &PassReport);
}

/// Status sink writing pass outcomes to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn publish(&self, cluster: &ClusterSpec, report: &PassReport) {
        let summary = report.status.summary();
        match &report.plan.verdict {
            Verdict::Failed(reason) => warn!(
                "cluster {}: {:?}, primary {:?}, failed: {}",
                cluster, summary.health, summary.primary, reason
            ),
            verdict => info!(
                "cluster {}: {:?}, primary {:?}, {}",
                cluster, summary.health, summary.primary, verdict
            ),
        }
    }
}

/// Runs reconcile passes for clusters.
#[derive(Debug)]
pub struct Reconciler<F, S, K>
where
    F: AgentFactory,
    S: SecretSource,
    K: StatusSink,
{
    factory: Arc<F>,
    secrets: Arc<S>,
    sink: Arc<K>,
    config: ReconcileConfig,
}

impl<F, S, K> Reconciler<F, S, K>
where
    F: AgentFactory,
    S: SecretSource,
    K: StatusSink,
{
    /// Creates a reconciler with default configuration.
    pub fn new(factory: Arc<F>, secrets: Arc<S>, sink: Arc<K>) -> Self {
        Self::with_config(factory, secrets, sink, ReconcileConfig::default())
    }

    /// Creates a reconciler with custom configuration.
    pub const fn with_config(
        factory: Arc<F>,
        secrets: Arc<S>,
        sink: Arc<K>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            factory,
            secrets,
            sink,
            config,
        }
    }

    /// Runs one pass: observe, judge, plan, execute.
    ///
    /// Dropping the returned future cancels in-flight agent calls and
    /// releases their connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared intent cannot be read, the plan
    /// breaks an execution invariant, or the pass exceeds its time budget.
    /// Operator failures are reported in the returned `PassReport`.
    #[instrument(skip(self, cluster), fields(cluster = %cluster))]
    pub async fn reconcile(&self, cluster: &ClusterSpec) -> Result<PassReport, Error> {
        let deadline = Instant::now() + self.config.pass_timeout;

        let report = timeout(self.config.pass_timeout, self.pass(cluster, deadline))
            .await
            .map_err(|_| Error::PassTimeout(self.config.pass_timeout))??;

        self.sink.publish(cluster, &report).await;

        Ok(report)
    }

    async fn pass(&self, cluster: &ClusterSpec, deadline: Instant) -> Result<PassReport, Error> {
        let intent = Intent::load(self.secrets.as_ref(), cluster).await?;

        let observations = StatusCollector::new(Arc::clone(&self.factory), self.config.instance_timeout)
            .collect(cluster, deadline)
            .await;

        let policy = HealthPolicy {
            unreachable_tolerance: self.config.unreachable_tolerance,
        };
        let status = aggregate(cluster, observations, intent.declared_source.as_ref(), policy);
        let plan = decide(&status, cluster, &intent);
        plan.check()?;

        let mut report = PassReport {
            status,
            plan,
            completed_phases: 0,
            errors: Vec::new(),
        };

        for phase in &report.plan.phases {
            debug!("running phase {} ({} operators)", phase.label, phase.operators.len());

            let results = join_all(
                phase
                    .operators
                    .iter()
                    .map(|operator| operator.run(self.factory.as_ref(), cluster)),
            )
            .await;

            let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
            if !errors.is_empty() {
                for e in &errors {
                    error!("phase {} failed: {}", phase.label, e);
                }
                report.errors = errors;
                break;
            }

            report.completed_phases += 1;
        }

        Ok(report)
    }

    /// Reconciles `cluster` every resync interval until `token` is cancelled.
    ///
    /// A failed pass is logged and retried on the next tick.
    pub async fn run_until_cancelled(&self, cluster: &ClusterSpec, token: CancellationToken) {
        info!(
            "reconciling {} every {:?}",
            cluster, self.config.resync_interval
        );

        let mut ticker = tokio::time::interval(self.config.resync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = token.cancelled() => break,
            }

            // Cancellation also interrupts a pass in flight.
            tokio::select! {
                result = self.reconcile(cluster) => {
                    if let Err(e) = result {
                        error!("reconcile pass for {} failed: {}", cluster, e);
                    }
                }
                () = token.cancelled() => break,
            }
        }

        info!("reconciler for {} shutting down", cluster);
    }
}
