//! Cluster health aggregation and failover engine.
//!
//! A reconcile pass runs in four steps:
//! - `StatusCollector` queries every instance's agent concurrently
//! - `aggregate` reduces the observations to one `ClusterStatus`
//! - `decide` compares that status with the declared intent and emits a `Plan`
//! - `Reconciler` executes the plan phase by phase through idempotent `Operator`s
//!
//! Nothing is cached between passes; every decision is recomputed from a
//! fresh snapshot.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod aggregate;
mod collector;
mod decision;
mod error;
mod fault;
mod operator;
mod reconcile;
mod secrets;

pub use aggregate::{
    Anomaly, ClusterStatus, DegradedReason, Health, HealthPolicy, InstanceRole, ObservedInstance,
    StatusSummary, aggregate,
};
pub use collector::{Observation, StatusCollector};
pub use decision::{Phase, Plan, Verdict, decide};
pub use error::{Error, SecretError};
pub use fault::{ReplicationFault, ThreadKind};
pub use operator::{Action, Operator};
pub use reconcile::{LogSink, PassReport, ReconcileConfig, Reconciler, StatusSink};
pub use secrets::{
    IntermediatePrimaryOptions, Intent, PRIMARY_HOST_KEY, PRIMARY_PASSWORD_KEY, PRIMARY_PORT_KEY,
    PRIMARY_USER_KEY, REPLICATION_PASSWORD_KEY, REPLICATION_USER, SecretData, SecretSource,
    StaticSecrets,
};
