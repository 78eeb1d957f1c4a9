//! Capability interface to the per-instance replication agent.
//!
//! This crate provides:
//! - The `AgentConnection` / `AgentFactory` traits implemented by the TLS
//!   client and the in-memory mock
//! - Observed instance state (`InstanceStatus`, `ReplicaStatus`)
//! - The cluster declaration and its stable instance hostnames
//! - Agent error types and MySQL errno classification
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod cluster;
pub mod errno;
mod error;
mod message;
mod status;

pub use cluster::{AGENT_PORT, ClusterSpec, InstanceIndex, MYSQL_PORT};
pub use error::{Error, ErrorKind};
pub use message::{Request, Response, SourceEndpoint};
pub use status::{InstanceStatus, ReplicaStatus, ThreadState};

use async_trait::async_trait;

/// An open channel to one instance's agent.
///
/// A connection is bound to a single (cluster, index) pair and is owned
/// exclusively by the call that created it. Dropping it releases the
/// underlying transport; `close` does the same but reports failures.
#[async_trait]
pub trait AgentConnection: Send + Sync + 'static {
    /// Reads the instance's current replication and configuration state.
    async fn get_status(&self) -> Result<InstanceStatus, Error>;

    /// Points the instance's replication channel at `source`.
    ///
    /// Agents reject this while replication threads are running.
    async fn change_replication_source(&self, source: &SourceEndpoint) -> Result<(), Error>;

    /// Starts the replication IO and SQL threads.
    async fn start_replication(&self) -> Result<(), Error>;

    /// Stops the replication IO and SQL threads.
    async fn stop_replication(&self) -> Result<(), Error>;

    /// Sets or clears the global read-only flag.
    async fn set_read_only(&self, read_only: bool) -> Result<(), Error>;

    /// Replaces the instance's data with a copy taken from `donor`.
    async fn clone_from(&self, donor: &SourceEndpoint) -> Result<(), Error>;

    /// Releases the connection.
    async fn close(&self) -> Result<(), Error>;
}

/// Creates `AgentConnection`s for cluster members.
///
/// Factories keep no per-call state and may be used concurrently.
#[async_trait]
pub trait AgentFactory: Send + Sync + 'static {
    /// The connection type produced by this factory.
    type Connection: AgentConnection;

    /// Opens a connection to the agent of instance `index` in `cluster`.
    async fn connect(
        &self,
        cluster: &ClusterSpec,
        index: InstanceIndex,
    ) -> Result<Self::Connection, Error>;
}
