//! Simulated MySQL instance state.

use std::time::Duration;

use replicant_agent::SourceEndpoint;

/// State of one simulated MySQL instance.
#[derive(Clone, Debug)]
pub struct MockInstance {
    /// Whether the agent and the MySQL server accept connections.
    pub reachable: bool,
    /// Server read-only flag.
    pub read_only: bool,
    /// Position of the last executed transaction.
    pub executed_position: u64,
    /// Configured replication source, if any.
    pub source: Option<SourceEndpoint>,
    /// Whether replication threads were started.
    pub replicating: bool,
    /// Injected IO thread failure as `(errno, message)`.
    pub io_fault: Option<(u32, String)>,
    /// Injected SQL thread failure as `(errno, message)`.
    pub sql_fault: Option<(u32, String)>,
    /// When set, every agent call fails at the transport level.
    pub rpc_failure: Option<String>,
    /// Delay applied before each agent call.
    pub latency: Duration,
    pub(crate) mutations: usize,
}

impl MockInstance {
    fn new(read_only: bool, executed_position: u64) -> Self {
        Self {
            reachable: true,
            read_only,
            executed_position,
            source: None,
            replicating: false,
            io_fault: None,
            sql_fault: None,
            rpc_failure: None,
            latency: Duration::ZERO,
            mutations: 0,
        }
    }

    /// A writable instance with no replication configured.
    #[must_use]
    pub fn primary(executed_position: u64) -> Self {
        Self::new(false, executed_position)
    }

    /// A read-only instance with no replication configured.
    #[must_use]
    pub fn replica(executed_position: u64) -> Self {
        Self::new(true, executed_position)
    }

    /// Configures and starts replication from `source`.
    #[must_use]
    pub fn replicating_from(mut self, source: SourceEndpoint) -> Self {
        self.source = Some(source);
        self.replicating = true;
        self
    }

    /// Makes the instance refuse connections.
    #[must_use]
    pub const fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Injects an IO thread error.
    #[must_use]
    pub fn with_io_fault(mut self, errno: u32, message: impl Into<String>) -> Self {
        self.io_fault = Some((errno, message.into()));
        self
    }

    /// Injects an SQL thread error.
    #[must_use]
    pub fn with_sql_fault(mut self, errno: u32, message: impl Into<String>) -> Self {
        self.sql_fault = Some((errno, message.into()));
        self
    }

    /// Delays every agent call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}
