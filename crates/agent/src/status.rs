//! Observed per-instance state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::SourceEndpoint;

/// State of a replication thread, as in `SHOW REPLICA STATUS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadState {
    /// `Yes`
    Running,
    /// `Connecting`: the IO thread is trying to reach the source.
    Connecting,
    /// `No`
    Stopped,
}

impl ThreadState {
    /// The value MySQL reports for this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Yes",
            Self::Connecting => "Connecting",
            Self::Stopped => "No",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replication channel status of an instance that has a source configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    /// Host the channel replicates from.
    pub source_host: String,
    /// Port the channel replicates from.
    pub source_port: u16,
    /// Account the channel authenticates as.
    pub source_user: String,
    /// IO (receiver) thread state.
    pub io_thread: ThreadState,
    /// SQL (applier) thread state.
    pub sql_thread: ThreadState,
    /// Last IO thread error number, 0 if none.
    pub last_io_errno: u32,
    /// Last IO thread error message.
    pub last_io_error: String,
    /// Last SQL thread error number, 0 if none.
    pub last_sql_errno: u32,
    /// Last SQL thread error message.
    pub last_sql_error: String,
}

impl ReplicaStatus {
    /// Both threads running without errors.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.io_thread == ThreadState::Running
            && self.sql_thread == ThreadState::Running
            && self.last_io_errno == 0
            && self.last_sql_errno == 0
    }

    /// Both threads stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.io_thread == ThreadState::Stopped && self.sql_thread == ThreadState::Stopped
    }

    /// Whether the channel is configured for `source` (host, port and user).
    #[must_use]
    pub fn points_at(&self, source: &SourceEndpoint) -> bool {
        self.source_host == source.host
            && self.source_port == source.port
            && self.source_user == source.user
    }
}

/// Snapshot of one instance, as reported by its agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Global `read_only` flag.
    pub read_only: bool,
    /// Replication channel, if a source is configured.
    pub replica: Option<ReplicaStatus>,
    /// How much of the replication stream the instance has applied.
    pub executed_position: u64,
}

impl InstanceStatus {
    /// Whether the instance accepts writes.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        !self.read_only
    }

    /// Read-only and replicating from `source` without errors.
    #[must_use]
    pub fn is_replicating_from(&self, source: &SourceEndpoint) -> bool {
        self.read_only
            && self
                .replica
                .as_ref()
                .is_some_and(|replica| replica.points_at(source) && replica.is_running())
    }
}
