//! Replication thread errors as reported by instances.

use std::fmt;

use replicant_agent::{ReplicaStatus, errno};
use thiserror::Error as ThisError;

/// Replication thread that reported an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadKind {
    /// Receives events from the source.
    Io,
    /// Applies received events.
    Sql,
}

impl fmt::Display for ThreadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "IO"),
            Self::Sql => write!(f, "SQL"),
        }
    }
}

/// A replication error reported verbatim by an instance.
#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("{thread} thread error {errno}: {message}")]
pub struct ReplicationFault {
    /// Thread reporting the error.
    pub thread: ThreadKind,
    /// MySQL error number.
    pub errno: u32,
    /// MySQL error message.
    pub message: String,
}

impl ReplicationFault {
    /// The fault `replica` reports, if any; IO errors take precedence.
    #[must_use]
    pub fn from_replica(replica: &ReplicaStatus) -> Option<Self> {
        Self::all_from_replica(replica).into_iter().next()
    }

    /// Every fault `replica` reports, IO thread first.
    #[must_use]
    pub fn all_from_replica(replica: &ReplicaStatus) -> Vec<Self> {
        let mut faults = Vec::new();

        if replica.last_io_errno != 0 {
            faults.push(Self {
                thread: ThreadKind::Io,
                errno: replica.last_io_errno,
                message: replica.last_io_error.clone(),
            });
        }

        if replica.last_sql_errno != 0 {
            faults.push(Self {
                thread: ThreadKind::Sql,
                errno: replica.last_sql_errno,
                message: replica.last_sql_error.clone(),
            });
        }

        faults
    }

    /// Whether the fault may clear on its own or after reconfiguration.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        errno::is_retryable(self.errno)
    }

    /// Whether the replica needs re-provisioning from a donor.
    #[must_use]
    pub const fn is_binlog_gap(&self) -> bool {
        errno::is_binlog_gap(self.errno)
    }

    /// Whether the IO thread lost its source.
    #[must_use]
    pub const fn is_source_unreachable(&self) -> bool {
        matches!(self.thread, ThreadKind::Io) && errno::is_source_unreachable(self.errno)
    }
}
