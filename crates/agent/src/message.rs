//! Wire messages exchanged with agents.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status::InstanceStatus;

/// Where a replication channel (or a clone) pulls data from.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct SourceEndpoint {
    /// Source hostname.
    pub host: String,

    /// Source mysqld port.
    pub port: u16,

    /// Replication account.
    pub user: String,

    /// Replication account password.
    pub password: String,
}

impl SourceEndpoint {
    /// Creates a new endpoint.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
        }
    }
}

// Keep passwords out of logs.
impl fmt::Debug for SourceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// A request to an agent.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Request {
    /// Report the instance status.
    GetStatus,

    /// Point the replication channel at a new source.
    ChangeReplicationSource(SourceEndpoint),

    /// Start replication threads.
    StartReplication,

    /// Stop replication threads.
    StopReplication,

    /// Set the global read-only flag.
    SetReadOnly(bool),

    /// Clone data from a donor.
    Clone(SourceEndpoint),
}

impl Request {
    /// Method name used in logs and errors.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::GetStatus => "GetStatus",
            Self::ChangeReplicationSource(_) => "ChangeReplicationSource",
            Self::StartReplication => "StartReplication",
            Self::StopReplication => "StopReplication",
            Self::SetReadOnly(_) => "SetReadOnly",
            Self::Clone(_) => "Clone",
        }
    }
}

/// The response to a request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Response {
    /// Response to a status request.
    Status(InstanceStatus),

    /// A mutating request completed.
    Done,

    /// The request failed on the agent.
    Failed {
        /// MySQL error number, when the failure came from mysqld.
        errno: Option<u32>,
        /// Error message.
        message: String,
    },
}
