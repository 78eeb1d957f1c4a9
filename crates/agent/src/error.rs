//! Error types for agent operations

use std::fmt;
use std::time::Duration;

use thiserror::Error as ThisError;

use crate::errno;

/// Agent-related errors
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// The instance's address could not be resolved
    #[error("failed to resolve {host}: {reason}")]
    Resolution {
        /// Hostname that was being resolved
        host: String,
        /// Why resolution failed
        reason: String,
    },

    /// The agent could not be dialed, or the TLS handshake failed
    #[error("failed to connect to agent at {addr}: {reason}")]
    Connection {
        /// Address that was dialed
        addr: String,
        /// Why the connection failed
        reason: String,
    },

    /// The agent was reached but the call failed
    #[error("agent call {method} failed: {reason}")]
    Rpc {
        /// Name of the failed call
        method: &'static str,
        /// MySQL error number reported by the agent, if any
        errno: Option<u32>,
        /// Error message reported by the agent
        reason: String,
    },

    /// The call did not complete in time
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Connection { .. } | Self::Timeout(_) => ErrorKind::Connection,
            Self::Rpc { .. } => ErrorKind::Rpc,
        }
    }

    /// Whether retrying on a later pass may succeed.
    ///
    /// Only agent calls failing with a divergence or binlog-gap errno are
    /// permanent.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Rpc {
                errno: Some(errno), ..
            } => errno::is_retryable(*errno),
            _ => true,
        }
    }
}

/// The kind of agent error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Address lookup failed
    Resolution,

    /// Dial, TLS or transport failure
    Connection,

    /// Agent reachable but the call failed
    Rpc,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
