//! Error types for reconcile passes

use std::time::Duration;

use replicant_agent::InstanceIndex;
use thiserror::Error as ThisError;

use crate::fault::ReplicationFault;

/// Reconcile errors
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// Reaching or calling an instance's agent failed
    #[error("instance {index}: {source}")]
    Agent {
        /// Instance the call targeted
        index: InstanceIndex,
        /// Underlying agent error
        #[source]
        source: replicant_agent::Error,
    },

    /// An instance reported a replication thread error
    #[error("instance {index}: {fault}")]
    Replication {
        /// Instance reporting the fault
        index: InstanceIndex,
        /// The reported fault
        fault: ReplicationFault,
    },

    /// An operator completed but the instance did not reach the expected state
    #[error("instance {index} failed verification: {reason}")]
    Verification {
        /// Instance that failed verification
        index: InstanceIndex,
        /// What did not match
        reason: String,
    },

    /// The declared intent could not be read
    #[error(transparent)]
    Secret(#[from] SecretError),

    /// A plan breaks an invariant its execution relies on
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The pass did not finish within its time budget
    #[error("reconcile pass exceeded {0:?}")]
    PassTimeout(Duration),
}

impl Error {
    pub(crate) const fn agent(index: InstanceIndex, source: replicant_agent::Error) -> Self {
        Self::Agent { index, source }
    }

    /// Whether the next pass may succeed without intervention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Agent { source, .. } => source.is_retryable(),
            Self::Replication { fault, .. } => fault.is_retryable(),
            Self::Verification { .. } | Self::PassTimeout(_) => true,
            Self::Secret(_) | Self::InvariantViolation(_) => false,
        }
    }
}

/// Errors reading declared sources and credentials
#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum SecretError {
    /// The secret does not exist
    #[error("secret {namespace}/{name} not found")]
    NotFound {
        /// Namespace searched
        namespace: String,
        /// Secret name
        name: String,
    },

    /// A required key is absent from the secret
    #[error("secret {name} has no {key} key")]
    MissingKey {
        /// Secret name
        name: String,
        /// Missing key
        key: &'static str,
    },

    /// The port value does not parse as a TCP port
    #[error("secret {name} has invalid port {value:?}")]
    InvalidPort {
        /// Secret name
        name: String,
        /// Raw value found
        value: String,
    },
}
