//! MySQL error numbers reported by replication threads and agent calls.

/// Can't connect to the source host.
pub const CR_CONN_HOST_ERROR: u32 = 2003;

/// Unknown source host.
pub const CR_UNKNOWN_HOST: u32 = 2005;

/// Lost connection to the source during a query.
pub const CR_SERVER_LOST: u32 = 2013;

/// TLS handshake with the source failed.
pub const CR_SSL_CONNECTION_ERROR: u32 = 2026;

/// Replication account rejected by the source.
pub const ER_ACCESS_DENIED_ERROR: u32 = 1045;

/// Operation requires replication threads to be stopped.
pub const ER_REPLICA_MUST_STOP: u32 = 1198;

/// Instance has no replication source configured.
pub const ER_BAD_REPLICA: u32 = 1200;

/// Source purged binary logs the replica still needs (legacy number).
pub const ER_MASTER_FATAL_ERROR_READING_BINLOG: u32 = 1236;

/// Source purged binary logs the replica still needs.
pub const ER_SOURCE_FATAL_ERROR_READING_BINLOG: u32 = 13114;

/// Row to update or delete is missing on the replica.
pub const ER_KEY_NOT_FOUND: u32 = 1032;

/// Replicated insert collides with an existing row.
pub const ER_DUP_ENTRY: u32 = 1062;

/// Clone donor rejected the request.
pub const ER_CLONE_DONOR: u32 = 3862;

/// Whether `errno` means the source could not be reached.
#[must_use]
pub const fn is_source_unreachable(errno: u32) -> bool {
    matches!(
        errno,
        CR_CONN_HOST_ERROR | CR_UNKNOWN_HOST | CR_SERVER_LOST | CR_SSL_CONNECTION_ERROR
    )
}

/// Whether the replica can no longer catch up from the source's binary logs.
#[must_use]
pub const fn is_binlog_gap(errno: u32) -> bool {
    matches!(
        errno,
        ER_MASTER_FATAL_ERROR_READING_BINLOG | ER_SOURCE_FATAL_ERROR_READING_BINLOG
    )
}

/// Whether the replica's data no longer matches the source's.
#[must_use]
pub const fn is_divergence(errno: u32) -> bool {
    matches!(errno, ER_KEY_NOT_FOUND | ER_DUP_ENTRY)
}

/// Whether a condition reported as `errno` may clear on a later attempt.
///
/// Binlog gaps need re-provisioning and divergence needs an operator; any
/// other error is worth retrying on the next pass.
#[must_use]
pub const fn is_retryable(errno: u32) -> bool {
    !is_binlog_gap(errno) && !is_divergence(errno)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(is_retryable(CR_CONN_HOST_ERROR));
        assert!(is_retryable(ER_ACCESS_DENIED_ERROR));
        assert!(!is_retryable(ER_SOURCE_FATAL_ERROR_READING_BINLOG));
        assert!(!is_retryable(ER_DUP_ENTRY));

        assert!(is_source_unreachable(CR_UNKNOWN_HOST));
        assert!(!is_source_unreachable(ER_ACCESS_DENIED_ERROR));
        assert!(is_binlog_gap(ER_MASTER_FATAL_ERROR_READING_BINLOG));
    }
}
