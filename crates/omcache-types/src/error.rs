//! Error types for the replicated ticket cache.
//!
//! All errors use the `OMC_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Update input errors (reported per item, never abort a batch)
//! - 2xx: Replication log errors
//! - 3xx: Payload codec errors
//! - 4xx: Identity errors
//! - 5xx: Queue errors
//! - 9xx: General / internal errors

use thiserror::Error;

/// Central error enum for all cache operations.
///
/// `Clone` so a single failure can be handed back inside a
/// [`StateResponse`](crate::StateResponse) and kept in logs at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    // =================================================================
    // Update Input Errors (1xx)
    // =================================================================
    /// The update needs a ticket id and none was given.
    #[error("OMC_ERR_100: Missing ticket key")]
    MissingKey,

    /// A ticket creation carried no serialized ticket.
    #[error("OMC_ERR_101: No ticket data")]
    MissingValue,

    /// An assignment update carried no serialized assignment.
    #[error("OMC_ERR_102: Missing assignment")]
    MissingAssignment,

    /// The command is not one of the four known update commands.
    #[error("OMC_ERR_103: Invalid command: {0}")]
    InvalidCommand(String),

    // =================================================================
    // Replication Log Errors (2xx)
    // =================================================================
    /// The log could not be reached.
    #[error("OMC_ERR_200: Replication log unavailable: {0}")]
    LogUnavailable(String),

    /// The batch append was rejected by the log.
    #[error("OMC_ERR_201: Batch write failed: {0}")]
    BatchWriteFailed(String),

    /// The log returned a different number of results than updates sent.
    #[error("OMC_ERR_202: Result count mismatch: sent {sent}, received {received}")]
    ResultCountMismatch { sent: usize, received: usize },

    // =================================================================
    // Payload Codec Errors (3xx)
    // =================================================================
    /// A payload could not be serialized.
    #[error("OMC_ERR_300: Payload encode error: {0}")]
    Encode(String),

    /// A payload could not be deserialized.
    #[error("OMC_ERR_301: Payload decode error: {0}")]
    Decode(String),

    // =================================================================
    // Identity Errors (4xx)
    // =================================================================
    /// The string is not a `<millis>-<seq>` replication id.
    #[error("OMC_ERR_400: Invalid replication id: {0}")]
    InvalidReplId(String),

    // =================================================================
    // Queue Errors (5xx)
    // =================================================================
    /// The cache is shut down; no more requests are accepted.
    #[error("OMC_ERR_500: Update queue closed")]
    QueueClosed,

    /// The inbound request queue is at capacity.
    #[error("OMC_ERR_501: Update queue full")]
    QueueFull,

    /// The outgoing queue dropped the request without answering.
    #[error("OMC_ERR_502: Update response dropped")]
    ResponseDropped,

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("OMC_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Configuration error (invalid sizes, zero durations, etc.).
    #[error("OMC_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
