//! System-wide constants for the replicated ticket cache.

/// Default ticket time-to-live in milliseconds (10 minutes).
pub const DEFAULT_TICKET_TTL_MS: u64 = 600_000;

/// Default extra retention for assignments past the ticket TTL, in milliseconds.
pub const DEFAULT_ASSIGNMENT_ADDITIONAL_TTL_MS: u64 = 600_000;

/// Default time the outgoing queue waits to fill a batch, in milliseconds.
pub const DEFAULT_OUTGOING_WAIT_TIMEOUT_MS: u64 = 100;

/// Default maximum number of updates committed to the log in one batch.
pub const DEFAULT_OUTGOING_MAX_BATCH_SIZE: usize = 5_000;

/// Default capacity of the inbound request channel.
///
/// Must be at least [`DEFAULT_OUTGOING_MAX_BATCH_SIZE`].
pub const DEFAULT_REQUEST_QUEUE_CAPACITY: usize = 10_000;

/// Default maximum number of log entries read in one poll.
pub const DEFAULT_INCOMING_MAX_UPDATES_PER_POLL: usize = 20_000;

/// Default blocking wait for a single poll of the log, in milliseconds.
/// Also the minimum interval between two polls.
pub const DEFAULT_INCOMING_POLL_WAIT_TIMEOUT_MS: u64 = 100;

/// Default sleep between two apply cycles, in milliseconds.
pub const DEFAULT_INCOMING_APPLY_INTERVAL_MS: u64 = 100;

/// Default upper bound on one drain of the ordered channel, in milliseconds.
pub const DEFAULT_APPLY_HOLD_TIMEOUT_MS: u64 = 500;

/// Pattern every log-assigned identity matches.
pub const REPL_ID_PATTERN: &str = r"^\d{13}-\d+$";

/// Name of the replication stream inside the log.
pub const REPLICATION_STREAM: &str = "om-replication";

/// Stream entry field carrying a serialized ticket.
pub const FIELD_TICKET: &str = "ticket";

/// Stream entry field carrying the id of a ticket to activate.
pub const FIELD_ACTIVATE: &str = "activate";

/// Stream entry field carrying the id of a ticket to deactivate.
pub const FIELD_DEACTIVATE: &str = "deactivate";

/// Stream entry field carrying the id of an assigned ticket.
pub const FIELD_ASSIGN: &str = "assign";

/// Stream entry field carrying the serialized assignment.
pub const FIELD_CONNECTION: &str = "connection";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
