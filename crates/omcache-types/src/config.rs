//! Configuration for a replicated ticket cache instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CacheError, Result, constants};

/// Timing and sizing knobs shared by the cache, its queues, and the
/// replicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a ticket lives after creation unless it expires sooner.
    pub ticket_ttl: Duration,
    /// How long an assignment outlives the ticket TTL.
    pub assignment_additional_ttl: Duration,
    /// Longest the outgoing queue waits to fill a batch.
    pub outgoing_wait_timeout: Duration,
    /// Most updates committed to the log in one batch.
    pub outgoing_max_batch_size: usize,
    /// Capacity of the inbound request channel.
    pub request_queue_capacity: usize,
    /// Most log entries read in one poll; also the ordered channel capacity.
    pub incoming_max_updates_per_poll: usize,
    /// Longest a single poll blocks, and the minimum interval between polls.
    pub incoming_poll_wait_timeout: Duration,
    /// Sleep between apply cycles.
    pub incoming_apply_interval: Duration,
    /// Upper bound on a single drain of the ordered channel.
    pub apply_hold_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ticket_ttl: Duration::from_millis(constants::DEFAULT_TICKET_TTL_MS),
            assignment_additional_ttl: Duration::from_millis(
                constants::DEFAULT_ASSIGNMENT_ADDITIONAL_TTL_MS,
            ),
            outgoing_wait_timeout: Duration::from_millis(
                constants::DEFAULT_OUTGOING_WAIT_TIMEOUT_MS,
            ),
            outgoing_max_batch_size: constants::DEFAULT_OUTGOING_MAX_BATCH_SIZE,
            request_queue_capacity: constants::DEFAULT_REQUEST_QUEUE_CAPACITY,
            incoming_max_updates_per_poll: constants::DEFAULT_INCOMING_MAX_UPDATES_PER_POLL,
            incoming_poll_wait_timeout: Duration::from_millis(
                constants::DEFAULT_INCOMING_POLL_WAIT_TIMEOUT_MS,
            ),
            incoming_apply_interval: Duration::from_millis(
                constants::DEFAULT_INCOMING_APPLY_INTERVAL_MS,
            ),
            apply_hold_timeout: Duration::from_millis(constants::DEFAULT_APPLY_HOLD_TIMEOUT_MS),
        }
    }
}

impl CacheConfig {
    /// Check the invariants the queues rely on.
    ///
    /// # Errors
    /// `Configuration` if a size, TTL, poll wait or hold timeout is zero, or
    /// if the request queue is smaller than a batch (the outgoing queue could
    /// then never fill one).
    pub fn validate(&self) -> Result<()> {
        if self.ticket_ttl.is_zero() {
            return Err(CacheError::Configuration("ticket_ttl must be > 0".into()));
        }
        if self.outgoing_max_batch_size == 0 {
            return Err(CacheError::Configuration(
                "outgoing_max_batch_size must be > 0".into(),
            ));
        }
        if self.incoming_max_updates_per_poll == 0 {
            return Err(CacheError::Configuration(
                "incoming_max_updates_per_poll must be > 0".into(),
            ));
        }
        if self.incoming_poll_wait_timeout.is_zero() {
            return Err(CacheError::Configuration(
                "incoming_poll_wait_timeout must be > 0".into(),
            ));
        }
        if self.apply_hold_timeout.is_zero() {
            return Err(CacheError::Configuration(
                "apply_hold_timeout must be > 0".into(),
            ));
        }
        if self.request_queue_capacity < self.outgoing_max_batch_size {
            return Err(CacheError::Configuration(format!(
                "request_queue_capacity ({}) must be >= outgoing_max_batch_size ({})",
                self.request_queue_capacity, self.outgoing_max_batch_size
            )));
        }
        Ok(())
    }

    /// Total retention of an assignment: ticket TTL plus the extra window.
    #[must_use]
    pub fn assignment_ttl(&self) -> Duration {
        self.ticket_ttl.saturating_add(self.assignment_additional_ttl)
    }

    /// Oldest log timestamp a fresh cursor needs to replay, given `now_ms`.
    #[must_use]
    pub fn initial_cursor_ms(&self, now_ms: u64) -> u64 {
        let horizon = u64::try_from(self.assignment_ttl().as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(horizon)
    }

    /// A configuration with short timings, for tests and local development.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            outgoing_wait_timeout: Duration::from_millis(5),
            outgoing_max_batch_size: 64,
            request_queue_capacity: 256,
            incoming_max_updates_per_poll: 256,
            incoming_poll_wait_timeout: Duration::from_millis(10),
            incoming_apply_interval: Duration::from_millis(5),
            apply_hold_timeout: Duration::from_millis(50),
            ..Self::default()
        }
    }
}
