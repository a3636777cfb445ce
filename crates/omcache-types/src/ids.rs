//! Replication identities.
//!
//! Every entry in the replication log is keyed by a `<millis>-<seq>` id
//! assigned by the log at commit time. The id of a `CreateTicket` entry *is*
//! the ticket id, so an id can never exist that was not durably replicated.
//! The millisecond component doubles as the ticket creation time used by
//! expiration.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{CacheError, Result, constants};

static REPL_ID_VALIDATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(constants::REPL_ID_PATTERN).expect("REPL_ID_PATTERN is a valid regex")
});

/// Compiled `^\d{13}-\d+$` pattern for validating externally observed ids.
#[must_use]
pub fn repl_id_validator() -> &'static Regex {
    &REPL_ID_VALIDATOR
}

/// Current wall-clock time in milliseconds since the UNIX epoch.
#[must_use]
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// ReplId
// ---------------------------------------------------------------------------

/// A log-assigned replication id.
///
/// Ordered numerically by `(millis, seq)`, which is also log order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReplId {
    pub millis: u64,
    pub seq: u64,
}

impl ReplId {
    #[must_use]
    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// The first id of the given millisecond.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self { millis, seq: 0 }
    }

    /// Extract the creation timestamp from an id string.
    ///
    /// Only the leading numeric component is parsed, so any string starting
    /// with `<digits>` (optionally followed by `-...`) yields a timestamp.
    pub fn creation_millis(id: &str) -> Result<u64> {
        let head = id.split('-').next().unwrap_or_default();
        parse_digits(head).ok_or_else(|| CacheError::InvalidReplId(id.to_string()))
    }
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for ReplId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for ReplId {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CacheError::InvalidReplId(s.to_string());
        let (millis, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            millis: parse_digits(millis).ok_or_else(invalid)?,
            seq: parse_digits(seq).ok_or_else(invalid)?,
        })
    }
}

impl TryFrom<String> for ReplId {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ReplId> for String {
    fn from(id: ReplId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// ReplIdGenerator
// ---------------------------------------------------------------------------

/// Assigns strictly increasing replication ids.
///
/// Within one millisecond the sequence increments; a new millisecond resets
/// it to zero. If the clock moves backwards the last millisecond is kept and
/// the sequence keeps counting, so ids never go backwards.
#[derive(Debug, Clone, Default)]
pub struct ReplIdGenerator {
    last: Option<ReplId>,
}

impl ReplIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for the given wall-clock millisecond.
    pub fn next_at(&mut self, now_ms: u64) -> ReplId {
        let id = match self.last {
            Some(last) if now_ms <= last.millis => ReplId::new(last.millis, last.seq + 1),
            _ => ReplId::from_millis(now_ms),
        };
        self.last = Some(id);
        id
    }

    /// Next id for the current time.
    pub fn next_id(&mut self) -> ReplId {
        self.next_at(now_millis())
    }

    /// The most recently assigned id.
    #[must_use]
    pub fn last(&self) -> Option<ReplId> {
        self.last
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
