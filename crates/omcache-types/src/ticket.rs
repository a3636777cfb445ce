//! Ticket and assignment payloads.
//!
//! The cache treats both as opaque except for [`Ticket::id`] (stamped with
//! the log-assigned id on apply) and [`Ticket::expiration_time`] (read by
//! the expiration sweep).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A matchmaking request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Replication id of the `CreateTicket` entry. Empty until applied.
    #[serde(default)]
    pub id: String,
    /// After this instant the ticket is dropped from every cache.
    pub expiration_time: DateTime<Utc>,
    /// Free-form tags used by pool filters.
    #[serde(default)]
    pub tags: Vec<String>,
    /// String-valued search fields.
    #[serde(default)]
    pub string_args: BTreeMap<String, String>,
    /// Numeric search fields.
    #[serde(default)]
    pub double_args: BTreeMap<String, f64>,
    /// Anything else the client wants carried along.
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Ticket {
    /// A ticket with no search fields expiring at `expiration_time`.
    #[must_use]
    pub fn new(expiration_time: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            expiration_time,
            tags: Vec::new(),
            string_args: BTreeMap::new(),
            double_args: BTreeMap::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// A ticket expiring `ttl` from now.
    #[must_use]
    pub fn expiring_in(ttl: Duration) -> Self {
        Self::new(expires_in(ttl))
    }

    /// Whether the ticket's own expiration time has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiration_time
    }
}

/// `now + ttl`, saturating at the latest representable instant.
#[must_use]
pub fn expires_in(ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Where a matched ticket should connect.
///
/// Assignment tracking is deprecated and kept for compatibility; entries are
/// keyed by ticket id without any check that the ticket exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Connection string handed to the player (e.g. `host:port`).
    pub connection: String,
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Assignment {
    #[must_use]
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            extensions: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-helpers"))]
impl Ticket {
    /// A ticket with a random game mode tag and skill rating.
    pub fn dummy(ttl: Duration) -> Self {
        use rand::Rng;
        const MODES: [&str; 3] = ["mode.ranked", "mode.casual", "mode.arena"];

        let mut rng = rand::thread_rng();
        let mut ticket = Self::expiring_in(ttl);
        ticket
            .tags
            .push(MODES[rng.gen_range(0..MODES.len())].to_string());
        ticket
            .string_args
            .insert("region".to_string(), "asia-northeast1".to_string());
        ticket
            .double_args
            .insert("skill".to_string(), f64::from(rng.gen_range(0u16..3000)));
        ticket
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Assignment {
    /// An assignment to a random game server address.
    pub fn dummy() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Self::new(format!(
            "10.0.{}.{}:7777",
            rng.gen_range(0u8..=255),
            rng.gen_range(1u8..=254)
        ))
    }
}
