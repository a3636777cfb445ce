//! Update envelopes exchanged between callers, the queues, and the log.
//!
//! Every change to ticket state is modelled as a [`StateUpdate`]. Updates
//! from unrelated callers are batched together on the way into the log, so
//! each one gets its own [`StateResponse`] back.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CacheError, Result};

/// The operation an update carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Create a ticket; the log assigns its id.
    CreateTicket,
    /// Put a ticket into the matchmaking pool.
    Activate,
    /// Take a ticket out of the matchmaking pool.
    Deactivate,
    /// Record where a ticket should connect. Deprecated.
    Assign,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTicket => write!(f, "CREATE_TICKET"),
            Self::Activate => write!(f, "ACTIVATE"),
            Self::Deactivate => write!(f, "DEACTIVATE"),
            Self::Assign => write!(f, "ASSIGN"),
        }
    }
}

/// A single change to ticket state.
///
/// `key` is the ticket id for every command except `CreateTicket`, whose id
/// does not exist until the log assigns one; on the way back out of the log
/// a `CreateTicket` carries the assigned id as its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub command: Command,
    pub key: String,
    /// Serialized payload (ticket or assignment), empty if not applicable.
    pub value: String,
}

impl StateUpdate {
    #[must_use]
    pub fn new(command: Command, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command,
            key: key.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn create_ticket(payload: impl Into<String>) -> Self {
        Self::new(Command::CreateTicket, String::new(), payload)
    }

    #[must_use]
    pub fn activate(id: impl Into<String>) -> Self {
        Self::new(Command::Activate, id, String::new())
    }

    #[must_use]
    pub fn deactivate(id: impl Into<String>) -> Self {
        Self::new(Command::Deactivate, id, String::new())
    }

    #[must_use]
    pub fn assign(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(Command::Assign, id, payload)
    }
}

/// Outcome of one update.
///
/// On success `result` is the replication id the log assigned. On failure
/// `result` is the key of the failed update, so callers that batched several
/// updates can tell which one failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateResponse {
    pub result: String,
    pub error: Option<CacheError>,
}

impl StateResponse {
    #[must_use]
    pub fn ok(repl_id: impl Into<String>) -> Self {
        Self {
            result: repl_id.into(),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(key: impl Into<String>, error: CacheError) -> Self {
        Self {
            result: key.into(),
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The assigned id, or the error.
    pub fn into_result(self) -> Result<String> {
        match self.error {
            None => Ok(self.result),
            Some(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_ticket_has_no_key() {
        let up = StateUpdate::create_ticket("{}");
        assert_eq!(up.command, Command::CreateTicket);
        assert!(up.key.is_empty());
        assert_eq!(up.value, "{}");
    }

    #[test]
    fn failed_response_carries_key() {
        let resp = StateResponse::failed("1700000000000-0", CacheError::MissingKey);
        assert!(!resp.is_ok());
        assert_eq!(resp.result, "1700000000000-0");
        assert_eq!(resp.into_result(), Err(CacheError::MissingKey));
    }

    #[test]
    fn ok_response_into_result() {
        let resp = StateResponse::ok("1700000000000-4");
        assert!(resp.is_ok());
        assert_eq!(resp.into_result().unwrap(), "1700000000000-4");
    }
}
