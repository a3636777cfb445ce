//! Payload serialization.
//!
//! Tickets and assignments travel through the log as opaque strings. The
//! cache only ever touches their bytes through a [`PayloadCodec`].

use crate::{Assignment, CacheError, Result, Ticket};

/// Marshals ticket and assignment payloads to and from log values.
pub trait PayloadCodec: Send + Sync {
    fn encode_ticket(&self, ticket: &Ticket) -> Result<String>;
    fn decode_ticket(&self, raw: &str) -> Result<Ticket>;
    fn encode_assignment(&self, assignment: &Assignment) -> Result<String>;
    fn decode_assignment(&self, raw: &str) -> Result<Assignment>;
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode_ticket(&self, ticket: &Ticket) -> Result<String> {
        serde_json::to_string(ticket).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode_ticket(&self, raw: &str) -> Result<Ticket> {
        Ok(serde_json::from_str(raw)?)
    }

    fn encode_assignment(&self, assignment: &Assignment) -> Result<String> {
        serde_json::to_string(assignment).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode_assignment(&self, raw: &str) -> Result<Assignment> {
        Ok(serde_json::from_str(raw)?)
    }
}
