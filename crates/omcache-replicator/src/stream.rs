//! Stream-log primitives and the update ↔ entry field encoding.
//!
//! Each update becomes one stream entry whose fields name the command:
//!
//! ```text
//! ticket     <payload>                      key = the entry's own id
//! activate   <ticket id>
//! deactivate <ticket id>
//! assign     <ticket id> connection <payload>
//! ```

use std::time::Duration;

use async_trait::async_trait;
use omcache_types::{CacheError, Command, ReplId, Result, StateUpdate, constants};

/// Ordered `(name, value)` pairs stored in one entry.
pub type Fields = Vec<(String, String)>;

/// One entry read back from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: ReplId,
    pub fields: Fields,
}

/// What a concrete log has to provide.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Append all entries as one atomic write. Returns the assigned ids in
    /// input order; ids are strictly increasing across calls.
    async fn append(&self, entries: Vec<Fields>) -> Result<Vec<ReplId>>;

    /// Up to `count` entries with id strictly greater than `cursor`, oldest
    /// first. Waits up to `block` for the first entry to arrive.
    async fn read_after(
        &self,
        cursor: ReplId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// Remove every entry with id below `min_id`. Returns how many went.
    async fn trim(&self, min_id: ReplId) -> Result<usize>;
}

fn field(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

/// Validate an update and lay it out as stream fields.
///
/// # Errors
/// `MissingValue` for a ticket with no payload, `MissingKey` for an
/// activate/deactivate/assign with no id, `MissingAssignment` for an assign
/// with no payload.
pub fn encode_update(update: &StateUpdate) -> Result<Fields> {
    match update.command {
        Command::CreateTicket => {
            if update.value.is_empty() {
                return Err(CacheError::MissingValue);
            }
            Ok(vec![field(constants::FIELD_TICKET, &update.value)])
        }
        Command::Activate | Command::Deactivate => {
            if update.key.is_empty() {
                return Err(CacheError::MissingKey);
            }
            let name = if update.command == Command::Activate {
                constants::FIELD_ACTIVATE
            } else {
                constants::FIELD_DEACTIVATE
            };
            Ok(vec![field(name, &update.key)])
        }
        Command::Assign => {
            if update.key.is_empty() {
                return Err(CacheError::MissingKey);
            }
            if update.value.is_empty() {
                return Err(CacheError::MissingAssignment);
            }
            Ok(vec![
                field(constants::FIELD_ASSIGN, &update.key),
                field(constants::FIELD_CONNECTION, &update.value),
            ])
        }
    }
}

/// Turn a stream entry back into the update that produced it.
///
/// # Errors
/// `InvalidCommand` if the first field is not a known command,
/// `MissingAssignment` if an assign entry lacks its connection field.
pub fn decode_entry(entry: StreamEntry) -> Result<StateUpdate> {
    let mut fields = entry.fields.into_iter();
    let Some((name, value)) = fields.next() else {
        return Err(CacheError::InvalidCommand("<empty entry>".into()));
    };

    match name.as_str() {
        constants::FIELD_TICKET => Ok(StateUpdate::new(
            Command::CreateTicket,
            entry.id.to_string(),
            value,
        )),
        constants::FIELD_ACTIVATE => Ok(StateUpdate::activate(value)),
        constants::FIELD_DEACTIVATE => Ok(StateUpdate::deactivate(value)),
        constants::FIELD_ASSIGN => {
            let connection = fields
                .find(|(n, _)| n == constants::FIELD_CONNECTION)
                .map(|(_, v)| v)
                .ok_or(CacheError::MissingAssignment)?;
            Ok(StateUpdate::assign(value, connection))
        }
        _ => Err(CacheError::InvalidCommand(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: ReplId, fields: &[(&str, &str)]) -> StreamEntry {
        StreamEntry {
            id,
            fields: fields.iter().map(|(n, v)| field(n, v)).collect(),
        }
    }

    #[test]
    fn ticket_entry_takes_its_id_as_key() {
        let id = ReplId::new(1_700_000_000_000, 2);
        let up = decode_entry(entry(id, &[("ticket", "{}")])).unwrap();
        assert_eq!(up.command, Command::CreateTicket);
        assert_eq!(up.key, "1700000000000-2");
        assert_eq!(up.value, "{}");
    }

    #[test]
    fn assign_entry_reads_connection_field() {
        let fields = encode_update(&StateUpdate::assign("t1", "conn-A")).unwrap();
        assert_eq!(fields[0], field("assign", "t1"));
        assert_eq!(fields[1], field("connection", "conn-A"));

        let up = decode_entry(StreamEntry {
            id: ReplId::new(1, 0),
            fields,
        })
        .unwrap();
        assert_eq!(up, StateUpdate::assign("t1", "conn-A"));
    }

    #[test]
    fn activate_and_deactivate_carry_the_ticket_id() {
        for up in [StateUpdate::activate("x"), StateUpdate::deactivate("x")] {
            let fields = encode_update(&up).unwrap();
            let back = decode_entry(StreamEntry {
                id: ReplId::new(9, 9),
                fields,
            })
            .unwrap();
            assert_eq!(back, up);
        }
    }

    #[test]
    fn encode_rejects_missing_parts() {
        assert_eq!(
            encode_update(&StateUpdate::create_ticket("")),
            Err(CacheError::MissingValue)
        );
        assert_eq!(
            encode_update(&StateUpdate::activate("")),
            Err(CacheError::MissingKey)
        );
        assert_eq!(
            encode_update(&StateUpdate::deactivate("")),
            Err(CacheError::MissingKey)
        );
        assert_eq!(
            encode_update(&StateUpdate::assign("", "conn")),
            Err(CacheError::MissingKey)
        );
        assert_eq!(
            encode_update(&StateUpdate::assign("t1", "")),
            Err(CacheError::MissingAssignment)
        );
    }

    #[test]
    fn unknown_or_empty_entries_are_invalid() {
        let err = decode_entry(entry(ReplId::new(1, 0), &[("explode", "now")])).unwrap_err();
        assert_eq!(err, CacheError::InvalidCommand("explode".into()));

        let err = decode_entry(entry(ReplId::new(1, 1), &[])).unwrap_err();
        assert!(matches!(err, CacheError::InvalidCommand(_)));

        let err = decode_entry(entry(ReplId::new(1, 2), &[("assign", "t1")])).unwrap_err();
        assert_eq!(err, CacheError::MissingAssignment);
    }
}
