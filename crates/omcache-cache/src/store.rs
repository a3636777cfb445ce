//! Ticket state maps.
//!
//! Three concurrent maps make up the replicated view:
//!
//! - **tickets**: ticket id → ticket
//! - **inactive**: ids of tickets excluded from matchmaking
//! - **assignments**: ticket id → assignment (deprecated, kept in sync)
//!
//! A ticket is *active* iff it is in `tickets` and not in `inactive`.
//! Only the incoming queue mutates these maps; everything else reads.
//!
//! ## Lock ordering
//!
//! No operation holds a shard lock of one map while locking another map
//! for writing. Readers that join `tickets` with `inactive` nest read locks
//! only, which cannot cycle with writers that lock one map at a time.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use omcache_types::{
    Assignment, CacheError, Command, PayloadCodec, ReplId, Result, StateUpdate, Ticket,
};
use sha2::{Digest, Sha256};

/// Outcome of one expiration sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationReport {
    /// Inactive entries dropped because their id aged past the ticket TTL.
    pub inactive_expired: usize,
    /// Inactive entries left after the sweep.
    pub inactive_remaining: usize,
    /// Tickets dropped, by either id age or their own expiration time.
    pub tickets_expired: usize,
    /// Tickets left after the sweep.
    pub tickets_remaining: usize,
    /// Assignments dropped because their id aged past the assignment TTL.
    pub assignments_expired: usize,
    /// Assignments left after the sweep.
    pub assignments_remaining: usize,
    /// Wall time spent on the sweep.
    pub elapsed: Duration,
}

impl ExpirationReport {
    /// Entries removed across all three maps.
    #[must_use]
    pub fn total_expired(&self) -> usize {
        self.inactive_expired + self.tickets_expired + self.assignments_expired
    }
}

/// The local replicated ticket state.
#[derive(Debug, Default)]
pub struct TicketStore {
    tickets: DashMap<String, Ticket>,
    inactive: DashSet<String>,
    assignments: DashMap<String, Assignment>,
}

impl TicketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Apply one update read from the replication log.
    ///
    /// # Errors
    ///
    /// Returns the codec error when a `CreateTicket` or `Assign` payload
    /// cannot be decoded. The store is left unchanged in that case.
    pub fn apply(&self, update: &StateUpdate, codec: &dyn PayloadCodec) -> Result<()> {
        match update.command {
            Command::CreateTicket => {
                let mut ticket = codec.decode_ticket(&update.value)?;
                ticket.id.clone_from(&update.key);
                // New tickets start inactive. The inactive entry goes in first
                // so the ticket is never observable as active.
                self.inactive.insert(update.key.clone());
                self.tickets.insert(update.key.clone(), ticket);
            }
            Command::Activate => {
                self.inactive.remove(&update.key);
            }
            Command::Deactivate => {
                self.inactive.insert(update.key.clone());
            }
            Command::Assign => {
                let assignment = codec.decode_assignment(&update.value)?;
                self.assignments.insert(update.key.clone(), assignment);
            }
        }
        Ok(())
    }

    /// Drop every entry that has outlived its retention window.
    ///
    /// - inactive ids older than `ticket_ttl` are removed, together with
    ///   their ticket
    /// - tickets whose own expiration time has passed are removed
    /// - assignments whose key is older than `assignment_ttl` are removed
    ///
    /// Ages come from the creation millis embedded in the replication id.
    /// Entries whose key does not parse as one are logged and kept.
    pub fn expire_at(
        &self,
        now: DateTime<Utc>,
        ticket_ttl: Duration,
        assignment_ttl: Duration,
    ) -> ExpirationReport {
        let started = Instant::now();
        let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let mut report = ExpirationReport::default();

        // Pass 1: inactive ids. Collected first so the set is not locked
        // while tickets are removed.
        let ticket_ttl_ms = millis(ticket_ttl);
        let mut stale = Vec::new();
        for entry in self.inactive.iter() {
            let id = entry.key();
            match ReplId::creation_millis(id) {
                Ok(created) if now_ms.saturating_sub(created) > ticket_ttl_ms => {
                    stale.push(id.clone());
                }
                Ok(_) => {}
                Err(err) => log_unparseable("inactive", id, &err),
            }
        }
        for id in &stale {
            // Reverse of creation order: ticket first, then its inactive mark.
            if self.tickets.remove(id).is_some() {
                report.tickets_expired += 1;
            }
            if self.inactive.remove(id).is_some() {
                report.inactive_expired += 1;
            }
        }
        report.inactive_remaining = self.inactive.len();

        // Pass 2: tickets past their own expiration time.
        self.tickets.retain(|id, ticket| {
            if ticket.is_expired_at(now) {
                tracing::trace!(ticket_id = %id, "Ticket expired");
                report.tickets_expired += 1;
                false
            } else {
                true
            }
        });
        report.tickets_remaining = self.tickets.len();

        // Pass 3: assignments.
        let assignment_ttl_ms = millis(assignment_ttl);
        self.assignments
            .retain(|id, _| match ReplId::creation_millis(id) {
                Ok(created) if now_ms.saturating_sub(created) > assignment_ttl_ms => {
                    report.assignments_expired += 1;
                    false
                }
                Ok(_) => true,
                Err(err) => {
                    log_unparseable("assignment", id, &err);
                    true
                }
            });
        report.assignments_remaining = self.assignments.len();

        report.elapsed = started.elapsed();
        report
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn ticket(&self, id: &str) -> Option<Ticket> {
        self.tickets.get(id).map(|t| t.value().clone())
    }

    pub fn contains_ticket(&self, id: &str) -> bool {
        self.tickets.contains_key(id)
    }

    pub fn is_inactive(&self, id: &str) -> bool {
        self.inactive.contains(id)
    }

    /// True iff the ticket exists and is not marked inactive.
    pub fn is_active(&self, id: &str) -> bool {
        self.tickets.contains_key(id) && !self.inactive.contains(id)
    }

    pub fn assignment(&self, id: &str) -> Option<Assignment> {
        self.assignments.get(id).map(|a| a.value().clone())
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }

    pub fn inactive_count(&self) -> usize {
        self.inactive.len()
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }

    /// Snapshot of every active ticket, ordered by id.
    pub fn active_tickets(&self) -> Vec<Ticket> {
        let mut active: Vec<Ticket> = self
            .tickets
            .iter()
            .filter(|t| !self.inactive.contains(t.key()))
            .map(|t| t.value().clone())
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Sorted ids currently marked inactive.
    pub fn inactive_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inactive.iter().map(|id| id.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Visit every ticket. Iteration order is unspecified; the closure must
    /// not call back into the store.
    pub fn for_each_ticket(&self, mut f: impl FnMut(&str, &Ticket)) {
        for entry in &self.tickets {
            f(entry.key(), entry.value());
        }
    }

    /// Visit every assignment, under the same rules as [`Self::for_each_ticket`].
    pub fn for_each_assignment(&self, mut f: impl FnMut(&str, &Assignment)) {
        for entry in &self.assignments {
            f(entry.key(), entry.value());
        }
    }

    /// SHA-256 over the sorted contents of all three maps.
    ///
    /// Two stores that applied the same log prefix have equal digests.
    pub fn digest(&self) -> String {
        let mut tickets: Vec<(String, String)> = self
            .tickets
            .iter()
            .map(|t| {
                let body = serde_json::to_string(t.value()).unwrap_or_default();
                (t.key().clone(), body)
            })
            .collect();
        tickets.sort();

        let mut assignments: Vec<(String, String)> = self
            .assignments
            .iter()
            .map(|a| {
                let body = serde_json::to_string(a.value()).unwrap_or_default();
                (a.key().clone(), body)
            })
            .collect();
        assignments.sort();

        let inactive = self.inactive_ids();

        let mut hasher = Sha256::new();
        hasher.update(b"omcache:state:v1:");
        hasher.update((tickets.len() as u64).to_le_bytes());
        for (id, body) in &tickets {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
            hasher.update(body.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update((inactive.len() as u64).to_le_bytes());
        for id in &inactive {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update((assignments.len() as u64).to_le_bytes());
        for (id, body) in &assignments {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
            hasher.update(body.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn log_unparseable(map: &'static str, id: &str, err: &CacheError) {
    tracing::warn!(
        map,
        key = %id,
        error = %err,
        "Unable to parse key into a replication id; entry kept"
    );
}

#[cfg(test)]
mod tests {
    use omcache_types::JsonCodec;

    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn now_ms() -> u64 {
        u64::try_from(now().timestamp_millis()).unwrap()
    }

    fn id_aged(age: Duration, seq: u64) -> String {
        ReplId::new(now_ms() - millis(age), seq).to_string()
    }

    fn create(store: &TicketStore, id: &str, ttl: Duration) {
        let payload = JsonCodec.encode_ticket(&Ticket::dummy(ttl)).unwrap();
        store
            .apply(
                &StateUpdate::new(Command::CreateTicket, id, payload),
                &JsonCodec,
            )
            .unwrap();
    }

    #[test]
    fn created_ticket_is_stored_inactive_with_its_id() {
        let store = TicketStore::new();
        create(&store, "1700000000000-0", TTL);

        let ticket = store.ticket("1700000000000-0").unwrap();
        assert_eq!(ticket.id, "1700000000000-0");
        assert!(store.is_inactive("1700000000000-0"));
        assert!(!store.is_active("1700000000000-0"));
        assert!(store.active_tickets().is_empty());
    }

    #[test]
    fn activate_and_deactivate_toggle_membership() {
        let store = TicketStore::new();
        let id = id_aged(Duration::ZERO, 0);
        create(&store, &id, TTL);

        store.apply(&StateUpdate::activate(&id), &JsonCodec).unwrap();
        assert!(store.is_active(&id));
        assert_eq!(store.active_tickets().len(), 1);

        store.apply(&StateUpdate::deactivate(&id), &JsonCodec).unwrap();
        assert!(!store.is_active(&id));
        // Deactivating twice is harmless.
        store.apply(&StateUpdate::deactivate(&id), &JsonCodec).unwrap();
        assert_eq!(store.inactive_count(), 1);
    }

    #[test]
    fn activate_unknown_id_is_a_no_op() {
        let store = TicketStore::new();
        store
            .apply(&StateUpdate::activate("9-9"), &JsonCodec)
            .unwrap();
        assert_eq!(store.ticket_count(), 0);
        assert_eq!(store.inactive_count(), 0);
    }

    #[test]
    fn deactivate_unknown_id_marks_it_inactive() {
        let store = TicketStore::new();
        store
            .apply(&StateUpdate::deactivate("9-9"), &JsonCodec)
            .unwrap();
        assert!(store.is_inactive("9-9"));
        assert!(!store.contains_ticket("9-9"));
    }

    #[test]
    fn assignment_needs_no_ticket() {
        let store = TicketStore::new();
        let payload = JsonCodec.encode_assignment(&Assignment::new("a:1")).unwrap();
        store
            .apply(&StateUpdate::assign("t1", payload), &JsonCodec)
            .unwrap();
        assert_eq!(store.assignment("t1").unwrap().connection, "a:1");
        assert_eq!(store.ticket_count(), 0);
    }

    #[test]
    fn for_each_visits_every_entry() {
        let store = TicketStore::new();
        create(&store, "1-0", TTL);
        create(&store, "2-0", TTL);
        for key in ["2-0", "t1"] {
            let payload = JsonCodec.encode_assignment(&Assignment::new(key)).unwrap();
            store
                .apply(&StateUpdate::assign(key, payload), &JsonCodec)
                .unwrap();
        }

        let mut tickets = Vec::new();
        store.for_each_ticket(|id, ticket| {
            assert_eq!(id, ticket.id);
            tickets.push(id.to_string());
        });
        tickets.sort();
        assert_eq!(tickets, ["1-0", "2-0"]);

        let mut assignments = Vec::new();
        store.for_each_assignment(|id, assignment| {
            assert_eq!(id, assignment.connection);
            assignments.push(id.to_string());
        });
        assignments.sort();
        assert_eq!(assignments, ["2-0", "t1"]);
    }

    #[test]
    fn undecodable_payload_leaves_state_untouched() {
        let store = TicketStore::new();
        let err = store
            .apply(
                &StateUpdate::new(Command::CreateTicket, "1-0", "{not json"),
                &JsonCodec,
            )
            .unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
        assert_eq!(store.ticket_count(), 0);
        assert_eq!(store.inactive_count(), 0);

        assert!(
            store
                .apply(&StateUpdate::assign("1-0", "[]"), &JsonCodec)
                .is_err()
        );
        assert_eq!(store.assignment_count(), 0);
    }

    #[test]
    fn aged_inactive_id_takes_its_ticket_with_it() {
        let store = TicketStore::new();
        let old = id_aged(TTL + Duration::from_secs(1), 0);
        let fresh = id_aged(Duration::from_secs(1), 0);
        // The ticket's own expiration is far away; only the id age matters.
        create(&store, &old, Duration::from_secs(3600));
        create(&store, &fresh, Duration::from_secs(3600));

        let report = store.expire_at(now(), TTL, TTL * 2);
        assert_eq!(report.inactive_expired, 1);
        assert_eq!(report.tickets_expired, 1);
        assert!(!store.contains_ticket(&old));
        assert!(!store.is_inactive(&old));
        assert!(store.contains_ticket(&fresh));
        assert_eq!(report.inactive_remaining, 1);
        assert_eq!(report.tickets_remaining, 1);
    }

    #[test]
    fn active_ticket_outlives_ttl_until_its_own_expiration() {
        let store = TicketStore::new();
        let old = id_aged(TTL + Duration::from_secs(1), 0);
        create(&store, &old, Duration::from_secs(3600));
        store.apply(&StateUpdate::activate(&old), &JsonCodec).unwrap();

        store.expire_at(now(), TTL, TTL * 2);
        assert!(store.is_active(&old));

        let later = now() + chrono::TimeDelta::hours(2);
        let report = store.expire_at(later, TTL, TTL * 2);
        assert_eq!(report.tickets_expired, 1);
        assert!(!store.contains_ticket(&old));
    }

    #[test]
    fn assignments_expire_by_key_age() {
        let store = TicketStore::new();
        let payload = JsonCodec.encode_assignment(&Assignment::dummy()).unwrap();
        let old = id_aged(TTL * 2 + Duration::from_secs(1), 0);
        let young = id_aged(TTL, 0);
        for id in [&old, &young] {
            store
                .apply(&StateUpdate::assign(id.as_str(), payload.clone()), &JsonCodec)
                .unwrap();
        }

        let report = store.expire_at(now(), TTL, TTL * 2);
        assert_eq!(report.assignments_expired, 1);
        assert_eq!(report.assignments_remaining, 1);
        assert!(store.assignment(&old).is_none());
        assert!(store.assignment(&young).is_some());
    }

    #[test]
    fn unparseable_keys_are_kept() {
        let store = TicketStore::new();
        let payload = JsonCodec.encode_assignment(&Assignment::dummy()).unwrap();
        store
            .apply(&StateUpdate::assign("t1", payload), &JsonCodec)
            .unwrap();
        store
            .apply(&StateUpdate::deactivate("not-an-id"), &JsonCodec)
            .unwrap();

        let report = store.expire_at(now(), TTL, TTL * 2);
        assert_eq!(report.total_expired(), 0);
        assert!(store.assignment("t1").is_some());
        assert!(store.is_inactive("not-an-id"));
    }

    #[test]
    fn sweep_is_idempotent() {
        let store = TicketStore::new();
        create(&store, &id_aged(TTL * 3, 0), TTL);
        create(&store, &id_aged(Duration::ZERO, 1), TTL);
        let at = now();

        let first = store.expire_at(at, TTL, TTL * 2);
        assert!(first.total_expired() > 0);
        let digest = store.digest();

        let second = store.expire_at(at, TTL, TTL * 2);
        assert_eq!(second.total_expired(), 0);
        assert_eq!(store.digest(), digest);
    }

    #[test]
    fn digest_tracks_content_not_insertion_order() {
        let ids = ["1-0", "2-0", "3-0"];
        let payload = JsonCodec
            .encode_ticket(&Ticket::new(now() + chrono::TimeDelta::minutes(5)))
            .unwrap();

        let a = TicketStore::new();
        let b = TicketStore::new();
        for id in ids {
            a.apply(&StateUpdate::new(Command::CreateTicket, id, payload.clone()), &JsonCodec)
                .unwrap();
        }
        for id in ids.iter().rev() {
            b.apply(&StateUpdate::new(Command::CreateTicket, *id, payload.clone()), &JsonCodec)
                .unwrap();
        }
        assert_eq!(a.digest(), b.digest());

        b.apply(&StateUpdate::activate("2-0"), &JsonCodec).unwrap();
        assert_ne!(a.digest(), b.digest());
    }
}
