//! [`StateReplicator`] over any [`StreamBackend`].
//!
//! Owns the read cursor and the per-item validation, so a backend only has
//! to provide append / read / trim.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use omcache_types::{
    CacheConfig, CacheError, ReplId, Result, StateResponse, StateUpdate, constants, now_millis,
};
use tokio::sync::Mutex;

use crate::memory::MemoryStream;
use crate::replicator::StateReplicator;
use crate::stream::{StreamBackend, decode_entry, encode_update};

/// Replicator backed by the in-memory stream.
pub type MemoryReplicator = StreamReplicator<MemoryStream>;

/// Replicates ticket state through a stream log.
pub struct StreamReplicator<B> {
    backend: Arc<B>,
    /// Id of the last entry handed out by `get_updates`.
    cursor: Mutex<ReplId>,
    max_updates_per_poll: usize,
    poll_wait: Duration,
    ticket_ttl: Duration,
}

impl<B: StreamBackend> StreamReplicator<B> {
    /// A replicator whose cursor starts far enough back to replay every
    /// ticket and assignment still within its retention window.
    pub fn new(backend: Arc<B>, config: &CacheConfig) -> Self {
        let start = ReplId::from_millis(config.initial_cursor_ms(now_millis()));
        Self::with_cursor(backend, config, start)
    }

    /// A replicator that reads entries strictly after `cursor`.
    pub fn with_cursor(backend: Arc<B>, config: &CacheConfig, cursor: ReplId) -> Self {
        Self {
            backend,
            cursor: Mutex::new(cursor),
            max_updates_per_poll: config.incoming_max_updates_per_poll,
            poll_wait: config.incoming_poll_wait_timeout,
            ticket_ttl: config.ticket_ttl,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Id of the last entry delivered.
    pub async fn cursor(&self) -> ReplId {
        *self.cursor.lock().await
    }

    /// Append the valid entries in one write; the error, if any, applies to
    /// every one of them.
    async fn commit(&self, entries: Vec<crate::Fields>) -> Result<Vec<ReplId>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let sent = entries.len();
        let ids = self
            .backend
            .append(entries)
            .await
            .map_err(|e| CacheError::BatchWriteFailed(e.to_string()))?;
        if ids.len() != sent {
            return Err(CacheError::ResultCountMismatch {
                sent,
                received: ids.len(),
            });
        }
        Ok(ids)
    }

    async fn trim_expired(&self) {
        let ttl_ms = u64::try_from(self.ticket_ttl.as_millis()).unwrap_or(u64::MAX);
        let threshold = ReplId::from_millis(now_millis().saturating_sub(ttl_ms));
        match self.backend.trim(threshold).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(
                stream = constants::REPLICATION_STREAM,
                removed,
                threshold = %threshold,
                "Trimmed replication log entries older than ticket TTL"
            ),
            Err(err) => tracing::warn!(
                stream = constants::REPLICATION_STREAM,
                error = %err,
                "Replication log trim failed"
            ),
        }
    }
}

impl MemoryReplicator {
    /// A replicator over a fresh, private in-memory stream.
    #[must_use]
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(Arc::new(MemoryStream::new()), config)
    }
}

#[async_trait]
impl<B: StreamBackend> StateReplicator for StreamReplicator<B> {
    async fn get_updates(&self) -> Vec<StateUpdate> {
        let mut cursor = self.cursor.lock().await;
        let entries = match self
            .backend
            .read_after(*cursor, self.max_updates_per_poll, self.poll_wait)
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(
                    stream = constants::REPLICATION_STREAM,
                    error = %err,
                    cursor = %*cursor,
                    "Replication log read failed"
                );
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry.id;
            match decode_entry(entry) {
                Ok(update) => out.push(update),
                Err(err) => {
                    tracing::warn!(entry = %id, error = %err, "Skipping undecodable log entry");
                }
            }
            *cursor = id;
        }

        if !out.is_empty() {
            tracing::debug!(count = out.len(), cursor = %*cursor, "Read updates from replication log");
        }
        out
    }

    async fn send_updates(&self, updates: Vec<StateUpdate>) -> Vec<StateResponse> {
        let mut rejected = Vec::with_capacity(updates.len());
        let mut entries = Vec::with_capacity(updates.len());
        for update in &updates {
            match encode_update(update) {
                Ok(fields) => {
                    entries.push(fields);
                    rejected.push(None);
                }
                Err(err) => {
                    tracing::warn!(
                        command = %update.command,
                        key = %update.key,
                        error = %err,
                        "Update could not be encoded and was skipped"
                    );
                    rejected.push(Some(err));
                }
            }
        }

        let mut committed = self.commit(entries).await.map(Vec::into_iter);
        if let Err(err) = &committed {
            tracing::error!(
                stream = constants::REPLICATION_STREAM,
                error = %err,
                batch = updates.len(),
                "Replication batch write failed"
            );
        }

        self.trim_expired().await;

        let responses: Vec<StateResponse> = updates
            .into_iter()
            .zip(rejected)
            .map(|(update, rejection)| match (rejection, &mut committed) {
                (Some(err), _) => StateResponse::failed(update.key, err),
                (None, Err(err)) => StateResponse::failed(update.key, err.clone()),
                (None, Ok(ids)) => match ids.next() {
                    Some(id) => StateResponse::ok(id.to_string()),
                    None => StateResponse::failed(
                        update.key,
                        CacheError::Internal("commit returned too few ids".into()),
                    ),
                },
            })
            .collect();

        tracing::trace!(count = responses.len(), "Replication batch results ready");
        responses
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use omcache_types::{Command, JsonCodec, PayloadCodec, Ticket};

    use super::*;

    fn config() -> CacheConfig {
        CacheConfig {
            incoming_poll_wait_timeout: Duration::from_millis(10),
            ..CacheConfig::default()
        }
    }

    fn ticket_payload() -> String {
        JsonCodec
            .encode_ticket(&Ticket::dummy(Duration::from_secs(60)))
            .unwrap()
    }

    #[tokio::test]
    async fn malformed_item_fails_alone() {
        let repl = MemoryReplicator::in_memory(&config());
        let results = repl
            .send_updates(vec![
                StateUpdate::create_ticket(ticket_payload()),
                StateUpdate::activate(""),
                StateUpdate::assign("t1", ""),
                StateUpdate::deactivate("1700000000000-0"),
            ])
            .await;

        assert_eq!(results.len(), 4);
        assert!(results[0].is_ok());
        assert_eq!(results[1].error, Some(CacheError::MissingKey));
        assert_eq!(results[1].result, "");
        assert_eq!(results[2].error, Some(CacheError::MissingAssignment));
        assert_eq!(results[2].result, "t1");
        assert!(results[3].is_ok());
        assert_eq!(repl.backend().len(), 2);
    }

    #[tokio::test]
    async fn created_ticket_comes_back_keyed_by_its_id() {
        let repl = MemoryReplicator::in_memory(&config());
        let payload = ticket_payload();
        let results = repl
            .send_updates(vec![StateUpdate::create_ticket(payload.clone())])
            .await;
        let id = results[0].result.clone();
        assert!(repl.repl_id_validator().is_match(&id));

        let updates = repl.get_updates().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].command, Command::CreateTicket);
        assert_eq!(updates[0].key, id);
        assert_eq!(updates[0].value, payload);
        assert_eq!(repl.cursor().await.to_string(), id);
    }

    #[tokio::test]
    async fn each_entry_is_delivered_once() {
        let repl = MemoryReplicator::in_memory(&config());
        repl.send_updates(vec![StateUpdate::activate("a"), StateUpdate::activate("b")])
            .await;
        assert_eq!(repl.get_updates().await.len(), 2);
        assert!(repl.get_updates().await.is_empty());

        repl.send_updates(vec![StateUpdate::deactivate("a")]).await;
        let again = repl.get_updates().await;
        assert_eq!(again, vec![StateUpdate::deactivate("a")]);
    }

    #[tokio::test]
    async fn poll_size_caps_a_single_read() {
        let cfg = CacheConfig {
            incoming_max_updates_per_poll: 3,
            ..config()
        };
        let repl = MemoryReplicator::in_memory(&cfg);
        let batch = (0..7).map(|i| StateUpdate::activate(format!("t{i}"))).collect();
        repl.send_updates(batch).await;

        assert_eq!(repl.get_updates().await.len(), 3);
        assert_eq!(repl.get_updates().await.len(), 3);
        assert_eq!(repl.get_updates().await.len(), 1);
    }

    #[tokio::test]
    async fn offline_log_fails_every_valid_item() {
        let repl = MemoryReplicator::in_memory(&config());
        repl.backend().set_available(false);

        let results = repl
            .send_updates(vec![StateUpdate::activate("a"), StateUpdate::activate("")])
            .await;
        assert!(matches!(
            results[0].error,
            Some(CacheError::BatchWriteFailed(_))
        ));
        assert_eq!(results[0].result, "a");
        assert_eq!(results[1].error, Some(CacheError::MissingKey));

        assert!(repl.get_updates().await.is_empty());
        repl.backend().set_available(true);
        assert!(repl.get_updates().await.is_empty());
    }

    #[tokio::test]
    async fn send_trims_entries_older_than_ttl() {
        let stream = Arc::new(MemoryStream::new());
        let cfg = CacheConfig {
            ticket_ttl: Duration::from_millis(30),
            ..config()
        };
        let repl = StreamReplicator::new(Arc::clone(&stream), &cfg);
        repl.send_updates(vec![StateUpdate::activate("old")]).await;
        assert_eq!(stream.len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        repl.send_updates(vec![StateUpdate::activate("new")]).await;
        assert_eq!(stream.len(), 1);
    }
}
