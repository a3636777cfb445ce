//! In-memory stream backend.
//!
//! Follows the same id and ordering rules as a production stream log, so
//! caches replicating through one shared `MemoryStream` behave like
//! separate instances sharing a real log. For tests and local development.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use omcache_types::{CacheError, ReplId, ReplIdGenerator, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::stream::{Fields, StreamBackend, StreamEntry};

#[derive(Debug, Default)]
struct StreamState {
    /// Sorted by id (ids only ever grow).
    entries: VecDeque<StreamEntry>,
    ids: ReplIdGenerator,
}

/// Single-process append-only stream.
#[derive(Debug, Default)]
pub struct MemoryStream {
    state: Mutex<StreamState>,
    appended: Notify,
    unavailable: AtomicBool,
}

impl MemoryStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Id of the newest entry ever appended.
    pub fn last_id(&self) -> Option<ReplId> {
        self.state.lock().ids.last()
    }

    /// Simulate losing (or regaining) the connection to the log. While
    /// unavailable every call fails with `LogUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::LogUnavailable("memory stream offline".into()));
        }
        Ok(())
    }

    fn collect_after(&self, cursor: ReplId, count: usize) -> Vec<StreamEntry> {
        let state = self.state.lock();
        let start = state.entries.partition_point(|e| e.id <= cursor);
        state.entries.range(start..).take(count).cloned().collect()
    }
}

#[async_trait]
impl StreamBackend for MemoryStream {
    async fn append(&self, entries: Vec<Fields>) -> Result<Vec<ReplId>> {
        self.check_available()?;
        let ids = {
            let mut state = self.state.lock();
            let mut ids = Vec::with_capacity(entries.len());
            for fields in entries {
                let id = state.ids.next_id();
                state.entries.push_back(StreamEntry { id, fields });
                ids.push(id);
            }
            ids
        };
        self.appended.notify_waiters();
        Ok(ids)
    }

    async fn read_after(
        &self,
        cursor: ReplId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            self.check_available()?;

            // Register for wakeups before looking, so an append landing
            // between the check and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.collect_after(cursor, count);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn trim(&self, min_id: ReplId) -> Result<usize> {
        self.check_available()?;
        let mut state = self.state.lock();
        let before = state.entries.len();
        while state.entries.front().is_some_and(|e| e.id < min_id) {
            state.entries.pop_front();
        }
        Ok(before - state.entries.len())
    }
}
