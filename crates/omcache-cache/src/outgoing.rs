//! Outgoing replication queue.
//!
//! Collects [`UpdateRequest`]s into a batch until either the batch is full
//! or the wait timeout (measured from the start of the cycle) elapses, then
//! commits the whole batch with one `send_updates` call and hands each
//! caller the response at its position.

use std::sync::Arc;
use std::time::Duration;

use omcache_replicator::StateReplicator;
use omcache_types::{CacheError, StateResponse};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::counters::CacheCounters;
use crate::request::UpdateRequest;

pub(crate) struct OutgoingQueue {
    pub(crate) replicator: Arc<dyn StateReplicator>,
    pub(crate) requests: mpsc::Receiver<UpdateRequest>,
    pub(crate) wait_timeout: Duration,
    pub(crate) max_batch_size: usize,
    pub(crate) counters: Arc<CacheCounters>,
}

impl OutgoingQueue {
    /// Run until `shutdown` fires or every sender is dropped.
    ///
    /// On the way out the held batch and anything still queued are
    /// committed, so every admitted request gets a response.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        tracing::debug!(
            max_batch_size = self.max_batch_size,
            wait_timeout_ms = self.wait_timeout.as_millis(),
            "Listening for replication requests"
        );
        let mut batch = Vec::with_capacity(self.max_batch_size);

        loop {
            let open = self.collect(&mut batch, &shutdown).await;
            if !batch.is_empty() {
                self.commit(&mut batch).await;
            }
            if !open {
                break;
            }
        }

        self.requests.close();
        while let Ok(req) = self.requests.try_recv() {
            batch.push(req);
            if batch.len() >= self.max_batch_size {
                self.commit(&mut batch).await;
            }
        }
        if !batch.is_empty() {
            self.commit(&mut batch).await;
        }
        tracing::debug!("Outgoing replication queue stopped");
    }

    /// Fill `batch` for one cycle. Returns `false` when the queue should stop.
    async fn collect(
        &mut self,
        batch: &mut Vec<UpdateRequest>,
        shutdown: &CancellationToken,
    ) -> bool {
        let deadline = sleep_until(Instant::now() + self.wait_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return false,
                req = self.requests.recv() => match req {
                    Some(req) => {
                        batch.push(req);
                        tracing::trace!(queued = batch.len(), "Replication request added to batch");
                        if batch.len() >= self.max_batch_size {
                            tracing::trace!("Max batch size reached");
                            return true;
                        }
                    }
                    None => return false,
                },
                () = &mut deadline => {
                    if !batch.is_empty() {
                        tracing::trace!(queued = batch.len(), "Outgoing wait timeout reached");
                    }
                    return true;
                }
            }
        }
    }

    /// Commit `batch` and answer every request in it. Leaves `batch` empty.
    async fn commit(&self, batch: &mut Vec<UpdateRequest>) {
        let mut updates = Vec::with_capacity(batch.len());
        let mut waiters = Vec::with_capacity(batch.len());
        for req in batch.drain(..) {
            waiters.push((req.ctx.request_id, req.update.key.clone(), req.results));
            updates.push(req.update);
        }

        let sent = updates.len();
        tracing::trace!(
            batch_update_count = sent,
            "Sending state update batch to replicator"
        );
        let results = self.replicator.send_updates(updates).await;
        let received = results.len();
        if received != sent {
            tracing::error!(
                sent,
                received,
                "Replicator returned a result count that does not match the batch"
            );
        }

        let mut rejected = 0;
        let mut results = results.into_iter();
        for (request_id, key, tx) in waiters {
            let response = results.next().unwrap_or_else(|| {
                StateResponse::failed(key, CacheError::ResultCountMismatch { sent, received })
            });
            if !response.is_ok() {
                rejected += 1;
            }
            if tx.send(response).is_err() {
                tracing::trace!(%request_id, "Requester stopped waiting before its response arrived");
            }
        }
        self.counters.record_batch(sent - rejected, rejected);
        tracing::trace!(sent, rejected, "State update batch committed");
    }
}
