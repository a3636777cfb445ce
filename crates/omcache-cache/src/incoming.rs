//! Incoming replication queue.
//!
//! Two cooperating tasks joined by a bounded, ordered channel:
//!
//! - the **poller** reads batches from the log and forwards them in log
//!   order, then waits out the rest of its poll interval
//! - the **applier** drains the channel into the store (bounded by the hold
//!   timeout), runs the expiration sweep, then sleeps for the apply interval
//!
//! The poller blocks when the channel is full, so no update is ever dropped
//! between the log and the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use omcache_replicator::StateReplicator;
use omcache_types::{CacheConfig, PayloadCodec, StateUpdate};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::counters::CacheCounters;
use crate::store::{ExpirationReport, TicketStore};

pub(crate) struct IncomingQueue {
    pub(crate) replicator: Arc<dyn StateReplicator>,
    pub(crate) store: Arc<TicketStore>,
    pub(crate) codec: Arc<dyn PayloadCodec>,
    pub(crate) counters: Arc<CacheCounters>,
    pub(crate) poll_interval: Duration,
    pub(crate) apply_interval: Duration,
    pub(crate) hold_timeout: Duration,
    pub(crate) ticket_ttl: Duration,
    pub(crate) assignment_ttl: Duration,
    pub(crate) channel_capacity: usize,
}

impl IncomingQueue {
    pub(crate) fn new(
        replicator: Arc<dyn StateReplicator>,
        store: Arc<TicketStore>,
        codec: Arc<dyn PayloadCodec>,
        counters: Arc<CacheCounters>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            replicator,
            store,
            codec,
            counters,
            poll_interval: config.incoming_poll_wait_timeout,
            apply_interval: config.incoming_apply_interval,
            hold_timeout: config.apply_hold_timeout,
            ticket_ttl: config.ticket_ttl,
            assignment_ttl: config.assignment_ttl(),
            channel_capacity: config.incoming_max_updates_per_poll.max(1),
        }
    }

    /// Run the poller and the applier until `shutdown` fires.
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        tracing::debug!(
            poll_interval_ms = self.poll_interval.as_millis(),
            apply_interval_ms = self.apply_interval.as_millis(),
            "Listening for replicated updates"
        );
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let poller = tokio::spawn(
            poll_loop(
                Arc::clone(&self.replicator),
                tx,
                self.poll_interval,
                Arc::clone(&self.counters),
                shutdown.clone(),
            )
            .instrument(tracing::debug_span!("poller", component = "incoming_poll")),
        );

        self.apply_loop(rx, &shutdown).await;

        if let Err(err) = poller.await {
            tracing::error!(error = %err, "Replication poller task failed");
        }
        tracing::debug!("Incoming replication queue stopped");
    }

    async fn apply_loop(&self, mut rx: mpsc::Receiver<StateUpdate>, shutdown: &CancellationToken) {
        loop {
            self.drain(&mut rx);
            self.expire();

            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                () = sleep(self.apply_interval) => {}
            }
        }
    }

    /// Apply queued updates in arrival order until the channel is empty or
    /// the hold timeout elapses. At least one queued update is applied per
    /// call. Returns the number of updates taken.
    pub(crate) fn drain(&self, rx: &mut mpsc::Receiver<StateUpdate>) -> usize {
        let deadline = Instant::now() + self.hold_timeout;
        let mut taken = 0;
        loop {
            match rx.try_recv() {
                Ok(update) => {
                    self.apply(&update);
                    taken += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
            if Instant::now() >= deadline && !rx.is_empty() {
                self.counters.record_hold_timeout();
                tracing::trace!(taken, "Apply hold timeout reached; resuming next cycle");
                break;
            }
        }
        if taken > 0 {
            tracing::trace!(taken, "Applied replicated updates");
        }
        taken
    }

    fn apply(&self, update: &StateUpdate) {
        match self.store.apply(update, self.codec.as_ref()) {
            Ok(()) => {
                self.counters.record_applied();
                tracing::trace!(command = %update.command, key = %update.key, "Update applied");
            }
            Err(err) => {
                self.counters.record_apply_failure();
                tracing::error!(
                    command = %update.command,
                    key = %update.key,
                    error = %err,
                    "Replicated update could not be decoded; skipped"
                );
            }
        }
    }

    fn expire(&self) -> ExpirationReport {
        let report = self
            .store
            .expire_at(Utc::now(), self.ticket_ttl, self.assignment_ttl);
        self.counters.record_sweep(&report);
        if report.total_expired() > 0 {
            tracing::debug!(
                inactive_expired = report.inactive_expired,
                tickets_expired = report.tickets_expired,
                assignments_expired = report.assignments_expired,
                elapsed_us = report.elapsed.as_micros(),
                "Expired stale entries"
            );
        }
        tracing::trace!(
            inactive = report.inactive_remaining,
            tickets = report.tickets_remaining,
            assignments = report.assignments_remaining,
            "Local cache size after expiration"
        );
        report
    }
}

async fn poll_loop(
    replicator: Arc<dyn StateReplicator>,
    tx: mpsc::Sender<StateUpdate>,
    interval: Duration,
    counters: Arc<CacheCounters>,
    shutdown: CancellationToken,
) {
    loop {
        let deadline = Instant::now() + interval;

        let updates = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            updates = replicator.get_updates() => updates,
        };
        if updates.is_empty() {
            counters.record_empty_poll();
        } else {
            tracing::trace!(count = updates.len(), "Received updates from replication log");
        }

        for update in updates {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                sent = tx.send(update) => if sent.is_err() {
                    return;
                },
            }
        }

        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            () = sleep_until(deadline) => {}
        }
    }
}
