//! The replicated ticket cache.
//!
//! [`ReplicatedTicketCache`] owns the [`TicketStore`], the inbound request
//! channel and the two background queues. Callers submit updates and read
//! state; they never write the store directly.
//!
//! ```text
//! let cache = ReplicatedTicketCache::builder(config, replicator).start()?;
//! let id = cache.create_ticket(&ticket).await?;
//! ```

use std::sync::Arc;

use omcache_replicator::StateReplicator;
use omcache_types::{
    Assignment, CacheConfig, CacheError, JsonCodec, PayloadCodec, Result, StateResponse,
    StateUpdate, Ticket,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::counters::{CacheCounters, CounterSnapshot};
use crate::incoming::IncomingQueue;
use crate::outgoing::OutgoingQueue;
use crate::request::UpdateRequest;
use crate::store::TicketStore;

/// Configures and starts a [`ReplicatedTicketCache`].
pub struct CacheBuilder {
    config: CacheConfig,
    replicator: Arc<dyn StateReplicator>,
    codec: Arc<dyn PayloadCodec>,
    span: Option<Span>,
}

impl CacheBuilder {
    /// Payload codec for tickets and assignments. Defaults to [`JsonCodec`].
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Parent span for every log line the cache emits.
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate the configuration and spawn the background queues.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] when the configuration is
    /// rejected by [`CacheConfig::validate`].
    pub fn start(self) -> Result<ReplicatedTicketCache> {
        self.config.validate()?;

        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("ticket_cache"));
        let store = Arc::new(TicketStore::new());
        let counters = Arc::new(CacheCounters::default());
        let shutdown = CancellationToken::new();
        let (requests, inbound) = mpsc::channel(self.config.request_queue_capacity);

        let outgoing = OutgoingQueue {
            replicator: Arc::clone(&self.replicator),
            requests: inbound,
            wait_timeout: self.config.outgoing_wait_timeout,
            max_batch_size: self.config.outgoing_max_batch_size,
            counters: Arc::clone(&counters),
        };
        let incoming = IncomingQueue::new(
            Arc::clone(&self.replicator),
            Arc::clone(&store),
            Arc::clone(&self.codec),
            Arc::clone(&counters),
            &self.config,
        );

        let tasks = vec![
            tokio::spawn(
                outgoing
                    .run(shutdown.clone())
                    .instrument(tracing::info_span!(parent: &span, "replication_queue", direction = "outgoing")),
            ),
            tokio::spawn(
                incoming
                    .run(shutdown.clone())
                    .instrument(tracing::info_span!(parent: &span, "replication_queue", direction = "incoming")),
            ),
        ];

        tracing::info!(
            parent: &span,
            version = omcache_types::constants::VERSION,
            ticket_ttl_ms = self.config.ticket_ttl.as_millis(),
            max_batch_size = self.config.outgoing_max_batch_size,
            request_queue_capacity = self.config.request_queue_capacity,
            "Replicated ticket cache started"
        );

        Ok(ReplicatedTicketCache {
            store,
            requests,
            replicator: self.replicator,
            codec: self.codec,
            counters,
            config: self.config,
            shutdown,
            tasks,
            span,
        })
    }
}

/// Local view of replicated ticket state, plus the submission surface.
pub struct ReplicatedTicketCache {
    store: Arc<TicketStore>,
    requests: mpsc::Sender<UpdateRequest>,
    replicator: Arc<dyn StateReplicator>,
    codec: Arc<dyn PayloadCodec>,
    counters: Arc<CacheCounters>,
    config: CacheConfig,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    span: Span,
}

impl ReplicatedTicketCache {
    pub fn builder(config: CacheConfig, replicator: Arc<dyn StateReplicator>) -> CacheBuilder {
        CacheBuilder {
            config,
            replicator,
            codec: Arc::new(JsonCodec),
            span: None,
        }
    }

    /// Start with the default codec and span.
    ///
    /// # Errors
    ///
    /// See [`CacheBuilder::start`].
    pub fn start(config: CacheConfig, replicator: Arc<dyn StateReplicator>) -> Result<Self> {
        Self::builder(config, replicator).start()
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Queue a request, waiting for room if the inbound channel is full.
    ///
    /// # Errors
    ///
    /// [`CacheError::QueueClosed`] once the cache has shut down.
    pub async fn enqueue(&self, req: UpdateRequest) -> Result<()> {
        self.requests
            .send(req)
            .await
            .map_err(|_| CacheError::QueueClosed)
    }

    /// Queue a request without waiting.
    ///
    /// # Errors
    ///
    /// [`CacheError::QueueFull`] when the inbound channel has no room,
    /// [`CacheError::QueueClosed`] once the cache has shut down.
    pub fn try_enqueue(&self, req: UpdateRequest) -> Result<()> {
        self.requests.try_send(req).map_err(|err| match err {
            TrySendError::Full(_) => CacheError::QueueFull,
            TrySendError::Closed(_) => CacheError::QueueClosed,
        })
    }

    /// Queue `update` and wait for the log's response.
    ///
    /// A per-item failure is carried inside the returned [`StateResponse`];
    /// `Err` means the request never got a response.
    ///
    /// # Errors
    ///
    /// [`CacheError::QueueClosed`] or [`CacheError::ResponseDropped`].
    pub async fn submit(&self, update: StateUpdate) -> Result<StateResponse> {
        let (req, rx) = UpdateRequest::new(update);
        tracing::trace!(
            parent: &self.span,
            request_id = %req.ctx.request_id,
            command = %req.update.command,
            "Submitting state update"
        );
        self.enqueue(req).await?;
        rx.await.map_err(|_| CacheError::ResponseDropped)
    }

    async fn submit_for_id(&self, update: StateUpdate) -> Result<String> {
        self.submit(update).await?.into_result()
    }

    /// Replicate a new ticket. Returns its log-assigned id.
    ///
    /// The ticket's own `id` is ignored; the id is always assigned by the log.
    ///
    /// # Errors
    ///
    /// Encoding, queue, or log errors.
    pub async fn create_ticket(&self, ticket: &Ticket) -> Result<String> {
        let payload = self.codec.encode_ticket(ticket)?;
        self.submit_for_id(StateUpdate::create_ticket(payload)).await
    }

    /// Make a ticket eligible for matchmaking.
    ///
    /// # Errors
    ///
    /// Queue or log errors.
    pub async fn activate(&self, id: &str) -> Result<String> {
        self.submit_for_id(StateUpdate::activate(id)).await
    }

    /// Withdraw a ticket from matchmaking.
    ///
    /// # Errors
    ///
    /// Queue or log errors.
    pub async fn deactivate(&self, id: &str) -> Result<String> {
        self.submit_for_id(StateUpdate::deactivate(id)).await
    }

    /// Record where a ticket's player should connect.
    ///
    /// # Errors
    ///
    /// Encoding, queue, or log errors.
    pub async fn assign(&self, id: &str, assignment: &Assignment) -> Result<String> {
        let payload = self.codec.encode_assignment(assignment)?;
        self.submit_for_id(StateUpdate::assign(id, payload)).await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn ticket(&self, id: &str) -> Option<Ticket> {
        self.store.ticket(id)
    }

    pub fn is_inactive(&self, id: &str) -> bool {
        self.store.is_inactive(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.store.is_active(id)
    }

    pub fn assignment(&self, id: &str) -> Option<Assignment> {
        self.store.assignment(id)
    }

    pub fn active_tickets(&self) -> Vec<Ticket> {
        self.store.active_tickets()
    }

    pub fn inactive_ids(&self) -> Vec<String> {
        self.store.inactive_ids()
    }

    pub fn ticket_count(&self) -> usize {
        self.store.ticket_count()
    }

    pub fn inactive_count(&self) -> usize {
        self.store.inactive_count()
    }

    pub fn assignment_count(&self) -> usize {
        self.store.assignment_count()
    }

    pub fn for_each_ticket(&self, f: impl FnMut(&str, &Ticket)) {
        self.store.for_each_ticket(f);
    }

    pub fn for_each_assignment(&self, f: impl FnMut(&str, &Assignment)) {
        self.store.for_each_assignment(f);
    }

    /// Digest of the local state; equal across caches at the same log position.
    pub fn digest(&self) -> String {
        self.store.digest()
    }

    /// Check that `id` has the shape of a log-assigned id.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidReplId`] when it does not.
    pub fn validate_ticket_id(&self, id: &str) -> Result<()> {
        if self.replicator.repl_id_validator().is_match(id) {
            Ok(())
        } else {
            Err(CacheError::InvalidReplId(id.to_string()))
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stop both queues and wait for them to exit.
    ///
    /// Requests already queued are committed and answered first.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                tracing::error!(parent: &self.span, error = %err, "Cache task failed");
            }
        }
        tracing::info!(parent: &self.span, "Replicated ticket cache stopped");
    }
}

impl Drop for ReplicatedTicketCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use omcache_replicator::MemoryReplicator;

    use super::*;

    fn start() -> ReplicatedTicketCache {
        let config = CacheConfig::fast();
        let repl = Arc::new(MemoryReplicator::in_memory(&config));
        ReplicatedTicketCache::start(config, repl).unwrap()
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = CacheConfig {
            outgoing_max_batch_size: 0,
            ..CacheConfig::fast()
        };
        let repl = Arc::new(MemoryReplicator::in_memory(&config));
        assert!(matches!(
            ReplicatedTicketCache::start(config, repl),
            Err(CacheError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn zero_timings_are_rejected_at_start() {
        for config in [
            CacheConfig {
                apply_hold_timeout: Duration::ZERO,
                ..CacheConfig::fast()
            },
            CacheConfig {
                incoming_poll_wait_timeout: Duration::ZERO,
                ..CacheConfig::fast()
            },
        ] {
            let repl = Arc::new(MemoryReplicator::in_memory(&config));
            assert!(matches!(
                ReplicatedTicketCache::start(config, repl),
                Err(CacheError::Configuration(_))
            ));
        }
    }

    #[tokio::test]
    async fn validate_ticket_id_uses_the_log_format() {
        let cache = start();
        assert!(cache.validate_ticket_id("1700000000000-0").is_ok());
        assert_eq!(
            cache.validate_ticket_id("t1"),
            Err(CacheError::InvalidReplId("t1".into()))
        );
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_update_fails_inside_the_response() {
        let cache = start();
        let response = cache.submit(StateUpdate::activate("")).await.unwrap();
        assert_eq!(response.error, Some(CacheError::MissingKey));
        assert_eq!(cache.activate("").await, Err(CacheError::MissingKey));
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn create_then_activate_round_trip() {
        let cache = start();
        let id = cache
            .create_ticket(&Ticket::dummy(Duration::from_secs(60)))
            .await
            .unwrap();
        cache.activate(&id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !cache.is_active(&id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("ticket became active");

        let active = cache.active_tickets();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn submissions_after_shutdown_fail() {
        let mut cache = start();
        cache.shutdown.cancel();
        for task in std::mem::take(&mut cache.tasks) {
            task.await.unwrap();
        }

        let (req, _rx) = UpdateRequest::new(StateUpdate::activate("a"));
        assert_eq!(cache.try_enqueue(req), Err(CacheError::QueueClosed));
        assert_eq!(
            cache.submit(StateUpdate::activate("a")).await,
            Err(CacheError::QueueClosed)
        );
    }
}
