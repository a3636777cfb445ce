//! Queued update requests.

use omcache_types::{StateResponse, StateUpdate};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Caller context carried alongside an update.
///
/// The cancellation token is carried for the caller's benefit only: once a
/// request is admitted to a batch it is committed regardless.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlates the request across log lines.
    pub request_id: Uuid,
    pub cancel: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::with_cancel(CancellationToken::new())
    }

    #[must_use]
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            cancel,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One update waiting in the outgoing queue, with the channel its
/// [`StateResponse`] is delivered on.
#[derive(Debug)]
pub struct UpdateRequest {
    pub ctx: RequestContext,
    pub update: StateUpdate,
    pub results: oneshot::Sender<StateResponse>,
}

impl UpdateRequest {
    /// A request with a fresh context, and the receiver for its response.
    #[must_use]
    pub fn new(update: StateUpdate) -> (Self, oneshot::Receiver<StateResponse>) {
        Self::with_context(RequestContext::new(), update)
    }

    #[must_use]
    pub fn with_context(
        ctx: RequestContext,
        update: StateUpdate,
    ) -> (Self, oneshot::Receiver<StateResponse>) {
        let (results, rx) = oneshot::channel();
        (
            Self {
                ctx,
                update,
                results,
            },
            rx,
        )
    }
}
