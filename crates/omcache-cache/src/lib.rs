//! # omcache-cache
//!
//! **Replicated ticket cache**: a local, in-memory view of matchmaking
//! ticket state that every service instance keeps consistent by consuming
//! the same ordered replication log.
//!
//! ## Architecture
//!
//! 1. **TicketStore**: the three concurrent maps (tickets, inactive set,
//!    assignments), update application, and the expiration sweep
//! 2. **OutgoingQueue**: batches caller updates and commits them to the log
//! 3. **IncomingQueue**: polls the log in order, applies updates to the
//!    store, then expires stale entries
//! 4. **ReplicatedTicketCache**: owns the store and both queues; the
//!    submission and read surface for the API layer
//!
//! ## Update Flow
//!
//! ```text
//! caller → UpdateRequest → OutgoingQueue → log (commit, id assigned)
//!        ← StateResponse ←
//! log → IncomingQueue (poll) → TicketStore (apply, expire) → readers
//! ```
//!
//! Local state only ever changes through the log, so every instance
//! applies the same updates in the same order.

pub mod cache;
pub mod counters;
mod incoming;
mod outgoing;
pub mod request;
pub mod store;
pub mod telemetry;

pub use cache::{CacheBuilder, ReplicatedTicketCache};
pub use counters::{CacheCounters, CounterSnapshot};
pub use request::{RequestContext, UpdateRequest};
pub use store::{ExpirationReport, TicketStore};
pub use telemetry::{LogFormat, init_tracing};
