//! The replication log contract.

use async_trait::async_trait;
use omcache_types::{StateResponse, StateUpdate};
use regex::Regex;

/// An ordered, append-only log shared by every cache instance.
///
/// The log is the only authority on update order and the only source of
/// replication ids. Implementations must:
///
/// - deliver every entry exactly once per replicator, in increasing id
///   order, without gaps ([`get_updates`](Self::get_updates));
/// - commit a batch as one append and answer with exactly one response per
///   input, in input order ([`send_updates`](Self::send_updates));
/// - fail a malformed update on its own without failing its siblings;
/// - key entries with `<13-digit millis>-<seq>` ids.
#[async_trait]
pub trait StateReplicator: Send + Sync {
    /// Updates committed since the previous call, in log order.
    ///
    /// Blocks for a bounded time when nothing is pending and then returns an
    /// empty vector. Transport errors are logged and also yield an empty
    /// vector; the next call retries from the same position.
    async fn get_updates(&self) -> Vec<StateUpdate>;

    /// Commit a batch of updates.
    ///
    /// Returns one response per update, positionally. Every call also trims
    /// entries older than the ticket TTL from the log.
    async fn send_updates(&self, updates: Vec<StateUpdate>) -> Vec<StateResponse>;

    /// Pattern matching the ids this log assigns.
    fn repl_id_validator(&self) -> &Regex {
        omcache_types::repl_id_validator()
    }
}
