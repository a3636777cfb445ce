//! # omcache-types
//!
//! Shared types, errors, and configuration for the **replicated ticket cache**.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`ReplId`], [`ReplIdGenerator`], [`repl_id_validator`]
//! - **Payload model**: [`Ticket`], [`Assignment`]
//! - **Update envelopes**: [`Command`], [`StateUpdate`], [`StateResponse`]
//! - **Serialization**: [`PayloadCodec`], [`JsonCodec`]
//! - **Configuration**: [`CacheConfig`]
//! - **Errors**: [`CacheError`] with `OMC_ERR_` prefix codes
//! - **Constants**: defaults and protocol field names

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod ticket;
pub mod update;

// Re-export all primary types at crate root for ergonomic imports:
//   use omcache_types::{Ticket, StateUpdate, ReplId, ...};

pub use codec::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use ticket::*;
pub use update::*;

// Constants are accessed via `omcache_types::constants::FOO`
// (not re-exported to avoid name collisions).
