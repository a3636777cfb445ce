//! # omcache-replicator
//!
//! **Replication log plane**: the ordered, append-only log every cache
//! instance writes to and reads from.
//!
//! ## Architecture
//!
//! 1. **StateReplicator**: the contract the cache depends on: batched
//!    commits with positional results, cursor-based ordered reads
//! 2. **StreamBackend**: the primitive a concrete log provides: atomic
//!    append, read-after-cursor with a bounded block, trim by minimum id
//! 3. **StreamReplicator**: implements the contract over any backend:
//!    field encoding, per-item validation, cursor ownership, TTL trimming
//! 4. **MemoryStream**: single-process backend for tests and local runs
//!
//! ## Update Flow
//!
//! ```text
//! send_updates([u0..un]) → encode/validate → append → trim → [r0..rn]
//! get_updates()          → read_after(cursor) → decode → advance cursor
//! ```

pub mod memory;
pub mod replicator;
pub mod stream;
pub mod stream_replicator;

pub use memory::MemoryStream;
pub use replicator::StateReplicator;
pub use stream::{Fields, StreamBackend, StreamEntry, decode_entry, encode_update};
pub use stream_replicator::{MemoryReplicator, StreamReplicator};
