//! MVCC (Multi-Version Concurrency Control) subsystem
//!
//! Readers never block writers and writers never block readers:
//! - Every write appends a new revision; nothing is mutated in place
//! - Readers resolve the newest revision at or below their boundary
//! - Garbage collection removes revisions no snapshot can still see
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              VersionStore                         │
//! │  - One ordered Namespace per keyspace            │
//! │  - Each key: revision chain (seq, value|tomb)    │
//! ├──────────────────────────────────────────────────┤
//! │  SnapshotManager                                 │
//! │  - Refcounted sequence-number boundaries         │
//! │  - Oldest active boundary feeds GC               │
//! ├──────────────────────────────────────────────────┤
//! │  GarbageCollector                                │
//! │  - Reclaims revisions below the snapshot floor   │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod gc;
pub mod snapshot;
pub mod store;

pub use gc::{GarbageCollector, GcConfig, GcStats};
pub use snapshot::{Snapshot, SnapshotManager};
pub use store::{KeySpaceId, Namespace, Revision, RevisionChain, SeqNo, VersionStore};
