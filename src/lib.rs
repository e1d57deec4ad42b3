//! StrataDB Storage Engine
//!
//! An embeddable, in-process, transactional key-value storage engine.
//! Keys and values are raw byte strings; keys iterate in unsigned
//! byte-lexicographic order. The engine provides multiple isolated
//! keyspaces (column families), atomic multi-key write batches,
//! point-in-time snapshots, bidirectional iterators, and two transaction
//! disciplines: pessimistic (fail-fast per-key locks) and optimistic
//! (read-set validation at commit).

pub mod batch;
pub mod config;
pub mod engine;
pub mod iter;
pub mod keyspace;
pub mod mvcc;
pub mod stats;
pub mod txn;

// Re-export main types
pub use batch::{Op, WriteBatch};
pub use config::{MergeOperator, Options};
pub use engine::Engine;
pub use iter::Iter;
pub use keyspace::KeySpace;
pub use mvcc::gc::{GcConfig, GcStats};
pub use mvcc::snapshot::Snapshot;
pub use mvcc::store::{KeySpaceId, SeqNo};
pub use stats::{Histogram, HistogramData, Statistics, Ticker};
pub use txn::transaction::{Transaction, TxnMode, TxnState};

/// Storage engine error type
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("keyspace '{0}' is closed")]
    KeySpaceClosed(String),

    #[error("keyspace already exists: {0}")]
    KeySpaceExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("engine is closed")]
    EngineClosed,

    #[error("cannot close: {transactions} transaction(s) and {iterators} iterator(s) still open")]
    Busy { transactions: usize, iterators: usize },

    #[error("transaction is finished (committed or rolled back)")]
    TransactionFinished,

    #[error("cannot drop the default keyspace")]
    CannotDropDefaultKeySpace,
}

impl StrataError {
    /// Whether the caller can recover by retrying the whole transaction
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrataError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;
