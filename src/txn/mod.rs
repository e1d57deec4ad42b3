//! Transaction subsystem
//!
//! Two concurrency-control disciplines over the same staging machinery:
//! - Pessimistic: `get_for_update` takes a fail-fast exclusive per-key
//!   lock held until the transaction ends
//! - Optimistic: `get_for_update` records the observed sequence number;
//!   commit validates the whole read set under the commit lock
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  Transaction                                     │
//! │  - Private WriteBatch, read-your-own-writes      │
//! │  - Read set, savepoint stack, optional snapshot  │
//! ├──────────────────────────────────────────────────┤
//! │  TxnManager                                      │
//! │  - Monotonic transaction IDs                     │
//! │  - Optimistic read-set validation                │
//! ├──────────────────────────────────────────────────┤
//! │  LockTable                                       │
//! │  - Exclusive advisory per-key locks              │
//! │  - Non-blocking: conflict fails immediately      │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod lock;
pub mod manager;
pub mod transaction;

pub use lock::LockTable;
pub use manager::{TxnId, TxnManager};
pub use transaction::{Transaction, TxnMode, TxnState};
