//! Engine Options - Open-time configuration
//!
//! Plain configuration data passed to `Engine::open`. Nothing here is
//! mutable after open; tuning a running engine means reopening it.

use std::fmt;
use std::sync::Arc;

use crate::mvcc::gc::GcConfig;

/// Caller-supplied associative merge function.
///
/// Invoked at apply time with the key, the prior visible value (if any)
/// and the merge operand. Returning `None` counts a merge failure and
/// stores the operand as a plain put.
pub type MergeOperator =
    Arc<dyn Fn(&[u8], Option<&[u8]>, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Options for opening an [`Engine`](crate::Engine)
#[derive(Clone)]
pub struct Options {
    /// Create the data directory if it does not exist
    pub create_if_missing: bool,
    /// Fail open() if the data directory already exists
    pub error_if_exists: bool,
    /// Merge function applied by `merge` operations; batches containing
    /// merge operations are rejected when this is unset
    pub merge_operator: Option<MergeOperator>,
    /// Garbage-collection tuning
    pub gc: GcConfig,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_if_missing(mut self, yes: bool) -> Self {
        self.create_if_missing = yes;
        self
    }

    pub fn error_if_exists(mut self, yes: bool) -> Self {
        self.error_if_exists = yes;
        self
    }

    pub fn merge_operator(mut self, op: MergeOperator) -> Self {
        self.merge_operator = Some(op);
        self
    }

    pub fn gc_config(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            merge_operator: None,
            gc: GcConfig::default(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("merge_operator", &self.merge_operator.is_some())
            .field("gc", &self.gc)
            .finish()
    }
}
