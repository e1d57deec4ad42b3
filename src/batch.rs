//! Write Batch - Ordered mutations applied as one atomic unit
//!
//! Operations are staged in call order and may span keyspaces. The engine
//! applies a batch under a single new sequence number: either every
//! operation becomes visible at once, or none does.

use crate::keyspace::KeySpace;
use crate::mvcc::store::KeySpaceId;

// ============================================================================
// Operations
// ============================================================================

/// A single staged mutation
#[derive(Debug, Clone)]
pub enum Op {
    Put {
        keyspace: KeySpaceId,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        keyspace: KeySpaceId,
        key: Vec<u8>,
    },
    Merge {
        keyspace: KeySpaceId,
        key: Vec<u8>,
        operand: Vec<u8>,
    },
}

impl Op {
    pub fn keyspace(&self) -> KeySpaceId {
        match self {
            Op::Put { keyspace, .. } | Op::Delete { keyspace, .. } | Op::Merge { keyspace, .. } => {
                *keyspace
            }
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Op::Put { key, .. } | Op::Delete { key, .. } | Op::Merge { key, .. } => key,
        }
    }

    /// Bytes this operation will write (key plus payload)
    pub(crate) fn byte_len(&self) -> usize {
        match self {
            Op::Put { key, value, .. } => key.len() + value.len(),
            Op::Delete { key, .. } => key.len(),
            Op::Merge { key, operand, .. } => key.len() + operand.len(),
        }
    }
}

// ============================================================================
// Write Batch
// ============================================================================

/// An ordered, in-memory list of mutations across one or more keyspaces
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a put
    pub fn put(&mut self, ks: &KeySpace, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.ops.push(Op::Put {
            keyspace: ks.id(),
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        });
    }

    /// Stage a delete
    pub fn delete(&mut self, ks: &KeySpace, key: impl AsRef<[u8]>) {
        self.ops.push(Op::Delete {
            keyspace: ks.id(),
            key: key.as_ref().to_vec(),
        });
    }

    /// Stage a merge
    pub fn merge(&mut self, ks: &KeySpace, key: impl AsRef<[u8]>, operand: impl AsRef<[u8]>) {
        self.ops.push(Op::Merge {
            keyspace: ks.id(),
            key: key.as_ref().to_vec(),
            operand: operand.as_ref().to_vec(),
        });
    }

    /// Discard every staged operation
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Truncate to `len` operations (savepoint rollback)
    pub(crate) fn truncate(&mut self, len: usize) {
        self.ops.truncate(len);
    }

    #[cfg(test)]
    fn push(&mut self, op: Op) {
        self.ops.push(op);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ops_keep_call_order() {
        let mut batch = WriteBatch::new();
        batch.push(Op::Put {
            keyspace: 0,
            key: b"a".to_vec(),
            value: b"1".to_vec(),
        });
        batch.push(Op::Delete {
            keyspace: 0,
            key: b"b".to_vec(),
        });
        batch.push(Op::Merge {
            keyspace: 1,
            key: b"c".to_vec(),
            operand: b"3".to_vec(),
        });

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.ops()[0].key(), b"a");
        assert_eq!(batch.ops()[1].key(), b"b");
        assert_eq!(batch.ops()[2].keyspace(), 1);
    }

    #[test]
    fn test_clear() {
        let mut batch = WriteBatch::new();
        batch.push(Op::Put {
            keyspace: 0,
            key: b"a".to_vec(),
            value: b"1".to_vec(),
        });
        batch.clear();
        assert!(batch.is_empty());
    }
}
