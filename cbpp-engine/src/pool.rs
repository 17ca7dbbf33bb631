//! # Back-Buffer Pool
//!
//! Purpose: Own the memory of value payloads delivered to the binding layer
//! without a copy.
//!
//! ## Design Principles
//!
//! 1. **Pool-Owned Release**: Handles only adjust a count; the pool alone
//!    retires a block, exactly when the count reaches zero.
//! 2. **Lock-Free Reads**: A handle carries its own view of the bytes, so
//!    reading a value never touches the pool lock.
//! 3. **Observable Accounting**: Allocation and release counters let callers
//!    verify that every block is retired exactly once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;

/// Snapshot of pool accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Blocks handed out since creation.
    pub allocated: u64,
    /// Blocks currently referenced.
    pub live: u64,
    /// Blocks retired because their count reached zero.
    pub released: u64,
}

struct Block {
    refs: usize,
    // Keeps the pool's own reference to the bytes until release.
    _data: Bytes,
}

struct PoolShared {
    blocks: Mutex<HashMap<u64, Block, RandomState>>,
    next_id: AtomicU64,
    allocated: AtomicU64,
    released: AtomicU64,
}

impl PoolShared {
    fn incref(&self, id: u64) {
        let mut blocks = self.blocks.lock();
        if let Some(block) = blocks.get_mut(&id) {
            block.refs += 1;
        }
    }

    fn decref(&self, id: u64) {
        let mut blocks = self.blocks.lock();
        let retire = match blocks.get_mut(&id) {
            Some(block) => {
                block.refs -= 1;
                block.refs == 0
            }
            None => false,
        };
        if retire {
            blocks.remove(&id);
            self.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn refs(&self, id: u64) -> usize {
        self.blocks.lock().get(&id).map_or(0, |block| block.refs)
    }
}

/// Allocator for pooled value buffers.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            shared: Arc::new(PoolShared {
                blocks: Mutex::new(HashMap::with_hasher(RandomState::new())),
                next_id: AtomicU64::new(1),
                allocated: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Copies `data` into a new block and returns the first handle to it.
    pub fn alloc(&self, data: &[u8]) -> BackBuf {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let data = Bytes::copy_from_slice(data);
        self.shared.blocks.lock().insert(
            id,
            Block {
                refs: 1,
                _data: data.clone(),
            },
        );
        self.shared.allocated.fetch_add(1, Ordering::Relaxed);
        BackBuf {
            pool: Arc::clone(&self.shared),
            id,
            data,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.shared.allocated.load(Ordering::Relaxed),
            live: self.shared.blocks.lock().len() as u64,
            released: self.shared.released.load(Ordering::Relaxed),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Counted handle to one pooled block.
///
/// Cloning takes another reference; dropping gives one back.
pub struct BackBuf {
    pool: Arc<PoolShared>,
    id: u64,
    data: Bytes,
}

impl BackBuf {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Block identifier within its pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current number of handles to this block.
    pub fn refcount(&self) -> usize {
        self.pool.refs(self.id)
    }
}

impl Clone for BackBuf {
    fn clone(&self) -> Self {
        self.pool.incref(self.id);
        BackBuf {
            pool: Arc::clone(&self.pool),
            id: self.id,
            data: self.data.clone(),
        }
    }
}

impl Drop for BackBuf {
    fn drop(&mut self) {
        self.pool.decref(self.id);
    }
}

impl fmt::Debug for BackBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackBuf")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}
