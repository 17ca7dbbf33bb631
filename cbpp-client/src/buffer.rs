//! # Value Buffers
//!
//! Purpose: Give a response value a lifetime independent of the native
//! callback that produced it.
//!
//! ## Design Principles
//!
//! 1. **One Owner Mode**: A buffer is empty, shares a pooled block, or owns a
//!    private copy. Never more than one.
//! 2. **Counted Sharing**: Cloning takes a reference (pool count or `Arc`
//!    strong count); dropping gives it back. Storage is freed exactly once,
//!    when the last reference goes away.
//! 3. **Failures Carry Nothing**: A buffer built from a failed response is
//!    empty, whatever the native layer left in the view.

use std::sync::Arc;

use cbpp_engine::BackBuf;

/// Payload buffer of a value-bearing response.
#[derive(Debug, Clone, Default)]
pub enum ValueBuf {
    #[default]
    Empty,
    /// Reference to a block owned by the instance's buffer pool.
    Shared(BackBuf),
    /// Private copy of a raw value.
    Owned(Arc<[u8]>),
}

impl ValueBuf {
    /// Builds the buffer for a successful response.
    ///
    /// A pooled handle is retained; a raw slice is copied.
    pub fn retain(value: &[u8], bufh: Option<&BackBuf>) -> Self {
        match bufh {
            Some(buf) => ValueBuf::Shared(buf.clone()),
            None if value.is_empty() => ValueBuf::Empty,
            None => ValueBuf::Owned(Arc::from(value)),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            ValueBuf::Empty => &[],
            ValueBuf::Shared(buf) => buf.as_slice(),
            ValueBuf::Owned(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, ValueBuf::Shared(_))
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, ValueBuf::Owned(_))
    }

    /// Number of live references to the underlying storage; zero when empty.
    pub fn refcount(&self) -> usize {
        match self {
            ValueBuf::Empty => 0,
            ValueBuf::Shared(buf) => buf.refcount(),
            ValueBuf::Owned(bytes) => Arc::strong_count(bytes),
        }
    }

    /// The private copy, when this buffer owns one.
    pub fn owned(&self) -> Option<&Arc<[u8]>> {
        match self {
            ValueBuf::Owned(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Drops this reference and leaves the buffer empty.
    pub fn clear(&mut self) {
        *self = ValueBuf::Empty;
    }
}

impl AsRef<[u8]> for ValueBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cbpp_engine::BufferPool;

    use super::*;

    #[test]
    fn raw_values_are_copied_and_freed_once() {
        let raw = b"raw value".to_vec();
        let buf = ValueBuf::retain(&raw, None);
        drop(raw);
        assert!(buf.is_owned());
        assert_eq!(buf.as_slice(), b"raw value");

        let weak = Arc::downgrade(buf.owned().unwrap());
        let copy = buf.clone();
        assert_eq!(copy.refcount(), 2);
        drop(buf);
        assert_eq!(copy.refcount(), 1);
        assert!(weak.upgrade().is_some());
        drop(copy);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn pooled_values_hold_a_pool_reference() {
        let pool = BufferPool::new();
        let native = pool.alloc(b"pooled");
        let buf = ValueBuf::retain(native.as_slice(), Some(&native));
        assert!(buf.is_shared());
        assert_eq!(buf.refcount(), 2);

        drop(native);
        assert_eq!(pool.stats().live, 1);
        let mut other = ValueBuf::default();
        other.clone_from(&buf);
        assert_eq!(other.refcount(), 2);

        drop(buf);
        other.clear();
        let stats = pool.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.released, 1);
    }

    #[test]
    fn empty_value_stays_empty() {
        let buf = ValueBuf::retain(&[], None);
        assert!(buf.is_empty());
        assert_eq!(buf.refcount(), 0);
        assert!(!buf.is_owned() && !buf.is_shared());
    }
}
