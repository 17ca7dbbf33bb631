//! # In-Memory Cluster
//!
//! Buckets shared by every `MemoryInstance` created against the same cluster,
//! plus the virtual clock used for expiry and locks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::store::ItemStore;

/// Name of the bucket created by `MemoryCluster::new`.
pub const DEFAULT_BUCKET: &str = "default";

/// One bucket: credentials plus its item table.
pub struct Bucket {
    name: String,
    password: Option<String>,
    created_at: u64,
    store: Mutex<ItemStore>,
}

impl Bucket {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if `password` opens the bucket.
    pub fn authenticate(&self, password: Option<&str>) -> bool {
        match &self.password {
            None => true,
            Some(expected) => password == Some(expected.as_str()),
        }
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn store(&self) -> MutexGuard<'_, ItemStore> {
        self.store.lock()
    }
}

struct ClusterInner {
    buckets: RwLock<HashMap<String, Arc<Bucket>, RandomState>>,
    clock_offset: AtomicU64,
}

/// Shared handle to a set of buckets.
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl MemoryCluster {
    /// Creates a cluster with an open `default` bucket.
    pub fn new() -> Self {
        let cluster = Self::empty();
        cluster.create_bucket(DEFAULT_BUCKET, None);
        cluster
    }

    /// Creates a cluster without buckets.
    pub fn empty() -> Self {
        MemoryCluster {
            inner: Arc::new(ClusterInner {
                buckets: RwLock::new(HashMap::with_hasher(RandomState::new())),
                clock_offset: AtomicU64::new(0),
            }),
        }
    }

    /// Creates (or replaces) a bucket.
    pub fn create_bucket(&self, name: &str, password: Option<&str>) -> Arc<Bucket> {
        let bucket = Arc::new(Bucket {
            name: name.to_string(),
            password: password.map(str::to_string),
            created_at: self.now(),
            store: Mutex::new(ItemStore::new()),
        });
        self.inner
            .buckets
            .write()
            .insert(name.to_string(), Arc::clone(&bucket));
        bucket
    }

    pub fn bucket(&self, name: &str) -> Option<Arc<Bucket>> {
        self.inner.buckets.read().get(name).cloned()
    }

    /// Current virtual time in Unix seconds.
    pub fn now(&self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        wall + self.inner.clock_offset.load(Ordering::Relaxed)
    }

    /// Moves the virtual clock forward.
    pub fn advance_clock(&self, secs: u64) {
        self.inner.clock_offset.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bucket_is_open() {
        let cluster = MemoryCluster::new();
        let bucket = cluster.bucket(DEFAULT_BUCKET).unwrap();
        assert!(bucket.authenticate(None));
        assert!(bucket.authenticate(Some("anything")));
        assert!(cluster.bucket("missing").is_none());
    }

    #[test]
    fn protected_bucket_checks_password() {
        let cluster = MemoryCluster::empty();
        let bucket = cluster.create_bucket("secure", Some("s3cret"));
        assert_eq!(bucket.name(), "secure");
        assert!(!bucket.authenticate(None));
        assert!(!bucket.authenticate(Some("wrong")));
        assert!(bucket.authenticate(Some("s3cret")));
    }

    #[test]
    fn clock_moves_forward() {
        let cluster = MemoryCluster::empty();
        let before = cluster.now();
        cluster.advance_clock(3600);
        assert!(cluster.now() >= before + 3600);
    }
}
