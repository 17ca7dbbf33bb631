//! # In-Memory Item Store
//!
//! Purpose: Hold one bucket's items and apply memcached-style mutation rules
//! (CAS checks, locks, expiry, counters) for the in-memory instance.
//!
//! ## Design Principles
//!
//! 1. **Lazy Expiry**: Expired items are purged when touched, keeping every
//!    operation O(1) without a background sweeper.
//! 2. **Explicit Time**: Every call takes `now` (Unix seconds) so the caller
//!    owns the clock and tests can move it.
//! 3. **Status Results**: Failures are native status codes, never panics.

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;

use cbpp_common::{RELATIVE_EXPIRY_LIMIT, Status, StoreMode};

/// Default and maximum lock durations in seconds.
const DEFAULT_LOCK_SECS: u32 = 15;
const MAX_LOCK_SECS: u32 = 30;

#[derive(Debug, Clone)]
struct Item {
    value: Bytes,
    flags: u32,
    cas: u64,
    /// Absolute Unix seconds; zero means no expiry.
    expires_at: u64,
    /// Absolute Unix seconds; zero means unlocked.
    locked_until: u64,
}

impl Item {
    fn expired(&self, now: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }

    fn locked(&self, now: u64) -> bool {
        self.locked_until != 0 && self.locked_until > now
    }
}

/// Value returned by a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    pub value: Bytes,
    pub flags: u32,
    pub cas: u64,
}

/// Operation counters exposed through stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    pub cmd_get: u64,
    pub cmd_set: u64,
}

/// Converts a request expiry into an absolute deadline.
pub fn absolute_expiry(expiry: u32, now: u64) -> u64 {
    match expiry {
        0 => 0,
        e if e <= RELATIVE_EXPIRY_LIMIT => now + u64::from(e),
        e => u64::from(e),
    }
}

/// Item table for one bucket.
pub struct ItemStore {
    items: HashMap<Bytes, Item, RandomState>,
    next_cas: u64,
    counters: StoreCounters,
}

impl ItemStore {
    pub fn new() -> Self {
        ItemStore {
            items: HashMap::with_hasher(RandomState::new()),
            next_cas: 0x1000,
            counters: StoreCounters::default(),
        }
    }

    fn bump_cas(&mut self) -> u64 {
        self.next_cas += 1;
        self.next_cas
    }

    /// Returns the live item for `key`, purging it if expired.
    fn live(&mut self, key: &[u8], now: u64) -> Option<&mut Item> {
        let expired = self.items.get(key).is_some_and(|item| item.expired(now));
        if expired {
            self.items.remove(key);
            return None;
        }
        self.items.get_mut(key)
    }

    fn check_mutable(item: &Item, cas: u64, now: u64) -> Result<(), Status> {
        if item.locked(now) {
            if cas != item.cas {
                return Err(Status::ETMPFAIL);
            }
        } else if cas != 0 && cas != item.cas {
            return Err(Status::KEY_EEXISTS);
        }
        Ok(())
    }

    pub fn get(
        &mut self,
        key: &[u8],
        expiry: u32,
        lock: bool,
        now: u64,
    ) -> Result<ItemView, Status> {
        self.counters.cmd_get += 1;
        let next_cas = self.next_cas + 1;
        let item = self.live(key, now).ok_or(Status::KEY_ENOENT)?;
        if lock {
            if item.locked(now) {
                return Err(Status::ETMPFAIL);
            }
            let secs = match expiry {
                0 => DEFAULT_LOCK_SECS,
                e => e.min(MAX_LOCK_SECS),
            };
            item.locked_until = now + u64::from(secs);
            item.cas = next_cas;
        } else if expiry != 0 {
            item.expires_at = absolute_expiry(expiry, now);
        }
        let view = ItemView {
            value: item.value.clone(),
            flags: item.flags,
            cas: item.cas,
        };
        if lock {
            self.next_cas = next_cas;
        }
        Ok(view)
    }

    /// Applies a store request and returns the new CAS.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &mut self,
        key: &[u8],
        value: &[u8],
        mode: StoreMode,
        flags: u32,
        expiry: u32,
        cas: u64,
        now: u64,
    ) -> Result<u64, Status> {
        self.counters.cmd_set += 1;
        let existing = self.live(key, now).map(|item| item.clone());
        let new_value = match (&existing, mode) {
            (Some(_), StoreMode::Add) => return Err(Status::KEY_EEXISTS),
            (None, StoreMode::Replace) => return Err(Status::KEY_ENOENT),
            (None, StoreMode::Append | StoreMode::Prepend) => return Err(Status::NOT_STORED),
            (None, StoreMode::Upsert) if cas != 0 => return Err(Status::KEY_ENOENT),
            (Some(item), StoreMode::Append) => {
                Self::check_mutable(item, cas, now)?;
                let mut joined = Vec::with_capacity(item.value.len() + value.len());
                joined.extend_from_slice(&item.value);
                joined.extend_from_slice(value);
                Bytes::from(joined)
            }
            (Some(item), StoreMode::Prepend) => {
                Self::check_mutable(item, cas, now)?;
                let mut joined = Vec::with_capacity(item.value.len() + value.len());
                joined.extend_from_slice(value);
                joined.extend_from_slice(&item.value);
                Bytes::from(joined)
            }
            (Some(item), _) => {
                Self::check_mutable(item, cas, now)?;
                Bytes::copy_from_slice(value)
            }
            (None, _) => Bytes::copy_from_slice(value),
        };

        let (flags, expires_at) = match (&existing, mode) {
            (Some(item), StoreMode::Append | StoreMode::Prepend) => (item.flags, item.expires_at),
            _ => (flags, absolute_expiry(expiry, now)),
        };
        let new_cas = self.bump_cas();
        self.items.insert(
            Bytes::copy_from_slice(key),
            Item {
                value: new_value,
                flags,
                cas: new_cas,
                expires_at,
                locked_until: 0,
            },
        );
        Ok(new_cas)
    }

    /// Applies a counter request and returns the new value and CAS.
    pub fn counter(
        &mut self,
        key: &[u8],
        delta: i64,
        initial: Option<u64>,
        expiry: u32,
        now: u64,
    ) -> Result<(u64, u64), Status> {
        self.counters.cmd_set += 1;
        let current = match self.live(key, now) {
            Some(item) => {
                Self::check_mutable(item, 0, now)?;
                let text = std::str::from_utf8(&item.value).map_err(|_| Status::DELTA_BADVAL)?;
                let current: u64 = text.trim().parse().map_err(|_| Status::DELTA_BADVAL)?;
                Some((current, item.flags, item.expires_at))
            }
            None => None,
        };

        let (value, flags, expires_at) = match current {
            Some((current, flags, expires_at)) => {
                let next = if delta >= 0 {
                    current.wrapping_add(delta as u64)
                } else {
                    current.saturating_sub(delta.unsigned_abs())
                };
                (next, flags, expires_at)
            }
            None => match initial {
                Some(initial) => (initial, 0, absolute_expiry(expiry, now)),
                None => return Err(Status::KEY_ENOENT),
            },
        };

        let new_cas = self.bump_cas();
        self.items.insert(
            Bytes::copy_from_slice(key),
            Item {
                value: Bytes::from(value.to_string()),
                flags,
                cas: new_cas,
                expires_at,
                locked_until: 0,
            },
        );
        Ok((value, new_cas))
    }

    /// Removes an item and returns the CAS of the deletion.
    pub fn remove(&mut self, key: &[u8], cas: u64, now: u64) -> Result<u64, Status> {
        let item = self.live(key, now).ok_or(Status::KEY_ENOENT)?;
        Self::check_mutable(item, cas, now)?;
        self.items.remove(key);
        Ok(self.bump_cas())
    }

    pub fn touch(&mut self, key: &[u8], expiry: u32, now: u64) -> Result<u64, Status> {
        let next_cas = self.next_cas + 1;
        let item = self.live(key, now).ok_or(Status::KEY_ENOENT)?;
        if item.locked(now) {
            return Err(Status::ETMPFAIL);
        }
        item.expires_at = absolute_expiry(expiry, now);
        item.cas = next_cas;
        self.next_cas = next_cas;
        Ok(next_cas)
    }

    pub fn unlock(&mut self, key: &[u8], cas: u64, now: u64) -> Result<(), Status> {
        let item = self.live(key, now).ok_or(Status::KEY_ENOENT)?;
        if !item.locked(now) || item.cas != cas {
            return Err(Status::ETMPFAIL);
        }
        item.locked_until = 0;
        Ok(())
    }

    /// Returns the CAS of a live item without counting a read.
    pub fn peek_cas(&mut self, key: &[u8], now: u64) -> Option<u64> {
        self.live(key, now).map(|item| item.cas)
    }

    /// Number of live items (expired entries not yet purged are excluded).
    pub fn len(&self, now: u64) -> usize {
        self.items.values().filter(|item| !item.expired(now)).count()
    }

    pub fn is_empty(&self, now: u64) -> bool {
        self.len(now) == 0
    }

    pub fn counters(&self) -> StoreCounters {
        self.counters
    }
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new()
    }
}
