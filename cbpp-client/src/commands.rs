//! # Commands
//!
//! Purpose: Typed request builders. A command borrows its key and value, so
//! the borrow checker keeps the bytes alive for as long as the command can
//! still be scheduled.

use cbpp_common::{Cookie, Status, StoreMode};
use cbpp_engine::{Instance, NativeCommand};

use crate::mctx::MultiContext;
use crate::response::{
    CounterResponse, GetResponse, ObserveResponse, ResponseKind, StatsResponse, StoreResponse,
};

/// A command that can be added to a `Context`.
pub trait Operation {
    /// Response type produced for this command.
    type Response: ResponseKind;

    fn to_native(&self) -> NativeCommand<'_>;

    /// Schedules the command on `instance` under `cookie`.
    fn schedule(&self, instance: &mut dyn Instance, cookie: Cookie) -> Status {
        instance.schedule(cookie, &self.to_native())
    }
}

fn bytes_of<K: AsRef<[u8]> + ?Sized>(key: &K) -> &[u8] {
    key.as_ref()
}

/// Retrieves an item, optionally touching or locking it.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetCommand<'a> {
    key: &'a [u8],
    expiry: u32,
    lock: bool,
}

impl<'a> GetCommand<'a> {
    pub fn new<K: AsRef<[u8]> + ?Sized>(key: &'a K) -> Self {
        GetCommand { key: bytes_of(key), expiry: 0, lock: false }
    }

    /// Get-and-touch: resets the expiry while reading.
    pub fn expiry(mut self, secs: u32) -> Self {
        self.expiry = secs;
        self
    }

    /// Get-and-lock for `secs` seconds.
    pub fn locktime(mut self, secs: u32) -> Self {
        self.expiry = secs;
        self.lock = true;
        self
    }

    pub fn key(&self) -> &'a [u8] {
        self.key
    }
}

impl Operation for GetCommand<'_> {
    type Response = GetResponse;

    fn to_native(&self) -> NativeCommand<'_> {
        NativeCommand::Get { key: self.key, expiry: self.expiry, lock: self.lock }
    }
}

/// Stores an item. The mode defaults to upsert.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCommand<'a> {
    key: &'a [u8],
    value: &'a [u8],
    mode: StoreMode,
    flags: u32,
    expiry: u32,
    cas: u64,
}

impl<'a> StoreCommand<'a> {
    pub fn new<K, V>(key: &'a K, value: &'a V) -> Self
    where
        K: AsRef<[u8]> + ?Sized,
        V: AsRef<[u8]> + ?Sized,
    {
        StoreCommand {
            key: bytes_of(key),
            value: value.as_ref(),
            ..StoreCommand::default()
        }
    }

    pub fn mode(mut self, mode: StoreMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn itemflags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn expiry(mut self, secs: u32) -> Self {
        self.expiry = secs;
        self
    }

    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn key(&self) -> &'a [u8] {
        self.key
    }
}

impl Operation for StoreCommand<'_> {
    type Response = StoreResponse;

    fn to_native(&self) -> NativeCommand<'_> {
        NativeCommand::Store {
            key: self.key,
            value: self.value,
            mode: self.mode,
            flags: self.flags,
            expiry: self.expiry,
            cas: self.cas,
        }
    }
}

/// Adjusts a numeric item.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterCommand<'a> {
    key: &'a [u8],
    delta: i64,
    initial: Option<u64>,
    expiry: u32,
}

impl<'a> CounterCommand<'a> {
    pub fn new<K: AsRef<[u8]> + ?Sized>(key: &'a K, delta: i64) -> Self {
        CounterCommand { key: bytes_of(key), delta, ..CounterCommand::default() }
    }

    /// Value used to create the item when it does not exist.
    pub fn initial(mut self, value: u64) -> Self {
        self.initial = Some(value);
        self
    }

    pub fn expiry(mut self, secs: u32) -> Self {
        self.expiry = secs;
        self
    }
}

impl Operation for CounterCommand<'_> {
    type Response = CounterResponse;

    fn to_native(&self) -> NativeCommand<'_> {
        NativeCommand::Counter {
            key: self.key,
            delta: self.delta,
            initial: self.initial,
            expiry: self.expiry,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveCommand<'a> {
    key: &'a [u8],
    cas: u64,
}

impl<'a> RemoveCommand<'a> {
    pub fn new<K: AsRef<[u8]> + ?Sized>(key: &'a K) -> Self {
        RemoveCommand { key: bytes_of(key), cas: 0 }
    }

    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

impl Operation for RemoveCommand<'_> {
    type Response = StoreResponse;

    fn to_native(&self) -> NativeCommand<'_> {
        NativeCommand::Remove { key: self.key, cas: self.cas }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TouchCommand<'a> {
    key: &'a [u8],
    expiry: u32,
}

impl<'a> TouchCommand<'a> {
    pub fn new<K: AsRef<[u8]> + ?Sized>(key: &'a K, expiry: u32) -> Self {
        TouchCommand { key: bytes_of(key), expiry }
    }
}

impl Operation for TouchCommand<'_> {
    type Response = StoreResponse;

    fn to_native(&self) -> NativeCommand<'_> {
        NativeCommand::Touch { key: self.key, expiry: self.expiry }
    }
}

/// Releases a lock taken with `GetCommand::locktime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlockCommand<'a> {
    key: &'a [u8],
    cas: u64,
}

impl<'a> UnlockCommand<'a> {
    pub fn new<K: AsRef<[u8]> + ?Sized>(key: &'a K, cas: u64) -> Self {
        UnlockCommand { key: bytes_of(key), cas }
    }
}

impl Operation for UnlockCommand<'_> {
    type Response = StoreResponse;

    fn to_native(&self) -> NativeCommand<'_> {
        NativeCommand::Unlock { key: self.key, cas: self.cas }
    }
}

/// Requests statistics; an empty group selects the default set.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsCommand<'a> {
    key: &'a [u8],
}

impl<'a> StatsCommand<'a> {
    pub fn new<K: AsRef<[u8]> + ?Sized>(group: &'a K) -> Self {
        StatsCommand { key: bytes_of(group) }
    }
}

impl Operation for StatsCommand<'_> {
    type Response = StatsResponse;

    fn to_native(&self) -> NativeCommand<'_> {
        NativeCommand::Stats { key: self.key }
    }
}

/// Probes a key on its master and (optionally) its replicas.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObserveCommand<'a> {
    key: &'a [u8],
    master_only: bool,
}

impl<'a> ObserveCommand<'a> {
    pub fn new<K: AsRef<[u8]> + ?Sized>(key: &'a K) -> Self {
        ObserveCommand { key: bytes_of(key), master_only: false }
    }

    pub fn master_only(mut self, value: bool) -> Self {
        self.master_only = value;
        self
    }
}

impl Operation for ObserveCommand<'_> {
    type Response = ObserveResponse;

    fn to_native(&self) -> NativeCommand<'_> {
        NativeCommand::Observe { key: self.key, master_only: self.master_only }
    }

    fn schedule(&self, instance: &mut dyn Instance, cookie: Cookie) -> Status {
        let cursor = match instance.observe_ctx() {
            Ok(cursor) => cursor,
            Err(rc) => return rc,
        };
        let mut mctx = MultiContext::new(cursor);
        let rc = mctx.add(&self.to_native());
        if !rc.success() {
            return rc;
        }
        mctx.done(instance, cookie)
    }
}

/// Waits for a key to meet durability requirements. Added through an
/// `EndureContext`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndureCommand<'a> {
    key: &'a [u8],
    cas: u64,
}

impl<'a> EndureCommand<'a> {
    pub fn new<K: AsRef<[u8]> + ?Sized>(key: &'a K) -> Self {
        EndureCommand { key: bytes_of(key), cas: 0 }
    }

    /// Require the item to still carry `cas`.
    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn key(&self) -> &'a [u8] {
        self.key
    }

    pub fn to_native(&self) -> NativeCommand<'a> {
        NativeCommand::Endure { key: self.key, cas: self.cas }
    }
}

#[cfg(test)]
mod tests {
    use cbpp_common::CallbackType;

    use super::*;

    #[test]
    fn builders_fill_native_fields() {
        let cmd = StoreCommand::new("k", "v").mode(StoreMode::Add).itemflags(3).expiry(10).cas(7);
        assert_eq!(
            cmd.to_native(),
            NativeCommand::Store {
                key: b"k",
                value: b"v",
                mode: StoreMode::Add,
                flags: 3,
                expiry: 10,
                cas: 7,
            }
        );

        let get = GetCommand::new("k").locktime(5);
        assert_eq!(get.to_native(), NativeCommand::Get { key: b"k", expiry: 5, lock: true });

        let counter = CounterCommand::new("n", -2).initial(10);
        assert_eq!(counter.to_native().kind(), CallbackType::Counter);
    }

    #[test]
    fn keys_accept_strings_and_bytes() {
        let owned = String::from("owned");
        assert_eq!(GetCommand::new(&owned).key(), b"owned");
        assert_eq!(GetCommand::new(b"raw".as_slice()).key(), b"raw");
        assert_eq!(
            EndureCommand::new("e").cas(4).to_native(),
            NativeCommand::Endure { key: b"e", cas: 4 }
        );
    }
}
