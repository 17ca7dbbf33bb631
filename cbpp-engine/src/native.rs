//! # Native Request and Response Structures
//!
//! Purpose: The request descriptors accepted by `Instance::schedule` and the
//! response views handed to the sink during `wait`.
//!
//! ## Design Principles
//!
//! 1. **Borrowed Requests**: Commands borrow key and value bytes; the instance
//!    copies what it needs before `schedule` returns.
//! 2. **Borrowed Responses**: A `RawResponse` is only valid for the duration of
//!    one sink call. Anything kept longer must be copied or, for pooled
//!    values, retained through the `BackBuf` handle.
//! 3. **Sum Types**: One enum per direction instead of one struct per kind.

use cbpp_common::{CallbackType, Cookie, ObserveStatus, RespFlags, Status, StoreMode};

use crate::pool::BackBuf;

/// Request descriptor for a single scheduled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeCommand<'a> {
    Get {
        key: &'a [u8],
        /// Touch (or lock) duration in seconds; zero leaves expiry alone.
        expiry: u32,
        lock: bool,
    },
    Store {
        key: &'a [u8],
        value: &'a [u8],
        mode: StoreMode,
        flags: u32,
        expiry: u32,
        cas: u64,
    },
    Counter {
        key: &'a [u8],
        delta: i64,
        initial: Option<u64>,
        expiry: u32,
    },
    Remove {
        key: &'a [u8],
        cas: u64,
    },
    Touch {
        key: &'a [u8],
        expiry: u32,
    },
    Unlock {
        key: &'a [u8],
        cas: u64,
    },
    /// Statistics group; an empty key requests the default group.
    Stats {
        key: &'a [u8],
    },
    Observe {
        key: &'a [u8],
        master_only: bool,
    },
    Endure {
        key: &'a [u8],
        cas: u64,
    },
}

impl<'a> NativeCommand<'a> {
    pub fn key(&self) -> &'a [u8] {
        match *self {
            NativeCommand::Get { key, .. }
            | NativeCommand::Store { key, .. }
            | NativeCommand::Counter { key, .. }
            | NativeCommand::Remove { key, .. }
            | NativeCommand::Touch { key, .. }
            | NativeCommand::Unlock { key, .. }
            | NativeCommand::Stats { key }
            | NativeCommand::Observe { key, .. }
            | NativeCommand::Endure { key, .. } => key,
        }
    }

    pub fn kind(&self) -> CallbackType {
        match self {
            NativeCommand::Get { .. } => CallbackType::Get,
            NativeCommand::Store { .. } => CallbackType::Store,
            NativeCommand::Counter { .. } => CallbackType::Counter,
            NativeCommand::Remove { .. } => CallbackType::Remove,
            NativeCommand::Touch { .. } => CallbackType::Touch,
            NativeCommand::Unlock { .. } => CallbackType::Unlock,
            NativeCommand::Stats { .. } => CallbackType::Stats,
            NativeCommand::Observe { .. } => CallbackType::Observe,
            NativeCommand::Endure { .. } => CallbackType::Endure,
        }
    }
}

/// Kind-specific part of a response.
#[derive(Debug, Clone, Copy)]
pub enum RespBody<'a> {
    /// No payload beyond the base fields.
    Empty,
    Get {
        value: &'a [u8],
        itmflags: u32,
        /// Pooled buffer backing `value`, when the instance retained one.
        bufh: Option<&'a BackBuf>,
    },
    Counter {
        value: u64,
    },
    /// One statistic from one node; the stat name is the response key.
    Stats {
        server: &'a str,
        value: &'a [u8],
    },
    /// One node's view of the key.
    Observe {
        status: ObserveStatus,
        ismaster: bool,
        ttp: u32,
        ttr: u32,
    },
    /// Durability summary for one key.
    Endure {
        nresponses: u16,
        exists_master: bool,
        persisted_master: bool,
        npersisted: u8,
        nreplicated: u8,
    },
}

/// Response view passed to the sink.
#[derive(Debug, Clone, Copy)]
pub struct RawResponse<'a> {
    pub cookie: Cookie,
    pub key: &'a [u8],
    pub rc: Status,
    pub cas: u64,
    pub rflags: RespFlags,
    pub body: RespBody<'a>,
}

impl<'a> RawResponse<'a> {
    /// Builds a body-less response.
    pub fn base(cookie: Cookie, key: &'a [u8], rc: Status) -> Self {
        RawResponse {
            cookie,
            key,
            rc,
            cas: 0,
            rflags: RespFlags::NONE,
            body: RespBody::Empty,
        }
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_flags(mut self, rflags: RespFlags) -> Self {
        self.rflags = rflags;
        self
    }

    pub fn with_body(mut self, body: RespBody<'a>) -> Self {
        self.body = body;
        self
    }

    pub fn is_final(&self) -> bool {
        self.rflags.is_final()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_reports_key_and_kind() {
        let cmd = NativeCommand::Counter { key: b"hits", delta: 1, initial: Some(0), expiry: 0 };
        assert_eq!(cmd.key(), b"hits");
        assert_eq!(cmd.kind(), CallbackType::Counter);

        let stats = NativeCommand::Stats { key: b"" };
        assert!(stats.key().is_empty());
        assert_eq!(stats.kind(), CallbackType::Stats);
    }

    #[test]
    fn response_builder_sets_fields() {
        let resp = RawResponse::base(Cookie(7), b"k", Status::SUCCESS)
            .with_cas(42)
            .with_flags(RespFlags::FINAL)
            .with_body(RespBody::Counter { value: 3 });
        assert_eq!(resp.cookie, Cookie(7));
        assert_eq!(resp.cas, 42);
        assert!(resp.is_final());
        assert!(matches!(resp.body, RespBody::Counter { value: 3 }));
    }
}
