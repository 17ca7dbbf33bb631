//! # Responses
//!
//! Purpose: Typed response objects filled in by the dispatch loop.
//!
//! ## Design Principles
//!
//! 1. **Handler Contract**: Every response type absorbs native chunks through
//!    `handle_response` and reports completion through `done`.
//! 2. **Owned Data**: Anything read from a native view is copied or
//!    reference-retained before the callback returns.
//! 3. **First Error Wins**: Aggregating responses keep the first failure they
//!    see and never overwrite it with later successes.

use std::collections::BTreeMap;

use bytes::Bytes;

use cbpp_common::{CallbackType, ObserveStatus, RespFlags, Status};
use cbpp_engine::{RawResponse, RespBody};

use crate::buffer::ValueBuf;
use crate::handler::{FollowUps, ResponseHandler};

/// Fields common to every response.
#[derive(Debug, Clone, Default)]
pub struct ResponseBase {
    rc: Status,
    cas: u64,
    key: Bytes,
    rflags: RespFlags,
}

impl ResponseBase {
    const EMPTY: ResponseBase = ResponseBase {
        rc: Status::SUCCESS,
        cas: 0,
        key: Bytes::new(),
        rflags: RespFlags::NONE,
    };

    fn init(&mut self, resp: &RawResponse<'_>) {
        self.rc = resp.rc;
        self.cas = resp.cas;
        self.key = Bytes::copy_from_slice(resp.key);
        self.rflags = resp.rflags;
    }

    pub fn status(&self) -> Status {
        self.rc
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn is_final(&self) -> bool {
        self.rflags.is_final()
    }
}

/// Response handler contract shared by every response type.
pub trait ResponseKind: Default + Send + Sized + 'static {
    /// Absorbs one native response chunk.
    fn handle_response(&mut self, kind: CallbackType, resp: &RawResponse<'_>);

    /// True once no further chunks are expected.
    fn done(&self) -> bool;

    fn base(&self) -> &ResponseBase;

    fn base_mut(&mut self) -> &mut ResponseBase;

    fn into_any(self) -> AnyResponse;

    fn from_any(any: AnyResponse) -> Option<Self>;

    fn peek(any: &AnyResponse) -> Option<&Self>;

    /// Marks the response as failed with `rc` without any native data.
    fn setcode(mut self, rc: Status) -> Self {
        self.base_mut().rc = rc;
        self
    }

    fn status(&self) -> Status {
        self.base().status()
    }

    fn cas(&self) -> u64 {
        self.base().cas()
    }

    fn key(&self) -> &[u8] {
        self.base().key()
    }
}

macro_rules! response_kind {
    ($variant:ident) => {
        fn base(&self) -> &ResponseBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ResponseBase {
            &mut self.base
        }

        fn into_any(self) -> AnyResponse {
            AnyResponse::$variant(self)
        }

        fn from_any(any: AnyResponse) -> Option<Self> {
            match any {
                AnyResponse::$variant(resp) => Some(resp),
                _ => None,
            }
        }

        fn peek(any: &AnyResponse) -> Option<&Self> {
            match any {
                AnyResponse::$variant(resp) => Some(resp),
                _ => None,
            }
        }
    };
}

/// Result of a get; owns (or shares) the value.
#[derive(Debug, Clone, Default)]
pub struct GetResponse {
    base: ResponseBase,
    value: ValueBuf,
    itmflags: u32,
    received: bool,
}

impl GetResponse {
    /// An empty, successful response with no value.
    pub const EMPTY: GetResponse = GetResponse {
        base: ResponseBase::EMPTY,
        value: ValueBuf::Empty,
        itmflags: 0,
        received: false,
    };

    pub fn value(&self) -> &[u8] {
        self.value.as_slice()
    }

    /// The value as UTF-8, if it is valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(self.value()).ok()
    }

    pub fn valuebuf(&self) -> &ValueBuf {
        &self.value
    }

    pub fn valuesize(&self) -> usize {
        self.value.len()
    }

    pub fn itmflags(&self) -> u32 {
        self.itmflags
    }

    pub fn has_shared_buffer(&self) -> bool {
        self.value.is_shared()
    }

    pub fn has_owned_buffer(&self) -> bool {
        self.value.is_owned()
    }

    /// Releases the value and resets the response.
    pub fn clear(&mut self) {
        *self = GetResponse::default();
    }
}

impl ResponseKind for GetResponse {
    fn handle_response(&mut self, _kind: CallbackType, resp: &RawResponse<'_>) {
        self.base.init(resp);
        self.received = true;
        match resp.body {
            RespBody::Get { value, itmflags, bufh } if resp.rc.success() => {
                self.value = ValueBuf::retain(value, bufh);
                self.itmflags = itmflags;
            }
            _ => {
                self.value = ValueBuf::Empty;
                self.itmflags = 0;
            }
        }
    }

    fn done(&self) -> bool {
        self.received
    }

    response_kind!(Get);
}

/// Result of a store, remove, touch or unlock.
#[derive(Debug, Clone, Default)]
pub struct StoreResponse {
    base: ResponseBase,
    received: bool,
}

pub type RemoveResponse = StoreResponse;
pub type TouchResponse = StoreResponse;
pub type UnlockResponse = StoreResponse;

impl ResponseKind for StoreResponse {
    fn handle_response(&mut self, _kind: CallbackType, resp: &RawResponse<'_>) {
        self.base.init(resp);
        self.received = true;
    }

    fn done(&self) -> bool {
        self.received
    }

    response_kind!(Store);
}

/// Result of a counter operation.
#[derive(Debug, Clone, Default)]
pub struct CounterResponse {
    base: ResponseBase,
    value: u64,
    received: bool,
}

impl CounterResponse {
    /// Counter value after the operation; zero on failure.
    pub fn value(&self) -> u64 {
        self.value
    }
}

impl ResponseKind for CounterResponse {
    fn handle_response(&mut self, _kind: CallbackType, resp: &RawResponse<'_>) {
        self.base.init(resp);
        self.received = true;
        self.value = match resp.body {
            RespBody::Counter { value } if resp.rc.success() => value,
            _ => 0,
        };
    }

    fn done(&self) -> bool {
        self.received
    }

    response_kind!(Counter);
}

/// Aggregated statistics: stat name, then server, then value.
#[derive(Debug, Clone, Default)]
pub struct StatsResponse {
    base: ResponseBase,
    stats: BTreeMap<String, BTreeMap<String, String>>,
    initialized: bool,
    complete: bool,
}

impl StatsResponse {
    pub fn stats(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.stats
    }

    /// Value of `stat` as reported by `server`.
    pub fn get(&self, stat: &str, server: &str) -> Option<&str> {
        self.stats.get(stat)?.get(server).map(String::as_str)
    }
}

impl ResponseKind for StatsResponse {
    fn handle_response(&mut self, _kind: CallbackType, resp: &RawResponse<'_>) {
        if !self.initialized {
            self.base.init(resp);
            self.initialized = true;
        }
        if resp.is_final() {
            self.base.rflags = resp.rflags;
            self.complete = true;
        }
        if !resp.rc.success() {
            if self.base.rc.success() {
                self.base.rc = resp.rc;
            }
            return;
        }
        if resp.is_final() {
            return;
        }
        if let RespBody::Stats { server, value } = resp.body {
            let stat = String::from_utf8_lossy(resp.key).into_owned();
            let value = String::from_utf8_lossy(value).into_owned();
            self.stats
                .entry(stat)
                .or_default()
                .insert(server.to_string(), value);
        }
    }

    fn done(&self) -> bool {
        self.complete
    }

    response_kind!(Stats);
}

/// One node's answer to an observe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerReply {
    pub cas: u64,
    pub master: bool,
    pub status: ObserveStatus,
}

impl ServerReply {
    /// Reply used when no master answered.
    pub const NONE: ServerReply = ServerReply {
        cas: 0,
        master: false,
        status: ObserveStatus::NOT_FOUND,
    };

    pub fn exists(&self) -> bool {
        self.status.exists()
    }

    pub fn persisted(&self) -> bool {
        self.status.persisted()
    }
}

static NO_MASTER_REPLY: ServerReply = ServerReply::NONE;

/// Aggregated observe result for one key.
#[derive(Debug, Clone, Default)]
pub struct ObserveResponse {
    base: ResponseBase,
    replies: Vec<ServerReply>,
    initialized: bool,
    complete: bool,
}

impl ObserveResponse {
    /// The master's reply, or a shared not-found reply if the master did not
    /// answer.
    pub fn master_reply(&self) -> &ServerReply {
        self.replies
            .iter()
            .find(|reply| reply.master)
            .unwrap_or(&NO_MASTER_REPLY)
    }

    pub fn all_replies(&self) -> &[ServerReply] {
        &self.replies
    }
}

impl ResponseKind for ObserveResponse {
    fn handle_response(&mut self, _kind: CallbackType, resp: &RawResponse<'_>) {
        if resp.is_final() {
            self.base.rflags = resp.rflags;
            self.complete = true;
            return;
        }
        if !self.initialized {
            self.base.init(resp);
            self.initialized = true;
        }
        if !resp.rc.success() {
            if self.base.rc.success() {
                self.base.rc = resp.rc;
            }
            return;
        }
        if let RespBody::Observe { status, ismaster, .. } = resp.body {
            self.replies.push(ServerReply {
                cas: resp.cas,
                master: ismaster,
                status,
            });
        }
    }

    fn done(&self) -> bool {
        self.complete
    }

    response_kind!(Observe);
}

/// Durability outcome for one key of an endure fan-out.
#[derive(Debug, Clone, Default)]
pub struct EndureResponse {
    base: ResponseBase,
    nresponses: u16,
    exists_master: bool,
    persisted_master: bool,
    npersisted: u8,
    nreplicated: u8,
    received: bool,
}

impl EndureResponse {
    pub fn nresponses(&self) -> u16 {
        self.nresponses
    }

    pub fn exists_master(&self) -> bool {
        self.exists_master
    }

    pub fn persisted_master(&self) -> bool {
        self.persisted_master
    }

    pub fn npersisted(&self) -> u8 {
        self.npersisted
    }

    pub fn nreplicated(&self) -> u8 {
        self.nreplicated
    }
}

impl ResponseKind for EndureResponse {
    fn handle_response(&mut self, _kind: CallbackType, resp: &RawResponse<'_>) {
        self.base.init(resp);
        self.received = true;
        if let RespBody::Endure {
            nresponses,
            exists_master,
            persisted_master,
            npersisted,
            nreplicated,
        } = resp.body
        {
            self.nresponses = nresponses;
            self.exists_master = exists_master;
            self.persisted_master = persisted_master;
            self.npersisted = npersisted;
            self.nreplicated = nreplicated;
        }
    }

    fn done(&self) -> bool {
        self.received
    }

    response_kind!(Endure);
}

static HANDLER_BASE: ResponseBase = ResponseBase::EMPTY;

/// Any response, as stored by the dispatch registry.
#[derive(Debug)]
pub enum AnyResponse {
    Get(GetResponse),
    Store(StoreResponse),
    Counter(CounterResponse),
    Stats(StatsResponse),
    Observe(ObserveResponse),
    Endure(EndureResponse),
    /// Caller-supplied handler; carries no response fields of its own.
    Handler(Box<dyn ResponseHandler>),
}

impl AnyResponse {
    pub fn handle_response(
        &mut self,
        kind: CallbackType,
        resp: &RawResponse<'_>,
        followups: &mut FollowUps,
    ) {
        match self {
            AnyResponse::Get(r) => r.handle_response(kind, resp),
            AnyResponse::Store(r) => r.handle_response(kind, resp),
            AnyResponse::Counter(r) => r.handle_response(kind, resp),
            AnyResponse::Stats(r) => r.handle_response(kind, resp),
            AnyResponse::Observe(r) => r.handle_response(kind, resp),
            AnyResponse::Endure(r) => r.handle_response(kind, resp),
            AnyResponse::Handler(h) => h.handle_response(kind, resp, followups),
        }
    }

    pub fn done(&self) -> bool {
        match self {
            AnyResponse::Get(r) => r.done(),
            AnyResponse::Store(r) => r.done(),
            AnyResponse::Counter(r) => r.done(),
            AnyResponse::Stats(r) => r.done(),
            AnyResponse::Observe(r) => r.done(),
            AnyResponse::Endure(r) => r.done(),
            AnyResponse::Handler(h) => h.done(),
        }
    }

    pub fn status(&self) -> Status {
        self.base().status()
    }

    pub fn base(&self) -> &ResponseBase {
        match self {
            AnyResponse::Get(r) => r.base(),
            AnyResponse::Store(r) => r.base(),
            AnyResponse::Counter(r) => r.base(),
            AnyResponse::Stats(r) => r.base(),
            AnyResponse::Observe(r) => r.base(),
            AnyResponse::Endure(r) => r.base(),
            AnyResponse::Handler(_) => &HANDLER_BASE,
        }
    }

    /// Downcasts into a concrete response type.
    pub fn into_typed<R: ResponseKind>(self) -> Option<R> {
        R::from_any(self)
    }
}
