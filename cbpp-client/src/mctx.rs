//! # Multi-Command Contexts
//!
//! Purpose: Wrap native fan-out cursors (one request over many keys or many
//! nodes) so that each cursor is finished exactly once.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, warn};

use cbpp_common::{CbResult, Cookie, DurabilityOptions, Status};
use cbpp_engine::{Instance, MultiCmd, NativeCommand};

use crate::client::Client;
use crate::commands::EndureCommand;
use crate::context::Ticket;
use crate::response::{EndureResponse, ResponseKind};

/// Owner of one native fan-out cursor.
///
/// The cursor is consumed by `done` or `bail`; dropping an unfinished
/// context bails it.
pub struct MultiContext {
    inner: Option<Box<dyn MultiCmd>>,
}

impl MultiContext {
    pub fn new(inner: Box<dyn MultiCmd>) -> Self {
        MultiContext { inner: Some(inner) }
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    pub fn add(&mut self, cmd: &NativeCommand<'_>) -> Status {
        match self.inner.as_mut() {
            Some(inner) => inner.add_cmd(cmd),
            None => Status::SCHED_STATE,
        }
    }

    /// Finalizes the cursor under `cookie` inside its own scheduling
    /// transaction, which is committed on success and discarded otherwise.
    pub fn done(&mut self, instance: &mut dyn Instance, cookie: Cookie) -> Status {
        let Some(inner) = self.inner.take() else {
            return Status::SCHED_STATE;
        };
        instance.sched_enter();
        let rc = inner.done(cookie);
        if rc.success() {
            instance.sched_leave();
        } else {
            instance.sched_fail();
        }
        rc
    }

    pub fn bail(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.fail();
        }
    }
}

impl Drop for MultiContext {
    fn drop(&mut self) {
        self.bail();
    }
}

/// Waits for a set of keys to meet durability requirements.
///
/// Each key gets its own `EndureResponse`; the whole set counts as one
/// outstanding operation on the client until the final response arrives.
pub struct EndureContext<'c> {
    client: &'c mut Client,
    mctx: MultiContext,
    cookie: Cookie,
    keys: HashMap<Bytes, Cookie>,
}

impl<'c> EndureContext<'c> {
    pub fn new(client: &'c mut Client, options: &DurabilityOptions) -> CbResult<Self> {
        let cursor = client.instance_mut().endure_ctx(options)?;
        let cookie = client.dispatcher_mut().next_cookie();
        Ok(EndureContext {
            client,
            mctx: MultiContext::new(cursor),
            cookie,
            keys: HashMap::new(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.mctx.is_active()
    }

    /// Number of keys added so far.
    pub fn pending(&self) -> usize {
        self.keys.len()
    }

    pub fn add(&mut self, cmd: &EndureCommand<'_>) -> CbResult<Ticket<EndureResponse>> {
        self.mctx.add(&cmd.to_native()).into_result()?;
        let slot = self
            .client
            .dispatcher_mut()
            .register(EndureResponse::default().into_any());
        self.keys.insert(Bytes::copy_from_slice(cmd.key()), slot);
        Ok(Ticket::new(slot))
    }

    /// Schedules the whole set.
    pub fn submit(&mut self) -> CbResult<()> {
        let rc = self.mctx.done(self.client.instance_mut(), self.cookie);
        if !rc.success() {
            self.discard();
            return Err(rc);
        }
        debug!(cookie = %self.cookie, keys = self.keys.len(), "durability set scheduled");
        let keys = std::mem::take(&mut self.keys);
        let dispatcher = self.client.dispatcher_mut();
        dispatcher.track_endure(self.cookie, keys);
        dispatcher.add_outstanding(1);
        Ok(())
    }

    /// Same as `submit`.
    pub fn done(&mut self) -> CbResult<()> {
        self.submit()
    }

    pub fn bail(&mut self) {
        self.mctx.bail();
        self.discard();
    }

    pub fn wait(&mut self) {
        self.client.wait();
    }

    pub fn take(&mut self, ticket: Ticket<EndureResponse>) -> Option<EndureResponse> {
        self.client.take(ticket)
    }

    fn discard(&mut self) {
        for (_, slot) in self.keys.drain() {
            self.client.dispatcher_mut().unregister(slot);
        }
    }
}

impl Drop for EndureContext<'_> {
    fn drop(&mut self) {
        if self.mctx.is_active() {
            warn!(keys = self.keys.len(), "durability context dropped before submit, bailing");
            self.bail();
        }
    }
}
