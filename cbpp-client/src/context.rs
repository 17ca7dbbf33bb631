//! # Scheduling Context
//!
//! Purpose: Batch operations into one native scheduling transaction.
//!
//! ## Design Principles
//!
//! 1. **Exclusive Borrow**: A context holds `&mut Client`, so at most one
//!    batch can be open per client and nothing else can schedule meanwhile.
//! 2. **All or Nothing**: `submit` commits the whole batch; `bail` (or
//!    dropping an active context) discards it together with its response
//!    slots.
//! 3. **Typed Tickets**: Every added command yields a `Ticket` that retrieves
//!    its response with the right type once the client has waited.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Index;

use tracing::{debug, warn};

use cbpp_common::{CbResult, Cookie, Status};

use crate::client::Client;
use crate::commands::{GetCommand, Operation};
use crate::handler::ResponseHandler;
use crate::response::{AnyResponse, GetResponse, ResponseKind};

static EMPTY_GET: GetResponse = GetResponse::EMPTY;

/// Typed handle to a registered response.
///
/// The response stays registered until it is taken; use
/// `Context::add_detached` when nobody will collect it.
#[must_use = "an uncollected ticket keeps its response registered; use add_detached instead"]
pub struct Ticket<R> {
    cookie: Cookie,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Ticket<R> {
    pub(crate) fn new(cookie: Cookie) -> Self {
        Ticket { cookie, _marker: PhantomData }
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }
}

impl<R> Clone for Ticket<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Ticket<R> {}

impl<R> fmt::Debug for Ticket<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticket({})", self.cookie)
    }
}

/// A batch of operations scheduled as one transaction.
///
/// Created active. Commands added with `add` are not visible to the instance
/// until `submit`; the client must then `wait` for their responses.
pub struct Context<'c> {
    client: &'c mut Client,
    active: bool,
    pending: usize,
    round: Vec<Cookie>,
    gets: HashMap<Vec<u8>, Cookie>,
}

impl<'c> Context<'c> {
    pub fn new(client: &'c mut Client) -> Self {
        client.instance_mut().sched_enter();
        Context {
            client,
            active: true,
            pending: 0,
            round: Vec::new(),
            gets: HashMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Operations added since the last `submit`, `bail` or `reset`.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Schedules `cmd` as part of this batch.
    ///
    /// On failure nothing is scheduled and the context stays active.
    pub fn add<O: Operation>(&mut self, cmd: &O) -> CbResult<Ticket<O::Response>> {
        let response = O::Response::default().into_any();
        self.schedule(cmd, response, false).map(Ticket::new)
    }

    /// Schedules `cmd` without keeping a handle to its response, which is
    /// dropped once it completes.
    pub fn add_detached<O: Operation>(&mut self, cmd: &O) -> CbResult<Cookie> {
        let response = O::Response::default().into_any();
        self.schedule(cmd, response, true)
    }

    /// Schedules `cmd` and routes every response chunk to `handler` instead
    /// of a typed response. The handler is dropped once it reports done.
    pub fn add_with_handler<O, H>(&mut self, cmd: &O, handler: H) -> CbResult<Cookie>
    where
        O: Operation,
        H: ResponseHandler + 'static,
    {
        self.schedule(cmd, AnyResponse::Handler(Box::new(handler)), true)
    }

    fn schedule<O: Operation>(
        &mut self,
        cmd: &O,
        response: AnyResponse,
        detached: bool,
    ) -> CbResult<Cookie> {
        if !self.active {
            return Err(Status::SCHED_STATE);
        }
        let dispatch = self.client.dispatcher_mut();
        let cookie = if detached {
            dispatch.register_detached(response)
        } else {
            dispatch.register(response)
        };
        let rc = cmd.schedule(self.client.instance_mut(), cookie);
        if !rc.success() {
            self.client.dispatcher_mut().unregister(cookie);
            return Err(rc);
        }
        self.pending += 1;
        self.round.push(cookie);
        Ok(cookie)
    }

    /// Schedules a get for `key` whose response is later available through
    /// `value_for` or indexing.
    pub fn get<K: AsRef<[u8]> + ?Sized>(&mut self, key: &K) -> CbResult<Ticket<GetResponse>> {
        let key = key.as_ref();
        let ticket = self.add(&GetCommand::new(key))?;
        if let Some(previous) = self.gets.insert(key.to_vec(), ticket.cookie()) {
            self.client.dispatcher_mut().release(previous);
        }
        Ok(ticket)
    }

    /// Response of the last `get` for `key`, or a shared empty response if
    /// the key was never requested.
    pub fn value_for<K: AsRef<[u8]> + ?Sized>(&self, key: &K) -> &GetResponse {
        self.gets
            .get(key.as_ref())
            .and_then(|cookie| self.client.dispatcher().get(*cookie))
            .and_then(GetResponse::peek)
            .unwrap_or(&EMPTY_GET)
    }

    /// Commits the batch and adds its operations to the client's
    /// outstanding count.
    pub fn submit(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        debug!(pending = self.pending, "submitting batch");
        self.client.dispatcher_mut().add_outstanding(self.pending);
        self.client.instance_mut().sched_leave();
        self.pending = 0;
        self.round.clear();
    }

    /// Discards the batch and the responses registered for it.
    pub fn bail(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        debug!(pending = self.pending, "bailing batch");
        self.pending = 0;
        self.client.instance_mut().sched_fail();
        for cookie in self.round.drain(..) {
            self.client.dispatcher_mut().unregister(cookie);
        }
        self.gets.retain(|_, cookie| self.client.dispatcher().get(*cookie).is_some());
    }

    /// Re-opens the context for another batch.
    pub fn reset(&mut self) {
        if self.active {
            warn!("reset of an active batch discards it");
            self.bail();
        }
        self.active = true;
        self.pending = 0;
        self.client.instance_mut().sched_enter();
    }

    /// Runs the client's event loop.
    pub fn wait(&mut self) {
        self.client.wait();
    }

    pub fn response<R: ResponseKind>(&self, ticket: &Ticket<R>) -> Option<&R> {
        self.client.response(ticket)
    }

    pub fn take<R: ResponseKind>(&mut self, ticket: Ticket<R>) -> Option<R> {
        self.client.take(ticket)
    }
}

impl Index<&str> for Context<'_> {
    type Output = GetResponse;

    fn index(&self, key: &str) -> &GetResponse {
        self.value_for(key)
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        if self.active {
            warn!(pending = self.pending, "active batch dropped, bailing");
            self.bail();
        }
        for (_, cookie) in self.gets.drain() {
            self.client.dispatcher_mut().release(cookie);
        }
    }
}
