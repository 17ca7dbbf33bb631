//! # Client
//!
//! Purpose: Own one native instance, run its event loop, and offer
//! single-shot helpers for every operation.
//!
//! ## Design Principles
//!
//! 1. **One Instance, One Counter**: The client owns exactly one instance and
//!    one outstanding-operation counter shared by all its contexts.
//! 2. **Synchronous Failures Stay Typed**: A helper whose command could not
//!    be scheduled returns the usual response with the failure code set.
//! 3. **Explicit Waiting**: Nothing reaches the instance's event loop until
//!    `wait` runs.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use cbpp_common::{Cookie, DurabilityOptions, Status, StoreMode};
use cbpp_engine::{Instance, MemoryCluster, MemoryInstance};

use crate::commands::{
    CounterCommand, EndureCommand, GetCommand, ObserveCommand, Operation, RemoveCommand,
    StatsCommand, StoreCommand, TouchCommand, UnlockCommand,
};
use crate::config::ClientConfig;
use crate::context::{Context, Ticket};
use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::mctx::EndureContext;
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::mt::Request;
use crate::response::{
    AnyResponse, CounterResponse, EndureResponse, GetResponse, ObserveResponse, ResponseKind,
    StatsResponse, StoreResponse,
};

pub struct Client {
    instance: Box<dyn Instance>,
    dispatch: Dispatcher,
    metrics: Arc<ClientMetrics>,
}

impl Client {
    pub fn with_instance(instance: Box<dyn Instance>) -> Self {
        let metrics = Arc::new(ClientMetrics::new());
        Client {
            instance,
            dispatch: Dispatcher::new(Arc::clone(&metrics)),
            metrics,
        }
    }

    /// Creates an unconnected client over the in-memory cluster.
    pub fn open(config: &ClientConfig, cluster: &MemoryCluster) -> Result<Self, ClientError> {
        let options = config.create_options()?;
        debug!(connstr = %config.connstr, "opening client");
        let instance = MemoryInstance::create(cluster, options)?;
        Ok(Client::with_instance(Box::new(instance)))
    }

    /// Bootstraps the instance and waits for the outcome.
    pub fn connect(&mut self) -> Status {
        let rc = self.instance.connect();
        if !rc.success() {
            warn!(%rc, "connect failed");
            return rc;
        }
        self.wait();
        let rc = self.instance.bootstrap_status();
        if rc.success() {
            info!("client bootstrapped");
        } else {
            warn!(%rc, "bootstrap failed");
        }
        rc
    }

    /// Runs the event loop until every outstanding operation has completed.
    ///
    /// Requests queued by response handlers are scheduled and waited for
    /// before this returns.
    pub fn wait(&mut self) {
        let started = Instant::now();
        loop {
            self.instance.wait(&mut self.dispatch);
            let followups = self.dispatch.take_followups();
            if followups.is_empty() || !self.schedule_followups(&followups) {
                break;
            }
        }
        self.metrics.record_wait(started.elapsed());
        debug!(outstanding = self.dispatch.outstanding(), "wait returned");
    }

    /// Returns false if none of `requests` could be scheduled.
    fn schedule_followups(&mut self, requests: &[Request]) -> bool {
        let mut ctx = Context::new(self);
        for request in requests {
            if let Err(rc) = request.schedule_detached(&mut ctx) {
                warn!(%rc, ?request, "follow-up request not scheduled");
            }
        }
        let scheduled = ctx.pending() > 0;
        trace!(requests = requests.len(), scheduled = ctx.pending(), "scheduling follow-ups");
        ctx.submit();
        scheduled
    }

    /// Number of responses still held by the client, collected or not.
    pub fn registered(&self) -> usize {
        self.dispatch.len()
    }

    /// Operations submitted but not yet completed.
    pub fn outstanding(&self) -> usize {
        self.dispatch.outstanding()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Opens a batch on this client.
    pub fn context(&mut self) -> Context<'_> {
        Context::new(self)
    }

    /// The response for `ticket`, complete or not.
    pub fn response<R: ResponseKind>(&self, ticket: &Ticket<R>) -> Option<&R> {
        self.dispatch.get(ticket.cookie()).and_then(R::peek)
    }

    /// Removes and returns the response for `ticket` once it is complete.
    pub fn take<R: ResponseKind>(&mut self, ticket: Ticket<R>) -> Option<R> {
        self.dispatch.take_done(ticket.cookie()).and_then(R::from_any)
    }

    /// Drops interest in `ticket`.
    pub fn forget<R>(&mut self, ticket: Ticket<R>) {
        self.dispatch.release(ticket.cookie());
    }

    pub(crate) fn take_any(&mut self, cookie: Cookie) -> Option<AnyResponse> {
        self.dispatch.take_done(cookie)
    }

    pub(crate) fn instance_mut(&mut self) -> &mut dyn Instance {
        self.instance.as_mut()
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatch
    }

    pub(crate) fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatch
    }

    fn finish<R: ResponseKind>(&mut self, ticket: Ticket<R>) -> R {
        match self.take(ticket) {
            Some(resp) => resp,
            None => {
                warn!(cookie = %ticket.cookie(), "response incomplete after wait");
                self.forget(ticket);
                R::default().setcode(Status::ETIMEDOUT)
            }
        }
    }

    /// Schedules `cmd` alone, waits, and returns its response.
    pub fn run<O: Operation>(&mut self, cmd: &O) -> O::Response {
        let mut ctx = Context::new(self);
        let ticket = match ctx.add(cmd) {
            Ok(ticket) => ticket,
            Err(rc) => {
                ctx.bail();
                return O::Response::default().setcode(rc);
            }
        };
        ctx.submit();
        drop(ctx);
        self.wait();
        self.finish(ticket)
    }

    pub fn get(&mut self, cmd: &GetCommand<'_>) -> GetResponse {
        self.run(cmd)
    }

    /// Runs `cmd` with the mode it carries.
    pub fn store(&mut self, cmd: &StoreCommand<'_>) -> StoreResponse {
        self.run(cmd)
    }

    pub fn upsert(&mut self, cmd: &StoreCommand<'_>) -> StoreResponse {
        self.run(&cmd.mode(StoreMode::Upsert))
    }

    pub fn add(&mut self, cmd: &StoreCommand<'_>) -> StoreResponse {
        self.run(&cmd.mode(StoreMode::Add))
    }

    pub fn replace(&mut self, cmd: &StoreCommand<'_>) -> StoreResponse {
        self.run(&cmd.mode(StoreMode::Replace))
    }

    pub fn append(&mut self, cmd: &StoreCommand<'_>) -> StoreResponse {
        self.run(&cmd.mode(StoreMode::Append))
    }

    pub fn prepend(&mut self, cmd: &StoreCommand<'_>) -> StoreResponse {
        self.run(&cmd.mode(StoreMode::Prepend))
    }

    pub fn remove(&mut self, cmd: &RemoveCommand<'_>) -> StoreResponse {
        self.run(cmd)
    }

    pub fn counter(&mut self, cmd: &CounterCommand<'_>) -> CounterResponse {
        self.run(cmd)
    }

    pub fn touch(&mut self, cmd: &TouchCommand<'_>) -> StoreResponse {
        self.run(cmd)
    }

    pub fn unlock(&mut self, cmd: &UnlockCommand<'_>) -> StoreResponse {
        self.run(cmd)
    }

    /// Statistics for `group`; an empty group returns the default set.
    pub fn stats<K: AsRef<[u8]> + ?Sized>(&mut self, group: &K) -> StatsResponse {
        self.run(&StatsCommand::new(group))
    }

    pub fn observe(&mut self, cmd: &ObserveCommand<'_>) -> ObserveResponse {
        self.run(cmd)
    }

    /// Waits for one key to meet `options`.
    pub fn endure(
        &mut self,
        cmd: &EndureCommand<'_>,
        options: &DurabilityOptions,
    ) -> EndureResponse {
        let mut ctx = match EndureContext::new(self, options) {
            Ok(ctx) => ctx,
            Err(rc) => return EndureResponse::default().setcode(rc),
        };
        let ticket = match ctx.add(cmd) {
            Ok(ticket) => ticket,
            Err(rc) => return EndureResponse::default().setcode(rc),
        };
        if let Err(rc) = ctx.submit() {
            return EndureResponse::default().setcode(rc);
        }
        drop(ctx);
        self.wait();
        self.finish(ticket)
    }
}
