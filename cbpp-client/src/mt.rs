//! # Shared Client
//!
//! Purpose: Let many threads or tasks use one `Client`.
//!
//! ## Design Principles
//!
//! 1. **Single Owner**: A dedicated I/O thread owns the client; nobody else
//!    ever touches it.
//! 2. **Message Passing**: Callers send owned requests over a work queue and
//!    receive the response through a one-shot future.
//! 3. **Round Batching**: Everything queued when the I/O thread wakes up is
//!    scheduled as one batch and answered after one `wait`.

use std::thread::{self, JoinHandle};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use cbpp_common::{CbResult, Cookie, Status, StoreMode};

use crate::client::Client;
use crate::commands::{
    CounterCommand, GetCommand, ObserveCommand, Operation, RemoveCommand, StatsCommand,
    StoreCommand, TouchCommand, UnlockCommand,
};
use crate::context::Context;
use crate::error::ClientError;
use crate::response::{
    AnyResponse, CounterResponse, GetResponse, ObserveResponse, ResponseKind, StatsResponse,
    StoreResponse,
};

/// Owned request sent to the I/O thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get { key: Bytes, expiry: u32, lock: bool },
    Store { key: Bytes, value: Bytes, mode: StoreMode, flags: u32, expiry: u32, cas: u64 },
    Counter { key: Bytes, delta: i64, initial: Option<u64>, expiry: u32 },
    Remove { key: Bytes, cas: u64 },
    Touch { key: Bytes, expiry: u32 },
    Unlock { key: Bytes, cas: u64 },
    Stats { group: Bytes },
    Observe { key: Bytes, master_only: bool },
}

impl Request {
    fn schedule(&self, ctx: &mut Context<'_>) -> CbResult<Cookie> {
        self.schedule_as(ctx, false)
    }

    /// Schedules the request with nobody collecting its response.
    pub(crate) fn schedule_detached(&self, ctx: &mut Context<'_>) -> CbResult<Cookie> {
        self.schedule_as(ctx, true)
    }

    fn schedule_as(&self, ctx: &mut Context<'_>, detached: bool) -> CbResult<Cookie> {
        fn add<O: Operation>(ctx: &mut Context<'_>, cmd: &O, detached: bool) -> CbResult<Cookie> {
            if detached {
                ctx.add_detached(cmd)
            } else {
                ctx.add(cmd).map(|ticket| ticket.cookie())
            }
        }

        match self {
            Request::Get { key, expiry, lock } => {
                let cmd = GetCommand::new(&key[..]);
                let cmd = if *lock { cmd.locktime(*expiry) } else { cmd.expiry(*expiry) };
                add(ctx, &cmd, detached)
            }
            Request::Store { key, value, mode, flags, expiry, cas } => {
                let cmd = StoreCommand::new(&key[..], &value[..])
                    .mode(*mode)
                    .itemflags(*flags)
                    .expiry(*expiry)
                    .cas(*cas);
                add(ctx, &cmd, detached)
            }
            Request::Counter { key, delta, initial, expiry } => {
                let mut cmd = CounterCommand::new(&key[..], *delta).expiry(*expiry);
                if let Some(initial) = initial {
                    cmd = cmd.initial(*initial);
                }
                add(ctx, &cmd, detached)
            }
            Request::Remove { key, cas } => {
                add(ctx, &RemoveCommand::new(&key[..]).cas(*cas), detached)
            }
            Request::Touch { key, expiry } => {
                add(ctx, &TouchCommand::new(&key[..], *expiry), detached)
            }
            Request::Unlock { key, cas } => {
                add(ctx, &UnlockCommand::new(&key[..], *cas), detached)
            }
            Request::Stats { group } => add(ctx, &StatsCommand::new(&group[..]), detached),
            Request::Observe { key, master_only } => {
                add(ctx, &ObserveCommand::new(&key[..]).master_only(*master_only), detached)
            }
        }
    }

    /// Response returned when the request could not be scheduled.
    fn failed(&self, rc: Status) -> AnyResponse {
        match self {
            Request::Get { .. } => GetResponse::default().setcode(rc).into_any(),
            Request::Counter { .. } => CounterResponse::default().setcode(rc).into_any(),
            Request::Stats { .. } => StatsResponse::default().setcode(rc).into_any(),
            Request::Observe { .. } => ObserveResponse::default().setcode(rc).into_any(),
            Request::Store { .. }
            | Request::Remove { .. }
            | Request::Touch { .. }
            | Request::Unlock { .. } => StoreResponse::default().setcode(rc).into_any(),
        }
    }
}

struct Envelope {
    request: Request,
    reply: oneshot::Sender<AnyResponse>,
}

/// Handle to a client running on its own I/O thread.
///
/// Cloning is not supported; share it behind an `Arc`.
pub struct SharedClient {
    tx: Option<mpsc::UnboundedSender<Envelope>>,
    worker: Option<JoinHandle<()>>,
}

impl SharedClient {
    /// Moves `client` onto a new I/O thread.
    pub fn spawn(client: Client) -> Result<Self, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = thread::Builder::new()
            .name("cbpp-io".to_string())
            .spawn(move || io_loop(client, rx))?;
        Ok(SharedClient { tx: Some(tx), worker: Some(worker) })
    }

    fn enqueue(&self, request: Request) -> Result<oneshot::Receiver<AnyResponse>, ClientError> {
        let (reply, rx) = oneshot::channel();
        let tx = self.tx.as_ref().ok_or(ClientError::WorkerGone)?;
        tx.send(Envelope { request, reply }).map_err(|_| ClientError::WorkerGone)?;
        Ok(rx)
    }

    /// Sends `request` and awaits its response.
    pub async fn execute(&self, request: Request) -> Result<AnyResponse, ClientError> {
        let rx = self.enqueue(request)?;
        rx.await.map_err(|_| ClientError::WorkerGone)
    }

    /// Sends `request` and blocks the calling thread until it completes.
    ///
    /// Must not be called from within an async runtime.
    pub fn execute_blocking(&self, request: Request) -> Result<AnyResponse, ClientError> {
        let rx = self.enqueue(request)?;
        rx.blocking_recv().map_err(|_| ClientError::WorkerGone)
    }

    async fn typed<R: ResponseKind>(&self, request: Request) -> Result<R, ClientError> {
        self.execute(request)
            .await?
            .into_typed()
            .ok_or(ClientError::Status(Status::EINVAL))
    }

    pub async fn get(&self, key: impl Into<Bytes>) -> Result<GetResponse, ClientError> {
        self.typed(Request::Get { key: key.into(), expiry: 0, lock: false }).await
    }

    pub async fn upsert(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<StoreResponse, ClientError> {
        self.store(StoreMode::Upsert, key, value).await
    }

    pub async fn store(
        &self,
        mode: StoreMode,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<StoreResponse, ClientError> {
        self.typed(Request::Store {
            key: key.into(),
            value: value.into(),
            mode,
            flags: 0,
            expiry: 0,
            cas: 0,
        })
        .await
    }

    pub async fn counter(
        &self,
        key: impl Into<Bytes>,
        delta: i64,
        initial: Option<u64>,
    ) -> Result<CounterResponse, ClientError> {
        self.typed(Request::Counter { key: key.into(), delta, initial, expiry: 0 }).await
    }

    pub async fn remove(&self, key: impl Into<Bytes>) -> Result<StoreResponse, ClientError> {
        self.typed(Request::Remove { key: key.into(), cas: 0 }).await
    }

    pub async fn stats(&self, group: impl Into<Bytes>) -> Result<StatsResponse, ClientError> {
        self.typed(Request::Stats { group: group.into() }).await
    }

    pub async fn observe(&self, key: impl Into<Bytes>) -> Result<ObserveResponse, ClientError> {
        self.typed(Request::Observe { key: key.into(), master_only: false }).await
    }

    /// Stops the I/O thread after it answers everything already queued.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.tx.take();
        if self.worker.take().is_some_and(|worker| worker.join().is_err()) {
            warn!("client I/O thread panicked");
        }
    }
}

impl Drop for SharedClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn io_loop(mut client: Client, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    debug!("client I/O thread started");
    while let Some(first) = rx.blocking_recv() {
        let mut round = vec![first];
        while let Ok(next) = rx.try_recv() {
            round.push(next);
        }
        trace!(requests = round.len(), "I/O round");

        let mut waiting = Vec::with_capacity(round.len());
        {
            let mut ctx = Context::new(&mut client);
            for Envelope { request, reply } in round {
                match request.schedule(&mut ctx) {
                    Ok(cookie) => waiting.push((cookie, request, reply)),
                    Err(rc) => {
                        let _ = reply.send(request.failed(rc));
                    }
                }
            }
            ctx.submit();
        }
        client.wait();

        for (cookie, request, reply) in waiting {
            let response = client
                .take_any(cookie)
                .unwrap_or_else(|| request.failed(Status::ETIMEDOUT));
            let _ = reply.send(response);
        }
    }
    debug!("client I/O thread exiting");
}
