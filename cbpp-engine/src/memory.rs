//! # In-Memory Instance
//!
//! Purpose: A complete `Instance` backed by a `MemoryCluster`, used by the
//! binding layer in place of a networked connection.
//!
//! ## Design Principles
//!
//! 1. **Staged Scheduling**: Work scheduled inside a transaction is staged and
//!    moved to the run queue only when the outermost transaction closes.
//! 2. **Owned Replies**: A job produces owned replies under the bucket lock,
//!    then releases every lock before the sink sees borrowed views of them.
//! 3. **Deterministic Topology**: Node 0 is the master; nodes `1..=replicas`
//!    are replicas. Faults are injected per node.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use cbpp_common::{
    CallbackType, Cookie, DurabilityOptions, MAX_KEY_SIZE, MAX_VALUE_SIZE, ObserveStatus,
    RespFlags, Status, StoreMode,
};

use crate::cluster::{Bucket, DEFAULT_BUCKET, MemoryCluster};
use crate::engine::{Instance, LoopControl, MultiCmd, ResponseSink};
use crate::native::{NativeCommand, RawResponse, RespBody};
use crate::pool::{BackBuf, BufferPool};

/// Values at least this long are delivered through the buffer pool.
pub const DEFAULT_POOL_THRESHOLD: usize = 256;

/// Upper bound on configured replicas.
pub const MAX_REPLICAS: usize = 3;

const BASE_PORT: u16 = 11210;

/// Creation options for a `MemoryInstance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    pub hosts: Vec<String>,
    pub bucket: String,
    pub password: Option<String>,
    pub replicas: usize,
    /// `None` delivers every value as a raw copy.
    pub pool_threshold: Option<usize>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            hosts: vec!["localhost".to_string()],
            bucket: DEFAULT_BUCKET.to_string(),
            password: None,
            replicas: 0,
            pool_threshold: Some(DEFAULT_POOL_THRESHOLD),
        }
    }
}

enum Op {
    Get { key: Bytes, expiry: u32, lock: bool },
    Store { key: Bytes, value: Bytes, mode: StoreMode, flags: u32, expiry: u32, cas: u64 },
    Counter { key: Bytes, delta: i64, initial: Option<u64>, expiry: u32 },
    Remove { key: Bytes, cas: u64 },
    Touch { key: Bytes, expiry: u32 },
    Unlock { key: Bytes, cas: u64 },
    Stats { group: Bytes },
}

impl Op {
    fn kind(&self) -> CallbackType {
        match self {
            Op::Get { .. } => CallbackType::Get,
            Op::Store { .. } => CallbackType::Store,
            Op::Counter { .. } => CallbackType::Counter,
            Op::Remove { .. } => CallbackType::Remove,
            Op::Touch { .. } => CallbackType::Touch,
            Op::Unlock { .. } => CallbackType::Unlock,
            Op::Stats { .. } => CallbackType::Stats,
        }
    }
}

enum Job {
    Single { cookie: Cookie, op: Op },
    Observe { cookie: Cookie, targets: Vec<(Bytes, bool)> },
    Endure { cookie: Cookie, options: DurabilityOptions, targets: Vec<(Bytes, u64)> },
}

impl Job {
    fn kind(&self) -> CallbackType {
        match self {
            Job::Single { op, .. } => op.kind(),
            Job::Observe { .. } => CallbackType::Observe,
            Job::Endure { .. } => CallbackType::Endure,
        }
    }
}

enum ReplyBody {
    Empty,
    Get { value: Bytes, flags: u32, bufh: Option<BackBuf> },
    Counter(u64),
    Stats { server: String, value: Bytes },
    Observe { status: ObserveStatus, ismaster: bool },
    Endure { nresponses: u16, exists: bool, npersisted: u8, nreplicated: u8 },
}

struct Reply {
    cookie: Cookie,
    key: Bytes,
    rc: Status,
    cas: u64,
    rflags: RespFlags,
    body: ReplyBody,
}

impl Reply {
    fn new(cookie: Cookie, key: Bytes, rc: Status) -> Self {
        Reply {
            cookie,
            key,
            rc,
            cas: 0,
            rflags: RespFlags::NONE,
            body: ReplyBody::Empty,
        }
    }

    fn terminal(cookie: Cookie) -> Self {
        let mut reply = Reply::new(cookie, Bytes::new(), Status::SUCCESS);
        reply.rflags = RespFlags::FINAL | RespFlags::CLIENTGEN;
        reply
    }

    fn as_raw(&self) -> RawResponse<'_> {
        let body = match &self.body {
            ReplyBody::Empty => RespBody::Empty,
            ReplyBody::Get { value, flags, bufh } => RespBody::Get {
                value: match bufh {
                    Some(buf) => buf.as_slice(),
                    None => value.as_ref(),
                },
                itmflags: *flags,
                bufh: bufh.as_ref(),
            },
            ReplyBody::Counter(value) => RespBody::Counter { value: *value },
            ReplyBody::Stats { server, value } => RespBody::Stats {
                server: server.as_str(),
                value: value.as_ref(),
            },
            ReplyBody::Observe { status, ismaster } => RespBody::Observe {
                status: *status,
                ismaster: *ismaster,
                ttp: 0,
                ttr: 0,
            },
            ReplyBody::Endure { nresponses, exists, npersisted, nreplicated } => RespBody::Endure {
                nresponses: *nresponses,
                exists_master: *exists,
                persisted_master: *exists,
                npersisted: *npersisted,
                nreplicated: *nreplicated,
            },
        };
        RawResponse::base(self.cookie, &self.key, self.rc)
            .with_cas(self.cas)
            .with_flags(self.rflags)
            .with_body(body)
    }
}

struct State {
    bootstrap: Status,
    connecting: bool,
    bucket: Option<Arc<Bucket>>,
    marks: Vec<usize>,
    staged: Vec<Job>,
    committed: VecDeque<Job>,
    faults: Vec<Option<Status>>,
}

impl State {
    fn push(&mut self, job: Job) {
        if self.marks.is_empty() {
            self.committed.push_back(job);
        } else {
            self.staged.push(job);
        }
    }

    fn ready(&self) -> Result<(), Status> {
        if self.bootstrap.success() && self.bucket.is_some() {
            Ok(())
        } else {
            Err(Status::CLIENT_ETMPFAIL)
        }
    }
}

struct Shared {
    cluster: MemoryCluster,
    options: CreateOptions,
    nodes: Vec<String>,
    pool: BufferPool,
    state: Mutex<State>,
}

/// `Instance` implementation over an in-memory cluster.
pub struct MemoryInstance {
    shared: Arc<Shared>,
}

impl MemoryInstance {
    /// Creates an unconnected instance.
    pub fn create(cluster: &MemoryCluster, options: CreateOptions) -> Result<Self, Status> {
        if options.hosts.is_empty() || options.replicas > MAX_REPLICAS {
            return Err(Status::EINVAL);
        }
        let nodes = node_names(&options.hosts, options.replicas);
        debug!(bucket = %options.bucket, nodes = nodes.len(), "memory instance created");
        let faults = vec![None; nodes.len()];
        Ok(MemoryInstance {
            shared: Arc::new(Shared {
                cluster: cluster.clone(),
                options,
                nodes,
                pool: BufferPool::new(),
                state: Mutex::new(State {
                    bootstrap: Status::CLIENT_ETMPFAIL,
                    connecting: false,
                    bucket: None,
                    marks: Vec::new(),
                    staged: Vec::new(),
                    committed: VecDeque::new(),
                    faults,
                }),
            }),
        })
    }

    /// Pool used for values at or above the pool threshold.
    pub fn pool(&self) -> BufferPool {
        self.shared.pool.clone()
    }

    pub fn nodes(&self) -> &[String] {
        &self.shared.nodes
    }

    /// Makes every request touching `node` fail with `rc`, or clears the fault.
    pub fn set_node_failure(&self, node: usize, rc: Option<Status>) {
        self.control().set_node_failure(node, rc);
    }

    /// Returns a handle that stays usable after the instance is boxed.
    pub fn control(&self) -> InstanceControl {
        InstanceControl {
            shared: Arc::clone(&self.shared),
        }
    }

    fn finish_bootstrap(&self) {
        let mut state = self.shared.state.lock();
        if !state.connecting {
            return;
        }
        state.connecting = false;
        let options = &self.shared.options;
        match self.shared.cluster.bucket(&options.bucket) {
            None => state.bootstrap = Status::BUCKET_ENOENT,
            Some(bucket) if !bucket.authenticate(options.password.as_deref()) => {
                state.bootstrap = Status::AUTH_ERROR;
            }
            Some(bucket) => {
                state.bootstrap = Status::SUCCESS;
                state.bucket = Some(bucket);
            }
        }
        debug!(bucket = %options.bucket, status = %state.bootstrap, "bootstrap finished");
    }

    fn execute(&self, job: Job) -> Vec<Reply> {
        let (bucket, faults) = {
            let state = self.shared.state.lock();
            (state.bucket.clone(), state.faults.clone())
        };
        let Some(bucket) = bucket else {
            return Vec::new();
        };
        let now = self.shared.cluster.now();
        match job {
            Job::Single { cookie, op: Op::Stats { group } } => {
                self.run_stats(cookie, &group, &bucket, &faults, now)
            }
            Job::Single { cookie, op } => {
                vec![self.run_single(cookie, op, &bucket, faults[0], now)]
            }
            Job::Observe { cookie, targets } => {
                self.run_observe(cookie, targets, &bucket, &faults, now)
            }
            Job::Endure { cookie, options, targets } => {
                self.run_endure(cookie, &options, targets, &bucket, &faults, now)
            }
        }
    }

    fn run_single(
        &self,
        cookie: Cookie,
        op: Op,
        bucket: &Bucket,
        fault: Option<Status>,
        now: u64,
    ) -> Reply {
        let key = match &op {
            Op::Get { key, .. }
            | Op::Store { key, .. }
            | Op::Counter { key, .. }
            | Op::Remove { key, .. }
            | Op::Touch { key, .. }
            | Op::Unlock { key, .. } => key.clone(),
            Op::Stats { group } => group.clone(),
        };
        if let Some(rc) = fault {
            return Reply::new(cookie, key, rc);
        }
        let mut store = bucket.store();
        let outcome = match op {
            Op::Get { key, expiry, lock } => store.get(&key, expiry, lock, now).map(|item| {
                let bufh = self.pool_value(&item.value);
                (item.cas, ReplyBody::Get { value: item.value, flags: item.flags, bufh })
            }),
            Op::Store { key, value, mode, flags, expiry, cas } => store
                .store(&key, &value, mode, flags, expiry, cas, now)
                .map(|cas| (cas, ReplyBody::Empty)),
            Op::Counter { key, delta, initial, expiry } => store
                .counter(&key, delta, initial, expiry, now)
                .map(|(value, cas)| (cas, ReplyBody::Counter(value))),
            Op::Remove { key, cas } => {
                store.remove(&key, cas, now).map(|cas| (cas, ReplyBody::Empty))
            }
            Op::Touch { key, expiry } => {
                store.touch(&key, expiry, now).map(|cas| (cas, ReplyBody::Empty))
            }
            Op::Unlock { key, cas } => store.unlock(&key, cas, now).map(|()| (0, ReplyBody::Empty)),
            Op::Stats { .. } => Err(Status::EINVAL),
        };
        match outcome {
            Ok((cas, body)) => {
                let mut reply = Reply::new(cookie, key, Status::SUCCESS);
                reply.cas = cas;
                reply.body = body;
                reply
            }
            Err(rc) => Reply::new(cookie, key, rc),
        }
    }

    fn pool_value(&self, value: &Bytes) -> Option<BackBuf> {
        match self.shared.options.pool_threshold {
            Some(threshold) if !value.is_empty() && value.len() >= threshold => {
                Some(self.shared.pool.alloc(value))
            }
            _ => None,
        }
    }

    fn run_stats(
        &self,
        cookie: Cookie,
        group: &Bytes,
        bucket: &Bucket,
        faults: &[Option<Status>],
        now: u64,
    ) -> Vec<Reply> {
        let stats = {
            let store = bucket.store();
            let counters = store.counters();
            vec![
                ("curr_items", store.len(now).to_string()),
                ("cmd_get", counters.cmd_get.to_string()),
                ("cmd_set", counters.cmd_set.to_string()),
                ("uptime", now.saturating_sub(bucket.created_at()).to_string()),
            ]
        };
        let mut replies = Vec::new();
        for (node, server) in self.shared.nodes.iter().enumerate() {
            if let Some(rc) = faults[node] {
                replies.push(stat_reply(cookie, group.clone(), rc, server, Bytes::new()));
                continue;
            }
            let selected: Vec<_> = stats
                .iter()
                .filter(|(name, _)| group.is_empty() || group.as_ref() == name.as_bytes())
                .collect();
            if selected.is_empty() {
                let rc = Status::NOT_SUPPORTED;
                replies.push(stat_reply(cookie, group.clone(), rc, server, Bytes::new()));
                continue;
            }
            for (name, value) in selected {
                replies.push(stat_reply(
                    cookie,
                    Bytes::from_static(name.as_bytes()),
                    Status::SUCCESS,
                    server,
                    Bytes::copy_from_slice(value.as_bytes()),
                ));
            }
        }
        replies.push(Reply::terminal(cookie));
        replies
    }

    fn run_observe(
        &self,
        cookie: Cookie,
        targets: Vec<(Bytes, bool)>,
        bucket: &Bucket,
        faults: &[Option<Status>],
        now: u64,
    ) -> Vec<Reply> {
        let mut replies = Vec::new();
        {
            let mut store = bucket.store();
            for (key, master_only) in targets {
                let cas = store.peek_cas(&key, now);
                let fanout = if master_only { 1 } else { self.shared.nodes.len() };
                for (node, fault) in faults.iter().enumerate().take(fanout) {
                    let ismaster = node == 0;
                    let rc = fault.unwrap_or(Status::SUCCESS);
                    let mut reply = Reply::new(cookie, key.clone(), rc);
                    let status = match (fault, cas) {
                        (None, Some(cas)) => {
                            reply.cas = cas;
                            ObserveStatus(ObserveStatus::FOUND.0 | ObserveStatus::PERSISTED.0)
                        }
                        _ => ObserveStatus::NOT_FOUND,
                    };
                    reply.body = ReplyBody::Observe { status, ismaster };
                    replies.push(reply);
                }
            }
        }
        replies.push(Reply::terminal(cookie));
        replies
    }

    fn run_endure(
        &self,
        cookie: Cookie,
        options: &DurabilityOptions,
        targets: Vec<(Bytes, u64)>,
        bucket: &Bucket,
        faults: &[Option<Status>],
        now: u64,
    ) -> Vec<Reply> {
        let healthy = faults.iter().filter(|fault| fault.is_none()).count();
        let master_up = faults[0].is_none();
        let npersisted = healthy as u8;
        let nreplicated = healthy.saturating_sub(usize::from(master_up)) as u8;
        let mut replies = Vec::new();
        {
            let mut store = bucket.store();
            for (key, expected) in targets {
                let current = store.peek_cas(&key, now);
                let rc = match (faults[0], current) {
                    (Some(rc), _) => rc,
                    (None, None) => Status::KEY_ENOENT,
                    (None, Some(cas)) if expected != 0 && cas != expected => Status::KEY_EEXISTS,
                    (None, Some(_)) => {
                        if usize::from(npersisted) < options.persist_to.nodes()
                            || usize::from(nreplicated) < options.replicate_to.replicas()
                        {
                            Status::ETIMEDOUT
                        } else {
                            Status::SUCCESS
                        }
                    }
                };
                let exists = faults[0].is_none() && current.is_some();
                let mut reply = Reply::new(cookie, key, rc);
                reply.cas = current.unwrap_or(0);
                reply.body = ReplyBody::Endure {
                    nresponses: self.shared.nodes.len() as u16,
                    exists,
                    npersisted: if exists { npersisted } else { 0 },
                    nreplicated: if exists { nreplicated } else { 0 },
                };
                replies.push(reply);
            }
        }
        replies.push(Reply::terminal(cookie));
        replies
    }
}

/// Test-side handle onto a `MemoryInstance`.
#[derive(Clone)]
pub struct InstanceControl {
    shared: Arc<Shared>,
}

impl InstanceControl {
    pub fn set_node_failure(&self, node: usize, rc: Option<Status>) {
        let mut state = self.shared.state.lock();
        match state.faults.get_mut(node) {
            Some(slot) => *slot = rc,
            None => warn!(node, "fault injection ignored for unknown node"),
        }
    }

    pub fn pool(&self) -> BufferPool {
        self.shared.pool.clone()
    }

    pub fn cluster(&self) -> MemoryCluster {
        self.shared.cluster.clone()
    }
}

fn stat_reply(cookie: Cookie, key: Bytes, rc: Status, server: &str, value: Bytes) -> Reply {
    let mut reply = Reply::new(cookie, key, rc);
    reply.body = ReplyBody::Stats {
        server: server.to_string(),
        value,
    };
    reply
}

fn node_names(hosts: &[String], replicas: usize) -> Vec<String> {
    (0..=replicas)
        .map(|node| {
            let host = &hosts[node % hosts.len()];
            let host = host.split(':').next().unwrap_or(host);
            format!("{}:{}", host, BASE_PORT + node as u16)
        })
        .collect()
}

fn validate_key(key: &[u8]) -> Result<(), Status> {
    if key.is_empty() {
        Err(Status::EMPTY_KEY)
    } else if key.len() > MAX_KEY_SIZE {
        Err(Status::E2BIG)
    } else {
        Ok(())
    }
}

fn owned_op(cmd: &NativeCommand<'_>) -> Result<Op, Status> {
    let key = Bytes::copy_from_slice(cmd.key());
    let op = match *cmd {
        NativeCommand::Get { expiry, lock, .. } => Op::Get { key, expiry, lock },
        NativeCommand::Store { value, mode, flags, expiry, cas, .. } => {
            if value.len() > MAX_VALUE_SIZE {
                return Err(Status::E2BIG);
            }
            Op::Store {
                key,
                value: Bytes::copy_from_slice(value),
                mode,
                flags,
                expiry,
                cas,
            }
        }
        NativeCommand::Counter { delta, initial, expiry, .. } => {
            Op::Counter { key, delta, initial, expiry }
        }
        NativeCommand::Remove { cas, .. } => Op::Remove { key, cas },
        NativeCommand::Touch { expiry, .. } => Op::Touch { key, expiry },
        NativeCommand::Unlock { cas, .. } => Op::Unlock { key, cas },
        NativeCommand::Stats { .. } => return Ok(Op::Stats { group: key }),
        NativeCommand::Observe { .. } | NativeCommand::Endure { .. } => {
            return Err(Status::NOT_SUPPORTED);
        }
    };
    validate_key(cmd.key())?;
    Ok(op)
}

impl Instance for MemoryInstance {
    fn connect(&mut self) -> Status {
        let mut state = self.shared.state.lock();
        if state.bootstrap.success() {
            return Status::SUCCESS;
        }
        state.connecting = true;
        debug!(nodes = ?self.shared.nodes, "bootstrap queued");
        Status::SUCCESS
    }

    fn bootstrap_status(&self) -> Status {
        self.shared.state.lock().bootstrap
    }

    fn sched_enter(&mut self) {
        let mut state = self.shared.state.lock();
        let mark = state.staged.len();
        state.marks.push(mark);
    }

    fn sched_leave(&mut self) {
        let mut state = self.shared.state.lock();
        if state.marks.pop().is_none() {
            warn!("sched_leave without an open transaction");
            return;
        }
        if state.marks.is_empty() {
            let staged: Vec<Job> = state.staged.drain(..).collect();
            trace!(jobs = staged.len(), "transaction committed");
            state.committed.extend(staged);
        }
    }

    fn sched_fail(&mut self) {
        let mut state = self.shared.state.lock();
        match state.marks.pop() {
            Some(mark) => {
                trace!(dropped = state.staged.len() - mark, "transaction discarded");
                state.staged.truncate(mark);
            }
            None => warn!("sched_fail without an open transaction"),
        }
    }

    fn schedule(&mut self, cookie: Cookie, cmd: &NativeCommand<'_>) -> Status {
        let mut state = self.shared.state.lock();
        if let Err(rc) = state.ready() {
            return rc;
        }
        match owned_op(cmd) {
            Ok(op) => {
                trace!(%cookie, kind = ?op.kind(), "scheduled");
                state.push(Job::Single { cookie, op });
                Status::SUCCESS
            }
            Err(rc) => rc,
        }
    }

    fn endure_ctx(&mut self, options: &DurabilityOptions) -> Result<Box<dyn MultiCmd>, Status> {
        self.shared.state.lock().ready()?;
        let options = options
            .fit_to(self.shared.nodes.len())
            .ok_or(Status::DURABILITY_ETOOMANY)?;
        Ok(Box::new(EndureCursor {
            shared: Arc::clone(&self.shared),
            options,
            targets: Vec::new(),
        }))
    }

    fn observe_ctx(&mut self) -> Result<Box<dyn MultiCmd>, Status> {
        self.shared.state.lock().ready()?;
        Ok(Box::new(ObserveCursor {
            shared: Arc::clone(&self.shared),
            targets: Vec::new(),
        }))
    }

    fn wait(&mut self, sink: &mut dyn ResponseSink) {
        self.finish_bootstrap();
        loop {
            let job = self.shared.state.lock().committed.pop_front();
            let Some(job) = job else {
                break;
            };
            let kind = job.kind();
            let replies = self.execute(job);
            for reply in &replies {
                if sink.on_response(kind, &reply.as_raw()) == LoopControl::Break {
                    trace!("sink requested breakout");
                    return;
                }
            }
        }
    }

    fn queued(&self) -> usize {
        self.shared.state.lock().committed.len()
    }
}

struct EndureCursor {
    shared: Arc<Shared>,
    options: DurabilityOptions,
    targets: Vec<(Bytes, u64)>,
}

impl MultiCmd for EndureCursor {
    fn add_cmd(&mut self, cmd: &NativeCommand<'_>) -> Status {
        let NativeCommand::Endure { key, cas } = *cmd else {
            return Status::EINVAL;
        };
        if let Err(rc) = validate_key(key) {
            return rc;
        }
        if self.targets.iter().any(|(existing, _)| existing.as_ref() == key) {
            return Status::DUPLICATE_COMMANDS;
        }
        self.targets.push((Bytes::copy_from_slice(key), cas));
        Status::SUCCESS
    }

    fn done(self: Box<Self>, cookie: Cookie) -> Status {
        if self.targets.is_empty() {
            return Status::EINVAL;
        }
        let mut state = self.shared.state.lock();
        state.push(Job::Endure {
            cookie,
            options: self.options,
            targets: self.targets,
        });
        Status::SUCCESS
    }

    fn fail(self: Box<Self>) {
        trace!(targets = self.targets.len(), "endure cursor abandoned");
    }
}

struct ObserveCursor {
    shared: Arc<Shared>,
    targets: Vec<(Bytes, bool)>,
}

impl MultiCmd for ObserveCursor {
    fn add_cmd(&mut self, cmd: &NativeCommand<'_>) -> Status {
        let NativeCommand::Observe { key, master_only } = *cmd else {
            return Status::EINVAL;
        };
        if let Err(rc) = validate_key(key) {
            return rc;
        }
        self.targets.push((Bytes::copy_from_slice(key), master_only));
        Status::SUCCESS
    }

    fn done(self: Box<Self>, cookie: Cookie) -> Status {
        if self.targets.is_empty() {
            return Status::EINVAL;
        }
        let mut state = self.shared.state.lock();
        state.push(Job::Observe {
            cookie,
            targets: self.targets,
        });
        Status::SUCCESS
    }

    fn fail(self: Box<Self>) {
        trace!(targets = self.targets.len(), "observe cursor abandoned");
    }
}

#[cfg(test)]
mod tests {
    use cbpp_common::{PersistTo, ReplicateTo};

    use super::*;

    fn connected(options: CreateOptions) -> (MemoryCluster, MemoryInstance) {
        let cluster = MemoryCluster::new();
        let mut instance = MemoryInstance::create(&cluster, options).unwrap();
        assert_eq!(instance.connect(), Status::SUCCESS);
        instance.wait(&mut |_: CallbackType, _: &RawResponse<'_>| LoopControl::Continue);
        assert_eq!(instance.bootstrap_status(), Status::SUCCESS);
        (cluster, instance)
    }

    type Seen = (CallbackType, Cookie, Vec<u8>, Status, bool);

    fn collect(instance: &mut MemoryInstance) -> Vec<Seen> {
        let mut seen = Vec::new();
        instance.wait(&mut |kind: CallbackType, resp: &RawResponse<'_>| {
            seen.push((kind, resp.cookie, resp.key.to_vec(), resp.rc, resp.is_final()));
            LoopControl::Continue
        });
        seen
    }

    fn upsert<'a>(key: &'a [u8], value: &'a [u8]) -> NativeCommand<'a> {
        NativeCommand::Store {
            key,
            value,
            mode: StoreMode::Upsert,
            flags: 0,
            expiry: 0,
            cas: 0,
        }
    }

    #[test]
    fn schedule_before_bootstrap_is_rejected() {
        let cluster = MemoryCluster::new();
        let mut instance = MemoryInstance::create(&cluster, CreateOptions::default()).unwrap();
        assert_eq!(instance.schedule(Cookie(1), &upsert(b"k", b"v")), Status::CLIENT_ETMPFAIL);
    }

    #[test]
    fn bootstrap_reports_missing_bucket_and_bad_password() {
        let cluster = MemoryCluster::new();
        cluster.create_bucket("secure", Some("pw"));

        let options = CreateOptions { bucket: "nope".into(), ..CreateOptions::default() };
        let mut missing = MemoryInstance::create(&cluster, options).unwrap();
        missing.connect();
        missing.wait(&mut |_: CallbackType, _: &RawResponse<'_>| LoopControl::Continue);
        assert_eq!(missing.bootstrap_status(), Status::BUCKET_ENOENT);

        let options = CreateOptions { bucket: "secure".into(), ..CreateOptions::default() };
        let mut denied = MemoryInstance::create(&cluster, options).unwrap();
        denied.connect();
        denied.wait(&mut |_: CallbackType, _: &RawResponse<'_>| LoopControl::Continue);
        assert_eq!(denied.bootstrap_status(), Status::AUTH_ERROR);
    }

    #[test]
    fn too_many_replicas_is_rejected() {
        let options = CreateOptions { replicas: 4, ..CreateOptions::default() };
        assert!(MemoryInstance::create(&MemoryCluster::new(), options).is_err());
    }

    #[test]
    fn staged_work_is_invisible_until_outermost_leave() {
        let (_cluster, mut instance) = connected(CreateOptions::default());
        instance.sched_enter();
        assert_eq!(instance.schedule(Cookie(1), &upsert(b"a", b"1")), Status::SUCCESS);
        instance.sched_enter();
        assert_eq!(instance.schedule(Cookie(2), &upsert(b"b", b"2")), Status::SUCCESS);
        instance.sched_leave();
        assert_eq!(instance.queued(), 0);
        instance.sched_leave();
        assert_eq!(instance.queued(), 2);

        let seen = collect(&mut instance);
        let cookies: Vec<_> = seen.iter().map(|entry| entry.1).collect();
        assert_eq!(cookies, vec![Cookie(1), Cookie(2)]);
    }

    #[test]
    fn failed_inner_transaction_drops_only_its_work() {
        let (_cluster, mut instance) = connected(CreateOptions::default());
        instance.sched_enter();
        instance.schedule(Cookie(1), &upsert(b"a", b"1"));
        instance.sched_enter();
        instance.schedule(Cookie(2), &upsert(b"b", b"2"));
        instance.sched_fail();
        instance.sched_leave();

        let seen = collect(&mut instance);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, Cookie(1));
    }

    #[test]
    fn validation_codes() {
        let (_cluster, mut instance) = connected(CreateOptions::default());
        assert_eq!(instance.schedule(Cookie(1), &upsert(b"", b"v")), Status::EMPTY_KEY);
        let long = vec![b'k'; MAX_KEY_SIZE + 1];
        assert_eq!(instance.schedule(Cookie(1), &upsert(&long, b"v")), Status::E2BIG);
        let observe = NativeCommand::Observe { key: b"k", master_only: false };
        assert_eq!(instance.schedule(Cookie(1), &observe), Status::NOT_SUPPORTED);
        let stats = NativeCommand::Stats { key: b"" };
        assert_eq!(instance.schedule(Cookie(1), &stats), Status::SUCCESS);
    }

    #[test]
    fn large_values_are_pooled() {
        let options = CreateOptions { pool_threshold: Some(4), ..CreateOptions::default() };
        let (_cluster, mut instance) = connected(options);
        instance.schedule(Cookie(1), &upsert(b"small", b"abc"));
        instance.schedule(Cookie(2), &upsert(b"large", b"abcdef"));
        instance.schedule(Cookie(3), &NativeCommand::Get { key: b"small", expiry: 0, lock: false });
        instance.schedule(Cookie(4), &NativeCommand::Get { key: b"large", expiry: 0, lock: false });

        let mut pooled = Vec::new();
        instance.wait(&mut |_: CallbackType, resp: &RawResponse<'_>| {
            if let RespBody::Get { value, bufh, .. } = resp.body {
                pooled.push((value.to_vec(), bufh.is_some()));
            }
            LoopControl::Continue
        });
        assert_eq!(pooled, vec![(b"abc".to_vec(), false), (b"abcdef".to_vec(), true)]);
        let stats = instance.pool().stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.live, 0);
    }

    #[test]
    fn breakout_leaves_remaining_work_queued() {
        let (_cluster, mut instance) = connected(CreateOptions::default());
        instance.schedule(Cookie(1), &upsert(b"a", b"1"));
        instance.schedule(Cookie(2), &upsert(b"b", b"2"));
        let mut calls = 0;
        instance.wait(&mut |_: CallbackType, _: &RawResponse<'_>| {
            calls += 1;
            LoopControl::Break
        });
        assert_eq!(calls, 1);
        assert_eq!(instance.queued(), 1);
    }

    #[test]
    fn observe_reports_every_node_then_final() {
        let options = CreateOptions { replicas: 2, ..CreateOptions::default() };
        let (_cluster, mut instance) = connected(options);
        instance.schedule(Cookie(1), &upsert(b"k", b"v"));
        collect(&mut instance);

        let mut cursor = instance.observe_ctx().unwrap();
        let observe = NativeCommand::Observe { key: b"k", master_only: false };
        assert_eq!(cursor.add_cmd(&observe), Status::SUCCESS);
        assert_eq!(cursor.done(Cookie(9)), Status::SUCCESS);

        let seen = collect(&mut instance);
        assert_eq!(seen.len(), 4);
        assert!(seen[..3].iter().all(|entry| entry.0 == CallbackType::Observe && !entry.4));
        assert!(seen[3].4);
    }

    #[test]
    fn endure_checks_cas_and_node_health() {
        let options = CreateOptions { replicas: 1, ..CreateOptions::default() };
        let (_cluster, mut instance) = connected(options);
        instance.schedule(Cookie(1), &upsert(b"k", b"v"));
        collect(&mut instance);

        let durability = DurabilityOptions::new(PersistTo::Two, ReplicateTo::One);
        let mut cursor = instance.endure_ctx(&durability).unwrap();
        let endure_k = NativeCommand::Endure { key: b"k", cas: 0 };
        assert_eq!(cursor.add_cmd(&endure_k), Status::SUCCESS);
        assert_eq!(cursor.add_cmd(&endure_k), Status::DUPLICATE_COMMANDS);
        let endure_gone = NativeCommand::Endure { key: b"gone", cas: 0 };
        assert_eq!(cursor.add_cmd(&endure_gone), Status::SUCCESS);
        cursor.done(Cookie(5));
        let seen = collect(&mut instance);
        assert_eq!(seen[0].3, Status::SUCCESS);
        assert_eq!(seen[1].3, Status::KEY_ENOENT);
        assert!(seen[2].4);

        instance.set_node_failure(1, Some(Status::NETWORK_ERROR));
        let mut cursor = instance.endure_ctx(&durability).unwrap();
        cursor.add_cmd(&NativeCommand::Endure { key: b"k", cas: 0 });
        cursor.done(Cookie(6));
        let seen = collect(&mut instance);
        assert_eq!(seen[0].3, Status::ETIMEDOUT);
    }

    #[test]
    fn endure_rejects_unsatisfiable_requirements() {
        let (_cluster, mut instance) = connected(CreateOptions::default());
        let durability = DurabilityOptions::new(PersistTo::Two, ReplicateTo::None);
        assert_eq!(instance.endure_ctx(&durability).err(), Some(Status::DURABILITY_ETOOMANY));
        assert!(instance.endure_ctx(&durability.cap_max(true)).is_ok());
    }

    #[test]
    fn stats_unknown_group_is_not_supported_per_node() {
        let (_cluster, mut instance) = connected(CreateOptions::default());
        instance.schedule(Cookie(3), &NativeCommand::Stats { key: b"bogus" });
        let seen = collect(&mut instance);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].3, Status::NOT_SUPPORTED);
        assert!(seen[1].4);
    }
}
