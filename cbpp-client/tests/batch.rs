//! # Batch Integration Tests
//!
//! Purpose: Drive scheduling contexts end to end against the in-memory
//! cluster.
//!
//! ## Design Principles
//!
//! 1. **Counter Accounting**: Check the outstanding count after submit, bail
//!    and wait.
//! 2. **Atomic Batches**: A bailed or dropped batch leaves no trace in the
//!    bucket.
//! 3. **Failures Are Empty**: Failed responses never carry values.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use cbpp_client::{
    CallbackType, Client, ClientConfig, FollowUps, GetCommand, MemoryCluster, RawResponse,
    RemoveCommand, Request, ResponseHandler, ResponseKind, StatsCommand, Status, StoreCommand,
};

fn connected(cluster: &MemoryCluster) -> Client {
    let mut client = Client::open(&ClientConfig::new("mem://localhost/default"), cluster)
        .expect("open client");
    assert_eq!(client.connect(), Status::SUCCESS);
    client
}

#[test]
fn foo_bar_baz_batch_round_trip() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);

    {
        let mut ctx = client.context();
        ctx.add_detached(&StoreCommand::new("foo", "FOOVALUE")).unwrap();
        ctx.add_detached(&StoreCommand::new("bar", "BARVALUE")).unwrap();
        ctx.add_detached(&StoreCommand::new("baz", "BAZVALUE")).unwrap();
        assert_eq!(ctx.pending(), 3);
        ctx.submit();
        assert_eq!(ctx.pending(), 0);
        ctx.wait();

        ctx.reset();
        assert!(ctx.is_active());
        for key in ["foo", "bar", "baz", "missing"] {
            let _ = ctx.get(key).unwrap();
        }
        ctx.submit();
        ctx.wait();

        assert_eq!(ctx["foo"].value(), b"FOOVALUE");
        assert_eq!(ctx["bar"].value(), b"BARVALUE");
        assert_eq!(ctx["baz"].value_str(), Some("BAZVALUE"));

        let missing = &ctx["missing"];
        assert_eq!(missing.status(), Status::KEY_ENOENT);
        assert!(missing.value().is_empty());

        let never_requested = &ctx["other"];
        assert!(never_requested.status().success());
        assert_eq!(never_requested.valuesize(), 0);
    }
    assert_eq!(client.outstanding(), 0);

    for key in ["foo", "bar", "baz"] {
        assert!(client.remove(&RemoveCommand::new(key)).status().success());
    }
    assert_eq!(client.get(&GetCommand::new("foo")).status(), Status::KEY_ENOENT);
}

#[test]
fn submit_counts_every_operation_until_wait() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);

    let tickets = {
        let mut ctx = client.context();
        let tickets: Vec<_> = (0..5)
            .map(|i| {
                let key = format!("k{i}");
                ctx.add(&StoreCommand::new(&key, "v")).unwrap()
            })
            .collect();
        ctx.submit();
        tickets
    };
    assert_eq!(client.outstanding(), 5);
    for ticket in &tickets {
        assert!(client.response(ticket).is_some());
    }

    client.wait();
    assert_eq!(client.outstanding(), 0);
    for ticket in tickets {
        let resp = client.take(ticket).expect("completed store");
        assert!(resp.status().success());
        assert_ne!(resp.cas(), 0);
    }
}

#[test]
fn bail_discards_the_whole_batch() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);

    let ticket = {
        let mut ctx = client.context();
        let ticket = ctx.add(&StoreCommand::new("bailed", "v")).unwrap();
        ctx.add_detached(&StoreCommand::new("bailed-too", "v")).unwrap();
        ctx.bail();
        assert!(!ctx.is_active());
        assert_eq!(ctx.pending(), 0);
        assert_eq!(ctx.add(&GetCommand::new("late")).unwrap_err(), Status::SCHED_STATE);
        ticket
    };
    assert_eq!(client.outstanding(), 0);
    assert!(client.response(&ticket).is_none());

    client.wait();
    assert_eq!(client.get(&GetCommand::new("bailed")).status(), Status::KEY_ENOENT);
    assert_eq!(client.get(&GetCommand::new("bailed-too")).status(), Status::KEY_ENOENT);
}

#[test]
fn dropping_an_active_context_bails() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);

    let ticket = {
        let mut ctx = client.context();
        ctx.add(&StoreCommand::new("dropped", "v")).unwrap()
    };
    assert_eq!(client.outstanding(), 0);
    assert!(client.response(&ticket).is_none());

    assert_eq!(client.get(&GetCommand::new("dropped")).status(), Status::KEY_ENOENT);
    assert_eq!(client.metrics().scheduled_total, 1);
}

#[test]
fn failed_add_leaves_the_batch_usable() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);
    let long_key = "k".repeat(251);

    let mut ctx = client.context();
    assert_eq!(ctx.add(&GetCommand::new("")).unwrap_err(), Status::EMPTY_KEY);
    assert_eq!(ctx.add(&GetCommand::new(&long_key)).unwrap_err(), Status::E2BIG);
    assert_eq!(ctx.pending(), 0);

    let ticket = ctx.add(&StoreCommand::new("ok", "v")).unwrap();
    ctx.submit();
    ctx.wait();
    assert!(ctx.take(ticket).unwrap().status().success());
}

#[test]
fn failed_get_carries_no_value() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);
    client.upsert(&StoreCommand::new("locked", "secret"));
    assert!(client.get(&GetCommand::new("locked").locktime(15)).status().success());

    let resp = client.get(&GetCommand::new("locked").locktime(15));
    assert_eq!(resp.status(), Status::ETMPFAIL);
    assert!(resp.value().is_empty());
    assert!(!resp.has_owned_buffer() && !resp.has_shared_buffer());
}

#[test]
fn forgotten_ticket_still_drains() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);

    let ticket = {
        let mut ctx = client.context();
        let ticket = ctx.add(&StoreCommand::new("k", "v")).unwrap();
        ctx.submit();
        ticket
    };
    client.forget(ticket);
    assert_eq!(client.outstanding(), 1);
    client.wait();
    assert_eq!(client.outstanding(), 0);
    assert!(client.take(ticket).is_none());
    assert_eq!(client.get(&GetCommand::new("k")).value(), b"v");
}

#[test]
fn detached_batches_leave_no_slots_behind() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);

    for round in 0..100 {
        let mut ctx = client.context();
        for i in 0..10 {
            let key = format!("r{round}-{i}");
            ctx.add_detached(&StoreCommand::new(&key, "v")).unwrap();
        }
        ctx.submit();
        ctx.wait();
    }
    assert_eq!(client.outstanding(), 0);
    assert_eq!(client.registered(), 0);
    assert_eq!(client.get(&GetCommand::new("r99-9")).value(), b"v");
    assert_eq!(client.registered(), 0);
}

#[test]
fn resubmitted_context_counts_only_new_operations() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);

    let mut ctx = client.context();
    ctx.add_detached(&StoreCommand::new("a", "1")).unwrap();
    ctx.submit();
    assert_eq!(ctx.pending(), 0);
    ctx.reset();
    ctx.add_detached(&StoreCommand::new("b", "2")).unwrap();
    ctx.submit();
    drop(ctx);
    assert_eq!(client.outstanding(), 2);
    client.wait();
    assert_eq!(client.outstanding(), 0);
}

struct ChunkCounter {
    chunks: Arc<AtomicUsize>,
    finished: bool,
}

impl ResponseHandler for ChunkCounter {
    fn handle_response(
        &mut self,
        kind: CallbackType,
        resp: &RawResponse<'_>,
        _followups: &mut FollowUps,
    ) {
        assert_eq!(kind, CallbackType::Stats);
        if resp.is_final() {
            self.finished = true;
        } else {
            self.chunks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn done(&self) -> bool {
        self.finished
    }
}

#[test]
fn handler_sees_every_chunk() {
    let cluster = MemoryCluster::new();
    let config = ClientConfig::new("mem://localhost/default?replicas=2");
    let mut client = Client::open(&config, &cluster).expect("open client");
    assert_eq!(client.connect(), Status::SUCCESS);

    let chunks = Arc::new(AtomicUsize::new(0));
    {
        let mut ctx = client.context();
        let handler = ChunkCounter { chunks: Arc::clone(&chunks), finished: false };
        ctx.add_with_handler(&StatsCommand::new("uptime"), handler).unwrap();
        ctx.submit();
        ctx.wait();
    }
    assert_eq!(chunks.load(Ordering::SeqCst), 3);
    assert_eq!(client.outstanding(), 0);
    assert_eq!(client.registered(), 0);
}

struct RemoveWhenFound {
    found: Arc<AtomicUsize>,
    finished: bool,
}

impl ResponseHandler for RemoveWhenFound {
    fn handle_response(
        &mut self,
        _kind: CallbackType,
        resp: &RawResponse<'_>,
        followups: &mut FollowUps,
    ) {
        self.finished = true;
        if resp.rc.success() {
            self.found.fetch_add(1, Ordering::SeqCst);
            followups.push(Request::Remove { key: Bytes::copy_from_slice(resp.key), cas: 0 });
        }
    }

    fn done(&self) -> bool {
        self.finished
    }
}

#[test]
fn handler_follow_ups_run_in_the_same_wait() {
    let cluster = MemoryCluster::new();
    let mut client = connected(&cluster);
    client.upsert(&StoreCommand::new("doomed", "v"));

    let found = Arc::new(AtomicUsize::new(0));
    {
        let mut ctx = client.context();
        for key in ["doomed", "absent"] {
            let handler = RemoveWhenFound { found: Arc::clone(&found), finished: false };
            ctx.add_with_handler(&GetCommand::new(key), handler).unwrap();
        }
        ctx.submit();
        ctx.wait();
    }
    assert_eq!(found.load(Ordering::SeqCst), 1);
    assert_eq!(client.outstanding(), 0);
    assert_eq!(client.registered(), 0);
    assert_eq!(client.get(&GetCommand::new("doomed")).status(), Status::KEY_ENOENT);
}
