//! # Value Buffer Integration Tests
//!
//! Purpose: Check that values outlive the callback that delivered them and
//! that their storage is released exactly once, for both pooled and raw
//! delivery.

use std::sync::Arc;

use cbpp_client::{
    Client, ClientConfig, GetCommand, GetResponse, MemoryCluster, MemoryInstance, ResponseKind,
    Status, StoreCommand,
};
use cbpp_engine::InstanceControl;

fn client_with_threshold(threshold: Option<usize>) -> (Client, InstanceControl) {
    let cluster = MemoryCluster::new();
    let mut options = ClientConfig::new("mem://localhost/default")
        .create_options()
        .expect("options");
    options.pool_threshold = threshold;
    let instance = MemoryInstance::create(&cluster, options).expect("instance");
    let control = instance.control();
    let mut client = Client::with_instance(Box::new(instance));
    assert_eq!(client.connect(), Status::SUCCESS);
    (client, control)
}

#[test]
fn pooled_value_is_released_once_after_last_copy() {
    let (mut client, control) = client_with_threshold(Some(8));
    client.upsert(&StoreCommand::new("big", "a pooled payload"));

    let resp = client.get(&GetCommand::new("big"));
    assert!(resp.has_shared_buffer());
    assert_eq!(resp.value(), b"a pooled payload");
    assert_eq!(resp.valuebuf().refcount(), 1);

    let pool = control.pool();
    assert_eq!(pool.stats().allocated, 1);
    assert_eq!(pool.stats().live, 1);

    let copy = resp.clone();
    assert_eq!(copy.valuebuf().refcount(), 2);
    drop(resp);
    assert_eq!(copy.value(), b"a pooled payload");
    assert_eq!(pool.stats().live, 1);

    drop(copy);
    let stats = pool.stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.released, 1);
}

#[test]
fn clear_gives_back_the_pooled_reference() {
    let (mut client, control) = client_with_threshold(Some(1));
    client.upsert(&StoreCommand::new("k", "value"));

    let mut resp = client.get(&GetCommand::new("k"));
    assert!(resp.has_shared_buffer());
    resp.clear();
    assert!(resp.value().is_empty());
    assert_eq!(control.pool().stats().live, 0);
}

#[test]
fn small_values_are_copied_even_with_a_pool() {
    let (mut client, control) = client_with_threshold(Some(64));
    client.upsert(&StoreCommand::new("small", "tiny"));

    let resp = client.get(&GetCommand::new("small"));
    assert!(resp.has_owned_buffer());
    assert_eq!(resp.value(), b"tiny");
    assert_eq!(control.pool().stats().allocated, 0);
}

#[test]
fn raw_value_is_freed_once_after_last_copy() {
    let (mut client, _control) = client_with_threshold(None);
    client.upsert(&StoreCommand::new("raw", "raw payload"));

    let resp = client.get(&GetCommand::new("raw"));
    assert!(resp.has_owned_buffer());
    let weak = Arc::downgrade(resp.valuebuf().owned().expect("owned copy"));

    let copies: Vec<GetResponse> = (0..3).map(|_| resp.clone()).collect();
    assert_eq!(resp.valuebuf().refcount(), 4);
    drop(resp);
    assert!(weak.upgrade().is_some());
    for copy in &copies {
        assert_eq!(copy.value(), b"raw payload");
    }
    drop(copies);
    assert!(weak.upgrade().is_none());
}

#[test]
fn empty_and_failed_values_hold_no_storage() {
    let (mut client, control) = client_with_threshold(Some(1));
    client.upsert(&StoreCommand::new("empty", ""));

    let empty = client.get(&GetCommand::new("empty"));
    assert!(empty.status().success());
    assert_eq!(empty.valuebuf().refcount(), 0);

    let missing = client.get(&GetCommand::new("missing"));
    assert_eq!(missing.status(), Status::KEY_ENOENT);
    assert_eq!(missing.valuebuf().refcount(), 0);
    assert_eq!(control.pool().stats().allocated, 0);
}
