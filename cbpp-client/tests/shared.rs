//! # Shared Client Integration Tests
//!
//! Purpose: Verify that many tasks can drive one client through its I/O
//! thread and each receives its own response.

use std::sync::Arc;

use bytes::Bytes;

use cbpp_client::{
    AnyResponse, Client, ClientConfig, ClientError, MemoryCluster, Request, ResponseKind,
    SharedClient, Status, StoreMode,
};

fn shared_client() -> SharedClient {
    let config = ClientConfig::new("mem://localhost/default");
    let mut client = Client::open(&config, &MemoryCluster::new()).expect("open client");
    assert_eq!(client.connect(), Status::SUCCESS);
    SharedClient::spawn(client).expect("spawn I/O thread")
}

#[tokio::test]
async fn concurrent_tasks_share_one_client() {
    let shared = Arc::new(shared_client());

    let mut handles = Vec::new();
    for i in 0..16 {
        let shared = Arc::clone(&shared);
        handles.push(tokio::spawn(async move {
            let key = format!("key-{i}");
            let stored = shared.upsert(key.clone(), format!("value-{i}")).await?;
            assert!(stored.status().success());
            let got = shared.get(key).await?;
            Ok::<_, ClientError>(got.value().to_vec())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let value = handle.await.expect("task panicked").expect("request failed");
        assert_eq!(value, format!("value-{i}").into_bytes());
    }
}

#[tokio::test]
async fn counters_accumulate_across_tasks() {
    let shared = Arc::new(shared_client());
    let first = shared.counter("hits", 1, Some(0)).await.unwrap();
    assert_eq!(first.value(), 0);

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { shared.counter("hits", 1, None).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().unwrap().status().success());
    }

    let last = shared.counter("hits", 0, None).await.unwrap();
    assert_eq!(last.value(), 10);
}

#[tokio::test]
async fn typed_helpers_cover_other_operations() {
    let shared = shared_client();
    shared.store(StoreMode::Add, "k", "v").await.unwrap();
    let dup = shared.store(StoreMode::Add, "k", "w").await.unwrap();
    assert_eq!(dup.status(), Status::KEY_EEXISTS);

    let observed = shared.observe("k").await.unwrap();
    assert!(observed.master_reply().exists());

    let stats = shared.stats("curr_items").await.unwrap();
    assert_eq!(stats.get("curr_items", "localhost:11210"), Some("1"));

    assert!(shared.remove("k").await.unwrap().status().success());
    assert_eq!(shared.get("k").await.unwrap().status(), Status::KEY_ENOENT);
}

#[tokio::test]
async fn raw_requests_return_matching_variants() {
    let shared = shared_client();
    let touched = shared
        .execute(Request::Touch { key: Bytes::from_static(b"nope"), expiry: 10 })
        .await
        .unwrap();
    assert!(matches!(touched, AnyResponse::Store(_)));
    assert_eq!(touched.status(), Status::KEY_ENOENT);

    let failed = shared
        .execute(Request::Observe { key: Bytes::new(), master_only: true })
        .await
        .unwrap();
    assert!(matches!(failed, AnyResponse::Observe(_)));
    assert_eq!(failed.status(), Status::EMPTY_KEY);
}

#[test]
fn shutdown_drains_and_stops_the_worker() {
    let shared = shared_client();
    let resp = shared
        .execute_blocking(Request::Store {
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
            mode: StoreMode::Upsert,
            flags: 0,
            expiry: 0,
            cas: 0,
        })
        .unwrap();
    assert!(resp.status().success());
    shared.shutdown();
}
