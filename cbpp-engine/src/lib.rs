//! # cbpp Engine
//!
//! The native collaborator behind the binding layer: the `Instance` trait,
//! its request and response structures, the pooled back-buffer allocator and
//! an in-memory multi-node implementation.

pub mod cluster;
pub mod engine;
pub mod memory;
pub mod native;
pub mod pool;
pub mod store;

pub use cluster::{Bucket, DEFAULT_BUCKET, MemoryCluster};
pub use engine::{Instance, LoopControl, MultiCmd, ResponseSink};
pub use memory::{
    CreateOptions, DEFAULT_POOL_THRESHOLD, InstanceControl, MAX_REPLICAS, MemoryInstance,
};
pub use native::{NativeCommand, RawResponse, RespBody};
pub use pool::{BackBuf, BufferPool, PoolStats};
pub use store::{ItemStore, ItemView, StoreCounters};
