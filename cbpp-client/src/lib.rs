//! # cbpp Client
//!
//! Typed batching client over a native KV instance: commands borrow their
//! bytes, responses own theirs, and a `Context` groups operations into one
//! scheduling transaction.

pub mod buffer;
pub mod client;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod logging;
pub mod mctx;
pub mod metrics;
pub mod mt;
pub mod response;

mod dispatch;

pub use buffer::ValueBuf;
pub use client::Client;
pub use commands::{
    CounterCommand, EndureCommand, GetCommand, ObserveCommand, Operation, RemoveCommand,
    StatsCommand, StoreCommand, TouchCommand, UnlockCommand,
};
pub use config::{ClientConfig, ConnSpec};
pub use context::{Context, Ticket};
pub use error::ClientError;
pub use handler::{FollowUps, ResponseHandler};
pub use mctx::{EndureContext, MultiContext};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use mt::{Request, SharedClient};
pub use response::{
    AnyResponse, CounterResponse, EndureResponse, GetResponse, ObserveResponse, RemoveResponse,
    ResponseBase, ResponseKind, ServerReply, StatsResponse, StoreResponse, TouchResponse,
    UnlockResponse,
};

pub use cbpp_common::{
    CallbackType, CbResult, DurabilityOptions, ObserveStatus, PersistTo, ReplicateTo, Status,
    StoreMode,
};
pub use cbpp_engine::{CreateOptions, MemoryCluster, MemoryInstance, RawResponse};
