//! Client-surface errors that are not plain native status codes.

use std::io;

use thiserror::Error;

use cbpp_common::Status;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("operation failed {0}")]
    Status(#[from] Status),

    #[error("invalid connection string `{connstr}`: {reason}")]
    InvalidConnstr { connstr: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("a tracing subscriber is already installed")]
    AlreadyInstalled,

    #[error("client worker thread has stopped")]
    WorkerGone,
}

impl ClientError {
    /// Native status carried by this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            ClientError::Status(rc) => Some(*rc),
            _ => None,
        }
    }
}
