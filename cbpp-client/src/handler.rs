//! # User Response Handlers
//!
//! Purpose: Let callers attach their own callback object to a scheduled
//! operation instead of a typed response.
//!
//! ## Design Principles
//!
//! 1. **Registry Owned**: A handler is boxed into the dispatch registry and
//!    dropped once it reports `done`. Callers keep results in their own state.
//! 2. **Deferred Follow-Ups**: A handler cannot touch the client while the
//!    event loop is running; it queues owned requests that the client
//!    schedules in the same `wait`.

use std::fmt;

use cbpp_common::CallbackType;
use cbpp_engine::RawResponse;

use crate::mt::Request;

/// Caller-supplied callback invoked for every chunk of one operation.
pub trait ResponseHandler: Send {
    /// Called once per response chunk. Requests pushed to `followups` are
    /// scheduled before `wait` returns.
    fn handle_response(
        &mut self,
        kind: CallbackType,
        resp: &RawResponse<'_>,
        followups: &mut FollowUps,
    );

    /// True once no further chunks are expected.
    fn done(&self) -> bool;
}

impl fmt::Debug for dyn ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandler")
            .field("done", &self.done())
            .finish()
    }
}

/// Requests queued by handlers during one event-loop pass.
#[derive(Debug, Default)]
pub struct FollowUps {
    requests: Vec<Request>,
}

impl FollowUps {
    pub fn push(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub(crate) fn take(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }
}
