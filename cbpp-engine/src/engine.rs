//! # Native Instance Interface
//!
//! ## Design Principles
//!
//! 1. **Strategy Pattern**: The native collaborator sits behind a trait so the
//!    binding layer never depends on a concrete backend.
//! 2. **Transactional Scheduling**: `sched_enter`/`sched_leave`/`sched_fail`
//!    bracket a batch; nothing inside an open batch is visible to `wait`.
//! 3. **Single Dispatch Entry**: `wait` hands every response chunk to one sink
//!    together with its callback kind. The sink decides when to break out.
//! 4. **Consumed Cursors**: Fan-out cursors are finished by value, so a cursor
//!    can be completed or failed exactly once.

use cbpp_common::{CallbackType, Cookie, DurabilityOptions, Status};

use crate::native::{NativeCommand, RawResponse};

/// Returned by a response sink to steer the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    /// Keep delivering queued responses.
    Continue,
    /// Stop iterating and return from `wait`.
    Break,
}

/// Receiver for every response the instance produces.
pub trait ResponseSink {
    /// Called once per response chunk.
    fn on_response(&mut self, kind: CallbackType, resp: &RawResponse<'_>) -> LoopControl;
}

impl<F> ResponseSink for F
where
    F: FnMut(CallbackType, &RawResponse<'_>) -> LoopControl,
{
    fn on_response(&mut self, kind: CallbackType, resp: &RawResponse<'_>) -> LoopControl {
        self(kind, resp)
    }
}

/// Strategy pattern: the connection handle surface used by the binding layer.
///
/// One instance corresponds to one bucket connection.
pub trait Instance: Send {
    /// Starts bootstrapping. The result is available from `bootstrap_status`
    /// after the next `wait`.
    fn connect(&mut self) -> Status;

    /// Outcome of the last bootstrap attempt.
    fn bootstrap_status(&self) -> Status;

    /// Opens a scheduling transaction.
    fn sched_enter(&mut self);

    /// Closes the innermost transaction and commits its work once the
    /// outermost transaction closes.
    fn sched_leave(&mut self);

    /// Closes the innermost transaction and discards the work scheduled in it.
    fn sched_fail(&mut self);

    /// Schedules a single-target request under `cookie`.
    ///
    /// A non-success return means nothing was queued.
    fn schedule(&mut self, cookie: Cookie, cmd: &NativeCommand<'_>) -> Status;

    /// Opens a durability fan-out cursor.
    fn endure_ctx(&mut self, options: &DurabilityOptions) -> Result<Box<dyn MultiCmd>, Status>;

    /// Opens an observe fan-out cursor.
    fn observe_ctx(&mut self) -> Result<Box<dyn MultiCmd>, Status>;

    /// Runs the event loop until no committed work remains or the sink
    /// breaks out.
    fn wait(&mut self, sink: &mut dyn ResponseSink);

    /// Number of committed requests that have not been executed yet.
    fn queued(&self) -> usize;
}

/// Fan-out cursor collecting targets for one aggregate request.
pub trait MultiCmd: Send {
    /// Adds one target.
    fn add_cmd(&mut self, cmd: &NativeCommand<'_>) -> Status;

    /// Finalizes the set and schedules it under `cookie`.
    fn done(self: Box<Self>, cookie: Cookie) -> Status;

    /// Abandons the set.
    fn fail(self: Box<Self>);
}
