//! # Response Dispatch
//!
//! Purpose: Route every native response chunk to the response object that
//! was registered for its cookie, and decide when `wait` may return.
//!
//! ## Design Principles
//!
//! 1. **Typed Handles**: Cookies are plain integers that index a registry of
//!    response slots. No pointers cross the native boundary.
//! 2. **Side Table for Endure**: Per-key durability chunks share their
//!    context's cookie, so they are routed by cookie and then by key.
//! 3. **Breakout at Zero**: When the last outstanding operation completes,
//!    the sink asks the instance to stop iterating.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use cbpp_common::{CallbackType, Cookie};
use cbpp_engine::{LoopControl, RawResponse, ResponseSink};

use crate::handler::FollowUps;
use crate::metrics::ClientMetrics;
use crate::mt::Request;
use crate::response::AnyResponse;

struct Slot {
    response: AnyResponse,
    /// Owner is gone; drop the slot once the response completes.
    orphan: bool,
}

/// Registry of in-flight responses plus the outstanding counter.
pub(crate) struct Dispatcher {
    slots: HashMap<Cookie, Slot>,
    endure: HashMap<Cookie, HashMap<Bytes, Cookie>>,
    next_cookie: u64,
    outstanding: usize,
    followups: FollowUps,
    metrics: Arc<ClientMetrics>,
}

impl Dispatcher {
    pub(crate) fn new(metrics: Arc<ClientMetrics>) -> Self {
        Dispatcher {
            slots: HashMap::new(),
            endure: HashMap::new(),
            next_cookie: 1,
            outstanding: 0,
            followups: FollowUps::default(),
            metrics,
        }
    }

    pub(crate) fn next_cookie(&mut self) -> Cookie {
        let cookie = Cookie(self.next_cookie);
        self.next_cookie += 1;
        cookie
    }

    pub(crate) fn register(&mut self, response: AnyResponse) -> Cookie {
        let cookie = self.next_cookie();
        self.slots.insert(cookie, Slot { response, orphan: false });
        cookie
    }

    /// Registers a response nobody will collect; it is dropped on completion.
    pub(crate) fn register_detached(&mut self, response: AnyResponse) -> Cookie {
        let cookie = self.next_cookie();
        self.slots.insert(cookie, Slot { response, orphan: true });
        cookie
    }

    pub(crate) fn unregister(&mut self, cookie: Cookie) -> Option<AnyResponse> {
        self.slots.remove(&cookie).map(|slot| slot.response)
    }

    pub(crate) fn get(&self, cookie: Cookie) -> Option<&AnyResponse> {
        self.slots.get(&cookie).map(|slot| &slot.response)
    }

    /// Removes and returns the response if it has completed.
    pub(crate) fn take_done(&mut self, cookie: Cookie) -> Option<AnyResponse> {
        if self.slots.get(&cookie)?.response.done() {
            self.unregister(cookie)
        } else {
            None
        }
    }

    /// Gives up interest in `cookie`. An incomplete response stays registered
    /// until it completes so the outstanding count stays exact.
    pub(crate) fn release(&mut self, cookie: Cookie) {
        let Some(slot) = self.slots.get_mut(&cookie) else {
            return;
        };
        if slot.response.done() {
            self.slots.remove(&cookie);
        } else {
            slot.orphan = true;
        }
    }

    /// Number of live registry slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn take_followups(&mut self) -> Vec<Request> {
        self.followups.take()
    }

    pub(crate) fn track_endure(&mut self, ctx: Cookie, keys: HashMap<Bytes, Cookie>) {
        self.endure.insert(ctx, keys);
    }

    pub(crate) fn add_outstanding(&mut self, count: usize) {
        self.outstanding += count;
        self.metrics.record_scheduled(count);
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding
    }

    fn complete_one(&mut self) -> LoopControl {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding == 0 {
            trace!("no operations outstanding, breaking out");
            LoopControl::Break
        } else {
            LoopControl::Continue
        }
    }

    fn dispatch_endure(&mut self, resp: &RawResponse<'_>) -> LoopControl {
        if resp.is_final() {
            if self.endure.remove(&resp.cookie).is_none() {
                warn!(cookie = %resp.cookie, "final durability response for unknown context");
                self.metrics.record_unmatched();
                return LoopControl::Continue;
            }
            return self.complete_one();
        }
        let slot = self
            .endure
            .get(&resp.cookie)
            .and_then(|keys| keys.get(resp.key))
            .copied();
        match slot {
            Some(cookie) => {
                self.deliver(cookie, CallbackType::Endure, resp);
            }
            None => {
                warn!(cookie = %resp.cookie, "durability response for unknown key ignored");
                self.metrics.record_unmatched();
            }
        }
        LoopControl::Continue
    }

    /// Feeds one chunk to a slot. Returns true if the slot just completed.
    fn deliver(&mut self, cookie: Cookie, kind: CallbackType, resp: &RawResponse<'_>) -> bool {
        let Some(slot) = self.slots.get_mut(&cookie) else {
            debug!(%cookie, ?kind, "response for unknown cookie ignored");
            self.metrics.record_unmatched();
            return false;
        };
        slot.response.handle_response(kind, resp, &mut self.followups);
        if !slot.response.done() {
            return false;
        }
        if slot.orphan {
            self.slots.remove(&cookie);
        }
        true
    }
}

impl ResponseSink for Dispatcher {
    fn on_response(&mut self, kind: CallbackType, resp: &RawResponse<'_>) -> LoopControl {
        trace!(cookie = %resp.cookie, ?kind, rc = %resp.rc, "response");
        self.metrics.record_response(!resp.rc.success());
        if kind == CallbackType::Endure {
            return self.dispatch_endure(resp);
        }
        if self.deliver(resp.cookie, kind, resp) {
            self.complete_one()
        } else {
            LoopControl::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use cbpp_common::{RespFlags, Status};
    use cbpp_engine::RespBody;

    use super::*;
    use crate::response::{EndureResponse, GetResponse, ResponseKind, StatsResponse};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(ClientMetrics::new()))
    }

    #[test]
    fn breaks_out_when_last_operation_completes() {
        let mut d = dispatcher();
        let a = d.register(GetResponse::default().into_any());
        let b = d.register(GetResponse::default().into_any());
        d.add_outstanding(2);

        let body = RespBody::Get { value: b"v", itmflags: 0, bufh: None };
        let first = RawResponse::base(a, b"a", Status::SUCCESS).with_body(body);
        assert_eq!(d.on_response(CallbackType::Get, &first), LoopControl::Continue);
        let second = RawResponse::base(b, b"b", Status::KEY_ENOENT);
        assert_eq!(d.on_response(CallbackType::Get, &second), LoopControl::Break);
        assert_eq!(d.outstanding(), 0);

        let got = d.take_done(a).and_then(|any| any.into_typed::<GetResponse>()).unwrap();
        assert_eq!(got.value(), b"v");
    }

    #[test]
    fn unknown_cookies_are_ignored() {
        let mut d = dispatcher();
        d.add_outstanding(1);
        let stray = RawResponse::base(Cookie(99), b"x", Status::SUCCESS);
        assert_eq!(d.on_response(CallbackType::Store, &stray), LoopControl::Continue);
        assert_eq!(d.outstanding(), 1);
        assert_eq!(d.metrics.snapshot().unmatched_total, 1);
    }

    #[test]
    fn multi_chunk_response_completes_on_final() {
        let mut d = dispatcher();
        let cookie = d.register(StatsResponse::default().into_any());
        d.add_outstanding(1);
        let chunk = RawResponse::base(cookie, b"uptime", Status::SUCCESS)
            .with_body(RespBody::Stats { server: "n0", value: b"1" });
        assert_eq!(d.on_response(CallbackType::Stats, &chunk), LoopControl::Continue);
        let last = RawResponse::base(cookie, b"", Status::SUCCESS).with_flags(RespFlags::FINAL);
        assert_eq!(d.on_response(CallbackType::Stats, &last), LoopControl::Break);
    }

    #[test]
    fn endure_routes_by_key_and_counts_final_once() {
        let mut d = dispatcher();
        let ctx = d.next_cookie();
        let foo = d.register(EndureResponse::default().into_any());
        let bar = d.register(EndureResponse::default().into_any());
        let keys = HashMap::from([
            (Bytes::from_static(b"foo"), foo),
            (Bytes::from_static(b"bar"), bar),
        ]);
        d.track_endure(ctx, keys);
        d.add_outstanding(1);

        let r1 = RawResponse::base(ctx, b"bar", Status::KEY_ENOENT);
        let r2 = RawResponse::base(ctx, b"foo", Status::SUCCESS);
        assert_eq!(d.on_response(CallbackType::Endure, &r1), LoopControl::Continue);
        assert_eq!(d.on_response(CallbackType::Endure, &r2), LoopControl::Continue);
        assert_eq!(d.outstanding(), 1);
        let last = RawResponse::base(ctx, b"", Status::SUCCESS)
            .with_flags(RespFlags::FINAL | RespFlags::CLIENTGEN);
        assert_eq!(d.on_response(CallbackType::Endure, &last), LoopControl::Break);

        let bar = d.take_done(bar).unwrap();
        assert_eq!(bar.status(), Status::KEY_ENOENT);
        assert_eq!(d.take_done(foo).unwrap().status(), Status::SUCCESS);
    }

    #[test]
    fn released_incomplete_slot_is_dropped_on_completion() {
        let mut d = dispatcher();
        let cookie = d.register(GetResponse::default().into_any());
        d.add_outstanding(1);
        d.release(cookie);
        assert!(d.get(cookie).is_some());
        let resp = RawResponse::base(cookie, b"k", Status::SUCCESS);
        assert_eq!(d.on_response(CallbackType::Get, &resp), LoopControl::Break);
        assert!(d.get(cookie).is_none());
    }

    #[test]
    fn detached_slot_is_dropped_on_completion() {
        let mut d = dispatcher();
        let cookie = d.register_detached(GetResponse::default().into_any());
        d.add_outstanding(1);
        assert_eq!(d.len(), 1);
        let resp = RawResponse::base(cookie, b"k", Status::SUCCESS);
        assert_eq!(d.on_response(CallbackType::Get, &resp), LoopControl::Break);
        assert_eq!(d.len(), 0);
    }
}
