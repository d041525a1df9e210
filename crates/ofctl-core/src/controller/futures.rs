// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response correlation.
//!
//! A [`MessageFuture`] stands for the eventual outcome of one request sent to
//! a datapath. The [`FutureRegistry`] keys pending futures by
//! (datapath, xid); every resolution path removes the entry and resolves the
//! future in one step, so a future is resolved at most once.
//!
//! ```text
//!  send_future ──► registry[(dpid, xid)] ──► reply / ERROR / sweep
//!                                                │
//!                     await_for() ◄── condvar ◄──┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::{OfError, OfResult};
use crate::protocol::{DataPathId, ErrorBody, Message, MessageBody};

/// Resolution state of a [`MessageFuture`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FutureResult {
    /// Not resolved yet
    Unsatisfied,
    /// Datapath replied
    Success,
    /// Datapath answered with an OpenFlow ERROR
    OfmError,
    /// Local failure (send error, disconnect)
    Exception,
    /// Aged out or timed out while waiting
    Timeout,
}

#[derive(Debug)]
struct FutureState {
    result: FutureResult,
    /// Reply fragments, last one included once resolved
    replies: Vec<Message>,
    error: Option<Message>,
    cause: Option<String>,
}

#[derive(Debug)]
struct FutureInner {
    dpid: DataPathId,
    request: Message,
    created: Instant,
    state: Mutex<FutureState>,
    done: Condvar,
}

/// Eventual outcome of a request sent to a datapath.
///
/// Clones share the same state.
#[derive(Clone, Debug)]
pub struct MessageFuture {
    inner: Arc<FutureInner>,
}

impl MessageFuture {
    /// Future for `request`, correlated by the request's xid.
    pub fn new(dpid: DataPathId, request: Message) -> Self {
        Self {
            inner: Arc::new(FutureInner {
                dpid,
                request,
                created: Instant::now(),
                state: Mutex::new(FutureState {
                    result: FutureResult::Unsatisfied,
                    replies: Vec::new(),
                    error: None,
                    cause: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub fn dpid(&self) -> DataPathId {
        self.inner.dpid
    }

    pub fn xid(&self) -> u32 {
        self.inner.request.xid()
    }

    pub fn request(&self) -> &Message {
        &self.inner.request
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created
    }

    pub fn result(&self) -> FutureResult {
        self.inner.state.lock().result
    }

    pub fn is_done(&self) -> bool {
        self.result() != FutureResult::Unsatisfied
    }

    /// Reply fragments received so far (all of them once resolved).
    pub fn replies(&self) -> Vec<Message> {
        self.inner.state.lock().replies.clone()
    }

    /// Final reply, if resolved successfully.
    pub fn reply(&self) -> Option<Message> {
        let state = self.inner.state.lock();
        match state.result {
            FutureResult::Success => state.replies.last().cloned(),
            _ => None,
        }
    }

    /// ERROR message, if resolved as an OpenFlow error.
    pub fn error_message(&self) -> Option<Message> {
        self.inner.state.lock().error.clone()
    }

    /// Failure description for `Exception` and `Timeout` results.
    pub fn cause(&self) -> Option<String> {
        self.inner.state.lock().cause.clone()
    }

    /// Same underlying future.
    pub fn same_as(&self, other: &MessageFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Records one reply fragment without resolving.
    pub fn add_fragment(&self, msg: Message) {
        let mut state = self.inner.state.lock();
        if state.result == FutureResult::Unsatisfied {
            state.replies.push(msg);
        }
    }

    fn resolve(&self, f: impl FnOnce(&mut FutureState)) -> bool {
        let mut state = self.inner.state.lock();
        if state.result != FutureResult::Unsatisfied {
            return false;
        }
        f(&mut state);
        self.inner.done.notify_all();
        true
    }

    /// Resolves with the final reply. Returns false if already resolved.
    pub fn set_success(&self, reply: Message) -> bool {
        self.resolve(|s| {
            s.replies.push(reply);
            s.result = FutureResult::Success;
        })
    }

    /// Resolves with an OpenFlow ERROR from the datapath.
    pub fn set_error(&self, error: Message) -> bool {
        self.resolve(|s| {
            s.error = Some(error);
            s.result = FutureResult::OfmError;
        })
    }

    /// Resolves as a local failure.
    pub fn set_failure(&self, cause: impl Into<String>) -> bool {
        let cause = cause.into();
        self.resolve(|s| {
            s.cause = Some(cause);
            s.result = FutureResult::Exception;
        })
    }

    pub fn set_timeout(&self, cause: impl Into<String>) -> bool {
        let cause = cause.into();
        self.resolve(|s| {
            s.cause = Some(cause);
            s.result = FutureResult::Timeout;
        })
    }

    /// Blocks until resolved or `timeout` elapses; returns the state at
    /// that point (`Unsatisfied` on timeout).
    pub fn await_for(&self, timeout: Duration) -> FutureResult {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.result == FutureResult::Unsatisfied {
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.result
    }

    /// Converts a resolved future into a `Result` for synchronous callers.
    pub fn into_result(&self) -> OfResult<Vec<Message>> {
        let state = self.inner.state.lock();
        match state.result {
            FutureResult::Success => Ok(state.replies.clone()),
            FutureResult::OfmError => {
                let error = match state.error.as_ref().map(Message::body) {
                    Some(MessageBody::Error(e)) => e.clone(),
                    _ => ErrorBody::new(0, 0, Vec::new()),
                };
                Err(OfError::ErrorReply {
                    request: self.inner.request.msg_type(),
                    error,
                })
            }
            FutureResult::Exception => Err(OfError::Protocol(
                state.cause.clone().unwrap_or_else(|| "request failed".into()),
            )),
            FutureResult::Timeout => Err(OfError::Timeout(
                state.cause.clone().unwrap_or_else(|| self.inner.request.to_string()),
            )),
            FutureResult::Unsatisfied => Err(OfError::Timeout(format!(
                "no reply to {} from {}",
                self.inner.request, self.inner.dpid
            ))),
        }
    }
}

impl fmt::Display for MessageFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{MsgFuture:{},xid={},{:?}}}",
            self.inner.dpid,
            self.xid(),
            self.result()
        )
    }
}

// ============================================================================
// Registry
// ============================================================================

type FutureKey = (DataPathId, u32);

/// Pending futures keyed by (datapath, xid).
#[derive(Debug, Default)]
pub struct FutureRegistry {
    pending: DashMap<FutureKey, MessageFuture>,
}

impl FutureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Registers `future`. A pending future under the same key is left in
    /// place and the newcomer is failed.
    pub fn insert(&self, future: &MessageFuture) -> OfResult<()> {
        let key = (future.dpid(), future.xid());
        match self.pending.entry(key) {
            Entry::Occupied(_) => {
                let err = OfError::DuplicateXid {
                    dpid: key.0,
                    xid: key.1,
                };
                future.set_failure(err.to_string());
                Err(err)
            }
            Entry::Vacant(slot) => {
                slot.insert(future.clone());
                Ok(())
            }
        }
    }

    /// Pending future for the reply's xid, left registered.
    pub fn find(&self, dpid: DataPathId, xid: u32) -> Option<MessageFuture> {
        self.pending.get(&(dpid, xid)).map(|f| f.value().clone())
    }

    /// Removes the entry only if it still holds `future`.
    fn take(&self, future: &MessageFuture) -> bool {
        self.pending
            .remove_if(&(future.dpid(), future.xid()), |_, f| f.same_as(future))
            .is_some()
    }

    /// Removes and resolves as success. Returns false if the future was not
    /// pending here.
    pub fn success(&self, future: &MessageFuture, reply: Message) -> bool {
        let removed = self.take(future);
        future.set_success(reply);
        removed
    }

    /// Removes and resolves with the datapath's ERROR.
    pub fn fail_with_error(&self, future: &MessageFuture, error: Message) -> bool {
        let removed = self.take(future);
        future.set_error(error);
        removed
    }

    /// Removes and resolves as a local failure.
    pub fn fail(&self, future: &MessageFuture, cause: impl Into<String>) -> bool {
        let removed = self.take(future);
        future.set_failure(cause);
        removed
    }

    /// Removes and resolves as timed out (caller gave up waiting).
    pub fn time_out(&self, future: &MessageFuture, cause: impl Into<String>) -> bool {
        let removed = self.take(future);
        future.set_timeout(cause);
        removed
    }

    /// Removes without resolving; the future stays unsatisfied and later
    /// replies no longer reach it.
    pub fn cancel(&self, future: &MessageFuture) -> bool {
        self.take(future)
    }

    /// Routes a reply to its pending future: fragments accumulate, the last
    /// one (or an ERROR) resolves it. Returns true when a future matched.
    pub fn complete(&self, dpid: DataPathId, msg: &Message) -> bool {
        let Some(future) = self.find(dpid, msg.xid()) else {
            return false;
        };
        match msg.body() {
            MessageBody::Error(_) => {
                self.fail_with_error(&future, msg.clone());
            }
            _ if msg.has_more() => future.add_fragment(msg.clone()),
            _ => {
                self.success(&future, msg.clone());
            }
        }
        true
    }

    /// Fails every future older than `age_out`; returns how many.
    pub fn sweep(&self, age_out: Duration, now: Instant) -> usize {
        let mut stale = Vec::new();
        self.pending.retain(|_, f| {
            let keep = now.saturating_duration_since(f.created_at()) < age_out;
            if !keep {
                stale.push(f.clone());
            }
            keep
        });
        for f in &stale {
            f.set_timeout(format!("aged out after {:?}", age_out));
        }
        stale.len()
    }

    /// Fails every future pending on `dpid` (datapath went away).
    pub fn fail_datapath(&self, dpid: DataPathId, cause: &str) -> usize {
        let mut gone = Vec::new();
        self.pending.retain(|(d, _), f| {
            if *d == dpid {
                gone.push(f.clone());
                false
            } else {
                true
            }
        });
        for f in &gone {
            f.set_failure(cause);
        }
        gone.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageBuilder, ProtocolVersion};
    use std::thread;

    const DPID: DataPathId = DataPathId::new(0x10);

    fn request(xid: u32) -> Message {
        MessageBuilder::new(ProtocolVersion::V_1_3, MessageBody::BarrierRequest)
            .xid(xid)
            .build()
    }

    fn reply(xid: u32) -> Message {
        MessageBuilder::new(ProtocolVersion::V_1_3, MessageBody::BarrierReply)
            .xid(xid)
            .build()
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let reg = FutureRegistry::new();
        let first = MessageFuture::new(DPID, request(5));
        let second = MessageFuture::new(DPID, request(5));
        reg.insert(&first).unwrap();

        let err = reg.insert(&second).unwrap_err();
        assert!(matches!(err, OfError::DuplicateXid { xid: 5, .. }));
        assert_eq!(second.result(), FutureResult::Exception);

        // original untouched
        assert_eq!(first.result(), FutureResult::Unsatisfied);
        assert!(reg.find(DPID, 5).unwrap().same_as(&first));
    }

    #[test]
    fn test_same_xid_other_datapath_allowed() {
        let reg = FutureRegistry::new();
        reg.insert(&MessageFuture::new(DPID, request(5))).unwrap();
        reg.insert(&MessageFuture::new(DataPathId::new(0x11), request(5)))
            .unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_success_removes_exactly_once() {
        let reg = FutureRegistry::new();
        let f = MessageFuture::new(DPID, request(6));
        reg.insert(&f).unwrap();

        assert!(reg.success(&f, reply(6)));
        assert!(!reg.success(&f, reply(6)));
        assert!(!reg.fail(&f, "late"));
        assert_eq!(f.result(), FutureResult::Success);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_fail_and_cancel() {
        let reg = FutureRegistry::new();
        let a = MessageFuture::new(DPID, request(7));
        let b = MessageFuture::new(DPID, request(8));
        reg.insert(&a).unwrap();
        reg.insert(&b).unwrap();

        assert!(reg.fail(&a, "send failed"));
        assert_eq!(a.result(), FutureResult::Exception);
        assert_eq!(a.cause().as_deref(), Some("send failed"));

        assert!(reg.cancel(&b));
        assert!(!reg.cancel(&b));
        assert_eq!(b.result(), FutureResult::Unsatisfied);
        assert!(reg.is_empty());

        // a late reply finds nothing to resolve
        assert!(!reg.complete(DPID, &reply(8)));
        assert_eq!(b.result(), FutureResult::Unsatisfied);
    }

    #[test]
    fn test_complete_accumulates_fragments() {
        use crate::protocol::{MultipartReply, MultipartReplyBody, MultipartType};

        let reg = FutureRegistry::new();
        let f = MessageFuture::new(DPID, request(9));
        reg.insert(&f).unwrap();

        let part = |more| {
            MessageBuilder::new(
                ProtocolVersion::V_1_3,
                MessageBody::MultipartReply(MultipartReply {
                    mp_type: MultipartType::PortStats,
                    more,
                    body: MultipartReplyBody::PortStats(Vec::new()),
                }),
            )
            .xid(9)
            .build()
        };
        assert!(reg.complete(DPID, &part(true)));
        assert!(!f.is_done());
        assert!(reg.complete(DPID, &part(false)));
        assert_eq!(f.result(), FutureResult::Success);
        assert_eq!(f.replies().len(), 2);
        assert!(!reg.complete(DPID, &part(false)));
    }

    #[test]
    fn test_complete_with_error() {
        let reg = FutureRegistry::new();
        let f = MessageFuture::new(DPID, request(10));
        reg.insert(&f).unwrap();
        let error = MessageBuilder::new(
            ProtocolVersion::V_1_3,
            MessageBody::Error(ErrorBody::new(ErrorBody::PORT_MOD_FAILED, 0, Vec::new())),
        )
        .xid(10)
        .build();
        assert!(reg.complete(DPID, &error));
        assert_eq!(f.result(), FutureResult::OfmError);
        assert!(matches!(f.into_result(), Err(OfError::ErrorReply { .. })));
    }

    #[test]
    fn test_sweep_ages_out() {
        let reg = FutureRegistry::new();
        let old = MessageFuture::new(DPID, request(11));
        reg.insert(&old).unwrap();
        let young = MessageFuture::new(DPID, request(12));
        reg.insert(&young).unwrap();

        let later = young.created_at() + Duration::from_millis(10);
        assert_eq!(reg.sweep(Duration::from_secs(6), later), 0);

        let much_later = old.created_at() + Duration::from_secs(7);
        assert_eq!(reg.sweep(Duration::from_secs(6), much_later), 2);
        assert_eq!(old.result(), FutureResult::Timeout);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_fail_datapath() {
        let reg = FutureRegistry::new();
        let f = MessageFuture::new(DPID, request(13));
        reg.insert(&f).unwrap();
        reg.insert(&MessageFuture::new(DataPathId::new(0x99), request(13)))
            .unwrap();
        assert_eq!(reg.fail_datapath(DPID, "disconnected"), 1);
        assert_eq!(f.result(), FutureResult::Exception);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_await_wakes_on_resolution() {
        let f = MessageFuture::new(DPID, request(14));
        let waiter = f.clone();
        let t = thread::spawn(move || waiter.await_for(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        f.set_success(reply(14));
        assert_eq!(t.join().unwrap(), FutureResult::Success);
        assert_eq!(f.reply().unwrap().xid(), 14);
    }

    #[test]
    fn test_await_times_out() {
        let f = MessageFuture::new(DPID, request(15));
        assert_eq!(
            f.await_for(Duration::from_millis(10)),
            FutureResult::Unsatisfied
        );
        assert!(matches!(f.into_result(), Err(OfError::Timeout(_))));
    }
}
