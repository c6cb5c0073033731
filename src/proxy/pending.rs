//! Pending-call table and the future a caller awaits.
//!
//! Every in-flight call owns one entry, keyed by its correlation id. The
//! entry leaves the table exactly once: when its reply arrives, when the
//! caller gives up (timeout or drop), or when the channel closes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};

use crate::codec::MsgPackCodec;
use crate::error::{Result, WorkwireError};
use crate::protocol::{CorrelationId, Envelope, Message, Outcome};
use crate::transfer::TransferList;

/// Successful reply to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Correlation id of the call.
    pub id: CorrelationId,
    /// MsgPack-encoded return value.
    pub value: Bytes,
    /// Items the worker transferred with the reply.
    pub transfer: TransferList,
}

impl Reply {
    /// Decode the return value.
    pub fn decode<R: DeserializeOwned>(&self) -> Result<R> {
        MsgPackCodec::decode(&self.value)
    }
}

type Settle = oneshot::Sender<Result<Reply>>;

#[derive(Default)]
struct State {
    next_id: u64,
    calls: HashMap<CorrelationId, Settle>,
    closed: bool,
}

/// Table of calls awaiting a reply.
#[derive(Default)]
pub(crate) struct PendingCalls {
    state: Mutex<State>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint an id and add its entry.
    ///
    /// Ids count up from 1 and skip any id still pending.
    pub(crate) fn register(&self) -> Result<(CorrelationId, oneshot::Receiver<Result<Reply>>)> {
        let mut state = self.lock();
        if state.closed {
            return Err(WorkwireError::ChannelClosed);
        }

        let id = loop {
            state.next_id = state.next_id.wrapping_add(1);
            let id = CorrelationId(state.next_id);
            if !state.calls.contains_key(&id) {
                break id;
            }
        };

        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, tx);
        Ok((id, rx))
    }

    /// Settle the entry an inbound envelope answers.
    ///
    /// Returns `false` when nothing was pending under its id (an orphan) or
    /// when the envelope is not a reply.
    pub(crate) fn complete(&self, envelope: Envelope) -> bool {
        let reply = match envelope.message {
            Message::Reply(reply) => reply,
            Message::Call(call) => {
                tracing::debug!("Ignoring call {} ({}) sent to a proxy", call.id, call.method);
                return false;
            }
        };

        let Some(tx) = self.lock().calls.remove(&reply.id) else {
            tracing::trace!(id = %reply.id, "orphan reply");
            return false;
        };

        let outcome = match reply.outcome {
            Outcome::Value(value) => Ok(Reply {
                id: reply.id,
                value,
                transfer: envelope.transfer,
            }),
            Outcome::Error(error) => Err(WorkwireError::Remote(error)),
        };
        tracing::trace!(id = %reply.id, ok = outcome.is_ok(), "reply");

        // The caller may have stopped waiting.
        let _ = tx.send(outcome);
        true
    }

    /// Drop an entry without settling it.
    pub(crate) fn remove(&self, id: CorrelationId) -> bool {
        self.lock().calls.remove(&id).is_some()
    }

    /// Reject every entry with `ChannelClosed` and refuse new ones.
    pub(crate) fn close(&self) {
        let calls = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.calls)
        };
        if !calls.is_empty() {
            tracing::debug!("Channel closed with {} calls pending", calls.len());
        }
        for (_, tx) in calls {
            let _ = tx.send(Err(WorkwireError::ChannelClosed));
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().calls.len()
    }
}

/// Removes a pending entry unless disarmed.
struct PendingGuard {
    id: CorrelationId,
    pending: Arc<PendingCalls>,
    armed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed && self.pending.remove(self.id) {
            tracing::trace!(id = %self.id, "pending call abandoned");
        }
    }
}

enum Inner {
    Failed(Option<WorkwireError>),
    Waiting {
        rx: oneshot::Receiver<Result<Reply>>,
        guard: PendingGuard,
        deadline: Option<(Instant, Duration)>,
        sleep: Option<Pin<Box<Sleep>>>,
    },
}

/// Future resolving to the outcome of one call.
///
/// The call has already been sent by the time this value exists; awaiting
/// only waits for the reply. Dropping it removes the pending entry, so a
/// reply arriving later is treated as an orphan. The worker still runs the
/// call.
#[must_use = "the call is sent already; drop the reply to stop waiting for it"]
pub struct PendingReply<R> {
    inner: Inner,
    decode: fn(Reply) -> Result<R>,
}

impl PendingReply<Reply> {
    pub(crate) fn waiting(
        id: CorrelationId,
        rx: oneshot::Receiver<Result<Reply>>,
        pending: Arc<PendingCalls>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Inner::Waiting {
                rx,
                guard: PendingGuard {
                    id,
                    pending,
                    armed: true,
                },
                deadline: timeout.map(|t| (Instant::now() + t, t)),
                sleep: None,
            },
            decode: Ok,
        }
    }

    /// Decode the return value as `R` once the reply arrives.
    pub fn decode<R: DeserializeOwned>(self) -> PendingReply<R> {
        PendingReply {
            inner: self.inner,
            decode: decode_value::<R>,
        }
    }
}

impl<R> PendingReply<R> {
    /// A reply that fails without anything having been sent.
    pub(crate) fn failed(error: WorkwireError) -> Self {
        Self {
            inner: Inner::Failed(Some(error)),
            decode: |_| Err(WorkwireError::ChannelClosed),
        }
    }

    /// Correlation id of the call, if it was sent.
    pub fn id(&self) -> Option<CorrelationId> {
        match &self.inner {
            Inner::Waiting { guard, .. } => Some(guard.id),
            Inner::Failed(_) => None,
        }
    }
}

fn decode_value<R: DeserializeOwned>(reply: Reply) -> Result<R> {
    reply.decode()
}

impl<R> Future for PendingReply<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let settled = match &mut this.inner {
            Inner::Failed(error) => Err(error.take().unwrap_or(WorkwireError::ChannelClosed)),
            Inner::Waiting {
                rx,
                guard,
                deadline,
                sleep,
            } => {
                if let Poll::Ready(received) = Pin::new(rx).poll(cx) {
                    guard.armed = false;
                    received.unwrap_or(Err(WorkwireError::ChannelClosed))
                } else if let Some((at, limit)) = *deadline {
                    let timer = sleep.get_or_insert_with(|| Box::pin(tokio::time::sleep_until(at)));
                    if timer.as_mut().poll(cx).is_pending() {
                        return Poll::Pending;
                    }
                    tracing::debug!(id = %guard.id, "call timed out");
                    Err(WorkwireError::Timeout(limit))
                } else {
                    return Poll::Pending;
                }
            }
        };

        // Drops the guard, so a timed-out entry leaves the table here.
        this.inner = Inner::Failed(None);
        Poll::Ready(settled.and_then(this.decode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, RemoteError};
    use crate::protocol::ReplyMessage;

    fn value_reply(id: CorrelationId, v: i64) -> Envelope {
        Envelope::reply(
            ReplyMessage::value(id, MsgPackCodec::encode_bytes(&v).unwrap()),
            TransferList::new(),
        )
    }

    fn pending_reply(pending: &Arc<PendingCalls>, timeout: Option<Duration>) -> PendingReply<Reply> {
        let (id, rx) = pending.register().unwrap();
        PendingReply::waiting(id, rx, pending.clone(), timeout)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let pending = PendingCalls::new();
        let ids: Vec<_> = (0..3).map(|_| pending.register().unwrap().0).collect();
        assert_eq!(ids, vec![CorrelationId(1), CorrelationId(2), CorrelationId(3)]);
        assert_eq!(pending.len(), 3);
    }

    #[tokio::test]
    async fn test_complete_resolves_and_removes() {
        let pending = Arc::new(PendingCalls::new());
        let reply = pending_reply(&pending, None);
        let id = reply.id().unwrap();

        assert!(pending.complete(value_reply(id, 3)));
        assert_eq!(pending.len(), 0);
        assert_eq!(reply.decode::<i64>().await.unwrap(), 3);

        // Second reply for the same id is an orphan.
        assert!(!pending.complete(value_reply(id, 4)));
    }

    #[tokio::test]
    async fn test_error_reply_rejects() {
        let pending = Arc::new(PendingCalls::new());
        let reply = pending_reply(&pending, None);
        let id = reply.id().unwrap();

        let remote = RemoteError::new(ErrorKind::Handler, "x");
        pending.complete(Envelope::reply(
            ReplyMessage::error(id, remote.clone()),
            TransferList::new(),
        ));

        let err = reply.await.unwrap_err();
        assert_eq!(err.as_remote(), Some(&remote));
    }

    #[tokio::test]
    async fn test_drop_removes_entry() {
        let pending = Arc::new(PendingCalls::new());
        let reply = pending_reply(&pending, None);
        let id = reply.id().unwrap();

        drop(reply);
        assert_eq!(pending.len(), 0);
        assert!(!pending.complete(value_reply(id, 1)));
    }

    #[tokio::test]
    async fn test_close_rejects_all_and_refuses_new() {
        let pending = Arc::new(PendingCalls::new());
        let a = pending_reply(&pending, None);
        let b = pending_reply(&pending, None);

        pending.close();
        assert!(pending.is_closed());
        assert!(matches!(a.await, Err(WorkwireError::ChannelClosed)));
        assert!(matches!(b.await, Err(WorkwireError::ChannelClosed)));
        assert!(matches!(pending.register(), Err(WorkwireError::ChannelClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_and_removes() {
        let pending = Arc::new(PendingCalls::new());
        let reply = pending_reply(&pending, Some(Duration::from_secs(5)));

        let err = reply.await.unwrap_err();
        assert!(matches!(err, WorkwireError::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_reply() {
        let reply: PendingReply<i64> = PendingReply::failed(WorkwireError::ChannelClosed);
        assert!(reply.id().is_none());
        assert!(matches!(reply.await, Err(WorkwireError::ChannelClosed)));
    }

    #[test]
    fn test_calls_are_not_replies() {
        let pending = PendingCalls::new();
        let call = Envelope::call(CorrelationId(1), "m", Bytes::new(), TransferList::new());
        assert!(!pending.complete(call));
    }
}
