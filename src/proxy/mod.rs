//! Proxy module - the controller side of a call.
//!
//! A [`RemoteProxy`] is bound to exactly one channel endpoint (and, when it
//! spawned its worker, the [`WorkerHandle`]). Calls go through the
//! [`Invoke`] trait:
//! - [`Invoke::invoke_raw`] - the single entry point every call ends in
//! - [`Invoke::invoke`] - typed arguments and return value
//! - [`Invoke::call`] - builder with transfers
//! - [`remote_interface!`](crate::remote_interface) - generated per-method bindings
//!
//! ```text
//! invoke_raw ─► mint id ─► pending entry ─► post Call ─► PendingReply
//! reply task ◄─ inbox ◄── Reply { id } ── settles the entry with that id
//! ```
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> workwire::Result<()> {
//! use workwire::channel::local;
//! use workwire::dispatch::{Dispatcher, HandlerError};
//! use workwire::proxy::{Invoke, ProxyConfig, RemoteProxy};
//!
//! let (controller, worker) = local::pair();
//! let dispatcher = Dispatcher::builder()
//!     .handle("add", |(a, b): (i64, i64), _ctx| async move { Ok::<_, HandlerError>(a + b) })
//!     .build()?;
//! tokio::spawn(async move { dispatcher.serve(worker).await });
//!
//! let proxy = RemoteProxy::connect(controller, ProxyConfig::default());
//! let sum: i64 = proxy.invoke("add", &(1, 2)).await?;
//! assert_eq!(sum, 3);
//! # Ok(())
//! # }
//! ```

mod interface;
mod pending;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::AbortHandle;

use crate::channel::{Channel, Inbox, SharedPort};
use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::protocol::{validate_method_name, Envelope};
use crate::transfer::TransferList;
use crate::worker::{WorkerHandle, WorkerSpawner};

use pending::PendingCalls;
pub use pending::{PendingReply, Reply};

/// Configuration for a remote proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Reject a call with `Timeout` if no reply arrives in time.
    ///
    /// Default: `None`, calls wait indefinitely.
    pub call_timeout: Option<Duration>,
}

impl ProxyConfig {
    /// Set the per-call deadline.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// The function-call surface over a channel.
pub trait Invoke: Send + Sync {
    /// Send `method` with an encoded argument tuple and the items to
    /// transfer with it.
    ///
    /// The call is posted before this returns; the returned future only
    /// waits for the reply. Any failure to send is reported through it.
    fn invoke_raw(&self, method: &str, args: Bytes, transfer: TransferList) -> PendingReply<Reply>;

    /// Call `method` with a typed argument tuple.
    ///
    /// Arguments are a tuple encoded as a MsgPack array: `&(1, 2)`, `&(x,)`,
    /// or `&()` for none.
    fn invoke<A, R>(&self, method: &str, args: &A) -> PendingReply<R>
    where
        Self: Sized,
        A: Serialize,
        R: DeserializeOwned,
    {
        match MsgPackCodec::encode_bytes(args) {
            Ok(args) => self.invoke_raw(method, args, TransferList::new()).decode(),
            Err(e) => PendingReply::failed(e),
        }
    }

    /// Start building a call to `method`.
    fn call(&self, method: &str) -> CallBuilder<'_, Self>
    where
        Self: Sized,
    {
        CallBuilder::new(self, method)
    }
}

impl<T: Invoke + ?Sized> Invoke for &T {
    fn invoke_raw(&self, method: &str, args: Bytes, transfer: TransferList) -> PendingReply<Reply> {
        (**self).invoke_raw(method, args, transfer)
    }
}

impl<T: Invoke + ?Sized> Invoke for Arc<T> {
    fn invoke_raw(&self, method: &str, args: Bytes, transfer: TransferList) -> PendingReply<Reply> {
        (**self).invoke_raw(method, args, transfer)
    }
}

/// Builder for one call, with the items it transfers.
///
/// ```
/// # async fn demo(proxy: &workwire::RemoteProxy) -> workwire::Result<()> {
/// use bytes::Bytes;
/// use workwire::proxy::Invoke;
///
/// let pixels = Bytes::from(vec![0u8; 4096]);
/// let reply = proxy
///     .call("blur")
///     .args(&(64u32, 64u32))
///     .transfer(pixels)
///     .send_raw()
///     .await?;
/// let blurred = reply.transfer.into_items();
/// # let _ = blurred;
/// # Ok(())
/// # }
/// ```
pub struct CallBuilder<'a, I: ?Sized> {
    target: &'a I,
    method: String,
    args: Result<Bytes>,
    transfer: TransferList,
}

impl<'a, I: Invoke + ?Sized> CallBuilder<'a, I> {
    fn new(target: &'a I, method: &str) -> Self {
        Self {
            target,
            method: method.to_string(),
            args: MsgPackCodec::encode_bytes(&()),
            transfer: TransferList::new(),
        }
    }

    /// Set the argument tuple.
    pub fn args<A: Serialize>(mut self, args: &A) -> Self {
        self.args = MsgPackCodec::encode_bytes(args);
        self
    }

    /// Mark an item to be transferred with this call.
    pub fn transfer(mut self, item: impl Into<Bytes>) -> Self {
        self.transfer.mark(item);
        self
    }

    /// Send and decode the return value as `R`.
    pub fn send<R: DeserializeOwned>(self) -> PendingReply<R> {
        self.send_raw().decode()
    }

    /// Send and keep the raw reply, including its transfers.
    pub fn send_raw(self) -> PendingReply<Reply> {
        match self.args {
            Ok(args) => self.target.invoke_raw(&self.method, args, self.transfer),
            Err(e) => PendingReply::failed(e),
        }
    }
}

struct ProxyInner {
    port: SharedPort,
    pending: Arc<PendingCalls>,
    config: ProxyConfig,
    worker: Option<WorkerHandle>,
    reply_task: AbortHandle,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        self.reply_task.abort();
        self.pending.close();
    }
}

/// Controller-side proxy bound to one channel.
///
/// Cloning is cheap; clones share the channel and the pending-call table.
#[derive(Clone)]
pub struct RemoteProxy {
    inner: Arc<ProxyInner>,
}

impl RemoteProxy {
    /// Bind a proxy to a channel endpoint.
    ///
    /// Spawns the task that matches replies to pending calls; must be
    /// called inside a tokio runtime.
    pub fn connect(channel: Channel, config: ProxyConfig) -> Self {
        Self::bind(channel, config, None)
    }

    /// Spawn a worker and bind a proxy to it.
    pub fn spawn<S>(spawner: &S, locator: &str, config: ProxyConfig) -> Result<Self>
    where
        S: WorkerSpawner + ?Sized,
    {
        let (channel, worker) = spawner.spawn(locator)?;
        tracing::debug!("Spawned {} for {}", worker.id(), locator);
        Ok(Self::bind(channel, config, Some(worker)))
    }

    fn bind(channel: Channel, config: ProxyConfig, worker: Option<WorkerHandle>) -> Self {
        let (port, inbox) = channel.into_parts();
        let pending = Arc::new(PendingCalls::new());
        let reply_task = tokio::spawn(reply_loop(inbox, pending.clone())).abort_handle();

        Self {
            inner: Arc::new(ProxyInner {
                port,
                pending,
                config,
                worker,
                reply_task,
            }),
        }
    }

    /// The worker this proxy is bound to, if it spawned one.
    ///
    /// Lifecycle access only; `"worker"` is never sent as a call.
    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.inner.worker.as_ref()
    }

    /// Number of calls awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Check if the inbound side of the channel has closed.
    pub fn is_closed(&self) -> bool {
        self.inner.pending.is_closed()
    }

    /// The proxy's configuration.
    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }
}

impl Invoke for RemoteProxy {
    fn invoke_raw(&self, method: &str, args: Bytes, transfer: TransferList) -> PendingReply<Reply> {
        if let Err(e) = validate_method_name(method) {
            return PendingReply::failed(e);
        }

        let inner = &self.inner;
        let (id, rx) = match inner.pending.register() {
            Ok(entry) => entry,
            Err(e) => return PendingReply::failed(e),
        };
        let reply = PendingReply::waiting(id, rx, inner.pending.clone(), inner.config.call_timeout);

        tracing::trace!(%id, method, transfers = transfer.len(), "call");
        if let Err(e) = inner.port.post(Envelope::call(id, method, args, transfer)) {
            // Dropping `reply` removes the entry.
            drop(reply);
            return PendingReply::failed(e);
        }
        reply
    }
}

/// Settles pending calls from the inbox until it closes.
async fn reply_loop(mut inbox: Inbox, pending: Arc<PendingCalls>) {
    while let Some(envelope) = inbox.recv().await {
        pending.complete(envelope);
    }
    pending.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::local;
    use crate::error::WorkwireError;
    use crate::protocol::{Message, ReplyMessage};

    #[tokio::test]
    async fn test_reserved_and_empty_names_are_not_sent() {
        let (controller, mut worker) = local::pair();
        let proxy = RemoteProxy::connect(controller, ProxyConfig::default());

        let reserved = proxy.invoke::<_, ()>("worker", &()).await;
        assert!(matches!(reserved, Err(WorkwireError::ReservedMethod(_))));

        let empty = proxy.invoke::<_, ()>("", &()).await;
        assert!(matches!(empty, Err(WorkwireError::Protocol(_))));

        assert!(worker.inbox.try_recv().is_none());
        assert_eq!(proxy.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_is_sent_before_await() {
        let (controller, mut worker) = local::pair();
        let proxy = RemoteProxy::connect(controller, ProxyConfig::default());

        let reply = proxy.invoke::<_, i64>("add", &(1, 2));
        let env = worker.inbox.try_recv().unwrap();
        assert!(matches!(env.message, Message::Call(ref c) if c.method == "add"));
        assert_eq!(proxy.pending_calls(), 1);

        worker
            .port
            .post(Envelope::reply(
                ReplyMessage::value(env.message.id(), MsgPackCodec::encode_bytes(&3i64).unwrap()),
                TransferList::new(),
            ))
            .unwrap();
        assert_eq!(reply.await.unwrap(), 3);
        assert_eq!(proxy.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_builder_transfers_ride_with_the_call() {
        let (controller, mut worker) = local::pair();
        let proxy = RemoteProxy::connect(controller, ProxyConfig::default());
        let buf = Bytes::from_static(b"frame");

        let _reply = proxy.call("blur").args(&(1u8,)).transfer(buf.clone()).send_raw();
        let other = proxy.call("other").send_raw();

        let first = worker.inbox.recv().await.unwrap();
        let second = worker.inbox.recv().await.unwrap();
        assert_eq!(first.transfer.items()[0].as_ptr(), buf.as_ptr());
        assert!(second.transfer.is_empty());
        drop(other);
    }

    #[tokio::test]
    async fn test_send_failure_leaves_no_entry() {
        let (controller, worker) = local::pair();
        let proxy = RemoteProxy::connect(controller, ProxyConfig::default());
        let (_port, inbox) = worker.into_parts();
        drop(inbox);

        let result = proxy.invoke::<_, ()>("add", &(1, 2)).await;
        assert!(matches!(result, Err(WorkwireError::ChannelClosed)));
        assert_eq!(proxy.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_dropping_last_proxy_rejects_outstanding_calls() {
        let (controller, mut worker) = local::pair();
        let proxy = RemoteProxy::connect(controller, ProxyConfig::default());

        let reply = proxy.invoke::<_, ()>("slow", &());
        let env = worker.inbox.recv().await.unwrap();
        drop(proxy);

        // A reply arriving after the drop has no one left to settle it.
        let _ = worker.port.post(Envelope::reply(
            ReplyMessage::value(env.message.id(), MsgPackCodec::encode_bytes(&()).unwrap()),
            TransferList::new(),
        ));

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), reply)
            .await
            .expect("reply settled");
        assert!(matches!(result, Err(WorkwireError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_proxy_without_worker() {
        let (controller, _worker) = local::pair();
        let proxy = RemoteProxy::connect(controller, ProxyConfig::default());
        assert!(proxy.worker().is_none());
        assert!(proxy.config().call_timeout.is_none());
    }
}
