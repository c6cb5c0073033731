//! Dispatcher builder and serve loop.
//!
//! The [`DispatcherBuilder`] provides a fluent API for registering
//! handlers. The [`Dispatcher`] turns each inbound call into exactly one
//! reply:
//! 1. Look the method up in the function table
//! 2. Run the handler on its own task (capacity-limited by a semaphore)
//! 3. Post a value or error reply carrying the call's correlation id
//!
//! # Example
//!
//! ```no_run
//! use workwire::dispatch::{Dispatcher, HandlerError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::builder()
//!         .handle("add", |(a, b): (i64, i64), _ctx| async move {
//!             Ok::<_, HandlerError>(a + b)
//!         })
//!         .build()?;
//!
//!     dispatcher.serve_stdio().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};

use super::{CallContext, FunctionTable, HandlerError};
use crate::channel::{stream, Channel, SharedPort, StreamConfig};
use crate::error::{ErrorKind, RemoteError, Result, WorkwireError};
use crate::protocol::{CallMessage, Envelope, Message, ReplyMessage};
use crate::transfer::TransferList;

/// Default maximum concurrent calls.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 256;

/// Configuration for a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Calls running at once. Further calls wait for a slot.
    pub max_concurrent_calls: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
        }
    }
}

impl DispatcherConfig {
    /// Set the maximum number of concurrent calls.
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_calls = limit;
        self
    }
}

/// Builder for configuring and creating a [`Dispatcher`].
///
/// Registration errors are held until [`build`](Self::build) so handlers
/// can be chained.
pub struct DispatcherBuilder {
    table: FunctionTable,
    config: DispatcherConfig,
    error: Option<WorkwireError>,
}

impl DispatcherBuilder {
    /// Create a new dispatcher builder.
    pub fn new() -> Self {
        Self {
            table: FunctionTable::new(),
            config: DispatcherConfig::default(),
            error: None,
        }
    }

    /// Register a method handler.
    ///
    /// The handler receives the decoded argument tuple and a context.
    pub fn handle<F, A, R, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(A, CallContext) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
    {
        if self.error.is_none() {
            if let Err(e) = self.table.register(method, handler) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Set the maximum number of concurrent calls.
    ///
    /// Default: 256
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.config.max_concurrent_calls = limit;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the dispatcher.
    ///
    /// # Errors
    ///
    /// The first registration error, or `Config` for a zero call limit.
    pub fn build(self) -> Result<Dispatcher> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Dispatcher::new(self.table, self.config)
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-side listener that runs calls against a [`FunctionTable`].
///
/// Cloning is cheap; clones share the table and the call limit.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<FunctionTable>,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a new dispatcher builder.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Create a dispatcher over a filled table.
    pub fn new(table: FunctionTable, config: DispatcherConfig) -> Result<Self> {
        if config.max_concurrent_calls == 0 {
            return Err(WorkwireError::Config(
                "max_concurrent_calls must be at least 1".into(),
            ));
        }
        Ok(Self {
            table: Arc::new(table),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls)),
        })
    }

    /// The function table.
    pub fn table(&self) -> &FunctionTable {
        &self.table
    }

    /// Handle one inbound envelope.
    ///
    /// Waits for a free call slot, then runs the call on its own task and
    /// returns that task. Replies go out through `port`. Non-call messages
    /// are ignored and yield `None`.
    pub async fn handle(&self, envelope: Envelope, port: &SharedPort) -> Option<JoinHandle<()>> {
        let (call, transfer, permit) = self.admit(envelope).await?;
        Some(tokio::spawn(self.call_task(call, transfer, port.clone(), permit)))
    }

    /// Serve calls from `channel` until its inbox closes.
    ///
    /// Calls already running when the inbox closes are allowed to finish
    /// and reply. Dropping the returned future aborts them.
    pub async fn serve(&self, channel: Channel) -> Result<()> {
        let (port, mut inbox) = channel.into_parts();
        let mut calls = JoinSet::new();

        loop {
            tokio::select! {
                envelope = inbox.recv() => {
                    let Some(envelope) = envelope else { break };
                    if let Some((call, transfer, permit)) = self.admit(envelope).await {
                        calls.spawn(self.call_task(call, transfer, port.clone(), permit));
                    }
                }
                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Call task failed: {}", e);
                    }
                }
            }
        }

        tracing::debug!("Inbox closed, waiting for {} running calls", calls.len());
        while calls.join_next().await.is_some() {}
        Ok(())
    }

    /// Serve calls over any byte stream.
    pub async fn serve_stream<R, W>(&self, reader: R, writer: W, config: StreamConfig) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.serve(stream::connect(reader, writer, config)).await
    }

    /// Serve calls over this process's stdin and stdout.
    ///
    /// Entry point for a worker launched by
    /// [`ProcessSpawner`](crate::worker::ProcessSpawner).
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve_stream(tokio::io::stdin(), tokio::io::stdout(), StreamConfig::default())
            .await
    }

    async fn admit(
        &self,
        envelope: Envelope,
    ) -> Option<(CallMessage, TransferList, OwnedSemaphorePermit)> {
        let call = match envelope.message {
            Message::Call(call) => call,
            Message::Reply(reply) => {
                tracing::warn!("Ignoring reply {} sent to a dispatcher", reply.id);
                return None;
            }
        };

        // The semaphore is never closed.
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        Some((call, envelope.transfer, permit))
    }

    fn call_task(
        &self,
        call: CallMessage,
        received: TransferList,
        port: SharedPort,
        permit: OwnedSemaphorePermit,
    ) -> impl Future<Output = ()> + Send + 'static {
        let table = self.table.clone();

        async move {
            let _permit = permit;
            let id = call.id;
            let ctx = CallContext::with_transferred(id, call.method.as_str(), received);
            tracing::trace!(%id, method = %call.method, "dispatch");

            let outcome = {
                let ctx = ctx.clone();
                let invocation = tokio::spawn(async move {
                    match table.get(&call.method) {
                        Some(handler) => handler.call(&call.args, ctx).await,
                        None => Err(RemoteError::method_not_found(&call.method)),
                    }
                });
                let _abort = AbortOnDrop(invocation.abort_handle());

                match invocation.await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => {
                        tracing::error!("Handler for call {} panicked", id);
                        Err(RemoteError::new(ErrorKind::Handler, "handler panicked"))
                    }
                    Err(_) => Err(RemoteError::new(ErrorKind::Handler, "handler cancelled")),
                }
            };

            let reply = match outcome {
                Ok(value) => ReplyMessage::value(id, value),
                Err(error) => {
                    tracing::debug!(%id, "call failed: {}", error);
                    ReplyMessage::error(id, error)
                }
            };

            let transfer = ctx.drain_reply_transfer();
            match port.post(Envelope::reply(reply, transfer)) {
                Ok(()) => {}
                Err(WorkwireError::ChannelClosed) => {
                    tracing::debug!("Reply {} not delivered: channel closed", id);
                }
                Err(e) => {
                    // The reply could not be framed; the caller still gets one.
                    tracing::warn!("Reply {} rejected by the channel: {}", id, e);
                    let fallback = RemoteError::new(
                        ErrorKind::Serialization,
                        format!("cannot send reply of {}: {}", ctx.method(), e),
                    );
                    if let Err(e) = port.post(Envelope::reply(
                        ReplyMessage::error(id, fallback),
                        TransferList::new(),
                    )) {
                        tracing::debug!("Reply {} not delivered: {}", id, e);
                    }
                }
            }
        }
    }
}

/// Aborts the handler task if the call task is dropped first.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
