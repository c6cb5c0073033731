//! # workwire
//!
//! Call functions that run inside isolated workers as if they were local
//! async functions.
//!
//! A controller and a worker share nothing but a message-only channel.
//! workwire correlates concurrent calls with their replies on that channel,
//! carries results and errors back, moves marked payloads instead of
//! copying them where the channel allows, and spreads calls over a pool of
//! workers.
//!
//! ## Architecture
//!
//! - **Controller side**: [`RemoteProxy`] mints a correlation id per call,
//!   posts the call and returns a [`PendingReply`] that settles when the
//!   matching reply arrives. [`Pool`] rotates calls over several proxies.
//! - **Worker side**: [`Dispatcher`] looks each call up in its
//!   [`FunctionTable`](dispatch::FunctionTable), runs the handler and posts
//!   exactly one reply.
//! - **Channels**: [`channel::local`] for in-process workers,
//!   [`channel::stream`] for pipes, sockets and child stdio.
//! - **Workers**: [`worker::TaskSpawner`] and [`worker::ProcessSpawner`].
//!
//! ## Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> workwire::Result<()> {
//! use workwire::dispatch::{Dispatcher, HandlerError};
//! use workwire::proxy::{Invoke, ProxyConfig};
//! use workwire::worker::TaskSpawner;
//! use workwire::{ErrorKind, RemoteProxy};
//!
//! let spawner = TaskSpawner::new().module("calc", || {
//!     Dispatcher::builder()
//!         .handle("add", |(a, b): (i64, i64), _ctx| async move { Ok::<_, HandlerError>(a + b) })
//!         .handle("boom", |_: (), _ctx| async { Err::<(), _>(HandlerError::msg("x")) })
//!         .build()
//! });
//!
//! let calc = RemoteProxy::spawn(&spawner, "calc", ProxyConfig::default())?;
//! assert_eq!(calc.invoke::<_, i64>("add", &(1, 2)).await?, 3);
//!
//! let err = calc.invoke::<_, ()>("missing", &(1,)).await.unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::MethodNotFound);
//!
//! let err = calc.invoke::<_, ()>("boom", &()).await.unwrap_err();
//! assert_eq!(err.as_remote().map(|e| e.message.as_str()), Some("x"));
//!
//! if let Some(worker) = calc.worker() {
//!     worker.terminate()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod transfer;
pub mod worker;

pub use dispatch::{CallContext, Dispatcher, HandlerError};
pub use error::{ErrorKind, RemoteError, Result, WorkwireError};
pub use pool::Pool;
pub use proxy::{Invoke, PendingReply, ProxyConfig, RemoteProxy, Reply};
pub use transfer::TransferList;
pub use worker::{WorkerHandle, WorkerSpawner};
