//! Dispatch module - the worker side of a call.
//!
//! Provides:
//! - [`FunctionTable`] - maps method names to handlers
//! - [`CallContext`] - per-call data and the reply transfer list
//! - [`Dispatcher`] - turns each inbound call into exactly one reply
//!
//! # Example
//!
//! ```
//! use workwire::dispatch::{Dispatcher, HandlerError};
//!
//! let dispatcher = Dispatcher::builder()
//!     .handle("add", |(a, b): (i64, i64), _ctx| async move { Ok::<_, HandlerError>(a + b) })
//!     .handle("boom", |_: (), _ctx| async { Err::<(), _>(HandlerError::msg("x")) })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(dispatcher.table().len(), 2);
//! ```

mod context;
mod dispatcher;
mod table;

pub use context::CallContext;
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, DEFAULT_MAX_CONCURRENT_CALLS};
pub use table::{BoxFuture, FunctionTable, Handler, HandlerError, HandlerResult, TypedHandler};
