//! Function table mapping method names to handlers.
//!
//! The table is filled once while the worker is set up and is read-only
//! afterwards; a [`Dispatcher`](super::Dispatcher) shares it behind an `Arc`.
//!
//! # Example
//!
//! ```
//! use workwire::dispatch::{FunctionTable, HandlerError};
//!
//! let mut table = FunctionTable::new();
//! table
//!     .register("add", |(a, b): (i64, i64), _ctx| async move { Ok::<_, HandlerError>(a + b) })
//!     .unwrap();
//!
//! assert!(table.contains("add"));
//! assert!(table.register("worker", |_: (), _ctx| async { Ok::<_, HandlerError>(()) }).is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::CallContext;
use crate::codec::MsgPackCodec;
use crate::error::{ErrorKind, RemoteError, Result, WorkwireError};
use crate::protocol::validate_method_name;

/// Outcome of a raw handler call: the encoded value or the reply error.
pub type HandlerResult = std::result::Result<Bytes, RemoteError>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error raised by a handler.
///
/// Any `std::error::Error` converts into it with `?`, keeping the message
/// and the short type name. Identity and backtrace do not survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    name: Option<String>,
    message: String,
}

impl HandlerError {
    /// Error with a message only.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
        }
    }

    /// Error with a type name and a message.
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error type name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Reduce to the payload carried by an error reply.
    pub fn into_remote(self) -> RemoteError {
        RemoteError {
            kind: ErrorKind::Handler,
            name: self.name,
            message: self.message,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error,
{
    fn from(e: E) -> Self {
        Self::named(short_type_name::<E>(), e.to_string())
    }
}

/// `workwire::error::WorkwireError` -> `WorkwireError`.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Trait for call handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle a call with its raw, encoded argument tuple.
    fn call(&self, args: &[u8], ctx: CallContext) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that decodes arguments and encodes the result around a typed
/// handler function.
pub struct TypedHandler<F, A, R, Fut> {
    handler: F,
    _phantom: PhantomData<fn(A) -> (R, Fut)>,
}

impl<F, A, R, Fut> TypedHandler<F, A, R, Fut>
where
    F: Fn(A, CallContext) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, A, R, Fut> Handler for TypedHandler<F, A, R, Fut>
where
    F: Fn(A, CallContext) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
{
    fn call(&self, args: &[u8], ctx: CallContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: A = match MsgPackCodec::decode(args) {
            Ok(v) => v,
            Err(e) => {
                let err = serialization_error("decode arguments", ctx.method(), &e);
                return Box::pin(async move { Err(err) });
            }
        };

        let method = ctx.method().to_string();
        let fut = (self.handler)(parsed, ctx);
        Box::pin(async move {
            match fut.await {
                Ok(value) => MsgPackCodec::encode_bytes(&value)
                    .map_err(|e| serialization_error("encode result", &method, &e)),
                Err(e) => Err(e.into_remote()),
            }
        })
    }
}

fn serialization_error(what: &str, method: &str, e: &WorkwireError) -> RemoteError {
    RemoteError::new(
        ErrorKind::Serialization,
        format!("cannot {} of {}: {}", what, method, e),
    )
}

/// Mapping from method name to handler.
#[derive(Default)]
pub struct FunctionTable {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl FunctionTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler under `name`.
    ///
    /// The handler receives the decoded argument tuple and a [`CallContext`].
    /// A zero-argument method takes `()`.
    ///
    /// # Errors
    ///
    /// `Protocol` for an empty name, `ReservedMethod` for `"worker"`,
    /// `Config` if the name is already registered.
    pub fn register<F, A, R, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(A, CallContext) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
    {
        self.register_handler(name, TypedHandler::new(handler))
    }

    /// Register an already-built handler.
    pub fn register_handler(&mut self, name: &str, handler: impl Handler) -> Result<()> {
        validate_method_name(name)?;
        if self.handlers.contains_key(name) {
            return Err(WorkwireError::Config(format!(
                "Method registered twice: {}",
                name
            )));
        }
        self.handlers.insert(name.to_string(), Box::new(handler));
        Ok(())
    }

    /// Get a handler by method name.
    pub fn get(&self, name: &str) -> Option<&dyn Handler> {
        self.handlers.get(name).map(|h| h.as_ref())
    }

    /// Check if a method is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered method names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CorrelationId;

    fn ctx(method: &str) -> CallContext {
        CallContext::new(CorrelationId(1), method)
    }

    fn add_table() -> FunctionTable {
        let mut table = FunctionTable::new();
        table
            .register("add", |(a, b): (i64, i64), _ctx| async move { Ok(a + b) })
            .unwrap();
        table
    }

    #[tokio::test]
    async fn test_typed_handler_roundtrip() {
        let table = add_table();
        let args = MsgPackCodec::encode(&(1i64, 2i64)).unwrap();

        let out = table.get("add").unwrap().call(&args, ctx("add")).await.unwrap();
        assert_eq!(MsgPackCodec::decode::<i64>(&out).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_bad_arguments_are_serialization_errors() {
        let table = add_table();
        let args = MsgPackCodec::encode(&("one", "two")).unwrap();

        let err = table.get("add").unwrap().call(&args, ctx("add")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Serialization);
        assert!(err.message.contains("add"));
    }

    #[tokio::test]
    async fn test_handler_error_is_reduced() {
        let mut table = FunctionTable::new();
        table
            .register("boom", |_: (), _ctx| async {
                Err::<(), _>(HandlerError::msg("x"))
            })
            .unwrap();

        let args = MsgPackCodec::encode(&()).unwrap();
        let err = table.get("boom").unwrap().call(&args, ctx("boom")).await.unwrap_err();
        assert_eq!(err, RemoteError::new(ErrorKind::Handler, "x"));
    }

    #[test]
    fn test_registration_rules() {
        let mut table = add_table();

        let dup = table.register("add", |_: (), _ctx| async { Ok(()) });
        assert!(matches!(dup, Err(WorkwireError::Config(_))));

        let empty = table.register("", |_: (), _ctx| async { Ok(()) });
        assert!(matches!(empty, Err(WorkwireError::Protocol(_))));

        let reserved = table.register("worker", |_: (), _ctx| async { Ok(()) });
        assert!(matches!(reserved, Err(WorkwireError::ReservedMethod(_))));

        assert_eq!(table.len(), 1);
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["add"]);
    }

    #[test]
    fn test_missing_handler() {
        let table = FunctionTable::new();
        assert!(table.get("nonexistent").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_handler_error_from_std_error() {
        fn parse(s: &str) -> std::result::Result<i32, HandlerError> {
            Ok(s.parse::<i32>()?)
        }

        let err = parse("nope").unwrap_err();
        assert_eq!(err.name(), Some("ParseIntError"));
        assert_eq!(err.message(), "invalid digit found in string");

        let remote = err.into_remote();
        assert_eq!(remote.kind, ErrorKind::Handler);
        assert_eq!(remote.name.as_deref(), Some("ParseIntError"));
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<WorkwireError>(), "WorkwireError");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
    }
}
