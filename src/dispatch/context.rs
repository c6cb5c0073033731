//! Call context for handlers.
//!
//! Gives a handler access to:
//! - the correlation id and method name of the call it serves
//! - the items the caller transferred along with the call
//! - a transfer list for its reply (`transfer`)
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use workwire::dispatch::{CallContext, HandlerError};
//!
//! async fn invert(len: usize, mut ctx: CallContext) -> Result<usize, HandlerError> {
//!     let input = ctx.take_transferred();
//!     let out: Vec<u8> = input.items()[0].iter().map(|b| !b).collect();
//!     ctx.transfer(Bytes::from(out));
//!     Ok(len)
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use crate::protocol::CorrelationId;
use crate::transfer::TransferList;

/// Context passed to call handlers.
///
/// `CallContext` is `Clone`; every clone shares the same reply transfer
/// list, so a handler may hand a clone to a helper task and still have the
/// helper's marks travel with its reply.
#[derive(Debug, Clone)]
pub struct CallContext {
    id: CorrelationId,
    method: Arc<str>,
    received: TransferList,
    reply_transfer: Arc<Mutex<TransferList>>,
}

impl CallContext {
    /// Create a context with no received transfers.
    pub fn new(id: CorrelationId, method: impl Into<Arc<str>>) -> Self {
        Self::with_transferred(id, method, TransferList::new())
    }

    /// Create a context carrying the items transferred with the call.
    pub fn with_transferred(
        id: CorrelationId,
        method: impl Into<Arc<str>>,
        received: TransferList,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            received,
            reply_transfer: Arc::new(Mutex::new(TransferList::new())),
        }
    }

    /// Correlation id of the call.
    #[inline]
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Name the call was made under.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Items the caller transferred with the call.
    pub fn transferred(&self) -> &TransferList {
        &self.received
    }

    /// Take ownership of the transferred items.
    pub fn take_transferred(&mut self) -> TransferList {
        std::mem::take(&mut self.received)
    }

    /// Mark an item to be transferred with the reply.
    ///
    /// Marks are kept whether the handler succeeds or fails; the list is
    /// drained by the one reply this call produces.
    pub fn transfer(&self, item: impl Into<Bytes>) {
        self.reply_transfer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .mark(item);
    }

    /// Drain the reply transfer list.
    pub(crate) fn drain_reply_transfer(&self) -> TransferList {
        self.reply_transfer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = CallContext::new(CorrelationId(42), "add");
        assert_eq!(ctx.id(), CorrelationId(42));
        assert_eq!(ctx.method(), "add");
        assert!(ctx.transferred().is_empty());
    }

    #[test]
    fn test_take_transferred() {
        let received: TransferList = vec![Bytes::from_static(b"in")].into();
        let mut ctx = CallContext::with_transferred(CorrelationId(1), "m", received);

        let taken = ctx.take_transferred();
        assert_eq!(taken.items(), &[Bytes::from_static(b"in")]);
        assert!(ctx.transferred().is_empty());
    }

    #[test]
    fn test_clones_share_reply_transfers() {
        let ctx = CallContext::new(CorrelationId(1), "m");
        let helper = ctx.clone();

        ctx.transfer(Bytes::from_static(b"a"));
        helper.transfer(Bytes::from_static(b"b"));

        let drained = ctx.drain_reply_transfer();
        assert_eq!(drained.len(), 2);
        assert!(helper.drain_reply_transfer().is_empty());
    }
}
