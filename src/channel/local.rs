//! In-process channel over tokio unbounded mpsc.
//!
//! Envelopes are moved between endpoints, so transferred `Bytes` arrive as
//! the very same buffer the sender marked.
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use bytes::Bytes;
//! use workwire::channel::local;
//! use workwire::protocol::{CorrelationId, Envelope};
//! use workwire::transfer::TransferList;
//!
//! let (a, mut b) = local::pair();
//! a.port
//!     .post(Envelope::call(CorrelationId(1), "ping", Bytes::new(), TransferList::new()))
//!     .unwrap();
//! let env = b.inbox.recv().await.unwrap();
//! assert_eq!(env.message.id(), CorrelationId(1));
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Channel, Inbox, Port};
use crate::error::{Result, WorkwireError};
use crate::protocol::Envelope;

/// Port delivering into the peer's inbox.
pub struct LocalPort {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Port for LocalPort {
    fn post(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| WorkwireError::ChannelClosed)
    }
}

/// Create two connected endpoints.
///
/// Whatever one endpoint posts, the other receives, in send order.
pub fn pair() -> (Channel, Channel) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    let a = Channel::new(Arc::new(LocalPort { tx: b_tx }), Inbox::new(a_rx));
    let b = Channel::new(Arc::new(LocalPort { tx: a_tx }), Inbox::new(b_rx));
    (a, b)
}
