//! Channel module - the message-only link between a controller and a worker.
//!
//! A channel endpoint is two halves:
//! - a [`Port`] to post envelopes to the peer (`send(message, transferList)`)
//! - an [`Inbox`] yielding envelopes from the peer, once each
//!
//! Implementations:
//! - [`local::pair`] - in-process endpoints, transfers are moved
//! - [`stream::connect`] - any `AsyncRead`/`AsyncWrite` pair, transfers are copied
//!
//! ```text
//! controller                 worker
//!   Port  ──── envelopes ───► Inbox
//!   Inbox ◄─── envelopes ──── Port
//! ```

pub mod local;
pub mod stream;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::Envelope;

pub use stream::StreamConfig;

/// Sending half of a channel endpoint.
///
/// `post` is synchronous: the envelope is encoded (if the channel encodes)
/// and queued before it returns, so serialization failures surface at the
/// send site and no suspension point separates marking transfers from
/// sending them.
pub trait Port: Send + Sync + 'static {
    /// Queue an envelope for delivery to the peer.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the peer is gone, a serialization error if the
    /// envelope cannot be encoded for this channel.
    fn post(&self, envelope: Envelope) -> Result<()>;
}

/// Shared handle to a port.
pub type SharedPort = Arc<dyn Port>;

/// Receiving half of a channel endpoint.
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Inbox {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self { rx }
    }

    /// Wait for the next inbound envelope.
    ///
    /// Returns `None` once the peer side has gone away.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Take an envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

/// One endpoint of a channel.
pub struct Channel {
    /// Outbound half.
    pub port: SharedPort,
    /// Inbound half.
    pub inbox: Inbox,
}

impl Channel {
    /// Assemble an endpoint from its halves.
    pub fn new(port: SharedPort, inbox: Inbox) -> Self {
        Self { port, inbox }
    }

    /// Split into halves.
    pub fn into_parts(self) -> (SharedPort, Inbox) {
        (self.port, self.inbox)
    }
}
