//! Call and reply messages.
//!
//! Exactly two message kinds cross a workwire channel. They are told apart
//! by the [`Message`] tag, never by position or arrival order: replies to
//! overlapping calls may come back in any order and are matched purely by
//! [`CorrelationId`].
//!
//! ```text
//! controller                                   worker
//!   Call { id, method, args }  ───────────────►  dispatch
//!   resolve / reject  ◄───────────────  Reply { id, outcome }
//! ```

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, Result, WorkwireError};
use crate::transfer::TransferList;

/// Name kept for the worker handle on every proxy surface.
///
/// It is never sent as a call and cannot be registered as a handler.
pub const RESERVED_METHOD: &str = "worker";

/// Check that `method` may cross the channel as a call.
pub fn validate_method_name(method: &str) -> Result<()> {
    if method.is_empty() {
        return Err(WorkwireError::Protocol("Method name is empty".into()));
    }
    if method == RESERVED_METHOD {
        return Err(WorkwireError::ReservedMethod(method.to_string()));
    }
    Ok(())
}

/// Opaque token tying a reply to the call that caused it.
///
/// Unique among the calls pending on one channel endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Request to run `method` with `args` on the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    /// Correlation token, echoed by the reply.
    pub id: CorrelationId,
    /// Name of the function to run. Never empty.
    pub method: String,
    /// Argument tuple, MsgPack-encoded as an array.
    pub args: Bytes,
}

/// Outcome of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// MsgPack-encoded return value.
    Value(Bytes),
    /// Reduced error payload.
    Error(RemoteError),
}

/// Answer to exactly one [`CallMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyMessage {
    /// Correlation token of the originating call.
    pub id: CorrelationId,
    /// Value or error.
    pub outcome: Outcome,
}

impl ReplyMessage {
    /// Successful reply.
    pub fn value(id: CorrelationId, value: Bytes) -> Self {
        Self {
            id,
            outcome: Outcome::Value(value),
        }
    }

    /// Failed reply.
    pub fn error(id: CorrelationId, error: RemoteError) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// The `isError` discriminant.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// Either message kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Controller to worker.
    Call(CallMessage),
    /// Worker to controller.
    Reply(ReplyMessage),
}

impl Message {
    /// Correlation id of either kind.
    pub fn id(&self) -> CorrelationId {
        match self {
            Self::Call(call) => call.id,
            Self::Reply(reply) => reply.id,
        }
    }

    /// Check if this is a reply.
    #[inline]
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Reply(_))
    }
}

/// A message plus the items transferred with it.
///
/// This is the unit a channel carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The call or reply.
    pub message: Message,
    /// Items moved along with the message.
    #[serde(default)]
    pub transfer: TransferList,
}

impl Envelope {
    /// Wrap a message with its transfer list.
    pub fn new(message: Message, transfer: TransferList) -> Self {
        Self { message, transfer }
    }

    /// Call envelope.
    pub fn call(
        id: CorrelationId,
        method: impl Into<String>,
        args: Bytes,
        transfer: TransferList,
    ) -> Self {
        Self::new(
            Message::Call(CallMessage {
                id,
                method: method.into(),
                args,
            }),
            transfer,
        )
    }

    /// Reply envelope.
    pub fn reply(reply: ReplyMessage, transfer: TransferList) -> Self {
        Self::new(Message::Reply(reply), transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;
    use crate::error::ErrorKind;

    #[test]
    fn test_reply_is_error_discriminant() {
        let ok = ReplyMessage::value(CorrelationId(1), Bytes::from_static(b"\x03"));
        assert!(!ok.is_error());

        let err = ReplyMessage::error(CorrelationId(1), RemoteError::new(ErrorKind::Handler, "x"));
        assert!(err.is_error());
    }

    #[test]
    fn test_message_kinds_are_distinguishable() {
        let call = Envelope::call(CorrelationId(7), "add", Bytes::new(), TransferList::new());
        let reply = Envelope::reply(
            ReplyMessage::value(CorrelationId(7), Bytes::new()),
            TransferList::new(),
        );

        let call_back: Envelope = MsgPackCodec::decode(&MsgPackCodec::encode(&call).unwrap()).unwrap();
        let reply_back: Envelope =
            MsgPackCodec::decode(&MsgPackCodec::encode(&reply).unwrap()).unwrap();

        assert!(matches!(call_back.message, Message::Call(ref c) if c.method == "add"));
        assert!(reply_back.message.is_reply());
        assert_eq!(call_back.message.id(), reply_back.message.id());
    }

    #[test]
    fn test_envelope_carries_transfers() {
        let mut transfer = TransferList::new();
        transfer.mark(Bytes::from_static(b"pixels"));

        let env = Envelope::call(CorrelationId(3), "blur", Bytes::new(), transfer);
        let back: Envelope = MsgPackCodec::decode(&MsgPackCodec::encode(&env).unwrap()).unwrap();

        assert_eq!(back.transfer.items(), &[Bytes::from_static(b"pixels")]);
    }

    #[test]
    fn test_method_name_validation() {
        assert!(validate_method_name("add").is_ok());
        assert!(matches!(validate_method_name(""), Err(WorkwireError::Protocol(_))));
        assert!(matches!(
            validate_method_name(RESERVED_METHOD),
            Err(WorkwireError::ReservedMethod(_))
        ));
    }

    #[test]
    fn test_correlation_id_display() {
        assert_eq!(CorrelationId(42).to_string(), "#42");
    }
}
