//! Frame header for byte-stream channels.
//!
//! Implements the 13-byte header format:
//! ```text
//! ┌───────┬──────────────────┬──────────┐
//! │ Flags │ Correlation ID   │ Length   │
//! │ 1 byte│ 8 bytes          │ 4 bytes  │
//! │       │ uint64 BE        │ uint32 BE│
//! └───────┴──────────────────┴──────────┘
//! ```
//!
//! The payload that follows is a MsgPack-encoded envelope. The header
//! duplicates the kind and id so a reader can route or drop a frame
//! without decoding it.

use super::message::{CorrelationId, Envelope, Message};
use crate::error::{Result, WorkwireError};

/// Header size in bytes (fixed, exactly 13).
pub const HEADER_SIZE: usize = 13;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Flag constants for the protocol.
pub mod flags {
    /// Message type: reply (1) or call (0).
    pub const IS_REPLY: u8 = 0b0000_0001;
    /// Error flag: error outcome (1) or value (0). Only valid on replies.
    pub const IS_ERROR: u8 = 0b0000_0010;

    /// Reserved bits mask (bits 2-7).
    pub const RESERVED_MASK: u8 = 0b1111_1100;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }

    /// Call flags.
    pub const CALL: u8 = 0;
    /// Successful reply flags.
    pub const REPLY: u8 = IS_REPLY;
    /// Error reply flags.
    pub const ERROR_REPLY: u8 = IS_REPLY | IS_ERROR;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Correlation id of the framed message.
    pub correlation_id: u64,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(flags: u8, correlation_id: u64, payload_length: u32) -> Self {
        Self {
            flags,
            correlation_id,
            payload_length,
        }
    }

    /// Header describing `envelope` with a payload of `payload_length` bytes.
    pub fn for_envelope(envelope: &Envelope, payload_length: u32) -> Self {
        let frame_flags = match &envelope.message {
            Message::Call(_) => flags::CALL,
            Message::Reply(reply) if reply.is_error() => flags::ERROR_REPLY,
            Message::Reply(_) => flags::REPLY,
        };
        Self::new(frame_flags, envelope.message.id().0, payload_length)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use workwire::protocol::{Header, flags};
    ///
    /// let header = Header::new(flags::REPLY, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 13);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.flags;
        buf[1..9].copy_from_slice(&self.correlation_id.to_be_bytes());
        buf[9..13].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[1..9]);
        Some(Self {
            flags: buf[0],
            correlation_id: u64::from_be_bytes(id),
            payload_length: u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Payload length doesn't exceed max
    /// - Reserved flag bits are 0
    /// - The error flag only appears on replies
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(WorkwireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(WorkwireError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        if self.is_error() && !self.is_reply() {
            return Err(WorkwireError::Protocol(
                "Error flag set on a call frame".to_string(),
            ));
        }

        Ok(())
    }

    /// Correlation id as a typed token.
    #[inline]
    pub fn id(&self) -> CorrelationId {
        CorrelationId(self.correlation_id)
    }

    /// Check if this frames a reply.
    #[inline]
    pub fn is_reply(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_REPLY)
    }

    /// Check if this frames an error reply.
    #[inline]
    pub fn is_error(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, RemoteError};
    use crate::protocol::ReplyMessage;
    use crate::transfer::TransferList;
    use bytes::Bytes;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(flags::ERROR_REPLY, u64::MAX - 1, 100);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(0x01, 0x0203040506070809, 0x0A0B0C0D);
        let bytes = header.encode();

        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..9], &[0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);
        assert_eq!(&bytes[9..13], &[0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = Header::new(flags::CALL, 1, 1_000_000);
        let result = header.validate(100);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_reserved_bits_must_be_zero() {
        let header = Header::new(0b1000_0000, 1, 0);
        let result = header.validate(DEFAULT_MAX_PAYLOAD_SIZE);
        assert!(result.unwrap_err().to_string().contains("Reserved flag bits"));
    }

    #[test]
    fn test_validate_error_flag_requires_reply() {
        let header = Header::new(flags::IS_ERROR, 1, 0);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());

        let header = Header::new(flags::ERROR_REPLY, 1, 0);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
    }

    #[test]
    fn test_header_for_envelope() {
        let call = Envelope::call(CorrelationId(9), "add", Bytes::new(), TransferList::new());
        let header = Header::for_envelope(&call, 5);
        assert_eq!(header.flags, flags::CALL);
        assert_eq!(header.id(), CorrelationId(9));

        let failed = Envelope::reply(
            ReplyMessage::error(CorrelationId(9), RemoteError::new(ErrorKind::Handler, "x")),
            TransferList::new(),
        );
        let header = Header::for_envelope(&failed, 5);
        assert!(header.is_reply());
        assert!(header.is_error());
    }
}
