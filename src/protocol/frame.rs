//! Frame struct: a header plus its undecoded payload.
//!
//! # Example
//!
//! ```
//! use workwire::protocol::{Frame, Header, flags};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::new(flags::REPLY, 42, 5), Bytes::from_static(b"hello"));
//! assert!(frame.is_reply());
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::message::{CorrelationId, Envelope};
use super::wire_format::{Header, HEADER_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::{Result, WorkwireError};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Correlation id from the header.
    #[inline]
    pub fn id(&self) -> CorrelationId {
        self.header.id()
    }

    /// Check if this is a reply.
    #[inline]
    pub fn is_reply(&self) -> bool {
        self.header.is_reply()
    }

    /// Check if this is an error reply.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.header.is_error()
    }

    /// Decode the payload into an envelope.
    ///
    /// Fails if the payload does not decode, or if the decoded message
    /// disagrees with the header about its kind or id.
    pub fn into_envelope(self) -> Result<Envelope> {
        let envelope: Envelope = MsgPackCodec::decode(&self.payload)?;
        let expected = Header::for_envelope(&envelope, self.header.payload_length);
        if expected != self.header {
            return Err(WorkwireError::Protocol(format!(
                "Frame header {:?} does not match payload {:?}",
                self.header, expected
            )));
        }
        Ok(envelope)
    }
}

/// Encode an envelope as `(header, payload)` ready for vectored writes.
pub fn encode_envelope(envelope: &Envelope) -> Result<([u8; HEADER_SIZE], Bytes)> {
    let payload = MsgPackCodec::encode_bytes(envelope)?;
    let length = u32::try_from(payload.len()).map_err(|_| {
        WorkwireError::Protocol(format!("Payload size {} exceeds u32", payload.len()))
    })?;
    let header = Header::for_envelope(envelope, length);
    Ok((header.encode(), payload))
}

/// Build a complete frame as a single byte vector.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{flags, ReplyMessage};
    use crate::transfer::TransferList;

    #[test]
    fn test_frame_flag_accessors() {
        let reply = Frame::new(Header::new(flags::REPLY, 1, 0), Bytes::new());
        assert!(reply.is_reply());
        assert!(!reply.is_error());

        let error = Frame::new(Header::new(flags::ERROR_REPLY, 1, 0), Bytes::new());
        assert!(error.is_reply());
        assert!(error.is_error());

        let call = Frame::new(Header::new(flags::CALL, 1, 0), Bytes::new());
        assert!(!call.is_reply());
    }

    #[test]
    fn test_encode_envelope_then_decode_frame() {
        let env = Envelope::reply(
            ReplyMessage::value(CorrelationId(11), Bytes::from_static(b"\x2a")),
            TransferList::new(),
        );
        let (header_bytes, payload) = encode_envelope(&env).unwrap();
        let header = Header::decode(&header_bytes).unwrap();

        assert_eq!(header.payload_length as usize, payload.len());
        assert_eq!(header.id(), CorrelationId(11));

        let back = Frame::new(header, payload).into_envelope().unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_header_payload_mismatch_rejected() {
        let env = Envelope::call(CorrelationId(1), "add", Bytes::new(), TransferList::new());
        let (_, payload) = encode_envelope(&env).unwrap();

        // Header claims a reply with a different id
        let lying = Header::new(flags::REPLY, 2, payload.len() as u32);
        let result = Frame::new(lying, payload).into_envelope();
        assert!(result.unwrap_err().to_string().contains("does not match"));
    }

    #[test]
    fn test_garbage_payload_fails_to_decode() {
        let frame = Frame::new(Header::new(flags::CALL, 1, 3), Bytes::from_static(b"\xc1\xc1\xc1"));
        assert!(frame.into_envelope().is_err());
    }

    #[test]
    fn test_build_frame() {
        let header = Header::new(flags::CALL, 42, 5);
        let bytes = build_frame(&header, b"hello");

        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        assert_eq!(Header::decode(&bytes).unwrap(), header);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }
}
