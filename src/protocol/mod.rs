//! Protocol module - wire messages and byte-stream framing.
//!
//! - [`message`]: the call/reply contract every channel carries
//! - 13-byte frame header, [`Frame`] and [`FrameBuffer`] for channels that
//!   run over a byte stream

pub mod message;

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, encode_envelope, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{
    validate_method_name, CallMessage, CorrelationId, Envelope, Message, Outcome, ReplyMessage,
    RESERVED_METHOD,
};
pub use wire_format::{flags, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
