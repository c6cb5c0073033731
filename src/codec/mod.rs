//! Codec module - serialization of call arguments, reply values and
//! stream-channel envelopes.
//!
//! [`MsgPackCodec`] wraps `rmp-serde`. Call arguments are an ordered tuple,
//! so they land on the wire as a MessagePack array; a zero-argument call
//! encodes `()`.
//!
//! # Example
//!
//! ```
//! use workwire::codec::MsgPackCodec;
//!
//! let args = MsgPackCodec::encode(&(1i64, 2i64)).unwrap();
//! let (a, b): (i64, i64) = MsgPackCodec::decode(&args).unwrap();
//! assert_eq!(a + b, 3);
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
