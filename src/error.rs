//! Error types for workwire.
//!
//! Every failure a caller can observe is a [`WorkwireError`]. Failures that
//! happened on the other side of the channel arrive as
//! [`WorkwireError::Remote`] carrying a [`RemoteError`], the reduced,
//! serializable form of whatever the worker-side handler raised.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for all workwire operations.
#[derive(Debug, Error)]
pub enum WorkwireError {
    /// I/O error on a stream channel or child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, empty method name, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The name is reserved for the worker handle and never forwarded.
    #[error("Method name is reserved: {0}")]
    ReservedMethod(String),

    /// The worker replied with an error outcome.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// No reply arrived before the configured call deadline.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// Channel closed before a reply arrived, or while sending.
    #[error("Channel closed")]
    ChannelClosed,

    /// Invalid construction parameters.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkwireError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::MsgPackEncode(_) | Self::MsgPackDecode(_) => ErrorKind::Serialization,
            Self::Protocol(_) | Self::ReservedMethod(_) => ErrorKind::Protocol,
            Self::Remote(e) => e.kind,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ChannelClosed => ErrorKind::ChannelClosed,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// The remote error payload, if the worker rejected the call.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias using WorkwireError.
pub type Result<T> = std::result::Result<T, WorkwireError>;

/// Failure taxonomy shared by local and remote errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The called name is not in the worker's function table.
    MethodNotFound,
    /// The invoked handler returned an error or panicked.
    Handler,
    /// A value or error could not cross the channel's encoding.
    Serialization,
    /// The call deadline expired.
    Timeout,
    /// The channel went away.
    ChannelClosed,
    /// The peer or caller broke the wire contract.
    Protocol,
    /// Transport I/O failure.
    Io,
    /// Invalid construction parameters.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MethodNotFound => "method not found",
            Self::Handler => "handler error",
            Self::Serialization => "serialization failure",
            Self::Timeout => "timeout",
            Self::ChannelClosed => "channel closed",
            Self::Protocol => "protocol error",
            Self::Io => "I/O error",
            Self::Config => "configuration error",
        };
        f.write_str(s)
    }
}

/// Error payload carried by an error reply.
///
/// Only the observable data survives the channel: the kind, an optional
/// type name and the message. Stack and identity are lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Failure class.
    pub kind: ErrorKind,
    /// Name of the originating error type, when known.
    #[serde(default)]
    pub name: Option<String>,
    /// Human-readable message.
    pub message: String,
}

impl RemoteError {
    /// Create an error payload of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            name: None,
            message: message.into(),
        }
    }

    /// Error payload for a name missing from the function table.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorKind::MethodNotFound, format!("method not found: {}", method))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({}): {}", name, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<RemoteError> for WorkwireError {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}
