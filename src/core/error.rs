//! Error types for the main channel.
//!
//! Only conditions a caller can act on are modeled as errors. Protocol
//! desyncs from the remote peer are logged and ignored, and internal
//! invariant violations panic.

use thiserror::Error;

use super::traits::ConnectionId;

/// Errors that can occur while marshalling an outgoing message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// String does not fit its length prefix.
    #[error("string too long: {0} bytes")]
    StringTooLong(usize),

    /// String contains an interior NUL and cannot be sent NUL-terminated.
    #[error("string contains an interior NUL byte")]
    InvalidString,
}

/// Errors that can occur while decoding inbound data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is too short for the message type.
    #[error("payload too short: expected {expected}, got {actual}")]
    TooShort {
        /// Minimum bytes required.
        expected: usize,
        /// Actual bytes available.
        actual: usize,
    },

    /// Message type is not handled by the main channel.
    #[error("unknown message type: {0}")]
    UnknownMessage(u16),

    /// Migration data carries the wrong magic.
    #[error("bad migration data magic: expected 0x{expected:08x}, got 0x{actual:08x}")]
    BadMagic {
        /// Expected magic.
        expected: u32,
        /// Magic found in the header.
        actual: u32,
    },

    /// Migration data version is newer than this implementation.
    #[error("unsupported migration data version {version} (> {max})")]
    UnsupportedVersion {
        /// Version found in the header.
        version: u32,
        /// Highest supported version.
        max: u32,
    },
}

/// Errors from the timer infrastructure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// No timer runtime is available in this context.
    #[error("no timer runtime available")]
    NoRuntime,

    /// Timer backend refused to create a timer.
    #[error("timer creation failed: {0}")]
    CreateFailed(String),
}

/// Top-level main channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Encode error.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Decode error.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Timer error.
    #[error("timer error: {0}")]
    Timer(#[from] TimerError),

    /// No client with this connection id is attached to the channel.
    #[error("unknown client: {0}")]
    UnknownClient(ConnectionId),

    /// A client with this connection id is already attached.
    #[error("duplicate client: {0}")]
    DuplicateClient(ConnectionId),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ChannelError {
    /// Check if this error stems from unexpected input from the remote peer.
    ///
    /// Such errors are logged and the message is dropped; the connection
    /// stays up.
    pub fn is_protocol_desync(&self) -> bool {
        matches!(self, ChannelError::Decode(_) | ChannelError::UnknownClient(_))
    }

    /// Check if this error is fatal to the session it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChannelError::Timer(_) | ChannelError::Config(_))
    }
}

/// Result type for main channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
