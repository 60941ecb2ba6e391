//! Protocol error types.

use thiserror::Error;

use crate::MessageType;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding IST frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Version is outside every layout this implementation understands,
    /// including the retired pre-V21 generation.
    #[error("unsupported protocol version {version}")]
    UnsupportedVersion {
        /// Version byte that was rejected
        version: u8,
    },

    /// Frame carries a different version than the one negotiated.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version the decoder was asked to use
        expected: u8,
        /// Version found in the frame
        actual: u8,
    },

    /// Not enough bytes for the header of the requested version.
    #[error("frame truncated: need {expected} bytes, have {actual}")]
    FrameTruncated {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// V40 header checksum does not match the header bytes.
    #[error("header checksum mismatch: expected {expected:#018x}, computed {actual:#018x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame
        expected: u64,
        /// Checksum computed over the received header
        actual: u64,
    },

    /// Message type byte is not a known [`MessageType`].
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// A valid message arrived where a different one was required.
    #[error("unexpected message: expected {expected:?}, got {actual:?}")]
    UnexpectedMessage {
        /// Message type the protocol step requires
        expected: MessageType,
        /// Message type received
        actual: MessageType,
    },

    /// Payload length does not fit the header generation or exceeds a limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared payload size
        size: u64,
        /// Maximum accepted size
        max: u64,
    },

    /// Caller-provided output buffer is too small.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes available past the offset
        available: usize,
    },

    /// Payload bytes do not form a valid body for the message type.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
