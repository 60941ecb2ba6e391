//! Error types for IST sessions.

use std::io;

use ist_proto::{CtrlCode, ProtocolError, Seqno};
use thiserror::Error;

use crate::cache::CacheError;

/// Errors raised by address resolution and transfer sessions.
///
/// Every session-level error moves the session to its failed state and is
/// reported to the owner; nothing here is retried internally.
#[derive(Debug, Error)]
pub enum IstError {
    /// No usable IST address can be derived from the configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Optional address parameter is absent
    #[error("'{0}' not set")]
    AddressNotSet(&'static str),

    /// Local or peer protocol version cannot be served
    #[error("unsupported protocol version: local {local}, peer {peer:?}")]
    UnsupportedProtocolVersion {
        /// Version this side runs
        local: u8,
        /// Version announced by the peer, if one was received
        peer: Option<u8>,
    },

    /// Truncated or malformed frame
    #[error("frame decode error: {0}")]
    FrameDecode(ProtocolError),

    /// Header checksum verification failed
    #[error("checksum mismatch: carried {expected:#018x}, computed {actual:#018x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame
        expected: u64,
        /// Checksum computed locally
        actual: u64,
    },

    /// Connection refused, reset or closed
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A record broke the preload/non-preload ordering contract
    #[error("ordering violation: seqno {actual} cannot follow {last} (preload: {preload})")]
    OrderingViolation {
        /// Last seqno accepted
        last: Seqno,
        /// Seqno received
        actual: Seqno,
        /// Preload flag of the offending record
        preload: bool,
    },

    /// Requested range is empty or starts below 1
    #[error("invalid seqno range [{first}, {last}]")]
    InvalidRange {
        /// First seqno
        first: Seqno,
        /// Last seqno
        last: Seqno,
    },

    /// Write-set cache refused an operation
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Peer ended the session with a control code other than EOF
    #[error("peer ended session with {0:?}")]
    PeerError(CtrlCode),

    /// Peer sent EOF before the last seqno of the range
    #[error("stream ended at seqno {received}, expected through {expected}")]
    IncompleteStream {
        /// Last seqno received
        received: Seqno,
        /// Last seqno of the range
        expected: Seqno,
    },

    /// Peer closed the connection before the last seqno of the range
    #[error("connection closed after seqno {received}, expected through {expected}")]
    ConnectionClosed {
        /// Last seqno received
        received: Seqno,
        /// Last seqno of the range
        expected: Seqno,
    },

    /// Lifecycle call made in the wrong state
    #[error("operation '{operation}' not valid in state {state}")]
    InvalidState {
        /// Current state
        state: String,
        /// Attempted operation
        operation: &'static str,
    },

    /// Session interrupted locally
    #[error("session cancelled")]
    Cancelled,

    /// Protocol step did not complete in time
    #[error("timed out during {0}")]
    Timeout(&'static str),

    /// Background task panicked or was aborted
    #[error("session task failed: {0}")]
    TaskFailed(String),
}

impl From<ProtocolError> for IstError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::ChecksumMismatch { expected, actual } => {
                Self::ChecksumMismatch { expected, actual }
            },
            ProtocolError::UnsupportedVersion { version } => {
                Self::UnsupportedProtocolVersion { local: version, peer: None }
            },
            ProtocolError::VersionMismatch { expected, actual } => {
                Self::UnsupportedProtocolVersion { local: expected, peer: Some(actual) }
            },
            other => Self::FrameDecode(other),
        }
    }
}

/// Stable classification of [`IstError`], passed to
/// [`crate::EventHandler::stream_ended`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// See [`IstError::InvalidConfiguration`]
    InvalidConfiguration,
    /// See [`IstError::AddressNotSet`]
    AddressNotSet,
    /// See [`IstError::UnsupportedProtocolVersion`]
    UnsupportedProtocolVersion,
    /// See [`IstError::FrameDecode`]
    FrameDecode,
    /// See [`IstError::ChecksumMismatch`]
    ChecksumMismatch,
    /// See [`IstError::Transport`], [`IstError::Timeout`] and
    /// [`IstError::ConnectionClosed`]
    Transport,
    /// See [`IstError::OrderingViolation`] and [`IstError::IncompleteStream`]
    OrderingViolation,
    /// See [`IstError::InvalidRange`]
    InvalidRange,
    /// See [`IstError::Cache`]
    Cache,
    /// See [`IstError::PeerError`]
    PeerError,
    /// See [`IstError::InvalidState`]
    InvalidState,
    /// See [`IstError::Cancelled`]
    Cancelled,
    /// See [`IstError::TaskFailed`]
    TaskFailed,
}

impl IstError {
    /// Classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfiguration(_) => ErrorCode::InvalidConfiguration,
            Self::AddressNotSet(_) => ErrorCode::AddressNotSet,
            Self::UnsupportedProtocolVersion { .. } => ErrorCode::UnsupportedProtocolVersion,
            Self::FrameDecode(_) => ErrorCode::FrameDecode,
            Self::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Self::Transport(_) | Self::Timeout(_) | Self::ConnectionClosed { .. } => {
                ErrorCode::Transport
            },
            Self::OrderingViolation { .. } | Self::IncompleteStream { .. } => {
                ErrorCode::OrderingViolation
            },
            Self::InvalidRange { .. } => ErrorCode::InvalidRange,
            Self::Cache(_) => ErrorCode::Cache,
            Self::PeerError(_) => ErrorCode::PeerError,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::TaskFailed(_) => ErrorCode::TaskFailed,
        }
    }

    /// Control code to send the peer before closing because of this error.
    pub(crate) fn ctrl_code(&self) -> CtrlCode {
        match self {
            Self::Cache(_) => CtrlCode::RangeUnavailable,
            Self::Cancelled | Self::TaskFailed(_) => CtrlCode::Aborted,
            _ => CtrlCode::ProtocolError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_fault_keeps_its_kind() {
        let err = IstError::from(ProtocolError::ChecksumMismatch { expected: 1, actual: 2 });
        assert_eq!(err.code(), ErrorCode::ChecksumMismatch);
    }

    #[test]
    fn truncation_is_a_decode_error() {
        let err = IstError::from(ProtocolError::FrameTruncated { expected: 24, actual: 3 });
        assert_eq!(err.code(), ErrorCode::FrameDecode);
    }

    #[test]
    fn version_mismatch_names_both_sides() {
        let err = IstError::from(ProtocolError::VersionMismatch { expected: 10, actual: 4 });
        assert!(matches!(
            err,
            IstError::UnsupportedProtocolVersion { local: 10, peer: Some(4) }
        ));
    }

    #[test]
    fn closed_connection_is_a_transport_failure() {
        let closed = IstError::ConnectionClosed { received: 5, expected: 10 };
        assert_eq!(closed.code(), ErrorCode::Transport);
        let early_eof = IstError::IncompleteStream { received: 5, expected: 10 };
        assert_eq!(early_eof.code(), ErrorCode::OrderingViolation);
    }

    #[test]
    fn configuration_and_not_set_are_distinct() {
        assert_ne!(
            IstError::InvalidConfiguration(String::new()).code(),
            IstError::AddressNotSet("ist.recv_bind").code()
        );
    }
}
