//! Message types and control codes.

use serde::{Deserialize, Serialize};

/// Kind of message carried by a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Placeholder, never sent
    None = 0,
    /// Receiver -> Sender: opens the session
    Handshake = 1,
    /// Sender -> Receiver: accepts the session
    HandshakeResponse = 2,
    /// Control message, see [`CtrlCode`]
    Ctrl = 3,
    /// Ordered write-set record
    Trx = 4,
    /// Ordered configuration-change record
    ConfChange = 5,
    /// Ordered placeholder without payload
    Skip = 6,
}

impl MessageType {
    /// Wire representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Handshake),
            2 => Some(Self::HandshakeResponse),
            3 => Some(Self::Ctrl),
            4 => Some(Self::Trx),
            5 => Some(Self::ConfChange),
            6 => Some(Self::Skip),
            _ => None,
        }
    }

    /// True for records that occupy a seqno in the transferred range.
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::Trx | Self::ConfChange | Self::Skip)
    }
}

/// Control codes carried in the `ctrl` byte of a [`MessageType::Ctrl`]
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CtrlCode {
    /// Handshake accepted, streaming may begin
    Ok = 0,
    /// Sender shipped the whole range
    Eof = 1,
    /// Peer rejected the handshake or a frame
    ProtocolError = 2,
    /// Sender could not pin the requested range in its cache
    RangeUnavailable = 3,
    /// Session aborted locally
    Aborted = 4,
}

impl CtrlCode {
    /// Wire representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Eof),
            2 => Some(Self::ProtocolError),
            3 => Some(Self::RangeUnavailable),
            4 => Some(Self::Aborted),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_bytes_are_stable() {
        for value in 0..=6u8 {
            let ty = MessageType::from_u8(value).unwrap();
            assert_eq!(ty.to_u8(), value);
        }
        assert_eq!(MessageType::from_u8(7), None);
        assert_eq!(MessageType::from_u8(0xff), None);
    }

    #[test]
    fn only_records_are_ordered() {
        assert!(MessageType::Trx.is_ordered());
        assert!(MessageType::ConfChange.is_ordered());
        assert!(MessageType::Skip.is_ordered());
        assert!(!MessageType::Ctrl.is_ordered());
        assert!(!MessageType::Handshake.is_ordered());
    }

    #[test]
    fn ctrl_codes_round_trip() {
        for value in 0..=4u8 {
            assert_eq!(CtrlCode::from_u8(value).unwrap().to_u8(), value);
        }
        assert_eq!(CtrlCode::from_u8(5), None);
    }
}
