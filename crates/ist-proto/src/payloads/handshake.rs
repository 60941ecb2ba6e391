//! Session handshake bodies.
//!
//! # Protocol Flow
//!
//! 1. Sender connects to the receiver's advertised address
//! 2. Receiver sends [`Handshake`] with the range it expects
//! 3. Sender checks version and range, replies [`HandshakeResponse`]
//! 4. Receiver checks the response and, once its owner is ready, sends
//!    `Ctrl(Ok)`; ordered records follow

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Seqno;

/// Identifier of the replication group whose history is being transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GroupUuid([u8; 16]);

impl GroupUuid {
    /// The all-zero UUID, used when the group is not yet known.
    pub const NIL: Self = Self([0; 16]);

    /// Wrap raw UUID bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw UUID bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for GroupUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16])
        )
    }
}

/// Receiver -> Sender: the range the joiner expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Group the joiner belongs to
    pub group_uuid: GroupUuid,
    /// First seqno the joiner is missing
    pub first: Seqno,
    /// Last seqno of the transfer
    pub last: Seqno,
}

/// Sender -> Receiver: the range the donor will stream.
///
/// `first` may be lower than the joiner's first when the donor ships
/// preload records ahead of the missing range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// First seqno that will be streamed
    pub first: Seqno,
    /// Last seqno that will be streamed
    pub last: Seqno,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_display() {
        let uuid = GroupUuid::from_bytes([
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ]);
        assert_eq!(uuid.to_string(), "12345678-9abc-def0-0123-456789abcdef");
        assert_eq!(GroupUuid::NIL.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn handshake_cbor_serde() {
        let handshake = Handshake { group_uuid: GroupUuid::NIL, first: 5, last: 9 };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&handshake, &mut buf).unwrap();
        let decoded: Handshake = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(decoded, handshake);
    }
}
