//! Typed message bodies.
//!
//! [`Payload`] is the decoded view of a [`Frame`]: handshake bodies are CBOR,
//! control messages carry their code in the header, ordered records carry
//! the cached buffer as-is.

pub mod handshake;
pub mod ordered;

use bytes::Bytes;
pub use handshake::{GroupUuid, Handshake, HandshakeResponse};
pub use ordered::{OrderedRecord, RecordKind};

use crate::{CtrlCode, Frame, Message, MessageFlags, MessageType, ProtocolError, Result};

/// Decoded frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Receiver opens the session
    Handshake(Handshake),
    /// Sender accepts the session
    HandshakeResponse(HandshakeResponse),
    /// Control message
    Ctrl(CtrlCode),
    /// Write-set, configuration change or skip placeholder
    Record(OrderedRecord),
}

impl Payload {
    /// Message type this payload is sent as.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Handshake(_) => MessageType::Handshake,
            Self::HandshakeResponse(_) => MessageType::HandshakeResponse,
            Self::Ctrl(_) => MessageType::Ctrl,
            Self::Record(record) => record.kind.message_type(),
        }
    }

    /// Build the frame for this payload in the given protocol version.
    pub fn into_frame(self, version: u8) -> Result<Frame> {
        match self {
            Self::Handshake(handshake) => {
                cbor_frame(version, MessageType::Handshake, &handshake)
            },
            Self::HandshakeResponse(response) => {
                cbor_frame(version, MessageType::HandshakeResponse, &response)
            },
            Self::Ctrl(code) => {
                let message =
                    Message::new(version, MessageType::Ctrl, MessageFlags::empty(), code.to_u8(), 0);
                Frame::new(message, Bytes::new())
            },
            Self::Record(record) => record.into_frame(version),
        }
    }

    /// Interpret a decoded frame.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        match frame.message.msg_type() {
            MessageType::Handshake => Ok(Self::Handshake(cbor_decode(&frame.payload)?)),
            MessageType::HandshakeResponse => {
                Ok(Self::HandshakeResponse(cbor_decode(&frame.payload)?))
            },
            MessageType::Ctrl => {
                let raw = frame.message.ctrl();
                CtrlCode::from_u8(raw)
                    .map(Self::Ctrl)
                    .ok_or_else(|| ProtocolError::InvalidPayload(format!("unknown ctrl code {raw}")))
            },
            MessageType::Trx | MessageType::ConfChange | MessageType::Skip => {
                OrderedRecord::from_frame(frame).map(Self::Record)
            },
            MessageType::None => Err(ProtocolError::InvalidPayload("message type none".into())),
        }
    }
}

fn cbor_frame<T: serde::Serialize>(version: u8, msg_type: MessageType, body: &T) -> Result<Frame> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(body, &mut payload)
        .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
    let message = Message::new(version, msg_type, MessageFlags::empty(), 0, payload.len() as u64);
    Frame::new(message, payload)
}

fn cbor_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VER21, VER40};

    #[test]
    fn handshake_through_frame() {
        for version in [VER21, VER40] {
            let payload = Payload::Handshake(Handshake {
                group_uuid: GroupUuid::from_bytes([0x11; 16]),
                first: 1,
                last: 10,
            });
            let frame = payload.clone().into_frame(version).unwrap();
            assert_eq!(frame.message.msg_type(), MessageType::Handshake);
            assert_eq!(Payload::from_frame(frame).unwrap(), payload);
        }
    }

    #[test]
    fn ctrl_code_lives_in_header() {
        let frame = Payload::Ctrl(CtrlCode::Eof).into_frame(VER40).unwrap();
        assert!(frame.payload.is_empty());
        assert_eq!(frame.message.ctrl(), CtrlCode::Eof.to_u8());
        assert_eq!(Payload::from_frame(frame).unwrap(), Payload::Ctrl(CtrlCode::Eof));
    }

    #[test]
    fn unknown_ctrl_code_is_invalid() {
        let message = Message::new(VER40, MessageType::Ctrl, MessageFlags::empty(), 99, 0);
        let frame = Frame::new(message, Bytes::new()).unwrap();
        assert!(matches!(Payload::from_frame(frame), Err(ProtocolError::InvalidPayload(_))));
    }

    #[test]
    fn garbage_handshake_body_is_invalid() {
        let message = Message::new(VER40, MessageType::Handshake, MessageFlags::empty(), 0, 2);
        let frame = Frame::new(message, vec![0xff, 0xff]).unwrap();
        assert!(matches!(Payload::from_frame(frame), Err(ProtocolError::InvalidPayload(_))));
    }
}
