//! Ordered records: one per seqno in the transferred range.
//!
//! V40 headers carry the seqno, so the payload is the cached buffer verbatim.
//! V21 headers have no seqno field; the record's payload starts with the
//! seqno as an 8-byte little-endian integer and `len` covers both.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    Frame, Generation, Message, MessageFlags, MessageType, ProtocolError, Result, Seqno,
};

const SEQNO_PREFIX: usize = 8;

/// What an ordered record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Serialized write-set
    WriteSet,
    /// Serialized configuration change
    ConfigurationChange,
    /// Ordered placeholder for a write-set that has no effect; no payload
    Skip,
}

impl RecordKind {
    /// Message type used on the wire.
    pub fn message_type(self) -> MessageType {
        match self {
            Self::WriteSet => MessageType::Trx,
            Self::ConfigurationChange => MessageType::ConfChange,
            Self::Skip => MessageType::Skip,
        }
    }

    fn from_message_type(msg_type: MessageType) -> Option<Self> {
        match msg_type {
            MessageType::Trx => Some(Self::WriteSet),
            MessageType::ConfChange => Some(Self::ConfigurationChange),
            MessageType::Skip => Some(Self::Skip),
            _ => None,
        }
    }
}

/// A write-set, configuration change or skip placeholder at one seqno.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedRecord {
    /// Record kind
    pub kind: RecordKind,
    /// Global seqno
    pub seqno: Seqno,
    /// May be applied with relaxed ordering
    pub preload: bool,
    /// Cached buffer; empty for [`RecordKind::Skip`]
    pub payload: Bytes,
}

impl OrderedRecord {
    /// Build the frame for this record.
    pub fn into_frame(self, version: u8) -> Result<Frame> {
        let generation = Generation::for_version(version)?;
        if self.kind == RecordKind::Skip && !self.payload.is_empty() {
            return Err(ProtocolError::InvalidPayload("skip record with payload".into()));
        }

        let flags = if self.preload { MessageFlags::PRELOAD } else { MessageFlags::empty() };
        let msg_type = self.kind.message_type();

        if generation.has_seqno() {
            let message = Message::new(version, msg_type, flags, 0, self.payload.len() as u64)
                .with_seqno(self.seqno);
            Frame::new(message, self.payload)
        } else {
            let mut payload = BytesMut::with_capacity(SEQNO_PREFIX + self.payload.len());
            payload.put_i64_le(self.seqno);
            payload.extend_from_slice(&self.payload);
            let message = Message::new(version, msg_type, flags, 0, payload.len() as u64);
            Frame::new(message, payload.freeze())
        }
    }

    /// Interpret a frame as an ordered record.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let msg_type = frame.message.msg_type();
        let kind = RecordKind::from_message_type(msg_type).ok_or(
            ProtocolError::UnexpectedMessage { expected: MessageType::Trx, actual: msg_type },
        )?;
        let generation = Generation::for_version(frame.message.version())?;
        let preload = frame.message.flags().is_preload();

        let (seqno, payload) = if generation.has_seqno() {
            (frame.message.seqno(), frame.payload)
        } else {
            if frame.payload.len() < SEQNO_PREFIX {
                return Err(ProtocolError::InvalidPayload(format!(
                    "record payload of {} bytes lacks seqno prefix",
                    frame.payload.len()
                )));
            }
            let mut prefix = [0u8; SEQNO_PREFIX];
            prefix.copy_from_slice(&frame.payload[..SEQNO_PREFIX]);
            (i64::from_le_bytes(prefix), frame.payload.slice(SEQNO_PREFIX..))
        };

        if kind == RecordKind::Skip && !payload.is_empty() {
            return Err(ProtocolError::InvalidPayload("skip record with payload".into()));
        }

        Ok(Self { kind, seqno, preload, payload })
    }
}
