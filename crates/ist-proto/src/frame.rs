//! Header plus payload.

use bytes::Bytes;

use crate::{Message, ProtocolError, Result};

/// A complete frame: message header and the `len` payload bytes after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message header
    pub message: Message,
    /// Payload, exactly `message.len()` bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame. The header's `len` must match the payload.
    pub fn new(message: Message, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if message.len() != payload.len() as u64 {
            return Err(ProtocolError::InvalidPayload(format!(
                "header declares {} payload bytes, frame carries {}",
                message.len(),
                payload.len()
            )));
        }
        Ok(Self { message, payload })
    }

    /// Append the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<()> {
        let start = dst.len();
        let header_size = self.message.serial_size()?;
        dst.resize(start + header_size, 0);
        self.message.encode(dst, start)?;
        dst.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Decode one frame of `version` from the start of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed.
    pub fn decode(version: u8, buf: &[u8]) -> Result<(Self, usize)> {
        let message = Message::decode(version, buf, 0)?;
        let header_size = message.serial_size()?;
        let len = usize::try_from(message.len()).map_err(|_| ProtocolError::PayloadTooLarge {
            size: message.len(),
            max: usize::MAX as u64,
        })?;
        let total = header_size.checked_add(len).ok_or(ProtocolError::PayloadTooLarge {
            size: message.len(),
            max: (usize::MAX - header_size) as u64,
        })?;
        if buf.len() < total {
            return Err(ProtocolError::FrameTruncated { expected: total, actual: buf.len() });
        }
        let payload = Bytes::copy_from_slice(&buf[header_size..total]);
        Ok((Self { message, payload }, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageFlags, MessageType, VER21, VER40};

    #[test]
    fn frame_round_trip() {
        for version in [VER21, VER40] {
            let message =
                Message::new(version, MessageType::Trx, MessageFlags::PRELOAD, 0, 3).with_seqno(0);
            let frame = Frame::new(message, vec![7u8, 8, 9]).unwrap();

            let mut buf = Vec::new();
            frame.encode(&mut buf).unwrap();
            let (decoded, consumed) = Frame::decode(version, &buf).unwrap();

            assert_eq!(consumed, buf.len());
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn length_must_match_payload() {
        let message = Message::new(VER40, MessageType::Trx, MessageFlags::empty(), 0, 4);
        assert!(matches!(Frame::new(message, vec![1u8]), Err(ProtocolError::InvalidPayload(_))));
    }

    #[test]
    fn missing_payload_is_truncation() {
        let message = Message::new(VER40, MessageType::Trx, MessageFlags::empty(), 0, 4);
        let buf = message.to_vec().unwrap();
        assert_eq!(
            Frame::decode(VER40, &buf),
            Err(ProtocolError::FrameTruncated { expected: 28, actual: 24 })
        );
    }
}
