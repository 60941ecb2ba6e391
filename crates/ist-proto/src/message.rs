//! Versioned message header.
//!
//! The header layout is a pure function of the protocol version:
//!
//! ```text
//! V21 (versions 4..=9), 12 bytes, little endian:
//! ┌─────────┬──────┬───────┬──────┬──────────────┐
//! │ version │ type │ flags │ ctrl │   len: u64   │
//! └─────────┴──────┴───────┴──────┴──────────────┘
//!
//! V40 (version 10), 16 + 8 bytes, little endian:
//! ┌─────────┬──────┬───────┬──────┬────────────┬──────────────┬────────────────┐
//! │ version │ type │ flags │ ctrl │  len: u32  │  seqno: i64  │ xxh3-64(hdr)   │
//! └─────────┴──────┴───────┴──────┴────────────┴──────────────┴────────────────┘
//! ```
//!
//! V21 has no seqno field. Ordered records in a V21 stream carry their seqno
//! at the start of the payload instead (see [`crate::payloads::ordered`]).

use xxhash_rust::xxh3::xxh3_64;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{I64, LittleEndian, U32, U64},
};

use crate::{MessageFlags, MessageType, ProtocolError, Result, Seqno};

/// First version using the V21 layout.
pub const VER21: u8 = 4;

/// First (and current) version using the V40 layout.
pub const VER40: u8 = 10;

/// Header generation selected by a protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// 12-byte header without checksum
    V21,
    /// 16-byte header followed by an 8-byte checksum
    V40,
}

impl Generation {
    /// Select the layout for `version`.
    ///
    /// Versions below [`VER21`] used a retired layout whose field widths
    /// depended on the host word size. They are rejected outright.
    pub fn for_version(version: u8) -> Result<Self> {
        match version {
            VER21..VER40 => Ok(Self::V21),
            VER40 => Ok(Self::V40),
            _ => Err(ProtocolError::UnsupportedVersion { version }),
        }
    }

    /// Bytes of header fields, excluding any checksum.
    pub fn header_size(self) -> usize {
        match self {
            Self::V21 => HeaderV21::SIZE,
            Self::V40 => HeaderV40::SIZE,
        }
    }

    /// Bytes of trailing checksum.
    pub fn checksum_size(self) -> usize {
        match self {
            Self::V21 => 0,
            Self::V40 => CHECKSUM_SIZE,
        }
    }

    /// Total serialized size of a message of this generation.
    pub fn serial_size(self) -> usize {
        self.header_size() + self.checksum_size()
    }

    /// Largest payload length the header can describe.
    pub fn max_len(self) -> u64 {
        match self {
            Self::V21 => u64::MAX,
            Self::V40 => u64::from(u32::MAX),
        }
    }

    /// Whether the header carries the record seqno.
    pub fn has_seqno(self) -> bool {
        matches!(self, Self::V40)
    }
}

const CHECKSUM_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct HeaderV21 {
    version: u8,
    msg_type: u8,
    flags: u8,
    ctrl: u8,
    len: U64<LittleEndian>,
}

impl HeaderV21 {
    const SIZE: usize = 12;
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct HeaderV40 {
    version: u8,
    msg_type: u8,
    flags: u8,
    ctrl: u8,
    len: U32<LittleEndian>,
    seqno: I64<LittleEndian>,
}

impl HeaderV40 {
    const SIZE: usize = 16;
}

/// One IST message header.
///
/// `len` describes the payload that follows the header in the stream; the
/// payload is not part of the encoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Message {
    version: u8,
    msg_type: MessageType,
    flags: MessageFlags,
    ctrl: u8,
    len: u64,
    seqno: Seqno,
}

impl Message {
    /// Create a message header. Seqno starts at 0, see [`Self::with_seqno`].
    pub fn new(
        version: u8,
        msg_type: MessageType,
        flags: MessageFlags,
        ctrl: u8,
        len: u64,
    ) -> Self {
        Self { version, msg_type, flags, ctrl, len, seqno: 0 }
    }

    /// Set the seqno field. Only V40 headers put it on the wire.
    #[must_use]
    pub fn with_seqno(mut self, seqno: Seqno) -> Self {
        self.seqno = seqno;
        self
    }

    /// Protocol version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Message type.
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    /// Flags.
    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    /// Control byte.
    pub fn ctrl(&self) -> u8 {
        self.ctrl
    }

    /// Payload length following the header.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether no payload follows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Seqno carried by a V40 header; 0 for V21.
    pub fn seqno(&self) -> Seqno {
        self.seqno
    }

    /// Serialized header size for this message's version.
    pub fn serial_size(&self) -> Result<usize> {
        Generation::for_version(self.version).map(Generation::serial_size)
    }

    /// Encode the header into `buf` at `offset`.
    ///
    /// Returns the number of bytes written.
    pub fn encode(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        let generation = Generation::for_version(self.version)?;
        let size = generation.serial_size();
        let available = buf.len().saturating_sub(offset);
        if available < size {
            return Err(ProtocolError::BufferTooSmall { needed: size, available });
        }

        let out = &mut buf[offset..offset + size];
        match generation {
            Generation::V21 => {
                let header = HeaderV21 {
                    version: self.version,
                    msg_type: self.msg_type.to_u8(),
                    flags: self.flags.bits(),
                    ctrl: self.ctrl,
                    len: U64::new(self.len),
                };
                out.copy_from_slice(header.as_bytes());
            },
            Generation::V40 => {
                let len = u32::try_from(self.len).map_err(|_| ProtocolError::PayloadTooLarge {
                    size: self.len,
                    max: generation.max_len(),
                })?;
                let header = HeaderV40 {
                    version: self.version,
                    msg_type: self.msg_type.to_u8(),
                    flags: self.flags.bits(),
                    ctrl: self.ctrl,
                    len: U32::new(len),
                    seqno: I64::new(self.seqno),
                };
                let (fields, checksum) = out.split_at_mut(HeaderV40::SIZE);
                fields.copy_from_slice(header.as_bytes());
                checksum.copy_from_slice(&xxh3_64(fields).to_le_bytes());
            },
        }

        Ok(size)
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.serial_size()?];
        self.encode(&mut buf, 0)?;
        Ok(buf)
    }

    /// Decode a header of the given `version` from `buf` at `offset`.
    ///
    /// The layout is chosen from `version` alone. For V40 the checksum is
    /// verified before any field, including the version byte, is read.
    pub fn decode(version: u8, buf: &[u8], offset: usize) -> Result<Self> {
        let generation = Generation::for_version(version)?;
        let size = generation.serial_size();
        let available = buf.len().saturating_sub(offset);
        if available < size {
            return Err(ProtocolError::FrameTruncated { expected: size, actual: available });
        }
        let src = &buf[offset..offset + size];

        let (wire_version, msg_type, flags, ctrl, len, seqno) = match generation {
            Generation::V21 => {
                let header = HeaderV21::read_from_bytes(src).map_err(|_| {
                    ProtocolError::FrameTruncated { expected: size, actual: available }
                })?;
                (header.version, header.msg_type, header.flags, header.ctrl, header.len.get(), 0)
            },
            Generation::V40 => {
                let (fields, checksum) = src.split_at(HeaderV40::SIZE);
                let mut carried = [0u8; CHECKSUM_SIZE];
                carried.copy_from_slice(checksum);
                let expected = u64::from_le_bytes(carried);
                let actual = xxh3_64(fields);
                if expected != actual {
                    return Err(ProtocolError::ChecksumMismatch { expected, actual });
                }

                let header = HeaderV40::read_from_bytes(fields).map_err(|_| {
                    ProtocolError::FrameTruncated { expected: size, actual: available }
                })?;
                (
                    header.version,
                    header.msg_type,
                    header.flags,
                    header.ctrl,
                    u64::from(header.len.get()),
                    header.seqno.get(),
                )
            },
        };

        if wire_version != version {
            return Err(ProtocolError::VersionMismatch { expected: version, actual: wire_version });
        }

        let msg_type =
            MessageType::from_u8(msg_type).ok_or(ProtocolError::UnknownMessageType(msg_type))?;

        Ok(Self {
            version,
            msg_type,
            flags: MessageFlags::from_bits_retain(flags),
            ctrl,
            len,
            seqno,
        })
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    fn handshake(version: u8) -> Message {
        Message::new(version, MessageType::Handshake, MessageFlags::from_bits_retain(0x2), 3, 1001)
    }

    #[test]
    fn v21_is_twelve_bytes() {
        let msg = handshake(VER21);
        assert_eq!(msg.serial_size().unwrap(), 12);

        let bytes = msg.to_vec().unwrap();
        assert_eq!(bytes, hex!("04 01 02 03 e9 03 00 00 00 00 00 00"));

        let decoded = Message::decode(VER21, &bytes, 0).unwrap();
        assert_eq!(decoded.version(), VER21);
        assert_eq!(decoded.msg_type(), MessageType::Handshake);
        assert_eq!(decoded.flags().bits(), 0x2);
        assert_eq!(decoded.ctrl(), 3);
        assert_eq!(decoded.len(), 1001);
    }

    #[test]
    fn v40_is_header_plus_checksum() {
        let msg = handshake(VER40).with_seqno(42);
        assert_eq!(msg.serial_size().unwrap(), 16 + 8);

        let bytes = msg.to_vec().unwrap();
        insta::assert_snapshot!(hex::encode(&bytes[..16]), @"0a010203e90300002a00000000000000");

        let decoded = Message::decode(VER40, &bytes, 0).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_at_offset() {
        let msg = handshake(VER40);
        let mut buf = vec![0xaa; 5 + msg.serial_size().unwrap()];
        let written = msg.encode(&mut buf, 5).unwrap();
        assert_eq!(written, 24);
        assert_eq!(Message::decode(VER40, &buf, 5).unwrap(), msg);
    }

    #[test]
    fn retired_generation_is_rejected() {
        for version in 0..VER21 {
            let buf = [version, 1, 2, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
            assert_eq!(
                Message::decode(version, &buf, 0),
                Err(ProtocolError::UnsupportedVersion { version })
            );
            let msg = Message::new(version, MessageType::Handshake, MessageFlags::empty(), 0, 0);
            assert!(msg.to_vec().is_err());
        }
    }

    #[test]
    fn future_version_is_rejected() {
        assert_eq!(
            Generation::for_version(VER40 + 1),
            Err(ProtocolError::UnsupportedVersion { version: VER40 + 1 })
        );
    }

    #[test]
    fn layout_follows_tag_not_length() {
        // A V40 frame decoded as V21 must not be reinterpreted, even though
        // there are enough bytes for a V21 header.
        let bytes = handshake(VER40).to_vec().unwrap();
        assert_eq!(
            Message::decode(VER21, &bytes, 0),
            Err(ProtocolError::VersionMismatch { expected: VER21, actual: VER40 })
        );
    }

    #[test]
    fn truncated_frame_is_distinct_from_checksum_fault() {
        let bytes = handshake(VER40).to_vec().unwrap();
        assert_eq!(
            Message::decode(VER40, &bytes[..20], 0),
            Err(ProtocolError::FrameTruncated { expected: 24, actual: 20 })
        );
    }

    #[test]
    fn v40_rejects_oversized_len() {
        let msg = Message::new(VER40, MessageType::Trx, MessageFlags::empty(), 0, u64::from(u32::MAX) + 1);
        assert!(matches!(msg.to_vec(), Err(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn encode_into_short_buffer_fails() {
        let mut buf = [0u8; 11];
        assert_eq!(
            handshake(VER21).encode(&mut buf, 0),
            Err(ProtocolError::BufferTooSmall { needed: 12, available: 11 })
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut bytes = handshake(VER21).to_vec().unwrap();
        bytes[1] = 0x7f;
        assert_eq!(Message::decode(VER21, &bytes, 0), Err(ProtocolError::UnknownMessageType(0x7f)));
    }
}
