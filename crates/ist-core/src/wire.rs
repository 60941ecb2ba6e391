//! Frame I/O over a byte stream.

use bytes::BytesMut;
use ist_proto::{Frame, Generation, Message, MessageType, Payload, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::IstError;

const MAX_HEADER: usize = 24;

/// Reads and writes frames of one protocol version.
///
/// Writes are buffered. [`FramedStream::send`] flushes after everything
/// except ordered records, so a batch of records goes out together and
/// the handshake and control messages are never held back.
#[derive(Debug)]
pub struct FramedStream<S> {
    io: BufWriter<S>,
    version: u8,
    generation: Generation,
    max_payload: u64,
    encode_buf: Vec<u8>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream` for `version` frames, refusing payloads above
    /// `max_payload` bytes.
    pub fn new(stream: S, version: u8, max_payload: u64) -> Result<Self, IstError> {
        let generation = Generation::for_version(version)
            .map_err(|_| IstError::UnsupportedProtocolVersion { local: version, peer: None })?;
        Ok(Self {
            io: BufWriter::new(stream),
            version,
            generation,
            max_payload,
            encode_buf: Vec::with_capacity(MAX_HEADER),
        })
    }

    /// Protocol version of this stream.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Underlying stream. Bytes written here bypass the write buffer, so
    /// flush first.
    pub fn get_mut(&mut self) -> &mut S {
        self.io.get_mut()
    }

    /// Read one frame.
    ///
    /// The first byte names the sender's version. A version of another
    /// header generation fails right away since the rest of the header
    /// cannot be sized; otherwise the whole header is read and decoded,
    /// which verifies the checksum before the version is compared.
    pub async fn read_frame(&mut self) -> Result<Frame, IstError> {
        let size = self.generation.serial_size();
        let mut header = [0u8; MAX_HEADER];
        self.io.read_exact(&mut header[..1]).await?;

        let peer = header[0];
        let other_layout = Generation::for_version(peer).is_ok_and(|g| g != self.generation);
        if other_layout {
            return Err(IstError::UnsupportedProtocolVersion {
                local: self.version,
                peer: Some(peer),
            });
        }

        self.io.read_exact(&mut header[1..size]).await?;
        let message = Message::decode(self.version, &header[..size], 0)?;

        if message.len() > self.max_payload {
            return Err(IstError::FrameDecode(ProtocolError::PayloadTooLarge {
                size: message.len(),
                max: self.max_payload,
            }));
        }
        let len = usize::try_from(message.len()).map_err(|_| {
            IstError::FrameDecode(ProtocolError::PayloadTooLarge {
                size: message.len(),
                max: usize::MAX as u64,
            })
        })?;

        let mut payload = BytesMut::zeroed(len);
        self.io.read_exact(&mut payload).await?;
        Ok(Frame::new(message, payload.freeze())?)
    }

    /// Read and interpret one frame.
    pub async fn recv(&mut self) -> Result<Payload, IstError> {
        let frame = self.read_frame().await?;
        Ok(Payload::from_frame(frame)?)
    }

    /// Queue a frame. Header and payload are written separately so large
    /// payloads are not copied.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), IstError> {
        self.encode_buf.clear();
        self.encode_buf.resize(frame.message.serial_size()?, 0);
        frame.message.encode(&mut self.encode_buf, 0)?;
        self.io.write_all(&self.encode_buf).await?;
        self.io.write_all(&frame.payload).await?;
        Ok(())
    }

    /// Encode and send `payload`.
    pub async fn send(&mut self, payload: Payload) -> Result<(), IstError> {
        let flush = !matches!(payload, Payload::Record(_));
        let frame = payload.into_frame(self.version)?;
        self.write_frame(&frame).await?;
        if flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Push buffered frames to the peer.
    pub async fn flush(&mut self) -> Result<(), IstError> {
        self.io.flush().await?;
        Ok(())
    }

    /// Wait until the peer closes its side, discarding anything it sends.
    pub async fn wait_closed(&mut self) -> Result<(), IstError> {
        let mut scratch = [0u8; 256];
        loop {
            if self.io.read(&mut scratch).await? == 0 {
                return Ok(());
            }
        }
    }
}

pub(crate) fn unexpected(expected: MessageType, actual: &Payload) -> IstError {
    IstError::FrameDecode(ProtocolError::UnexpectedMessage {
        expected,
        actual: actual.message_type(),
    })
}

/// Tell the peer why the session ends. Best effort: the connection may be
/// the thing that failed.
pub(crate) async fn notify_peer<S>(framed: &mut FramedStream<S>, err: &IstError)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if matches!(
        err,
        IstError::Transport(_) | IstError::PeerError(_) | IstError::ConnectionClosed { .. }
    ) {
        return;
    }
    if let Err(send_err) = framed.send(Payload::Ctrl(err.ctrl_code())).await {
        debug!(error = %send_err, "could not notify peer");
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use ist_proto::{
        CtrlCode, GroupUuid, Handshake, MessageFlags, OrderedRecord, RecordKind, VER21, VER40,
    };
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn payloads_cross_the_stream() {
        for version in [VER21, VER40] {
            let (a, b) = duplex(4096);
            let mut left = FramedStream::new(a, version, 1024).unwrap();
            let mut right = FramedStream::new(b, version, 1024).unwrap();

            let handshake =
                Payload::Handshake(Handshake { group_uuid: GroupUuid::NIL, first: 1, last: 2 });
            let record = Payload::Record(OrderedRecord {
                kind: RecordKind::WriteSet,
                seqno: 1,
                preload: false,
                payload: Bytes::from_static(b"ws"),
            });

            left.send(handshake.clone()).await.unwrap();
            left.send(record.clone()).await.unwrap();
            left.send(Payload::Ctrl(CtrlCode::Eof)).await.unwrap();

            assert_eq!(right.recv().await.unwrap(), handshake);
            assert_eq!(right.recv().await.unwrap(), record);
            assert_eq!(right.recv().await.unwrap(), Payload::Ctrl(CtrlCode::Eof));
        }
    }

    #[tokio::test]
    async fn other_generation_is_refused_immediately() {
        let (a, b) = duplex(4096);
        let mut v21 = FramedStream::new(a, VER21, 1024).unwrap();
        let mut v40 = FramedStream::new(b, VER40, 1024).unwrap();

        v21.send(Payload::Ctrl(CtrlCode::Ok)).await.unwrap();
        assert!(matches!(
            v40.recv().await,
            Err(IstError::UnsupportedProtocolVersion { local: VER40, peer: Some(VER21) })
        ));
    }

    #[tokio::test]
    async fn corrupted_header_fails_checksum() {
        let (mut a, b) = duplex(4096);
        let mut reader = FramedStream::new(b, VER40, 1024).unwrap();

        let mut bytes = Message::new(VER40, MessageType::Ctrl, MessageFlags::empty(), 0, 0)
            .to_vec()
            .unwrap();
        bytes[3] ^= 0x01;
        a.write_all(&bytes).await.unwrap();

        assert!(matches!(reader.recv().await, Err(IstError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn oversized_payload_is_refused() {
        let (a, b) = duplex(4096);
        let mut writer = FramedStream::new(a, VER40, u64::MAX).unwrap();
        let mut reader = FramedStream::new(b, VER40, 4).unwrap();

        writer
            .send(Payload::Record(OrderedRecord {
                kind: RecordKind::WriteSet,
                seqno: 1,
                preload: false,
                payload: Bytes::from_static(b"too large"),
            }))
            .await
            .unwrap();
        writer.flush().await.unwrap();

        assert!(matches!(
            reader.recv().await,
            Err(IstError::FrameDecode(ProtocolError::PayloadTooLarge { size: 9, max: 4 }))
        ));
    }

    #[tokio::test]
    async fn closed_peer_is_observed() {
        let (a, b) = duplex(64);
        let mut reader = FramedStream::new(b, VER40, 1024).unwrap();
        drop(a);
        reader.wait_closed().await.unwrap();
    }
}
