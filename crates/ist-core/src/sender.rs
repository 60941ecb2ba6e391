//! Donor side of a transfer.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ send ┌────────────┐ connected ┌─────────────┐ Ctrl(Ok) ┌───────────┐
//! │ Idle │─────>│ Connecting │──────────>│ Handshaking │─────────>│ Streaming │
//! └──────┘      └────────────┘           └─────────────┘          └───────────┘
//!                     │                        │                       │ last sent
//!                     │                        │                       ↓
//!                     │    any error      ┌────────┐  EOF sent   ┌──────────┐
//!                     └──────────────────>│ Failed │<────────────│ Draining │
//!                                         └────────┘   error     └──────────┘
//!                                                                      │ peer closed
//!                                                                      ↓
//!                                                                 ┌────────┐
//!                                                                 │ Closed │
//!                                                                 └────────┘
//! ```
//!
//! The cache range is locked before connecting and released when `send`
//! returns, whatever the outcome. A task running `send` that is aborted
//! releases it as well since the lock is a guard on the task's stack.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use ist_proto::{
    CtrlCode, HandshakeResponse, MessageType, OrderedRecord, Payload, RecordKind, Seqno,
};
use tokio::{io::AsyncRead, io::AsyncWrite, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    IstError,
    address::IstAddress,
    cache::{CacheEntry, CacheRangeLock, EntryKind, WriteSetCache},
    config::TransferConfig,
    session::{Role, SeqnoRange, TransferSession, TransferSummary},
    transport::Transport,
    wire::{FramedStream, notify_peer, unexpected},
};

/// Sender state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Created, nothing sent
    Idle,
    /// Range locked, connecting to the receiver
    Connecting,
    /// Exchanging handshake messages
    Handshaking,
    /// Shipping records
    Streaming,
    /// EOF sent, waiting for the receiver to close
    Draining,
    /// Range delivered
    Closed,
    /// Session aborted
    Failed,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Streams a locked cache range to one receiver.
pub struct Sender<T: Transport> {
    config: TransferConfig,
    cache: Arc<dyn WriteSetCache>,
    peer: IstAddress,
    version: u8,
    transport: T,
    state: SenderState,
}

impl<T: Transport> Sender<T> {
    /// Create a sender for `peer` speaking `version`.
    pub fn new(
        config: TransferConfig,
        cache: Arc<dyn WriteSetCache>,
        peer: IstAddress,
        version: u8,
        transport: T,
    ) -> Self {
        Self { config, cache, peer, version, transport, state: SenderState::Idle }
    }

    /// Current state.
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Receiver address.
    pub fn peer(&self) -> &IstAddress {
        &self.peer
    }

    /// Send `[first, last]`. Seqnos below `preload_start` are flagged as
    /// preload.
    ///
    /// Can be called once; the sender ends in `Closed` or `Failed`.
    pub async fn send(
        &mut self,
        first: Seqno,
        last: Seqno,
        preload_start: Seqno,
    ) -> Result<TransferSummary, IstError> {
        if self.state != SenderState::Idle {
            return Err(IstError::InvalidState { state: self.state.to_string(), operation: "send" });
        }

        let result = self.run(first, last, preload_start).await;
        match &result {
            Ok(summary) => {
                self.state = SenderState::Closed;
                info!(peer = %self.peer, first, last, records = summary.records, "IST sent");
            },
            Err(err) => {
                self.state = SenderState::Failed;
                warn!(peer = %self.peer, first, last, error = %err, "IST send failed");
            },
        }
        result
    }

    /// Run [`Self::send`] on a new task.
    pub fn spawn(
        mut self,
        first: Seqno,
        last: Seqno,
        preload_start: Seqno,
    ) -> JoinHandle<Result<TransferSummary, IstError>> {
        tokio::spawn(async move { self.send(first, last, preload_start).await })
    }

    async fn run(
        &mut self,
        first: Seqno,
        last: Seqno,
        preload_start: Seqno,
    ) -> Result<TransferSummary, IstError> {
        let range = SeqnoRange::new(first, last)?;
        let _lock = CacheRangeLock::acquire(Arc::clone(&self.cache), first, last)?;
        debug!(first, last, "cache range locked");

        self.state = SenderState::Connecting;
        let stream = timeout(self.config.handshake_timeout, self.transport.connect(&self.peer))
            .await
            .map_err(|_| IstError::Timeout("connect"))??;
        let mut framed = FramedStream::new(stream, self.version, self.config.max_payload_size)?;
        debug!(peer = %self.peer, version = self.version, "connected");

        let result = self.exchange(&mut framed, range, preload_start).await;
        if let Err(err) = &result {
            notify_peer(&mut framed, err).await;
        }
        result
    }

    async fn exchange<S>(
        &mut self,
        framed: &mut FramedStream<S>,
        range: SeqnoRange,
        preload_start: Seqno,
    ) -> Result<TransferSummary, IstError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.state = SenderState::Handshaking;
        timeout(self.config.handshake_timeout, handshake(framed, range))
            .await
            .map_err(|_| IstError::Timeout("handshake"))??;

        // The receiver sends the go-ahead once its own state allows applying.
        let go_ahead = timeout(self.config.ready_timeout, framed.recv())
            .await
            .map_err(|_| IstError::Timeout("ready"))??;
        match go_ahead {
            Payload::Ctrl(CtrlCode::Ok) => {},
            Payload::Ctrl(code) => return Err(IstError::PeerError(code)),
            other => return Err(unexpected(MessageType::Ctrl, &other)),
        }

        self.state = SenderState::Streaming;
        let mut session =
            TransferSession::new(Role::Sender, self.peer.to_string(), range, self.version);
        self.stream(framed, &mut session, preload_start).await?;

        self.state = SenderState::Draining;
        framed.send(Payload::Ctrl(CtrlCode::Eof)).await?;
        match timeout(self.config.drain_timeout, framed.wait_closed()).await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => debug!(error = %err, "receiver closed abruptly after EOF"),
            Err(_) => warn!(peer = %self.peer, "receiver did not close after EOF"),
        }

        Ok(session.summary())
    }

    async fn stream<S>(
        &self,
        framed: &mut FramedStream<S>,
        session: &mut TransferSession,
        preload_start: Seqno,
    ) -> Result<(), IstError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let range = session.range();
        let batch = Seqno::try_from(self.config.fetch_batch.max(1)).unwrap_or(Seqno::MAX);
        let mut next = range.first();

        loop {
            let upto = next.saturating_add(batch - 1).min(range.last());
            for entry in self.cache.fetch_batch(next, upto)? {
                let record = to_record(entry, preload_start);
                session.advance(record.seqno, false)?;
                framed.send(Payload::Record(record)).await?;
            }
            framed.flush().await?;
            // The range may end at Seqno::MAX.
            if upto == range.last() {
                return Ok(());
            }
            next = upto + 1;
        }
    }
}

impl<T: Transport> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("peer", &self.peer)
            .field("version", &self.version)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

async fn handshake<S>(framed: &mut FramedStream<S>, range: SeqnoRange) -> Result<(), IstError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match framed.recv().await? {
        Payload::Handshake(request) => request,
        Payload::Ctrl(code) => return Err(IstError::PeerError(code)),
        other => return Err(unexpected(MessageType::Handshake, &other)),
    };
    debug!(
        group = %request.group_uuid,
        first = request.first,
        last = request.last,
        "handshake received"
    );

    // We may start below what the receiver asked for; it must end where
    // the receiver expects.
    if request.last != range.last() || request.first < range.first() {
        return Err(IstError::InvalidRange { first: request.first, last: request.last });
    }

    framed
        .send(Payload::HandshakeResponse(HandshakeResponse {
            first: range.first(),
            last: range.last(),
        }))
        .await
}

fn to_record(entry: CacheEntry, preload_start: Seqno) -> OrderedRecord {
    let preload = entry.seqno < preload_start;
    let (kind, payload) = match entry.kind {
        EntryKind::WriteSet if entry.skip => (RecordKind::Skip, Bytes::new()),
        EntryKind::WriteSet => (RecordKind::WriteSet, entry.payload),
        EntryKind::ConfigurationChange => (RecordKind::ConfigurationChange, entry.payload),
    };
    OrderedRecord { kind, seqno: entry.seqno, preload, payload }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seqno: Seqno, kind: EntryKind, skip: bool) -> CacheEntry {
        CacheEntry { seqno, kind, skip, payload: Bytes::from_static(b"buf") }
    }

    #[test]
    fn preload_below_start() {
        assert!(to_record(entry(3, EntryKind::WriteSet, false), 4).preload);
        assert!(!to_record(entry(4, EntryKind::WriteSet, false), 4).preload);
    }

    #[test]
    fn skipped_write_set_ships_empty() {
        let record = to_record(entry(2, EntryKind::WriteSet, true), 1);
        assert_eq!(record.kind, RecordKind::Skip);
        assert!(record.payload.is_empty());
    }

    #[test]
    fn configuration_change_keeps_payload() {
        let record = to_record(entry(3, EntryKind::ConfigurationChange, true), 1);
        assert_eq!(record.kind, RecordKind::ConfigurationChange);
        assert_eq!(&record.payload[..], b"buf");
    }
}
