//! Joiner side of a transfer.
//!
//! # Lifecycle
//!
//! ```text
//! ┌─────────┐ prepare ┌──────────┐ bound ┌───────────┐ accepted ┌────────┐
//! │ Created │────────>│ Prepared │──────>│ Listening │─────────>│ Active │
//! └─────────┘         └──────────┘       └───────────┘          └────────┘
//!                                              │                  │    │
//!                                              │ interrupt/error  │    │ EOF at last
//!                                              ↓                  │    ↓
//!                                         ┌────────┐    error     │ ┌──────────┐
//!                                         │ Failed │<─────────────┘ │ Finished │
//!                                         └────────┘                └──────────┘
//! ```
//!
//! `prepare` binds the listener and starts a background task that accepts
//! exactly one donor connection. The task sends the handshake, waits for
//! [`Receiver::ready`], then delivers records to the [`EventHandler`] in
//! order. Whatever the outcome, the state becomes terminal first and then
//! [`EventHandler::stream_ended`] is called once.

use std::{any::Any, fmt, io, panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use futures_util::FutureExt;
use ist_proto::{
    CtrlCode, Generation, GroupUuid, Handshake, MessageType, OrderedRecord, Payload, RecordKind,
    Seqno,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Notify, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    IstError,
    address::{IstAddress, determine_bind_address, determine_receive_address},
    cache::{BufferGuard, EntryKind, WriteSetCache},
    config::{IstConfig, TransferConfig},
    event::{EventHandler, ReceivedEntry, StreamStatus},
    session::{Role, SeqnoRange, TransferSession, TransferSummary},
    transport::{Transport, TransportListener},
    wire::{FramedStream, notify_peer, unexpected},
};

/// Receiver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Constructed, not prepared
    Created,
    /// Addresses resolved, binding
    Prepared,
    /// Waiting for the donor to connect
    Listening,
    /// Donor connected
    Active,
    /// Whole range delivered
    Finished,
    /// Session aborted
    Failed,
}

impl ReceiverState {
    /// Whether the session is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Receives one seqno range from a donor.
pub struct Receiver<T: Transport> {
    config: IstConfig,
    transfer: TransferConfig,
    use_ssl_default: bool,
    cache: Arc<dyn WriteSetCache>,
    handler: Arc<dyn EventHandler>,
    transport: T,
    state: Arc<watch::Sender<ReceiverState>>,
    ready: Option<oneshot::Sender<Seqno>>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<Result<TransferSummary, IstError>>>,
}

impl<T: Transport> Receiver<T> {
    /// Create a receiver. Nothing is bound until [`Self::prepare`].
    pub fn new(
        config: IstConfig,
        transfer: TransferConfig,
        cache: Arc<dyn WriteSetCache>,
        handler: Arc<dyn EventHandler>,
        transport: T,
    ) -> Self {
        let (state, _) = watch::channel(ReceiverState::Created);
        Self {
            config,
            transfer,
            use_ssl_default: false,
            cache,
            handler,
            transport,
            state: Arc::new(state),
            ready: None,
            shutdown: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Default to `ssl` when an address names no scheme, even without a
    /// TLS key configured.
    #[must_use]
    pub fn with_ssl_default(mut self, use_ssl_default: bool) -> Self {
        self.use_ssl_default = use_ssl_default;
        self
    }

    /// Current state.
    pub fn state(&self) -> ReceiverState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ReceiverState> {
        self.state.subscribe()
    }

    /// Resolve addresses, bind, and start waiting for the donor to send
    /// `[first, last]`.
    ///
    /// Returns the address to hand to the donor. When the configured port is
    /// 0 it carries the port actually bound.
    pub async fn prepare(
        &mut self,
        first: Seqno,
        last: Seqno,
        version: u8,
        group: GroupUuid,
    ) -> Result<IstAddress, IstError> {
        self.expect_state(ReceiverState::Created, "prepare")?;
        let range = SeqnoRange::new(first, last)?;
        Generation::for_version(version)
            .map_err(|_| IstError::UnsupportedProtocolVersion { local: version, peer: None })?;

        let recv_addr = determine_receive_address(&self.config, self.use_ssl_default)?;
        let bind_addr = match determine_bind_address(&self.config, self.use_ssl_default) {
            Ok(addr) => addr,
            Err(IstError::AddressNotSet(_)) => recv_addr.clone(),
            Err(err) => return Err(err),
        };

        self.state.send_replace(ReceiverState::Prepared);
        let (listener, bound_port) = match self.listen(&bind_addr).await {
            Ok(bound) => bound,
            Err(err) => {
                self.state.send_replace(ReceiverState::Created);
                warn!(bind = %bind_addr, error = %err, "IST listener bind failed");
                return Err(err.into());
            },
        };
        let advertised =
            if recv_addr.port == 0 { recv_addr.with_port(bound_port) } else { recv_addr };

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = ReceiveTask {
            listener,
            range,
            version,
            group,
            transfer: self.transfer.clone(),
            cache: Arc::clone(&self.cache),
            handler: Arc::clone(&self.handler),
            state: Arc::clone(&self.state),
        };

        self.state.send_replace(ReceiverState::Listening);
        self.task = Some(tokio::spawn(task.run(ready_rx, Arc::clone(&self.shutdown))));
        self.ready = Some(ready_tx);

        info!(
            recv = %advertised,
            bind = %bind_addr,
            port = bound_port,
            first,
            last,
            version,
            "IST receiver prepared"
        );
        Ok(advertised)
    }

    /// Allow the donor to start streaming. Records below `first` are
    /// delivered with `must_apply = false`.
    pub fn ready(&mut self, first: Seqno) -> Result<(), IstError> {
        let Some(ready) = self.ready.take() else {
            let state = self.state().to_string();
            return Err(IstError::InvalidState { state, operation: "ready" });
        };
        if ready.send(first).is_err() {
            debug!(first, "receive task already ended");
        }
        Ok(())
    }

    /// Ask the session to stop. It ends as `Failed` with
    /// [`IstError::Cancelled`] unless it already ended.
    pub fn interrupt(&self) {
        debug!(state = %self.state(), "IST receiver interrupted");
        self.shutdown.notify_one();
    }

    /// Collect the outcome of an ended session.
    ///
    /// Fails with [`IstError::InvalidState`] while the session is running.
    pub async fn finished(&mut self) -> Result<TransferSummary, IstError> {
        let state = self.state();
        let task = match self.task.take() {
            Some(task) if state.is_terminal() || task.is_finished() => task,
            other => {
                self.task = other;
                let state = state.to_string();
                return Err(IstError::InvalidState { state, operation: "finished" });
            },
        };
        match task.await {
            Ok(result) => result,
            Err(err) => {
                self.state.send_replace(ReceiverState::Failed);
                Err(IstError::TaskFailed(err.to_string()))
            },
        }
    }

    fn expect_state(
        &self,
        expected: ReceiverState,
        operation: &'static str,
    ) -> Result<(), IstError> {
        let state = self.state();
        if state != expected {
            return Err(IstError::InvalidState { state: state.to_string(), operation });
        }
        Ok(())
    }

    async fn listen(&self, bind_addr: &IstAddress) -> io::Result<(T::Listener, u16)> {
        let listener = self.transport.bind(bind_addr).await?;
        let port = listener.local_port()?;
        Ok((listener, port))
    }
}

impl<T: Transport> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("state", &self.state())
            .field("ready_pending", &self.ready.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Drop for Receiver<T> {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            self.shutdown.notify_one();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload");
    format!("session panicked: {detail}")
}

struct ReceiveTask<L> {
    listener: L,
    range: SeqnoRange,
    version: u8,
    group: GroupUuid,
    transfer: TransferConfig,
    cache: Arc<dyn WriteSetCache>,
    handler: Arc<dyn EventHandler>,
    state: Arc<watch::Sender<ReceiverState>>,
}

impl<L: TransportListener> ReceiveTask<L> {
    async fn run(
        self,
        ready: oneshot::Receiver<Seqno>,
        shutdown: Arc<Notify>,
    ) -> Result<TransferSummary, IstError> {
        // A panic below, e.g. in the event handler, still ends the session
        // through the failure path.
        let session = AssertUnwindSafe(self.session(ready)).catch_unwind();
        let result = tokio::select! {
            outcome = session => outcome.unwrap_or_else(|panic| {
                Err(IstError::TaskFailed(panic_message(panic.as_ref())))
            }),
            () = shutdown.notified() => Err(IstError::Cancelled),
        };

        match &result {
            Ok(summary) => {
                self.state.send_replace(ReceiverState::Finished);
                info!(peer = %summary.peer, records = summary.records, "IST received");
            },
            Err(err) => {
                self.state.send_replace(ReceiverState::Failed);
                warn!(error = %err, "IST receive failed");
            },
        }
        self.handler.stream_ended(StreamStatus::from_result(&result));
        result
    }

    async fn session(&self, ready: oneshot::Receiver<Seqno>) -> Result<TransferSummary, IstError> {
        let (stream, peer) = self.listener.accept().await?;
        info!(%peer, "IST connection accepted");
        self.state.send_replace(ReceiverState::Active);

        let mut framed = FramedStream::new(stream, self.version, self.transfer.max_payload_size)?;
        let result = self.exchange(&mut framed, peer, ready).await;
        if let Err(err) = &result {
            notify_peer(&mut framed, err).await;
        }
        result
    }

    async fn exchange<S>(
        &self,
        framed: &mut FramedStream<S>,
        peer: String,
        ready: oneshot::Receiver<Seqno>,
    ) -> Result<TransferSummary, IstError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let range = timeout(self.transfer.handshake_timeout, self.handshake(framed))
            .await
            .map_err(|_| IstError::Timeout("handshake"))??;

        let apply_from = ready.await.map_err(|_| IstError::Cancelled)?;
        debug!(apply_from, first = range.first(), last = range.last(), "requesting stream");
        framed.send(Payload::Ctrl(CtrlCode::Ok)).await?;

        let mut session = TransferSession::new(Role::Receiver, peer, range, self.version);
        loop {
            let payload = match framed.recv().await {
                Ok(payload) => payload,
                Err(IstError::Transport(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(IstError::ConnectionClosed {
                        received: session.last_seen(),
                        expected: range.last(),
                    });
                },
                Err(err) => return Err(err),
            };
            match payload {
                Payload::Record(record) => self.deliver(&mut session, record, apply_from)?,
                Payload::Ctrl(CtrlCode::Eof) => break,
                Payload::Ctrl(code) => return Err(IstError::PeerError(code)),
                other => return Err(unexpected(MessageType::Trx, &other)),
            }
        }

        if !session.is_complete() {
            return Err(IstError::IncompleteStream {
                received: session.last_seen(),
                expected: range.last(),
            });
        }
        Ok(session.summary())
    }

    /// Returns the range the donor will send: it may start below ours
    /// with preload records but must end at our last seqno.
    async fn handshake<S>(&self, framed: &mut FramedStream<S>) -> Result<SeqnoRange, IstError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        framed
            .send(Payload::Handshake(Handshake {
                group_uuid: self.group,
                first: self.range.first(),
                last: self.range.last(),
            }))
            .await?;

        let response = match framed.recv().await? {
            Payload::HandshakeResponse(response) => response,
            Payload::Ctrl(code) => return Err(IstError::PeerError(code)),
            other => return Err(unexpected(MessageType::HandshakeResponse, &other)),
        };
        if response.last != self.range.last() || response.first > self.range.first() {
            return Err(IstError::InvalidRange { first: response.first, last: response.last });
        }
        SeqnoRange::new(response.first, response.last)
    }

    fn deliver(
        &self,
        session: &mut TransferSession,
        record: OrderedRecord,
        apply_from: Seqno,
    ) -> Result<(), IstError> {
        session.advance(record.seqno, record.preload)?;
        let must_apply = record.seqno >= apply_from;

        let kind = match record.kind {
            RecordKind::Skip => {
                let entry = ReceivedEntry {
                    seqno: record.seqno,
                    kind: EntryKind::WriteSet,
                    skip: true,
                    must_apply,
                    payload: Bytes::new(),
                    buffer: None,
                };
                self.handler.apply_transaction(&entry, record.preload);
                return Ok(());
            },
            RecordKind::WriteSet => EntryKind::WriteSet,
            RecordKind::ConfigurationChange => EntryKind::ConfigurationChange,
        };

        // Our reference is dropped once the handler returns; the cache keeps
        // the ordered buffer.
        let buffer = BufferGuard::allocate(self.cache.as_ref(), record.payload.clone())?;
        self.cache.assign_sequence(buffer.id(), record.seqno, kind, !record.preload)?;

        let entry = ReceivedEntry {
            seqno: record.seqno,
            kind,
            skip: false,
            must_apply,
            payload: record.payload,
            buffer: Some(buffer.id()),
        };
        match kind {
            EntryKind::WriteSet => self.handler.apply_transaction(&entry, record.preload),
            EntryKind::ConfigurationChange => {
                self.handler.apply_configuration_change(&entry, record.preload);
            },
        }
        Ok(())
    }
}
