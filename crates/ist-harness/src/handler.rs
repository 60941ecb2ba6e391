//! Event handler that records what it is given.

use ist_core::{EntryKind, EventHandler, ReceivedEntry, StreamStatus};
use ist_proto::Seqno;
use parking_lot::Mutex;
use tokio::sync::watch;

/// One handler call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// `apply_transaction`
    Transaction {
        /// Seqno delivered
        seqno: Seqno,
        /// Preload flag
        preload: bool,
        /// Skip placeholder
        skip: bool,
        /// Above the apply boundary
        must_apply: bool,
    },
    /// `apply_configuration_change`
    ConfigurationChange {
        /// Seqno delivered
        seqno: Seqno,
        /// Preload flag
        preload: bool,
        /// Above the apply boundary
        must_apply: bool,
    },
    /// `stream_ended`
    Ended(StreamStatus),
}

/// Records every call in order and lets tests await the end of the stream.
#[derive(Debug)]
pub struct RecordingHandler {
    log: Mutex<Vec<Observed>>,
    ended: watch::Sender<Option<StreamStatus>>,
    ended_rx: watch::Receiver<Option<StreamStatus>>,
}

impl RecordingHandler {
    /// Empty recorder.
    pub fn new() -> Self {
        let (ended, ended_rx) = watch::channel(None);
        Self { log: Mutex::new(Vec::new()), ended, ended_rx }
    }

    /// Calls so far.
    pub fn observed(&self) -> Vec<Observed> {
        self.log.lock().clone()
    }

    /// Seqnos delivered so far, in delivery order.
    pub fn seqnos(&self) -> Vec<Seqno> {
        self.log
            .lock()
            .iter()
            .filter_map(|event| match event {
                Observed::Transaction { seqno, .. }
                | Observed::ConfigurationChange { seqno, .. } => Some(*seqno),
                Observed::Ended(_) => None,
            })
            .collect()
    }

    /// Number of `stream_ended` calls.
    pub fn end_count(&self) -> usize {
        self.log.lock().iter().filter(|event| matches!(event, Observed::Ended(_))).count()
    }

    /// Wait for `stream_ended` and return its status.
    pub async fn wait_ended(&self) -> StreamStatus {
        let mut rx = self.ended_rx.clone();
        loop {
            if let Some(status) = rx.borrow_and_update().clone() {
                return status;
            }
            // The sender lives in `self`, so the channel cannot close here.
            if rx.changed().await.is_err() {
                return StreamStatus::Success;
            }
        }
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for RecordingHandler {
    fn apply_transaction(&self, entry: &ReceivedEntry, preload: bool) {
        self.log.lock().push(Observed::Transaction {
            seqno: entry.seqno,
            preload,
            skip: entry.skip,
            must_apply: entry.must_apply,
        });
    }

    fn apply_configuration_change(&self, entry: &ReceivedEntry, preload: bool) {
        debug_assert_eq!(entry.kind, EntryKind::ConfigurationChange);
        self.log.lock().push(Observed::ConfigurationChange {
            seqno: entry.seqno,
            preload,
            must_apply: entry.must_apply,
        });
    }

    fn stream_ended(&self, status: StreamStatus) {
        self.log.lock().push(Observed::Ended(status.clone()));
        self.ended.send_replace(Some(status));
    }
}
