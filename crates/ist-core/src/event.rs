//! Delivery of received records to the replicator.

use bytes::Bytes;
use ist_proto::Seqno;

use crate::{
    IstError,
    cache::{BufferId, EntryKind},
    error::ErrorCode,
};

/// A record handed to the [`EventHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEntry {
    /// Global seqno
    pub seqno: Seqno,
    /// Write-set or configuration change
    pub kind: EntryKind,
    /// Ordered placeholder with no effect; `payload` is empty
    pub skip: bool,
    /// False for records below the apply boundary given to `ready`. Those
    /// were already covered by a snapshot and only need to be observed.
    pub must_apply: bool,
    /// Record contents
    pub payload: Bytes,
    /// Cache buffer backing `payload`, if the record was cached
    pub buffer: Option<BufferId>,
}

/// How a receive session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    /// Every seqno of the range was delivered
    Success,
    /// Session aborted
    Failure {
        /// Error classification
        code: ErrorCode,
        /// Human readable cause
        reason: String,
    },
}

impl StreamStatus {
    /// Whether the stream completed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub(crate) fn from_result<T>(result: &Result<T, IstError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => Self::Failure { code: err.code(), reason: err.to_string() },
        }
    }
}

/// Receives records from a receive session in seqno order.
///
/// Called from the session's task. Implementations must not block for long:
/// the next record is not read until the call returns.
pub trait EventHandler: Send + Sync + 'static {
    /// A write-set (or skip placeholder) arrived.
    fn apply_transaction(&self, entry: &ReceivedEntry, preload: bool);

    /// A configuration change arrived.
    fn apply_configuration_change(&self, entry: &ReceivedEntry, preload: bool);

    /// The stream ended. Called exactly once per prepared session, after
    /// the last record and after the session state became terminal.
    fn stream_ended(&self, status: StreamStatus);
}
