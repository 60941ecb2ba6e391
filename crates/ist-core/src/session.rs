//! Per-session ordering state.
//!
//! [`TransferSession`] is the pure part of a transfer: it knows the range,
//! the negotiated version and the last seqno accepted, and decides whether
//! the next record may follow. It performs no I/O, so the sender and
//! receiver drivers share it and it can be tested on its own.
//!
//! # Ordering
//!
//! ```text
//!   non-preload:  seqno == last + 1
//!   preload:      seqno >  last
//!   any record:   seqno <= range.last
//! ```
//!
//! A preload record may run ahead of the sequence; the record after it is
//! checked against the preload record's seqno.

use ist_proto::Seqno;

use crate::IstError;

/// Inclusive, non-empty seqno range starting at 1 or above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeqnoRange {
    first: Seqno,
    last: Seqno,
}

impl SeqnoRange {
    /// Validate `[first, last]`.
    pub fn new(first: Seqno, last: Seqno) -> Result<Self, IstError> {
        if first < 1 || last < first {
            return Err(IstError::InvalidRange { first, last });
        }
        Ok(Self { first, last })
    }

    /// First seqno.
    pub fn first(&self) -> Seqno {
        self.first
    }

    /// Last seqno.
    pub fn last(&self) -> Seqno {
        self.last
    }

    /// Number of seqnos in the range.
    pub fn len(&self) -> u64 {
        self.last.abs_diff(self.first) + 1
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `seqno` lies inside the range.
    pub fn contains(&self, seqno: Seqno) -> bool {
        self.first <= seqno && seqno <= self.last
    }
}

/// Side of the transfer this session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Donor streaming from its cache
    Sender,
    /// Joiner consuming the stream
    Receiver,
}

/// Ordering state of one transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    role: Role,
    peer: String,
    range: SeqnoRange,
    version: u8,
    last: Seqno,
    records: u64,
}

impl TransferSession {
    /// Start a session; nothing has been accepted yet.
    pub fn new(role: Role, peer: impl Into<String>, range: SeqnoRange, version: u8) -> Self {
        Self { role, peer: peer.into(), range, version, last: range.first() - 1, records: 0 }
    }

    /// Accept the record at `seqno` or reject it as out of order.
    pub fn advance(&mut self, seqno: Seqno, preload: bool) -> Result<(), IstError> {
        let in_sequence =
            if preload { seqno > self.last } else { self.last.checked_add(1) == Some(seqno) };
        if !in_sequence || seqno > self.range.last() {
            return Err(IstError::OrderingViolation { last: self.last, actual: seqno, preload });
        }
        self.last = seqno;
        self.records += 1;
        Ok(())
    }

    /// Whether the last seqno of the range was accepted.
    pub fn is_complete(&self) -> bool {
        self.last == self.range.last()
    }

    /// Seqno a non-preload record must carry next, `None` once
    /// `Seqno::MAX` was accepted.
    pub fn next_expected(&self) -> Option<Seqno> {
        self.last.checked_add(1)
    }

    /// Last seqno accepted, `range.first - 1` before any.
    pub fn last_seen(&self) -> Seqno {
        self.last
    }

    /// Session range.
    pub fn range(&self) -> SeqnoRange {
        self.range
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Role of this side.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer description.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Outcome of a completed session.
    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            peer: self.peer.clone(),
            first: self.range.first(),
            last: self.range.last(),
            records: self.records,
        }
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    /// Peer the range was exchanged with
    pub peer: String,
    /// First seqno of the range
    pub first: Seqno,
    /// Last seqno of the range
    pub last: Seqno,
    /// Records exchanged
    pub records: u64,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn session(first: Seqno, last: Seqno) -> TransferSession {
        TransferSession::new(Role::Receiver, "peer", SeqnoRange::new(first, last).unwrap(), 10)
    }

    #[test]
    fn range_must_start_at_one_and_be_non_empty() {
        assert!(matches!(SeqnoRange::new(0, 5), Err(IstError::InvalidRange { first: 0, last: 5 })));
        assert!(matches!(SeqnoRange::new(5, 4), Err(IstError::InvalidRange { .. })));
        let range = SeqnoRange::new(5, 5).unwrap();
        assert_eq!(range.len(), 1);
        assert!(range.contains(5));
        assert!(!range.contains(6));
    }

    #[test]
    fn contiguous_stream_completes() {
        let mut session = session(1, 3);
        assert_eq!(session.next_expected(), Some(1));
        for seqno in 1..=3 {
            session.advance(seqno, false).unwrap();
        }
        assert!(session.is_complete());
        assert_eq!(session.summary().records, 3);
    }

    #[test]
    fn gap_is_rejected() {
        let mut session = session(1, 10);
        session.advance(1, false).unwrap();
        session.advance(2, false).unwrap();
        assert!(matches!(
            session.advance(4, false),
            Err(IstError::OrderingViolation { last: 2, actual: 4, preload: false })
        ));
    }

    #[test]
    fn duplicate_is_rejected() {
        let mut session = session(1, 10);
        session.advance(1, false).unwrap();
        assert!(session.advance(1, false).is_err());
        assert!(session.advance(1, true).is_err());
    }

    #[test]
    fn preload_may_run_ahead() {
        let mut session = session(1, 10);
        session.advance(3, true).unwrap();
        assert_eq!(session.last_seen(), 3);
        session.advance(4, false).unwrap();
        assert!(session.advance(4, true).is_err());
    }

    #[test]
    fn seqno_past_range_is_rejected() {
        let mut session = session(1, 2);
        session.advance(1, false).unwrap();
        session.advance(2, false).unwrap();
        assert!(session.advance(3, false).is_err());
        assert!(session.advance(9, true).is_err());
    }

    #[test]
    fn range_may_end_at_max_seqno() {
        let mut session = session(Seqno::MAX - 1, Seqno::MAX);
        session.advance(Seqno::MAX - 1, false).unwrap();
        session.advance(Seqno::MAX, false).unwrap();
        assert!(session.is_complete());
        assert_eq!(session.next_expected(), None);
        assert!(matches!(
            session.advance(Seqno::MAX, false),
            Err(IstError::OrderingViolation { last: Seqno::MAX, .. })
        ));
        assert!(session.advance(Seqno::MAX, true).is_err());
    }

    #[test]
    fn starts_below_first() {
        let session = session(5, 8);
        assert_eq!(session.last_seen(), 4);
        assert!(!session.is_complete());
        assert_eq!(session.role(), Role::Receiver);
        assert_eq!(session.version(), 10);
        assert_eq!(session.peer(), "peer");
    }

    proptest! {
        #[test]
        fn contiguous_runs_complete(first in 1i64..1_000_000, len in 1i64..64) {
            let last = first + len - 1;
            let mut session = session(first, last);
            for seqno in first..=last {
                prop_assert!(session.advance(seqno, false).is_ok());
            }
            prop_assert!(session.is_complete());
            prop_assert_eq!(session.summary().records, len as u64);
        }

        #[test]
        fn running_ahead_needs_preload(first in 1i64..1000, gap in 2i64..50) {
            let mut session = session(first, first + 100);
            let ahead = first - 1 + gap;
            prop_assert!(session.advance(ahead, false).is_err());
            prop_assert!(session.advance(ahead, true).is_ok());
            prop_assert!(session.advance(ahead + 1, false).is_ok());
        }
    }
}
