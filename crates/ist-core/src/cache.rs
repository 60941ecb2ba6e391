//! Write-set cache contract.
//!
//! The cache owns every write-set and configuration-change buffer. IST only
//! borrows them: a sender pins a seqno range while it ships it, a receiver
//! stores each record it gets and drops its own reference once the record
//! has been handed to the event handler. Both go through guards so the
//! release happens on every exit path.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use bytes::Bytes;
use ist_proto::Seqno;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

/// Handle of a buffer allocated in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    /// Raw handle value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// What a cached buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Serialized write-set
    WriteSet,
    /// Serialized configuration change
    ConfigurationChange,
}

/// A cached buffer at one seqno.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Global seqno
    pub seqno: Seqno,
    /// Buffer kind
    pub kind: EntryKind,
    /// Write-set that keeps its place in the order but has no effect
    pub skip: bool,
    /// Buffer contents, shared with the cache
    pub payload: Bytes,
}

/// Cache contract violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// No buffer is assigned this seqno
    #[error("seqno {0} not in cache")]
    Missing(Seqno),
    /// Part of a range is no longer cached
    #[error("range [{first}, {last}] not fully cached")]
    RangeUnavailable {
        /// First seqno requested
        first: Seqno,
        /// Last seqno requested
        last: Seqno,
    },
    /// Buffer handle unknown or already released
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    /// Seqno or buffer already has an assignment
    #[error("seqno {0} already assigned")]
    AlreadyAssigned(Seqno),
}

/// Operations IST needs from the write-set cache.
///
/// Implementations are shared between many concurrent sessions and the
/// replicator's own write path.
pub trait WriteSetCache: Send + Sync {
    /// Store a new, not yet ordered buffer. The caller holds one reference.
    fn allocate(&self, payload: Bytes) -> Result<BufferId, CacheError>;

    /// Give an allocated buffer its place in the global order.
    fn assign_sequence(
        &self,
        buffer: BufferId,
        seqno: Seqno,
        kind: EntryKind,
        in_order: bool,
    ) -> Result<(), CacheError>;

    /// Drop the caller's reference to a buffer.
    fn free(&self, buffer: BufferId);

    /// Look up the buffer assigned `seqno`.
    fn fetch(&self, seqno: Seqno) -> Result<CacheEntry, CacheError>;

    /// Pin `[first, last]` against eviction. Fails if any seqno is gone.
    fn lock_range(&self, first: Seqno, last: Seqno) -> Result<(), CacheError>;

    /// Undo one [`Self::lock_range`] of the same range.
    fn release_range(&self, first: Seqno, last: Seqno);

    /// Fetch `[first, last]` in ascending order.
    fn fetch_batch(&self, first: Seqno, last: Seqno) -> Result<Vec<CacheEntry>, CacheError> {
        (first..=last).map(|seqno| self.fetch(seqno)).collect()
    }
}

/// Pins a seqno range for as long as it lives.
#[derive(Debug)]
pub struct CacheRangeLock {
    cache: Arc<dyn WriteSetCache>,
    first: Seqno,
    last: Seqno,
}

impl CacheRangeLock {
    /// Lock `[first, last]`. Nothing is held if this fails.
    pub fn acquire(
        cache: Arc<dyn WriteSetCache>,
        first: Seqno,
        last: Seqno,
    ) -> Result<Self, CacheError> {
        cache.lock_range(first, last)?;
        Ok(Self { cache, first, last })
    }

    /// Locked range.
    pub fn range(&self) -> (Seqno, Seqno) {
        (self.first, self.last)
    }
}

impl Drop for CacheRangeLock {
    fn drop(&mut self) {
        self.cache.release_range(self.first, self.last);
    }
}

impl std::fmt::Debug for dyn WriteSetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WriteSetCache")
    }
}

/// Holds one reference to an allocated buffer and frees it on drop.
pub struct BufferGuard<'a> {
    cache: &'a dyn WriteSetCache,
    id: BufferId,
}

impl<'a> BufferGuard<'a> {
    /// Allocate `payload` and take its reference.
    pub fn allocate(cache: &'a dyn WriteSetCache, payload: Bytes) -> Result<Self, CacheError> {
        let id = cache.allocate(payload)?;
        Ok(Self { cache, id })
    }

    /// Buffer handle.
    pub fn id(&self) -> BufferId {
        self.id
    }
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        self.cache.free(self.id);
    }
}

/// Lock/release call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Successful `lock_range` calls
    pub locks: u64,
    /// `release_range` calls that matched a lock
    pub releases: u64,
}

#[derive(Debug)]
struct Buffer {
    payload: Bytes,
    seqno: Option<Seqno>,
    kind: EntryKind,
    skip: bool,
    in_order: bool,
    refs: usize,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    buffers: HashMap<BufferId, Buffer>,
    ordered: BTreeMap<Seqno, BufferId>,
    locks: Vec<(Seqno, Seqno)>,
    stats: CacheStats,
}

impl Inner {
    fn is_locked(&self, seqno: Seqno) -> bool {
        self.locks.iter().any(|&(first, last)| first <= seqno && seqno <= last)
    }
}

/// In-process [`WriteSetCache`].
///
/// Ordered buffers stay until [`MemoryCache::purge_up_to`] evicts them;
/// buffers freed before being ordered are dropped immediately.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate, order and release a buffer in one step, as the replicator's
    /// write path does once an event is committed.
    pub fn insert(&self, seqno: Seqno, kind: EntryKind, payload: Bytes) -> Result<(), CacheError> {
        let id = self.allocate(payload)?;
        let assigned = self.assign_sequence(id, seqno, kind, true);
        self.free(id);
        assigned
    }

    /// Mark the write-set at `seqno` as a skip placeholder.
    pub fn mark_skip(&self, seqno: Seqno) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        let id = *inner.ordered.get(&seqno).ok_or(CacheError::Missing(seqno))?;
        let buffer = inner.buffers.get_mut(&id).ok_or(CacheError::UnknownBuffer(id))?;
        buffer.skip = true;
        Ok(())
    }

    /// Evict ordered buffers with seqno `<= upto`, oldest first.
    ///
    /// Stops at the first locked or still referenced seqno. Returns the
    /// number of buffers evicted.
    pub fn purge_up_to(&self, upto: Seqno) -> usize {
        let mut inner = self.inner.lock();
        let candidates: Vec<(Seqno, BufferId)> =
            inner.ordered.range(..=upto).map(|(&s, &id)| (s, id)).collect();

        let mut purged = 0;
        for (seqno, id) in candidates {
            let referenced = inner.buffers.get(&id).is_some_and(|b| b.refs > 0);
            if inner.is_locked(seqno) || referenced {
                break;
            }
            inner.ordered.remove(&seqno);
            inner.buffers.remove(&id);
            purged += 1;
        }
        purged
    }

    /// Number of ordered buffers.
    pub fn len(&self) -> usize {
        self.inner.lock().ordered.len()
    }

    /// Whether no ordered buffer is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest and highest cached seqno.
    pub fn seqno_bounds(&self) -> Option<(Seqno, Seqno)> {
        let inner = self.inner.lock();
        let first = *inner.ordered.keys().next()?;
        let last = *inner.ordered.keys().next_back()?;
        Some((first, last))
    }

    /// Ranges currently locked.
    pub fn locked_ranges(&self) -> Vec<(Seqno, Seqno)> {
        self.inner.lock().locks.clone()
    }

    /// Lock/release counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Whether the buffer at `seqno` was ordered in sequence.
    pub fn is_in_order(&self, seqno: Seqno) -> Option<bool> {
        let inner = self.inner.lock();
        let id = inner.ordered.get(&seqno)?;
        inner.buffers.get(id).map(|b| b.in_order)
    }

    /// Live buffers, ordered or not.
    pub fn buffer_count(&self) -> usize {
        self.inner.lock().buffers.len()
    }
}

impl WriteSetCache for MemoryCache {
    fn allocate(&self, payload: Bytes) -> Result<BufferId, CacheError> {
        let mut inner = self.inner.lock();
        let id = BufferId(inner.next_id);
        inner.next_id += 1;
        inner.buffers.insert(
            id,
            Buffer {
                payload,
                seqno: None,
                kind: EntryKind::WriteSet,
                skip: false,
                in_order: false,
                refs: 1,
            },
        );
        Ok(id)
    }

    fn assign_sequence(
        &self,
        buffer: BufferId,
        seqno: Seqno,
        kind: EntryKind,
        in_order: bool,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        if inner.ordered.contains_key(&seqno) {
            return Err(CacheError::AlreadyAssigned(seqno));
        }
        let entry = inner.buffers.get_mut(&buffer).ok_or(CacheError::UnknownBuffer(buffer))?;
        if let Some(existing) = entry.seqno {
            return Err(CacheError::AlreadyAssigned(existing));
        }
        entry.seqno = Some(seqno);
        entry.kind = kind;
        entry.in_order = in_order;
        inner.ordered.insert(seqno, buffer);
        Ok(())
    }

    fn free(&self, buffer: BufferId) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.buffers.get_mut(&buffer) else {
            warn!(buffer = buffer.get(), "free of unknown buffer");
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 && entry.seqno.is_none() {
            inner.buffers.remove(&buffer);
        }
    }

    fn fetch(&self, seqno: Seqno) -> Result<CacheEntry, CacheError> {
        let inner = self.inner.lock();
        let id = inner.ordered.get(&seqno).ok_or(CacheError::Missing(seqno))?;
        let buffer = inner.buffers.get(id).ok_or(CacheError::UnknownBuffer(*id))?;
        Ok(CacheEntry {
            seqno,
            kind: buffer.kind,
            skip: buffer.skip,
            payload: buffer.payload.clone(),
        })
    }

    fn lock_range(&self, first: Seqno, last: Seqno) -> Result<(), CacheError> {
        if last < first {
            return Err(CacheError::RangeUnavailable { first, last });
        }
        let mut inner = self.inner.lock();
        let cached = inner.ordered.range(first..=last).count() as u64;
        if last.abs_diff(first).checked_add(1) != Some(cached) {
            return Err(CacheError::RangeUnavailable { first, last });
        }
        inner.locks.push((first, last));
        inner.stats.locks += 1;
        Ok(())
    }

    fn release_range(&self, first: Seqno, last: Seqno) {
        let mut inner = self.inner.lock();
        match inner.locks.iter().position(|&range| range == (first, last)) {
            Some(index) => {
                inner.locks.swap_remove(index);
                inner.stats.releases += 1;
            },
            None => warn!(first, last, "release of range that is not locked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(seqnos: std::ops::RangeInclusive<Seqno>) -> Arc<MemoryCache> {
        let cache = Arc::new(MemoryCache::new());
        for seqno in seqnos {
            cache.insert(seqno, EntryKind::WriteSet, Bytes::from(seqno.to_string())).unwrap();
        }
        cache
    }

    #[test]
    fn fetch_returns_assigned_buffer() {
        let cache = cache_with(1..=3);
        let entry = cache.fetch(2).unwrap();
        assert_eq!(entry.seqno, 2);
        assert_eq!(entry.kind, EntryKind::WriteSet);
        assert_eq!(&entry.payload[..], b"2");
        assert_eq!(cache.fetch(4), Err(CacheError::Missing(4)));
    }

    #[test]
    fn fetch_batch_is_ordered() {
        let cache = cache_with(1..=5);
        let seqnos: Vec<Seqno> = cache.fetch_batch(2, 4).unwrap().iter().map(|e| e.seqno).collect();
        assert_eq!(seqnos, vec![2, 3, 4]);
    }

    #[test]
    fn range_lock_guard_releases_on_drop() {
        let cache = cache_with(1..=10);
        {
            let lock = CacheRangeLock::acquire(cache.clone(), 3, 7).unwrap();
            assert_eq!(lock.range(), (3, 7));
            assert_eq!(cache.locked_ranges(), vec![(3, 7)]);
        }
        assert!(cache.locked_ranges().is_empty());
        assert_eq!(cache.stats(), CacheStats { locks: 1, releases: 1 });
    }

    #[test]
    fn lock_fails_for_partially_evicted_range() {
        let cache = cache_with(1..=10);
        assert_eq!(cache.purge_up_to(4), 4);
        assert_eq!(
            CacheRangeLock::acquire(cache.clone(), 3, 8).unwrap_err(),
            CacheError::RangeUnavailable { first: 3, last: 8 }
        );
        assert_eq!(cache.stats().locks, 0);
    }

    #[test]
    fn purge_stops_at_locked_seqno() {
        let cache = cache_with(1..=10);
        let _lock = CacheRangeLock::acquire(cache.clone(), 4, 6).unwrap();
        assert_eq!(cache.purge_up_to(10), 3);
        assert_eq!(cache.seqno_bounds(), Some((4, 10)));
    }

    #[test]
    fn unordered_buffer_is_dropped_on_free() {
        let cache = MemoryCache::new();
        {
            let guard = BufferGuard::allocate(&cache, Bytes::from_static(b"x")).unwrap();
            assert_eq!(cache.buffer_count(), 1);
            assert!(guard.id().get() < u64::MAX);
        }
        assert_eq!(cache.buffer_count(), 0);
    }

    #[test]
    fn ordered_buffer_outlives_guard() {
        let cache = MemoryCache::new();
        {
            let guard = BufferGuard::allocate(&cache, Bytes::from_static(b"cc")).unwrap();
            cache.assign_sequence(guard.id(), 9, EntryKind::ConfigurationChange, false).unwrap();
        }
        let entry = cache.fetch(9).unwrap();
        assert_eq!(entry.kind, EntryKind::ConfigurationChange);
        assert_eq!(cache.is_in_order(9), Some(false));
    }

    #[test]
    fn seqno_cannot_be_assigned_twice() {
        let cache = cache_with(1..=1);
        let id = cache.allocate(Bytes::new()).unwrap();
        assert_eq!(
            cache.assign_sequence(id, 1, EntryKind::WriteSet, true),
            Err(CacheError::AlreadyAssigned(1))
        );
    }

    #[test]
    fn skip_mark_is_visible_on_fetch() {
        let cache = cache_with(1..=2);
        cache.mark_skip(2).unwrap();
        assert!(cache.fetch(2).unwrap().skip);
        assert!(!cache.fetch(1).unwrap().skip);
    }
}
