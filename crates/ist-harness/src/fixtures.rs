//! Shared test fixtures.

use std::sync::{Arc, Once};

use bytes::Bytes;
use ist_core::{CacheError, EntryKind, MemoryCache};
use ist_proto::Seqno;
use tracing_subscriber::EnvFilter;

/// Kind of the cached event at `seqno`: every third one is a configuration
/// change.
pub fn kind_of(seqno: Seqno) -> EntryKind {
    if seqno % 3 == 0 { EntryKind::ConfigurationChange } else { EntryKind::WriteSet }
}

/// Payload of the cached event at `seqno`.
pub fn payload_of(seqno: Seqno) -> Bytes {
    Bytes::from(format!("event-{seqno}"))
}

/// Cache holding `[first, last]`, laid out by [`kind_of`] and
/// [`payload_of`].
pub fn populated_cache(first: Seqno, last: Seqno) -> Result<Arc<MemoryCache>, CacheError> {
    let cache = Arc::new(MemoryCache::new());
    for seqno in first..=last {
        cache.insert(seqno, kind_of(seqno), payload_of(seqno))?;
    }
    Ok(cache)
}

/// Send `tracing` output to the test writer, filtered by `RUST_LOG`.
/// Safe to call from every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
