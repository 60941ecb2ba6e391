//! Incremental state transfer (IST) sessions.
//!
//! A node joining the group (the receiver) asks a donor (the sender) for the
//! write-sets and configuration changes it missed, identified by a contiguous
//! seqno range. The donor streams them from its write-set cache over a
//! dedicated connection; the receiver hands them to the replicator in order.
//!
//! # Architecture
//!
//! Ordering rules live in [`session::TransferSession`], which performs no
//! I/O. [`Sender`] and [`Receiver`] drive it over a [`Transport`] and run as
//! tasks on the embedder's tokio runtime. Production uses tokio TCP; tests
//! substitute a simulated network through the same trait.
//!
//! Cached buffers are shared, not copied: a sender pins its range with a
//! [`cache::CacheRangeLock`] and the receiver stores each record it gets
//! before delivering it.
//!
//! # Components
//!
//! - [`address`]: Receive and bind address resolution
//! - [`cache`]: Write-set cache contract and in-memory cache
//! - [`config`]: Address parameters and session limits
//! - [`event`]: Delivery of received records to the replicator
//! - [`receiver`]: Joiner side
//! - [`sender`]: Donor side
//! - [`sender_map`]: Concurrent senders of one donor
//! - [`session`]: Ordering state
//! - [`transport`]: Connection abstraction
//! - [`wire`]: Frame I/O over a byte stream
//! - [`error`]: Error types

pub mod address;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod receiver;
pub mod sender;
pub mod sender_map;
pub mod session;
pub mod transport;
pub mod wire;

pub use address::{IstAddress, Scheme, determine_bind_address, determine_receive_address};
pub use cache::{CacheEntry, CacheError, EntryKind, MemoryCache, WriteSetCache};
pub use config::{IstConfig, TransferConfig};
pub use error::{ErrorCode, IstError};
pub use event::{EventHandler, ReceivedEntry, StreamStatus};
pub use receiver::{Receiver, ReceiverState};
pub use sender::{Sender, SenderState};
pub use sender_map::SenderMap;
pub use session::{SeqnoRange, TransferSummary};
pub use transport::{TcpTransport, Transport, TransportListener};
