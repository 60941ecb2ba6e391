//! Wire format for incremental state transfer (IST).
//!
//! An IST stream is a sequence of frames. Every frame starts with a fixed-size
//! message header whose layout is selected by an explicit protocol version,
//! followed by `len` payload bytes. Handshake payloads are CBOR; ordered
//! records (write-sets and configuration changes) carry the cached buffer
//! verbatim.
//!
//! Two header generations are supported:
//!
//! - **V21** (versions 4..=9): 12 bytes, no checksum, no seqno field.
//! - **V40** (version 10): 16 bytes followed by an 8-byte xxh3 checksum over
//!   the header.
//!
//! Versions below 4 belong to a retired layout and are always rejected. We
//! never infer the layout from buffer sizes: callers pass the version they
//! negotiated and decoding fails if the frame disagrees.
//!
//! # Security
//!
//! All header parsing uses compile-time verified layouts via `zerocopy`. The
//! V40 checksum is verified before any header field is trusted.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod flags;
pub mod frame;
pub mod message;
pub mod message_type;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use flags::MessageFlags;
pub use frame::Frame;
pub use message::{Generation, Message, VER21, VER40};
pub use message_type::{CtrlCode, MessageType};
pub use payloads::{GroupUuid, Handshake, HandshakeResponse, OrderedRecord, Payload, RecordKind};

/// Global sequence number of a write-set or configuration change.
///
/// Valid transfer ranges start at 1; 0 and negative values are never shipped.
pub type Seqno = i64;

/// Default TCP port of the IST receiver.
pub const DEFAULT_PORT: u16 = 4568;
