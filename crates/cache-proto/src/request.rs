use bytes::Bytes;

use crate::cache_type::CacheType;
use crate::error::ProtoError;
use crate::merge::MergeType;

/// A single command that will be sent to exactly one backend.
///
/// `body` is the exact wire frame the forwarder should deliver upstream.
/// `reply` is the "reply slot" from spec §3: the forwarder fills it in with
/// the backend's raw response frame, byte-for-byte, and the owning codec's
/// `encode` is the only code that interprets those bytes (by prefix/length,
/// never by re-parsing into a tree) — see DESIGN.md for why this crate
/// represents the reply slot as raw bytes rather than a parsed node.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub cache_type: CacheType,
    /// Command name/opcode, e.g. `b"GET"` or a memcache binary opcode byte.
    pub cmd: Bytes,
    /// Key bytes, borrowed (cheaply, via `Bytes`) from the decode buffer.
    pub key: Bytes,
    /// The frame to send to the backend.
    pub body: Bytes,
    /// Filled in by the forwarder once the backend has replied.
    pub reply: Option<Bytes>,
    pub merge_type: MergeType,
    /// `false` for commands the proxy recognizes but refuses to forward.
    pub supported: bool,
    /// Set by the decoder (unsupported) or forwarder (delivery failure).
    pub error: Option<ProtoError>,
    /// Memcache binary: opaque value, round-tripped unchanged.
    pub opaque: u32,
    /// Memcache binary: whether this was a "quiet" opcode before normalization.
    pub quiet: bool,
    /// Redis Cluster: the CRC16 hash slot (mod 16384) this key maps to, for
    /// the forwarder to route by (slot-to-node mapping is its business, not
    /// the core's — spec §1). `None` for keyless commands and non-cluster
    /// protocols.
    pub slot: Option<u16>,
}

impl Request {
    pub fn new(cache_type: CacheType) -> Self {
        Request {
            cache_type,
            supported: true,
            ..Default::default()
        }
    }

    /// Resets all mutable fields so the slot can be reused by the pool,
    /// keeping allocations (the `Bytes`/`Option` fields are cheap to drop).
    pub fn clear(&mut self) {
        self.cmd = Bytes::new();
        self.key = Bytes::new();
        self.body = Bytes::new();
        self.reply = None;
        self.merge_type = MergeType::Single;
        self.supported = true;
        self.error = None;
        self.opaque = 0;
        self.quiet = false;
        self.slot = None;
    }

    pub fn is_error_reply(&self) -> bool {
        matches!(&self.reply, Some(b) if b.first() == Some(&b'-'))
    }
}
