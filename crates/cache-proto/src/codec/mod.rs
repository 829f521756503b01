mod memcache_binary;
mod memcache_text;
mod redis;
mod redis_cluster;
pub mod resp;

pub use memcache_binary::MemcacheBinaryCodec;
pub use memcache_text::MemcacheTextCodec;
pub use redis::RedisCodec;
pub use redis_cluster::{RedisClusterCodec, Redirect};

use bytes::BytesMut;
use cache_io::Buffer;

use crate::error::{ProtoError, ProtoResult};
use crate::message::Message;

/// Per-protocol decode/encode.
///
/// A codec never touches the socket or flushes anything: `cache-io` owns
/// reading bytes in and writing them out, a codec only ever works with
/// buffers already resident in memory. That split is why `flush` has no
/// home on this trait (see DESIGN.md).
pub trait Codec: Send {
    /// Attempts to decode one Message — a single command, or a complete
    /// fan-out batch — from the front of `buf`. Returns `Ok(None)` if `buf`
    /// doesn't yet hold a full frame; the handler will read more and retry.
    fn decode(&mut self, buf: &mut Buffer) -> ProtoResult<Option<Message>>;

    /// Appends the client-visible reply for `msg` to `out`. Only called
    /// once every sub-Request's `reply` slot has been filled in, i.e. after
    /// `msg.barrier().wait()` has resolved.
    fn encode(&mut self, msg: &Message, out: &mut BytesMut) -> ProtoResult<()>;

    /// Inspects a just-completed Message for a protocol-specific one-hop
    /// transparent redirect (Redis Cluster `MOVED`/`ASK`, spec §4.C.2) and
    /// returns the redirect (and its target address), if any. The handler
    /// calls this once per Message after the barrier drains and before
    /// encoding; every other codec keeps the default of never redirecting.
    fn redirect_target(&self, _msg: &Message) -> Option<Redirect> {
        None
    }

    /// Builds the preamble Message an `Ask` redirect must send to `addr`
    /// before resubmitting the original command (Redis Cluster `ASKING`,
    /// spec §6). Only `RedisClusterCodec` overrides this; every other
    /// codec's redirects never need a preamble.
    fn asking_message(&self, _addr: &str) -> Option<Message> {
        None
    }

    /// Classifies a decode error as resynchronizable (spec §7): if this
    /// returns `Some(reply)`, the handler writes `reply` to the client and
    /// keeps the connection open instead of closing it. Memcache text is
    /// the only protocol that can resync (by skipping past the bad line);
    /// RESP and binary framing can't tell where the next command starts
    /// after a malformed one, so they keep the default of never resyncing.
    fn resync_reply(&self, _err: &ProtoError) -> Option<&'static [u8]> {
        None
    }
}
