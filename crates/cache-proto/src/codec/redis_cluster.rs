//! Redis Cluster codec (spec §4.C.2): the plain RESP codec plus per-key slot
//! hashing and the one-hop `MOVED`/`ASK` transparent redirect.
//!
//! Slot-to-node mapping and cluster topology discovery are the forwarder's
//! business (spec §1 Non-goals: "the forwarder is a black box"); this codec
//! only computes which slot a key belongs to and tags the `Request` with it
//! so the forwarder can route by slot. Detecting a redirect reply and
//! re-submitting through the forwarder is core behavior and lives here as a
//! free function the handler calls after a batch's barrier has drained,
//! since resubmission needs the forwarder handle the codec itself doesn't
//! have (spec §9: "the core only depends on its [forwarder's] contract").

use bytes::Bytes;
use bytes::BytesMut;

use cache_io::Buffer;

use crate::cache_type::CacheType;
use crate::codec::redis::{decode_into_message, encode_message};
use crate::codec::resp::decode_command;
use crate::codec::Codec;
use crate::error::{ProtoError, ProtoResult};
use crate::merge::MergeType;
use crate::message::Message;

const SLOT_COUNT: u16 = 16384;

/// A transparent one-hop redirect extracted from a backend reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// `-MOVED <slot> <host:port>`: the slot permanently lives elsewhere.
    Moved(String),
    /// `-ASK <slot> <host:port>`: the slot is mid-migration; this one key
    /// lives at `host:port` until the migration completes.
    Ask(String),
}

impl Redirect {
    pub fn addr(&self) -> &str {
        match self {
            Redirect::Moved(addr) | Redirect::Ask(addr) => addr,
        }
    }
}

/// RESP codec for Redis Cluster mode: identical fan-out and merge rules to
/// [`crate::codec::RedisCodec`], with slot tagging on decode.
#[derive(Default)]
pub struct RedisClusterCodec;

impl RedisClusterCodec {
    pub fn new() -> Self {
        RedisClusterCodec
    }
}

impl Codec for RedisClusterCodec {
    fn decode(&mut self, buf: &mut Buffer) -> ProtoResult<Option<Message>> {
        let Some(args) = decode_command(buf)? else {
            return Ok(None);
        };
        if args.is_empty() {
            return Err(ProtoError::BadRequest);
        }
        let mut msg = decode_into_message(args)?;
        for req in msg.requests_mut() {
            if !req.key.is_empty() {
                req.slot = Some(slot_for_key(&req.key));
            }
        }
        Ok(Some(msg))
    }

    fn encode(&mut self, msg: &Message, out: &mut BytesMut) -> ProtoResult<()> {
        encode_message(msg, out)
    }

    fn redirect_target(&self, msg: &Message) -> Option<Redirect> {
        detect_redirect(msg)
    }

    /// `*1\r\n$6\r\nASKING\r\n`, the fixed preamble a node requires before it
    /// will serve the one key an in-progress migration sent it early.
    fn asking_message(&self, addr: &str) -> Option<Message> {
        let mut msg = Message::new(CacheType::RedisCluster);
        msg.set_backend_addr(Some(addr.to_string()));
        let idx = msg.next_req();
        let req = &mut msg.requests_mut()[idx];
        req.cmd = Bytes::from_static(b"ASKING");
        req.body = Bytes::from_static(b"*1\r\n$6\r\nASKING\r\n");
        req.merge_type = MergeType::Single;
        Some(msg)
    }
}

/// Scans a just-completed, non-batch Message's sole reply for a `MOVED`/`ASK`
/// error. Batch Messages (`MGET`/`MSET`/`DEL`/`EXISTS` fan-out) are never
/// redirected: each sub-Request already targeted its own slot, and a
/// same-command cross-slot redirect has no single target to resubmit to.
pub fn detect_redirect(msg: &Message) -> Option<Redirect> {
    if msg.is_batch() {
        return None;
    }
    let reply = msg.requests().first()?.reply.as_ref()?;
    parse_redirect(reply)
}

fn parse_redirect(reply: &[u8]) -> Option<Redirect> {
    if reply.first() != Some(&b'-') {
        return None;
    }
    let line_end = reply.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&reply[1..line_end]).ok()?;
    let mut parts = line.split_whitespace();
    let kind = parts.next()?;
    match kind {
        "MOVED" => {
            let _slot = parts.next()?;
            let addr = parts.next()?;
            Some(Redirect::Moved(addr.to_string()))
        }
        "ASK" => {
            let _slot = parts.next()?;
            let addr = parts.next()?;
            Some(Redirect::Ask(addr.to_string()))
        }
        _ => None,
    }
}

/// CRC16/XMODEM (poly `0x1021`, init `0`) over `key`'s hash-tag substring —
/// the bytes between the first `{` and the first following non-empty `}` —
/// or the whole key if there is no hash tag, modulo 16384. This is the exact
/// algorithm `redis-cluster` itself uses to assign keys to slots.
pub fn slot_for_key(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT
}

fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(rel_close) = key[open + 1..].iter().position(|&b| b == b'}') {
            if rel_close > 0 {
                return &key[open + 1..open + 1 + rel_close];
            }
        }
    }
    key
}

fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
