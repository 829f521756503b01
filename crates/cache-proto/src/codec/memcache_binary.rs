use bytes::{Bytes, BytesMut};

use cache_io::Buffer;

use crate::cache_type::CacheType;
use crate::codec::Codec;
use crate::error::{ProtoError, ProtoResult};
use crate::message::Message;
use crate::request::Request;

const HEADER_LEN: usize = 24;
const REQUEST_MAGIC: u8 = 0x80;
const RESPONSE_MAGIC: u8 = 0x81;

const OP_GET: u8 = 0x00;
const OP_SET: u8 = 0x01;
const OP_ADD: u8 = 0x02;
const OP_REPLACE: u8 = 0x03;
const OP_DELETE: u8 = 0x04;
const OP_INCREMENT: u8 = 0x05;
const OP_DECREMENT: u8 = 0x06;
const OP_QUIT: u8 = 0x07;
const OP_FLUSH: u8 = 0x08;
const OP_GETQ: u8 = 0x09;
const OP_NOOP: u8 = 0x0a;
const OP_VERSION: u8 = 0x0b;
const OP_GETK: u8 = 0x0c;
const OP_GETKQ: u8 = 0x0d;
const OP_APPEND: u8 = 0x0e;
const OP_PREPEND: u8 = 0x0f;
const OP_SETQ: u8 = 0x11;
const OP_ADDQ: u8 = 0x12;
const OP_REPLACEQ: u8 = 0x13;
const OP_DELETEQ: u8 = 0x14;
const OP_INCREMENTQ: u8 = 0x15;
const OP_DECREMENTQ: u8 = 0x16;
const OP_QUITQ: u8 = 0x17;
const OP_FLUSHQ: u8 = 0x18;
const OP_APPENDQ: u8 = 0x19;
const OP_PREPENDQ: u8 = 0x1a;
const OP_GAT: u8 = 0x1d;
const OP_GATQ: u8 = 0x1e;

const STATUS_NO_ERROR: u16 = 0x0000;
const STATUS_KEY_NOT_FOUND: u16 = 0x0001;

const VERSION_STRING: &[u8] = b"cache-proxy 0.1.0";

/// Maps a "quiet" opcode to its non-quiet equivalent (spec §4.A/§4.C's
/// `qReplaceNoQTypes` table). Forwarding always uses the plain opcode: the
/// proxy itself decides suppression on the way back out, rather than
/// relying on the backend's own quiet-batch bookkeeping.
fn quiet_to_plain(opcode: u8) -> Option<u8> {
    match opcode {
        OP_GETQ => Some(OP_GETK),
        OP_GETKQ => Some(OP_GETK),
        OP_SETQ => Some(OP_SET),
        OP_ADDQ => Some(OP_ADD),
        OP_REPLACEQ => Some(OP_REPLACE),
        OP_DELETEQ => Some(OP_DELETE),
        OP_INCREMENTQ => Some(OP_INCREMENT),
        OP_DECREMENTQ => Some(OP_DECREMENT),
        OP_QUITQ => Some(OP_QUIT),
        OP_FLUSHQ => Some(OP_FLUSH),
        OP_APPENDQ => Some(OP_APPEND),
        OP_PREPENDQ => Some(OP_PREPEND),
        OP_GATQ => Some(OP_GAT),
        _ => None,
    }
}

fn is_get_family(opcode: u8) -> bool {
    matches!(opcode, OP_GET | OP_GETQ | OP_GETK | OP_GETKQ | OP_GAT | OP_GATQ)
}

/// Memcache binary protocol (2008 spec) codec (spec §4.A/§4.C).
///
/// A client pipelines a run of quiet opcodes terminated by a non-quiet one
/// (conventionally `Noop`); that whole run decodes into a single Message
/// with one sub-Request per wire frame. Because a terminator may arrive in
/// a later read than the quiet frames before it, partial batches are
/// carried across `decode` calls in `pending`.
#[derive(Default)]
pub struct MemcacheBinaryCodec {
    pending: Option<Message>,
}

impl MemcacheBinaryCodec {
    pub fn new() -> Self {
        MemcacheBinaryCodec { pending: None }
    }
}

impl Codec for MemcacheBinaryCodec {
    fn decode(&mut self, buf: &mut Buffer) -> ProtoResult<Option<Message>> {
        let mut msg = self.pending.take().unwrap_or_else(|| Message::new(CacheType::MemcacheBinary));
        loop {
            let total = buf.len();
            if total < HEADER_LEN {
                self.pending = Some(msg);
                return Ok(None);
            }
            let header = buf.peek(HEADER_LEN).expect("checked above");
            if header[0] != REQUEST_MAGIC {
                return Err(ProtoError::BadRequest);
            }
            let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
            let extras_len = header[4] as usize;
            let total_body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
            let frame_len = HEADER_LEN + total_body_len;
            if total < frame_len {
                self.pending = Some(msg);
                return Ok(None);
            }

            let frame = buf.take(frame_len).expect("frame length already validated above");
            let opcode = frame[1];
            let opaque = u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]);
            let (plain_opcode, quiet) = match quiet_to_plain(opcode) {
                Some(plain) => (plain, true),
                None => (opcode, false),
            };

            let req = build_request(&frame, plain_opcode, opcode, quiet, opaque, key_len, extras_len)?;
            msg.with_request(req);
            if !quiet {
                return Ok(Some(msg));
            }
        }
    }

    fn encode(&mut self, msg: &Message, out: &mut BytesMut) -> ProtoResult<()> {
        for req in msg.requests() {
            let original_opcode = req.cmd.first().copied().unwrap_or(0);
            let Some(reply) = &req.reply else {
                out.extend_from_slice(&local_response(req.opaque, original_opcode, 0x0084, b"internal error"));
                continue;
            };
            if reply.len() < HEADER_LEN {
                return Err(ProtoError::BadRequest);
            }
            let status = u16::from_be_bytes([reply[6], reply[7]]);
            let suppress = req.quiet
                && if is_get_family(original_opcode) {
                    status == STATUS_KEY_NOT_FOUND
                } else {
                    status == STATUS_NO_ERROR
                };
            if suppress {
                continue;
            }
            let mut patched = BytesMut::from(reply.as_ref());
            patched[1] = original_opcode;
            patched[12..16].copy_from_slice(&req.opaque.to_be_bytes());
            out.extend_from_slice(&patched);
        }
        Ok(())
    }
}

fn build_request(
    frame: &Bytes,
    plain_opcode: u8,
    original_opcode: u8,
    quiet: bool,
    opaque: u32,
    key_len: usize,
    extras_len: usize,
) -> ProtoResult<Request> {
    let key_start = HEADER_LEN + extras_len;
    if key_start + key_len > frame.len() {
        return Err(ProtoError::BadRequest);
    }

    let mut req = Request::new(CacheType::MemcacheBinary);
    // The client-facing reply opcode always reflects the normalized (plain)
    // opcode, not the raw quiet one on the wire (spec §8: a GetQ batch hit
    // reports back as GetK) — `encode` patches every reply's opcode byte
    // from this field.
    req.cmd = Bytes::copy_from_slice(&[plain_opcode]);
    req.key = frame.slice(key_start..key_start + key_len);
    req.opaque = opaque;
    req.quiet = quiet;

    match original_opcode {
        OP_QUIT | OP_QUITQ => {
            req.supported = false;
            req.error = Some(ProtoError::Quit);
            req.reply = Some(local_response(opaque, plain_opcode, STATUS_NO_ERROR, &[]));
        }
        OP_NOOP => {
            req.supported = false;
            req.reply = Some(local_response(opaque, plain_opcode, STATUS_NO_ERROR, &[]));
        }
        OP_VERSION => {
            req.supported = false;
            req.reply = Some(local_response(opaque, plain_opcode, STATUS_NO_ERROR, VERSION_STRING));
        }
        _ => {
            let mut patched = BytesMut::from(frame.as_ref());
            patched[1] = plain_opcode;
            req.body = patched.freeze();
        }
    }
    Ok(req)
}

fn local_response(opaque: u32, opcode: u8, status: u16, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&[RESPONSE_MAGIC, opcode]);
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&[0u8, 0u8]);
    out.extend_from_slice(&status.to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&opaque.to_be_bytes());
    out.extend_from_slice(&0u64.to_be_bytes());
    out.extend_from_slice(body);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_frame(opcode: u8, opaque: u32, key: &[u8], extras: &[u8], value: &[u8]) -> Vec<u8> {
        let total_body = extras.len() + key.len() + value.len();
        let mut out = Vec::with_capacity(HEADER_LEN + total_body);
        out.push(REQUEST_MAGIC);
        out.push(opcode);
        out.extend_from_slice(&(key.len() as u16).to_be_bytes());
        out.push(extras.len() as u8);
        out.push(0);
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(total_body as u32).to_be_bytes());
        out.extend_from_slice(&opaque.to_be_bytes());
        out.extend_from_slice(&0u64.to_be_bytes());
        out.extend_from_slice(extras);
        out.extend_from_slice(key);
        out.extend_from_slice(value);
        out
    }

    fn buf_with(data: &[u8]) -> Buffer {
        let mut b = Buffer::with_default_max();
        b.extend(data).unwrap();
        b
    }

    fn fake_response(opaque: u32, opcode: u8, status: u16, value: &[u8]) -> Bytes {
        let mut out = BytesMut::new();
        out.extend_from_slice(&[RESPONSE_MAGIC, opcode]);
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&[0u8, 0u8]);
        out.extend_from_slice(&status.to_be_bytes());
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(&opaque.to_be_bytes());
        out.extend_from_slice(&0u64.to_be_bytes());
        out.extend_from_slice(value);
        out.freeze()
    }

    #[test]
    fn decodes_getq_x3_then_noop_as_one_batch() {
        let mut codec = MemcacheBinaryCodec::new();
        let mut wire = Vec::new();
        wire.extend(request_frame(OP_GETQ, 1, b"a", &[], &[]));
        wire.extend(request_frame(OP_GETQ, 2, b"b", &[], &[]));
        wire.extend(request_frame(OP_GETQ, 3, b"c", &[], &[]));
        wire.extend(request_frame(OP_NOOP, 4, &[], &[], &[]));
        let mut buf = buf_with(&wire);

        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 4);
        assert!(msg.requests()[..3].iter().all(|r| r.quiet));
        assert!(!msg.requests()[3].quiet);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_batch_is_carried_across_decode_calls() {
        let mut codec = MemcacheBinaryCodec::new();
        let frame1 = request_frame(OP_GETQ, 1, b"a", &[], &[]);
        let mut buf = buf_with(&frame1);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let frame2 = request_frame(OP_NOOP, 2, &[], &[], &[]);
        buf.extend(&frame2).unwrap();
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 2);
    }

    #[test]
    fn needs_more_at_every_byte_boundary() {
        let full = request_frame(OP_SET, 7, b"foo", &[0, 0, 0, 0, 0, 0, 0, 0], b"bar");
        for cut in 0..full.len() {
            let mut codec = MemcacheBinaryCodec::new();
            let mut buf = buf_with(&full[..cut]);
            assert!(codec.decode(&mut buf).unwrap().is_none(), "cut at {cut}");
        }
    }

    #[test]
    fn set_is_forwarded_with_normalized_opcode() {
        let mut codec = MemcacheBinaryCodec::new();
        let mut buf = buf_with(&request_frame(OP_SET, 7, b"foo", &[0, 0, 0, 0, 0, 0, 0, 0], b"bar"));
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 1);
        let req = &msg.requests()[0];
        assert!(req.supported);
        assert_eq!(req.body[1], OP_SET);
        assert!(!req.quiet);
    }

    #[test]
    fn setq_normalizes_to_set_and_suppresses_success() {
        let mut codec = MemcacheBinaryCodec::new();
        let mut buf = buf_with(&request_frame(OP_SETQ, 9, b"foo", &[0, 0, 0, 0, 0, 0, 0, 0], b"bar"));
        let mut msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests()[0].body[1], OP_SET);

        msg.requests_mut()[0].reply = Some(fake_response(9, OP_SET, STATUS_NO_ERROR, &[]));
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn getq_miss_is_suppressed_but_hit_is_not() {
        let mut codec = MemcacheBinaryCodec::new();
        let mut wire = Vec::new();
        wire.extend(request_frame(OP_GETQ, 1, b"miss", &[], &[]));
        wire.extend(request_frame(OP_GETQ, 2, b"hit", &[], &[]));
        wire.extend(request_frame(OP_NOOP, 3, &[], &[], &[]));
        let mut buf = buf_with(&wire);
        let mut msg = codec.decode(&mut buf).unwrap().unwrap();

        msg.requests_mut()[0].reply = Some(fake_response(1, OP_GETK, STATUS_KEY_NOT_FOUND, &[]));
        msg.requests_mut()[1].reply = Some(fake_response(2, OP_GETK, STATUS_NO_ERROR, b"val"));

        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        // miss produced nothing, hit produced its patched GetK response, noop always responds.
        assert_eq!(out[1], OP_GETK);
        assert!(out.ends_with(&[0u8; 0]) || out.len() > 0);
        let hit_opaque = u32::from_be_bytes([out[12], out[13], out[14], out[15]]);
        assert_eq!(hit_opaque, 2);
    }

    #[test]
    fn quit_closes_with_a_reply_quitq_closes_silently() {
        let mut codec = MemcacheBinaryCodec::new();
        let mut buf = buf_with(&request_frame(OP_QUIT, 5, &[], &[], &[]));
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(msg.requests()[0].error, Some(ProtoError::Quit)));
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert!(!out.is_empty());

        let mut codec2 = MemcacheBinaryCodec::new();
        let mut buf2 = buf_with(&request_frame(OP_QUITQ, 6, &[], &[], &[]));
        let msg2 = codec2.decode(&mut buf2).unwrap().unwrap();
        let mut out2 = BytesMut::new();
        codec2.encode(&msg2, &mut out2).unwrap();
        assert!(out2.is_empty());
    }
}
