use bytes::{Bytes, BytesMut};

use cache_io::Buffer;

use crate::cache_type::CacheType;
use crate::codec::Codec;
use crate::error::{ProtoError, ProtoResult};
use crate::merge::MergeType;
use crate::message::Message;

const STORAGE_COMMANDS: &[&[u8]] = &[b"set", b"add", b"replace", b"append", b"prepend", b"cas"];

/// Memcache text protocol (MCP 1.4) codec (spec §4.A/§4.C).
///
/// `get`/`gets` fan out into one sub-Request per key; everything else is a
/// single sub-Request. `noreply` is honored at the client boundary only —
/// the proxy always waits for a real backend reply so every sub-Request
/// still gets exactly one `Done()`.
#[derive(Default)]
pub struct MemcacheTextCodec;

impl MemcacheTextCodec {
    pub fn new() -> Self {
        MemcacheTextCodec
    }
}

fn split_ws(line: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < line.len() {
        while i < line.len() && line[i] == b' ' {
            i += 1;
        }
        if i >= line.len() {
            break;
        }
        let start = i;
        while i < line.len() && line[i] != b' ' {
            i += 1;
        }
        out.push((start, i - start));
    }
    out
}

fn token<'a>(data: &'a [u8], span: (usize, usize)) -> &'a [u8] {
    &data[span.0..span.0 + span.1]
}

impl Codec for MemcacheTextCodec {
    fn decode(&mut self, buf: &mut Buffer) -> ProtoResult<Option<Message>> {
        let total = buf.len();
        if total == 0 {
            return Ok(None);
        }
        let data = buf.peek(total).expect("len bytes available");
        let Some(nl) = data.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let mut line_len = nl;
        if line_len > 0 && data[line_len - 1] == b'\r' {
            line_len -= 1;
        }
        let tokens = split_ws(&data[..line_len]);
        if tokens.is_empty() {
            buf.take(nl + 1);
            return Err(ProtoError::BadRequest);
        }

        let verb_lower = token(data, tokens[0]).to_ascii_lowercase();
        if STORAGE_COMMANDS.contains(&verb_lower.as_slice()) {
            let Some(&bytes_span) = tokens.get(4) else {
                buf.take(nl + 1);
                return Err(ProtoError::BadRequest);
            };
            let Some(bytes_len) = std::str::from_utf8(token(data, bytes_span)).ok().and_then(|s| s.parse::<usize>().ok())
            else {
                buf.take(nl + 1);
                return Err(ProtoError::BadLength);
            };
            let needed = nl + 1 + bytes_len + 2;
            if data.len() < needed {
                return Ok(None);
            }
            let frame = buf.take(needed).expect("frame length already validated above");
            Ok(Some(decode_storage(&frame, &tokens, &verb_lower, nl + 1, bytes_len)?))
        } else {
            let frame = buf.take(nl + 1).expect("frame length already validated above");
            Ok(Some(decode_simple(&frame, &tokens, &verb_lower)?))
        }
    }

    fn encode(&mut self, msg: &Message, out: &mut BytesMut) -> ProtoResult<()> {
        let Some(first) = msg.requests().first() else {
            return Ok(());
        };
        match first.merge_type {
            MergeType::Single => {
                if first.quiet {
                    return Ok(());
                }
                match &first.reply {
                    Some(reply) => out.extend_from_slice(reply),
                    None => out.extend_from_slice(b"SERVER_ERROR no reply from backend\r\n"),
                }
            }
            MergeType::McGetJoin => {
                for req in msg.requests() {
                    if let Some(reply) = &req.reply {
                        out.extend_from_slice(strip_trailing_end(reply));
                    }
                }
                out.extend_from_slice(b"END\r\n");
            }
            _ => return Err(ProtoError::BadRequest),
        }
        Ok(())
    }

    /// A malformed line is always fully consumed up to and including its
    /// `\n` before `decode` returns either error, so the next `decode` call
    /// starts clean at the following command — the connection survives.
    fn resync_reply(&self, err: &ProtoError) -> Option<&'static [u8]> {
        match err {
            ProtoError::BadRequest => Some(b"ERROR\r\n"),
            ProtoError::BadLength => Some(b"CLIENT_ERROR bad data chunk\r\n"),
            _ => None,
        }
    }
}

fn strip_trailing_end(reply: &[u8]) -> &[u8] {
    reply.strip_suffix(b"END\r\n").unwrap_or(reply)
}

fn noreply_and_effective(tokens: &[(usize, usize)], data: &[u8]) -> (bool, usize) {
    if let Some(&last) = tokens.last() {
        if token(data, last) == b"noreply" {
            return (true, tokens.len() - 1);
        }
    }
    (false, tokens.len())
}

fn decode_storage(
    frame: &Bytes,
    tokens: &[(usize, usize)],
    verb_lower: &[u8],
    data_start: usize,
    bytes_len: usize,
) -> ProtoResult<Message> {
    if &frame[data_start + bytes_len..data_start + bytes_len + 2] != b"\r\n" {
        return Err(ProtoError::BadRequest);
    }
    let (quiet, eff_len) = noreply_and_effective(tokens, frame);
    if eff_len < 5 {
        return Err(ProtoError::BadRequest);
    }
    let key = frame.slice(tokens[1].0..tokens[1].0 + tokens[1].1);

    let mut line = BytesMut::new();
    line.extend_from_slice(verb_lower);
    for span in &tokens[1..eff_len] {
        line.extend_from_slice(b" ");
        line.extend_from_slice(token(frame, *span));
    }
    line.extend_from_slice(b"\r\n");
    line.extend_from_slice(&frame[data_start..data_start + bytes_len]);
    line.extend_from_slice(b"\r\n");

    let mut msg = Message::new(CacheType::Memcache);
    let idx = msg.next_req();
    let req = &mut msg.requests_mut()[idx];
    req.cmd = Bytes::from(verb_lower.to_vec());
    req.key = key;
    req.body = line.freeze();
    req.merge_type = MergeType::Single;
    req.quiet = quiet;
    Ok(msg)
}

fn decode_simple(frame: &Bytes, tokens: &[(usize, usize)], verb_lower: &[u8]) -> ProtoResult<Message> {
    match verb_lower {
        b"quit" => {
            let mut msg = Message::new(CacheType::Memcache);
            let idx = msg.next_req();
            let req = &mut msg.requests_mut()[idx];
            req.cmd = Bytes::from_static(b"quit");
            req.supported = false;
            req.error = Some(ProtoError::Quit);
            req.quiet = true;
            Ok(msg)
        }
        b"get" | b"gets" => {
            if tokens.len() < 2 {
                return Err(ProtoError::BadRequest);
            }
            let mut msg = Message::new(CacheType::Memcache);
            for span in &tokens[1..] {
                let idx = msg.next_req();
                let req = &mut msg.requests_mut()[idx];
                req.cmd = Bytes::from(verb_lower.to_vec());
                req.key = frame.slice(span.0..span.0 + span.1);
                req.body = build_line(verb_lower, &[*span], frame);
                req.merge_type = MergeType::McGetJoin;
            }
            Ok(msg)
        }
        b"delete" | b"incr" | b"decr" | b"touch" => {
            let (quiet, eff_len) = noreply_and_effective(tokens, frame);
            if eff_len < 2 {
                return Err(ProtoError::BadRequest);
            }
            let mut msg = Message::new(CacheType::Memcache);
            let idx = msg.next_req();
            let req = &mut msg.requests_mut()[idx];
            req.cmd = Bytes::from(verb_lower.to_vec());
            req.key = frame.slice(tokens[1].0..tokens[1].0 + tokens[1].1);
            req.body = build_line(verb_lower, &tokens[1..eff_len], frame);
            req.merge_type = MergeType::Single;
            req.quiet = quiet;
            Ok(msg)
        }
        _ => {
            let mut msg = Message::new(CacheType::Memcache);
            let idx = msg.next_req();
            let req = &mut msg.requests_mut()[idx];
            req.cmd = Bytes::from(verb_lower.to_vec());
            req.supported = false;
            req.error = Some(ProtoError::Unsupported);
            req.reply = Some(Bytes::from_static(b"ERROR\r\n"));
            Ok(msg)
        }
    }
}

fn build_line(verb_lower: &[u8], arg_spans: &[(usize, usize)], frame: &Bytes) -> Bytes {
    let mut line = BytesMut::new();
    line.extend_from_slice(verb_lower);
    for span in arg_spans {
        line.extend_from_slice(b" ");
        line.extend_from_slice(token(frame, *span));
    }
    line.extend_from_slice(b"\r\n");
    line.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf_with(data: &[u8]) -> Buffer {
        let mut b = Buffer::with_default_max();
        b.extend(data).unwrap();
        b
    }

    #[test]
    fn decodes_a_set_command() {
        let mut codec = MemcacheTextCodec::new();
        let mut buf = buf_with(b"set foo 0 0 3\r\nbar\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 1);
        let req = &msg.requests()[0];
        assert_eq!(&req.key[..], b"foo");
        assert_eq!(&req.body[..], b"set foo 0 0 3\r\nbar\r\n");
        assert!(!req.quiet);
    }

    #[test]
    fn needs_more_until_the_data_block_arrives() {
        let mut codec = MemcacheTextCodec::new();
        let mut buf = buf_with(b"set foo 0 0 3\r\nba");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn set_with_noreply_is_forwarded_but_produces_no_output() {
        let mut codec = MemcacheTextCodec::new();
        let mut buf = buf_with(b"set foo 0 0 3 noreply\r\nbar\r\n");
        let mut msg = codec.decode(&mut buf).unwrap().unwrap();
        assert!(msg.requests()[0].quiet);
        assert!(!msg.requests()[0].body.ends_with(b"noreply\r\n"));
        msg.requests_mut()[0].reply = Some(Bytes::from_static(b"STORED\r\n"));
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn multi_get_strips_inner_end_markers_and_appends_one() {
        let mut codec = MemcacheTextCodec::new();
        let mut buf = buf_with(b"get a b\r\n");
        let mut msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 2);
        msg.requests_mut()[0].reply = Some(Bytes::from_static(b"VALUE a 0 1\r\nx\r\nEND\r\n"));
        msg.requests_mut()[1].reply = Some(Bytes::from_static(b"END\r\n"));
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert_eq!(&out[..], b"VALUE a 0 1\r\nx\r\nEND\r\n");
    }

    #[test]
    fn delete_is_a_single_request() {
        let mut codec = MemcacheTextCodec::new();
        let mut buf = buf_with(b"delete foo\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 1);
        assert_eq!(&msg.requests()[0].key[..], b"foo");
    }

    #[test]
    fn quit_is_the_quit_sentinel_with_no_reply() {
        let mut codec = MemcacheTextCodec::new();
        let mut buf = buf_with(b"quit\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(msg.requests()[0].error, Some(ProtoError::Quit)));
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn unknown_verb_is_rejected_locally() {
        let mut codec = MemcacheTextCodec::new();
        let mut buf = buf_with(b"bogus foo\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert!(!msg.requests()[0].supported);
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert_eq!(&out[..], b"ERROR\r\n");
    }

    #[test]
    fn bad_storage_line_is_consumed_so_the_next_command_still_decodes() {
        let mut codec = MemcacheTextCodec::new();
        // "set" with no bytes-length token, then a well-formed "get".
        let mut buf = buf_with(b"set foo 0 0\r\nget bar\r\n");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtoError::BadRequest));
        assert!(codec.resync_reply(&err).is_some());

        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 1);
        assert_eq!(&msg.requests()[0].key[..], b"bar");
    }

    #[test]
    fn non_resync_error_kinds_return_none() {
        let codec = MemcacheTextCodec::new();
        assert!(codec.resync_reply(&ProtoError::BadAssert).is_none());
        assert!(codec.resync_reply(&ProtoError::Unsupported).is_none());
    }

    #[test]
    fn needs_more_at_every_byte_boundary() {
        let full = b"set foo 0 0 3\r\nbar\r\n";
        for cut in 0..full.len() {
            let mut codec = MemcacheTextCodec::new();
            let mut buf = buf_with(&full[..cut]);
            assert!(codec.decode(&mut buf).unwrap().is_none(), "cut at {cut}");
        }
    }
}
