//! Low-level RESP (REdis Serialization Protocol) tokenizing helpers shared
//! by the plain-Redis and Redis-Cluster codecs.
//!
//! There is deliberately no `RespValue` tree: a client command is decoded
//! straight into a `Vec<Bytes>` of arguments (command name first), and
//! replies are assembled by writing RESP tokens directly into the output
//! buffer. See DESIGN.md for why this crate skips the parsed-tree
//! representation spec §9 floats as an option.
//!
//! Inline (pre-RESP, telnet-style) commands are not supported: a frame that
//! doesn't open with `*` is `bad_request`, matching spec §4.C.1 exactly.

use bytes::{Bytes, BytesMut};

use cache_io::Buffer;

use crate::error::{ProtoError, ProtoResult};

fn find_crlf(data: &[u8], start: usize) -> Option<usize> {
    if start >= data.len() {
        return None;
    }
    data[start..].windows(2).position(|w| w == b"\r\n").map(|p| start + p)
}

/// Attempts to decode one complete client command from the front of `buf`.
/// Only the RESP array form (`*N\r\n$len\r\n...`) is accepted; a frame that
/// opens with anything else is an inline command, which this proxy does not
/// support (spec §4.C.1: "receipt signals `bad_request`"). Returns
/// `Ok(None)` when `buf` doesn't yet hold a full frame.
pub fn decode_command(buf: &mut Buffer) -> ProtoResult<Option<Vec<Bytes>>> {
    let total = buf.len();
    if total == 0 {
        return Ok(None);
    }
    let data = buf.peek(total).expect("len bytes are available");
    if data[0] == b'*' {
        decode_array(buf, data)
    } else {
        Err(ProtoError::BadRequest)
    }
}

fn decode_array(buf: &mut Buffer, data: &[u8]) -> ProtoResult<Option<Vec<Bytes>>> {
    let Some(header_end) = find_crlf(data, 0) else {
        return Ok(None);
    };
    let count_str = std::str::from_utf8(&data[1..header_end]).map_err(|_| ProtoError::BadRequest)?;
    let count: i64 = count_str.parse().map_err(|_| ProtoError::BadRequest)?;
    if count <= 0 {
        return Err(ProtoError::BadRequest);
    }
    let count = count as usize;

    let mut pos = header_end + 2;
    // (start, len) offsets into `data`, resolved into owned slices once we
    // know the whole frame is present.
    let mut spans = Vec::with_capacity(count);
    for _ in 0..count {
        if pos >= data.len() {
            return Ok(None);
        }
        if data[pos] != b'$' {
            return Err(ProtoError::BadRequest);
        }
        let Some(len_end) = find_crlf(data, pos) else {
            return Ok(None);
        };
        let len_str = std::str::from_utf8(&data[pos + 1..len_end]).map_err(|_| ProtoError::BadRequest)?;
        let len: i64 = len_str.parse().map_err(|_| ProtoError::BadLength)?;
        if len < 0 {
            return Err(ProtoError::BadRequest);
        }
        let len = len as usize;
        let val_start = len_end + 2;
        let val_end = val_start + len;
        if val_end + 2 > data.len() {
            return Ok(None);
        }
        if &data[val_end..val_end + 2] != b"\r\n" {
            return Err(ProtoError::BadRequest);
        }
        spans.push((val_start, len));
        pos = val_end + 2;
    }

    let frame = buf.take(pos).expect("frame length already validated above");
    let args = spans.into_iter().map(|(start, len)| frame.slice(start..start + len)).collect();
    Ok(Some(args))
}

pub fn write_simple(out: &mut BytesMut, s: &str) {
    out.extend_from_slice(b"+");
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(b"\r\n");
}

pub fn write_error(out: &mut BytesMut, s: &str) {
    out.extend_from_slice(b"-");
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(b"\r\n");
}

pub fn write_integer(out: &mut BytesMut, n: i64) {
    out.extend_from_slice(b":");
    out.extend_from_slice(n.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

pub fn write_array_header(out: &mut BytesMut, n: i64) {
    out.extend_from_slice(b"*");
    out.extend_from_slice(n.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

pub fn write_bulk(out: &mut BytesMut, data: &[u8]) {
    out.extend_from_slice(b"$");
    out.extend_from_slice(data.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

pub fn write_null_bulk(out: &mut BytesMut) {
    out.extend_from_slice(b"$-1\r\n");
}

/// Re-serializes a decoded command's arguments back into a RESP array, for
/// the sub-Requests a fan-out command synthesizes (`MSET` -> several
/// `SET`s, etc.) and for transparent passthrough of anything else.
pub fn encode_args_as_array(args: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::new();
    write_array_header(&mut buf, args.len() as i64);
    for arg in args {
        write_bulk(&mut buf, arg);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_io::Buffer;

    fn buf_with(data: &[u8]) -> Buffer {
        let mut b = Buffer::with_default_max();
        b.extend(data).unwrap();
        b
    }

    #[test]
    fn decodes_a_complete_array_command() {
        let mut buf = buf_with(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
        let args = decode_command(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![Bytes::from_static(b"GET"), Bytes::from_static(b"foo")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn needs_more_on_partial_array_header() {
        let mut buf = buf_with(b"*2\r\n$3\r\nGET");
        assert!(decode_command(&mut buf).unwrap().is_none());
    }

    #[test]
    fn needs_more_at_every_byte_boundary() {
        let full = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        for cut in 0..full.len() {
            let mut buf = buf_with(&full[..cut]);
            assert!(decode_command(&mut buf).unwrap().is_none(), "cut at {cut}");
        }
        let mut buf = buf_with(full);
        assert!(decode_command(&mut buf).unwrap().is_some());
    }

    #[test]
    fn rejects_bad_length() {
        let mut buf = buf_with(b"*1\r\n$x\r\nfoo\r\n");
        assert!(matches!(decode_command(&mut buf), Err(ProtoError::BadLength)));
    }

    #[test]
    fn leaves_trailing_bytes_for_the_next_command() {
        let mut buf = buf_with(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n");
        decode_command(&mut buf).unwrap();
        assert_eq!(buf.len(), 14);
    }

    #[test]
    fn rejects_inline_commands() {
        let mut buf = buf_with(b"PING\r\n");
        assert!(matches!(decode_command(&mut buf), Err(ProtoError::BadRequest)));
    }
}
