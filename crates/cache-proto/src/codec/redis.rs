use bytes::{Bytes, BytesMut};

use cache_io::Buffer;

use crate::cache_type::CacheType;
use crate::codec::resp::{self, decode_command};
use crate::codec::Codec;
use crate::error::{ProtoError, ProtoResult};
use crate::merge::MergeType;
use crate::message::Message;

/// Commands the proxy understands but will not forward: they carry
/// per-connection session state (transactions, pub/sub subscriptions) that
/// doesn't survive being multiplexed across pooled backend connections.
const UNSUPPORTED: &[&[u8]] = &[
    b"MULTI",
    b"EXEC",
    b"WATCH",
    b"DISCARD",
    b"SUBSCRIBE",
    b"UNSUBSCRIBE",
    b"PSUBSCRIBE",
    b"PUNSUBSCRIBE",
];

/// RESP codec for standalone Redis (spec §4.A/§4.C, the non-cluster case).
///
/// `MSET`/`MGET`/`DEL`/`EXISTS` fan out into one sub-Request per key; every
/// other recognized command passes through as a single sub-Request.
#[derive(Default)]
pub struct RedisCodec;

impl RedisCodec {
    pub fn new() -> Self {
        RedisCodec
    }
}

impl Codec for RedisCodec {
    fn decode(&mut self, buf: &mut Buffer) -> ProtoResult<Option<Message>> {
        let Some(args) = decode_command(buf)? else {
            return Ok(None);
        };
        if args.is_empty() {
            return Err(ProtoError::BadRequest);
        }
        Ok(Some(decode_into_message(args)?))
    }

    fn encode(&mut self, msg: &Message, out: &mut BytesMut) -> ProtoResult<()> {
        encode_message(msg, out)
    }
}

/// Builds the Message for one decoded command. Shared with
/// `RedisClusterCodec`, which layers hash-tag slot routing and redirect
/// handling on top of the same fan-out rules.
pub(crate) fn decode_into_message(args: Vec<Bytes>) -> ProtoResult<Message> {
    let cmd_upper = args[0].to_ascii_uppercase();
    let mut msg = Message::new(CacheType::Redis);

    match cmd_upper.as_slice() {
        b"PING" => {
            let idx = msg.next_req();
            let req = &mut msg.requests_mut()[idx];
            req.cmd = args[0].clone();
            req.supported = false;
            req.reply = Some(Bytes::from_static(b"+PONG\r\n"));
        }
        b"QUIT" => {
            let idx = msg.next_req();
            let req = &mut msg.requests_mut()[idx];
            req.cmd = args[0].clone();
            req.supported = false;
            req.error = Some(ProtoError::Quit);
            req.reply = Some(Bytes::from_static(b"+OK\r\n"));
        }
        b"MSET" => {
            if args.len() < 3 || (args.len() - 1) % 2 != 0 {
                return Err(ProtoError::BadRequest);
            }
            for chunk in args[1..].chunks(2) {
                let idx = msg.next_req();
                let req = &mut msg.requests_mut()[idx];
                req.cmd = Bytes::from_static(b"SET");
                req.key = chunk[0].clone();
                req.body =
                    resp::encode_args_as_array(&[Bytes::from_static(b"SET"), chunk[0].clone(), chunk[1].clone()]);
                req.merge_type = MergeType::Ok;
            }
        }
        b"MGET" => {
            if args.len() < 2 {
                return Err(ProtoError::BadRequest);
            }
            for key in &args[1..] {
                let idx = msg.next_req();
                let req = &mut msg.requests_mut()[idx];
                req.cmd = Bytes::from_static(b"GET");
                req.key = key.clone();
                req.body = resp::encode_args_as_array(&[Bytes::from_static(b"GET"), key.clone()]);
                req.merge_type = MergeType::Join;
            }
        }
        b"DEL" | b"EXISTS" => {
            if args.len() < 2 {
                return Err(ProtoError::BadRequest);
            }
            let cmd_bytes = Bytes::from(cmd_upper.clone());
            for key in &args[1..] {
                let idx = msg.next_req();
                let req = &mut msg.requests_mut()[idx];
                req.cmd = cmd_bytes.clone();
                req.key = key.clone();
                req.body = resp::encode_args_as_array(&[cmd_bytes.clone(), key.clone()]);
                req.merge_type = MergeType::Count;
            }
        }
        other if UNSUPPORTED.iter().any(|u| *u == other) => {
            let idx = msg.next_req();
            let req = &mut msg.requests_mut()[idx];
            req.cmd = args[0].clone();
            req.supported = false;
            req.error = Some(ProtoError::Unsupported);
            let mut reply = BytesMut::new();
            resp::write_error(&mut reply, "ERR command not support");
            req.reply = Some(reply.freeze());
        }
        _ => {
            let idx = msg.next_req();
            let req = &mut msg.requests_mut()[idx];
            req.cmd = args[0].clone();
            if args.len() > 1 {
                req.key = args[1].clone();
            }
            req.body = resp::encode_args_as_array(&args);
            req.merge_type = MergeType::Single;
        }
    }

    Ok(msg)
}

pub(crate) fn encode_message(msg: &Message, out: &mut BytesMut) -> ProtoResult<()> {
    let Some(first) = msg.requests().first() else {
        return Ok(());
    };
    match first.merge_type {
        MergeType::Single => match &first.reply {
            Some(reply) => out.extend_from_slice(reply),
            None => resp::write_error(out, "ERR no reply from backend"),
        },
        MergeType::Ok => {
            if let Some(err) = msg.first_error() {
                resp::write_error(out, &format!("ERR {err}"));
            } else if msg.requests().iter().all(|r| !r.is_error_reply()) {
                resp::write_simple(out, "OK");
            } else {
                resp::write_error(out, "ERR mset failed");
            }
        }
        MergeType::Join => {
            resp::write_array_header(out, msg.requests().len() as i64);
            for req in msg.requests() {
                match &req.reply {
                    Some(reply) => out.extend_from_slice(reply),
                    None => resp::write_null_bulk(out),
                }
            }
        }
        MergeType::Count => {
            let total: i64 = msg
                .requests()
                .iter()
                .filter_map(|r| r.reply.as_ref())
                .filter_map(parse_resp_integer)
                .sum();
            resp::write_integer(out, total);
        }
        MergeType::McGetJoin => return Err(ProtoError::BadRequest),
    }
    Ok(())
}

fn parse_resp_integer(reply: &Bytes) -> Option<i64> {
    if reply.first() != Some(&b':') {
        return None;
    }
    let end = reply.windows(2).position(|w| w == b"\r\n")?;
    std::str::from_utf8(&reply[1..end]).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf_with(data: &[u8]) -> Buffer {
        let mut b = Buffer::with_default_max();
        b.extend(data).unwrap();
        b
    }

    fn fill_replies(msg: &mut Message, replies: &[&[u8]]) {
        for (req, reply) in msg.requests_mut().iter_mut().zip(replies) {
            req.reply = Some(Bytes::copy_from_slice(reply));
        }
    }

    #[test]
    fn ping_short_circuits_without_a_body() {
        let mut codec = RedisCodec::new();
        let mut buf = buf_with(b"*1\r\n$4\r\nPING\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 1);
        assert!(!msg.requests()[0].supported);
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert_eq!(&out[..], b"+PONG\r\n");
    }

    #[test]
    fn mget_fans_out_one_request_per_key() {
        let mut codec = RedisCodec::new();
        let mut buf = buf_with(b"*3\r\n$4\r\nMGET\r\n$1\r\na\r\n$1\r\nb\r\n");
        let mut msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 2);
        assert!(msg.requests().iter().all(|r| r.merge_type == MergeType::Join));

        fill_replies(&mut msg, &[b"$3\r\nval\r\n", b"$-1\r\n"]);
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert_eq!(&out[..], b"*2\r\n$3\r\nval\r\n$-1\r\n");
    }

    #[test]
    fn mset_requires_an_even_number_of_pairs() {
        let mut codec = RedisCodec::new();
        let mut buf = buf_with(b"*3\r\n$4\r\nMSET\r\n$1\r\na\r\n$1\r\nb\r\n");
        assert!(matches!(codec.decode(&mut buf), Err(ProtoError::BadRequest)));
    }

    #[test]
    fn mset_reports_ok_only_if_every_sub_request_succeeded() {
        let mut codec = RedisCodec::new();
        let mut buf = buf_with(b"*5\r\n$4\r\nMSET\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$1\r\n2\r\n");
        let mut msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 2);

        fill_replies(&mut msg, &[b"+OK\r\n", b"+OK\r\n"]);
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert_eq!(&out[..], b"+OK\r\n");
    }

    #[test]
    fn mset_reports_error_if_any_sub_request_failed() {
        let mut codec = RedisCodec::new();
        let mut buf = buf_with(b"*3\r\n$4\r\nMSET\r\n$1\r\na\r\n$1\r\n1\r\n");
        let mut msg = codec.decode(&mut buf).unwrap().unwrap();
        fill_replies(&mut msg, &[b"-ERR something\r\n"]);
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert!(out.starts_with(b"-"));
    }

    #[test]
    fn del_sums_integer_replies() {
        let mut codec = RedisCodec::new();
        let mut buf = buf_with(b"*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n");
        let mut msg = codec.decode(&mut buf).unwrap().unwrap();
        fill_replies(&mut msg, &[b":1\r\n", b":0\r\n"]);
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert_eq!(&out[..], b":1\r\n");
    }

    #[test]
    fn unsupported_command_is_rejected_without_forwarding() {
        let mut codec = RedisCodec::new();
        let mut buf = buf_with(b"*1\r\n$5\r\nMULTI\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert!(!msg.requests()[0].supported);
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert!(out.starts_with(b"-ERR"));
    }

    #[test]
    fn quit_replies_ok_and_marks_the_request_as_the_quit_sentinel() {
        let mut codec = RedisCodec::new();
        let mut buf = buf_with(b"*1\r\n$4\r\nQUIT\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(msg.requests()[0].error, Some(ProtoError::Quit)));
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert_eq!(&out[..], b"+OK\r\n");
    }

    #[test]
    fn generic_command_passes_through_as_single() {
        let mut codec = RedisCodec::new();
        let mut buf = buf_with(b"*2\r\n$4\r\nINCR\r\n$1\r\na\r\n");
        let mut msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.requests().len(), 1);
        assert_eq!(msg.requests()[0].merge_type, MergeType::Single);
        fill_replies(&mut msg, &[b":4\r\n"]);
        let mut out = BytesMut::new();
        codec.encode(&msg, &mut out).unwrap();
        assert_eq!(&out[..], b":4\r\n");
    }
}
