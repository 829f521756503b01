use std::time::Instant;

use crate::barrier::CompletionBarrier;
use crate::cache_type::CacheType;
use crate::error::ProtoError;
use crate::request::Request;

/// One decode-to-encode trip through the handler loop.
///
/// A `Message` holds one or more sub-Requests (more than one only for a
/// fan-out command like `MGET`/`MSET`/multi-key `get`). The handler decodes
/// into a `Message`, hands its Requests to the forwarder, awaits the
/// `CompletionBarrier`, then encodes a single client-visible reply from the
/// sub-Requests' `reply` slots per `merge_type`.
///
/// Timestamps mirror the upstream implementation's latency breakdown
/// (spec §3, §9): they exist so a slowlog sink can report which phase of
/// the pipeline ate the time, not just the total.
pub struct Message {
    cache_type: CacheType,
    subs: Vec<Request>,
    barrier: CompletionBarrier,
    err: Option<ProtoError>,
    /// Redis Cluster: set by the handler when a `MOVED`/`ASK` reply forces a
    /// one-hop transparent redirect, so the forwarder routes the resubmitted
    /// batch directly rather than by slot (spec §3 "optional backend address
    /// string").
    backend_addr: Option<String>,
    /// How many times this Message has already been transparently
    /// redirected. Capped at one by the handler (spec §4.C.2).
    redirects: u8,

    start: Option<Instant>,
    read_done: Option<Instant>,
    write_queued: Option<Instant>,
    remote_done: Option<Instant>,
    encode_done: Option<Instant>,
    send_pipe_start: Option<Instant>,
    send_pipe_end: Option<Instant>,
    server_in: Option<Instant>,
    server_out: Option<Instant>,
}

impl Default for Message {
    fn default() -> Self {
        Self::new(CacheType::Unknown)
    }
}

impl Message {
    pub fn new(cache_type: CacheType) -> Self {
        Message {
            cache_type,
            subs: Vec::with_capacity(1),
            barrier: CompletionBarrier::new(),
            err: None,
            backend_addr: None,
            redirects: 0,
            start: None,
            read_done: None,
            write_queued: None,
            remote_done: None,
            encode_done: None,
            send_pipe_start: None,
            send_pipe_end: None,
            server_in: None,
            server_out: None,
        }
    }

    pub fn cache_type(&self) -> CacheType {
        self.cache_type
    }

    /// Resets a pooled Message for reuse: drops sub-Requests, replaces the
    /// barrier with a fresh one, clears timestamps and the terminal error.
    pub fn reset(&mut self, cache_type: CacheType) {
        self.cache_type = cache_type;
        self.subs.clear();
        self.barrier = CompletionBarrier::new();
        self.err = None;
        self.backend_addr = None;
        self.redirects = 0;
        self.start = None;
        self.read_done = None;
        self.write_queued = None;
        self.remote_done = None;
        self.encode_done = None;
        self.send_pipe_start = None;
        self.send_pipe_end = None;
        self.server_in = None;
        self.server_out = None;
    }

    /// Appends a new sub-Request and returns its index, growing the
    /// barrier's pending count by one. Codecs call this once per fan-out
    /// command (or once, for a non-batch command).
    pub fn next_req(&mut self) -> usize {
        self.subs.push(Request::new(self.cache_type));
        self.barrier.add(1);
        self.subs.len() - 1
    }

    /// Like `next_req`, but seeds the slot with a caller-built Request
    /// (used by codecs that already know cmd/key/body at construction time).
    pub fn with_request(&mut self, req: Request) -> usize {
        self.subs.push(req);
        self.barrier.add(1);
        self.subs.len() - 1
    }

    pub fn requests(&self) -> &[Request] {
        &self.subs
    }

    pub fn requests_mut(&mut self) -> &mut [Request] {
        &mut self.subs
    }

    pub fn is_batch(&self) -> bool {
        self.subs.len() > 1
    }

    pub fn barrier(&self) -> &CompletionBarrier {
        &self.barrier
    }

    pub fn backend_addr(&self) -> Option<&str> {
        self.backend_addr.as_deref()
    }

    pub fn set_backend_addr(&mut self, addr: Option<String>) {
        self.backend_addr = addr;
    }

    pub fn redirects(&self) -> u8 {
        self.redirects
    }

    /// Re-arms the barrier for one more round-trip through the forwarder
    /// (one sub-Request, since only non-batch Messages are ever redirected)
    /// and records that a redirect has been spent.
    pub fn prepare_redirect(&mut self, addr: String) {
        debug_assert_eq!(self.subs.len(), 1, "only non-batch Messages are redirected");
        self.redirects += 1;
        self.backend_addr = Some(addr);
        self.subs[0].reply = None;
        self.barrier.add(1);
    }

    pub fn set_error(&mut self, err: ProtoError) {
        self.err = Some(err);
    }

    pub fn error(&self) -> Option<&ProtoError> {
        self.err.as_ref()
    }

    /// The first error across the terminal error and all sub-Requests, in
    /// that order. Mirrors the upstream `Message.Err()` walk: a decode-time
    /// error on the Message itself always wins over a per-Request one.
    pub fn first_error(&self) -> Option<&ProtoError> {
        if self.err.is_some() {
            return self.err.as_ref();
        }
        self.subs.iter().find_map(|r| r.error.as_ref())
    }

    pub fn mark_start(&mut self) {
        self.start = Some(Instant::now());
    }

    pub fn mark_read_done(&mut self) {
        self.read_done = Some(Instant::now());
    }

    pub fn mark_write_queued(&mut self) {
        self.write_queued = Some(Instant::now());
    }

    pub fn mark_remote_done(&mut self) {
        self.remote_done = Some(Instant::now());
    }

    pub fn mark_encode_done(&mut self) {
        self.encode_done = Some(Instant::now());
    }

    pub fn mark_send_pipe_start(&mut self) {
        self.send_pipe_start = Some(Instant::now());
    }

    pub fn mark_send_pipe_end(&mut self) {
        self.send_pipe_end = Some(Instant::now());
    }

    pub fn mark_server_in(&mut self) {
        self.server_in = Some(Instant::now());
    }

    pub fn mark_server_out(&mut self) {
        self.server_out = Some(Instant::now());
    }

    /// Total wall time from decode start to encode finish.
    pub fn total_duration(&self) -> Option<std::time::Duration> {
        Some(self.encode_done?.saturating_duration_since(self.start?))
    }

    /// Time spent waiting on the forwarder/backend: from write-queued to
    /// remote-done.
    pub fn remote_duration(&self) -> Option<std::time::Duration> {
        Some(self.remote_done?.saturating_duration_since(self.write_queued?))
    }

    /// Time spent blocked handing the batch to the forwarder before it
    /// accepted it.
    pub fn wait_write_duration(&self) -> Option<std::time::Duration> {
        Some(self.write_queued?.saturating_duration_since(self.read_done?))
    }

    /// Time from the backend reply landing to the client-visible encode
    /// finishing.
    pub fn pre_end_duration(&self) -> Option<std::time::Duration> {
        Some(self.encode_done?.saturating_duration_since(self.remote_done?))
    }

    /// Time the request spent in the send pipe (queued to flush).
    pub fn pipe_duration(&self) -> Option<std::time::Duration> {
        Some(self.send_pipe_end?.saturating_duration_since(self.send_pipe_start?))
    }

    /// Time spent decoding the inbound frame.
    pub fn input_duration(&self) -> Option<std::time::Duration> {
        Some(self.read_done?.saturating_duration_since(self.start?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_req_grows_subs_and_barrier() {
        let mut m = Message::new(CacheType::Redis);
        assert_eq!(m.next_req(), 0);
        assert_eq!(m.next_req(), 1);
        assert_eq!(m.requests().len(), 2);
        assert_eq!(m.barrier().remaining(), 2);
        assert!(m.is_batch());
    }

    #[test]
    fn single_request_is_not_a_batch() {
        let mut m = Message::new(CacheType::Redis);
        m.next_req();
        assert!(!m.is_batch());
    }

    #[test]
    fn first_error_prefers_message_level_error() {
        let mut m = Message::new(CacheType::Redis);
        let idx = m.next_req();
        m.requests_mut()[idx].error = Some(ProtoError::Unsupported);
        m.set_error(ProtoError::BadRequest);
        assert!(matches!(m.first_error(), Some(ProtoError::BadRequest)));
    }

    #[test]
    fn first_error_falls_back_to_sub_request() {
        let mut m = Message::new(CacheType::Redis);
        m.next_req();
        let idx = m.next_req();
        m.requests_mut()[idx].error = Some(ProtoError::BadCount);
        assert!(matches!(m.first_error(), Some(ProtoError::BadCount)));
    }

    #[test]
    fn reset_clears_subs_and_error_and_gives_fresh_barrier() {
        let mut m = Message::new(CacheType::Redis);
        m.next_req();
        m.set_error(ProtoError::BadRequest);
        m.reset(CacheType::Memcache);
        assert_eq!(m.cache_type(), CacheType::Memcache);
        assert!(m.requests().is_empty());
        assert!(m.first_error().is_none());
        assert_eq!(m.barrier().remaining(), 0);
    }

    #[test]
    fn durations_are_none_until_both_endpoints_marked() {
        let mut m = Message::new(CacheType::Redis);
        assert!(m.total_duration().is_none());
        m.mark_start();
        assert!(m.total_duration().is_none());
        m.mark_encode_done();
        assert!(m.total_duration().is_some());
    }
}
