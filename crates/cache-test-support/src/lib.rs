//! Test doubles and small fixtures shared across this workspace's test
//! suites, in the spirit of the teacher's `rt-test-utils`: a forwarder mock
//! good enough to exercise the handler pipeline's completion discipline
//! without a real backend, plus a couple of byte-buffer helpers every codec
//! test already hand-rolls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use cache_forward::Forwarder;
use cache_io::Buffer;
use cache_proto::{Message, Request};

/// Builds a [`Buffer`] preloaded with `data`, for tests that only care about
/// decoding a known frame.
pub fn buffer_with(data: &[u8]) -> Buffer {
    let mut buf = Buffer::with_default_max();
    buf.extend(data).expect("test fixture frame fits the default buffer");
    buf
}

type ReplyFn = dyn Fn(&Request) -> Bytes + Send + Sync;

/// A forwarder that never talks to a real backend: it resolves every
/// sub-Request in a batch itself, using a caller-supplied reply function
/// (default: a flat `+OK\r\n`).
///
/// Three independent knobs exist so a test can target a specific piece of
/// handler behavior:
///
/// - [`reverse_order`](Self::reverse_order): resolves sub-Requests
///   last-to-first, so a test can confirm the handler's final output
///   follows `Message::requests` order rather than completion order.
/// - [`with_delay`](Self::with_delay): defers each `CompletionBarrier::done`
///   call onto a spawned task after a fixed delay, so a test can confirm the
///   handler genuinely suspends on the barrier instead of assuming eager
///   completion.
/// - [`with_reply`](Self::with_reply): supplies the reply bytes, for tests
///   that need specific (or per-request varying) backend output.
///
/// Replies are always written before any `done` call is made or scheduled,
/// whichever mode is active, matching the contract in [`cache_forward`].
pub struct LoopbackForwarder {
    reverse: bool,
    delay: Option<Duration>,
    reply_fn: Arc<ReplyFn>,
    calls: Arc<Mutex<usize>>,
}

impl Default for LoopbackForwarder {
    fn default() -> Self {
        LoopbackForwarder {
            reverse: false,
            delay: None,
            reply_fn: Arc::new(|_req: &Request| Bytes::from_static(b"+OK\r\n")),
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

impl LoopbackForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve sub-Requests in reverse index order.
    pub fn reverse_order(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Defer every `Done` call by `delay`, spawning a task per sub-Request.
    /// Requires a Tokio runtime to be running when `forward` is called.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Supply the reply bytes for each sub-Request.
    pub fn with_reply<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Bytes + Send + Sync + 'static,
    {
        self.reply_fn = Arc::new(f);
        self
    }

    /// How many times `forward` has been called so far.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Forwarder for LoopbackForwarder {
    async fn forward(&self, batch: &mut [Message]) {
        *self.calls.lock().unwrap() += 1;
        for msg in batch.iter_mut() {
            let barrier = msg.barrier().clone();
            let n = msg.requests().len();
            let order: Vec<usize> = if self.reverse { (0..n).rev().collect() } else { (0..n).collect() };

            for i in order {
                // A codec may have already answered this sub-Request itself
                // (e.g. a PING short-circuit) before it ever reached the
                // forwarder; leave that reply alone and just drain the
                // barrier slot `next_req` reserved for it.
                if msg.requests()[i].reply.is_none() {
                    let reply = (self.reply_fn)(&msg.requests()[i]);
                    msg.requests_mut()[i].reply = Some(reply);
                }
                match self.delay {
                    None => barrier.done(),
                    Some(delay) => {
                        let barrier = barrier.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            barrier.done();
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_proto::CacheType;

    #[tokio::test]
    async fn immediate_mode_drains_the_barrier_before_returning() {
        let fwd = LoopbackForwarder::new();
        let mut msg = Message::new(CacheType::Redis);
        msg.next_req();
        msg.next_req();
        fwd.forward(std::slice::from_mut(&mut msg)).await;
        assert_eq!(msg.barrier().remaining(), 0);
        assert_eq!(fwd.call_count(), 1);
    }

    #[tokio::test]
    async fn reverse_order_still_resolves_every_sub_request() {
        let fwd = LoopbackForwarder::new().reverse_order().with_reply(|req| {
            Bytes::from(format!("idx-reply-for-{}", req.key.len()))
        });
        let mut msg = Message::new(CacheType::Redis);
        msg.next_req();
        msg.next_req();
        fwd.forward(std::slice::from_mut(&mut msg)).await;
        assert!(msg.requests().iter().all(|r| r.reply.is_some()));
    }

    #[tokio::test]
    async fn delayed_mode_leaves_the_barrier_pending_until_the_delay_elapses() {
        let fwd = LoopbackForwarder::new().with_delay(Duration::from_millis(20));
        let mut msg = Message::new(CacheType::Redis);
        msg.next_req();
        fwd.forward(std::slice::from_mut(&mut msg)).await;
        // forward() returned already, but the spawned completion hasn't run yet.
        assert_eq!(msg.barrier().remaining(), 1);
        assert!(msg.requests()[0].reply.is_some(), "reply is written synchronously");
        msg.barrier().wait().await;
        assert_eq!(msg.barrier().remaining(), 0);
    }
}
