use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use cache_forward::Forwarder;
use cache_io::{BufReader, BufWriter, IoError};
use cache_proto::codec::Redirect;
use cache_proto::{Codec, Message, Pool, ProtoError, ProtoResult};

use crate::batch::BatchSizer;
use crate::config::HandlerConfig;
use crate::slowlog::SlowlogSink;

/// Drives the decode -> forward -> wait -> encode -> flush loop for one
/// client connection (spec §4.E).
///
/// State lives entirely in this struct's fields, not an explicit enum: the
/// five live states (`reading`, `forwarding`, `waiting`, `encoding`,
/// `flushing`) correspond to straight-line sections of [`Handler::run_once`],
/// and `closed` is reaching [`Handler::close`] and never returning to the
/// loop. A connection that rotates through a redirect stays in the same
/// states; only the Redis Cluster codec knows a redirect happened.
pub struct Handler<S, C> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    codec: C,
    forwarder: Arc<dyn Forwarder>,
    slog: Arc<dyn SlowlogSink>,
    config: HandlerConfig,
    closed: AtomicBool,
    conn_count: Arc<AtomicUsize>,
    sizer: BatchSizer,
    /// Process-wide free-list of batch `Vec<Message>` backing allocations,
    /// shared across every connection's `Handler` (spec §4.B: "shared across
    /// all connections", not just reused within one connection). See
    /// DESIGN.md for why this pools whole batch buffers rather than
    /// individual Messages.
    pool: Arc<Pool<Vec<Message>>>,
}

impl<S, C> Handler<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    C: Codec,
{
    pub fn new(
        stream: S,
        codec: C,
        forwarder: Arc<dyn Forwarder>,
        slog: Arc<dyn SlowlogSink>,
        config: HandlerConfig,
        conn_count: Arc<AtomicUsize>,
        pool: Arc<Pool<Vec<Message>>>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let sizer = BatchSizer::new(config.concurrent, config.max_concurrent);
        Handler {
            reader: BufReader::new(read_half, config.read_timeout, config.max_buffer_size),
            writer: BufWriter::new(write_half, config.write_timeout),
            codec,
            forwarder,
            slog,
            config,
            closed: AtomicBool::new(false),
            conn_count,
            sizer,
            pool,
        }
    }

    /// Runs the connection to completion. Never panics on a client error:
    /// every fatal condition routes through [`Handler::close`].
    pub async fn run(mut self) {
        loop {
            if let Err(err) = self.run_once().await {
                self.close(&err);
                return;
            }
        }
    }

    async fn run_once(&mut self) -> ProtoResult<()> {
        let target = self.sizer.target();
        let mut batch = self.decode_batch(target).await?;
        self.sizer.note_decoded(batch.len(), target);

        // forwarding
        for msg in batch.iter_mut() {
            msg.mark_write_queued();
        }
        self.forwarder.forward(&mut batch).await;

        // waiting: cancellation-safe even if the read half above already
        // errored out for a later batch, since this call only ever sees
        // batches that decoded cleanly.
        for msg in batch.iter() {
            msg.barrier().wait().await;
        }
        for msg in batch.iter_mut() {
            msg.mark_remote_done();
        }

        self.redirect_if_needed(&mut batch).await;

        // encoding
        if let Err(e) = self.encode_batch(&mut batch).await {
            return Err(e);
        }

        // flushing
        self.writer.flush().await?;

        self.record_slowlog(&batch);

        // A `QUIT` (or Memcache binary Quit/QuitQ) sub-Request already wrote
        // its reply above; surfacing it here as an error is what actually
        // ends the connection (spec §7: "Quit: sentinel ... closes the
        // connection silently").
        let quit = batch.iter().any(|m| matches!(m.first_error(), Some(ProtoError::Quit)));
        batch.clear();
        self.pool.put(Box::new(batch));
        if quit {
            return Err(ProtoError::Quit);
        }
        Ok(())
    }

    async fn decode_batch(&mut self, target: usize) -> ProtoResult<Vec<Message>> {
        let mut batch = *self.pool.get();
        if batch.capacity() < target {
            batch.reserve(target - batch.capacity());
        }
        loop {
            while batch.len() < target {
                match self.codec.decode(self.reader.buffer_mut()) {
                    Ok(Some(mut msg)) => {
                        msg.mark_start();
                        msg.mark_read_done();
                        batch.push(msg);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Protocol errors the codec can resync past (spec §7:
                        // Memcache text, by skipping the bad line) get a
                        // client-visible error reply and the loop continues;
                        // everything else propagates and closes the connection.
                        if let Some(reply) = self.codec.resync_reply(&e) {
                            self.writer.write(reply);
                            self.writer.flush().await?;
                            continue;
                        }
                        return Err(e);
                    }
                }
            }
            if !batch.is_empty() {
                return Ok(batch);
            }
            self.reader.fill_more().await?;
        }
    }

    /// Redis Cluster's one-hop `MOVED`/`ASK` redirect (spec §4.C.2, §6): a
    /// Message whose sole reply names another node is resubmitted to it
    /// directly, capped at one redirect per Message by `Message::redirects`.
    /// `Ask` additionally requires sending `ASKING` to the target node first
    /// and waiting for it to complete before the real command follows, or
    /// the node refuses it outside the ASK context. Every other codec's
    /// `redirect_target` always returns `None`, so this is a no-op for them.
    async fn redirect_if_needed(&mut self, batch: &mut [Message]) {
        for msg in batch.iter_mut() {
            if msg.redirects() > 0 {
                continue;
            }
            let Some(redirect) = self.codec.redirect_target(msg) else {
                continue;
            };
            let addr = redirect.addr().to_string();
            if matches!(redirect, Redirect::Ask(_)) {
                if let Some(mut asking) = self.codec.asking_message(&addr) {
                    self.forwarder.forward(std::slice::from_mut(&mut asking)).await;
                    asking.barrier().wait().await;
                }
            }
            msg.prepare_redirect(addr);
            self.forwarder.forward(std::slice::from_mut(msg)).await;
            msg.barrier().wait().await;
            msg.mark_remote_done();
        }
    }

    async fn encode_batch(&mut self, batch: &mut [Message]) -> ProtoResult<()> {
        for msg in batch.iter_mut() {
            msg.mark_send_pipe_end();
            if let Err(e) = self.codec.encode(msg, self.writer.buf_mut()) {
                let _ = self.writer.flush().await;
                return Err(e);
            }
            msg.mark_encode_done();
        }
        Ok(())
    }

    fn record_slowlog(&self, batch: &[Message]) {
        let Some(threshold) = self.config.slowlog_slower_than else {
            return;
        };
        for msg in batch {
            if msg.total_duration().is_some_and(|d| d > threshold) {
                self.slog.record(msg);
            }
        }
    }

    /// Marks the connection closed exactly once (spec §4.E Close):
    /// subsequent calls after the first compare-exchange win are no-ops.
    fn close(&self, err: &ProtoError) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.conn_count.fetch_sub(1, Ordering::SeqCst);
            if matches!(err, ProtoError::Quit | ProtoError::Io(IoError::Eof)) {
                return;
            }
            tracing::warn!(cache_type = ?self.config.cache_type, error = %err, "handler closing connection");
        }
    }
}
