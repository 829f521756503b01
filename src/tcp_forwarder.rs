//! A minimal single-backend `Forwarder` (spec §0: "a stand-in for the
//! out-of-scope backend pool, not a production router"). It dials one
//! configured address, pools the resulting connections, and resolves every
//! sub-Request in a batch concurrently, grounded on the teacher's
//! `local_fanout.rs` accept/dispatch style and `cache_proto::Pool`'s
//! free-list shape.
//!
//! Framing the backend's reply is the one place this forwarder cuts a
//! corner a real router cannot: rather than re-implementing each protocol's
//! reply grammar just to find a frame boundary, it reads until the backend
//! goes quiet for [`IDLE_GAP`] and takes whatever arrived as the whole
//! reply. That is adequate for a demo backend that answers one request at a
//! time and then waits; it is not a substitute for the protocol-aware
//! framing a production forwarder needs when pipelining to the backend too.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use async_trait::async_trait;
use cache_forward::Forwarder;
use cache_io::IoError;
use cache_proto::{Message, ProtoError};

const IDLE_GAP: Duration = Duration::from_millis(20);
const READ_CHUNK: usize = 4096;

pub struct TcpForwarder {
    backend_addr: String,
    pool: Mutex<Vec<TcpStream>>,
}

impl TcpForwarder {
    pub fn new(backend_addr: String) -> Self {
        TcpForwarder {
            backend_addr,
            pool: Mutex::new(Vec::new()),
        }
    }

    async fn checkout(&self) -> std::io::Result<TcpStream> {
        if let Some(conn) = self.pool.lock().await.pop() {
            return Ok(conn);
        }
        TcpStream::connect(&self.backend_addr).await
    }

    async fn checkin(&self, conn: TcpStream) {
        self.pool.lock().await.push(conn);
    }

    /// Sends `body` and reads back whatever the backend sends until it goes
    /// quiet for [`IDLE_GAP`], or returns the connection's I/O error.
    async fn roundtrip(&self, body: &Bytes) -> std::io::Result<(TcpStream, Bytes)> {
        let mut conn = self.checkout().await?;
        conn.write_all(body).await?;

        let mut out = BytesMut::new();
        loop {
            let mut chunk = [0u8; READ_CHUNK];
            match tokio::time::timeout(IDLE_GAP, conn.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => out.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => break,
            }
        }
        Ok((conn, out.freeze()))
    }
}

#[async_trait]
impl Forwarder for TcpForwarder {
    async fn forward(&self, batch: &mut [Message]) {
        for msg in batch.iter_mut() {
            let barrier = msg.barrier().clone();
            let n = msg.requests().len();
            // A codec may have already answered a sub-Request itself (a
            // `PING`/`QUIT` short-circuit, an unsupported command, Memcache
            // binary's Noop/Version) before it ever reached the forwarder.
            // Leave that reply untouched and just drain its barrier slot.
            let pending: Vec<usize> = (0..n).filter(|&i| msg.requests()[i].reply.is_none()).collect();
            let replies = join_all(pending.iter().map(|&i| {
                let body = msg.requests()[i].body.clone();
                async move { self.roundtrip(&body).await }
            }))
            .await;

            for (&i, result) in pending.iter().zip(replies) {
                match result {
                    Ok((conn, reply)) => {
                        self.checkin(conn).await;
                        msg.requests_mut()[i].reply = Some(reply);
                    }
                    Err(e) => {
                        msg.requests_mut()[i].error = Some(ProtoError::Io(IoError::Io(e)));
                    }
                }
            }
            // Every sub-Request counted into the barrier when it was
            // allocated (spec §4.D), including the ones already answered by
            // the codec, so all `n` must be drained here regardless.
            for _ in 0..n {
                barrier.done();
            }
        }
    }
}
