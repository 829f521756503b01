use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::buffer::Buffer;
use crate::error::{IoError, IoResult};

/// Growth step used when the buffer has no complete frame and needs more
/// bytes from the wire.
const READ_CHUNK: usize = 4 * 1024;

/// Reads bytes off an `AsyncRead` into a `Buffer`, never copying the bytes
/// it hands back to callers (see `Buffer::take`/`read_until`).
///
/// A `BufReader` never decodes; that's the codec's job. It only answers
/// "do you have more bytes for me" by pulling one more chunk off the wire.
pub struct BufReader<S> {
    stream: S,
    buf: Buffer,
    read_timeout: Duration,
}

impl<S> BufReader<S>
where
    S: tokio::io::AsyncRead + Unpin,
{
    pub fn new(stream: S, read_timeout: Duration, max_buffer_size: usize) -> Self {
        BufReader {
            stream,
            buf: Buffer::new(max_buffer_size),
            read_timeout,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buf
    }

    /// Pulls at least one more chunk of bytes from the connection into the
    /// buffer. Connection-fatal on timeout or EOF. This is the only
    /// suspension point for decode resumption (spec §5).
    pub async fn fill_more(&mut self) -> IoResult<()> {
        self.buf.reserve_for_read(READ_CHUNK)?;
        let fut = self.stream.read_buf(self.buf.inner_mut());
        let n = match tokio::time::timeout(self.read_timeout, fut).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(IoError::Io(e)),
            Err(_) => return Err(IoError::ReadTimeout(self.read_timeout)),
        };
        if n == 0 {
            return Err(IoError::Eof);
        }
        Ok(())
    }
}
