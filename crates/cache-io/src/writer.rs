use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;

use crate::error::{IoError, IoResult};

/// Buffers outgoing bytes and drains them to the connection on `flush`.
///
/// Writes never block the caller beyond `write_timeout`; a write or flush
/// that doesn't complete in time is connection-fatal (spec §4.A).
pub struct BufWriter<S> {
    stream: S,
    buf: BytesMut,
    write_timeout: Duration,
}

impl<S> BufWriter<S>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    pub fn new(stream: S, write_timeout: Duration) -> Self {
        BufWriter {
            stream,
            buf: BytesMut::new(),
            write_timeout,
        }
    }

    /// Appends bytes to the write buffer without touching the wire.
    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Direct access to the write buffer, for a codec's `encode` to append
    /// into without an intermediate copy through `write`.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Drains the write buffer to the connection.
    pub async fn flush(&mut self) -> IoResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let fut = self.stream.write_all(&self.buf);
        match tokio::time::timeout(self.write_timeout, fut).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(IoError::Io(e)),
            Err(_) => return Err(IoError::WriteTimeout(self.write_timeout)),
        }
        self.buf.clear();
        let fut = self.stream.flush();
        match tokio::time::timeout(self.write_timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(IoError::Io(e)),
            Err(_) => Err(IoError::WriteTimeout(self.write_timeout)),
        }
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn flush_drains_to_wire() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut writer = BufWriter::new(server, Duration::from_secs(1));
        writer.write(b"hello ");
        writer.write(b"world");
        writer.flush().await.unwrap();
        let mut buf = [0u8; 11];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[tokio::test]
    async fn flush_on_empty_buffer_is_noop() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = BufWriter::new(server, Duration::from_secs(1));
        writer.flush().await.unwrap();
        drop(client);
    }
}
