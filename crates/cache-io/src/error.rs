use std::time::Duration;

/// Errors raised by the buffered I/O layer.
///
/// All variants are connection-fatal; the handler never attempts to
/// resynchronize at this layer (resynchronization, where possible, is a
/// codec-level decision — see `cache-proto`).
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("buffer exceeded max size of {max} bytes")]
    BufferFull { max: usize },
    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("connection closed (EOF)")]
    Eof,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IoResult<T> = Result<T, IoError>;
