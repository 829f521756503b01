//! Buffered I/O layer for the cache proxy core.
//!
//! A growable, zero-copy-on-decode ring buffer (`Buffer`) plus thin
//! `BufReader`/`BufWriter` wrappers around an `AsyncRead`/`AsyncWrite`
//! connection. Decode, fan-out, and encode never touch the network
//! directly; they only operate on `Buffer` and `BufWriter`.

mod buffer;
mod error;
mod reader;
mod writer;

pub use buffer::{Buffer, DEFAULT_MAX_BUFFER_SIZE};
pub use error::{IoError, IoResult};
pub use reader::BufReader;
pub use writer::BufWriter;
