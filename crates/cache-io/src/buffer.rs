use bytes::{Buf, Bytes, BytesMut};

use crate::error::{IoError, IoResult};

/// Default growth ceiling: 1 MiB, per spec.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// The starting capacity reserved for a fresh connection buffer.
const INITIAL_CAPACITY: usize = 4 * 1024;

/// A growable byte ring with a read cursor.
///
/// Internally this is a single `BytesMut`: bytes already consumed by
/// `advance`/`take`/`read_until` are dropped off the front (via `BytesMut`'s
/// shared-allocation `split_to`/`advance`), so the buffer always begins at
/// the current read position. Slices handed back to callers are `Bytes` —
/// cheap, refcounted views into the same backing allocation — so codec-level
/// keys and values stay valid without the caller needing to track generations
/// or lifetimes tied to this struct.
pub struct Buffer {
    buf: BytesMut,
    max: usize,
}

impl Buffer {
    pub fn new(max: usize) -> Self {
        Buffer {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            max,
        }
    }

    pub fn with_default_max() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Bytes currently available to read.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns a contiguous view of the next `n` bytes without consuming
    /// them, or `None` ("need more") if fewer than `n` bytes are buffered.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        if self.buf.len() < n {
            None
        } else {
            Some(&self.buf[..n])
        }
    }

    /// Peek a single byte at the given offset from the read cursor.
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.buf.get(offset).copied()
    }

    /// Moves the read cursor forward by `n` bytes without returning them.
    pub fn advance(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// Takes ownership of the next `n` bytes, advancing the read cursor.
    /// Returns `None` ("need more") if fewer than `n` bytes are buffered.
    pub fn take(&mut self, n: usize) -> Option<Bytes> {
        if self.buf.len() < n {
            return None;
        }
        Some(self.buf.split_to(n).freeze())
    }

    /// Scans for `delim` starting at the read cursor. On a match, returns
    /// the bytes up to and including the delimiter (consuming them). Returns
    /// `None` ("need more") if the delimiter has not yet arrived.
    pub fn read_until(&mut self, delim: u8) -> Option<Bytes> {
        let pos = self.buf.iter().position(|&b| b == delim)?;
        Some(self.buf.split_to(pos + 1).freeze())
    }

    /// Reserves room for at least `additional` more bytes, doubling capacity
    /// until the request is satisfied or the configured maximum is hit.
    pub fn reserve(&mut self, additional: usize) -> IoResult<()> {
        let needed = self.buf.len() + additional;
        if needed > self.max {
            return Err(IoError::BufferFull { max: self.max });
        }
        if self.buf.capacity() < needed {
            let mut target = self.buf.capacity().max(INITIAL_CAPACITY);
            while target < needed {
                target = (target * 2).min(self.max).max(needed);
            }
            self.buf.reserve(target - self.buf.capacity());
        }
        Ok(())
    }

    /// Appends freshly-read bytes to the tail of the buffer.
    pub fn extend(&mut self, data: &[u8]) -> IoResult<()> {
        self.reserve(data.len())?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Grows spare tail capacity (without changing `len`) so that a
    /// subsequent `AsyncReadExt::read_buf` has somewhere to write. Mirrors
    /// `extend`'s doubling policy but doesn't append any bytes itself.
    pub fn reserve_for_read(&mut self, additional: usize) -> IoResult<()> {
        self.reserve(additional)
    }

    /// Mutable access to the underlying `BytesMut`, for `AsyncReadExt::read_buf`
    /// and similar APIs that append directly via the `BufMut` trait.
    pub fn inner_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn max(&self) -> usize {
        self.max
    }
}
