//! Seekable in-memory buffer stream.

use crate::buffer::ByteBuffer;
use crate::error::{Error, ErrorKind, Result};
use crate::stream::{ReadStream, SeekFrom, SeekStream, Stream, WriteStream};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct SinkInner {
    buf: ByteBuffer,
    pos: usize,
    open: bool,
    writable: bool,
}

/// Seekable duplex buffer that retains every byte written.
///
/// Unlike [`MemoryStream`](super::MemoryStream), reads do not consume: a
/// shared cursor addresses the retained bytes, reads advance it, and
/// writes either append (cursor at the end) or splice at the cursor. All
/// operations complete without suspending, so the timeout argument is
/// accepted and ignored.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<SinkInner>>,
}

impl Default for SinkInner {
    fn default() -> Self {
        Self {
            buf: ByteBuffer::new(),
            pos: 0,
            open: true,
            writable: true,
        }
    }
}

impl MemorySink {
    /// Creates an empty sink with the cursor at offset 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink preloaded with `data`, cursor at offset 0.
    #[must_use]
    pub fn with_contents(data: &[u8]) -> Self {
        let sink = Self::new();
        sink.inner.lock().buf.push(data);
        sink
    }
}

impl Stream for MemorySink {
    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.open = false;
        inner.writable = false;
    }
}

impl ReadStream for MemorySink {
    /// Reads from the cursor, advancing it past the returned bytes.
    ///
    /// The extract policy matches the FIFO streams, applied to the window
    /// between the cursor and the end of the retained bytes.
    async fn read(&self, len: usize, stop: Option<u8>, _timeout: Duration) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        if !inner.open || inner.pos >= inner.buf.len() {
            return Err(Error::unreadable());
        }
        let window = inner.buf.len() - inner.pos;
        let take = if let Some(byte) = stop {
            match inner.buf.search_from(byte, inner.pos) {
                Some(at) => {
                    let rel = at - inner.pos + 1;
                    if len == 0 || rel <= len {
                        rel
                    } else {
                        len
                    }
                }
                None if len == 0 => window,
                None => len.min(window),
            }
        } else if len == 0 {
            window
        } else {
            len.min(window)
        };
        let out = inner.buf.peek(take, inner.pos);
        inner.pos += out.len();
        Ok(out)
    }

    fn is_readable(&self) -> bool {
        let inner = self.inner.lock();
        inner.open && inner.pos < inner.buf.len()
    }
}

impl WriteStream for MemorySink {
    /// Appends at the end or splices at the cursor, then advances the
    /// cursor past the written bytes.
    async fn write(&self, data: &[u8], _timeout: Duration) -> Result<usize> {
        let mut inner = self.inner.lock();
        if !inner.writable {
            return Err(Error::unwritable());
        }
        let pos = inner.pos;
        inner.buf.insert(pos, data);
        inner.pos += data.len();
        Ok(data.len())
    }

    /// Writes, then makes the sink unwritable. Reads stay valid.
    async fn end(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        let n = self.write(data, timeout).await?;
        self.inner.lock().writable = false;
        Ok(n)
    }

    fn is_writable(&self) -> bool {
        self.inner.lock().writable
    }
}

impl SeekStream for MemorySink {
    /// Moves the cursor; resolved offsets in `0..=len` are valid, with
    /// `len` parking the cursor at the end.
    async fn seek(&self, pos: SeekFrom, _timeout: Duration) -> Result<usize> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(Error::new(ErrorKind::Unseekable));
        }
        let len = i128::from(inner.buf.len() as u64);
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(inner.pos as u64) + i128::from(delta),
            SeekFrom::End(delta) => len + i128::from(delta),
        };
        if target < 0 || target > len {
            return Err(Error::new(ErrorKind::OutOfBounds)
                .with_context(format!("seek target {target} outside 0..={len}")));
        }
        inner.pos = usize::try_from(target).expect("target bounded by len");
        Ok(inner.pos)
    }

    fn tell(&self) -> usize {
        self.inner.lock().pos
    }

    fn len(&self) -> usize {
        self.inner.lock().buf.len()
    }
}
