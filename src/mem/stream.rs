//! In-process duplex stream with high-water-mark flow control.

use crate::buffer::ByteBuffer;
use crate::error::{Error, ErrorKind, Result};
use crate::reactor::{Handle, Sleep};
use crate::stream::{ReadStream, Stream, Unshift, WriteStream};
use crate::wake::WakeSlot;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

#[derive(Debug)]
struct ReadSlot {
    want: usize,
    stop: Option<u8>,
    state: WakeSlot<Vec<u8>>,
}

#[derive(Debug)]
struct WriteTicket {
    len: usize,
    state: WakeSlot<usize>,
}

#[derive(Debug)]
struct MemInner {
    buf: ByteBuffer,
    hwm: usize,
    open: bool,
    readable: bool,
    writable: bool,
    readers: VecDeque<Arc<Mutex<ReadSlot>>>,
    writers: VecDeque<Arc<Mutex<WriteTicket>>>,
}

impl MemInner {
    /// Extract policy: stop byte first (included), then "everything" for a
    /// zero length, then the first `min(want, len)` bytes.
    fn extract(&mut self, want: usize, stop: Option<u8>) -> Vec<u8> {
        if let Some(byte) = stop {
            if let Some(pos) = self.buf.search(byte) {
                if want == 0 || pos < want {
                    return self.buf.shift(pos + 1);
                }
                return self.buf.shift(want);
            }
        }
        if want == 0 {
            return self.buf.drain();
        }
        self.buf.shift(want)
    }

    /// Feeds parked readers in FIFO order while bytes remain.
    fn satisfy_readers(&mut self) {
        while !self.buf.is_empty() {
            let Some(slot) = self.readers.pop_front() else {
                break;
            };
            let (want, stop) = {
                let s = slot.lock();
                (s.want, s.stop)
            };
            let out = self.extract(want, stop);
            slot.lock().state.complete(Ok(out));
        }
        self.after_drain();
    }

    /// Runs whenever the buffer may have shrunk: releases the write queue
    /// at or below the high-water mark, and closes an ended stream once it
    /// is empty.
    fn after_drain(&mut self) {
        if self.hwm > 0 && self.buf.len() <= self.hwm {
            while let Some(ticket) = self.writers.pop_front() {
                let mut ticket = ticket.lock();
                let len = ticket.len;
                ticket.state.complete(Ok(len));
            }
        }
        if self.open && !self.writable && self.buf.is_empty() {
            self.close_locked(None);
        }
    }

    fn close_locked(&mut self, cause: Option<Error>) {
        if !self.open {
            return;
        }
        tracing::debug!(buffered = self.buf.len(), "memory stream closing");
        self.open = false;
        self.readable = false;
        self.writable = false;
        for slot in self.readers.drain(..) {
            slot.lock().state.complete(Ok(Vec::new()));
        }
        let cause = cause.unwrap_or_else(Error::closed);
        for ticket in self.writers.drain(..) {
            let err = if cause.kind() == ErrorKind::Closed {
                cause.clone()
            } else {
                Error::closed().with_context(cause.to_string())
            };
            ticket.lock().state.complete(Err(err));
        }
    }
}

/// In-process duplex stream backed by a FIFO byte buffer.
///
/// Bytes written become readable in write order. A high-water mark (HWM)
/// bounds the buffer softly: a write that lifts the buffered length above
/// the mark still appends its bytes but parks until reads drain the buffer
/// back to the mark. `hwm == 0` disables the bound.
///
/// Handles are cheap clones sharing one stream; simultaneous reads queue
/// FIFO and each receives distinct bytes.
#[derive(Clone)]
pub struct MemoryStream {
    inner: Arc<Mutex<MemInner>>,
    timer: Option<Handle>,
}

impl std::fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryStream")
            .field("open", &inner.open)
            .field("buffered", &inner.buf.len())
            .field("hwm", &inner.hwm)
            .field("timed", &self.timer.is_some())
            .finish_non_exhaustive()
    }
}

impl MemoryStream {
    /// Creates a stream with the given high-water mark (`0` = unlimited).
    ///
    /// Streams created this way have no time source: read timeouts other
    /// than `Duration::ZERO` fail `InvalidArgument`. Use
    /// [`with_timer`](Self::with_timer) when timeouts are needed.
    #[must_use]
    pub fn new(hwm: usize) -> Self {
        Self::build(hwm, None)
    }

    /// Creates a stream whose read timeouts are driven by `timer`.
    #[must_use]
    pub fn with_timer(hwm: usize, timer: Handle) -> Self {
        Self::build(hwm, Some(timer))
    }

    fn build(hwm: usize, timer: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemInner {
                buf: ByteBuffer::new(),
                hwm,
                open: true,
                readable: true,
                writable: true,
                readers: VecDeque::new(),
                writers: VecDeque::new(),
            })),
            timer,
        }
    }

    /// Returns the configured high-water mark.
    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.inner.lock().hwm
    }

    /// Returns the number of currently buffered bytes.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.inner.lock().buf.len()
    }

    async fn send(&self, data: &[u8], end: bool) -> Result<usize> {
        let ticket = {
            let mut inner = self.inner.lock();
            if !inner.writable {
                return Err(Error::unwritable());
            }
            inner.buf.push(data);
            if end {
                inner.writable = false;
            }
            inner.satisfy_readers();
            if !inner.open {
                // Ended and fully drained (possibly by parked readers).
                return Ok(data.len());
            }
            if inner.hwm > 0 && inner.buf.len() > inner.hwm {
                let ticket = Arc::new(Mutex::new(WriteTicket {
                    len: data.len(),
                    state: WakeSlot::new(),
                }));
                inner.writers.push_back(ticket.clone());
                tracing::trace!(
                    len = data.len(),
                    buffered = inner.buf.len(),
                    hwm = inner.hwm,
                    "write parked above high-water mark"
                );
                ticket
            } else {
                return Ok(data.len());
            }
        };
        WriteWait {
            inner: &self.inner,
            ticket,
            finished: false,
        }
        .await
    }
}

impl Stream for MemoryStream {
    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn close(&self) {
        self.inner.lock().close_locked(None);
    }
}

impl ReadStream for MemoryStream {
    async fn read(&self, len: usize, stop: Option<u8>, timeout: Duration) -> Result<Vec<u8>> {
        let sleep = if timeout.is_zero() {
            None
        } else {
            let Some(timer) = &self.timer else {
                return Err(Error::new(ErrorKind::InvalidArgument)
                    .with_context("read timeout requires a timer handle"));
            };
            Some(Sleep::new(timer, timeout))
        };
        let slot = {
            let mut inner = self.inner.lock();
            if inner.readers.is_empty() {
                if !inner.readable {
                    return Err(Error::unreadable());
                }
                if !inner.buf.is_empty() {
                    let out = inner.extract(len, stop);
                    inner.after_drain();
                    return Ok(out);
                }
                if !inner.writable {
                    // Ended and already drained: report end-of-stream.
                    inner.close_locked(None);
                    return Ok(Vec::new());
                }
            }
            let slot = Arc::new(Mutex::new(ReadSlot {
                want: len,
                stop,
                state: WakeSlot::new(),
            }));
            inner.readers.push_back(slot.clone());
            slot
        };
        ReadWait {
            inner: &self.inner,
            slot,
            sleep,
            finished: false,
        }
        .await
    }

    fn is_readable(&self) -> bool {
        self.inner.lock().readable
    }
}

impl Unshift for MemoryStream {
    fn unshift(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.readable {
            return Err(Error::unreadable());
        }
        inner.buf.unshift(data);
        inner.satisfy_readers();
        Ok(())
    }
}

impl WriteStream for MemoryStream {
    async fn write(&self, data: &[u8], _timeout: Duration) -> Result<usize> {
        // The memory write ticket carries no deadline; parked writers wait
        // for readers regardless of the timeout argument.
        self.send(data, false).await
    }

    async fn end(&self, data: &[u8], _timeout: Duration) -> Result<usize> {
        self.send(data, true).await
    }

    fn is_writable(&self) -> bool {
        self.inner.lock().writable
    }
}

/// Wait for a parked read slot, with an optional deadline.
struct ReadWait<'a> {
    inner: &'a Arc<Mutex<MemInner>>,
    slot: Arc<Mutex<ReadSlot>>,
    sleep: Option<Sleep>,
    finished: bool,
}

impl ReadWait<'_> {
    /// Removes the slot from the reader queue; returns a completion that
    /// raced ahead of the removal, if any.
    fn cancel_slot(&self) -> Option<Result<Vec<u8>>> {
        let mut inner = self.inner.lock();
        inner
            .readers
            .retain(|s| !Arc::ptr_eq(s, &self.slot));
        self.slot.lock().state.take()
    }
}

impl Future for ReadWait<'_> {
    type Output = Result<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        {
            let mut slot = this.slot.lock();
            if slot.state.is_done() {
                let result = slot.state.take();
                drop(slot);
                this.finished = true;
                return Poll::Ready(result.unwrap_or_else(|| Err(Error::closed())));
            }
            slot.state.register(cx.waker());
        }
        if let Some(sleep) = &mut this.sleep {
            if Pin::new(sleep).poll(cx).is_ready() {
                this.finished = true;
                if let Some(result) = this.cancel_slot() {
                    return Poll::Ready(result);
                }
                return Poll::Ready(Err(Error::timed_out()));
            }
        }
        Poll::Pending
    }
}

impl Drop for ReadWait<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.cancel_slot();
        }
    }
}

/// Wait for a parked write ticket.
struct WriteWait<'a> {
    inner: &'a Arc<Mutex<MemInner>>,
    ticket: Arc<Mutex<WriteTicket>>,
    finished: bool,
}

impl Future for WriteWait<'_> {
    type Output = Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut ticket = this.ticket.lock();
        if ticket.state.is_done() {
            let result = ticket.state.take();
            drop(ticket);
            this.finished = true;
            return Poll::Ready(result.unwrap_or_else(|| Err(Error::closed())));
        }
        ticket.state.register(cx.waker());
        Poll::Pending
    }
}

impl Drop for WriteWait<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Cancellation removes the ticket; the bytes stay buffered.
            let mut inner = self.inner.lock();
            inner.writers.retain(|t| !Arc::ptr_eq(t, &self.ticket));
        }
    }
}
