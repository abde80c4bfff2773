//! Non-blocking readable stream over a descriptor.

use super::{PipeFd, Serial, CHUNK_SIZE};
use crate::buffer::ByteBuffer;
use crate::error::{Error, ErrorKind, Result};
use crate::reactor::{Direction, Handle, Readiness, Watcher};
use crate::stream::{FdStream, ReadStream, Stream, Unshift};
use parking_lot::Mutex;
use std::future::Future;
use std::os::fd::OwnedFd;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct ReadInner {
    fd: Option<Arc<PipeFd>>,
    raw: RawFd,
    watcher: Option<Watcher>,
    /// Bumped on rebind so a parked read re-arms against the new watcher.
    epoch: u64,
    /// Bytes pulled from the kernel but not yet delivered.
    buf: ByteBuffer,
    open: bool,
    readable: bool,
    eof: bool,
    fail: Option<Error>,
}

impl ReadInner {
    /// Error for a fresh operation on an incapable stream.
    fn unreadable_now(&self) -> Error {
        match &self.fail {
            Some(cause) => Error::unreadable().with_context(cause.to_string()),
            None => Error::unreadable(),
        }
    }

    /// Error for an operation that was parked when the stream went down.
    fn closed_now(&self) -> Error {
        self.fail.clone().unwrap_or_else(Error::closed)
    }

    /// Tops the staging buffer up from the kernel, then extracts per the
    /// read contract: stop byte (included) wins, otherwise up to `want`
    /// bytes, draining entirely when the buffer holds no more than that.
    fn fetch(&mut self, want: usize, stop: Option<u8>) -> Result<Vec<u8>> {
        if self.buf.len() < want && !self.eof {
            let fd = self.fd.clone().ok_or_else(|| self.closed_now())?;
            let mut chunk = vec![0u8; want - self.buf.len()];
            match fd.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    tracing::trace!(fd = self.raw, "pipe read reached eof");
                }
                Ok(n) => self.buf.push(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    let err = Error::failure(e);
                    self.shutdown(Some(err.clone()));
                    return Err(err);
                }
            }
        }
        if let Some(byte) = stop {
            if let Some(pos) = self.buf.search(byte) {
                return Ok(self.buf.shift(pos + 1));
            }
        }
        if self.buf.len() <= want {
            Ok(self.buf.drain())
        } else {
            Ok(self.buf.shift(want))
        }
    }

    /// Closes the stream, releasing the watcher and the descriptor.
    ///
    /// A parked read is woken through the watcher and observes the closed
    /// flags (and `fail`, when a cause is recorded) on its next poll.
    pub(crate) fn shutdown(&mut self, cause: Option<Error>) {
        if !self.open {
            return;
        }
        tracing::debug!(fd = self.raw, cause = cause.is_some(), "readable pipe closing");
        self.open = false;
        self.readable = false;
        self.fail = cause;
        self.epoch += 1;
        if let Some(watcher) = self.watcher.take() {
            watcher.interrupt();
        }
        self.fd = None;
    }
}

/// Non-blocking readable stream over a pipe- or socket-like descriptor.
///
/// The descriptor must already be non-blocking. Reads consult an internal
/// staging buffer first, top it up with a single non-blocking `read(2)`,
/// and park on the reactor when the kernel has nothing yet. Reads issued
/// while one is parked wait their turn and complete in issue order.
///
/// A read that would park but finds end-of-file completes with an empty
/// result and closes the stream; the next read fails `Unreadable`.
#[derive(Debug, Clone)]
pub struct ReadablePipe {
    inner: Arc<Mutex<ReadInner>>,
    serial: Arc<Serial>,
}

impl ReadablePipe {
    /// Takes ownership of `fd` and registers it with `handle`.
    ///
    /// The descriptor is closed when the stream closes or is dropped.
    ///
    /// # Errors
    ///
    /// Fails `Failure` if the descriptor cannot be registered.
    pub fn open(handle: &Handle, fd: OwnedFd) -> Result<Self> {
        Self::from_shared(handle, Arc::new(PipeFd::new(fd, true)))
    }

    /// Like [`open`](Self::open), but `auto_close: false` leaves the OS
    /// descriptor open when the stream goes away (stdio wrappers).
    pub fn open_with(handle: &Handle, fd: OwnedFd, auto_close: bool) -> Result<Self> {
        Self::from_shared(handle, Arc::new(PipeFd::new(fd, auto_close)))
    }

    pub(crate) fn from_shared(handle: &Handle, fd: Arc<PipeFd>) -> Result<Self> {
        let raw = fd.raw();
        let watcher = Watcher::new(handle, raw, Direction::Read)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(ReadInner {
                fd: Some(fd),
                raw,
                watcher: Some(watcher),
                epoch: 0,
                buf: ByteBuffer::new(),
                open: true,
                readable: true,
                eof: false,
                fail: None,
            })),
            serial: Serial::new(),
        })
    }

    /// Waits once for readiness without consuming bytes.
    ///
    /// Only meaningful when the staging buffer has been drained; fails
    /// `Failure` otherwise. The readiness may be spurious.
    ///
    /// # Errors
    ///
    /// `Unreadable` on a closed stream, `Failure` with undelivered staged
    /// bytes, `TimedOut` when `timeout` elapses first.
    pub async fn poll_ready(&self, timeout: Duration) -> Result<()> {
        let _turn = self.serial.acquire().await;
        let epoch = {
            let inner = self.inner.lock();
            if !inner.readable {
                return Err(inner.unreadable_now());
            }
            if !inner.buf.is_empty() {
                return Err(Error::new(ErrorKind::Failure)
                    .with_context("staged bytes not drained before poll"));
            }
            inner.epoch
        };
        match (ReadReady {
            inner: self.inner.clone(),
            timeout,
            epoch,
            armed: false,
        })
        .await?
        {
            Readiness::Ready => {
                let inner = self.inner.lock();
                if inner.readable {
                    Ok(())
                } else {
                    Err(inner.closed_now())
                }
            }
            Readiness::TimedOut => Err(Error::timed_out()),
        }
    }
}

impl Stream for ReadablePipe {
    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn close(&self) {
        self.inner.lock().shutdown(None);
    }
}

impl ReadStream for ReadablePipe {
    async fn read(&self, len: usize, stop: Option<u8>, timeout: Duration) -> Result<Vec<u8>> {
        // Reads serialize: a read issued while one is parked waits for it.
        let _turn = self.serial.acquire().await;
        {
            let inner = self.inner.lock();
            if !inner.readable {
                return Err(inner.unreadable_now());
            }
        }
        let want = if len == 0 { CHUNK_SIZE } else { len };
        loop {
            let epoch = {
                let mut inner = self.inner.lock();
                if !inner.readable {
                    return Err(inner.closed_now());
                }
                let out = inner.fetch(want, stop)?;
                if !out.is_empty() {
                    return Ok(out);
                }
                if inner.eof && inner.buf.is_empty() {
                    inner.shutdown(None);
                    return Ok(Vec::new());
                }
                inner.epoch
            };
            match (ReadReady {
                inner: self.inner.clone(),
                timeout,
                epoch,
                armed: false,
            })
            .await?
            {
                Readiness::Ready => {}
                Readiness::TimedOut => return Err(Error::timed_out()),
            }
        }
    }

    fn is_readable(&self) -> bool {
        self.inner.lock().readable
    }
}

impl Unshift for ReadablePipe {
    fn unshift(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.readable {
            return Err(inner.unreadable_now());
        }
        inner.buf.unshift(data);
        // Hand the bytes to a parked read right away.
        if let Some(watcher) = &inner.watcher {
            watcher.interrupt();
        }
        Ok(())
    }
}

impl FdStream for ReadablePipe {
    fn resource(&self) -> RawFd {
        self.inner.lock().raw
    }

    fn rebind(&self, handle: &Handle) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(inner.unreadable_now());
        }
        let fresh = Watcher::new(handle, inner.raw, Direction::Read)?;
        if let Some(old) = inner.watcher.take() {
            // A parked read wakes, observes the epoch change, and re-arms
            // against the replacement watcher.
            old.interrupt();
        }
        inner.watcher = Some(fresh);
        inner.epoch += 1;
        Ok(())
    }
}

/// Parks until the descriptor reports read readiness, the arming deadline
/// expires, or the stream is interrupted (unshift, rebind, close).
struct ReadReady {
    inner: Arc<Mutex<ReadInner>>,
    timeout: Duration,
    epoch: u64,
    armed: bool,
}

impl Future for ReadReady {
    type Output = Result<Readiness>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let inner = this.inner.lock();
        // Any state change that needs re-inspection resolves as a spurious
        // Ready; the read loop re-fetches and decides.
        if !inner.readable || inner.epoch != this.epoch || !inner.buf.is_empty() {
            this.armed = false;
            return Poll::Ready(Ok(Readiness::Ready));
        }
        let Some(watcher) = &inner.watcher else {
            this.armed = false;
            return Poll::Ready(Ok(Readiness::Ready));
        };
        if let Some(readiness) = watcher.take_ready() {
            this.armed = false;
            return Poll::Ready(Ok(readiness));
        }
        if this.armed {
            watcher.update_waker(cx.waker());
        } else {
            watcher.arm(this.timeout, cx.waker())?;
            this.armed = true;
        }
        Poll::Pending
    }
}

impl Drop for ReadReady {
    fn drop(&mut self) {
        if self.armed {
            let inner = self.inner.lock();
            if inner.epoch == self.epoch {
                if let Some(watcher) = &inner.watcher {
                    watcher.cancel();
                }
            }
        }
    }
}
