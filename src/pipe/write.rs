//! Non-blocking writable stream over a descriptor.

use super::{PipeFd, CHUNK_SIZE};
use crate::error::{Error, ErrorKind, Result};
use crate::reactor::{Direction, Handle, Readiness, Watcher};
use crate::stream::{FdStream, Stream, WriteStream};
use crate::wake::WakeSlot;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::os::fd::OwnedFd;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Queued write: the remaining bytes, what was already accepted, the
/// arming deadline used while this ticket heads the queue, and the wake
/// handle releasing the parked writer.
#[derive(Debug)]
struct Ticket {
    data: Vec<u8>,
    written: usize,
    timeout: Duration,
    await_only: bool,
    state: WakeSlot<usize>,
}

#[derive(Debug)]
pub(crate) struct WriteInner {
    fd: Option<Arc<PipeFd>>,
    raw: RawFd,
    watcher: Option<Watcher>,
    epoch: u64,
    open: bool,
    writable: bool,
    queue: VecDeque<Arc<Mutex<Ticket>>>,
    fail: Option<Error>,
}

impl WriteInner {
    fn unwritable_now(&self) -> Error {
        match &self.fail {
            Some(cause) => Error::unwritable().with_context(cause.to_string()),
            None => Error::unwritable(),
        }
    }

    fn enqueue(
        &mut self,
        data: Vec<u8>,
        written: usize,
        timeout: Duration,
        await_only: bool,
    ) -> Arc<Mutex<Ticket>> {
        let ticket = Arc::new(Mutex::new(Ticket {
            data,
            written,
            timeout,
            await_only,
            state: WakeSlot::new(),
        }));
        self.queue.push_back(ticket.clone());
        ticket
    }

    fn is_head(&self, ticket: &Arc<Mutex<Ticket>>) -> bool {
        self.queue.front().is_some_and(|t| Arc::ptr_eq(t, ticket))
    }

    /// Wakes the next queued writer so it takes over the head role.
    fn promote(&mut self) {
        if let Some(next) = self.queue.front() {
            next.lock().state.wake();
        }
    }

    /// Frees the stream: every queued ticket resolves `Closed` (carrying
    /// the cause), the watcher and descriptor are released.
    pub(crate) fn shutdown(&mut self, cause: Option<Error>) {
        if !self.open {
            return;
        }
        tracing::debug!(
            fd = self.raw,
            queued = self.queue.len(),
            cause = cause.is_some(),
            "writable pipe closing"
        );
        self.open = false;
        self.writable = false;
        let closed = match &cause {
            Some(c) if c.kind() == ErrorKind::Closed => c.clone(),
            Some(c) => Error::closed().with_context(c.to_string()),
            None => Error::closed(),
        };
        self.fail = cause;
        self.epoch += 1;
        for ticket in self.queue.drain(..) {
            ticket.lock().state.complete(Err(closed.clone()));
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.interrupt();
        }
        self.fd = None;
    }
}

/// Non-blocking writable stream over a pipe- or socket-like descriptor.
///
/// The descriptor must already be non-blocking. A write with an empty
/// queue attempts one non-blocking `write(2)` of up to [`CHUNK_SIZE`]
/// bytes immediately; anything the kernel does not accept is queued as a
/// ticket and completed from the head of the queue as readiness arrives.
/// Writes behind other writes always queue, so completion order is
/// submission order and a later write never overtakes an earlier one.
///
/// The arming deadline is always the head ticket's timeout. A head
/// timeout or a write error frees the stream: the failing ticket gets the
/// specific error, every ticket behind it resolves `Closed`.
#[derive(Debug, Clone)]
pub struct WritablePipe {
    inner: Arc<Mutex<WriteInner>>,
}

impl WritablePipe {
    /// Takes ownership of `fd` and registers it with `handle`.
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
        let watcher = Watcher::new(handle, raw, Direction::Write)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(WriteInner {
                fd: Some(fd),
                raw,
                watcher: Some(watcher),
                epoch: 0,
                open: true,
                writable: true,
                queue: VecDeque::new(),
                fail: None,
            })),
        })
    }

    /// Resolves with `0` once the descriptor is write-ready and every
    /// write queued ahead has drained — the explicit backpressure-empty
    /// signal.
    ///
    /// # Errors
    ///
    /// `Unwritable` on an ended or closed stream; `TimedOut` if the
    /// deadline elapses while this ticket heads the queue (which frees
    /// the stream, like any head timeout).
    pub async fn await_ready(&self, timeout: Duration) -> Result<usize> {
        let ticket = {
            let mut inner = self.inner.lock();
            if !inner.writable {
                return Err(inner.unwritable_now());
            }
            inner.enqueue(Vec::new(), 0, timeout, true)
        };
        self.drive(ticket).await
    }

    async fn send(&self, data: &[u8], timeout: Duration, end: bool) -> Result<usize> {
        let ticket = {
            let mut inner = self.inner.lock();
            if !inner.writable {
                return Err(inner.unwritable_now());
            }
            if end {
                // Reject further writes immediately, before completion.
                inner.writable = false;
            }
            if inner.queue.is_empty() {
                let fd = match inner.fd.clone() {
                    Some(fd) => fd,
                    None => return Err(inner.unwritable_now()),
                };
                let attempt = data.len().min(CHUNK_SIZE);
                match fd.write(&data[..attempt]) {
                    Ok(n) if n == data.len() => {
                        if end {
                            inner.shutdown(None);
                        }
                        return Ok(data.len());
                    }
                    Ok(n) => inner.enqueue(data[n..].to_vec(), n, timeout, false),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        inner.enqueue(data.to_vec(), 0, timeout, false)
                    }
                    Err(e) => {
                        let err = Error::failure(e);
                        inner.shutdown(Some(err.clone()));
                        return Err(err);
                    }
                }
            } else {
                // Never pre-write behind a queued ticket; ordering first.
                inner.enqueue(data.to_vec(), 0, timeout, false)
            }
        };
        let result = self.drive(ticket).await;
        if end {
            self.inner.lock().shutdown(None);
        }
        result
    }

    /// Completes `ticket`: waits behind the queue, performs the head I/O,
    /// and hands the head role onwards.
    async fn drive(&self, ticket: Arc<Mutex<Ticket>>) -> Result<usize> {
        let mut guard = CancelGuard {
            inner: self.inner.clone(),
            ticket: ticket.clone(),
            active: true,
        };
        let result = loop {
            match (TicketTurn {
                inner: self.inner.clone(),
                ticket: ticket.clone(),
            })
            .await
            {
                Turn::Done(result) => break result,
                Turn::Head => {}
            }
            let epoch = self.inner.lock().epoch;
            let event = match (HeadReady {
                inner: self.inner.clone(),
                ticket: ticket.clone(),
                epoch,
                armed: false,
            })
            .await
            {
                Ok(event) => event,
                Err(err) => {
                    // Watcher arming failed; nothing can complete this
                    // ticket any more.
                    let mut inner = self.inner.lock();
                    inner.queue.retain(|t| !Arc::ptr_eq(t, &ticket));
                    ticket.lock().state.complete(Err(err.clone()));
                    inner.shutdown(Some(err.clone()));
                    break Err(err);
                }
            };
            match event {
                HeadEvent::Done(result) => break result,
                HeadEvent::TimedOut => {
                    let err = Error::timed_out();
                    let mut inner = self.inner.lock();
                    inner.queue.retain(|t| !Arc::ptr_eq(t, &ticket));
                    ticket.lock().state.complete(Err(err.clone()));
                    inner.shutdown(Some(err.clone()));
                    break Err(err);
                }
                HeadEvent::Ready => {
                    let mut inner = self.inner.lock();
                    if !inner.open || inner.epoch != epoch || !inner.is_head(&ticket) {
                        continue;
                    }
                    let Some(fd) = inner.fd.clone() else {
                        continue;
                    };
                    let mut t = ticket.lock();
                    if t.await_only {
                        let count = t.written;
                        t.state.complete(Ok(count));
                        drop(t);
                        inner.queue.pop_front();
                        inner.promote();
                        break Ok(count);
                    }
                    let attempt = t.data.len().min(CHUNK_SIZE);
                    match fd.write(&t.data[..attempt]) {
                        Ok(n) => {
                            t.written += n;
                            t.data.drain(..n);
                            if t.data.is_empty() {
                                let total = t.written;
                                t.state.complete(Ok(total));
                                drop(t);
                                inner.queue.pop_front();
                                inner.promote();
                                break Ok(total);
                            }
                            // Partial write: keep the head, re-arm.
                            tracing::trace!(
                                fd = inner.raw,
                                accepted = n,
                                remaining = t.data.len(),
                                "partial pipe write"
                            );
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(e) => {
                            let err = Error::failure(e);
                            t.state.complete(Err(err.clone()));
                            drop(t);
                            inner.queue.pop_front();
                            inner.shutdown(Some(err.clone()));
                            break Err(err);
                        }
                    }
                }
            }
        };
        guard.active = false;
        result
    }
}

impl Stream for WritablePipe {
    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn close(&self) {
        self.inner.lock().shutdown(None);
    }
}

impl WriteStream for WritablePipe {
    async fn write(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        self.send(data, timeout, false).await
    }

    async fn end(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        self.send(data, timeout, true).await
    }

    fn is_writable(&self) -> bool {
        self.inner.lock().writable
    }
}

impl FdStream for WritablePipe {
    fn resource(&self) -> RawFd {
        self.inner.lock().raw
    }

    fn rebind(&self, handle: &Handle) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(inner.unwritable_now());
        }
        let fresh = Watcher::new(handle, inner.raw, Direction::Write)?;
        if let Some(old) = inner.watcher.take() {
            old.interrupt();
        }
        inner.watcher = Some(fresh);
        inner.epoch += 1;
        Ok(())
    }
}

enum Turn {
    Done(Result<usize>),
    Head,
}

/// Parks until the ticket completes or reaches the head of the queue.
struct TicketTurn {
    inner: Arc<Mutex<WriteInner>>,
    ticket: Arc<Mutex<Ticket>>,
}

impl Future for TicketTurn {
    type Output = Turn;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let inner = this.inner.lock();
        let mut ticket = this.ticket.lock();
        if ticket.state.is_done() {
            let result = ticket
                .state
                .take()
                .unwrap_or_else(|| Err(Error::closed()));
            return Poll::Ready(Turn::Done(result));
        }
        if inner.is_head(&this.ticket) {
            return Poll::Ready(Turn::Head);
        }
        ticket.state.register(cx.waker());
        Poll::Pending
    }
}

enum HeadEvent {
    Done(Result<usize>),
    Ready,
    TimedOut,
}

/// Head-of-queue wait: readiness, deadline, or completion by a closer.
struct HeadReady {
    inner: Arc<Mutex<WriteInner>>,
    ticket: Arc<Mutex<Ticket>>,
    epoch: u64,
    armed: bool,
}

impl Future for HeadReady {
    type Output = Result<HeadEvent>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let inner = this.inner.lock();
        let mut ticket = this.ticket.lock();
        if ticket.state.is_done() {
            this.armed = false;
            let result = ticket
                .state
                .take()
                .unwrap_or_else(|| Err(Error::closed()));
            return Poll::Ready(Ok(HeadEvent::Done(result)));
        }
        if inner.epoch != this.epoch {
            this.armed = false;
            return Poll::Ready(Ok(HeadEvent::Ready));
        }
        let Some(watcher) = &inner.watcher else {
            this.armed = false;
            return Poll::Ready(Ok(HeadEvent::Ready));
        };
        if let Some(readiness) = watcher.take_ready() {
            this.armed = false;
            return Poll::Ready(Ok(match readiness {
                Readiness::Ready => HeadEvent::Ready,
                Readiness::TimedOut => HeadEvent::TimedOut,
            }));
        }
        // Completion by close() releases this task through the ticket, so
        // the waker must be registered in both places.
        ticket.state.register(cx.waker());
        if this.armed {
            watcher.update_waker(cx.waker());
        } else {
            watcher.arm(ticket.timeout, cx.waker())?;
            this.armed = true;
        }
        Poll::Pending
    }
}

impl Drop for HeadReady {
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

/// Cancellation of a pending write frees the stream.
///
/// Dropping an incomplete write future resolves its ticket `Closed` and
/// shuts the stream down with that cause, failing everything queued
/// behind it. A completed ticket defuses the guard.
struct CancelGuard {
    inner: Arc<Mutex<WriteInner>>,
    ticket: Arc<Mutex<Ticket>>,
    active: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let mut inner = self.inner.lock();
        if self.ticket.lock().state.is_done() {
            return;
        }
        let cause = Error::closed().with_context("pending write cancelled");
        inner.queue.retain(|t| !Arc::ptr_eq(t, &self.ticket));
        self.ticket.lock().state.complete(Err(cause.clone()));
        inner.shutdown(Some(cause));
    }
}
