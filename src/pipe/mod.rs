//! Non-blocking descriptor streams driven by the reactor.
//!
//! Pipe streams wrap pipe- or socket-like descriptors configured
//! non-blocking; regular files are unsupported. Reads and writes attempt
//! the syscall first and park on a readiness watcher when the kernel
//! reports it would block.
//!
//! Descriptor ownership: each stream half holds a shared [`PipeFd`]; the
//! descriptor closes when the last half releases it (so a duplex pair
//! keeps the fd alive until both directions are done). The `auto_close`
//! policy decides whether releasing actually closes the OS descriptor.

pub mod duplex;
pub mod read;
pub mod stdio;
pub mod write;

pub use duplex::DuplexPipe;
pub use read::ReadablePipe;
pub use stdio::{rebind_stdio, stderr, stdin, stdout};
pub use write::WritablePipe;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::File;
use std::future::Future;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::io::{AsRawFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Batch size for non-blocking reads and writes, and the read size when a
/// caller passes `len == 0`.
pub const CHUNK_SIZE: usize = 8192;

/// Owned descriptor with an auto-close policy.
///
/// I/O goes through a [`File`] wrapper so the raw `read(2)`/`write(2)`
/// calls stay in safe code; the wrapper works for any pipe- or
/// socket-like descriptor on Unix.
#[derive(Debug)]
pub(crate) struct PipeFd {
    raw: RawFd,
    auto_close: bool,
    file: Mutex<Option<File>>,
}

impl PipeFd {
    pub(crate) fn new(fd: OwnedFd, auto_close: bool) -> Self {
        let raw = fd.as_raw_fd();
        Self {
            raw,
            auto_close,
            file: Mutex::new(Some(File::from(fd))),
        }
    }

    pub(crate) fn raw(&self) -> RawFd {
        self.raw
    }

    /// Single non-blocking read, retrying only on EINTR.
    pub(crate) fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let guard = self.file.lock();
        let Some(file) = guard.as_ref() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "descriptor released",
            ));
        };
        loop {
            match (&mut &*file).read(buf) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }

    /// Single non-blocking write, retrying only on EINTR.
    pub(crate) fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let guard = self.file.lock();
        let Some(file) = guard.as_ref() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "descriptor released",
            ));
        };
        loop {
            match (&mut &*file).write(buf) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }
}

impl Drop for PipeFd {
    fn drop(&mut self) {
        if !self.auto_close {
            if let Some(file) = self.file.get_mut().take() {
                // The descriptor is borrowed from elsewhere (stdio); leak
                // the wrapper instead of closing it.
                std::mem::forget(file);
            }
        }
    }
}

/// FIFO turn-taking gate serializing reads on one pipe.
///
/// A read issued while another is in flight waits its turn; turns are
/// granted strictly in arrival order. Dropping a waiting acquire leaves
/// the queue intact for the others.
#[derive(Debug, Default)]
pub(crate) struct Serial {
    state: Mutex<SerialState>,
}

#[derive(Debug, Default)]
struct SerialState {
    locked: bool,
    next_id: u64,
    waiters: VecDeque<(u64, Option<Waker>)>,
}

impl Serial {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn acquire(self: &Arc<Self>) -> Acquire {
        Acquire {
            serial: self.clone(),
            id: None,
            acquired: false,
        }
    }
}

pub(crate) struct Acquire {
    serial: Arc<Serial>,
    id: Option<u64>,
    acquired: bool,
}

impl Future for Acquire {
    type Output = SerialGuard;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.serial.state.lock();
        match this.id {
            None => {
                if !state.locked && state.waiters.is_empty() {
                    state.locked = true;
                    this.acquired = true;
                    return Poll::Ready(SerialGuard {
                        serial: this.serial.clone(),
                    });
                }
                let id = state.next_id;
                state.next_id += 1;
                state.waiters.push_back((id, Some(cx.waker().clone())));
                this.id = Some(id);
                Poll::Pending
            }
            Some(id) => {
                if !state.locked && state.waiters.front().map(|(i, _)| *i) == Some(id) {
                    state.waiters.pop_front();
                    state.locked = true;
                    this.acquired = true;
                    return Poll::Ready(SerialGuard {
                        serial: this.serial.clone(),
                    });
                }
                if let Some(entry) = state.waiters.iter_mut().find(|(i, _)| *i == id) {
                    entry.1 = Some(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        if self.acquired {
            return;
        }
        if let Some(id) = self.id {
            let mut state = self.serial.state.lock();
            state.waiters.retain(|(i, _)| *i != id);
            // If we were at the front, hand the turn onwards.
            if !state.locked {
                if let Some((_, Some(waker))) = state.waiters.front() {
                    waker.wake_by_ref();
                }
            }
        }
    }
}

pub(crate) struct SerialGuard {
    serial: Arc<Serial>,
}

impl Drop for SerialGuard {
    fn drop(&mut self) {
        let mut state = self.serial.state.lock();
        state.locked = false;
        if let Some((_, Some(waker))) = state.waiters.front() {
            waker.wake_by_ref();
        }
    }
}
