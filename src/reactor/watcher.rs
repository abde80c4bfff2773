//! Watcher handle over one descriptor and one direction.

use super::{Direction, Handle, Readiness, WatchToken};
use crate::error::Result;
use std::future::Future;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Readiness watcher for one descriptor in one direction.
///
/// Dropping a watcher releases its registration with the reactor. This is
/// the RAII edge that keeps cancelled operations from leaking watch slots
/// or receiving stale wakeups.
pub struct Watcher {
    reactor: Handle,
    token: WatchToken,
    fd: RawFd,
    direction: Direction,
}

impl Watcher {
    /// Registers a watcher for `fd` in `direction` with `reactor`.
    ///
    /// # Errors
    ///
    /// Fails `Failure` if the reactor cannot register the descriptor.
    pub fn new(reactor: &Handle, fd: RawFd, direction: Direction) -> Result<Self> {
        let token = reactor.add_watch(fd, direction)?;
        Ok(Self {
            reactor: reactor.clone(),
            token,
            fd,
            direction,
        })
    }

    /// Returns the watched descriptor.
    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Returns the watched direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Waits for one readiness event or deadline expiry.
    ///
    /// Arms the watcher on first poll; a new `listen` supersedes any prior
    /// arming. Dropping the future before it resolves disarms the watcher.
    pub fn listen(&self, timeout: Duration) -> Listen<'_> {
        Listen {
            watcher: self,
            timeout,
            armed: false,
        }
    }

    /// Disarms the watcher without waking it.
    pub fn cancel(&self) {
        self.reactor.cancel(self.token);
    }

    /// Returns true while an arming is outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.reactor.is_pending(self.token)
    }

    /// Resolves an outstanding arming with a spurious ready wakeup.
    pub(crate) fn interrupt(&self) {
        self.reactor.interrupt(self.token);
    }

    pub(crate) fn arm(&self, timeout: Duration, waker: &Waker) -> Result<()> {
        self.reactor.arm(self.token, timeout, waker)
    }

    pub(crate) fn update_waker(&self, waker: &Waker) {
        self.reactor.update_waker(self.token, waker);
    }

    pub(crate) fn take_ready(&self) -> Option<Readiness> {
        self.reactor.take_ready(self.token)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.reactor.remove_watch(self.token);
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("fd", &self.fd)
            .field("direction", &self.direction)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

/// Future for [`Watcher::listen`].
#[derive(Debug)]
pub struct Listen<'a> {
    watcher: &'a Watcher,
    timeout: Duration,
    armed: bool,
}

impl Future for Listen<'_> {
    type Output = Result<Readiness>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(readiness) = self.watcher.take_ready() {
            self.armed = false;
            return Poll::Ready(Ok(readiness));
        }
        if self.armed {
            self.watcher.update_waker(cx.waker());
        } else {
            self.watcher.arm(self.timeout, cx.waker())?;
            self.armed = true;
        }
        Poll::Pending
    }
}

impl Drop for Listen<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.watcher.cancel();
        }
    }
}
