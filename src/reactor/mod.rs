//! Readiness reactor interface consumed by the pipe streams.
//!
//! A [`Reactor`] multiplexes descriptor readiness and one-shot timers. Pipe
//! streams register a **watcher** per descriptor and direction; arming a
//! watcher asks for exactly one wakeup — readiness or deadline expiry,
//! whichever comes first. Memory streams use only the timer side for their
//! read timeouts.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       stream op (async)                   │
//! │   fetch/attempt ──not satisfied──▶ arm watcher, suspend   │
//! └───────────────┬───────────────────────────▲───────────────┘
//!                 │                           │ waker
//! ┌───────────────▼───────────────────────────┴───────────────┐
//! │                        Reactor                            │
//! │  ┌────────────┐  ┌────────────┐  ┌─────────────────────┐  │
//! │  │ watch slab │  │ timer slab │  │ OS poll (oneshot)   │  │
//! │  └────────────┘  └────────────┘  └─────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Contract
//!
//! - A watcher observes one descriptor in one direction ([`Direction`]).
//! - Arming is one-shot and not cumulative: a new arm supersedes any prior
//!   arming. The stored waker is woken at most once per arming, with the
//!   outcome retrievable through [`Reactor::take_ready`].
//! - [`Reactor::cancel`] disarms without waking; [`Reactor::interrupt`]
//!   resolves an armed watcher with a spurious [`Readiness::Ready`] so a
//!   parked operation re-inspects its stream (used by unshift, rebind, and
//!   close).
//! - [`Reactor::turn`] drives the reactor: it dispatches wakeups for ready
//!   descriptors, expired watcher deadlines, and due timers. The reactor is
//!   cooperative; callbacks (wakeups) never run reentrantly inside stream
//!   operations.

pub mod poll;
pub mod sleep;
mod slot;
pub mod timeout;
pub mod watcher;

pub use poll::PollReactor;
pub use sleep::Sleep;
pub use timeout::{timeout, Timeout};
pub use watcher::{Listen, Watcher};

use crate::error::Result;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::task::Waker;
use std::time::Duration;

/// Which readiness a watcher observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Wake when the descriptor has bytes to read (or EOF).
    Read,
    /// Wake when the descriptor will accept bytes.
    Write,
}

/// Outcome of one watcher arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The descriptor became ready (possibly spuriously; re-check and
    /// re-arm if the following I/O attempt would still block).
    Ready,
    /// The arming's deadline elapsed first.
    TimedOut,
}

/// Identifier of a registered watcher.
///
/// Tokens are generational: a token whose watcher has been removed never
/// matches a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken(pub(crate) slot::Token);

/// Identifier of a pending one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub(crate) slot::Token);

/// Shared handle to a reactor.
pub type Handle = Arc<dyn Reactor>;

/// Conversion of shared reactor instances into type-erased [`Handle`]s.
pub trait IntoHandle {
    /// Returns a shared [`Handle`] to this reactor.
    fn handle(&self) -> Handle;
}

impl<R: Reactor + 'static> IntoHandle for Arc<R> {
    fn handle(&self) -> Handle {
        let handle: Handle = self.clone();
        handle
    }
}

/// Descriptor-readiness and timer multiplexer.
///
/// Implementations must be safe to share behind an [`Arc`]; all methods
/// take `&self` and use interior mutability.
pub trait Reactor: Send + Sync {
    /// Registers a watcher for `fd` in `direction`.
    ///
    /// # Errors
    ///
    /// Fails `Failure` if the descriptor cannot be registered with the OS
    /// poller.
    fn add_watch(&self, fd: RawFd, direction: Direction) -> Result<WatchToken>;

    /// Arms `token`: `waker` is woken once, on readiness or — if `timeout`
    /// is non-zero — when the deadline elapses, whichever comes first.
    ///
    /// Supersedes any prior arming of the same watcher.
    ///
    /// # Errors
    ///
    /// Fails `Failure` if the token is stale or OS re-registration fails.
    fn arm(&self, token: WatchToken, timeout: Duration, waker: &Waker) -> Result<()>;

    /// Replaces the waker of an armed watcher. No-op when not armed.
    fn update_waker(&self, token: WatchToken, waker: &Waker);

    /// Consumes and returns the outcome of a fired arming, if any.
    fn take_ready(&self, token: WatchToken) -> Option<Readiness>;

    /// Disarms `token` without waking. No-op when not armed.
    fn cancel(&self, token: WatchToken);

    /// Resolves an armed `token` with a spurious [`Readiness::Ready`],
    /// waking its waker. No-op when not armed.
    fn interrupt(&self, token: WatchToken);

    /// Returns true while `token` is armed and has not fired.
    fn is_pending(&self, token: WatchToken) -> bool;

    /// Permanently releases `token`. Armed state is discarded unfired.
    fn remove_watch(&self, token: WatchToken);

    /// Schedules a one-shot timer `after` from now waking `waker`.
    fn add_timer(&self, after: Duration, waker: &Waker) -> TimerToken;

    /// Replaces the waker of a pending timer. No-op once fired or removed.
    fn update_timer_waker(&self, token: TimerToken, waker: &Waker);

    /// Returns true once the timer has fired, releasing it.
    fn timer_fired(&self, token: TimerToken) -> bool;

    /// Cancels a pending timer without waking.
    fn cancel_timer(&self, token: TimerToken);

    /// Waits for readiness or deadlines and dispatches wakeups.
    ///
    /// Blocks up to the nearest armed deadline, bounded additionally by
    /// `max_wait` when given. Returns the number of wakeups dispatched.
    ///
    /// # Errors
    ///
    /// Fails `Failure` on an OS polling error.
    fn turn(&self, max_wait: Option<Duration>) -> Result<usize>;

    /// Wakes a concurrently blocked [`turn`](Self::turn) call.
    fn notify(&self);

    /// Returns true while any watcher is armed or any timer is pending.
    fn has_armed(&self) -> bool;

    /// Returns the number of registered watchers (diagnostics).
    fn watch_count(&self) -> usize;
}
