//! OS-poller-backed reactor.
//!
//! [`PollReactor`] implements [`Reactor`] over [`polling::Poller`]
//! (epoll/kqueue underneath). The poller's oneshot delivery matches the
//! watcher contract directly: each arming translates to one interest
//! registration, cleared when the event fires.
//!
//! One descriptor may carry watchers in both directions (the duplex pipe
//! does), while the OS poller accepts a single registration per
//! descriptor. The reactor therefore merges per-direction armings into one
//! interest union per descriptor and refreshes the union whenever a
//! watcher arms, cancels, fires, or is removed.

use super::slot::Slab;
use super::{Direction, Readiness, Reactor, TimerToken, WatchToken};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use polling::{Event, Poller};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::task::Waker;
use std::time::{Duration, Instant};

#[derive(Debug)]
enum Phase {
    Idle,
    Armed {
        deadline: Option<Instant>,
        waker: Waker,
    },
    Fired(Readiness),
}

#[derive(Debug)]
struct WatchEntry {
    fd: RawFd,
    direction: Direction,
    phase: Phase,
}

#[derive(Debug)]
struct TimerEntry {
    deadline: Instant,
    waker: Waker,
    fired: bool,
}

#[derive(Debug, Default)]
struct FdWatchers {
    read: Vec<WatchToken>,
    write: Vec<WatchToken>,
}

impl FdWatchers {
    fn tokens(&self, direction: Direction) -> &Vec<WatchToken> {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    fn tokens_mut(&mut self, direction: Direction) -> &mut Vec<WatchToken> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }
}

#[derive(Debug, Default)]
struct State {
    watches: Slab<WatchEntry>,
    timers: Slab<TimerEntry>,
    fds: HashMap<RawFd, FdWatchers>,
}

/// Reactor over the OS poller, with a one-shot timer queue.
pub struct PollReactor {
    poller: Poller,
    state: Mutex<State>,
}

impl PollReactor {
    /// Creates a reactor.
    ///
    /// # Errors
    ///
    /// Fails `Failure` if the OS poller cannot be created.
    pub fn new() -> Result<Arc<Self>> {
        let poller = Poller::new().map_err(Error::failure)?;
        Ok(Arc::new(Self {
            poller,
            state: Mutex::new(State::default()),
        }))
    }

    /// Recomputes the interest union for `fd` and pushes it to the poller.
    ///
    /// Errors are swallowed for descriptors that have disappeared under
    /// us; the watchers fail on their next arm instead.
    fn refresh_fd(&self, state: &State, fd: RawFd) {
        let Some(watchers) = state.fds.get(&fd) else {
            return;
        };
        let armed = |tokens: &Vec<WatchToken>| {
            tokens.iter().any(|t| {
                matches!(
                    state.watches.get(t.0).map(|w| &w.phase),
                    Some(Phase::Armed { .. })
                )
            })
        };
        let interest = Event {
            key: fd_key(fd),
            readable: armed(&watchers.read),
            writable: armed(&watchers.write),
        };
        if let Err(e) = self.poller.modify(fd, interest) {
            tracing::trace!(fd, error = %e, "poller modify failed");
        }
    }

    fn fire(state: &mut State, token: WatchToken, readiness: Readiness) -> bool {
        let Some(entry) = state.watches.get_mut(token.0) else {
            return false;
        };
        match &entry.phase {
            Phase::Armed { waker, .. } => {
                waker.wake_by_ref();
                entry.phase = Phase::Fired(readiness);
                true
            }
            Phase::Idle | Phase::Fired(_) => false,
        }
    }

    /// Nearest armed watcher or pending timer deadline.
    fn next_deadline(state: &State) -> Option<Instant> {
        let watch = state
            .watches
            .iter()
            .filter_map(|(_, w)| match w.phase {
                Phase::Armed { deadline, .. } => deadline,
                _ => None,
            })
            .min();
        let timer = state
            .timers
            .iter()
            .filter(|(_, t)| !t.fired)
            .map(|(_, t)| t.deadline)
            .min();
        match (watch, timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

fn fd_key(fd: RawFd) -> usize {
    usize::try_from(fd).unwrap_or_default()
}

impl Reactor for PollReactor {
    fn add_watch(&self, fd: RawFd, direction: Direction) -> Result<WatchToken> {
        let mut state = self.state.lock();
        if !state.fds.contains_key(&fd) {
            self.poller
                .add(fd, Event {
                    key: fd_key(fd),
                    readable: false,
                    writable: false,
                })
                .map_err(Error::failure)?;
            state.fds.insert(fd, FdWatchers::default());
        }
        let token = WatchToken(state.watches.insert(WatchEntry {
            fd,
            direction,
            phase: Phase::Idle,
        }));
        state
            .fds
            .get_mut(&fd)
            .expect("fd registered above")
            .tokens_mut(direction)
            .push(token);
        tracing::trace!(fd, ?direction, "watcher registered");
        Ok(token)
    }

    fn arm(&self, token: WatchToken, timeout: Duration, waker: &Waker) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .watches
            .get_mut(token.0)
            .ok_or_else(|| Error::new(crate::error::ErrorKind::Failure).with_context("stale watch token"))?;
        let fd = entry.fd;
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        entry.phase = Phase::Armed {
            deadline,
            waker: waker.clone(),
        };
        self.refresh_fd(&state, fd);
        drop(state);
        // A blocked turn() must recompute its deadline for the new arming.
        self.notify();
        Ok(())
    }

    fn update_waker(&self, token: WatchToken, waker: &Waker) {
        let mut state = self.state.lock();
        if let Some(entry) = state.watches.get_mut(token.0) {
            if let Phase::Armed { waker: slot, .. } = &mut entry.phase {
                slot.clone_from(waker);
            }
        }
    }

    fn take_ready(&self, token: WatchToken) -> Option<Readiness> {
        let mut state = self.state.lock();
        let entry = state.watches.get_mut(token.0)?;
        if let Phase::Fired(readiness) = entry.phase {
            entry.phase = Phase::Idle;
            return Some(readiness);
        }
        None
    }

    fn cancel(&self, token: WatchToken) {
        let mut state = self.state.lock();
        if let Some(entry) = state.watches.get_mut(token.0) {
            if matches!(entry.phase, Phase::Armed { .. }) {
                let fd = entry.fd;
                entry.phase = Phase::Idle;
                self.refresh_fd(&state, fd);
            }
        }
    }

    fn interrupt(&self, token: WatchToken) {
        let mut state = self.state.lock();
        let fd = match state.watches.get(token.0) {
            Some(entry) if matches!(entry.phase, Phase::Armed { .. }) => entry.fd,
            _ => return,
        };
        Self::fire(&mut state, token, Readiness::Ready);
        self.refresh_fd(&state, fd);
    }

    fn is_pending(&self, token: WatchToken) -> bool {
        let state = self.state.lock();
        matches!(
            state.watches.get(token.0).map(|w| &w.phase),
            Some(Phase::Armed { .. })
        )
    }

    fn remove_watch(&self, token: WatchToken) {
        let mut state = self.state.lock();
        let Some(entry) = state.watches.remove(token.0) else {
            return;
        };
        let fd = entry.fd;
        if let Some(watchers) = state.fds.get_mut(&fd) {
            watchers.tokens_mut(entry.direction).retain(|t| *t != token);
            if watchers.is_empty() {
                state.fds.remove(&fd);
                if let Err(e) = self.poller.delete(fd) {
                    tracing::trace!(fd, error = %e, "poller delete failed");
                }
                return;
            }
        }
        self.refresh_fd(&state, fd);
    }

    fn add_timer(&self, after: Duration, waker: &Waker) -> TimerToken {
        let mut state = self.state.lock();
        let token = TimerToken(state.timers.insert(TimerEntry {
            deadline: Instant::now() + after,
            waker: waker.clone(),
            fired: false,
        }));
        drop(state);
        self.notify();
        token
    }

    fn update_timer_waker(&self, token: TimerToken, waker: &Waker) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timers.get_mut(token.0) {
            if !timer.fired {
                timer.waker.clone_from(waker);
            }
        }
    }

    fn timer_fired(&self, token: TimerToken) -> bool {
        let mut state = self.state.lock();
        match state.timers.get(token.0) {
            Some(timer) if timer.fired => {
                state.timers.remove(token.0);
                true
            }
            Some(_) => false,
            // A missing entry can only be a fired-and-released timer.
            None => true,
        }
    }

    fn cancel_timer(&self, token: TimerToken) {
        let mut state = self.state.lock();
        state.timers.remove(token.0);
    }

    fn turn(&self, max_wait: Option<Duration>) -> Result<usize> {
        let deadline = Self::next_deadline(&self.state.lock());
        let now = Instant::now();
        let until_deadline = deadline.map(|d| d.saturating_duration_since(now));
        let wait = match (until_deadline, max_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut events = Vec::new();
        match self.poller.wait(&mut events, wait) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::failure(e)),
        }

        let mut state = self.state.lock();
        let mut woken = 0;
        let mut touched: Vec<RawFd> = Vec::new();

        for event in &events {
            let fd = event.key as RawFd;
            let Some(watchers) = state.fds.get(&fd) else {
                continue;
            };
            let mut fired: Vec<WatchToken> = Vec::new();
            if event.readable {
                fired.extend(watchers.tokens(Direction::Read).iter().copied());
            }
            if event.writable {
                fired.extend(watchers.tokens(Direction::Write).iter().copied());
            }
            for token in fired {
                if Self::fire(&mut state, token, Readiness::Ready) {
                    woken += 1;
                }
            }
            touched.push(fd);
        }

        // Expire armed watchers whose deadline has passed.
        let now = Instant::now();
        let expired: Vec<(WatchToken, RawFd)> = state
            .watches
            .iter()
            .filter_map(|(token, w)| match w.phase {
                Phase::Armed {
                    deadline: Some(d), ..
                } if d <= now => Some((WatchToken(token), w.fd)),
                _ => None,
            })
            .collect();
        for (token, fd) in expired {
            if Self::fire(&mut state, token, Readiness::TimedOut) {
                woken += 1;
            }
            touched.push(fd);
        }

        for (_, timer) in state.timers.iter_mut() {
            if !timer.fired && timer.deadline <= now {
                timer.fired = true;
                timer.waker.wake_by_ref();
                woken += 1;
            }
        }

        touched.sort_unstable();
        touched.dedup();
        for fd in touched {
            self.refresh_fd(&state, fd);
        }
        if woken > 0 {
            tracing::trace!(woken, "reactor turn dispatched wakeups");
        }
        Ok(woken)
    }

    fn notify(&self) {
        if let Err(e) = self.poller.notify() {
            tracing::trace!(error = %e, "poller notify failed");
        }
    }

    fn has_armed(&self) -> bool {
        let state = self.state.lock();
        state
            .watches
            .iter()
            .any(|(_, w)| matches!(w.phase, Phase::Armed { .. }))
            || state.timers.iter().any(|(_, t)| !t.fired)
    }

    fn watch_count(&self) -> usize {
        self.state.lock().watches.len()
    }
}

impl std::fmt::Debug for PollReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PollReactor")
            .field("watches", &state.watches.len())
            .field("timers", &state.timers.len())
            .finish_non_exhaustive()
    }
}
