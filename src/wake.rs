//! Single-shot wake handles for parked operations.
//!
//! A [`WakeSlot`] is the completion side of one parked read or write: the
//! parked future registers its waker each poll, and whichever event
//! releases the operation (bytes, a count, a timeout, a close) completes
//! the slot exactly once and wakes the task.

use crate::error::Result;
use std::task::Waker;

#[derive(Debug)]
pub(crate) enum WakeSlot<T> {
    /// Operation parked; waker refreshed on every poll.
    Waiting(Option<Waker>),
    /// Released; the result is taken exactly once by the parked future.
    Done(Option<Result<T>>),
}

impl<T> WakeSlot<T> {
    pub(crate) fn new() -> Self {
        Self::Waiting(None)
    }

    /// Completes the slot and wakes the parked task. A second completion
    /// is a no-op; the first outcome wins.
    pub(crate) fn complete(&mut self, result: Result<T>) {
        if let Self::Waiting(waker) = self {
            let waker = waker.take();
            *self = Self::Done(Some(result));
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }

    /// Stores the parked task's waker. No-op once completed.
    pub(crate) fn register(&mut self, waker: &Waker) {
        if let Self::Waiting(slot) = self {
            *slot = Some(waker.clone());
        }
    }

    /// Wakes the parked task without completing the slot.
    ///
    /// Used to hand the queue head role to the next parked writer.
    pub(crate) fn wake(&mut self) {
        if let Self::Waiting(waker) = self {
            if let Some(waker) = waker.take() {
                waker.wake();
            }
        }
    }

    /// Takes the completion result, if the slot has one.
    pub(crate) fn take(&mut self) -> Option<Result<T>> {
        match self {
            Self::Done(result) => result.take(),
            Self::Waiting(_) => None,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}
