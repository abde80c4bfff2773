//! Deadline wrapper for whole operations.
//!
//! Per-operation timeouts bound a single suspension; [`timeout`] bounds an
//! entire compound operation (a [`read_exact`](crate::compose::read_exact)
//! loop, a transfer, a handshake) with one deadline.

use super::{Handle, Sleep};
use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Bounds `future` by `after` on `reactor`'s clock.
///
/// Resolves with the future's output, or `TimedOut` once the deadline
/// elapses first. `Duration::ZERO` applies no bound. Cancel-safe:
/// dropping the wrapper drops the inner future and releases the timer.
pub fn timeout<F>(reactor: &Handle, after: Duration, future: F) -> Timeout<F>
where
    F: Future,
{
    Timeout {
        sleep: (!after.is_zero()).then(|| Sleep::new(reactor, after)),
        future,
    }
}

/// Future for [`timeout`].
#[derive(Debug)]
pub struct Timeout<F> {
    sleep: Option<Sleep>,
    future: F,
}

impl<F, T> Future for Timeout<F>
where
    F: Future<Output = Result<T>> + Unpin,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(output) = Pin::new(&mut this.future).poll(cx) {
            return Poll::Ready(output);
        }
        if let Some(sleep) = &mut this.sleep {
            if Pin::new(sleep).poll(cx).is_ready() {
                return Poll::Ready(Err(
                    Error::timed_out().with_context("operation deadline elapsed")
                ));
            }
        }
        Poll::Pending
    }
}
