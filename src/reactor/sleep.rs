//! One-shot timer future.

use super::{Handle, TimerToken};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Future that completes once `after` has elapsed on the reactor's clock.
///
/// Cancel-safe: dropping the future before it fires releases the timer
/// with no other side effects.
pub struct Sleep {
    reactor: Handle,
    after: Duration,
    token: Option<TimerToken>,
}

impl std::fmt::Debug for Sleep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sleep")
            .field("after", &self.after)
            .field("scheduled", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl Sleep {
    /// Creates a sleep of `after` against `reactor`.
    ///
    /// The timer is scheduled lazily on first poll.
    #[must_use]
    pub fn new(reactor: &Handle, after: Duration) -> Self {
        Self {
            reactor: reactor.clone(),
            after,
            token: None,
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.after.is_zero() {
            return Poll::Ready(());
        }
        match self.token {
            None => {
                let token = self.reactor.add_timer(self.after, cx.waker());
                self.token = Some(token);
                Poll::Pending
            }
            Some(token) => {
                if self.reactor.timer_fired(token) {
                    self.token = None;
                    Poll::Ready(())
                } else {
                    self.reactor.update_timer_waker(token, cx.waker());
                    Poll::Pending
                }
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.reactor.cancel_timer(token);
        }
    }
}
