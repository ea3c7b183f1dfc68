//! Timeout guard.
//!
//! [`race`] is a logical timeout: when the deadline wins, the body future is
//! merely no longer polled by the caller. If the body is a spawned task (the
//! dispatcher always passes `&mut JoinHandle`), the task keeps running and may
//! still mutate shared state after `TimedOut` has been reported. Callers that
//! need the work to stop must signal it separately (the dispatcher cancels the
//! run's `CancellationToken`).

use std::future::Future;
use std::time::Duration;

/// Result of racing a body against its deadline.
#[derive(Debug, PartialEq, Eq)]
pub enum Race<T> {
    Settled(T),
    TimedOut,
}

impl<T> Race<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Race::TimedOut)
    }
}

/// Return the body's output if it settles within `timeout`, otherwise `TimedOut`.
pub async fn race<F>(body: F, timeout: Duration) -> Race<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        out = body => Race::Settled(out),
        _ = tokio::time::sleep(timeout) => Race::TimedOut,
    }
}
