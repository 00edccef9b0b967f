//! Bounds on socket operations that could otherwise hang on a half-open connection.

use std::{
    future::Future,
    io,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use tokio::sync::Notify;

/// Bounds the duration of connect, write and flush calls.
///
/// Each call to [`run`](BoundedWait::run) begins a bound and ends it when the wrapped future completes. If the
/// future is still pending when the timeout elapses, it is dropped and the call fails with
/// [`io::ErrorKind::TimedOut`], so a stalled peer surfaces as an ordinary I/O failure.
///
/// [`stop`](BoundedWait::stop) cancels every bound in flight immediately and makes later calls fail until the guard
/// is [`reset`](BoundedWait::reset). It is used when a worker has to be torn down forcibly.
#[derive(Debug)]
pub struct BoundedWait {
    timeout_millis: AtomicU64,
    stopped: AtomicBool,
    stop: Notify,
}

impl BoundedWait {
    /// Creates a new guard bounding operations to `timeout`.
    pub fn new(timeout: Duration) -> Self {
        BoundedWait {
            timeout_millis: AtomicU64::new(duration_millis(timeout)),
            stopped: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    /// Returns the current bound.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis.load(Ordering::Relaxed))
    }

    /// Changes the bound applied to operations started from now on.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_millis
            .store(duration_millis(timeout), Ordering::Relaxed);
    }

    /// Runs `fut` under the bound.
    pub async fn run<F, T>(&self, fut: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        self.run_within(self.timeout(), fut).await
    }

    /// Runs `fut` bounded by `timeout` instead of the guard's own bound.
    ///
    /// The call is still cancelled by [`stop`](BoundedWait::stop).
    pub async fn run_within<F, T>(&self, timeout: Duration, fut: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        let stopped = self.stop.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();

        if self.is_stopped() {
            return Err(stopped_error());
        }

        tokio::select! {
            biased;
            _ = stopped => Err(stopped_error()),
            res = tokio::time::timeout(timeout, fut) => match res {
                Ok(res) => res,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("operation did not complete within {timeout:?}"),
                )),
            },
        }
    }

    /// Cancels every bound in flight and fails all later ones until [`reset`](BoundedWait::reset) is called.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop.notify_waiters();
    }

    /// Re-arms a stopped guard.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    /// Returns `true` if the guard has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn stopped_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "bounded wait was stopped")
}
