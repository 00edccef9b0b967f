use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
};

use futures::{future::BoxFuture, FutureExt};
use tokio::io::AsyncWrite;

use crate::destination::Destination;

use super::{Connect, Connected};

/// An in-memory connector whose streams record what is written to them and misbehave on request.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    written: Mutex<Vec<u8>>,
    failing_writes: AtomicUsize,
    failing_flushes: AtomicUsize,
    stalled: AtomicBool,
    self_connect: AtomicBool,
    connects: AtomicUsize,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        MockConnector::default()
    }

    /// Fails the next `n` writes to any stream with a broken pipe.
    pub(crate) fn fail_writes(&self, n: usize) {
        self.inner.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fails the next `n` flushes of any stream. Buffered bytes still reach the stream first.
    pub(crate) fn fail_flushes(&self, n: usize) {
        self.inner.failing_flushes.store(n, Ordering::SeqCst);
    }

    /// Makes writes, flushes and shutdowns pend forever while set.
    pub(crate) fn stall(&self, stalled: bool) {
        self.inner.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Reports the destination itself as the local address of new streams.
    pub(crate) fn self_connect(&self, self_connect: bool) {
        self.inner.self_connect.store(self_connect, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.inner.written.lock().unwrap().clone()
    }
}

impl Connect for MockConnector {
    fn connect<'a>(&'a self, destination: &'a Destination) -> BoxFuture<'a, io::Result<Connected>> {
        async move {
            self.inner.connects.fetch_add(1, Ordering::SeqCst);
            let local_addr = if self.inner.self_connect.load(Ordering::SeqCst) {
                destination.socket_addr()
            } else {
                SocketAddr::new(destination.address(), destination.port().wrapping_add(1))
            };
            Ok(Connected {
                stream: Box::new(MockStream {
                    inner: self.inner.clone(),
                }),
                local_addr,
            })
        }
        .boxed()
    }
}

struct MockStream {
    inner: Arc<MockInner>,
}

impl MockStream {
    fn stalled(&self) -> bool {
        self.inner.stalled.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.stalled() {
            return Poll::Pending;
        }
        if MockStream::take_failure(&self.inner.failing_writes) {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        self.inner.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.stalled() {
            return Poll::Pending;
        }
        if MockStream::take_failure(&self.inner.failing_flushes) {
            return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.stalled() {
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }
}
