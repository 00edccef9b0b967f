use std::{
    io,
    net::SocketAddr,
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::{
    io::{AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{self, error::TryRecvError},
        oneshot, Notify,
    },
};
use tracing::{debug, trace, warn};

use crate::{
    config::SenderConfig,
    connector::{BoxStream, Connect},
    destination::Destination,
    envelope::Envelope,
    error::NotSentReason,
    frame,
    wait::BoundedWait,
};

use super::{throttle::FailureThrottle, Shared};

/// Whether the local end of the current socket shares the destination's address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Locality {
    Unknown,
    Local,
    Remote,
}

impl Locality {
    pub(super) fn classify(local_addr: SocketAddr, destination: &Destination) -> Self {
        if local_addr.ip().to_canonical() == destination.address().to_canonical() {
            Locality::Local
        } else {
            Locality::Remote
        }
    }
}

enum Fault {
    Io(io::Error),
    Interrupted,
    Closed,
}

pub(super) struct Worker {
    destination: Destination,
    connector: Arc<dyn Connect>,
    shared: Arc<Shared>,
    queue: mpsc::UnboundedReceiver<Envelope>,
    running: Arc<AtomicBool>,
    interrupt: Arc<Notify>,
    guard: Arc<BoundedWait>,
    batching: bool,
    write_buffer_size: usize,
    stream: Option<BufWriter<BoxStream>>,
    locality: Locality,
    throttle: FailureThrottle,
}

impl Worker {
    pub(super) fn new(
        destination: Destination,
        connector: Arc<dyn Connect>,
        shared: Arc<Shared>,
        queue: mpsc::UnboundedReceiver<Envelope>,
        running: Arc<AtomicBool>,
        interrupt: Arc<Notify>,
        guard: Arc<BoundedWait>,
        config: &SenderConfig,
    ) -> Self {
        Worker {
            destination,
            connector,
            shared,
            queue,
            running,
            interrupt,
            guard,
            batching: config.batching,
            write_buffer_size: config.write_buffer_size,
            stream: None,
            locality: Locality::Unknown,
            throttle: FailureThrottle::default(),
        }
    }

    pub(super) async fn run(mut self, started: oneshot::Sender<()>) {
        let _ = started.send(());

        while self.running.load(Ordering::Acquire) {
            if self.drain_one().await.is_break() {
                break;
            }
        }

        self.shutdown().await;
    }

    async fn drain_one(&mut self) -> ControlFlow<()> {
        let interrupt = self.interrupt.clone();
        let mut held = None;

        let res = tokio::select! {
            biased;
            _ = interrupt.notified() => Err(Fault::Interrupted),
            res = self.process(&mut held) => res,
        };

        match res {
            Ok(()) => ControlFlow::Continue(()),
            Err(Fault::Io(err)) => {
                self.shared.stats.record_io_failure();
                if let Some(envelope) = held.take() {
                    self.shared.stats.record_failed();
                    envelope.not_sent(NotSentReason::Io);
                }
                self.close();
                if self.throttle.record_failure(self.queue.len()) {
                    warn!(
                        destination = %self.destination,
                        error = %err,
                        "destination appears to no longer be taking messages, further failures may be suppressed for a while"
                    );
                }
                ControlFlow::Continue(())
            }
            Err(Fault::Interrupted) => {
                if let Some(envelope) = held.take() {
                    // The frame may be half written.
                    self.close();
                    self.shared.stats.record_interrupted();
                    envelope.not_sent(NotSentReason::Interrupted);
                }
                if self.running.load(Ordering::Acquire) {
                    warn!(destination = %self.destination, "sending was interrupted while the connection is still running");
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            }
            Err(Fault::Closed) => ControlFlow::Break(()),
        }
    }

    async fn process(&mut self, held: &mut Option<Envelope>) -> Result<(), Fault> {
        let envelope = held.insert(self.dequeue().await?);
        let tag = envelope.tag();
        let payload = envelope.payload().clone();
        let shared = self.shared.clone();

        self.connect().await.map_err(Fault::Io)?;

        if let Some(max_queued) = shared.max_queued() {
            if self.queue.len() > max_queued {
                if let Some(envelope) = held.take() {
                    shared.stats.record_shed();
                    envelope.not_sent(NotSentReason::Shed);
                }
                return Ok(());
            }
        }

        let batching = self.batching;
        let Some(stream) = self.stream.as_mut() else {
            return Err(Fault::Io(io::ErrorKind::NotConnected.into()));
        };
        self.guard
            .run_within(shared.write_timeout(), async move {
                frame::write_frame(&mut *stream, tag, &payload).await?;
                if !batching {
                    stream.flush().await?;
                }
                io::Result::Ok(())
            })
            .await
            .map_err(Fault::Io)?;

        self.throttle.record_success();
        if let Some(envelope) = held.take() {
            shared.stats.record_sent();
            envelope.sent();
        }

        Ok(())
    }

    async fn dequeue(&mut self) -> Result<Envelope, Fault> {
        if self.batching {
            match self.queue.try_recv() {
                Ok(envelope) => return Ok(envelope),
                Err(TryRecvError::Disconnected) => return Err(Fault::Closed),
                Err(TryRecvError::Empty) => {
                    if let Some(stream) = self.stream.as_mut() {
                        self.guard
                            .run_within(self.shared.write_timeout(), stream.flush())
                            .await
                            .map_err(Fault::Io)?;
                    }
                }
            }
        }

        self.queue.recv().await.ok_or(Fault::Closed)
    }

    async fn connect(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let connected = self
            .guard
            .run_within(
                self.shared.write_timeout(),
                self.connector.connect(&self.destination),
            )
            .await?;
        self.shared.stats.record_connect();

        // A connection from this host to a free port in the ephemeral range can be assigned that same port as its
        // local port, and then "succeeds" without any listener. Writes to such a socket vanish.
        if self.locality == Locality::Unknown {
            self.locality = Locality::classify(connected.local_addr, &self.destination);
        }
        if self.locality == Locality::Local && connected.local_addr.port() == self.destination.port() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("connection to {} is connected to itself", self.destination),
            ));
        }

        debug!(destination = %self.destination, local_addr = %connected.local_addr, "connected");
        self.stream = Some(BufWriter::with_capacity(
            self.write_buffer_size,
            connected.stream,
        ));

        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(destination = %self.destination, "closed connection");
        }
        self.locality = Locality::Unknown;
    }

    async fn shutdown(mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = self
                .guard
                .run_within(self.shared.write_timeout(), stream.shutdown())
                .await
            {
                debug!(destination = %self.destination, error = %err, "failed to flush connection while stopping");
            }
        }
        self.guard.stop();
        self.locality = Locality::Unknown;

        self.queue.close();
        while let Ok(envelope) = self.queue.try_recv() {
            self.shared.stats.record_shutdown();
            envelope.not_sent(NotSentReason::Shutdown);
        }

        trace!(destination = %self.destination, "sender worker exiting");
    }
}
