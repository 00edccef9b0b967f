//! The per-destination sender connection.
//!
//! A [`SenderConnection`] owns the queue for one [`Destination`] and the single worker task draining it. Any number
//! of [`SenderHandle`]s can be attached to it; the worker is spawned when the first handle attaches and stopped when
//! the last one detaches.
//!
//! # Worker lifecycle
//!
//! ```text
//!   attach (first)          dequeue / write             detach (last)
//! ┌──────────┐  started  ┌──────────────┐  running=false  ┌─────────┐
//! │ Starting ├──────────►│   Draining   ├────────────────►│ Stopped │
//! └──────────┘           └──┬────────▲──┘  + interrupt    └─────────┘
//!                 i/o error │        │ lazy reconnect
//!                           ▼        │ on next envelope
//!                        close socket, throttle warning
//! ```
//!
//! The socket lives inside the worker and is never touched by any other task. Producers only ever push envelopes
//! onto the unbounded queue, so sending never blocks. When the peer cannot keep up, the backlog is bounded by
//! shedding on the consumer side instead: once an envelope has been dequeued, it is dropped with
//! [`NotSentReason::Shed`](crate::error::NotSentReason::Shed) if more than
//! [`max_queued`](crate::config::SenderConfig::max_queued) envelopes are still waiting behind it.
//!
//! # Shutdown
//!
//! Detaching the last handle clears the worker's running flag and repeatedly interrupts it until it exits, for at
//! most [`shutdown_timeout`](crate::config::SenderConfig::shutdown_timeout). A worker that misses the deadline is
//! aborted and abandoned, its bounded wait guard is stopped, and [`DetachOutcome::Forced`] is returned. The caller is
//! never blocked past the deadline.
//!
//! Every worker generation gets its own running flag, interrupt and guard, so an abandoned worker that eventually
//! finishes can never disturb the one that replaced it.

mod stats;
mod throttle;
mod worker;

use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::stream::{AbortHandle, Abortable, Aborted};
use tokio::{
    sync::{mpsc, oneshot, Mutex, Notify},
    task::JoinHandle,
    time::Instant,
};
use tracing::{error, trace};

pub use stats::ConnectionStats;

use crate::{
    config::SenderConfig,
    connector::Connect,
    destination::Destination,
    envelope::Envelope,
    handle::SenderHandle,
    registry::SenderRegistry,
    wait::BoundedWait,
};

use self::worker::Worker;

static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(0);

const INTERRUPT_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct HandleId(u64);

impl HandleId {
    fn generate() -> Self {
        HandleId(HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The result of detaching a [`SenderHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetachOutcome {
    /// Other handles are still attached, so the worker keeps running.
    Attached {
        /// The number of handles still attached.
        remaining: usize,
    },
    /// The last handle detached and the worker stopped within the shutdown deadline.
    Stopped,
    /// The last handle detached but the worker missed the shutdown deadline and was abandoned.
    Forced,
}

pub(crate) struct Shared {
    max_queued: AtomicI64,
    write_timeout_millis: AtomicU64,
    stats: ConnectionStats,
}

impl Shared {
    fn max_queued(&self) -> Option<usize> {
        usize::try_from(self.max_queued.load(Ordering::Relaxed)).ok()
    }

    fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_millis.load(Ordering::Relaxed))
    }
}

struct Lifecycle {
    attached: HashSet<HandleId>,
    worker: Option<WorkerHandle>,
}

struct WorkerHandle {
    queue: mpsc::UnboundedSender<Envelope>,
    running: Arc<AtomicBool>,
    interrupt: Arc<Notify>,
    guard: Arc<BoundedWait>,
    task: JoinHandle<Result<(), Aborted>>,
    abort: AbortHandle,
}

/// The connection to one destination, shared by every [`SenderHandle`] targeting it.
pub struct SenderConnection {
    destination: Destination,
    connector: Arc<dyn Connect>,
    config: SenderConfig,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl SenderConnection {
    /// Creates a new connection to `destination`.
    ///
    /// Nothing is spawned or connected until the first handle is attached with [`attach`](SenderConnection::attach).
    pub fn new(destination: Destination, connector: Arc<dyn Connect>, config: SenderConfig) -> Arc<Self> {
        let shared = Arc::new(Shared {
            max_queued: AtomicI64::new(encode_max_queued(config.max_queued)),
            write_timeout_millis: AtomicU64::new(duration_millis(config.write_timeout)),
            stats: ConnectionStats::default(),
        });

        Arc::new(SenderConnection {
            destination,
            connector,
            config,
            shared,
            lifecycle: Mutex::new(Lifecycle {
                attached: HashSet::new(),
                worker: None,
            }),
        })
    }

    /// Attaches a new handle, starting the worker if this is the first one.
    pub async fn attach(self: &Arc<Self>) -> SenderHandle {
        self.attach_with(None).await
    }

    pub(crate) async fn attach_with(self: &Arc<Self>, registry: Option<SenderRegistry>) -> SenderHandle {
        let mut lifecycle = self.lifecycle.lock().await;

        let worker = match lifecycle.worker.take() {
            Some(worker) if !lifecycle.attached.is_empty() => worker,
            _ => self.start_worker().await,
        };
        let queue = worker.queue.clone();
        lifecycle.worker = Some(worker);

        let id = HandleId::generate();
        lifecycle.attached.insert(id);
        trace!(destination = %self.destination, attached = lifecycle.attached.len(), "sender handle attached");

        SenderHandle::new(id, queue, self.clone(), registry)
    }

    pub(crate) async fn detach(&self, id: HandleId) -> DetachOutcome {
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.attached.remove(&id);

        if !lifecycle.attached.is_empty() {
            let remaining = lifecycle.attached.len();
            trace!(destination = %self.destination, remaining, "sender handle detached");
            return DetachOutcome::Attached { remaining };
        }

        match lifecycle.worker.take() {
            Some(worker) => self.stop_worker(worker).await,
            None => DetachOutcome::Stopped,
        }
    }

    /// Interrupts whatever the worker is currently waiting on.
    ///
    /// An envelope held by the worker at that moment is completed with
    /// [`NotSentReason::Interrupted`](crate::error::NotSentReason::Interrupted) and the socket is closed if a frame may
    /// have been partially written. The worker keeps running. Does nothing if no worker is running.
    pub async fn interrupt(&self) {
        let lifecycle = self.lifecycle.lock().await;
        if let Some(worker) = &lifecycle.worker {
            worker.interrupt.notify_one();
        }
    }

    /// Returns the destination of this connection.
    pub fn destination(&self) -> Destination {
        self.destination
    }

    /// Returns the configuration this connection was created with.
    ///
    /// The write timeout and shedding threshold may since have been changed at runtime.
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Returns the counters of this connection.
    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }

    /// Returns the number of attached handles.
    pub async fn attached_count(&self) -> usize {
        self.lifecycle.lock().await.attached.len()
    }

    /// Returns `true` if a worker is running for this connection.
    pub async fn is_running(&self) -> bool {
        self.lifecycle
            .lock()
            .await
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
    }

    /// Returns the bound currently applied to connect, write and flush calls.
    pub fn write_timeout(&self) -> Duration {
        self.shared.write_timeout()
    }

    /// Changes the bound applied to connect, write and flush calls started from now on.
    pub fn set_write_timeout(&self, timeout: Duration) {
        self.shared
            .write_timeout_millis
            .store(duration_millis(timeout), Ordering::Relaxed);
    }

    /// Returns the backlog above which dequeued envelopes are shed.
    pub fn max_queued(&self) -> Option<usize> {
        self.shared.max_queued()
    }

    /// Changes the backlog above which dequeued envelopes are shed. `None` disables shedding.
    pub fn set_max_queued(&self, max_queued: Option<usize>) {
        self.shared
            .max_queued
            .store(encode_max_queued(max_queued), Ordering::Relaxed);
    }

    async fn start_worker(&self) -> WorkerHandle {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let interrupt = Arc::new(Notify::new());
        let guard = Arc::new(BoundedWait::new(self.shared.write_timeout()));
        let (started_tx, started_rx) = oneshot::channel();

        self.shared.stats.record_worker_started();

        let worker = Worker::new(
            self.destination,
            self.connector.clone(),
            self.shared.clone(),
            queue_rx,
            running.clone(),
            interrupt.clone(),
            guard.clone(),
            &self.config,
        );
        let (abort, abort_registration) = AbortHandle::new_pair();
        let task = tokio::spawn(Abortable::new(worker.run(started_tx), abort_registration));

        match tokio::time::timeout(self.config.startup_timeout, started_rx).await {
            Ok(Ok(())) => {
                trace!(destination = %self.destination, "sender worker started");
            }
            Ok(Err(_)) | Err(_) => {
                error!(
                    destination = %self.destination,
                    timeout = ?self.config.startup_timeout,
                    "failed to confirm the sender worker started"
                );
            }
        }

        WorkerHandle {
            queue,
            running,
            interrupt,
            guard,
            task,
            abort,
        }
    }

    async fn stop_worker(&self, worker: WorkerHandle) -> DetachOutcome {
        let WorkerHandle {
            queue,
            running,
            interrupt,
            guard,
            mut task,
            abort,
        } = worker;

        running.store(false, Ordering::Release);
        drop(queue);

        let deadline = Instant::now() + self.config.shutdown_timeout;
        loop {
            interrupt.notify_one();
            match tokio::time::timeout(INTERRUPT_INTERVAL, &mut task).await {
                Ok(_) => {
                    trace!(destination = %self.destination, "sender worker stopped");
                    return DetachOutcome::Stopped;
                }
                Err(_) if Instant::now() >= deadline => break,
                Err(_) => {}
            }
        }

        error!(
            destination = %self.destination,
            timeout = ?self.config.shutdown_timeout,
            "sender worker did not stop in time, abandoning it"
        );
        guard.stop();
        abort.abort();

        DetachOutcome::Forced
    }
}

impl fmt::Debug for SenderConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderConnection")
            .field("destination", &self.destination)
            .field("config", &self.config)
            .field("stats", &self.shared.stats)
            .finish_non_exhaustive()
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn encode_max_queued(max_queued: Option<usize>) -> i64 {
    match max_queued {
        Some(max) => i64::try_from(max).unwrap_or(i64::MAX),
        None => -1,
    }
}
