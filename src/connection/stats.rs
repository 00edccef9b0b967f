use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what a sender connection has done since it was created.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    sent: AtomicU64,
    shed: AtomicU64,
    failed: AtomicU64,
    interrupted: AtomicU64,
    shutdown: AtomicU64,
    io_failures: AtomicU64,
    connects: AtomicU64,
    workers_started: AtomicU64,
}

impl ConnectionStats {
    /// Envelopes written to the socket.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Envelopes dropped because of backlog.
    pub fn shed(&self) -> u64 {
        self.shed.load(Ordering::Relaxed)
    }

    /// Envelopes not sent because connecting or writing failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Envelopes not sent because the worker was interrupted while holding them.
    pub fn interrupted(&self) -> u64 {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Envelopes still queued when the worker stopped.
    pub fn shutdown(&self) -> u64 {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Connect, write or flush failures, including flushes with no envelope at stake.
    pub fn io_failures(&self) -> u64 {
        self.io_failures.load(Ordering::Relaxed)
    }

    /// Sockets successfully opened.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Workers spawned.
    pub fn workers_started(&self) -> u64 {
        self.workers_started.load(Ordering::Relaxed)
    }

    pub(super) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_shed(&self) {
        self.shed.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_shutdown(&self) {
        self.shutdown.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_io_failure(&self) {
        self.io_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_worker_started(&self) {
        self.workers_started.fetch_add(1, Ordering::Relaxed);
    }
}
