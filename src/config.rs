//! Configuration for sender connections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration shared by every sender connection created from a [`SenderRegistry`](crate::registry::SenderRegistry).
///
/// Durations are (de)serialized as whole milliseconds. Missing fields take their default values.
///
/// ```
/// use std::time::Duration;
///
/// use courier::SenderConfig;
///
/// let config = SenderConfig::default()
///     .with_write_timeout(Duration::from_secs(2))
///     .with_max_queued(Some(10_000))
///     .with_batching(true);
/// assert!(config.batching);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Bound applied to connect, write and flush calls.
    #[serde(rename = "write_timeout_millis", with = "millis")]
    pub write_timeout: Duration,

    /// Backlog above which dequeued envelopes are shed instead of sent.
    ///
    /// `None` never sheds.
    pub max_queued: Option<usize>,

    /// Defer flushing until the queue runs empty instead of flushing after every frame.
    pub batching: bool,

    /// Capacity of the buffer in front of each socket.
    pub write_buffer_size: usize,

    /// How long attaching the first handle waits for the worker to report it has started.
    #[serde(rename = "startup_timeout_millis", with = "millis")]
    pub startup_timeout: Duration,

    /// How long detaching the last handle waits for the worker to stop before abandoning it.
    #[serde(rename = "shutdown_timeout_millis", with = "millis")]
    pub shutdown_timeout: Duration,

    /// Disable Nagle's algorithm on TCP sockets.
    pub nodelay: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            write_timeout: Duration::from_secs(10),
            max_queued: None,
            batching: false,
            write_buffer_size: 1024 * 1024,
            startup_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(3),
            nodelay: true,
        }
    }
}

impl SenderConfig {
    /// Sets the bound applied to connect, write and flush calls.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the backlog above which envelopes are shed.
    pub fn with_max_queued(mut self, max_queued: Option<usize>) -> Self {
        self.max_queued = max_queued;
        self
    }

    /// Enables or disables batching.
    pub fn with_batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    /// Sets the capacity of the buffer in front of each socket.
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Sets how long the first attach waits for the worker to start.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Sets how long the last detach waits for the worker to stop.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enables or disables `TCP_NODELAY`.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
