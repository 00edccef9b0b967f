//! Sharing one connection per destination between handles.

use std::{collections::HashMap, fmt, sync::Arc};

use tokio::sync::Mutex;
use tracing::trace;

use crate::{
    config::SenderConfig,
    connection::SenderConnection,
    connector::{Connect, TcpConnector},
    destination::Destination,
    handle::SenderHandle,
};

/// Hands out [`SenderHandle`]s, creating at most one [`SenderConnection`] per destination.
///
/// A connection is removed from the registry once its last handle detaches, and a new one is created the next time
/// a handle for its destination is requested.
///
/// Cloning a registry is cheap and every clone refers to the same set of connections.
#[derive(Clone)]
pub struct SenderRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    connector: Arc<dyn Connect>,
    config: SenderConfig,
    connections: Mutex<HashMap<Destination, Arc<SenderConnection>>>,
}

impl SenderRegistry {
    /// Creates a new registry connecting over TCP.
    pub fn new(config: SenderConfig) -> Self {
        let connector = TcpConnector::new(config.nodelay);
        SenderRegistry::with_connector(connector, config)
    }

    /// Creates a new registry opening streams with a custom connector.
    pub fn with_connector(connector: impl Connect, config: SenderConfig) -> Self {
        SenderRegistry {
            inner: Arc::new(RegistryInner {
                connector: Arc::new(connector),
                config,
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the configuration used for new connections.
    pub fn config(&self) -> &SenderConfig {
        &self.inner.config
    }

    /// Attaches a new handle to the connection for `destination`, creating the connection if needed.
    ///
    /// Attaching can wait on the worker starting or stopping. Requests for other destinations are not held up
    /// meanwhile.
    pub async fn sender(&self, destination: impl Into<Destination>) -> SenderHandle {
        let destination = destination.into();
        loop {
            let connection = self
                .inner
                .connections
                .lock()
                .await
                .entry(destination)
                .or_insert_with(|| {
                    trace!(%destination, "creating sender connection");
                    SenderConnection::new(
                        destination,
                        self.inner.connector.clone(),
                        self.inner.config.clone(),
                    )
                })
                .clone();

            let handle = connection.attach_with(Some(self.clone())).await;

            let mut connections = self.inner.connections.lock().await;
            match connections.get(&destination) {
                Some(current) if Arc::ptr_eq(current, &connection) => return handle,
                // Released while we were attaching; the new handle keeps it alive again.
                None => {
                    connections.insert(destination, connection);
                    return handle;
                }
                Some(_) => {}
            }
            drop(connections);

            trace!(%destination, "sender connection was replaced while attaching, retrying");
            handle.stop().await;
        }
    }

    /// Returns the live connection for `destination`, if any.
    pub async fn connection(&self, destination: &Destination) -> Option<Arc<SenderConnection>> {
        self.inner.connections.lock().await.get(destination).cloned()
    }

    /// Returns the number of live connections.
    pub async fn len(&self) -> usize {
        self.inner.connections.lock().await.len()
    }

    /// Returns `true` if there are no live connections.
    pub async fn is_empty(&self) -> bool {
        self.inner.connections.lock().await.is_empty()
    }

    pub(crate) async fn release(&self, connection: &Arc<SenderConnection>) {
        let mut connections = self.inner.connections.lock().await;
        let destination = connection.destination();
        let Some(current) = connections.get(&destination) else {
            return;
        };
        // A handle may have been attached again since the last one detached.
        if Arc::ptr_eq(current, connection) && connection.attached_count().await == 0 {
            connections.remove(&destination);
            trace!(%destination, "removed sender connection");
        }
    }
}

impl fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderRegistry")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
