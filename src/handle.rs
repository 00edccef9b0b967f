//! Producer facing handles to sender connections.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::warn;

use crate::{
    connection::{DetachOutcome, HandleId, SenderConnection},
    destination::Destination,
    envelope::{Envelope, Receipt},
    error::NotSentReason,
    registry::SenderRegistry,
};

/// A lightweight reference to the [`SenderConnection`] for a destination.
///
/// Many handles can share one connection. Sending never blocks: envelopes are pushed onto the connection's queue and
/// completed later by its worker.
///
/// A handle should be released with [`stop`](SenderHandle::stop). A handle that is simply dropped detaches itself in
/// a background task on the current tokio runtime.
pub struct SenderHandle {
    id: HandleId,
    queue: mpsc::UnboundedSender<Envelope>,
    connection: Arc<SenderConnection>,
    registry: Option<SenderRegistry>,
    detached: bool,
}

impl SenderHandle {
    pub(crate) fn new(
        id: HandleId,
        queue: mpsc::UnboundedSender<Envelope>,
        connection: Arc<SenderConnection>,
        registry: Option<SenderRegistry>,
    ) -> Self {
        SenderHandle {
            id,
            queue,
            connection,
            registry,
            detached: false,
        }
    }

    /// Returns the destination this handle sends to.
    pub fn destination(&self) -> Destination {
        self.connection.destination()
    }

    /// Returns the connection this handle is attached to.
    pub fn connection(&self) -> &Arc<SenderConnection> {
        &self.connection
    }

    /// Queues an envelope for sending.
    ///
    /// If the worker has already gone away, the envelope is completed immediately with
    /// [`NotSentReason::Shutdown`].
    pub fn send(&self, envelope: Envelope) {
        if let Err(mpsc::error::SendError(envelope)) = self.queue.send(envelope) {
            envelope.not_sent(NotSentReason::Shutdown);
        }
    }

    /// Queues a payload for sending, returning a [`Receipt`] resolving to its outcome.
    pub fn send_bytes(&self, tag: u8, payload: impl Into<Bytes>) -> Receipt {
        let (envelope, receipt) = Envelope::with_receipt(tag, payload);
        self.send(envelope);
        receipt
    }

    /// Detaches this handle from its connection.
    ///
    /// If this was the last attached handle, the worker is stopped and the socket closed.
    pub async fn stop(mut self) -> DetachOutcome {
        self.detached = true;
        detach(self.id, self.connection.clone(), self.registry.take()).await
    }
}

impl Drop for SenderHandle {
    fn drop(&mut self) {
        if self.detached {
            return;
        }

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(detach(
                    self.id,
                    self.connection.clone(),
                    self.registry.take(),
                ));
            }
            Err(_) => {
                warn!(
                    destination = %self.connection.destination(),
                    "sender handle dropped outside of a tokio runtime, it stays attached"
                );
            }
        }
    }
}

impl fmt::Debug for SenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderHandle")
            .field("id", &self.id)
            .field("destination", &self.destination())
            .finish_non_exhaustive()
    }
}

async fn detach(
    id: HandleId,
    connection: Arc<SenderConnection>,
    registry: Option<SenderRegistry>,
) -> DetachOutcome {
    let outcome = connection.detach(id).await;
    if let Some(registry) = registry {
        if !matches!(outcome, DetachOutcome::Attached { .. }) {
            registry.release(&connection).await;
        }
    }
    outcome
}
