//! Units of work queued for transmission.
//!
//! An [`Envelope`] carries an already serialized payload, the one byte sequence tag written in front of it, and the
//! means to report the outcome back to the producer. The sender worker completes every envelope exactly once: either
//! the `on_sent` callback runs after the frame was written, or the `on_not_sent` callback runs with a
//! [`NotSentReason`]. Producers that prefer awaiting over callbacks can use [`Envelope::with_receipt`].
//!
//! Completion callbacks run on the sender worker, not on the producer's task, and should return quickly.

use std::{
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::error;

use crate::error::NotSentReason;

type OnSent = Box<dyn FnOnce() + Send + 'static>;
type OnNotSent = Box<dyn FnOnce(NotSentReason) + Send + 'static>;

/// The outcome of an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// The frame was handed to the socket.
    Sent,
    /// The envelope was completed without being written.
    NotSent(NotSentReason),
}

impl Delivery {
    /// Returns `true` if the envelope was sent.
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

enum Completion {
    Callbacks {
        on_sent: Option<OnSent>,
        on_not_sent: Option<OnNotSent>,
    },
    Receipt(oneshot::Sender<Delivery>),
}

/// A payload queued for a destination, together with its completion callbacks.
///
/// If an envelope is dropped before the worker completed it, the `on_not_sent` callback runs from the destructor with
/// [`NotSentReason::Discarded`].
pub struct Envelope {
    tag: u8,
    payload: Bytes,
    completion: Option<Completion>,
}

impl Envelope {
    /// Creates a new envelope without completion callbacks.
    pub fn new(tag: u8, payload: impl Into<Bytes>) -> Self {
        Envelope {
            tag,
            payload: payload.into(),
            completion: None,
        }
    }

    /// Creates a new envelope along with a [`Receipt`] resolving to its outcome.
    pub fn with_receipt(tag: u8, payload: impl Into<Bytes>) -> (Self, Receipt) {
        let (tx, rx) = oneshot::channel();
        let envelope = Envelope {
            tag,
            payload: payload.into(),
            completion: Some(Completion::Receipt(tx)),
        };
        (envelope, Receipt { rx })
    }

    /// Sets the callback invoked once the frame has been written.
    ///
    /// Replaces a receipt created with [`Envelope::with_receipt`].
    pub fn on_sent<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        match &mut self.completion {
            Some(Completion::Callbacks { on_sent, .. }) => *on_sent = Some(Box::new(f)),
            completion => {
                *completion = Some(Completion::Callbacks {
                    on_sent: Some(Box::new(f)),
                    on_not_sent: None,
                })
            }
        }
        self
    }

    /// Sets the callback invoked when the envelope is completed without being written.
    ///
    /// Replaces a receipt created with [`Envelope::with_receipt`].
    pub fn on_not_sent<F>(mut self, f: F) -> Self
    where
        F: FnOnce(NotSentReason) + Send + 'static,
    {
        match &mut self.completion {
            Some(Completion::Callbacks { on_not_sent, .. }) => *on_not_sent = Some(Box::new(f)),
            completion => {
                *completion = Some(Completion::Callbacks {
                    on_sent: None,
                    on_not_sent: Some(Box::new(f)),
                })
            }
        }
        self
    }

    /// Returns the sequence tag.
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub(crate) fn sent(mut self) {
        self.complete(Delivery::Sent);
    }

    pub(crate) fn not_sent(mut self, reason: NotSentReason) {
        self.complete(Delivery::NotSent(reason));
    }

    fn complete(&mut self, delivery: Delivery) {
        let Some(completion) = self.completion.take() else {
            return;
        };

        let res = panic::catch_unwind(AssertUnwindSafe(move || match completion {
            Completion::Callbacks {
                on_sent,
                on_not_sent,
            } => match delivery {
                Delivery::Sent => {
                    if let Some(f) = on_sent {
                        f();
                    }
                }
                Delivery::NotSent(reason) => {
                    if let Some(f) = on_not_sent {
                        f(reason);
                    }
                }
            },
            Completion::Receipt(tx) => {
                let _ = tx.send(delivery);
            }
        }));
        if res.is_err() {
            error!(tag = self.tag, ?delivery, "envelope completion callback panicked");
        }
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        self.complete(Delivery::NotSent(NotSentReason::Discarded));
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("tag", &self.tag)
            .field("len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// A future resolving to the [`Delivery`] of an envelope created with [`Envelope::with_receipt`].
#[derive(Debug)]
pub struct Receipt {
    rx: oneshot::Receiver<Delivery>,
}

impl Receipt {
    /// Returns the delivery if the envelope has already been completed.
    pub fn try_delivery(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(delivery) => Some(delivery),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Delivery::NotSent(NotSentReason::Discarded))
            }
        }
    }
}

impl Future for Receipt {
    type Output = Delivery;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Delivery::NotSent(NotSentReason::Discarded)))
    }
}
