//! Defines error handling constructs for courier.
//!
//! Socket failures are reported as [`std::io::Error`] throughout the crate, since they never escape the sender
//! worker and only decide which completion callback an envelope receives. The types here cover the remaining cases:
//! why an envelope was not sent, and why a byte stream could not be decoded as frames.

use std::{error, fmt, io};

/// The reason an envelope was completed without being written to the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotSentReason {
    /// The envelope was dropped because the backlog behind it exceeded the configured threshold.
    Shed,
    /// Connecting, writing or flushing failed. The socket has been discarded and will be reopened on the next send.
    Io,
    /// The worker was interrupted while holding the envelope.
    Interrupted,
    /// The connection was shutting down, or had already shut down, when the envelope was queued.
    Shutdown,
    /// The envelope was dropped before the worker could process it, for example because the worker was aborted.
    Discarded,
}

impl fmt::Display for NotSentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotSentReason::Shed => write!(f, "shed due to backlog"),
            NotSentReason::Io => write!(f, "i/o failure"),
            NotSentReason::Interrupted => write!(f, "interrupted"),
            NotSentReason::Shutdown => write!(f, "connection shut down"),
            NotSentReason::Discarded => write!(f, "discarded"),
        }
    }
}

/// Error returned when decoding frames from a byte stream.
#[derive(Debug)]
pub enum FrameError {
    /// The 16 bit length field held a negative value other than the large payload escape.
    InvalidShortLength(i16),
    /// The 32 bit length field of a large payload was negative.
    InvalidLongLength(i32),
    /// The frame announced a payload longer than the decoder accepts.
    TooLarge {
        /// The announced payload length.
        len: usize,
        /// The largest payload length accepted.
        max: usize,
    },
    /// The stream ended in the middle of a frame.
    Truncated,
    /// Reading from the underlying stream failed.
    Io(io::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidShortLength(len) => write!(f, "invalid frame length {len}"),
            FrameError::InvalidLongLength(len) => write!(f, "invalid large frame length {len}"),
            FrameError::TooLarge { len, max } => {
                write!(f, "frame payload of {len} bytes exceeds the limit of {max} bytes")
            }
            FrameError::Truncated => write!(f, "stream ended in the middle of a frame"),
            FrameError::Io(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl error::Error for FrameError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            FrameError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(err)
        }
    }
}

impl From<FrameError> for io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => err,
            FrameError::Truncated => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            err => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}
