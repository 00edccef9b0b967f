//! Opening sockets to destinations.
//!
//! The sender worker never constructs sockets itself. It asks a [`Connect`] implementation for a writable stream and
//! the local address the stream was bound to, which lets it detect self-connections and lets tests substitute
//! streams that fail on demand.

use std::{fmt, io, net::SocketAddr};

use futures::{future::BoxFuture, FutureExt};
use tokio::{io::AsyncWrite, net::TcpStream};

use crate::destination::Destination;

#[cfg(test)]
pub(crate) mod mock;

/// A boxed writable byte stream.
pub type BoxStream = Box<dyn AsyncWrite + Send + Unpin + 'static>;

/// A freshly opened stream along with the local address it is bound to.
pub struct Connected {
    /// The stream frames are written to.
    pub stream: BoxStream,
    /// The local end of the connection.
    pub local_addr: SocketAddr,
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Opens streams to destinations.
pub trait Connect: Send + Sync + 'static {
    /// Connects to `destination`.
    fn connect<'a>(&'a self, destination: &'a Destination) -> BoxFuture<'a, io::Result<Connected>>;
}

/// Connects over TCP using tokio.
#[derive(Clone, Copy, Debug)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    /// Creates a new TCP connector.
    ///
    /// When `nodelay` is set, Nagle's algorithm is disabled on every socket.
    pub const fn new(nodelay: bool) -> Self {
        TcpConnector { nodelay }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        TcpConnector::new(true)
    }
}

impl Connect for TcpConnector {
    fn connect<'a>(&'a self, destination: &'a Destination) -> BoxFuture<'a, io::Result<Connected>> {
        async move {
            let stream = TcpStream::connect(destination.socket_addr()).await?;
            stream.set_nodelay(self.nodelay)?;
            let local_addr = stream.local_addr()?;
            Ok(Connected {
                stream: Box::new(stream),
                local_addr,
            })
        }
        .boxed()
    }
}
