//! The remote endpoint a sender connection delivers to.

use std::{
    fmt,
    net::{AddrParseError, IpAddr, SocketAddr},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// A resolved network address and port identifying a remote transport endpoint.
///
/// Destinations are plain values: two destinations are the same endpoint when their address and port are equal.
/// They key the [`SenderRegistry`](crate::registry::SenderRegistry), so every handle targeting the same destination
/// shares a single connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Destination {
    address: IpAddr,
    port: u16,
}

impl Destination {
    /// Creates a new destination from an already resolved address and port.
    pub const fn new(address: IpAddr, port: u16) -> Self {
        Destination { address, port }
    }

    /// Returns the network address of the destination.
    pub const fn address(&self) -> IpAddr {
        self.address
    }

    /// Returns the port of the destination.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the destination as a socket address suitable for connecting.
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl From<SocketAddr> for Destination {
    fn from(addr: SocketAddr) -> Self {
        Destination::new(addr.ip(), addr.port())
    }
}

impl From<Destination> for SocketAddr {
    fn from(destination: Destination) -> Self {
        destination.socket_addr()
    }
}

impl FromStr for Destination {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Destination::from)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.socket_addr(), f)
    }
}
