#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod config;
pub mod connection;
pub mod connector;
pub mod destination;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handle;
pub mod registry;
pub mod wait;

pub use config::SenderConfig;
pub use connection::{ConnectionStats, DetachOutcome, SenderConnection};
pub use connector::{Connect, TcpConnector};
pub use destination::Destination;
pub use envelope::{Delivery, Envelope, Receipt};
pub use error::NotSentReason;
pub use handle::SenderHandle;
pub use registry::SenderRegistry;
pub use wait::BoundedWait;
