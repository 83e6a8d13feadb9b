//! Transport boundary of the driver core.
//!
//! The wire codec and handshake protocol live behind the [`Connector`] seam;
//! topology discovery only sees the structured [`HandshakeReply`] record.
//! [`GrpcConnector`] is the production implementation over tonic channels.

mod connector;
mod hello;

pub use connector::*;
pub use hello::*;
