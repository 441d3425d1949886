//! Resocket
//!
//! Stream connections that quietly put themselves back together.
//!
//! A [`Connection`] behaves much like a datagram socket layered over a
//! reliable stream: sends are fire-and-forget, receives never block, and any
//! failure after the connection has been created is absorbed and turned into
//! a reconnect to the next address the host resolved to. Resolution failure
//! when creating the connection is the only error callers ever see.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod policy;
pub mod resolve;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionBuilder, Received, State};
pub use endpoint::{AddressRing, Endpoint};
pub use error::{Error, ResolutionError};
pub use policy::{ReconnectPolicy, Silent};

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
