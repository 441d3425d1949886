//! Errors which can be observed by callers.
//!
//! Only two things can ever go wrong from the caller's point of view: the
//! remote host could not be resolved when the connection was created, or the
//! connection has already been closed. Everything that happens on the wire
//! after that is absorbed and turned into a reconnect.

use std::io;

use thiserror::Error;

/// Error returned when a host and port could not be turned into an address ring.
#[derive(Debug, Error)]
pub struct ResolutionError {
    host: Box<str>,
    port: u16,
    #[source]
    source: Option<io::Error>,
}

impl ResolutionError {
    pub(crate) fn new<H>(host: H, port: u16, source: io::Error) -> Self
    where
        H: Into<Box<str>>,
    {
        Self {
            host: host.into(),
            port,
            source: Some(source),
        }
    }

    /// The lookup succeeded but produced no usable endpoints.
    pub(crate) fn empty<H>(host: H, port: u16) -> Self
    where
        H: Into<Box<str>>,
    {
        Self {
            host: host.into(),
            port,
            source: None,
        }
    }

    pub(crate) fn msg<H>(host: H, port: u16) -> impl FnOnce(io::Error) -> Self
    where
        H: Into<Box<str>>,
    {
        move |error| Self::new(host, port, error)
    }

    /// The host which failed to resolve.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port which was requested.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the lookup succeeded but returned no addresses.
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
    }
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            Some(ref source) => write!(
                f,
                "failed to resolve {}:{}: {}",
                self.host, self.port, source
            ),
            None => write!(f, "no addresses found for {}:{}", self.host, self.port),
        }
    }
}

/// Connection error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The host could not be resolved when creating the connection.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The connection has been closed and can no longer be used.
    #[error("connection closed")]
    Closed,
}

impl Error {
    /// Whether this error was caused by a closed connection.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}
