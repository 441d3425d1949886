//! Reconnect policies.
//!
//! Every failure after a connection has been created is absorbed and turned
//! into a reconnect. A [`ReconnectPolicy`] is told about each absorbed
//! failure before the reconnect happens. It cannot change what happens next,
//! but it decides what, if anything, is recorded about it.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::endpoint::Endpoint;

/// The step at which an absorbed failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Stage {
    /// Opening a new socket for the endpoint.
    Open,

    /// Switching the new socket into non-blocking mode.
    NonBlocking,

    /// Binding or connecting the new socket.
    Connect,

    /// Writing a payload to the installed socket.
    Send,

    /// Reading from the installed socket.
    Receive,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Open => f.write_str("open"),
            Stage::NonBlocking => f.write_str("set_nonblocking"),
            Stage::Connect => f.write_str("connect"),
            Stage::Send => f.write_str("send"),
            Stage::Receive => f.write_str("receive"),
        }
    }
}

/// A failure that was absorbed by the connection.
#[derive(Debug)]
pub struct Failure<'a> {
    stage: Stage,
    endpoint: &'a Endpoint,
    error: &'a io::Error,
}

impl<'a> Failure<'a> {
    pub(crate) fn new(stage: Stage, endpoint: &'a Endpoint, error: &'a io::Error) -> Self {
        Self {
            stage,
            endpoint,
            error,
        }
    }

    /// Where the failure happened.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The endpoint that was current when the failure happened.
    pub fn endpoint(&self) -> &'a Endpoint {
        self.endpoint
    }

    /// The underlying error.
    pub fn error(&self) -> &'a io::Error {
        self.error
    }
}

impl fmt::Display for Failure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {} failed: {}", self.stage, self.endpoint, self.error)
    }
}

/// Decides how absorbed failures are handled.
///
/// Implementations must not block; they are called inline from
/// `send` and `receive`.
pub trait ReconnectPolicy: fmt::Debug + Send + Sync {
    /// Called once for every absorbed failure, before the connection moves on.
    fn on_failure(&self, failure: &Failure<'_>);
}

impl<P> ReconnectPolicy for Arc<P>
where
    P: ReconnectPolicy + ?Sized,
{
    fn on_failure(&self, failure: &Failure<'_>) {
        (**self).on_failure(failure)
    }
}

impl<P> ReconnectPolicy for Box<P>
where
    P: ReconnectPolicy + ?Sized,
{
    fn on_failure(&self, failure: &Failure<'_>) {
        (**self).on_failure(failure)
    }
}

/// The default policy: failures are hidden from the caller and only show up
/// as `debug` level tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent {
    _priv: (),
}

impl Silent {
    /// Create a new silent policy.
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl ReconnectPolicy for Silent {
    fn on_failure(&self, failure: &Failure<'_>) {
        tracing::debug!(
            stage = %failure.stage(),
            endpoint = %failure.endpoint(),
            error = %failure.error(),
            "connection failure absorbed"
        );
    }
}
