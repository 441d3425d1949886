//! Self-healing stream connections.
//!
//! A [`Connection`] owns an [`AddressRing`] and at most one socket. Sends and
//! receives go straight to that socket. When one of them fails for any reason
//! other than "no data yet", the connection performs exactly one reconnect
//! step: it closes the socket, advances the ring by one endpoint, and issues a
//! single non-blocking connect to it. The failed call reports nothing useful
//! (a send is dropped, a receive returns [`Received::Reconnected`]) and the
//! caller simply tries again later.
//!
//! Handshake completion is never awaited or polled. A dead endpoint is only
//! noticed when the next operation against it fails, which moves the
//! connection on to the next endpoint.
//!
//! # Example
//! ```no_run
//! use resocket::{Connection, Received};
//!
//! # fn run() -> Result<(), resocket::Error> {
//! let mut conn = Connection::connect("localhost", 4321)?;
//! conn.send(b"hello")?;
//!
//! let mut buf = [0u8; 1024];
//! match conn.receive(&mut buf)? {
//!     Received::Data(n) => println!("got {:?}", &buf[..n]),
//!     Received::WouldBlock => {}
//!     Received::Reconnected => {}
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io::{self, Read as _};
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::Socket;
use tracing::trace;

use crate::config::ConnectionConfig;
use crate::endpoint::{AddressRing, Endpoint};
use crate::error::Error;
use crate::policy::{Failure, ReconnectPolicy, Silent, Stage};
use crate::resolve::{GaiResolver, Resolve};

/// The outcome of [`Connection::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// This many bytes, always more than zero, were read into the buffer.
    Data(usize),

    /// No data is available right now. The connection is untouched.
    WouldBlock,

    /// The read failed or the peer closed the stream. The socket was
    /// replaced and nothing was read.
    Reconnected,
}

impl Received {
    /// The number of bytes read, if any.
    pub fn len(&self) -> Option<usize> {
        match self {
            Received::Data(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether this call triggered a reconnect.
    pub fn is_reconnected(&self) -> bool {
        matches!(self, Received::Reconnected)
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// A socket is installed. Its handshake may still be in flight, or it
    /// may already be broken; only the next operation will tell.
    HandleInstalled,

    /// The last reconnect step failed synchronously and left no socket.
    /// The next operation will move on to the next endpoint.
    NoHandle,

    /// The connection was closed and can no longer be used.
    Closed,
}

#[derive(Debug)]
struct Inner {
    socket: Option<Socket>,
    ring: AddressRing,
}

/// A point-to-point stream connection which reconnects itself.
///
/// All operations are non-blocking. Mutating operations take `&mut self`, so
/// a connection can be moved between threads but only ever used by one at a
/// time.
pub struct Connection {
    inner: Option<Inner>,
    config: ConnectionConfig,
    policy: Arc<dyn ReconnectPolicy>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Connection");
        dbg.field("state", &self.state());
        if let Some(endpoint) = self.endpoint() {
            dbg.field("endpoint", &crate::DebugLiteral(endpoint));
        }
        dbg.field("policy", &self.policy).finish()
    }
}

impl Connection {
    /// Resolve `host` and connect to the first endpoint it resolves to.
    ///
    /// Resolution failure is the only error this can return. The initial
    /// connect attempt may itself fail; that is absorbed like any other
    /// failure and shows up as [`State::NoHandle`].
    pub fn connect(host: &str, port: u16) -> Result<Self, Error> {
        Self::builder().connect(host, port)
    }

    /// Build a connection over an already resolved ring.
    pub fn from_ring(ring: AddressRing) -> Self {
        Self::builder().from_ring(ring)
    }

    /// Configure a new connection.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Write all of `payload` to the current socket, or drop it.
    ///
    /// If the write fails, or writes fewer bytes than `payload` holds, the
    /// payload is discarded and the connection performs one reconnect step.
    /// The caller cannot tell the two apart. The only error is
    /// [`Error::Closed`].
    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        let inner = self.inner.as_mut().ok_or(Error::Closed)?;

        let result = match inner.socket {
            Some(ref socket) => send_all(socket, payload),
            None => Err(not_installed()),
        };

        if let Err(error) = result {
            self.policy
                .on_failure(&Failure::new(Stage::Send, inner.ring.current(), &error));
            inner.reconnect(&self.config, &*self.policy);
        }

        Ok(())
    }

    /// Read whatever is available into `buf`.
    ///
    /// An empty `buf` returns [`Received::WouldBlock`] without touching the
    /// socket.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<Received, Error> {
        let inner = self.inner.as_mut().ok_or(Error::Closed)?;

        if buf.is_empty() {
            return Ok(Received::WouldBlock);
        }

        let error = match inner.socket {
            Some(ref socket) => match read(socket, buf) {
                Ok(0) => io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the stream"),
                Ok(n) => return Ok(Received::Data(n)),
                Err(error) if is_transient(&error) => return Ok(Received::WouldBlock),
                Err(error) => error,
            },
            None => not_installed(),
        };

        self.policy
            .on_failure(&Failure::new(Stage::Receive, inner.ring.current(), &error));
        inner.reconnect(&self.config, &*self.policy);
        Ok(Received::Reconnected)
    }

    /// Perform one reconnect step now, as if an operation had just failed.
    pub fn reconnect(&mut self) -> Result<(), Error> {
        let inner = self.inner.as_mut().ok_or(Error::Closed)?;
        inner.reconnect(&self.config, &*self.policy);
        Ok(())
    }

    /// Close the connection, releasing the socket and the address ring.
    ///
    /// Closing more than once has no further effect.
    pub fn close(&mut self) {
        if let Some(inner) = self.inner.take() {
            trace!(endpoint = %inner.ring.current(), "closing connection");
        }
    }

    /// The current connection state.
    pub fn state(&self) -> State {
        match self.inner {
            Some(Inner {
                socket: Some(_), ..
            }) => State::HandleInstalled,
            Some(Inner { socket: None, .. }) => State::NoHandle,
            None => State::Closed,
        }
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// The endpoint the connection is currently pointed at.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.inner.as_ref().map(|inner| inner.ring.current())
    }

    /// The address ring this connection rotates through.
    pub fn ring(&self) -> Option<&AddressRing> {
        self.inner.as_ref().map(|inner| &inner.ring)
    }

    /// The configuration used for new sockets.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Local address of the installed socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "not an IP socket"))
    }

    /// Remote address of the installed socket. Fails while the handshake is
    /// still in flight.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?
            .peer_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "not an IP socket"))
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.inner
            .as_ref()
            .and_then(|inner| inner.socket.as_ref())
            .ok_or_else(not_installed)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    /// One reconnect step: drop the current socket, advance the ring by one,
    /// and try a single non-blocking connect to the new endpoint.
    fn reconnect(&mut self, config: &ConnectionConfig, policy: &dyn ReconnectPolicy) {
        // Dropping the socket closes it.
        self.socket = None;

        self.ring.advance();
        let endpoint = self.ring.current();
        let _span = tracing::trace_span!(
            "reconnect",
            position = self.ring.position(),
            endpoint = %endpoint
        )
        .entered();

        match open(endpoint, config) {
            Ok(socket) => {
                self.socket = Some(socket);
            }
            Err((stage, error)) => {
                policy.on_failure(&Failure::new(stage, endpoint, &error));
            }
        }
    }
}

fn open(endpoint: &Endpoint, config: &ConnectionConfig) -> Result<Socket, (Stage, io::Error)> {
    let socket = Socket::new(endpoint.domain(), endpoint.socket_type(), endpoint.protocol())
        .map_err(|error| (Stage::Open, error))?;
    trace!("socket opened");

    socket
        .set_nonblocking(true)
        .map_err(|error| (Stage::NonBlocking, error))?;

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "tvos", target_os = "watchos"))]
    if let Err(e) = socket.set_nosigpipe(true) {
        tracing::warn!("set_nosigpipe error: {}", e);
    }

    config.apply(&socket, endpoint);
    config
        .bind_local_address(&socket, endpoint)
        .map_err(|error| (Stage::Connect, error))?;

    match socket.connect(endpoint.addr()) {
        Ok(()) => trace!("connected"),
        Err(error) if connect_in_progress(&error) => trace!("connect in progress"),
        Err(error) => return Err((Stage::Connect, error)),
    }

    Ok(socket)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_all(socket: &Socket, payload: &[u8]) -> io::Result<()> {
    short_write(socket.send_with_flags(payload, libc::MSG_NOSIGNAL)?, payload)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_all(socket: &Socket, payload: &[u8]) -> io::Result<()> {
    short_write(socket.send(payload)?, payload)
}

fn short_write(written: usize, payload: &[u8]) -> io::Result<()> {
    if written == payload.len() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {} of {} bytes", written, payload.len()),
        ))
    }
}

fn read(mut socket: &Socket, buf: &mut [u8]) -> io::Result<usize> {
    socket.read(buf)
}

fn not_installed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "no socket installed")
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn connect_in_progress(error: &io::Error) -> bool {
    #[cfg(unix)]
    if error.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }

    error.kind() == io::ErrorKind::WouldBlock
}

/// Builder for a [`Connection`].
#[derive(Debug)]
pub struct ConnectionBuilder<R = GaiResolver> {
    config: ConnectionConfig,
    policy: Arc<dyn ReconnectPolicy>,
    resolver: R,
}

impl ConnectionBuilder {
    /// A builder with the system resolver, default configuration and the
    /// [`Silent`] policy.
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
            policy: Arc::new(Silent::new()),
            resolver: GaiResolver::new(),
        }
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ConnectionBuilder<R> {
    /// Access the socket configuration.
    pub fn config(&mut self) -> &mut ConnectionConfig {
        &mut self.config
    }

    /// Set the socket configuration.
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the policy told about absorbed failures.
    pub fn with_policy<P>(mut self, policy: P) -> Self
    where
        P: ReconnectPolicy + 'static,
    {
        self.policy = Arc::new(policy);
        self
    }

    /// Set the resolver used by [`connect`](ConnectionBuilder::connect).
    pub fn with_resolver<R2>(self, resolver: R2) -> ConnectionBuilder<R2> {
        ConnectionBuilder {
            config: self.config,
            policy: self.policy,
            resolver,
        }
    }

    /// Build a connection over an already resolved ring, making the first
    /// connect attempt to the ring's first endpoint.
    pub fn from_ring(self, ring: AddressRing) -> Connection {
        let mut inner = Inner { socket: None, ring };
        inner.reconnect(&self.config, &*self.policy);

        Connection {
            inner: Some(inner),
            config: self.config,
            policy: self.policy,
        }
    }
}

impl<R> ConnectionBuilder<R>
where
    R: Resolve,
{
    /// Resolve `host` and `port` and build a connection.
    pub fn connect(self, host: &str, port: u16) -> Result<Connection, Error> {
        let span = tracing::trace_span!("connect", %host, %port);
        let _guard = span.enter();

        let ring = self.resolver.resolve(host, port)?;
        Ok(self.from_ring(ring))
    }
}

#[cfg(feature = "tokio")]
impl<R> ConnectionBuilder<R>
where
    R: tower::Service<(Box<str>, u16), Response = AddressRing, Error = crate::ResolutionError>,
{
    /// Resolve `host` and `port` without blocking the calling task, then
    /// build a connection.
    ///
    /// Only resolution is asynchronous; the connection itself is the same
    /// non-blocking connection [`connect`](ConnectionBuilder::connect) builds.
    pub async fn connect_async(mut self, host: &str, port: u16) -> Result<Connection, Error> {
        use tower::ServiceExt as _;
        use tracing::Instrument as _;

        let span = tracing::trace_span!("connect", %host, %port);
        let ring = (&mut self.resolver)
            .oneshot((host.into(), port))
            .instrument(span)
            .await?;
        Ok(self.from_ring(ring))
    }
}

#[cfg(feature = "tokio")]
impl Connection {
    /// Resolve `host` on the blocking thread pool, then connect.
    pub async fn connect_async(host: &str, port: u16) -> Result<Self, Error> {
        Self::builder().connect_async(host, port).await
    }
}
