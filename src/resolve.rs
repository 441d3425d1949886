//! Name resolution.
//!
//! Resolution happens exactly once, when a connection is created. The
//! resolver's answer is used verbatim as the connection's [`AddressRing`]:
//! no sorting, no deduplication and no family preference is applied.

use std::fmt;
use std::net::ToSocketAddrs;

use crate::endpoint::{AddressRing, Endpoint};
use crate::error::ResolutionError;

/// Something which can turn a host and port into an address ring.
pub trait Resolve {
    /// Resolve `host` and `port` into the ordered list of candidate endpoints.
    fn resolve(&self, host: &str, port: u16) -> Result<AddressRing, ResolutionError>;
}

impl<F> Resolve for F
where
    F: Fn(&str, u16) -> Result<AddressRing, ResolutionError>,
{
    fn resolve(&self, host: &str, port: u16) -> Result<AddressRing, ResolutionError> {
        (self)(host, port)
    }
}

/// GetAddrInfo based resolver.
///
/// This resolver uses the `getaddrinfo` system call to resolve
/// hostnames to IP addresses via the operating system, asking only
/// for addresses usable with stream sockets.
#[derive(Debug, Default, Clone)]
pub struct GaiResolver {
    _priv: (),
}

impl GaiResolver {
    /// Create a new `GaiResolver`.
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<AddressRing, ResolutionError> {
        resolve(host, port)
    }
}

/// Resolve a host and port with the system resolver.
pub fn resolve(host: &str, port: u16) -> Result<AddressRing, ResolutionError> {
    let host = trim_brackets(host);
    tracing::trace_span!("getaddrinfo", target = %HostPort(host, port)).in_scope(|| {
        tracing::trace!("dns resolution starting");
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(ResolutionError::msg(host, port))?;
        let ring = AddressRing::from_resolved(host, port, addrs.map(Endpoint::tcp))?;
        tracing::trace!(endpoints = ring.len(), "dns resolution complete");
        Ok(ring)
    })
}

/// IPv6 literals may arrive in their URI form, e.g. `[::1]`.
fn trim_brackets(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

struct HostPort<'a>(&'a str, u16);

impl fmt::Display for HostPort<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0, self.1)
    }
}

#[cfg(feature = "tokio")]
pub use self::nonblocking::GaiFuture;

#[cfg(feature = "tokio")]
mod nonblocking {
    use std::fmt;
    use std::future::Future;
    use std::io;
    use std::pin::Pin;
    use std::task::{ready, Context, Poll};

    use pin_project::{pin_project, pinned_drop};
    use tokio::task::JoinHandle;

    use super::{resolve, GaiResolver, HostPort};
    use crate::endpoint::AddressRing;
    use crate::error::ResolutionError;

    impl tower::Service<(Box<str>, u16)> for GaiResolver {
        type Response = AddressRing;
        type Error = ResolutionError;
        type Future = GaiFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, (host, port): (Box<str>, u16)) -> Self::Future {
            let span = tracing::Span::current();
            let target = host.clone();
            GaiFuture {
                host,
                port,
                handle: tokio::task::spawn_blocking(move || {
                    let _guard = span.enter();
                    resolve(&target, port)
                }),
            }
        }
    }

    /// Future returned by [`GaiResolver`] when resolving via getaddrinfo
    /// on the blocking thread pool.
    ///
    /// Dropping the future aborts the lookup.
    #[pin_project(PinnedDrop)]
    pub struct GaiFuture {
        host: Box<str>,
        port: u16,
        #[pin]
        handle: JoinHandle<Result<AddressRing, ResolutionError>>,
    }

    impl fmt::Debug for GaiFuture {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_tuple("GaiFuture")
                .field(&crate::DebugLiteral(HostPort(&self.host, self.port)))
                .finish()
        }
    }

    impl Future for GaiFuture {
        type Output = Result<AddressRing, ResolutionError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.project();
            match ready!(this.handle.poll(cx)) {
                Ok(result) => Poll::Ready(result),
                Err(join_err) => {
                    let error = if join_err.is_cancelled() {
                        io::Error::new(io::ErrorKind::Interrupted, join_err)
                    } else {
                        io::Error::other(join_err)
                    };
                    Poll::Ready(Err(ResolutionError::new(&**this.host, *this.port, error)))
                }
            }
        }
    }

    #[pinned_drop]
    impl PinnedDrop for GaiFuture {
        fn drop(self: Pin<&mut Self>) {
            self.handle.abort()
        }
    }
}
