//! Endpoints and the address ring a connection rotates through.
//!
//! An [`Endpoint`] is one resolved candidate address, carrying everything
//! needed to open a socket for it. An [`AddressRing`] is the fixed, ordered
//! set of endpoints for a single connection along with a cursor. The ring is
//! built once and never re-resolved; the only thing that ever changes is the
//! cursor position.

use std::fmt;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::Path;
#[cfg(unix)]
use std::io;

use socket2::{Domain, Protocol, SockAddr, Type};

use crate::error::ResolutionError;

/// A single resolved candidate address.
#[derive(Clone)]
pub struct Endpoint {
    domain: Domain,
    ty: Type,
    protocol: Option<Protocol>,
    addr: SockAddr,
}

impl Endpoint {
    /// Create an endpoint from its raw parts.
    ///
    /// No validation is done here: a domain which does not match the address
    /// family will simply fail when a connection is attempted.
    pub fn new(domain: Domain, ty: Type, protocol: Option<Protocol>, addr: SockAddr) -> Self {
        Self {
            domain,
            ty,
            protocol,
            addr,
        }
    }

    /// A TCP endpoint for an IP socket address.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self::new(
            Domain::for_address(addr),
            Type::STREAM,
            Some(Protocol::TCP),
            addr.into(),
        )
    }

    /// A stream endpoint for a unix domain socket at `path`.
    #[cfg(unix)]
    pub fn unix<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(
            Domain::UNIX,
            Type::STREAM,
            None,
            SockAddr::unix(path)?,
        ))
    }

    /// The address family used to open sockets for this endpoint.
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// The socket type used to open sockets for this endpoint.
    pub fn socket_type(&self) -> Type {
        self.ty
    }

    /// The protocol used to open sockets for this endpoint, if any.
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    /// The transport address.
    pub fn addr(&self) -> &SockAddr {
        &self.addr
    }

    /// The transport address as an IP socket address, when it is one.
    pub fn as_socket(&self) -> Option<SocketAddr> {
        self.addr.as_socket()
    }

    /// Length of the raw transport address in bytes.
    pub fn addr_len(&self) -> usize {
        self.addr.len() as usize
    }

    pub(crate) fn is_inet(&self) -> bool {
        self.domain == Domain::IPV4 || self.domain == Domain::IPV6
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::tcp(addr)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("domain", &self.domain)
            .field("type", &self.ty)
            .field("protocol", &self.protocol)
            .field("addr", &crate::DebugLiteral(self))
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr.as_socket() {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "{:?}", self.addr),
        }
    }
}

/// An ordered, non-empty and circular list of endpoints with a cursor.
///
/// Order is exactly the order the endpoints were given in. A freshly built
/// ring has its cursor on the last entry, so the first [`advance`] lands on
/// the first endpoint.
///
/// [`advance`]: AddressRing::advance
#[derive(Debug, Clone)]
pub struct AddressRing {
    endpoints: Box<[Endpoint]>,
    position: usize,
}

impl AddressRing {
    /// Build a ring from a list of endpoints.
    ///
    /// Fails if the list is empty; `host` and `port` are only used to
    /// describe the failure.
    pub(crate) fn from_resolved<I>(
        host: &str,
        port: u16,
        endpoints: I,
    ) -> Result<Self, ResolutionError>
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let endpoints: Box<[Endpoint]> = endpoints.into_iter().collect();
        if endpoints.is_empty() {
            return Err(ResolutionError::empty(host, port));
        }

        let position = endpoints.len() - 1;
        Ok(Self {
            endpoints,
            position,
        })
    }

    /// Build a ring directly from endpoints, bypassing resolution.
    ///
    /// Returns `None` when `endpoints` is empty.
    pub fn new<I>(endpoints: I) -> Option<Self>
    where
        I: IntoIterator<Item = Endpoint>,
    {
        Self::from_resolved("", 0, endpoints).ok()
    }

    /// Number of endpoints in the ring. Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// The index of the current endpoint.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The current endpoint.
    pub fn current(&self) -> &Endpoint {
        &self.endpoints[self.position]
    }

    /// Iterate over all endpoints in ring order, starting from the first.
    pub fn iter(&self) -> std::slice::Iter<'_, Endpoint> {
        self.endpoints.iter()
    }

    /// Move the cursor forward by one, wrapping past the end, and return the
    /// new current endpoint.
    pub fn advance(&mut self) -> &Endpoint {
        self.position = (self.position + 1) % self.endpoints.len();
        self.current()
    }
}

impl<'a> IntoIterator for &'a AddressRing {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    fn local(port: u16) -> Endpoint {
        Endpoint::tcp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port))
    }

    #[test]
    fn empty_ring_is_rejected() {
        assert!(AddressRing::new(Vec::new()).is_none());

        let err = AddressRing::from_resolved("example.com", 80, Vec::new()).unwrap_err();
        assert!(err.is_empty());
        assert_eq!(err.host(), "example.com");
    }

    #[test]
    fn first_advance_lands_on_first_endpoint() {
        let mut ring = AddressRing::new(vec![local(1), local(2), local(3)]).unwrap();
        assert_eq!(ring.position(), 2);
        assert_eq!(ring.advance().as_socket().unwrap().port(), 1);
        assert_eq!(ring.position(), 0);
    }

    #[test]
    fn advance_wraps() {
        let mut ring = AddressRing::new(vec![local(1), local(2)]).unwrap();
        let ports: Vec<u16> = (0..5)
            .map(|_| ring.advance().as_socket().unwrap().port())
            .collect();
        assert_eq!(ports, vec![1, 2, 1, 2, 1]);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn single_endpoint_ring() {
        let mut ring = AddressRing::new(vec![local(7)]).unwrap();
        assert_eq!(ring.position(), 0);
        ring.advance();
        assert_eq!(ring.position(), 0);
        assert_eq!(ring.current().as_socket().unwrap().port(), 7);
    }

    #[test]
    fn order_is_preserved() {
        let v6 = Endpoint::tcp(SocketAddr::new(Ipv6Addr::LOCALHOST.into(), 9));
        let ring = AddressRing::new(vec![local(9), v6, local(9)]).unwrap();
        let domains: Vec<Domain> = ring.iter().map(Endpoint::domain).collect();
        assert_eq!(domains, vec![Domain::IPV4, Domain::IPV6, Domain::IPV4]);
    }

    #[test]
    fn tcp_endpoint_parts() {
        let endpoint = local(8080);
        assert_eq!(endpoint.domain(), Domain::IPV4);
        assert_eq!(endpoint.socket_type(), Type::STREAM);
        assert_eq!(endpoint.protocol(), Some(Protocol::TCP));
        assert_eq!(endpoint.to_string(), "127.0.0.1:8080");
        assert!(endpoint.is_inet());
        assert!(endpoint.addr_len() > 0);
    }

    #[cfg(unix)]
    #[test]
    fn unix_endpoint_parts() {
        let endpoint = Endpoint::unix("/tmp/resocket-test.sock").unwrap();
        assert_eq!(endpoint.domain(), Domain::UNIX);
        assert!(endpoint.as_socket().is_none());
        assert!(!endpoint.is_inet());
    }
}
