//! Socket configuration applied to every reconnect attempt.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use socket2::{Socket, TcpKeepalive};
use tracing::warn;

use crate::endpoint::Endpoint;

/// Configuration for sockets opened by a connection.
///
/// The defaults leave every socket option at the operating system's default.
/// Options which only make sense for TCP are skipped for other endpoints.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// Idle time before TCP keep-alive probes are sent.
    pub keep_alive: Option<Duration>,

    /// The local IPv4 address to bind to.
    pub local_address_ipv4: Option<Ipv4Addr>,

    /// The local IPv6 address to bind to.
    pub local_address_ipv6: Option<Ipv6Addr>,

    /// The size of the send buffer.
    pub send_buffer_size: Option<usize>,

    /// The size of the receive buffer.
    pub recv_buffer_size: Option<usize>,
}

impl ConnectionConfig {
    /// Apply best-effort socket options. Failures are logged and ignored.
    pub(crate) fn apply(&self, socket: &Socket, endpoint: &Endpoint) {
        let _guard = tracing::trace_span!("socket_options").entered();

        if endpoint.is_inet() {
            if self.nodelay {
                if let Err(e) = socket.set_nodelay(true) {
                    warn!("tcp set_nodelay error: {}", e);
                }
            }

            if let Some(dur) = self.keep_alive {
                let conf = TcpKeepalive::new().with_time(dur);
                if let Err(e) = socket.set_tcp_keepalive(&conf) {
                    warn!("tcp set_keepalive error: {}", e);
                }
            }
        }

        if let Some(size) = self.send_buffer_size {
            if let Err(e) = socket.set_send_buffer_size(size) {
                warn!("set_send_buffer_size error: {}", e);
            }
        }

        if let Some(size) = self.recv_buffer_size {
            if let Err(e) = socket.set_recv_buffer_size(size) {
                warn!("set_recv_buffer_size error: {}", e);
            }
        }
    }

    /// Bind to the configured local address for the endpoint's family, if any.
    ///
    /// Unlike the other options, a bind failure fails the attempt.
    pub(crate) fn bind_local_address(&self, socket: &Socket, endpoint: &Endpoint) -> io::Result<()> {
        match (endpoint.as_socket(), self.local_address_ipv4, self.local_address_ipv6) {
            (Some(SocketAddr::V4(_)), Some(addr), _) => {
                socket.bind(&SocketAddr::new(addr.into(), 0).into())?;
            }
            (Some(SocketAddr::V6(_)), _, Some(addr)) => {
                socket.bind(&SocketAddr::new(addr.into(), 0).into())?;
            }
            _ => {}
        }

        Ok(())
    }
}
