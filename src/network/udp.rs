//! UDP socket setup
//!
//! One socket per direction: the receive socket is bound to the configured
//! local port and blocks with a short timeout so its thread notices `stop()`
//! promptly; the send socket is ephemeral and non-blocking.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::constants::SOCKET_BUFFER_SIZE;
use crate::error::NetworkError;

/// Bind the inbound socket on all interfaces
pub fn bind_receive_socket(port: u16, read_timeout: Duration) -> Result<UdpSocket, NetworkError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let bind_err = |e: io::Error| NetworkError::BindFailed {
        addr,
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;

    // A small kernel buffer drops bursts before the jitter buffer sees them
    if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::warn!("Could not set receive buffer size: {}", e);
    }

    socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;
    socket
        .set_read_timeout(Some(read_timeout.max(Duration::from_millis(1))))
        .map_err(bind_err)?;

    let socket: UdpSocket = socket.into();
    if let Ok(local) = socket.local_addr() {
        tracing::debug!("Receive socket bound to {}", local);
    }
    Ok(socket)
}

/// Create the outbound socket for `peer`'s address family
pub fn create_send_socket(peer: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let local: SocketAddr = match peer {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let bind_err = |e: io::Error| NetworkError::BindFailed {
        addr: local,
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::for_address(peer), Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;

    if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::warn!("Could not set send buffer size: {}", e);
    }

    socket.bind(&SockAddr::from(local)).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    Ok(socket.into())
}

/// Errors a receive loop retries instead of stopping on
pub fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => true,
        // Windows reports an ICMP port-unreachable for an earlier send as a
        // reset on the next receive
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused => true,
        _ => false,
    }
}
