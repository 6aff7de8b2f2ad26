//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that is tied to
//! a single remote server.  It moves raw datagrams only: decoding happens in
//! [`crate::client`], which needs to see corrupt and malformed input so it can
//! count and log it.
//!
//! The socket stays unconnected.  A connected UDP socket reports ICMP
//! port-unreachable as an error on the next send, and only the resend sweep
//! may decide that the server is gone.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;

/// Largest datagram the server sends.
pub const MAX_DATAGRAM: usize = 65_535;

/// An async UDP socket bound to an ephemeral local port and aimed at one
/// remote address.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns a port).
    pub local_addr: SocketAddr,
    /// The server every datagram is sent to and accepted from.
    pub remote_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind an ephemeral local port of the same address family as `remote_addr`.
    pub async fn bind(remote_addr: SocketAddr) -> io::Result<Self> {
        let local = if remote_addr.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let inner = UdpSocket::bind(local).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            remote_addr,
            inner,
        })
    }

    /// Send one datagram to the remote server, returning the bytes written.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        self.inner.send_to(bytes, self.remote_addr).await
    }

    /// Receive the next datagram from the remote server into `buf`,
    /// returning its length.  `buf` should hold [`MAX_DATAGRAM`] bytes.
    ///
    /// Datagrams from any other address are dropped and the call keeps
    /// waiting.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (n, addr) = self.inner.recv_from(buf).await?;
            if addr == self.remote_addr {
                return Ok(n);
            }
            log::debug!("[rcon] dropping {n}-byte datagram from stranger {addr}");
        }
    }
}
