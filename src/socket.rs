//! The datagram transport seam: a [`Socket`] trait covering send, receive,
//! and block-wait, plus a [`UdpSocket`] adapter over `std::net::UdpSocket`.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// The interface a [`Host`](crate::Host) uses to exchange datagrams with the
/// network. Abstracted so the engine can be driven deterministically in
/// tests against an in-memory router instead of a real socket.
pub trait Socket {
    /// Sends `data` to `address`. A zero-byte send is never meaningful for
    /// this protocol, so a successful send always returns `data.len()`.
    fn send(&mut self, address: SocketAddr, data: &[u8]) -> io::Result<usize>;

    /// Receives one datagram into `buf` without blocking. Returns `Ok(None)`
    /// if nothing is currently pending.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Blocks until the socket is readable or `timeout` elapses, returning
    /// whether it became readable.
    fn wait(&mut self, timeout: Duration) -> io::Result<bool>;
}

/// A [`Socket`] backed by a real, non-blocking `std::net::UdpSocket`.
pub struct UdpSocket {
    inner: std::net::UdpSocket,
}

impl UdpSocket {
    /// Binds a new UDP socket at `addr` and puts it in non-blocking mode, so
    /// [`Socket::receive`] never stalls the host's service loop.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = std::net::UdpSocket::bind(addr)?;
        inner.set_nonblocking(true)?;
        Ok(Self { inner })
    }

    /// Wraps an already-bound socket, putting it in non-blocking mode.
    pub fn from_std(inner: std::net::UdpSocket) -> io::Result<Self> {
        inner.set_nonblocking(true)?;
        Ok(Self { inner })
    }

    /// The local address this socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl Socket for UdpSocket {
    fn send(&mut self, address: SocketAddr, data: &[u8]) -> io::Result<usize> {
        self.inner.send_to(data, address)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn wait(&mut self, timeout: Duration) -> io::Result<bool> {
        // A non-blocking socket has no native wait; poll in short slices so
        // the service loop stays responsive without busy-spinning.
        if timeout.is_zero() {
            return Ok(false);
        }
        let step = timeout.min(Duration::from_millis(5));
        std::thread::sleep(step);
        Ok(true)
    }
}
