//! TCP plumbing for the game connection
//!
//! Direct connections use a non-blocking connect whose completion is polled
//! from the tick loop. Proxied connections connect to the proxy with a
//! blocking call first, since the proxy handshake runs synchronously anyway,
//! and switch to non-blocking mode afterwards.

use gamelink_core::{LinkError, Result};
use mio::net::TcpStream;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use tracing::{debug, warn};

/// Resolve `host` to its first IPv4 address
///
/// Dotted addresses are used as-is, anything else goes through the system
/// resolver.
pub fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddrV4> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(ip, port));
    }

    let resolve_error = |reason: String| LinkError::Resolve {
        host: host.to_string(),
        reason,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_error(e.to_string()))?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| resolve_error("no IPv4 address".to_string()))
}

/// Non-blocking TCP stream owned by a connection
#[derive(Debug)]
pub struct NetSocket {
    stream: TcpStream,
    peer: SocketAddrV4,
}

impl NetSocket {
    /// Start a non-blocking connect; completion is reported by [`NetSocket::poll_connect`]
    pub fn connect_nonblocking(addr: SocketAddrV4, disable_nagle: bool) -> Result<Self> {
        let stream = TcpStream::connect(SocketAddr::V4(addr))
            .map_err(|e| LinkError::socket("connecting to server", e))?;
        if disable_nagle {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Can't set TCP_NODELAY on socket: {}", e);
            }
        }
        Ok(Self { stream, peer: addr })
    }

    /// Connect with a blocking call, then switch the socket to non-blocking
    pub fn connect_blocking(addr: SocketAddrV4, disable_nagle: bool) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| LinkError::socket("creating socket", e))?;
        if disable_nagle {
            if let Err(e) = socket.set_nodelay(true) {
                warn!("Can't set TCP_NODELAY on socket: {}", e);
            }
        }
        socket
            .connect(&SocketAddr::V4(addr).into())
            .map_err(|e| LinkError::socket("connecting to proxy server", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| LinkError::socket("switching to non-blocking mode", e))?;

        let stream = TcpStream::from_std(std::net::TcpStream::from(socket));
        Ok(Self { stream, peer: addr })
    }

    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    /// Check whether an in-flight connect has finished
    ///
    /// # Returns
    /// - `Ok(true)` - connected
    /// - `Ok(false)` - still connecting
    /// - `Err(e)` - the connect failed
    pub fn poll_connect(&self) -> io::Result<bool> {
        if let Some(e) = self.stream.take_error()? {
            return Err(e);
        }
        match self.stream.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write as much of `data` as the socket takes right now
    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        loop {
            match self.stream.write(data) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    /// Read everything available into `buf`, growing it as reads fill it
    ///
    /// # Arguments
    /// * `buf` - Scratch buffer, resized to at least `initial_size`
    /// * `initial_size` - Starting size; doubled each time a read fills the buffer
    ///
    /// # Returns
    /// - `Ok(0)` - nothing to read yet
    /// - `Ok(n)` - bytes now at the start of `buf`
    /// - `Err(LinkError::Closed)` - orderly shutdown by the peer
    /// - `Err(LinkError::Socket)` - hard receive error
    pub fn receive(&mut self, buf: &mut Vec<u8>, initial_size: usize) -> Result<usize> {
        if buf.len() < initial_size {
            buf.resize(initial_size, 0);
        }

        let mut whole = match self.read_some(&mut buf[..])? {
            Some(0) => return Err(LinkError::Closed),
            Some(n) => n,
            None => return Ok(0),
        };

        while whole == buf.len() {
            let grown = buf.len() * 2;
            debug!("Growing receive buffer to {} bytes", grown);
            buf.resize(grown, 0);
            match self.read_some(&mut buf[whole..])? {
                Some(0) => return Err(LinkError::Closed),
                Some(n) => whole += n,
                None => break,
            }
        }

        Ok(whole)
    }

    /// `None` when the read would block
    fn read_some(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        loop {
            match self.stream.read(buf) {
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(LinkError::socket("receiving", e)),
            }
        }
    }
}
