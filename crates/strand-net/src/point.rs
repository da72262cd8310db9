//! Peer points: the addresses the pool and the wire talk about.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::NetError;

/// A contactable peer address: IP plus listening port.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point(SocketAddr);

/// The identity of the remote end of one connection.
///
/// The port is the remote's advertised listening port for incoming
/// connections, or the socket port for outgoing ones; an incoming peer
/// that advertises no port has none.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IdPoint {
    /// Remote address
    pub addr: IpAddr,
    /// Listening port, when known
    pub port: Option<u16>,
}

impl Point {
    /// Construct from address and port.
    #[must_use]
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(addr, port))
    }

    /// The IP address.
    #[must_use]
    pub fn addr(&self) -> IpAddr {
        self.0.ip()
    }

    /// The listening port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// The underlying socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Append the wire form: `len:u16 BE` then the textual address.
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        let text = self.0.to_string();
        out.extend_from_slice(&(text.len() as u16).to_be_bytes());
        out.extend_from_slice(text.as_bytes());
    }

    /// Parse the wire form from the front of `buf`.
    ///
    /// Returns the point and the bytes consumed, or `None` when the
    /// buffer does not yet hold a complete entry.
    pub(crate) fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, NetError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < 2 + len {
            return Ok(None);
        }
        let text = std::str::from_utf8(&buf[2..2 + len])
            .map_err(|e| NetError::Decoding(format!("point is not utf-8: {e}")))?;
        let point = text
            .parse::<Point>()
            .map_err(|e| NetError::Decoding(format!("bad point {text:?}: {e}")))?;
        Ok(Some((point, 2 + len)))
    }
}

impl From<SocketAddr> for Point {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for Point {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self)
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Point({})", self.0)
    }
}

impl IdPoint {
    /// Construct from address and optional port.
    #[must_use]
    pub fn new(addr: IpAddr, port: Option<u16>) -> Self {
        Self { addr, port }
    }

    /// The point this identity corresponds to, when the port is known.
    #[must_use]
    pub fn to_point(&self) -> Option<Point> {
        self.port.map(|port| Point::new(self.addr, port))
    }
}

impl std::fmt::Display for IdPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.addr, port),
            None => write!(f, "{}:??", self.addr),
        }
    }
}
