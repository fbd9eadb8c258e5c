//! Address types for virtual connections

use std::net::SocketAddr;

use crate::error::{Error, Result};

/// Host name the bridge recognizes as "this sandbox"
pub const LOOPBACK_HOST: &str = "localhost";

/// Network name reported by virtual addresses, distinct from "tcp"/"udp"
pub const NETWORK_NAME: &str = "wasm";

/// Generic address representation used at the transport seam
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IP socket address (IP + port)
    Socket(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl Address {
    /// Create from domain and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        Address::Domain(domain.into(), port)
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        match self {
            Address::Socket(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Socket(addr)
    }
}

impl From<VirtualAddr> for Address {
    fn from(addr: VirtualAddr) -> Self {
        Address::Domain(LOOPBACK_HOST.to_string(), addr.port)
    }
}

/// Endpoint of a virtual connection: a bare 16-bit port assigned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualAddr {
    port: u16,
}

impl VirtualAddr {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Name of the network, always [`NETWORK_NAME`]
    pub fn network(&self) -> &'static str {
        NETWORK_NAME
    }

    /// Parse a dial target of the form `localhost:<port>`
    pub fn parse(target: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(format!("the target `{}` is unexpected format", target));

        let (host, port) = target.split_once(':').ok_or_else(invalid)?;
        if host != LOOPBACK_HOST || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self { port })
    }

    /// Resolve a generic address, which must name the loopback host
    pub fn from_address(addr: &Address) -> Result<Self> {
        match addr {
            Address::Domain(host, port) if host == LOOPBACK_HOST => Ok(Self::new(*port)),
            other => Err(Error::InvalidAddress(format!(
                "the target `{}` is not reachable through the bridge",
                other
            ))),
        }
    }
}

impl std::fmt::Display for VirtualAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", LOOPBACK_HOST, self.port)
    }
}
