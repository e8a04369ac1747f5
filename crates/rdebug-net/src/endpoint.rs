//! Network endpoint addressing.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::error::NetError;

/// A resolved TCP endpoint.
///
/// Parsed from `host:port` strings. Host names are resolved once, at parse
/// time, and the first address wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(SocketAddr);

impl Endpoint
{
    /// Wrap an already resolved socket address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self
    {
        Self(addr)
    }

    /// Loopback endpoint with the given port (`0` = ephemeral).
    #[must_use]
    pub fn loopback(port: u16) -> Self
    {
        Self(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// The underlying socket address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr
    {
        self.0
    }

    /// Port number.
    #[must_use]
    pub const fn port(&self) -> u16
    {
        self.0.port()
    }
}

impl From<SocketAddr> for Endpoint
{
    fn from(addr: SocketAddr) -> Self
    {
        Self(addr)
    }
}

impl FromStr for Endpoint
{
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self(addr));
        }
        s.to_socket_addrs()
            .map_err(|e| NetError::InvalidEndpoint(format!("{s}: {e}")))?
            .next()
            .map(Self)
            .ok_or_else(|| NetError::InvalidEndpoint(format!("{s}: no address")))
    }
}

impl fmt::Display for Endpoint
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}
