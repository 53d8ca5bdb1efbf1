use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// An error returned when parsing a network address from the config.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid address {0:?}, expected <host>:<port>")]
pub struct ParseAddrError(String);

/// A socket address to listen on.
///
/// Accepts the regular `<ip>:<port>` notation as well as `:<port>` with an empty host, which binds
/// to all IPv4 interfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenAddr(SocketAddr);

impl ListenAddr {
    /// Returns the socket address to bind.
    pub fn socket_addr(self) -> SocketAddr {
        self.0
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ListenAddr {
    type Err = ParseAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = || ParseAddrError(s.to_owned());

        if let Some(port) = s.strip_prefix(':') {
            let port = port.parse().map_err(|_| error())?;
            return Ok(Self(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)));
        }

        s.parse().map(Self).map_err(|_| error())
    }
}

impl From<SocketAddr> for ListenAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

statsq_common::impl_str_serde!(ListenAddr, "a socket address to listen on");

/// The downstream Graphite endpoint.
///
/// The literal `-` disables the sink. Otherwise, this is a `<host>:<port>` pair where the host may
/// be a DNS name, resolved on every connection attempt.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphiteTarget {
    /// Flushed lines are discarded.
    Disabled,
    /// Flushed lines are written to this endpoint.
    Addr(String),
}

impl GraphiteTarget {
    /// Returns the endpoint address, if enabled.
    pub fn addr(&self) -> Option<&str> {
        match self {
            GraphiteTarget::Disabled => None,
            GraphiteTarget::Addr(addr) => Some(addr),
        }
    }
}

impl Default for GraphiteTarget {
    fn default() -> Self {
        Self::Addr("127.0.0.1:2003".to_owned())
    }
}

impl fmt::Display for GraphiteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphiteTarget::Disabled => f.write_str("-"),
            GraphiteTarget::Addr(addr) => f.write_str(addr),
        }
    }
}

impl FromStr for GraphiteTarget {
    type Err = ParseAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "-" {
            return Ok(Self::Disabled);
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Addr(s.to_owned()))
            }
            _ => Err(ParseAddrError(s.to_owned())),
        }
    }
}

statsq_common::impl_str_serde!(GraphiteTarget, "a graphite address or `-`");
