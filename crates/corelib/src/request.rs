//! Requests carried by the signaling channel.
//!
//! A `Request` tells one server "connect to `network`/`address` and announce
//! yourself with `id`". The dialer produces it, the signaling channel routes
//! it by `server`, and exactly one listener consumes it.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::RequestId;

/// Stream networks the dialer can bind and the listener can connect over.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Either address family.
    #[default]
    Tcp,
    /// IPv4 only.
    Tcp4,
    /// IPv6 only.
    Tcp6,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
        }
    }

    /// True if `addr` belongs to an address family this network allows.
    pub fn admits(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(Error::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// Ask `server` to connect back to `address` and send `id` first.
///
/// `S` is opaque to this crate; only the signaling channel looks at it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request<S> {
    pub server: S,
    pub id: RequestId,
    pub network: Network,
    pub address: String,
}

impl<S> Request<S> {
    pub fn new(server: S, id: RequestId, network: Network, address: impl Into<String>) -> Self {
        Self {
            server,
            id,
            network,
            address: address.into(),
        }
    }
}

impl<S: fmt::Debug> fmt::Display for Request<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request(server={:?}, id={}, {}/{})",
            self.server, self.id, self.network, self.address
        )
    }
}
