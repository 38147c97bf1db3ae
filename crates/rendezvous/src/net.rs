//! Address resolution honoring the requested `Network`.

use std::io;
use std::net::SocketAddr;

use corelib::{Error, Network, Result};
use tokio::net::{lookup_host, TcpListener, TcpStream};

async fn resolve(network: Network, address: &str) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = lookup_host(address)
        .await?
        .filter(|addr| network.admits(addr))
        .collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {} address for {}", network, address),
        ));
    }
    Ok(addrs)
}

/// Binds the first resolved address that accepts a listener.
pub(crate) async fn bind(network: Network, address: &str) -> Result<TcpListener> {
    let bind_err = |source| Error::Bind {
        address: address.to_string(),
        source,
    };
    let mut last = None;
    for addr in resolve(network, address).await.map_err(bind_err)? {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => last = Some(e),
        }
    }
    Err(bind_err(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no usable address")
    })))
}

/// Connects to the first resolved address that answers.
pub(crate) async fn connect(network: Network, address: &str) -> Result<TcpStream> {
    let connect_err = |source| Error::Connect {
        address: address.to_string(),
        source,
    };
    let mut last = None;
    for addr in resolve(network, address).await.map_err(connect_err)? {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last = Some(e),
        }
    }
    Err(connect_err(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no usable address")
    })))
}
