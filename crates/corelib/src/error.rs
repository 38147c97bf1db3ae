//! Error types for the core library.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::id::RequestId;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while dialing back or accepting.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The dialer could not open its listening endpoint.
    #[error("unable to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The dialer or listener has been closed.
    #[error("closed")]
    Closed,

    /// A bounded wait in `dial` or `accept` expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The identifier token was short, truncated or unreadable.
    #[error("invalid handshake: {0}")]
    Handshake(String),

    /// The identifier token could not be written to the new connection.
    #[error("unable to write connection id: {0}")]
    HandshakeWrite(#[source] io::Error),

    /// The outbound connect to the advertised address failed.
    #[error("unable to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// A waiter is already registered under this id.
    #[error("request id {0} is already registered")]
    DuplicateId(RequestId),

    /// The operation has no meaning for this type.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Only stream networks are supported.
    #[error("unsupported network {0:?}, only tcp, tcp4 and tcp6 are supported")]
    UnsupportedNetwork(String),

    /// Configuration rejected by `validate`.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True if this is a `Timeout`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// True if this is `Closed`.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}
