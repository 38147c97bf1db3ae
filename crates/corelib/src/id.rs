//! Request identifiers and their handshake encoding.
//!
//! Every connection made back to a dialer starts with the raw 16-byte
//! big-endian encoding of the `RequestId` it answers. There is no length
//! prefix and no header; anything after the token is application payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Width of the handshake token on the wire.
pub const TOKEN_LEN: usize = 16;

/// Fixed-width wire form of a `RequestId`.
pub type Token = [u8; TOKEN_LEN];

/// 128-bit identifier correlating an inbound connection with its `dial`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RequestId(pub u128);

impl RequestId {
    /// Fresh identifier from the thread-local CSPRNG.
    pub fn generate() -> Self {
        RequestId(rand::random())
    }

    /// Encodes this id as its handshake token.
    #[inline]
    pub fn encode(&self) -> Token {
        self.0.to_be_bytes()
    }

    /// Decodes a handshake token.
    ///
    /// Fails with `Error::Handshake` unless `bytes` holds exactly
    /// `TOKEN_LEN` bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let token: Token = bytes.try_into().map_err(|_| {
            Error::Handshake(format!(
                "expected {} bytes, got {}",
                TOKEN_LEN,
                bytes.len()
            ))
        })?;
        Ok(RequestId(u128::from_be_bytes(token)))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != TOKEN_LEN * 2 {
            return Err(Error::Handshake(format!("malformed request id {:?}", s)));
        }
        u128::from_str_radix(s, 16)
            .map(RequestId)
            .map_err(|_| Error::Handshake(format!("malformed request id {:?}", s)))
    }
}

// Hex keeps ids readable on text signaling channels and avoids JSON's
// lack of 128-bit integers.
impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
