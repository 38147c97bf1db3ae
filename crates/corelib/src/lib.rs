//! Core library for dial-back rendezvous.
//!
//! This crate provides the transport-agnostic pieces:
//! - Request identifiers and their 16-byte handshake encoding
//! - The `Request` value carried by the signaling channel
//! - The pending-request registry that matches connections to waiters
//! - Configuration and the error taxonomy

pub mod config;
pub mod error;
pub mod id;
pub mod registry;
pub mod request;

pub use config::{DialerConfig, ListenerConfig};
pub use error::{Error, Result};
pub use id::RequestId;
pub use registry::{Registry, Waiter};
pub use request::{Network, Request};
