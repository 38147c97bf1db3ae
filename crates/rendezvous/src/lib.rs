//! Dial-back connections over TCP.
//!
//! A [`Dialer`] is the reachable side. Instead of connecting to a server it
//! publishes a [`Request`] naming its own listening address; some external
//! signaling channel carries that request to the server's [`Listener`],
//! which connects back and sends the request id as the first 16 bytes. The
//! dialer's accept loop reads the id and hands the connection to the `dial`
//! call that is waiting for it.
//!
//! ```no_run
//! use std::time::Duration;
//! use rendezvous::{Dialer, Listener, Network};
//!
//! # async fn run() -> rendezvous::Result<()> {
//! let dialer = std::sync::Arc::new(Dialer::<u32>::bind(Network::Tcp, "127.0.0.1:0").await?);
//! let listener = Listener::<u32>::listen();
//!
//! // Signaling: forward every outgoing request to the listener.
//! let signaling = dialer.clone();
//! let inbound = listener.requests();
//! tokio::spawn(async move {
//!     while let Some(request) = signaling.next_request().await {
//!         let _ = inbound.send(request).await;
//!     }
//! });
//!
//! tokio::spawn(async move {
//!     let _conn = listener.accept(Duration::from_secs(5)).await;
//! });
//! let _conn = dialer.dial(1, Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod dialer;
pub mod handshake;
pub mod listener;
pub mod telemetry;
mod net;

pub use corelib::config::{DialerConfig, ListenerConfig};
pub use corelib::{Error, Network, Request, RequestId, Result};
pub use dialer::Dialer;
pub use listener::{Listener, RequestSender};
