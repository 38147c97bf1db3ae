//! Server side: "accept" by connecting out.
//!
//! A `Listener` looks like a passive listener to its caller, but each
//! `accept` takes the next signaled [`Request`], connects to the address in
//! it and announces itself with the request id.

use std::net::SocketAddr;
use std::time::Duration;

use corelib::config::ListenerConfig;
use corelib::{Error, Request, Result};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::handshake::write_token;
use crate::net;

/// Producer handle for a listener's inbound request queue.
///
/// The signaling channel pushes requests addressed to this server here.
pub struct RequestSender<S> {
    tx: mpsc::Sender<Request<S>>,
    shutdown: watch::Receiver<bool>,
}

impl<S> Clone for RequestSender<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S> RequestSender<S> {
    /// Queues `request`, waiting while the queue is full.
    ///
    /// Fails with `Closed` once the listener is closed.
    pub async fn send(&self, request: Request<S>) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow_and_update() {
            return Err(Error::Closed);
        }
        tokio::select! {
            sent = self.tx.send(request) => sent.map_err(|_| Error::Closed),
            _ = shutdown.wait_for(|closed| *closed) => Err(Error::Closed),
        }
    }
}

/// Accepts connections by dialing out to signaled requests.
pub struct Listener<S> {
    config: ListenerConfig,
    requests_tx: mpsc::Sender<Request<S>>,
    requests_rx: tokio::sync::Mutex<mpsc::Receiver<Request<S>>>,
    shutdown: watch::Sender<bool>,
}

impl<S> Listener<S> {
    /// Listener with the default configuration.
    pub fn listen() -> Self {
        Self::build(ListenerConfig::default())
    }

    pub fn with_config(config: ListenerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ListenerConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            requests_tx,
            requests_rx: tokio::sync::Mutex::new(requests_rx),
            shutdown,
        }
    }

    /// Handle for the signaling channel to push requests with.
    pub fn requests(&self) -> RequestSender<S> {
        RequestSender {
            tx: self.requests_tx.clone(),
            shutdown: self.shutdown.subscribe(),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Waits up to `timeout` for a request, then connects to its address
    /// and writes its id.
    pub async fn accept(&self, timeout: Duration) -> Result<TcpStream> {
        let request = tokio::time::timeout(timeout, self.next_request())
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        trace!(
            id = %request.id,
            network = %request.network,
            address = %request.address,
            "dialing back"
        );
        let mut stream = tokio::time::timeout(
            self.config.connect_timeout,
            net::connect(request.network, &request.address),
        )
        .await
        .map_err(|_| Error::Connect {
            address: request.address.clone(),
            source: std::io::ErrorKind::TimedOut.into(),
        })??;

        // on failure the stream is dropped, which closes it
        write_token(&mut stream, request.id).await?;
        debug!(id = %request.id, address = %request.address, "connected back");
        Ok(stream)
    }

    /// [`accept`](Self::accept) with the configured default timeout.
    pub async fn accept_default(&self) -> Result<TcpStream> {
        self.accept(self.config.default_timeout).await
    }

    async fn next_request(&self) -> Result<Request<S>> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(Error::Closed);
        }
        let mut requests = self.requests_rx.lock().await;
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => Err(Error::Closed),
            request = requests.recv() => request.ok_or(Error::Closed),
        }
    }

    /// Unblocks pending `accept` calls with `Closed` and fails later ones
    /// and later sends the same way. Idempotent.
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            debug!("listener closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A listener that dials out has no local address of its own.
    pub fn address(&self) -> Result<SocketAddr> {
        Err(Error::Unsupported("Listener::address"))
    }
}

impl<S> Drop for Listener<S> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
