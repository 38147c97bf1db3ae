//! Client side: publish requests, wait for servers to connect back.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use corelib::config::DialerConfig;
use corelib::registry::Registry;
use corelib::{Error, Network, Request, RequestId, Result};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::handshake::read_token;
use crate::net;
use crate::telemetry::{
    self, CONNECTIONS_DELIVERED, CONNECTIONS_UNMATCHED, DIALS_TIMED_OUT, HANDSHAKES_REJECTED,
};

/// Stand-in deadline for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// First pause after an accept error that is not tied to one connection.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Consecutive failed accepts tolerated before the dialer closes itself.
const MAX_ACCEPT_FAILURES: u32 = 20;

/// Dials servers by id by having them connect back to a local endpoint.
///
/// Outgoing requests are queued in a bounded queue drained through
/// [`next_request`](Self::next_request) by whatever carries them to the
/// servers. A full queue blocks `dial`.
pub struct Dialer<S> {
    network: Network,
    local_addr: SocketAddr,
    config: DialerConfig,
    registry: Arc<Registry<TcpStream>>,
    requests_tx: Mutex<Option<mpsc::Sender<Request<S>>>>,
    requests_rx: tokio::sync::Mutex<mpsc::Receiver<Request<S>>>,
    shutdown: Arc<watch::Sender<bool>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    /// Set by the accept loop once the listening socket is dropped.
    stopped: watch::Receiver<bool>,
}

impl<S: Send + 'static> Dialer<S> {
    /// Listens at `network`/`address` with the default configuration.
    pub async fn bind(network: Network, address: &str) -> Result<Self> {
        Self::bind_with_config(network, address, DialerConfig::default()).await
    }

    /// Listens at `network`/`address` and starts the accept loop.
    pub async fn bind_with_config(
        network: Network,
        address: &str,
        config: DialerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let listener = net::bind(network, address).await?;
        let local_addr = listener.local_addr().map_err(|source| Error::Bind {
            address: address.to_string(),
            source,
        })?;

        let registry = Arc::new(Registry::new());
        let (requests_tx, requests_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);
        let (stopped_tx, stopped) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            registry.clone(),
            config.handshake_timeout,
            shutdown.clone(),
            stopped_tx,
        ));
        debug!(%network, %local_addr, "dialer bound");

        Ok(Self {
            network,
            local_addr,
            config,
            registry,
            requests_tx: Mutex::new(Some(requests_tx)),
            requests_rx: tokio::sync::Mutex::new(requests_rx),
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
            stopped,
        })
    }

    /// The endpoint servers connect back to.
    pub fn address(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// Pending dials that are still waiting for their connection.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    /// Asks `server` to connect back and waits up to `timeout` for it.
    ///
    /// The timeout covers both queueing the request and waiting for the
    /// connection. However the call ends, its registration is gone when it
    /// returns.
    pub async fn dial(&self, server: S, timeout: Duration) -> Result<TcpStream> {
        let deadline = deadline_after(timeout);
        let id = RequestId::generate();
        let waiter = self.registry.register(id)?;

        let request = Request::new(server, id, self.network, self.local_addr.to_string());
        if let Err(e) = self.enqueue(request, deadline, timeout).await {
            if e.is_timeout() {
                telemetry::incr(DIALS_TIMED_OUT);
            }
            return Err(e);
        }
        trace!(id = %id, "request queued, waiting for connection");

        let result = waiter.wait_until(deadline).await;
        match &result {
            Ok(_) => debug!(id = %id, "dial completed"),
            Err(e) if e.is_timeout() => {
                telemetry::incr(DIALS_TIMED_OUT);
                debug!(id = %id, "dial timed out");
            }
            Err(e) => debug!(id = %id, error = %e, "dial failed"),
        }
        result
    }

    /// [`dial`](Self::dial) with the configured default timeout.
    pub async fn dial_default(&self, server: S) -> Result<TcpStream> {
        self.dial(server, self.config.default_timeout).await
    }

    async fn enqueue(
        &self,
        request: Request<S>,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<()> {
        let tx = self.requests_tx.lock().clone().ok_or(Error::Closed)?;
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(Error::Closed);
        }
        tokio::select! {
            sent = tx.send(request) => sent.map_err(|_| Error::Closed),
            _ = shutdown.wait_for(|closed| *closed) => Err(Error::Closed),
            _ = tokio::time::sleep_until(deadline) => Err(Error::Timeout(timeout)),
        }
    }

    /// Next request to forward to a server, or `None` once closed.
    pub async fn next_request(&self) -> Option<Request<S>> {
        let mut shutdown = self.shutdown.subscribe();
        let mut requests = self.requests_rx.lock().await;
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => None,
            request = requests.recv() => request,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stops accepting, fails pending and blocked dials with `Closed`, and
    /// ends the request stream. Returns once the listening socket is
    /// released, also when another `close` is running concurrently.
    /// Idempotent.
    pub async fn close(&self) {
        mark_closed(&self.shutdown, &self.registry);
        self.requests_tx.lock().take();

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "accept loop ended abnormally");
            }
        }
        // a concurrent close may hold the task handle
        let mut stopped = self.stopped.clone();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }
}

impl<S> Drop for Dialer<S> {
    fn drop(&mut self) {
        mark_closed(&self.shutdown, &self.registry);
    }
}

/// Deadline `timeout` from now, saturating instead of overflowing.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Fails pending and future dials with `Closed` and stops the accept loop.
fn mark_closed(shutdown: &watch::Sender<bool>, registry: &Registry<TcpStream>) {
    shutdown.send_replace(true);
    registry.close();
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry<TcpStream>>,
    handshake_timeout: Duration,
    shutdown: Arc<watch::Sender<bool>>,
    stopped: watch::Sender<bool>,
) {
    let mut closed = shutdown.subscribe();
    let mut failures = AcceptFailures::default();
    // Dropping the set on exit aborts handshakes still in progress.
    let mut handshakes = JoinSet::new();
    loop {
        let mut pause = Duration::ZERO;
        tokio::select! {
            _ = closed.wait_for(|closed| *closed) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    failures.reset();
                    trace!(%peer, "accepted connection");
                    handshakes.spawn(demultiplex(
                        stream,
                        peer,
                        registry.clone(),
                        handshake_timeout,
                    ));
                }
                Err(e) => match failures.record(&e) {
                    Some(delay) if delay.is_zero() => {
                        debug!(error = %e, "transient accept error");
                    }
                    Some(delay) => {
                        warn!(error = %e, ?delay, "accept failed, backing off");
                        pause = delay;
                    }
                    None => {
                        error!(error = %e, "unable to accept, closing dialer");
                        mark_closed(&shutdown, &registry);
                        break;
                    }
                },
            },
            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
        }
        if !pause.is_zero() {
            tokio::select! {
                _ = closed.wait_for(|closed| *closed) => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
    drop(handshakes);
    drop(listener);
    stopped.send_replace(true);
    debug!("accept loop stopped");
}

/// Back-off policy for failed accepts.
///
/// Errors tied to a single connection are skipped. Anything else, such as
/// running out of file descriptors, pauses the loop with a doubling delay
/// and eventually gives up.
#[derive(Debug, Default)]
struct AcceptFailures {
    consecutive: u32,
}

impl AcceptFailures {
    /// Pause before the next accept, or `None` to give up.
    fn record(&mut self, e: &io::Error) -> Option<Duration> {
        if is_transient(e) {
            return Some(Duration::ZERO);
        }
        self.consecutive += 1;
        if self.consecutive > MAX_ACCEPT_FAILURES {
            return None;
        }
        let pause = ACCEPT_BACKOFF.saturating_mul(1 << (self.consecutive - 1).min(16));
        Some(pause.min(MAX_ACCEPT_BACKOFF))
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Reads the token and hands the connection to its waiter.
async fn demultiplex(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry<TcpStream>>,
    handshake_timeout: Duration,
) {
    let id = match read_token(&mut stream, handshake_timeout).await {
        Ok(id) => id,
        Err(e) => {
            telemetry::incr(HANDSHAKES_REJECTED);
            debug!(%peer, error = %e, "rejecting connection");
            return;
        }
    };
    match registry.deliver(id, stream) {
        Ok(()) => {
            telemetry::incr(CONNECTIONS_DELIVERED);
            trace!(%peer, id = %id, "connection delivered");
        }
        Err(stream) => {
            telemetry::incr(CONNECTIONS_UNMATCHED);
            debug!(%peer, id = %id, "no waiter for connection, closing");
            drop(stream);
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
