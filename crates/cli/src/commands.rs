//! Subcommands.
//!
//! `dial` and `serve` use JSON lines as a manual signaling channel: `dial`
//! prints each request on stdout, and `serve` reads them from stdin. Piping
//! one into the other (or copying the line across machines) completes the
//! rendezvous.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use rendezvous::{Dialer, DialerConfig, Listener, ListenerConfig, Network, Request};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

pub type CommandResult = Result<()>;

/// How often `serve` checks whether stdin has ended.
const SERVE_POLL: Duration = Duration::from_millis(500);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Dial a server: print the request on stdout, then copy the payload.
    Dial {
        /// Server id, passed through to the signaling channel.
        #[arg(long)]
        server: String,
        /// Address to listen on for the server's connection.
        #[arg(long, default_value = "127.0.0.1:0")]
        bind: String,
        #[arg(long, default_value = "tcp")]
        network: Network,
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
        #[arg(long, default_value_t = 5_000)]
        handshake_timeout_ms: u64,
    },
    /// Answer requests read from stdin with a fixed message.
    Serve {
        #[arg(long, default_value = "hello from dialback")]
        message: String,
        #[arg(long, default_value_t = 10_000)]
        connect_timeout_ms: u64,
        #[arg(long, default_value_t = 1000)]
        queue_capacity: usize,
    },
    /// Dial a few in-process servers through a mock signaling loop.
    Demo {
        #[arg(long, default_value_t = 3)]
        servers: u32,
        #[arg(long, default_value_t = 2_000)]
        timeout_ms: u64,
    },
}

impl Command {
    pub async fn execute(self) -> CommandResult {
        match self {
            Command::Dial {
                server,
                bind,
                network,
                timeout_ms,
                handshake_timeout_ms,
            } => {
                let config = DialerConfig::default()
                    .with_handshake_timeout(Duration::from_millis(handshake_timeout_ms));
                dial(server, network, &bind, Duration::from_millis(timeout_ms), config).await
            }
            Command::Serve {
                message,
                connect_timeout_ms,
                queue_capacity,
            } => {
                let config = ListenerConfig::default()
                    .with_connect_timeout(Duration::from_millis(connect_timeout_ms))
                    .with_queue_capacity(queue_capacity);
                serve(message, config).await
            }
            Command::Demo {
                servers,
                timeout_ms,
            } => demo(servers, Duration::from_millis(timeout_ms)).await,
        }
    }
}

async fn dial(
    server: String,
    network: Network,
    bind: &str,
    timeout: Duration,
    config: DialerConfig,
) -> CommandResult {
    let dialer = Arc::new(
        Dialer::<String>::bind_with_config(network, bind, config)
            .await
            .context("unable to start dialer")?,
    );
    info!(address = %dialer.address(), "waiting for server {:?}", server);

    let signaling = dialer.clone();
    let publish = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(request) = signaling.next_request().await {
            let mut line = serde_json::to_string(&request)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    let result = dialer.dial(server, timeout).await;
    let copied = match result {
        Ok(mut conn) => {
            let mut stdout = tokio::io::stdout();
            let copied = tokio::io::copy(&mut conn, &mut stdout)
                .await
                .context("unable to copy payload");
            stdout.flush().await?;
            copied.map(|n| debug!(bytes = n, "payload copied"))
        }
        Err(e) => Err(anyhow::Error::new(e).context("dial failed")),
    };

    dialer.close().await;
    publish.await.context("request publisher panicked")??;
    copied
}

async fn serve(message: String, config: ListenerConfig) -> CommandResult {
    let listener = Listener::<String>::with_config(config).context("invalid listener config")?;
    let inbound = listener.requests();

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Request<String>>(&line) {
                Ok(request) => inbound.send(request).await?,
                Err(e) => warn!(error = %e, "ignoring malformed request line"),
            }
        }
        anyhow::Ok(())
    });

    let message = Arc::new(message);
    loop {
        match listener.accept(SERVE_POLL).await {
            Ok(mut conn) => {
                let message = message.clone();
                tokio::spawn(async move {
                    if let Err(e) = conn.write_all(message.as_bytes()).await {
                        warn!(error = %e, "unable to write message");
                    }
                    let _ = conn.shutdown().await;
                });
            }
            Err(e) if e.is_timeout() => {
                if reader.is_finished() {
                    break;
                }
            }
            Err(e) if e.is_closed() => break,
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }

    listener.close();
    reader.await.context("stdin reader panicked")?
}

async fn demo(servers: u32, timeout: Duration) -> CommandResult {
    let dialer = Arc::new(
        Dialer::<u32>::bind(Network::Tcp, "127.0.0.1:0")
            .await
            .context("unable to start dialer")?,
    );

    let mut routes = Vec::new();
    for id in 1..=servers {
        let listener = Listener::<u32>::listen();
        routes.push(listener.requests());
        tokio::spawn(async move {
            loop {
                match listener.accept(Duration::from_secs(60)).await {
                    Ok(mut conn) => {
                        let _ = conn.write_all(format!("Message {}", id).as_bytes()).await;
                        let _ = conn.shutdown().await;
                    }
                    Err(e) if e.is_closed() => break,
                    Err(e) => debug!(server = id, error = %e, "accept failed"),
                }
            }
        });
    }

    // mock signaling: route by server id
    let signaling = dialer.clone();
    tokio::spawn(async move {
        while let Some(request) = signaling.next_request().await {
            let route = request
                .server
                .checked_sub(1)
                .and_then(|i| routes.get(i as usize));
            match route {
                Some(route) => {
                    if let Err(e) = route.send(request).await {
                        warn!(error = %e, "unable to route request");
                    }
                }
                None => warn!(server = request.server, "no such server"),
            }
        }
    });

    for server in 1..=servers {
        let mut conn = dialer
            .dial(server, timeout)
            .await
            .with_context(|| format!("unable to dial server {}", server))?;
        let mut payload = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut conn, &mut payload).await?;
        println!("server {}: {}", server, payload);
    }

    dialer.close().await;
    Ok(())
}
