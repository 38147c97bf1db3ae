//! End-to-end tests over loopback TCP.
//!
//! # Test Strategy
//!
//! 1. **Rendezvous**: dials through a mock signaling loop, one per server
//! 2. **Timeouts**: unanswered dials, late arrivals, listener timeouts
//! 3. **Bad handshakes**: short tokens never disturb other dials
//! 4. **Teardown**: close unblocks waiters and producers and releases the port

use std::sync::Arc;
use std::time::Duration;

use rendezvous::{
    Dialer, DialerConfig, Listener, ListenerConfig, Network, Request, RequestId, RequestSender,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const DIAL_TIMEOUT: Duration = Duration::from_millis(300);

async fn bind_dialer() -> Arc<Dialer<u32>> {
    Arc::new(
        Dialer::bind(Network::Tcp, "127.0.0.1:0")
            .await
            .expect("dialer should bind"),
    )
}

/// Listener that answers every request with `msg` and hangs up.
fn test_listener(msg: &'static str) -> RequestSender<u32> {
    let listener = Listener::listen();
    let requests = listener.requests();
    tokio::spawn(async move {
        loop {
            match listener.accept(Duration::from_secs(10)).await {
                Ok(mut conn) => {
                    let _ = conn.write_all(msg.as_bytes()).await;
                    let _ = conn.shutdown().await;
                }
                Err(e) if e.is_closed() => break,
                Err(_) => continue,
            }
        }
    });
    requests
}

async fn read_all(mut conn: TcpStream) -> String {
    let mut out = String::new();
    conn.read_to_string(&mut out).await.unwrap();
    out
}

/// True once the peer has closed `conn`.
async fn closed_by_peer(conn: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1];
    match tokio::time::timeout(Duration::from_secs(5), conn.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        _ => false,
    }
}

// ============================================================================
// Rendezvous Tests
// ============================================================================

#[tokio::test]
async fn test_three_servers_end_to_end() {
    let dialer = bind_dialer().await;
    assert!(!dialer.address().to_string().is_empty());

    let l1 = test_listener("Message 1");
    let l2 = test_listener("Message 2");
    let signaling = dialer.clone();
    tokio::spawn(async move {
        while let Some(request) = signaling.next_request().await {
            match request.server {
                1 => l1.send(request).await.unwrap(),
                2 => l2.send(request).await.unwrap(),
                // server 3 answers too late, through server 2
                3 => {
                    tokio::time::sleep(DIAL_TIMEOUT + Duration::from_millis(50)).await;
                    let _ = l2.send(request).await;
                }
                other => panic!("unknown server id {}", other),
            }
        }
    });

    let conn1 = dialer.dial(1, DIAL_TIMEOUT).await.expect("dial server 1");
    let conn2 = dialer.dial(2, DIAL_TIMEOUT).await.expect("dial server 2");
    let err = dialer.dial(3, DIAL_TIMEOUT).await.unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
    assert_eq!(dialer.pending(), 0, "registry should be empty after dialing");

    assert_eq!(read_all(conn1).await, "Message 1");
    assert_eq!(read_all(conn2).await, "Message 2");

    // let the late answer for server 3 arrive and be discarded
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(dialer.pending(), 0);
    dialer.close().await;
}

#[tokio::test]
async fn test_concurrent_dials_get_their_own_connection() {
    let dialer = bind_dialer().await;

    // every server writes its own id, so a cross-delivery is visible
    let signaling = dialer.clone();
    tokio::spawn(async move {
        while let Some(request) = signaling.next_request().await {
            tokio::spawn(answer_with_server_id(request));
        }
    });

    let mut handles = Vec::new();
    for server in 0..32u32 {
        let dialer = dialer.clone();
        handles.push(tokio::spawn(async move {
            let conn = dialer.dial(server, Duration::from_secs(5)).await.unwrap();
            (server, read_all(conn).await)
        }));
    }
    for handle in handles {
        let (server, payload) = handle.await.unwrap();
        assert_eq!(payload, format!("server {}", server));
    }
    assert_eq!(dialer.pending(), 0);
    dialer.close().await;
}

/// Answers `request` after a jittered delay, writing the server id.
async fn answer_with_server_id(request: Request<u32>) {
    tokio::time::sleep(Duration::from_millis(u64::from(31 - request.server % 32))).await;
    let mut conn = TcpStream::connect(&request.address).await.unwrap();
    conn.write_all(&request.id.encode()).await.unwrap();
    conn.write_all(format!("server {}", request.server).as_bytes())
        .await
        .unwrap();
    conn.shutdown().await.unwrap();
}

// ============================================================================
// Timeout Tests
// ============================================================================

#[tokio::test]
async fn test_rapid_dial_timeout() {
    let dialer = bind_dialer().await;
    let err = dialer.dial(1, Duration::from_nanos(1)).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(dialer.pending(), 0);
    dialer.close().await;
}

#[tokio::test]
async fn test_unconsumed_dial_times_out_within_bound() {
    let dialer = bind_dialer().await;
    let started = std::time::Instant::now();
    let err = dialer.dial(1, Duration::from_millis(100)).await.unwrap_err();
    let elapsed = started.elapsed();
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert_eq!(dialer.pending(), 0);
    dialer.close().await;
}

#[tokio::test]
async fn test_late_arrival_is_closed() {
    let dialer = bind_dialer().await;
    let d = dialer.clone();
    let dial = tokio::spawn(async move { d.dial(7, Duration::from_millis(50)).await });

    let request = dialer.next_request().await.unwrap();
    assert!(dial.await.unwrap().unwrap_err().is_timeout());
    assert_eq!(dialer.pending(), 0);

    let mut late = TcpStream::connect(dialer.address()).await.unwrap();
    late.write_all(&request.id.encode()).await.unwrap();
    assert!(closed_by_peer(&mut late).await, "late connection should be closed");
    assert_eq!(dialer.pending(), 0);
    dialer.close().await;
}

#[tokio::test]
async fn test_rapid_listener_timeout() {
    let listener = Listener::<u32>::listen();
    let err = listener.accept(Duration::from_nanos(1)).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");

    listener.close();
    let err = listener.accept(Duration::from_secs(1)).await.unwrap_err();
    assert!(err.is_closed(), "{err}");
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_short_handshake_does_not_disturb_pending_dial() {
    let dialer = bind_dialer().await;
    let server = test_listener("still fine");

    let d = dialer.clone();
    let dial = tokio::spawn(async move { d.dial(1, Duration::from_secs(5)).await });
    let request = dialer.next_request().await.unwrap();

    let mut short = TcpStream::connect(dialer.address()).await.unwrap();
    short.write_all(&request.id.encode()[..5]).await.unwrap();
    short.shutdown().await.unwrap();
    assert!(closed_by_peer(&mut short).await, "short handshake should be closed");
    assert_eq!(dialer.pending(), 1, "the real dial is still waiting");

    server.send(request).await.unwrap();
    let conn = dial.await.unwrap().expect("dial should still succeed");
    assert_eq!(read_all(conn).await, "still fine");
    dialer.close().await;
}

#[tokio::test]
async fn test_stalled_handshake_does_not_block_others() {
    let config = DialerConfig::default().with_handshake_timeout(Duration::from_secs(30));
    let dialer = Arc::new(
        Dialer::<u32>::bind_with_config(Network::Tcp, "127.0.0.1:0", config)
            .await
            .unwrap(),
    );
    // connects and never sends a byte
    let _stalled = TcpStream::connect(dialer.address()).await.unwrap();

    let server = test_listener("through");
    let d = dialer.clone();
    let dial = tokio::spawn(async move { d.dial(1, Duration::from_secs(2)).await });
    server.send(dialer.next_request().await.unwrap()).await.unwrap();

    let conn = dial.await.unwrap().expect("dial should not wait on the stalled peer");
    assert_eq!(read_all(conn).await, "through");
    dialer.close().await;
}

// ============================================================================
// Teardown Tests
// ============================================================================

#[tokio::test]
async fn test_close_unblocks_pending_dial() {
    let dialer = bind_dialer().await;
    let d = dialer.clone();
    let dial = tokio::spawn(async move { d.dial(1, Duration::from_secs(30)).await });
    let _request = dialer.next_request().await.unwrap();

    dialer.close().await;
    let result = tokio::time::timeout(Duration::from_secs(5), dial)
        .await
        .expect("dial should unblock on close")
        .unwrap();
    assert!(result.unwrap_err().is_closed());
    assert_eq!(dialer.pending(), 0);
    assert!(dialer.next_request().await.is_none());
}

#[tokio::test]
async fn test_close_releases_listening_port() {
    let dialer = bind_dialer().await;
    let address = dialer.address();
    dialer.close().await;

    let rebound = TcpListener::bind(address).await;
    assert!(rebound.is_ok(), "port should be free after close: {:?}", rebound.err());
}

#[tokio::test]
async fn test_close_unblocks_dial_with_unbounded_timeout() {
    let dialer = bind_dialer().await;
    let d = dialer.clone();
    let dial = tokio::spawn(async move { d.dial(1, Duration::MAX).await });
    let _request = dialer.next_request().await.unwrap();

    dialer.close().await;
    let result = tokio::time::timeout(Duration::from_secs(5), dial)
        .await
        .expect("dial should unblock on close")
        .expect("dial should not panic");
    assert!(result.unwrap_err().is_closed());
    assert_eq!(dialer.pending(), 0);
}

#[tokio::test]
async fn test_close_fails_dial_blocked_on_full_queue() {
    let config = DialerConfig::default().with_queue_capacity(1);
    let dialer = Arc::new(
        Dialer::<u32>::bind_with_config(Network::Tcp, "127.0.0.1:0", config)
            .await
            .unwrap(),
    );
    // nothing drains the queue: the first request fills it, the second blocks
    let d = dialer.clone();
    let queued = tokio::spawn(async move { d.dial(1, Duration::from_secs(30)).await });
    let d = dialer.clone();
    let blocked = tokio::spawn(async move { d.dial(2, Duration::from_secs(30)).await });
    while dialer.pending() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished(), "second dial should wait for queue space");

    dialer.close().await;
    for dial in [queued, blocked] {
        let result = tokio::time::timeout(Duration::from_secs(5), dial)
            .await
            .expect("dial should unblock on close")
            .unwrap();
        assert!(result.unwrap_err().is_closed());
    }
    assert_eq!(dialer.pending(), 0);
}

#[tokio::test]
async fn test_close_fails_send_blocked_on_full_queue() {
    let config = ListenerConfig::default().with_queue_capacity(1);
    let listener = Listener::<u32>::with_config(config).unwrap();
    let requests = listener.requests();
    let request = |n: u32| Request::new(n, RequestId(u128::from(n)), Network::Tcp, "127.0.0.1:1");

    requests.send(request(1)).await.unwrap();
    let producer = requests.clone();
    let blocked = tokio::spawn(async move { producer.send(request(2)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished(), "send should wait for queue space");

    listener.close();
    let result = tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .expect("send should unblock on close")
        .unwrap();
    assert!(result.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_concurrent_close_waits_for_port_release() {
    let dialer = bind_dialer().await;
    let address = dialer.address();

    // whichever close finishes first must already have released the port
    tokio::select! {
        _ = dialer.close() => {}
        _ = dialer.close() => {}
    }
    let rebound = TcpListener::bind(address).await;
    assert!(rebound.is_ok(), "port should be free after close: {:?}", rebound.err());
}
