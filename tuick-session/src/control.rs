//! The loopback control endpoint.
//!
//! A minimal HTTP-shaped handler bound to `127.0.0.1:0` that accepts one
//! verb: `POST /reload`, authenticated with the session reload token via the
//! `x-tuick-key` header or a `?key=` query parameter. Valid requests land on
//! a single-slot queue; while a reload is already pending further requests
//! coalesce (drop-newer — the next run observes the latest filesystem state
//! anyway). Everything else is rejected without disturbing the session.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{io_err, SessionError};
use crate::token::ReloadToken;

/// Environment variable carrying the endpoint port to children.
pub const RELOAD_PORT_ENV: &str = "TUICK_RELOAD_PORT";
/// Environment variable carrying the reload token to children.
pub const RELOAD_KEY_ENV: &str = "TUICK_RELOAD_KEY";

/// How long a client may take to send its request head.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

pub struct ControlEndpoint {
    port: u16,
    acceptor: JoinHandle<()>,
}

impl ControlEndpoint {
    /// Bind on an OS-assigned loopback port and start the acceptor task.
    /// Returns the endpoint and the coalescing reload queue.
    pub async fn bind(
        token: ReloadToken,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(Self, mpsc::Receiver<()>), SessionError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| io_err("127.0.0.1:0", e))?;
        let port = listener
            .local_addr()
            .map_err(|e| io_err("127.0.0.1:0", e))?
            .port();

        let (reload_tx, reload_rx) = mpsc::channel(1);
        let acceptor = tokio::spawn(accept_loop(listener, token, reload_tx, shutdown));

        Ok((Self { port, acceptor }, reload_rx))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the listener; no further reloads are accepted.
    pub async fn close(self) {
        self.acceptor.abort();
        let _ = self.acceptor.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    token: ReloadToken,
    reload_tx: mpsc::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "control accept error");
                        continue;
                    }
                };
                // Requests are tiny and serviced inline: serial handling
                // keeps reload ordering identical to arrival order.
                handle_client(stream, peer, &token, &reload_tx).await;
            }
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    token: &ReloadToken,
    reload_tx: &mpsc::Sender<()>,
) {
    if !peer.ip().is_loopback() {
        tracing::debug!(%peer, "rejected non-loopback control request");
        let _ = respond(&mut stream, "403 Forbidden").await;
        return;
    }

    let request = match timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(err)) => {
            tracing::debug!(%peer, error = %err, "malformed control request");
            let _ = respond(&mut stream, "400 Bad Request").await;
            return;
        }
        Err(_) => {
            tracing::debug!(%peer, "control request read timed out");
            return;
        }
    };

    if !request.key.as_deref().is_some_and(|key| token.matches(key)) {
        tracing::debug!(%peer, "rejected control request with bad key");
        let _ = respond(&mut stream, "401 Unauthorized").await;
        return;
    }

    if request.method != "POST" || request.path != "/reload" {
        tracing::debug!(%peer, method = %request.method, path = %request.path,
            "unknown control verb");
        let _ = respond(&mut stream, "404 Not Found").await;
        return;
    }

    match reload_tx.try_send(()) {
        Ok(()) => tracing::debug!(%peer, "reload queued"),
        // Slot already occupied: coalesce, the pending reload covers it.
        Err(mpsc::error::TrySendError::Full(())) => {
            tracing::debug!(%peer, "reload coalesced into pending one");
        }
        Err(mpsc::error::TrySendError::Closed(())) => {
            tracing::debug!(%peer, "reload queue closed, session draining");
        }
    }
    let _ = respond(&mut stream, "204 No Content").await;
}

struct Request {
    method: String,
    path: String,
    key: Option<String>,
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Request> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let target = parts.next().unwrap_or_default();

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    };

    let mut key = query.as_deref().and_then(query_key);
    loop {
        let mut header = String::new();
        let read = reader.read_line(&mut header).await?;
        let header = header.trim_end();
        if read == 0 || header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("x-tuick-key") {
                key = Some(value.trim().to_owned());
            }
        }
    }

    Ok(Request { method, path, key })
}

fn query_key(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        pair.strip_prefix("key=").map(|value| value.to_owned())
    })
}

async fn respond(stream: &mut TcpStream, status: &str) -> std::io::Result<()> {
    let head = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
    stream.write_all(head.as_bytes()).await?;
    stream.flush().await
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Post one authenticated reload request to a session's control endpoint.
pub async fn post_reload(port: u16, key: &str) -> Result<(), SessionError> {
    let addr = format!("127.0.0.1:{port}");
    let mut stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| io_err(&addr, e))?;
    let request = format!(
        "POST /reload HTTP/1.1\r\nhost: {addr}\r\nx-tuick-key: {key}\r\n\
         content-length: 0\r\nconnection: close\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| io_err(&addr, e))?;

    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .await
        .map_err(|e| io_err(&addr, e))?;
    if status_line.contains("204") {
        Ok(())
    } else {
        Err(SessionError::Protocol(format!(
            "control endpoint refused reload: {}",
            status_line.trim()
        )))
    }
}

/// Post a reload using `TUICK_RELOAD_PORT` / `TUICK_RELOAD_KEY` from the
/// environment, as the finder and watcher callbacks do.
pub async fn post_reload_from_env() -> Result<(), SessionError> {
    let port = std::env::var(RELOAD_PORT_ENV)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .ok_or_else(|| {
            SessionError::Protocol(format!("missing environment variable: {RELOAD_PORT_ENV}"))
        })?;
    let key = std::env::var(RELOAD_KEY_ENV).map_err(|_| {
        SessionError::Protocol(format!("missing environment variable: {RELOAD_KEY_ENV}"))
    })?;
    post_reload(port, &key).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    async fn endpoint() -> (ControlEndpoint, mpsc::Receiver<()>, ReloadToken) {
        let token = ReloadToken::generate();
        let (shutdown_tx, _) = broadcast::channel(1);
        let (endpoint, reload_rx) = ControlEndpoint::bind(token.clone(), shutdown_tx.subscribe())
            .await
            .expect("bind");
        // Keep the shutdown sender alive for the endpoint's lifetime: once
        // every sender drops, the acceptor's shutdown receiver reads the
        // channel as closed and the accept loop exits immediately.
        std::mem::forget(shutdown_tx);
        (endpoint, reload_rx, token)
    }

    #[tokio::test]
    async fn valid_reload_is_queued() {
        let (endpoint, mut reload_rx, token) = endpoint().await;
        post_reload(endpoint.port(), token.as_str())
            .await
            .expect("post");
        reload_rx.recv().await.expect("reload event");
        endpoint.close().await;
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_without_event() {
        let (endpoint, mut reload_rx, _token) = endpoint().await;
        let err = post_reload(endpoint.port(), "not-the-key")
            .await
            .expect_err("rejected");
        assert!(matches!(err, SessionError::Protocol(_)));
        assert!(
            reload_rx.try_recv().is_err(),
            "no generation change on auth failure"
        );
        endpoint.close().await;
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let (endpoint, mut reload_rx, _token) = endpoint().await;
        let addr = format!("127.0.0.1:{}", endpoint.port());
        let mut stream = TcpStream::connect(&addr).await.expect("connect");
        stream
            .write_all(b"POST /reload HTTP/1.1\r\nhost: x\r\n\r\n")
            .await
            .expect("write");
        let mut reader = BufReader::new(stream);
        let mut status = String::new();
        reader.read_line(&mut status).await.expect("read");
        assert!(status.contains("401"), "got: {status}");
        assert!(reload_rx.try_recv().is_err());
        endpoint.close().await;
    }

    #[tokio::test]
    async fn key_accepted_as_query_parameter() {
        let (endpoint, mut reload_rx, token) = endpoint().await;
        let addr = format!("127.0.0.1:{}", endpoint.port());
        let mut stream = TcpStream::connect(&addr).await.expect("connect");
        let request = format!(
            "POST /reload?key={} HTTP/1.1\r\nhost: x\r\n\r\n",
            token.as_str()
        );
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut reader = BufReader::new(stream);
        let mut status = String::new();
        reader.read_line(&mut status).await.expect("read");
        assert!(status.contains("204"), "got: {status}");
        reload_rx.recv().await.expect("reload event");
        endpoint.close().await;
    }

    #[tokio::test]
    async fn unknown_verb_is_rejected() {
        let (endpoint, mut reload_rx, token) = endpoint().await;
        let addr = format!("127.0.0.1:{}", endpoint.port());
        let mut stream = TcpStream::connect(&addr).await.expect("connect");
        let request = format!(
            "POST /shutdown HTTP/1.1\r\nx-tuick-key: {}\r\n\r\n",
            token.as_str()
        );
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut reader = BufReader::new(stream);
        let mut status = String::new();
        reader.read_line(&mut status).await.expect("read");
        assert!(status.contains("404"), "got: {status}");
        assert!(reload_rx.try_recv().is_err());
        endpoint.close().await;
    }

    #[tokio::test]
    async fn pending_reloads_coalesce() {
        let (endpoint, mut reload_rx, token) = endpoint().await;
        for _ in 0..3 {
            post_reload(endpoint.port(), token.as_str())
                .await
                .expect("post");
        }
        reload_rx.recv().await.expect("one pending reload");
        assert!(
            reload_rx.try_recv().is_err(),
            "extra requests coalesce into the single slot"
        );
        endpoint.close().await;
    }

    #[tokio::test]
    async fn closed_endpoint_refuses_connections() {
        let (endpoint, _reload_rx, token) = endpoint().await;
        let port = endpoint.port();
        endpoint.close().await;
        assert!(post_reload(port, token.as_str()).await.is_err());
    }
}
