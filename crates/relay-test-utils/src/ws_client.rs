//! WebSocket client helpers for end-to-end tests.
//!
//! Thin wrappers over `tokio-tungstenite` with timeouts, so a missing
//! message fails the test instead of hanging it.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Client socket type returned by [`connect`].
pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long receive helpers wait for a frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a WebSocket connection.
///
/// # Errors
///
/// Fails if the handshake is refused (see [`connect_status`] for the status).
pub async fn connect(url: &str) -> Result<WsClient, anyhow::Error> {
    let (ws, _response) = connect_async(url)
        .await
        .map_err(|e| anyhow::anyhow!("WebSocket connect to {url} failed: {e}"))?;
    Ok(ws)
}

/// Attempt a handshake that is expected to be refused and return the HTTP
/// status the server answered with.
///
/// # Errors
///
/// Fails if the upgrade unexpectedly succeeds or the error carries no
/// HTTP response.
pub async fn connect_status(url: &str) -> Result<u16, anyhow::Error> {
    match connect_async(url).await {
        Ok(_) => Err(anyhow::anyhow!("upgrade to {url} unexpectedly succeeded")),
        Err(tungstenite::Error::Http(response)) => Ok(response.status().as_u16()),
        Err(e) => Err(anyhow::anyhow!("handshake failed without HTTP status: {e}")),
    }
}

/// Send a JSON value as a text frame.
pub async fn send_json(ws: &mut WsClient, value: &serde_json::Value) -> Result<(), anyhow::Error> {
    send_text(ws, &value.to_string()).await
}

/// Send a raw text frame.
pub async fn send_text(ws: &mut WsClient, text: &str) -> Result<(), anyhow::Error> {
    ws.send(Message::Text(text.to_string()))
        .await
        .map_err(|e| anyhow::anyhow!("WebSocket send failed: {e}"))
}

/// Receive the next text frame and parse it as JSON.
///
/// Ping and pong frames are skipped.
///
/// # Errors
///
/// Fails on timeout, on a close frame, or on non-JSON text.
pub async fn recv_json(ws: &mut WsClient) -> Result<serde_json::Value, anyhow::Error> {
    let text = recv_text(ws).await?;
    serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("received non-JSON text {text:?}: {e}"))
}

/// Receive the next text frame.
///
/// # Errors
///
/// Fails on timeout or if the connection closes first.
pub async fn recv_text(ws: &mut WsClient) -> Result<String, anyhow::Error> {
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(other)) => return Err(anyhow::anyhow!("expected text, got {other:?}")),
                Some(Err(e)) => return Err(anyhow::anyhow!("WebSocket read failed: {e}")),
                None => return Err(anyhow::anyhow!("connection closed before a text frame")),
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("no text frame within {RECV_TIMEOUT:?}"))?
}

/// Wait for the server to close the connection and return its close code.
///
/// Text frames received before the close are discarded. A connection that
/// ends without a close frame yields `None`.
///
/// # Errors
///
/// Fails on timeout.
pub async fn expect_close(ws: &mut WsClient) -> Result<Option<u16>, anyhow::Error> {
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("connection not closed within {RECV_TIMEOUT:?}"))
}

/// Assert that no text frame arrives within `window`.
///
/// # Errors
///
/// Fails if a text frame arrives.
pub async fn expect_silence(ws: &mut WsClient, window: Duration) -> Result<(), anyhow::Error> {
    let received = tokio::time::timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => {
                    // Closed sockets receive nothing; park until the window ends.
                    std::future::pending::<()>().await;
                }
            }
        }
    })
    .await;

    match received {
        Ok(Some(text)) => Err(anyhow::anyhow!("expected silence, received {text}")),
        _ => Ok(()),
    }
}

/// Send a close frame and drain until the server acknowledges it.
pub async fn close(mut ws: WsClient) {
    let _ = ws.close(None).await;
    let _ = tokio::time::timeout(RECV_TIMEOUT, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}
