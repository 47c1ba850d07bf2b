//! WebSocket plumbing shared by the signaling and admin event endpoints.
//!
//! Each accepted socket is split in two. The writer half drains the
//! connection's outbound queue; the reader half is driven by the endpoint.
//! Whichever finishes first ends the connection.

use crate::errors::RelayError;
use crate::observability::metrics;
use crate::registry::{AdminViewers, ConnectionHandle, ConnectionRegistry, Outbound, SenderTag};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why the writer half stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriterExit {
    /// The relay queued a close frame (host takeover).
    Closed(u16),
    /// The connection token was cancelled (shutdown or stuck queue).
    Cancelled,
    /// Writing to the transport failed.
    TransportError,
}

/// Drain `outbound` into the socket until a close frame, cancellation or a
/// transport error.
pub(crate) async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel_token: CancellationToken,
) -> WriterExit {
    loop {
        let frame = tokio::select! {
            () = cancel_token.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                return WriterExit::Cancelled;
            }
            frame = outbound.recv() => frame,
        };

        match frame {
            Some(Outbound::Text(text)) => {
                if sink.send(Message::Text(text)).await.is_err() {
                    return WriterExit::TransportError;
                }
            }
            Some(Outbound::Close { code, reason }) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                return WriterExit::Closed(code);
            }
            // Every sender dropped; nothing can reach this socket any more.
            None => return WriterExit::Cancelled,
        }
    }
}

/// Next inbound text frame, or `None` once the client has gone.
///
/// Binary frames are ignored. Ping and pong are handled by the transport.
pub(crate) async fn next_text(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Binary(bytes)) => {
                debug!(
                    target: "relay.ws",
                    len = bytes.len(),
                    "Ignoring binary frame"
                );
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => return None,
            Err(e) => {
                debug!(target: "relay.ws", error = %e, "WebSocket read failed");
                return None;
            }
        }
    }
    None
}

/// Close a freshly upgraded socket that failed authentication or
/// authorization. The socket is never attached anywhere.
pub(crate) async fn reject(mut socket: WebSocket, err: &RelayError) {
    metrics::record_auth_rejection(err.rejection_reason());
    let code = err.close_code().unwrap_or(close_code::POLICY);
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: "unauthorized".into(),
        })))
        .await;
}

/// Room membership held for the lifetime of a signaling connection.
///
/// Dropping it detaches the connection, on every exit path including task
/// cancellation.
pub(crate) struct RoomAttachment {
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
}

impl RoomAttachment {
    pub(crate) fn attach(registry: Arc<ConnectionRegistry>, handle: ConnectionHandle) -> Self {
        metrics::connection_opened(handle.role().as_str());
        registry.attach(handle.clone());
        Self { registry, handle }
    }
}

impl Drop for RoomAttachment {
    fn drop(&mut self) {
        self.registry.detach(&self.handle);
        metrics::connection_closed(self.handle.role().as_str());
    }
}

/// Admin viewer membership, removed on drop.
pub(crate) struct AdminSubscription {
    admins: Arc<AdminViewers>,
    tag: SenderTag,
}

impl AdminSubscription {
    pub(crate) fn new(admins: Arc<AdminViewers>, tag: SenderTag) -> Self {
        metrics::connection_opened("admin");
        Self { admins, tag }
    }
}

impl Drop for AdminSubscription {
    fn drop(&mut self) {
        self.admins.remove(&self.tag);
        metrics::connection_closed("admin");
    }
}
