//! Admin event endpoint.
//!
//! `GET /api/v1/ws/events?token={jwt}`
//!
//! Elevated principals receive every payload published to the admin channel,
//! verbatim, through the bus bridge. The endpoint never publishes; inbound
//! frames are read and discarded only to notice the disconnect.

use super::authenticate;
use super::socket::{next_text, reject, run_writer, AdminSubscription};
use crate::auth::authorize_admin_events;
use crate::registry::{ClientSink, SenderTag};
use crate::routes::AppState;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use common::secret::SecretString;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn, Instrument};

/// Query parameters of the admin event handshake.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub token: Option<SecretString>,
}

/// Upgrade to an admin event connection.
///
/// A missing token is not refused at the HTTP layer: the socket is accepted
/// and closed with 4001 like any other authentication failure.
#[instrument(skip_all)]
pub async fn events_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let max_message_bytes = state.config.max_message_bytes;
    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| {
            run_events(socket, state, query.token).instrument(tracing::info_span!("admin_events"))
        })
}

async fn run_events(socket: WebSocket, state: Arc<AppState>, token: Option<SecretString>) {
    let authorized = authenticate(state.verifier.as_ref(), token.as_ref())
        .await
        .and_then(|principal| authorize_admin_events(&principal));
    if let Err(e) = authorized {
        warn!(
            target: "relay.ws.events",
            reason = e.rejection_reason(),
            "Admin event connection rejected"
        );
        reject(socket, &e).await;
        return;
    }

    let tag = SenderTag::generate(&state.config.worker_id);
    let cancel_token = state.shutdown_token.child_token();
    let (sink, outbound) = ClientSink::channel(
        tag.clone(),
        state.config.outbound_buffer,
        cancel_token.clone(),
    );

    state.admins.add(sink);
    let _subscription = AdminSubscription::new(Arc::clone(&state.admins), tag.clone());
    info!(target: "relay.ws.events", tag = %tag, "Admin viewer subscribed");

    let (ws_sink, mut ws_stream) = socket.split();
    let writer = run_writer(ws_sink, outbound, cancel_token.clone());
    tokio::pin!(writer);

    loop {
        tokio::select! {
            exit = &mut writer => {
                debug!(target: "relay.ws.events", tag = %tag, exit = ?exit, "Admin writer stopped");
                break;
            }
            text = next_text(&mut ws_stream) => {
                if text.is_none() {
                    debug!(target: "relay.ws.events", tag = %tag, "Admin viewer disconnected");
                    break;
                }
            }
        }
    }
    cancel_token.cancel();
}
