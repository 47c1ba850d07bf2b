//! Signaling endpoint.
//!
//! `GET /api/v1/ws/ws?role={host|viewer}&room_id={id}&token={jwt}`
//!
//! # Flow
//!
//! 1. `role` and `room_id` are validated before the upgrade (HTTP 400)
//! 2. After the upgrade the token is verified and the role authorized; a
//!    rejected client is closed with 4001 and never reaches the registry
//! 3. The connection attaches to its room and receives any cached offer
//! 4. Each inbound `offer`, `answer` or `ice_candidate` is tagged with the
//!    connection's sender tag and published to the room channel. The bus
//!    bridge on every worker, this one included, does the actual fan-out.
//!
//! If publishing fails the message is delivered to the room's members on
//! this worker directly, so peers sharing a worker keep talking while the
//! bus is down.

use super::authenticate;
use super::socket::{next_text, reject, run_writer, RoomAttachment, WriterExit};
use crate::auth::authorize;
use crate::errors::RelayError;
use crate::observability::metrics;
use crate::protocol::{validate_room_id, Role, SignalEnvelope};
use crate::registry::{ClientSink, ConnectionHandle, SenderTag};
use crate::routes::AppState;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use common::secret::SecretString;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn, Instrument};

/// Query parameters of the signaling handshake.
#[derive(Debug, Deserialize)]
pub struct SignalingQuery {
    pub role: Option<String>,
    pub room_id: Option<String>,
    /// Bearer credential. Redacted in `Debug`.
    pub token: Option<SecretString>,
}

/// Validate the handshake and upgrade to a signaling connection.
///
/// # Errors
///
/// `BadRequest` (HTTP 400) for a missing or invalid `role` or `room_id`.
#[instrument(skip_all, fields(role, room_id))]
pub async fn signaling_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignalingQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, RelayError> {
    let role: Role = query
        .role
        .as_deref()
        .ok_or_else(|| RelayError::BadRequest("role is required".to_string()))?
        .parse()?;
    let room_id = query
        .room_id
        .ok_or_else(|| RelayError::BadRequest("room_id is required".to_string()))?;
    validate_room_id(&room_id)?;

    tracing::Span::current().record("role", role.as_str());
    tracing::Span::current().record("room_id", room_id.as_str());

    let token = query.token;
    let max_message_bytes = state.config.max_message_bytes;
    let span = tracing::info_span!("signaling", role = %role, room_id = %room_id);

    Ok(ws
        .max_message_size(max_message_bytes)
        .on_upgrade(move |socket| {
            run_signaling(socket, state, role, room_id, token).instrument(span)
        }))
}

async fn run_signaling(
    socket: WebSocket,
    state: Arc<AppState>,
    role: Role,
    room_id: String,
    token: Option<SecretString>,
) {
    let authorized = authenticate(state.verifier.as_ref(), token.as_ref())
        .await
        .and_then(|principal| authorize(role, &principal));
    if let Err(e) = authorized {
        warn!(
            target: "relay.ws.signaling",
            reason = e.rejection_reason(),
            "Signaling connection rejected"
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
    let handle = ConnectionHandle::new(sink, role, room_id.clone());

    // Detaches on every exit path below, including cancellation of this task.
    let _attachment = RoomAttachment::attach(Arc::clone(&state.registry), handle);
    info!(target: "relay.ws.signaling", tag = %tag, "Signaling connection attached");

    let (ws_sink, mut ws_stream) = socket.split();
    let writer = run_writer(ws_sink, outbound, cancel_token.clone());
    tokio::pin!(writer);

    let writer_exit = loop {
        tokio::select! {
            exit = &mut writer => break Some(exit),
            text = next_text(&mut ws_stream) => match text {
                Some(text) => relay_inbound(&state, &room_id, &tag, &text).await,
                None => break None,
            },
        }
    };

    match writer_exit {
        Some(WriterExit::Closed(code)) => {
            info!(target: "relay.ws.signaling", tag = %tag, code = code, "Connection closed by relay");
        }
        Some(WriterExit::Cancelled) => {
            debug!(target: "relay.ws.signaling", tag = %tag, "Connection cancelled");
        }
        Some(WriterExit::TransportError) => {
            debug!(target: "relay.ws.signaling", tag = %tag, "Connection write failed");
        }
        None => {
            debug!(target: "relay.ws.signaling", tag = %tag, "Client disconnected");
        }
    }
    cancel_token.cancel();
}

/// Handle one inbound text frame from a room member.
///
/// Malformed frames and non-signaling kinds are dropped; the connection
/// stays open either way.
pub(crate) async fn relay_inbound(state: &AppState, room_id: &str, tag: &SenderTag, text: &str) {
    let mut envelope = match SignalEnvelope::parse(text) {
        Ok(Some(envelope)) => envelope,
        Ok(None) => {
            debug!(target: "relay.ws.signaling", tag = %tag, "Ignoring non-signaling message");
            return;
        }
        Err(e) => {
            metrics::record_malformed_message();
            debug!(target: "relay.ws.signaling", tag = %tag, error = %e, "Dropping malformed message");
            return;
        }
    };

    let kind = envelope.kind();
    envelope.tag(tag.as_str());
    let channel = state.channels.room_channel(room_id);

    match state.publisher.publish(&channel, envelope.to_json()).await {
        Ok(()) => {
            metrics::record_message_published(kind.as_str());
            debug!(target: "relay.ws.signaling", tag = %tag, kind = kind.as_str(), "Signal published");
        }
        Err(e) => {
            warn!(
                target: "relay.ws.signaling",
                tag = %tag,
                kind = kind.as_str(),
                error = %e,
                "Bus publish failed, delivering to local room members only"
            );
            envelope.untag();
            state
                .registry
                .relay_signal(room_id, kind, &envelope.into_json(), Some(tag.as_str()));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::{IdentityVerifier, Principal};
    use crate::bus::{BusPublisher, BusSubscriber, ChannelNames, MemoryBus};
    use crate::config::Config;
    use crate::protocol::SENDER_FIELD;
    use crate::registry::{AdminViewers, ConnectionRegistry, Outbound};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct AcceptAll;

    #[async_trait]
    impl IdentityVerifier for AcceptAll {
        async fn verify(&self, _credential: &SecretString) -> Result<Principal, RelayError> {
            Ok(Principal::new("42", true))
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl BusPublisher for FailingPublisher {
        async fn publish(&self, _channel: &str, _payload: String) -> Result<(), RelayError> {
            Err(RelayError::Redis("connection refused".to_string()))
        }
    }

    fn test_config() -> Config {
        let vars = HashMap::from([(
            "RELAY_JWT_SECRET".to_string(),
            "test-secret-at-least-32-bytes-long!!".to_string(),
        )]);
        Config::from_vars(&vars).unwrap()
    }

    fn state_with(publisher: Arc<dyn BusPublisher>) -> AppState {
        AppState {
            registry: Arc::new(ConnectionRegistry::new(None)),
            admins: Arc::new(AdminViewers::new()),
            publisher,
            verifier: Arc::new(AcceptAll),
            channels: ChannelNames::default(),
            config: test_config(),
            shutdown_token: CancellationToken::new(),
        }
    }

    fn attach(
        state: &AppState,
        role: Role,
        room: &str,
    ) -> (SenderTag, mpsc::Receiver<Outbound>) {
        let tag = SenderTag::generate("relay-test");
        let (sink, rx) = ClientSink::channel(tag.clone(), 8, CancellationToken::new());
        state
            .registry
            .attach(ConnectionHandle::new(sink, role, room.to_string()));
        (tag, rx)
    }

    #[tokio::test]
    async fn test_signal_is_tagged_and_published_to_room_channel() {
        let bus = Arc::new(MemoryBus::new());
        let state = state_with(bus.clone());
        let mut stream = bus
            .subscribe(&state.channels.room_pattern(), state.channels.admin_channel())
            .await
            .unwrap();
        let tag = SenderTag::generate("relay-test");

        relay_inbound(&state, "r1", &tag, r#"{"type":"offer","sdp":"A"}"#).await;

        let message = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.channel, "webrtc_room_r1");
        let value: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["sdp"], "A");
        assert_eq!(value[SENDER_FIELD], tag.as_str());
    }

    #[tokio::test]
    async fn test_publish_does_not_deliver_locally() {
        let state = state_with(Arc::new(MemoryBus::new()));
        let (_host, mut host_rx) = attach(&state, Role::Host, "r1");
        let viewer = SenderTag::generate("relay-test");

        relay_inbound(&state, "r1", &viewer, r#"{"type":"answer","sdp":"B"}"#).await;

        // Fan-out is the bridge's job; the endpoint only publishes.
        assert!(host_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_not_published() {
        let bus = Arc::new(MemoryBus::new());
        let state = state_with(bus.clone());
        let mut stream = bus
            .subscribe(&state.channels.room_pattern(), state.channels.admin_channel())
            .await
            .unwrap();
        let tag = SenderTag::generate("relay-test");

        for text in ["not json", "[]", r#"{"sdp":"A"}"#, r#"{"type":"chat","text":"hi"}"#] {
            relay_inbound(&state, "r1", &tag, text).await;
        }

        let next = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(next.is_err(), "nothing should reach the bus");
    }

    #[tokio::test]
    async fn test_publish_failure_falls_back_to_local_fan_out() {
        let state = state_with(Arc::new(FailingPublisher));
        let (_host, mut host_rx) = attach(&state, Role::Host, "r1");
        let (viewer, mut viewer_rx) = attach(&state, Role::Viewer, "r1");

        relay_inbound(&state, "r1", &viewer, r#"{"type":"offer","sdp":"A"}"#).await;

        let Ok(Outbound::Text(text)) = host_rx.try_recv() else {
            panic!("host should receive the offer locally");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({"type": "offer", "sdp": "A"}));

        assert!(viewer_rx.try_recv().is_err(), "no echo to the sender");

        let snapshot = state.registry.snapshot("r1").unwrap();
        assert!(snapshot.cached_offer.is_some());
    }

    #[tokio::test]
    async fn test_publish_failure_for_unknown_room_is_harmless() {
        let state = state_with(Arc::new(FailingPublisher));
        let tag = SenderTag::generate("relay-test");

        relay_inbound(&state, "nobody-here", &tag, r#"{"type":"ice_candidate","candidate":"c"}"#)
            .await;

        assert_eq!(state.registry.room_count(), 0);
    }
}
