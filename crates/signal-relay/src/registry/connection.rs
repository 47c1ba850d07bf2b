//! Connection handles held by the registry.
//!
//! A handle never touches the socket. It owns the sending half of the
//! connection's outbound queue; the connection task drains the other half
//! into the WebSocket. All writes through a handle are non-blocking so they
//! can be issued while the registry lock is held.

use crate::errors::RelayError;
use crate::protocol::Role;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Frames queued for a single client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(String),
    /// Close the socket with the given code; nothing is written after it.
    Close { code: u16, reason: String },
}

/// Process-unique identifier of one connection, used to suppress self-echo.
///
/// Formatted `{worker_id}:{uuid}` so tags from different workers never
/// collide on the shared bus.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SenderTag(Arc<str>);

impl SenderTag {
    /// Mint a fresh tag for a connection accepted by `worker_id`.
    #[must_use]
    pub fn generate(worker_id: &str) -> Self {
        Self(Arc::from(format!("{worker_id}:{}", Uuid::new_v4())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this tag equals a tag carried by a bus message.
    #[must_use]
    pub fn matches(&self, other: Option<&str>) -> bool {
        other == Some(self.as_str())
    }
}

impl fmt::Display for SenderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SenderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenderTag({})", self.0)
    }
}

/// Write side of one client connection.
///
/// Cloned into the registry (room members) or the admin viewer set; the
/// connection task keeps the receiver returned by [`ClientSink::channel`].
#[derive(Clone, Debug)]
pub struct ClientSink {
    tag: SenderTag,
    sender: mpsc::Sender<Outbound>,
    cancel_token: CancellationToken,
}

impl ClientSink {
    /// Create a sink and the receiver its connection task drains.
    ///
    /// `cancel_token` is the connection's own token. It is cancelled when a
    /// close frame cannot be queued, so the task ends even with a full queue.
    #[must_use]
    pub fn channel(
        tag: SenderTag,
        capacity: usize,
        cancel_token: CancellationToken,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                tag,
                sender,
                cancel_token,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn tag(&self) -> &SenderTag {
        &self.tag
    }

    /// Queue a text frame without waiting.
    ///
    /// # Errors
    ///
    /// `Delivery` if the queue is full or the connection task has exited.
    pub fn deliver(&self, text: String) -> Result<(), RelayError> {
        self.sender
            .try_send(Outbound::Text(text))
            .map_err(|e| match e {
                TrySendError::Full(_) => RelayError::Delivery("outbound queue full".to_string()),
                TrySendError::Closed(_) => {
                    RelayError::Delivery("connection already closed".to_string())
                }
            })
    }

    /// Ask the connection to close with `code`.
    ///
    /// Falls back to cancelling the connection task if the close frame
    /// cannot be queued.
    pub fn close(&self, code: u16, reason: &str) {
        let frame = Outbound::Close {
            code,
            reason: reason.to_string(),
        };
        if self.sender.try_send(frame).is_err() {
            self.cancel_token.cancel();
        }
    }

    /// Whether the connection task has stopped draining the queue.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.cancel_token.is_cancelled()
    }
}

/// A signaling connection attached (or about to attach) to a room.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sink: ClientSink,
    role: Role,
    room_id: String,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(sink: ClientSink, role: Role, room_id: String) -> Self {
        Self {
            sink,
            role,
            room_id,
        }
    }

    #[must_use]
    pub fn tag(&self) -> &SenderTag {
        self.sink.tag()
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn sink(&self) -> &ClientSink {
        &self.sink
    }
}
