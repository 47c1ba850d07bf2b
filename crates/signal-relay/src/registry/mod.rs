//! Per-worker connection registry and room state machine.
//!
//! Maps room ids to the connections attached to them on this worker. The
//! registry is a local cache of "who is attached here": it is rebuilt from
//! live connections on restart and never shared across workers.
//!
//! # Invariants
//!
//! - A room exists iff it has a host or at least one viewer.
//! - At most one host per room. A newer host evicts the older one, which is
//!   closed with [`CLOSE_HOST_REPLACED`] before being replaced.
//! - The cached offer is cleared when the host detaches and treated as
//!   absent once older than the configured TTL.
//!
//! All state sits behind one registry-wide mutex. Nothing awaits while it
//! is held; outbound writes go through non-blocking [`ClientSink`] queues.

pub mod admin;
pub mod connection;

pub use admin::AdminViewers;
pub use connection::{ClientSink, ConnectionHandle, Outbound, SenderTag};

use crate::observability::metrics;
use crate::protocol::{Role, SignalKind, CLOSE_HOST_REPLACED};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What happened when a connection attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachOutcome {
    /// Tag of the host that was closed to make room for this one.
    pub evicted_host: Option<SenderTag>,
    /// Whether a cached offer was queued to the new connection.
    pub replayed_offer: bool,
}

/// Result of routing a bus message into a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomDelivery {
    /// The room has no members on this worker.
    NotLocal,
    /// Fan-out ran; counts exclude the sender itself.
    Delivered { delivered: usize, failed: usize },
}

/// Point-in-time view of one room, for tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub host: Option<SenderTag>,
    pub viewers: Vec<SenderTag>,
    pub cached_offer: Option<String>,
}

struct CachedOffer {
    payload: String,
    sender: Option<String>,
    stored_at: Instant,
}

impl CachedOffer {
    fn is_fresh(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.map_or(true, |ttl| now.saturating_duration_since(self.stored_at) < ttl)
    }
}

#[derive(Default)]
struct RoomState {
    host: Option<ConnectionHandle>,
    viewers: HashMap<SenderTag, ConnectionHandle>,
    latest_offer: Option<CachedOffer>,
}

impl RoomState {
    fn is_empty(&self) -> bool {
        self.host.is_none() && self.viewers.is_empty()
    }

    fn members(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.host.iter().chain(self.viewers.values())
    }

    /// Drops the cached offer if it has expired, then returns what is left.
    fn fresh_offer(&mut self, ttl: Option<Duration>, now: Instant) -> Option<&CachedOffer> {
        if self
            .latest_offer
            .as_ref()
            .is_some_and(|offer| !offer.is_fresh(ttl, now))
        {
            self.latest_offer = None;
        }
        self.latest_offer.as_ref()
    }
}

/// Room registry for one worker.
pub struct ConnectionRegistry {
    rooms: Mutex<HashMap<String, RoomState>>,
    offer_ttl: Option<Duration>,
}

impl ConnectionRegistry {
    /// Create an empty registry. `offer_ttl` of `None` keeps cached offers
    /// until the host detaches.
    #[must_use]
    pub fn new(offer_ttl: Option<Duration>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            offer_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RoomState>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach an authorized connection to its room, creating the room if
    /// needed.
    ///
    /// A host evicts any other host in the room. Any connection, host or
    /// viewer, receives the cached offer if one is live.
    pub fn attach(&self, handle: ConnectionHandle) -> AttachOutcome {
        let mut outcome = AttachOutcome::default();
        let mut rooms = self.lock();
        let room = rooms.entry(handle.room_id().to_string()).or_default();

        match handle.role() {
            Role::Host => {
                if let Some(previous) = room.host.take() {
                    if previous.tag() != handle.tag() {
                        previous.sink().close(CLOSE_HOST_REPLACED, "host replaced");
                        metrics::record_host_takeover();
                        info!(
                            target: "relay.registry",
                            room_id = %handle.room_id(),
                            evicted = %previous.tag(),
                            host = %handle.tag(),
                            "Host replaced by newer connection"
                        );
                        outcome.evicted_host = Some(previous.tag().clone());
                    }
                }
                room.host = Some(handle.clone());
            }
            Role::Viewer => {
                room.viewers.insert(handle.tag().clone(), handle.clone());
            }
        }

        if let Some(offer) = room.fresh_offer(self.offer_ttl, Instant::now()) {
            if !handle.tag().matches(offer.sender.as_deref()) {
                match handle.sink().deliver(offer.payload.clone()) {
                    Ok(()) => outcome.replayed_offer = true,
                    Err(e) => {
                        metrics::record_delivery_failure();
                        warn!(
                            target: "relay.registry",
                            room_id = %handle.room_id(),
                            tag = %handle.tag(),
                            error = %e,
                            "Failed to replay cached offer"
                        );
                    }
                }
            }
        }

        let room_count = rooms.len();
        drop(rooms);
        metrics::set_rooms_active(room_count);

        debug!(
            target: "relay.registry",
            room_id = %handle.room_id(),
            role = %handle.role(),
            tag = %handle.tag(),
            replayed_offer = outcome.replayed_offer,
            "Connection attached"
        );

        outcome
    }

    /// Detach a connection from its room. Idempotent.
    ///
    /// A host that was already evicted does not touch its successor's slot
    /// or the cached offer. Returns whether the connection was attached.
    pub fn detach(&self, handle: &ConnectionHandle) -> bool {
        let mut rooms = self.lock();
        let Some(room) = rooms.get_mut(handle.room_id()) else {
            return false;
        };

        let removed = match handle.role() {
            Role::Host => {
                if room.host.as_ref().is_some_and(|h| h.tag() == handle.tag()) {
                    room.host = None;
                    if room.latest_offer.take().is_some() {
                        debug!(
                            target: "relay.registry",
                            room_id = %handle.room_id(),
                            "Cleared cached offer of departed host"
                        );
                    }
                    true
                } else {
                    false
                }
            }
            Role::Viewer => room.viewers.remove(handle.tag()).is_some(),
        };

        if room.is_empty() {
            rooms.remove(handle.room_id());
            debug!(target: "relay.registry", room_id = %handle.room_id(), "Room removed");
        }

        let room_count = rooms.len();
        drop(rooms);
        metrics::set_rooms_active(room_count);

        if removed {
            debug!(
                target: "relay.registry",
                room_id = %handle.room_id(),
                role = %handle.role(),
                tag = %handle.tag(),
                "Connection detached"
            );
        }

        removed
    }

    /// Fan a signaling payload out to every local member of `room_id`
    /// except `sender`.
    ///
    /// Offers replace the room's cached offer before fan-out. Rooms with no
    /// local members are left alone: nothing is cached and nothing created.
    pub fn relay_signal(
        &self,
        room_id: &str,
        kind: SignalKind,
        payload: &str,
        sender: Option<&str>,
    ) -> RoomDelivery {
        let mut rooms = self.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return RoomDelivery::NotLocal;
        };

        if kind == SignalKind::Offer {
            room.latest_offer = Some(CachedOffer {
                payload: payload.to_string(),
                sender: sender.map(str::to_string),
                stored_at: Instant::now(),
            });
        }

        let mut delivered = 0;
        let mut failed = 0;
        for member in room.members() {
            if member.tag().matches(sender) {
                continue;
            }
            match member.sink().deliver(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    metrics::record_delivery_failure();
                    warn!(
                        target: "relay.registry",
                        room_id = %room_id,
                        tag = %member.tag(),
                        error = %e,
                        "Delivery to local connection failed"
                    );
                }
            }
        }

        RoomDelivery::Delivered { delivered, failed }
    }

    /// Ids of all rooms on this worker, sorted.
    #[must_use]
    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.lock().len()
    }

    /// Total attached connections across all rooms.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().values().map(|room| room.members().count()).sum()
    }

    /// Snapshot of one room, or `None` if it does not exist here.
    #[must_use]
    pub fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let now = Instant::now();
        let rooms = self.lock();
        let room = rooms.get(room_id)?;

        let mut viewers: Vec<SenderTag> = room.viewers.keys().cloned().collect();
        viewers.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        Some(RoomSnapshot {
            host: room.host.as_ref().map(|h| h.tag().clone()),
            viewers,
            cached_offer: room
                .latest_offer
                .as_ref()
                .filter(|offer| offer.is_fresh(self.offer_ttl, now))
                .map(|offer| offer.payload.clone()),
        })
    }
}
