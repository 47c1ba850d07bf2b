//! Admin event subscribers on this worker.
//!
//! Each connection to the admin event endpoint holds one entry for its
//! lifetime. The bus bridge broadcasts every admin-channel payload to all of
//! them; the endpoint itself never publishes.

use super::connection::{ClientSink, SenderTag};
use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Set of connected admin viewers.
#[derive(Default)]
pub struct AdminViewers {
    viewers: Mutex<HashMap<SenderTag, ClientSink>>,
}

impl AdminViewers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SenderTag, ClientSink>> {
        self.viewers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, sink: ClientSink) {
        let mut viewers = self.lock();
        viewers.insert(sink.tag().clone(), sink);
        metrics::set_admin_viewers_active(viewers.len());
    }

    /// Remove a viewer. Returns whether it was present.
    pub fn remove(&self, tag: &SenderTag) -> bool {
        let mut viewers = self.lock();
        let removed = viewers.remove(tag).is_some();
        metrics::set_admin_viewers_active(viewers.len());
        removed
    }

    /// Queue `payload` verbatim to every admin viewer.
    ///
    /// Returns the number of successful deliveries. A failed delivery is
    /// logged and does not affect the others.
    pub fn broadcast(&self, payload: &str) -> usize {
        let viewers = self.lock();
        let mut delivered = 0;
        for sink in viewers.values() {
            match sink.deliver(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    metrics::record_delivery_failure();
                    warn!(
                        target: "relay.ws.events",
                        tag = %sink.tag(),
                        error = %e,
                        "Admin event delivery failed"
                    );
                }
            }
        }
        delivered
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
