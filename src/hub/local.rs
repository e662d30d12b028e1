//! In-process [`Hub`] backed by a concurrent map of per-room subscriber sets.
//!
//! DESIGN
//! ======
//! Rooms live in a `DashMap`, so unrelated rooms land on different shards and
//! never contend. `publish` snapshots the room's senders under the shard
//! lock, releases it, then `try_send`s to each. A full or closed channel
//! gets its subscriber removed, which the connection observes as `None`.

use std::collections::HashMap;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ConnId, Delivery, Hub, Subscription};
use crate::event::Outbound;

struct Subscriber {
    user_id: i64,
    tx: mpsc::Sender<Outbound>,
}

pub struct LocalHub {
    rooms: DashMap<String, HashMap<ConnId, Subscriber>>,
    buffer: usize,
}

impl LocalHub {
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self { rooms: DashMap::new(), buffer: buffer.max(1) }
    }

    /// Number of rooms with at least one subscriber.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Hub for LocalHub {
    fn subscribe(&self, room_key: &str, user_id: i64) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let conn_id = Uuid::new_v4();
        self.rooms
            .entry(room_key.to_owned())
            .or_default()
            .insert(conn_id, Subscriber { user_id, tx });
        debug!(%room_key, %conn_id, user_id, "subscribed");
        Subscription { conn_id, rx }
    }

    fn unsubscribe(&self, room_key: &str, conn_id: ConnId) {
        let removed = self
            .rooms
            .get_mut(room_key)
            .and_then(|mut set| set.remove(&conn_id));
        self.rooms.remove_if(room_key, |_, set| set.is_empty());
        if let Some(sub) = removed {
            debug!(%room_key, %conn_id, user_id = sub.user_id, "unsubscribed");
        }
    }

    fn publish(&self, room_key: &str, event: &Outbound) -> Delivery {
        let targets: Vec<(ConnId, i64, mpsc::Sender<Outbound>)> = match self.rooms.get(room_key) {
            Some(set) => set
                .iter()
                .map(|(conn_id, sub)| (*conn_id, sub.user_id, sub.tx.clone()))
                .collect(),
            None => return Delivery::default(),
        };

        let mut delivery = Delivery::default();
        for (conn_id, user_id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%room_key, %conn_id, user_id, kind = event.kind(), "delivery failure: buffer full; dropping subscriber");
                    delivery.dropped += 1;
                    self.unsubscribe(room_key, conn_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%room_key, %conn_id, user_id, kind = event.kind(), "delivery failure: connection closed");
                    delivery.dropped += 1;
                    self.unsubscribe(room_key, conn_id);
                }
            }
        }
        delivery
    }

    fn subscriber_count(&self, room_key: &str) -> usize {
        self.rooms.get(room_key).map_or(0, |set| set.len())
    }

    fn shutdown(&self) {
        let subscribers: usize = self.rooms.iter().map(|set| set.len()).sum();
        self.rooms.clear();
        debug!(subscribers, "hub shut down");
    }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;
