//! Room-scoped fanout of live events.
//!
//! SYSTEM CONTEXT
//! ==============
//! Each websocket connection subscribes to exactly one room and receives
//! [`Outbound`] events through a bounded channel. Services publish after
//! their writes commit; the hub never touches persistence.
//!
//! The trait is the seam for a future cross-process implementation. Only
//! [`LocalHub`] exists today.

pub mod local;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::Outbound;

pub use local::LocalHub;

pub type ConnId = Uuid;

/// Receiving half of a subscription. `rx` yields `None` once the hub has
/// dropped the subscriber (overflow, dead peer, or shutdown).
pub struct Subscription {
    pub conn_id: ConnId,
    pub rx: mpsc::Receiver<Outbound>,
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

pub trait Hub: Send + Sync {
    /// Register a connection for `room_key`. Registering the same user twice
    /// yields two independent subscriptions.
    fn subscribe(&self, room_key: &str, user_id: i64) -> Subscription;

    /// Remove a connection. Unknown ids are a no-op.
    fn unsubscribe(&self, room_key: &str, conn_id: ConnId);

    /// Deliver `event` to every subscriber of `room_key`, sender included.
    /// Never blocks on a slow subscriber.
    fn publish(&self, room_key: &str, event: &Outbound) -> Delivery;

    fn subscriber_count(&self, room_key: &str) -> usize;

    /// Drop every subscription so live connections wind down.
    fn shutdown(&self);
}
