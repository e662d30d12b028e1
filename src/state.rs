//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! passed by reference into services. Persistence, fanout, media and
//! payments are trait objects or cheap clones so tests can swap each one.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::AppConfig;
use crate::hub::{Hub, LocalHub};
use crate::services::media::MediaStore;
use crate::services::payment::PaymentGateway;
use crate::store::ChatStore;

// =============================================================================
// ROOM LOCKS
// =============================================================================

/// Per-room async mutexes. Holding one across append + publish keeps live
/// delivery in the same order the store accepted the messages.
#[derive(Clone, Default)]
pub struct RoomLocks {
    inner: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

pub struct RoomGuard {
    room_id: i64,
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl RoomLocks {
    pub async fn acquire(&self, room_id: i64) -> RoomGuard {
        let lock = self.inner.entry(room_id).or_default().clone();
        let guard = lock.lock_owned().await;
        RoomGuard { room_id, locks: self.inner.clone(), _guard: guard }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        // Map entry + this guard: nobody else is waiting.
        self.locks
            .remove_if(&self.room_id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Clone is required by Axum; every field is Arc-wrapped or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ChatStore>,
    pub hub: Arc<dyn Hub>,
    pub media: Arc<MediaStore>,
    /// `None` when no payment provider is configured.
    pub payments: Option<Arc<dyn PaymentGateway>>,
    pub room_locks: RoomLocks,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, store: Arc<dyn ChatStore>, payments: Option<Arc<dyn PaymentGateway>>) -> Self {
        let hub = Arc::new(LocalHub::new(config.ws_client_buffer));
        let media = Arc::new(MediaStore::from_config(&config));
        Self { config: Arc::new(config), store, hub, media, payments, room_locks: RoomLocks::default() }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
