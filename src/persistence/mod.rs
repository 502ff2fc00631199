//! State Persistence
//!
//! Three JSON blobs written through the injected [`StateStore`] under
//! stable keys. Restoration is tolerant: a missing blob means a fresh
//! start, an undecodable one is logged and discarded. Write failures are
//! logged and never fail the cycle that triggered them.
//!
//! # Blob Layout
//!
//! ```text
//! engine/state  -> EngineStateBlob (cycle counters, cadence, metrics, history)
//! budget/state  -> BudgetState snapshot
//! buffer/state  -> BufferStateBlob (slots, eviction log)
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::budget::BudgetState;
use crate::core::types::Memory;
use crate::engine::{CycleMetrics, CycleResult};
use crate::memory::EvictionRecord;
use crate::providers::StateStore;

/// Stable blob keys
pub mod keys {
    pub const ENGINE: &str = "engine/state";
    pub const BUDGET: &str = "budget/state";
    pub const BUFFER: &str = "buffer/state";
}

/// Cycle-history entries retained in the engine blob
pub const PERSISTED_HISTORY: usize = 20;

/// Engine-side persisted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStateBlob {
    pub cycle_no: u64,
    pub cycle_interval_ms: u64,
    pub cycle_range: (u64, u64),
    pub metrics: CycleMetrics,
    pub lifetime_cycles: u64,
    pub lifetime_dreams: u64,
    pub last_dream_at: Option<DateTime<Utc>>,
    pub last_cycle: Option<CycleResult>,
    pub cycle_history: Vec<CycleResult>,
    pub saved_at: DateTime<Utc>,
}

/// Working-buffer persisted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferStateBlob {
    pub slots: Vec<Memory>,
    pub evictions: Vec<EvictionRecord>,
    pub saved_at: DateTime<Utc>,
}

/// Save/load front-end over the injected blob store
#[derive(Clone)]
pub struct StatePersister {
    store: Arc<dyn StateStore>,
}

impl StatePersister {
    /// Wrap a state store
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Write the engine blob; failures are logged only
    pub async fn save_engine(&self, blob: &EngineStateBlob) {
        self.save_json(keys::ENGINE, blob).await;
    }

    /// Write the budget blob; failures are logged only
    pub async fn save_budget(&self, state: &BudgetState) {
        self.save_json(keys::BUDGET, state).await;
    }

    /// Write the buffer blob; failures are logged only
    pub async fn save_buffer(&self, blob: &BufferStateBlob) {
        self.save_json(keys::BUFFER, blob).await;
    }

    /// Load the engine blob, tolerating absence and corruption
    pub async fn load_engine(&self) -> Option<EngineStateBlob> {
        self.load_json(keys::ENGINE).await
    }

    /// Load the budget blob, tolerating absence and corruption
    pub async fn load_budget(&self) -> Option<BudgetState> {
        self.load_json(keys::BUDGET).await
    }

    /// Load the buffer blob, tolerating absence and corruption
    pub async fn load_buffer(&self) -> Option<BufferStateBlob> {
        self.load_json(keys::BUFFER).await
    }

    async fn save_json<T: Serialize>(&self, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "state serialization failed");
                return;
            }
        };
        match self.store.write(key, bytes).await {
            Ok(()) => debug!(key, "state saved"),
            Err(e) => warn!(key, error = %e, "state write failed"),
        }
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.store.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!(key, "no persisted state, starting fresh");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "state read failed, starting fresh");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "persisted state invalid, discarding");
                None
            }
        }
    }
}

impl std::fmt::Debug for StatePersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePersister").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MemoryKind;
    use crate::test_support::MemoryStateStore;
    use pretty_assertions::assert_eq;

    fn engine_blob() -> EngineStateBlob {
        EngineStateBlob {
            cycle_no: 42,
            cycle_interval_ms: 30_000,
            cycle_range: (10_000, 300_000),
            metrics: CycleMetrics::default(),
            lifetime_cycles: 142,
            lifetime_dreams: 3,
            last_dream_at: Some(Utc::now()),
            last_cycle: None,
            cycle_history: Vec::new(),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn engine_blob_round_trip() {
        let store = Arc::new(MemoryStateStore::new());
        let persister = StatePersister::new(store);
        let blob = engine_blob();

        persister.save_engine(&blob).await;
        let loaded = persister.load_engine().await.unwrap();
        assert_eq!(loaded, blob);
    }

    #[tokio::test]
    async fn buffer_blob_round_trip() {
        let store = Arc::new(MemoryStateStore::new());
        let persister = StatePersister::new(store);
        let blob = BufferStateBlob {
            slots: vec![Memory::new("kept", MemoryKind::Insight)],
            evictions: Vec::new(),
            saved_at: Utc::now(),
        };

        persister.save_buffer(&blob).await;
        let loaded = persister.load_buffer().await.unwrap();
        assert_eq!(loaded, blob);
    }

    #[tokio::test]
    async fn missing_blobs_mean_fresh_start() {
        let store = Arc::new(MemoryStateStore::new());
        let persister = StatePersister::new(store);
        assert!(persister.load_engine().await.is_none());
        assert!(persister.load_budget().await.is_none());
        assert!(persister.load_buffer().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_blob_is_discarded() {
        let store = Arc::new(MemoryStateStore::new());
        store.put_raw(keys::ENGINE, b"{not json".to_vec());
        store.put_raw(keys::BUDGET, b"[1, 2, 3]".to_vec());

        let persister = StatePersister::new(store);
        assert!(persister.load_engine().await.is_none());
        assert!(persister.load_budget().await.is_none());
    }

    #[tokio::test]
    async fn keys_are_stable() {
        assert_eq!(keys::ENGINE, "engine/state");
        assert_eq!(keys::BUDGET, "budget/state");
        assert_eq!(keys::BUFFER, "buffer/state");
    }
}
