//! Injected Collaborators
//!
//! The loop performs no I/O of its own. Everything that crosses a process
//! or network boundary (thought generation, inference transports, episodic
//! storage, checkpoint commits, state blobs, cadence tuning) arrives
//! through the minimum-viable protocols in this module. Any implementation
//! that satisfies a trait here is acceptable; the orchestrator wires the
//! concrete set.
//!
//! Every method may block or suspend, so every call site in the engine runs
//! under the root cancellation scope and, for inference, a per-call
//! deadline.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{Memory, MemoryId, ScoredMemory, Thought};
use crate::engine::{CycleResult, EngineSnapshot};
use crate::memory::ConsolidationEvaluation;

/// Options for a single inference call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Hard deadline for the call; providers must give up by then
    pub deadline: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
        }
    }
}

/// What a provider returns on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Response text
    pub text: String,
    /// Tokens consumed, 0 when the transport does not report
    pub tokens_used: u64,
    /// Provider-observed duration
    pub duration_ms: u64,
}

/// Produces the next thought for the loop to process
#[async_trait]
pub trait ThoughtSource: Send + Sync {
    /// Generate the next thought given the engine's current snapshot
    async fn next(&self, state: &EngineSnapshot) -> Result<Thought>;
}

/// One inference tier (deep or rote transport)
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Run one generation; must respect `opts.deadline`
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<Generation>;
}

/// Similarity-search options for the episodic store
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Maximum results; the store may return fewer
    pub k: usize,
    /// Minimum similarity score to include
    pub min_score: f32,
    /// Restrict to success-kind memories
    pub success_only: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 5,
            min_score: 0.0,
            success_only: false,
        }
    }
}

/// Aggregate figures from the episodic store
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodicStats {
    /// Total stored memories
    pub total: usize,
    /// When the newest memory was appended
    pub last_appended_at: Option<DateTime<Utc>>,
}

/// Append-oriented long-term memory with similarity search
///
/// `recent` is insertion-reverse-chronological. `search_similar` is
/// best-effort and may return fewer than `k` results.
#[async_trait]
pub trait EpisodicStore: Send + Sync {
    /// Store a promoted memory, optionally with its promotion evaluation
    async fn append(
        &self,
        memory: Memory,
        evaluation: Option<ConsolidationEvaluation>,
    ) -> Result<()>;

    /// Best-effort similarity search over stored memories
    async fn search_similar(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<ScoredMemory>>;

    /// The `n` most recently appended memories, newest first
    async fn recent(&self, n: usize) -> Result<Vec<Memory>>;

    /// Fetch one memory by ID
    async fn get(&self, id: &MemoryId) -> Result<Option<Memory>>;

    /// Aggregate store statistics
    async fn stats(&self) -> Result<EpisodicStats>;
}

/// Optional cadence tuner consulted after every cycle
#[async_trait]
pub trait ParameterTuner: Send + Sync {
    /// Propose a new cycle interval in milliseconds, or `None` to keep
    /// the current cadence. The engine clamps whatever comes back.
    async fn adjust_cadence(
        &self,
        state: &EngineSnapshot,
        last_cycle: &CycleResult,
    ) -> Result<Option<u64>>;
}

/// External checkpointer (e.g. a content commit) tied to a cycle number
#[async_trait]
pub trait SavePointer: Send + Sync {
    /// Create a save point; returns an opaque reference when one was made
    async fn save(&self, cycle: u64) -> Result<Option<String>>;
}

/// Opaque keyed blob storage for persisted state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Write a blob under a stable key
    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read a blob; `None` when the key was never written
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NullStore;

    #[async_trait]
    impl StateStore for NullStore {
        async fn write(&self, _key: &str, _bytes: Vec<u8>) -> Result<()> {
            Ok(())
        }

        async fn read(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    #[test]
    fn traits_are_object_safe() {
        // the orchestrator holds collaborators as Arc<dyn Trait>
        tokio_test::block_on(async {
            let store: Arc<dyn StateStore> = Arc::new(NullStore);
            store.write("engine/state", vec![1, 2, 3]).await.unwrap();
            assert!(store.read("engine/state").await.unwrap().is_none());
        });
    }

    #[test]
    fn default_search_options() {
        let opts = SearchOptions::default();
        assert_eq!(opts.k, 5);
        assert!(!opts.success_only);
    }

    #[test]
    fn default_deadline_is_thirty_seconds() {
        assert_eq!(GenerateOptions::default().deadline, Duration::from_secs(30));
    }
}
