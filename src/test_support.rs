//! In-memory collaborator fakes for tests
//!
//! Every injected trait gets a deterministic in-process implementation so
//! component and loop tests run without any real transport behind them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::core::text;
use crate::core::types::{Memory, MemoryId, MemoryKind, ScoredMemory, Thought, ThoughtKind};
use crate::engine::{CycleResult, EngineSnapshot};
use crate::memory::ConsolidationEvaluation;
use crate::providers::{
    EpisodicStats, EpisodicStore, GenerateOptions, Generation, InferenceProvider, ParameterTuner,
    SavePointer, StateStore, ThoughtSource,
};

/// Route test logs through the tracing stack (idempotent)
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Provider that always succeeds with the same text
pub struct ScriptedProvider {
    text: String,
    tokens: u64,
    calls: AtomicU64,
}

impl ScriptedProvider {
    pub fn always(text: &str) -> Self {
        Self {
            text: text.to_string(),
            tokens: 100,
            calls: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Generation {
            text: self.text.clone(),
            tokens_used: self.tokens,
            duration_ms: 5,
        })
    }
}

/// Provider that always fails with the same reason
pub struct FailingProvider {
    reason: String,
    calls: AtomicU64,
}

impl FailingProvider {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for FailingProvider {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("{}", self.reason))
    }
}

/// Provider that fails its first `n` calls, then succeeds
pub struct FlakyProvider {
    failures: u64,
    text: String,
    tokens: u64,
    calls: AtomicU64,
}

impl FlakyProvider {
    pub fn failing_times(failures: u64, then_text: &str, tokens: u64) -> Self {
        Self {
            failures,
            text: then_text.to_string(),
            tokens,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for FlakyProvider {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<Generation> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(anyhow!("transient failure {call}"));
        }
        Ok(Generation {
            text: self.text.clone(),
            tokens_used: self.tokens,
            duration_ms: 5,
        })
    }
}

/// Append-only in-memory episodic store with jaccard search
#[derive(Default)]
pub struct MemoryEpisodicStore {
    entries: Mutex<Vec<(Memory, Option<ConsolidationEvaluation>)>>,
}

impl MemoryEpisodicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub async fn all(&self) -> Vec<Memory> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub async fn evaluations(&self) -> Vec<Option<ConsolidationEvaluation>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[async_trait]
impl EpisodicStore for MemoryEpisodicStore {
    async fn append(
        &self,
        memory: Memory,
        evaluation: Option<ConsolidationEvaluation>,
    ) -> Result<()> {
        self.entries.lock().unwrap().push((memory, evaluation));
        Ok(())
    }

    async fn search_similar(
        &self,
        query: &str,
        opts: &crate::providers::SearchOptions,
    ) -> Result<Vec<ScoredMemory>> {
        let entries = self.entries.lock().unwrap();
        let mut scored: Vec<ScoredMemory> = entries
            .iter()
            .filter(|(m, _)| !opts.success_only || m.kind == MemoryKind::Success)
            .map(|(m, _)| ScoredMemory {
                memory: m.clone(),
                score: text::similarity(query, m.text()),
            })
            .filter(|s| s.score >= opts.min_score)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(opts.k);
        Ok(scored)
    }

    async fn recent(&self, n: usize) -> Result<Vec<Memory>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .rev()
            .take(n)
            .map(|(m, _)| m.clone())
            .collect())
    }

    async fn get(&self, id: &MemoryId) -> Result<Option<Memory>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .find(|(m, _)| &m.id == id)
            .map(|(m, _)| m.clone()))
    }

    async fn stats(&self) -> Result<EpisodicStats> {
        let entries = self.entries.lock().unwrap();
        Ok(EpisodicStats {
            total: entries.len(),
            last_appended_at: entries.last().map(|(m, _)| m.created_at),
        })
    }
}

/// Keyed blob store over a hash map
#[derive(Default)]
pub struct MemoryStateStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
    }

    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }
}

/// Thought source that replays a queue, then repeats a filler thought
pub struct ScriptedThoughtSource {
    queue: Mutex<VecDeque<Thought>>,
}

impl ScriptedThoughtSource {
    pub fn new(thoughts: Vec<Thought>) -> Self {
        Self {
            queue: Mutex::new(thoughts.into()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl ThoughtSource for ScriptedThoughtSource {
    async fn next(&self, _state: &EngineSnapshot) -> Result<Thought> {
        Ok(self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Thought::new("observe current state", ThoughtKind::Observation)))
    }
}

/// Thought source that always errors
pub struct FailingThoughtSource;

#[async_trait]
impl ThoughtSource for FailingThoughtSource {
    async fn next(&self, _state: &EngineSnapshot) -> Result<Thought> {
        Err(anyhow!("thought source offline"))
    }
}

/// Tuner that always proposes the same interval
pub struct StaticTuner {
    pub interval_ms: Option<u64>,
}

#[async_trait]
impl ParameterTuner for StaticTuner {
    async fn adjust_cadence(
        &self,
        _state: &EngineSnapshot,
        _last_cycle: &CycleResult,
    ) -> Result<Option<u64>> {
        Ok(self.interval_ms)
    }
}

/// Save pointer that records the cycles it was asked to checkpoint
#[derive(Default)]
pub struct RecordingSavePointer {
    saves: Mutex<Vec<u64>>,
}

impl RecordingSavePointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> Vec<u64> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl SavePointer for RecordingSavePointer {
    async fn save(&self, cycle: u64) -> Result<Option<String>> {
        self.saves.lock().unwrap().push(cycle);
        Ok(Some(format!("save-{cycle}-{}", Utc::now().timestamp())))
    }
}
