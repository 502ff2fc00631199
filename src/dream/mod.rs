//! Dream Engine
//!
//! Orchestrates consolidation runs: score every buffered memory, promote
//! the winners into episodic storage, challenge accumulated bias findings,
//! and, when an inference provider is wired, recombine surviving
//! memories into fresh insights.
//!
//! # Run Discipline
//!
//! A run is single-threaded inside the engine and overlapping runs are
//! rejected outright. Per-memory failures are logged and skipped, never
//! fatal to the phase; the recombination phase as a whole is best-effort.

mod types;

pub use types::{
    DreamConfig, DreamPhase, DreamReport, DreamTrigger, PhaseRecord, TriggerPriority,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bias::BiasDetector;
use crate::core::types::{DreamId, Memory, MemoryKind, MemoryTier};
use crate::events::{EventBus, EventPayload};
use crate::memory::{ConsolidationPolicy, ValueAlignment, WorkingBuffer};
use crate::providers::{EpisodicStore, GenerateOptions, InferenceProvider};

/// Deadline for the optional recombination / challenge calls
const DREAM_INFERENCE_DEADLINE: Duration = Duration::from_secs(20);

/// Most insights accepted from one recombination pass
const MAX_INSIGHTS: usize = 3;

/// Dream-engine errors
#[derive(Debug, Clone, Error)]
pub enum DreamError {
    /// A run is already in flight
    #[error("a consolidation run is already in progress")]
    AlreadyRunning,
}

struct DreamState {
    last_run: Option<DateTime<Utc>>,
    dream_count: u64,
}

/// Consolidation-run coordinator
pub struct DreamEngine {
    config: DreamConfig,
    buffer: Arc<WorkingBuffer>,
    episodic: Arc<dyn EpisodicStore>,
    policy: ConsolidationPolicy,
    detector: Arc<BiasDetector>,
    provider: Option<Arc<dyn InferenceProvider>>,
    bus: Arc<EventBus>,
    running: AtomicBool,
    state: Mutex<DreamState>,
}

impl DreamEngine {
    /// Wire a dream engine over its collaborators
    #[must_use]
    pub fn new(
        config: DreamConfig,
        buffer: Arc<WorkingBuffer>,
        episodic: Arc<dyn EpisodicStore>,
        policy: ConsolidationPolicy,
        detector: Arc<BiasDetector>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            buffer,
            episodic,
            policy,
            detector,
            provider: None,
            bus,
            running: AtomicBool::new(false),
            state: Mutex::new(DreamState {
                last_run: None,
                dream_count: 0,
            }),
        }
    }

    /// Attach the inference provider used for recombination and challenges
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn InferenceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Completed runs since startup (or restore)
    #[must_use]
    pub fn dream_count(&self) -> u64 {
        self.state.lock().expect("dream state poisoned").dream_count
    }

    /// When the last run finished
    #[must_use]
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("dream state poisoned").last_run
    }

    /// Seed run bookkeeping from persisted state
    pub fn restore(&self, dream_count: u64, last_run: Option<DateTime<Utc>>) {
        let mut state = self.state.lock().expect("dream state poisoned");
        state.dream_count = dream_count;
        state.last_run = last_run;
    }

    /// Evaluate every trigger; highest-priority match wins
    ///
    /// Called after each cycle completes. `cycles_completed` gates the
    /// first-ever run.
    #[must_use]
    pub fn should_trigger(&self, cycles_completed: u64) -> Option<DreamTrigger> {
        if self.running.load(Ordering::SeqCst) {
            return None;
        }

        if self.buffer.pressure() >= self.config.pressure_threshold {
            return Some(DreamTrigger::MemoryPressure);
        }

        let important = self
            .buffer
            .list()
            .iter()
            .filter(|m| m.importance > self.config.high_importance_threshold)
            .count();
        if important >= self.config.high_importance_count {
            return Some(DreamTrigger::HighImportance);
        }

        if self.detector.unchallenged_count() >= self.config.bias_accumulation_count {
            return Some(DreamTrigger::BiasAccumulation);
        }

        let last_run = self.last_run();
        match last_run {
            Some(at) => {
                let elapsed = Utc::now().signed_duration_since(at);
                if elapsed.num_seconds() >= 0
                    && elapsed.to_std().unwrap_or_default() >= self.config.interval
                {
                    return Some(DreamTrigger::TimeElapsed);
                }
            }
            None => {
                if cycles_completed >= self.config.min_cycles_before_first {
                    return Some(DreamTrigger::FirstDream);
                }
            }
        }

        None
    }

    /// Execute one consolidation run
    ///
    /// # Errors
    ///
    /// [`DreamError::AlreadyRunning`] when a run is in flight; nothing is
    /// published in that case.
    pub async fn run(&self, trigger: DreamTrigger) -> Result<DreamReport, DreamError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DreamError::AlreadyRunning);
        }

        let report = self.run_locked(trigger).await;

        {
            let mut state = self.state.lock().expect("dream state poisoned");
            state.last_run = Some(report.ended_at);
            state.dream_count += 1;
        }
        self.running.store(false, Ordering::SeqCst);

        if report.ok {
            self.bus.publish(EventPayload::DreamComplete {
                report: report.clone(),
            });
        } else {
            self.bus.publish(EventPayload::DreamError {
                dream_id: report.id.clone(),
                error: report
                    .error
                    .clone()
                    .unwrap_or_else(|| "consolidation failed".to_string()),
            });
        }
        Ok(report)
    }

    async fn run_locked(&self, trigger: DreamTrigger) -> DreamReport {
        let id = DreamId::new();
        let started_at = Utc::now();
        info!(dream_id = %id, %trigger, "dream starting");
        self.bus.publish(EventPayload::DreamStart {
            dream_id: id.clone(),
            reason: trigger.to_string(),
        });

        let mut phases = Vec::new();

        // one snapshot feeds every phase: consolidation scores it, and
        // recombination works over what this run actually saw
        let snapshot = self.buffer.list();

        let (promoted, discarded, consolidation) = self.consolidation_phase(&snapshot).await;
        phases.push(consolidation);

        let (challenged, bias_check) = self.bias_check_phase().await;
        phases.push(bias_check);

        let (insights, recombination) = self.recombination_phase(&snapshot).await;
        phases.push(recombination);

        // recombination is best-effort: its failure never fails the run
        let ok = phases
            .iter()
            .filter(|p| p.phase != DreamPhase::Recombination)
            .all(|p| p.ok);
        let error = if ok {
            None
        } else {
            phases
                .iter()
                .find(|p| !p.ok && p.phase != DreamPhase::Recombination)
                .map(|p| format!("{} failed: {}", p.phase, p.detail))
        };

        let report = DreamReport {
            id,
            triggered_by: trigger,
            started_at,
            ended_at: Utc::now(),
            phases,
            memories_promoted: promoted,
            memories_discarded: discarded,
            biases_challenged: challenged,
            insights_generated: insights,
            ok,
            error,
        };
        info!(
            dream_id = %report.id,
            promoted = report.memories_promoted,
            discarded = report.memories_discarded,
            challenged = report.biases_challenged,
            insights = report.insights_generated,
            "dream finished"
        );
        report
    }

    /// Phase 1: score the buffer, promote winners, discard the rest
    async fn consolidation_phase(&self, snapshot: &[Memory]) -> (usize, usize, PhaseRecord) {
        let existing = match self.episodic.recent(self.config.context_recent).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "episodic context unavailable, scoring without it");
                Vec::new()
            }
        };

        let mut promoted = 0usize;
        let mut discarded = 0usize;

        for memory in snapshot {
            let alignment = match self.detector.assess_memory(memory) {
                Some(kind) => ValueAlignment::Flagged(kind),
                None => ValueAlignment::Clear,
            };
            let evaluation = self.policy.evaluate(memory, snapshot, &existing, alignment);

            // a slot that moved while we were scoring is skipped
            let Some(mut resident) = self.buffer.remove(&memory.id) else {
                debug!(memory_id = %memory.id, "slot moved during scoring, skipped");
                continue;
            };

            if evaluation.should_promote {
                resident.tier = MemoryTier::Consolidated;
                let score = evaluation.promotion_score;
                let memory_id = resident.id.clone();
                if let Err(e) = self.episodic.append(resident.clone(), Some(evaluation)).await {
                    // keep the memory rather than lose it to a failed append
                    warn!(memory_id = %memory_id, error = %e, "promotion append failed, keeping slot");
                    resident.tier = MemoryTier::Working;
                    self.buffer.insert(resident);
                    continue;
                }
                self.bus
                    .publish(EventPayload::MemoryPromoted { memory_id, score });
                promoted += 1;
            } else {
                discarded += 1;
            }
        }

        let record = PhaseRecord {
            phase: DreamPhase::Consolidation,
            ok: true,
            detail: format!("promoted {promoted}, discarded {discarded}"),
        };
        (promoted, discarded, record)
    }

    /// Phase 2: surface and challenge accumulated bias findings
    async fn bias_check_phase(&self) -> (usize, PhaseRecord) {
        let findings = self.detector.unchallenged();
        let mut challenged = 0usize;

        for finding in findings {
            self.bus.publish(EventPayload::BiasDetected {
                finding: finding.clone(),
            });

            let challenge = match &self.provider {
                Some(provider) => {
                    let prompt = format!(
                        "A recurring internal value about \"{}\" (strength {:.2}, applied {} times) \
                         shows a {} pattern. In one sentence, state the strongest argument \
                         against trusting this value.",
                        finding.category,
                        finding.strength,
                        finding.incidents,
                        finding
                            .kind
                            .map_or_else(|| "repetitive".to_string(), |k| k.to_string()),
                    );
                    let opts = GenerateOptions {
                        deadline: DREAM_INFERENCE_DEADLINE,
                    };
                    match provider.generate(&prompt, &opts).await {
                        Ok(generation) => generation.text.trim().to_string(),
                        Err(e) => {
                            // best-effort: a failed challenge call never blocks
                            debug!(error = %e, "challenge generation failed");
                            String::new()
                        }
                    }
                }
                None => String::new(),
            };

            self.detector.mark_challenged(&finding.value_id);
            self.bus.publish(EventPayload::ValueChallenged {
                value_id: finding.value_id.clone(),
                challenge,
            });
            challenged += 1;
        }

        let record = PhaseRecord {
            phase: DreamPhase::BiasCheck,
            ok: true,
            detail: format!("challenged {challenged}"),
        };
        (challenged, record)
    }

    /// Phase 3 (optional): recombine this run's memories into new insights
    async fn recombination_phase(&self, snapshot: &[Memory]) -> (usize, PhaseRecord) {
        let skip = |detail: &str| PhaseRecord {
            phase: DreamPhase::Recombination,
            ok: true,
            detail: detail.to_string(),
        };

        let Some(provider) = &self.provider else {
            return (0, skip("no provider configured"));
        };

        if snapshot.len() < self.config.recombination_min_memories {
            return (0, skip("not enough memories"));
        }

        let listing = snapshot
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m.summary))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "These memories were formed recently:\n{listing}\n\n\
             Combine them into 1-3 short, concrete insights that none of them \
             states on its own. Reply with one numbered insight per line."
        );

        let opts = GenerateOptions {
            deadline: DREAM_INFERENCE_DEADLINE,
        };
        let generation = match provider.generate(&prompt, &opts).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "recombination call failed");
                return (
                    0,
                    PhaseRecord {
                        phase: DreamPhase::Recombination,
                        ok: false,
                        detail: e.to_string(),
                    },
                );
            }
        };

        let insights = parse_insights(&generation.text, self.config.insight_min_chars);
        let count = insights.len();
        for insight in insights {
            let memory = Memory::new(insight, MemoryKind::Insight)
                .with_importance(0.7)
                .with_novelty(0.8);
            self.bus.publish(EventPayload::MemoryAdded {
                memory_id: memory.id.clone(),
                summary: memory.summary.clone(),
            });
            self.buffer.insert(memory);
        }

        (
            count,
            PhaseRecord {
                phase: DreamPhase::Recombination,
                ok: true,
                detail: format!("generated {count}"),
            },
        )
    }
}

impl std::fmt::Debug for DreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DreamEngine")
            .field("dream_count", &self.dream_count())
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Leniently parse numbered or bulleted insight lines
///
/// Splits by newline, strips list numbering and bullets, drops anything
/// shorter than `min_chars`, and keeps at most three.
#[must_use]
pub fn parse_insights(reply: &str, min_chars: usize) -> Vec<String> {
    reply
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| {
                    c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | ' ' | '\t')
                })
                .trim()
                .to_string()
        })
        .filter(|line| line.len() >= min_chars)
        .take(MAX_INSIGHTS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingProvider, MemoryEpisodicStore, ScriptedProvider};
    use crate::bias::{FormationContext, Value};
    use crate::core::types::MemoryKind;
    use crate::events::Topic;

    fn harness(
        capacity: usize,
        provider: Option<Arc<dyn InferenceProvider>>,
    ) -> (DreamEngine, Arc<WorkingBuffer>, Arc<MemoryEpisodicStore>, Arc<EventBus>) {
        let buffer = Arc::new(WorkingBuffer::new(capacity));
        let episodic = Arc::new(MemoryEpisodicStore::new());
        let detector = Arc::new(BiasDetector::new());
        let bus = Arc::new(EventBus::new());
        let mut engine = DreamEngine::new(
            DreamConfig::default(),
            Arc::clone(&buffer),
            episodic.clone(),
            ConsolidationPolicy::new(0.6),
            detector,
            Arc::clone(&bus),
        );
        if let Some(provider) = provider {
            engine = engine.with_provider(provider);
        }
        (engine, buffer, episodic, bus)
    }

    fn strong_memory(label: &str) -> Memory {
        let mut memory = Memory::new(label, MemoryKind::Insight)
            .with_importance(0.95)
            .with_emotional_salience(0.8);
        memory.access_count = 5;
        memory
    }

    fn weak_memory(label: &str) -> Memory {
        Memory::new(label, MemoryKind::Observation)
            .with_importance(0.05)
            .with_novelty(0.05)
            .with_emotional_salience(0.0)
    }

    #[tokio::test]
    async fn empty_buffer_run_is_clean() {
        let (engine, _, _, _) = harness(5, None);
        let report = engine.run(DreamTrigger::Manual).await.unwrap();

        assert!(report.ok);
        assert_eq!(report.memories_promoted, 0);
        assert_eq!(report.memories_discarded, 0);
        assert_eq!(report.phases.len(), 3);
        assert_eq!(report.phases[0].phase, DreamPhase::Consolidation);
        assert_eq!(report.phases[1].phase, DreamPhase::BiasCheck);
        assert_eq!(report.phases[2].phase, DreamPhase::Recombination);
    }

    #[tokio::test]
    async fn promotes_strong_and_discards_weak() {
        let (engine, buffer, episodic, bus) = harness(5, None);
        let mut promoted_rx = bus.subscribe(Topic::MemoryPromoted);

        buffer.insert(strong_memory("pivotal realization about retries"));
        buffer.insert(strong_memory("second pivotal realization entirely different"));
        buffer.insert(weak_memory("idle tick"));
        buffer.insert(weak_memory("idle tick again"));
        buffer.insert(weak_memory("yet another idle tick"));

        let report = engine.run(DreamTrigger::MemoryPressure).await.unwrap();

        assert_eq!(report.memories_promoted, 2);
        assert_eq!(report.memories_discarded, 3);
        assert!(buffer.is_empty());
        assert_eq!(episodic.len().await, 2);

        // promoted memories carry the consolidated tier in the store
        for memory in episodic.all().await {
            assert_eq!(memory.tier, MemoryTier::Consolidated);
        }

        let mut seen = 0;
        while promoted_rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn overlapping_runs_are_rejected() {
        let (engine, _, _, _) = harness(5, None);
        engine.running.store(true, Ordering::SeqCst);
        let err = engine.run(DreamTrigger::Manual).await.unwrap_err();
        assert!(matches!(err, DreamError::AlreadyRunning));
    }

    #[tokio::test]
    async fn pressure_trigger_fires_at_threshold() {
        let (engine, buffer, _, _) = harness(5, None);
        for i in 0..3 {
            buffer.insert(weak_memory(&format!("filler {i}")));
        }
        // 3/5 sits under the 0.8 threshold
        assert_eq!(engine.should_trigger(1), None);

        // 4/5 = 0.8 reaches it exactly
        buffer.insert(weak_memory("the fourth"));
        assert_eq!(engine.should_trigger(1), Some(DreamTrigger::MemoryPressure));
    }

    #[tokio::test]
    async fn first_dream_waits_for_cycles() {
        let (engine, _, _, _) = harness(5, None);
        assert_eq!(engine.should_trigger(4), None);
        assert_eq!(engine.should_trigger(5), Some(DreamTrigger::FirstDream));

        // once a run has happened, the time trigger takes over
        engine.restore(1, Some(Utc::now()));
        assert_eq!(engine.should_trigger(100), None);
    }

    #[tokio::test]
    async fn stale_last_run_triggers_time_elapsed() {
        let (engine, _, _, _) = harness(5, None);
        engine.restore(3, Some(Utc::now() - chrono::Duration::hours(25)));
        assert_eq!(engine.should_trigger(50), Some(DreamTrigger::TimeElapsed));
    }

    #[tokio::test]
    async fn high_importance_trigger() {
        let (engine, buffer, _, _) = harness(10, None);
        buffer.insert(strong_memory("critical one"));
        assert_eq!(engine.should_trigger(1), None);
        buffer.insert(strong_memory("critical two"));
        assert_eq!(engine.should_trigger(1), Some(DreamTrigger::HighImportance));
    }

    #[tokio::test]
    async fn bias_accumulation_trigger_and_challenge() {
        let (engine, _, _, bus) = harness(10, None);
        let mut challenged_rx = bus.subscribe(Topic::ValueChallenged);

        for i in 0..5 {
            let value = Value::new("gender", 0.3);
            engine.detector.record_application(
                &value,
                FormationContext::reinforcing(0.3 + i as f32 * 0.01),
            );
        }
        assert_eq!(engine.should_trigger(1), Some(DreamTrigger::BiasAccumulation));

        let report = engine.run(DreamTrigger::BiasAccumulation).await.unwrap();
        assert_eq!(report.biases_challenged, 5);
        assert_eq!(engine.detector.unchallenged_count(), 0);

        let mut seen = 0;
        while challenged_rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 5);

        // challenged findings stop triggering
        assert_eq!(engine.should_trigger(1), None);
    }

    #[tokio::test]
    async fn recombination_inserts_parsed_insights() {
        let provider: Arc<dyn InferenceProvider> = Arc::new(ScriptedProvider::always(
            "1. Retries and caching failures share a root cause\n\
             2. tiny\n\
             3. Slow cycles correlate with memory pressure spikes",
        ));
        let (engine, buffer, _, _) = harness(10, Some(provider));
        buffer.insert(weak_memory("retries flaking"));
        buffer.insert(weak_memory("cache misses rising"));

        let report = engine.run(DreamTrigger::Manual).await.unwrap();
        // "tiny" is under the 10-char floor
        assert_eq!(report.insights_generated, 2);

        let insights: Vec<Memory> = buffer
            .list()
            .into_iter()
            .filter(|m| m.kind == MemoryKind::Insight)
            .collect();
        assert_eq!(insights.len(), 2);
    }

    #[tokio::test]
    async fn recombination_failure_is_non_fatal() {
        let provider: Arc<dyn InferenceProvider> = Arc::new(FailingProvider::new("model offline"));
        let (engine, buffer, _, _) = harness(10, Some(provider));
        buffer.insert(weak_memory("one"));
        buffer.insert(weak_memory("two"));

        let report = engine.run(DreamTrigger::Manual).await.unwrap();
        assert!(report.ok, "recombination failure must not fail the run");
        let recombination = &report.phases[2];
        assert!(!recombination.ok);
        assert_eq!(report.insights_generated, 0);
    }

    #[tokio::test]
    async fn run_publishes_start_and_complete_in_order() {
        let (engine, _, _, bus) = harness(5, None);
        let mut start_rx = bus.subscribe(Topic::DreamStart);
        let mut complete_rx = bus.subscribe(Topic::DreamComplete);

        let report = engine.run(DreamTrigger::Manual).await.unwrap();

        let start = start_rx.try_recv().unwrap();
        let complete = complete_rx.try_recv().unwrap();
        assert!(start.at <= complete.at);
        match complete.payload {
            EventPayload::DreamComplete { report: published } => {
                assert_eq!(published.id, report.id);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn dream_count_and_last_run_advance() {
        let (engine, _, _, _) = harness(5, None);
        assert_eq!(engine.dream_count(), 0);
        assert!(engine.last_run().is_none());

        engine.run(DreamTrigger::Manual).await.unwrap();
        assert_eq!(engine.dream_count(), 1);
        assert!(engine.last_run().is_some());
    }

    #[test]
    fn insight_parsing_is_lenient() {
        let parsed = parse_insights(
            "Here are some:\n1. first real insight here\n- second bulleted insight\n*) third starred insight\n\nnope",
            10,
        );
        assert_eq!(
            parsed,
            vec![
                "Here are some:".to_string(),
                "first real insight here".to_string(),
                "second bulleted insight".to_string(),
            ]
        );
    }

    #[test]
    fn insight_parsing_caps_at_three() {
        let reply = "1. aaaaaaaaaaaa\n2. bbbbbbbbbbbb\n3. cccccccccccc\n4. dddddddddddd";
        assert_eq!(parse_insights(reply, 10).len(), 3);
    }

    #[test]
    fn insight_parsing_drops_short_lines() {
        assert!(parse_insights("1. ok\n2. no", 10).is_empty());
    }
}
