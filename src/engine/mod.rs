//! Cycle Engine
//!
//! The continuous loop at the heart of the system. Each cycle runs seven
//! steps in a fixed order (generate a thought, route it through inference,
//! fold the exchange into working memory, consider a consolidation run,
//! consult the cadence tuner, checkpoint, persist) and records a
//! [`CycleResult`] whatever happens. Exactly one cycle is in flight at a
//! time; the next one is scheduled a full interval after the current one
//! ends.
//!
//! # Self-Health
//!
//! After every cycle the engine examines its own trajectory. A collapsed
//! success rate, a cascade of consecutive failures, or a nearly drained
//! budget stops the loop gracefully: state is persisted, a stop event is
//! published, and no further cycles start.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::budget::{BudgetManager, BudgetState};
use crate::config::MindConfig;
use crate::core::cancel::CancelToken;
use crate::core::types::{Memory, MemoryKind, Thought, ThoughtKind};
use crate::dream::{DreamEngine, DreamReport, DreamTrigger};
use crate::events::{EventBus, EventPayload};
use crate::memory::WorkingBuffer;
use crate::persistence::{BufferStateBlob, EngineStateBlob, StatePersister, PERSISTED_HISTORY};
use crate::providers::{ParameterTuner, SavePointer, ThoughtSource};
use crate::router::{InferenceRouter, RouteContext, RouterError};

/// Cycle-history ring bound
pub const CYCLE_HISTORY_LIMIT: usize = 100;

/// Dream-report ring bound
pub const DREAM_HISTORY_LIMIT: usize = 20;

/// Recent-thought window fed to the classifier
const RECENT_THOUGHTS_LIMIT: usize = 10;

/// Canonical step names, in execution order
pub const STEP_GENERATE: &str = "generateThought";
pub const STEP_PROCESS: &str = "process";
pub const STEP_MEMORY: &str = "updateMemory";
pub const STEP_DREAM: &str = "maybeDream";
pub const STEP_TUNE: &str = "tune";
pub const STEP_SAVE_POINT: &str = "savePoint";
pub const STEP_PERSIST: &str = "persist";

/// The canonical step order of one cycle
pub const STEP_ORDER: [&str; 7] = [
    STEP_GENERATE,
    STEP_PROCESS,
    STEP_MEMORY,
    STEP_DREAM,
    STEP_TUNE,
    STEP_SAVE_POINT,
    STEP_PERSIST,
];

/// Prompts the engine falls back to when no thought source is wired
const SELF_ASSESSMENT_PROMPTS: [&str; 4] = [
    "Review the last few cycles: what failed, what repeated, what surprised?",
    "Which working memory deserves more attention before it fades?",
    "Is the current cadence serving the workload, or drifting?",
    "What question would most improve the next ten cycles?",
];

/// Loop state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Constructed, never started
    Idle,
    /// Running cycles
    Thinking,
    /// A consolidation run is in progress
    Dreaming,
    /// Stopped; requires a fresh start
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Dreaming => "dreaming",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Why the engine stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Caller-requested stop
    #[serde(rename = "user")]
    User,
    /// Remaining budget fell under the floor
    #[serde(rename = "health:budget")]
    Budget,
    /// Success rate collapsed over the trailing window
    #[serde(rename = "health:errors")]
    Errors,
    /// Nearly every recent cycle failed
    #[serde(rename = "health:cascade")]
    Cascade,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Budget => "health:budget",
            Self::Errors => "health:errors",
            Self::Cascade => "health:cascade",
        };
        write!(f, "{s}")
    }
}

/// One step's outcome inside a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl StepRecord {
    fn ok(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn failed(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// The record of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    pub cycle_no: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    pub ok: bool,
    pub error: Option<String>,
}

/// Aggregate cycle statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub total_cycles: u64,
    pub ok_cycles: u64,
    pub total_duration_ms: u64,
}

impl CycleMetrics {
    /// Fraction of cycles that completed cleanly
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f32 {
        if self.total_cycles == 0 {
            return 1.0;
        }
        self.ok_cycles as f32 / self.total_cycles as f32
    }

    /// Mean cycle duration
    #[must_use]
    pub fn average_duration_ms(&self) -> u64 {
        if self.total_cycles == 0 {
            return 0;
        }
        self.total_duration_ms / self.total_cycles
    }

    fn record(&mut self, result: &CycleResult) {
        self.total_cycles += 1;
        if result.ok {
            self.ok_cycles += 1;
        }
        self.total_duration_ms += result.duration_ms;
    }
}

/// Point-in-time view of the engine, also handed to thought sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub cycle_no: u64,
    pub cycle_interval_ms: u64,
    pub metrics: CycleMetrics,
    pub buffer_pressure: f32,
    pub budget: BudgetState,
    pub dream_count: u64,
    pub last_cycle: Option<CycleResult>,
}

/// The main loop: step orchestration, cadence, self-health
pub struct CycleEngine {
    config: MindConfig,
    interval_ms: AtomicU64,
    state: Mutex<EngineState>,
    cycle_no: AtomicU64,
    lifetime_cycles: AtomicU64,
    metrics: Mutex<CycleMetrics>,
    history: Mutex<VecDeque<CycleResult>>,
    dream_reports: Mutex<VecDeque<DreamReport>>,
    recent_thoughts: Mutex<VecDeque<Thought>>,

    router: Arc<InferenceRouter>,
    buffer: Arc<WorkingBuffer>,
    dreams: Arc<DreamEngine>,
    budget: Arc<BudgetManager>,
    bus: Arc<EventBus>,
    persister: StatePersister,

    thought_source: Option<Arc<dyn ThoughtSource>>,
    tuner: Option<Arc<dyn ParameterTuner>>,
    save_pointer: Option<Arc<dyn SavePointer>>,
}

impl CycleEngine {
    /// Wire an engine over its components
    #[must_use]
    pub fn new(
        config: MindConfig,
        router: Arc<InferenceRouter>,
        buffer: Arc<WorkingBuffer>,
        dreams: Arc<DreamEngine>,
        budget: Arc<BudgetManager>,
        bus: Arc<EventBus>,
        persister: StatePersister,
    ) -> Self {
        let interval_ms = config.clamp_interval_ms(config.cycle_interval_ms);
        Self {
            config,
            interval_ms: AtomicU64::new(interval_ms),
            state: Mutex::new(EngineState::Idle),
            cycle_no: AtomicU64::new(0),
            lifetime_cycles: AtomicU64::new(0),
            metrics: Mutex::new(CycleMetrics::default()),
            history: Mutex::new(VecDeque::new()),
            dream_reports: Mutex::new(VecDeque::new()),
            recent_thoughts: Mutex::new(VecDeque::new()),
            router,
            buffer,
            dreams,
            budget,
            bus,
            persister,
            thought_source: None,
            tuner: None,
            save_pointer: None,
        }
    }

    /// Inject the thought source
    pub fn set_thought_source(&mut self, source: Arc<dyn ThoughtSource>) {
        self.thought_source = Some(source);
    }

    /// Inject the cadence tuner
    pub fn set_tuner(&mut self, tuner: Arc<dyn ParameterTuner>) {
        self.tuner = Some(tuner);
    }

    /// Inject the save pointer
    pub fn set_save_pointer(&mut self, save_pointer: Arc<dyn SavePointer>) {
        self.save_pointer = Some(save_pointer);
    }

    /// Current loop state
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.lock().expect("engine state poisoned")
    }

    /// Completed cycles this session
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_no.load(Ordering::SeqCst)
    }

    /// Current cadence in milliseconds
    #[must_use]
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::SeqCst)
    }

    /// Bounded cycle history, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<CycleResult> {
        self.history
            .lock()
            .expect("cycle history poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Bounded dream-report history, oldest first
    #[must_use]
    pub fn recent_dreams(&self) -> Vec<DreamReport> {
        self.dream_reports
            .lock()
            .expect("dream history poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Point-in-time engine view
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state(),
            cycle_no: self.cycle_no.load(Ordering::SeqCst),
            cycle_interval_ms: self.interval_ms(),
            metrics: *self.metrics.lock().expect("metrics poisoned"),
            buffer_pressure: self.buffer.pressure(),
            budget: self.budget.snapshot(),
            dream_count: self.dreams.dream_count(),
            last_cycle: self
                .history
                .lock()
                .expect("cycle history poisoned")
                .back()
                .cloned(),
        }
    }

    /// Drive cycles until cancelled or a health rule stops the loop
    ///
    /// The next cycle starts one full interval after the current one ends.
    pub async fn run(self: Arc<Self>, cancel: CancelToken) {
        {
            let mut state = self.state.lock().expect("engine state poisoned");
            if *state == EngineState::Stopped {
                warn!("engine already stopped, refusing to run");
                return;
            }
            *state = EngineState::Thinking;
        }
        info!(interval_ms = self.interval_ms(), "cycle engine running");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let result = self.run_cycle(&cancel).await;
            debug!(cycle = result.cycle_no, ok = result.ok, "cycle recorded");

            if cancel.is_cancelled() {
                break;
            }
            if let Some(reason) = self.health_check() {
                self.shutdown(reason).await;
                return;
            }

            let interval = Duration::from_millis(self.interval_ms());
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        self.shutdown(StopReason::User).await;
    }

    /// Execute one full cycle and record it
    pub async fn run_cycle(&self, cancel: &CancelToken) -> CycleResult {
        let cycle_no = self.cycle_no.fetch_add(1, Ordering::SeqCst) + 1;
        self.lifetime_cycles.fetch_add(1, Ordering::SeqCst);
        let started_at = Utc::now();
        let started = Instant::now();
        let mut steps: Vec<StepRecord> = Vec::with_capacity(STEP_ORDER.len());
        let mut cycle_error: Option<String> = None;

        self.bus.publish(EventPayload::CycleStart { cycle: cycle_no });

        // 1. generateThought
        let thought = self.generate_thought(&mut steps).await;
        self.bus.publish(EventPayload::ThoughtGenerated {
            thought: thought.clone(),
        });
        let recent = self.recent_window();
        self.remember_thought(thought.clone());

        // 2. process
        let mut cancelled = false;
        let inference = if cancel.is_cancelled() {
            cancelled = true;
            steps.push(StepRecord::failed(STEP_PROCESS, "cancelled"));
            cycle_error = Some("cancelled".to_string());
            None
        } else {
            let ctx = RouteContext {
                recent_thoughts: recent,
                current_cycle: cycle_no,
            };
            match self.router.route(&thought, &ctx, cancel).await {
                Ok(result) => {
                    steps.push(StepRecord::ok(
                        STEP_PROCESS,
                        format!("{} tier, {} tokens", result.tier, result.tokens_used),
                    ));
                    self.bus.publish(EventPayload::ThoughtProcessed {
                        thought_id: thought.id.clone(),
                        result: result.clone(),
                    });
                    Some(result)
                }
                Err(RouterError::Cancelled) => {
                    cancelled = true;
                    steps.push(StepRecord::failed(STEP_PROCESS, "cancelled"));
                    cycle_error = Some("cancelled".to_string());
                    None
                }
                Err(e) => {
                    steps.push(StepRecord::failed(STEP_PROCESS, e.to_string()));
                    cycle_error = Some(e.to_string());
                    None
                }
            }
        };

        let mut pending_dream = None;
        if !cancelled {
            // 3. updateMemory
            self.update_memory(&thought, inference.as_ref(), cycle_no, &mut steps);

            // 4. maybeDream: the trigger decision is part of the cycle;
            // the run itself happens after cycle-complete goes out
            pending_dream = self.evaluate_dream(cycle_no, &mut steps);

            // 5. tune
            self.tune(&mut steps).await;

            // 6. savePoint
            self.save_point(cycle_no, &mut steps).await;

            // 7. persist
            if cycle_no % self.config.auto_save_interval == 0 {
                self.persist_state().await;
                steps.push(StepRecord::ok(STEP_PERSIST, "state saved"));
            } else {
                steps.push(StepRecord::ok(STEP_PERSIST, "not due"));
            }
        }

        let ok = steps.iter().all(|s| s.ok);
        let error = cycle_error.or_else(|| {
            steps
                .iter()
                .find(|s| !s.ok)
                .map(|s| format!("{} failed: {}", s.name, s.detail))
        });
        let result = CycleResult {
            cycle_no,
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            steps,
            ok,
            error: if ok { None } else { error },
        };

        self.metrics
            .lock()
            .expect("metrics poisoned")
            .record(&result);
        {
            let mut history = self.history.lock().expect("cycle history poisoned");
            history.push_back(result.clone());
            while history.len() > CYCLE_HISTORY_LIMIT {
                history.pop_front();
            }
        }
        self.bus.publish(EventPayload::CycleComplete {
            result: result.clone(),
        });

        // consolidation runs in the gap between this cycle's completion and
        // the next cycle's start
        if let Some(trigger) = pending_dream {
            self.execute_dream(trigger).await;
        }
        result
    }

    async fn generate_thought(&self, steps: &mut Vec<StepRecord>) -> Thought {
        match &self.thought_source {
            Some(source) => {
                let snapshot = self.snapshot();
                match source.next(&snapshot).await {
                    Ok(thought) => {
                        steps.push(StepRecord::ok(
                            STEP_GENERATE,
                            format!("{} ({})", thought.id, thought.kind),
                        ));
                        thought
                    }
                    Err(e) => {
                        warn!(error = %e, "thought source failed, using self-assessment");
                        steps.push(StepRecord::ok(
                            STEP_GENERATE,
                            format!("source failed ({e}), self-assessment used"),
                        ));
                        self.fallback_thought()
                    }
                }
            }
            None => {
                steps.push(StepRecord::ok(STEP_GENERATE, "self-assessment (no source)"));
                self.fallback_thought()
            }
        }
    }

    fn fallback_thought(&self) -> Thought {
        let idx = rand::rng().random_range(0..SELF_ASSESSMENT_PROMPTS.len());
        Thought::new(SELF_ASSESSMENT_PROMPTS[idx], ThoughtKind::Reflection)
            .with_source("self-assessment")
    }

    fn update_memory(
        &self,
        thought: &Thought,
        inference: Option<&crate::core::types::InferenceResult>,
        cycle_no: u64,
        steps: &mut Vec<StepRecord>,
    ) {
        let memory = match inference {
            Some(result) => {
                Memory::new(truncate(&thought.content, 120), MemoryKind::Reflection)
                    .with_content(format!("[{}] {}", result.tier, result.text))
                    .with_importance(if result.tier == crate::core::types::Tier::Deep {
                        0.6
                    } else {
                        0.4
                    })
                    .for_cycle(cycle_no)
            }
            None => Memory::new(truncate(&thought.content, 120), MemoryKind::Error)
                .with_content("inference failed for this thought")
                .with_importance(0.6)
                .with_emotional_salience(-0.4)
                .for_cycle(cycle_no),
        };

        self.bus.publish(EventPayload::MemoryAdded {
            memory_id: memory.id.clone(),
            summary: memory.summary.clone(),
        });
        let evicted = self.buffer.insert(memory);
        let detail = match evicted {
            Some(record) => format!(
                "inserted, evicted {} (score {:.2})",
                record.memory_id, record.evict_score
            ),
            None => format!("inserted, pressure {:.2}", self.buffer.pressure()),
        };
        steps.push(StepRecord::ok(STEP_MEMORY, detail));
    }

    fn evaluate_dream(&self, cycle_no: u64, steps: &mut Vec<StepRecord>) -> Option<DreamTrigger> {
        if !self.config.dream_enabled {
            steps.push(StepRecord::ok(STEP_DREAM, "disabled"));
            return None;
        }
        match self.dreams.should_trigger(cycle_no) {
            Some(trigger) => {
                steps.push(StepRecord::ok(STEP_DREAM, format!("triggered: {trigger}")));
                Some(trigger)
            }
            None => {
                steps.push(StepRecord::ok(STEP_DREAM, "no trigger"));
                None
            }
        }
    }

    async fn execute_dream(&self, trigger: DreamTrigger) {
        *self.state.lock().expect("engine state poisoned") = EngineState::Dreaming;
        let outcome = self.dreams.run(trigger).await;
        *self.state.lock().expect("engine state poisoned") = EngineState::Thinking;

        match outcome {
            Ok(report) => {
                debug!(
                    dream_id = %report.id,
                    promoted = report.memories_promoted,
                    "consolidation ran between cycles"
                );
                let mut reports = self.dream_reports.lock().expect("dream history poisoned");
                reports.push_back(report);
                while reports.len() > DREAM_HISTORY_LIMIT {
                    reports.pop_front();
                }
            }
            Err(e) => warn!(error = %e, "consolidation run rejected"),
        }
    }

    async fn tune(&self, steps: &mut Vec<StepRecord>) {
        let Some(tuner) = &self.tuner else {
            steps.push(StepRecord::ok(STEP_TUNE, "no tuner configured"));
            return;
        };
        let Some(last) = self
            .history
            .lock()
            .expect("cycle history poisoned")
            .back()
            .cloned()
        else {
            steps.push(StepRecord::ok(STEP_TUNE, "no previous cycle"));
            return;
        };

        match tuner.adjust_cadence(&self.snapshot(), &last).await {
            Ok(Some(proposed_ms)) => {
                let clamped = self.config.clamp_interval_ms(proposed_ms);
                let previous = self.interval_ms.swap(clamped, Ordering::SeqCst);
                if previous != clamped {
                    #[allow(clippy::cast_precision_loss)]
                    self.bus.publish(EventPayload::ParameterAdjusted {
                        parameter: "cycleIntervalMs".to_string(),
                        from: previous as f64,
                        to: clamped as f64,
                    });
                    info!(from = previous, to = clamped, "cadence adjusted");
                }
                steps.push(StepRecord::ok(
                    STEP_TUNE,
                    format!("interval {clamped}ms (proposed {proposed_ms}ms)"),
                ));
            }
            Ok(None) => steps.push(StepRecord::ok(STEP_TUNE, "no change")),
            Err(e) => steps.push(StepRecord::failed(STEP_TUNE, e.to_string())),
        }
    }

    async fn save_point(&self, cycle_no: u64, steps: &mut Vec<StepRecord>) {
        if !self.config.auto_commit_enabled {
            steps.push(StepRecord::ok(STEP_SAVE_POINT, "disabled"));
            return;
        }
        let Some(save_pointer) = &self.save_pointer else {
            steps.push(StepRecord::ok(STEP_SAVE_POINT, "no save pointer configured"));
            return;
        };
        if cycle_no % self.config.auto_commit_interval != 0 {
            steps.push(StepRecord::ok(STEP_SAVE_POINT, "not due"));
            return;
        }

        match save_pointer.save(cycle_no).await {
            Ok(Some(reference)) => {
                self.bus.publish(EventPayload::SavePointCreated {
                    cycle: cycle_no,
                    reference: reference.clone(),
                });
                steps.push(StepRecord::ok(STEP_SAVE_POINT, reference));
            }
            Ok(None) => steps.push(StepRecord::ok(STEP_SAVE_POINT, "declined")),
            Err(e) => {
                // best-effort: a failed checkpoint never fails the cycle
                warn!(error = %e, "save point failed");
                steps.push(StepRecord::failed(STEP_SAVE_POINT, e.to_string()));
            }
        }
    }

    /// Evaluate the self-health rules; `Some` means stop
    fn health_check(&self) -> Option<StopReason> {
        let history = self.history.lock().expect("cycle history poisoned");
        let len = history.len();

        if len >= 10 {
            let window = history.iter().rev().take(10);
            let ok = window.filter(|r| r.ok).count();
            #[allow(clippy::cast_precision_loss)]
            let rate = ok as f32 / 10.0;
            if rate < 0.5 {
                warn!(rate, "success rate collapsed");
                return Some(StopReason::Errors);
            }
        }

        if self.budget.snapshot().remaining_fraction() < 0.05 {
            warn!("budget nearly exhausted");
            return Some(StopReason::Budget);
        }

        if len >= 5 {
            let failed = history.iter().rev().take(5).filter(|r| !r.ok).count();
            if failed >= 4 {
                warn!(failed, "failure cascade detected");
                return Some(StopReason::Cascade);
            }
        }

        if self.buffer.pressure() >= 1.0 && self.dreams.dream_count() == 0 {
            warn!("buffer saturated and no consolidation has ever run");
        }

        None
    }

    /// Transition to stopped, publish the reason, persist once
    ///
    /// Idempotent: a second call is a no-op.
    pub async fn shutdown(&self, reason: StopReason) {
        {
            let mut state = self.state.lock().expect("engine state poisoned");
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Stopped;
        }
        info!(%reason, "engine stopping");
        self.bus
            .publish(EventPayload::ConsciousnessStopped { reason });
        self.persist_state().await;
    }

    /// Write all three state blobs
    pub async fn persist_state(&self) {
        let history = self.history();
        let start = history.len().saturating_sub(PERSISTED_HISTORY);
        let blob = EngineStateBlob {
            cycle_no: self.cycle_no.load(Ordering::SeqCst),
            cycle_interval_ms: self.interval_ms(),
            cycle_range: (self.config.cycle_min_ms, self.config.cycle_max_ms),
            metrics: *self.metrics.lock().expect("metrics poisoned"),
            lifetime_cycles: self.lifetime_cycles.load(Ordering::SeqCst),
            lifetime_dreams: self.dreams.dream_count(),
            last_dream_at: self.dreams.last_run(),
            last_cycle: history.last().cloned(),
            cycle_history: history[start..].to_vec(),
            saved_at: Utc::now(),
        };
        self.persister.save_engine(&blob).await;
        self.persister.save_budget(&self.budget.snapshot()).await;
        self.persister
            .save_buffer(&BufferStateBlob {
                slots: self.buffer.list(),
                evictions: self.buffer.evictions(),
                saved_at: Utc::now(),
            })
            .await;
    }

    /// Load whatever persisted state exists and adopt it
    pub async fn restore_state(&self) {
        if let Some(blob) = self.persister.load_engine().await {
            self.cycle_no.store(blob.cycle_no, Ordering::SeqCst);
            self.lifetime_cycles
                .store(blob.lifetime_cycles, Ordering::SeqCst);
            self.interval_ms.store(
                self.config.clamp_interval_ms(blob.cycle_interval_ms),
                Ordering::SeqCst,
            );
            *self.metrics.lock().expect("metrics poisoned") = blob.metrics;
            {
                let mut history = self.history.lock().expect("cycle history poisoned");
                history.clear();
                history.extend(blob.cycle_history);
            }
            self.dreams.restore(blob.lifetime_dreams, blob.last_dream_at);
            info!(cycle_no = blob.cycle_no, "engine state restored");
        }
        if let Some(state) = self.persister.load_budget().await {
            self.budget.restore(state);
        }
        if let Some(blob) = self.persister.load_buffer().await {
            self.buffer.restore(blob.slots, blob.evictions);
        }
    }

    fn recent_window(&self) -> Vec<Thought> {
        self.recent_thoughts
            .lock()
            .expect("recent thoughts poisoned")
            .iter()
            .cloned()
            .collect()
    }

    fn remember_thought(&self, thought: Thought) {
        let mut recent = self
            .recent_thoughts
            .lock()
            .expect("recent thoughts poisoned");
        recent.push_back(thought);
        while recent.len() > RECENT_THOUGHTS_LIMIT {
            recent.pop_front();
        }
    }
}

impl std::fmt::Debug for CycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleEngine")
            .field("state", &self.state())
            .field("cycle_no", &self.cycle_count())
            .field("interval_ms", &self.interval_ms())
            .finish_non_exhaustive()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
