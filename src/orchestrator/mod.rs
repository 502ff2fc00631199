//! Orchestrator
//!
//! Constructs every component in dependency order, wires the injected
//! collaborators, and exposes one handle: start, stop, snapshot, and
//! component references for external surfaces. Also owns the promotion
//! drain: eviction victims leave the working buffer through a channel and
//! land in the episodic store without the buffer ever knowing its shape.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bias::{BiasDetector, BiasFinding, FormationContext, Value};
use crate::budget::BudgetManager;
use crate::classifier::ThoughtClassifier;
use crate::config::{ConfigError, MindConfig};
use crate::core::cancel::{cancel_pair, CancelHandle, CancelToken};
use crate::core::types::{Memory, MemoryTier};
use crate::dream::{DreamConfig, DreamEngine, DreamError, DreamReport, DreamTrigger};
use crate::engine::{CycleEngine, EngineSnapshot, StopReason};
use crate::events::{BusStats, EventBus, EventPayload};
use crate::memory::{ConsolidationPolicy, WorkingBuffer};
use crate::persistence::StatePersister;
use crate::providers::{
    EpisodicStore, InferenceProvider, ParameterTuner, SavePointer, StateStore, ThoughtSource,
};
use crate::router::{InferenceRouter, RouterConfig};

/// Grace window a stopping engine gets to finish its current step
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum MindError {
    /// Configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A required collaborator was not provided
    #[error("required collaborator missing: {name}")]
    MissingCollaborator { name: &'static str },

    /// The `enabled` toggle is off
    #[error("loop is disabled by configuration")]
    Disabled,

    /// `start` called while already running
    #[error("loop is already running")]
    AlreadyRunning,
}

/// Builder over the injected collaborators
#[derive(Default)]
pub struct MindBuilder {
    config: MindConfig,
    deep: Option<Arc<dyn InferenceProvider>>,
    rote: Option<Arc<dyn InferenceProvider>>,
    episodic: Option<Arc<dyn EpisodicStore>>,
    state_store: Option<Arc<dyn StateStore>>,
    thought_source: Option<Arc<dyn ThoughtSource>>,
    tuner: Option<Arc<dyn ParameterTuner>>,
    save_pointer: Option<Arc<dyn SavePointer>>,
}

impl MindBuilder {
    /// Start from a configuration
    #[must_use]
    pub fn new(config: MindConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Deep-tier inference provider (required)
    #[must_use]
    pub fn deep_provider(mut self, provider: Arc<dyn InferenceProvider>) -> Self {
        self.deep = Some(provider);
        self
    }

    /// Rote-tier inference provider (required)
    #[must_use]
    pub fn rote_provider(mut self, provider: Arc<dyn InferenceProvider>) -> Self {
        self.rote = Some(provider);
        self
    }

    /// Episodic long-term store (required)
    #[must_use]
    pub fn episodic_store(mut self, store: Arc<dyn EpisodicStore>) -> Self {
        self.episodic = Some(store);
        self
    }

    /// Keyed blob store for persisted state (required)
    #[must_use]
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Thought source (optional; the engine self-assesses without one)
    #[must_use]
    pub fn thought_source(mut self, source: Arc<dyn ThoughtSource>) -> Self {
        self.thought_source = Some(source);
        self
    }

    /// Cadence tuner (optional)
    #[must_use]
    pub fn tuner(mut self, tuner: Arc<dyn ParameterTuner>) -> Self {
        self.tuner = Some(tuner);
        self
    }

    /// Save pointer (optional)
    #[must_use]
    pub fn save_pointer(mut self, save_pointer: Arc<dyn SavePointer>) -> Self {
        self.save_pointer = Some(save_pointer);
        self
    }

    /// Validate the configuration and wire everything bottom-up
    ///
    /// # Errors
    ///
    /// Configuration violations and missing required collaborators.
    pub fn build(self) -> Result<Mind, MindError> {
        self.config.validate()?;
        let deep = self
            .deep
            .ok_or(MindError::MissingCollaborator { name: "deep provider" })?;
        let rote = self
            .rote
            .ok_or(MindError::MissingCollaborator { name: "rote provider" })?;
        let episodic = self
            .episodic
            .ok_or(MindError::MissingCollaborator { name: "episodic store" })?;
        let state_store = self
            .state_store
            .ok_or(MindError::MissingCollaborator { name: "state store" })?;

        let config = self.config;
        let bus = Arc::new(EventBus::new());
        let budget = Arc::new(BudgetManager::new(config.daily_token_limit));
        let classifier = Arc::new(ThoughtClassifier::new(
            config.classifier_threshold,
            config.learning_enabled,
        ));
        let detector = Arc::new(BiasDetector::new());

        let buffer = Arc::new(WorkingBuffer::new(config.buffer_slots));
        let (eviction_tx, eviction_rx) = mpsc::unbounded_channel();
        buffer.set_eviction_sink(eviction_tx);

        let dreams = Arc::new(
            DreamEngine::new(
                DreamConfig {
                    pressure_threshold: config.memory_pressure_threshold,
                    interval: config.dream_interval(),
                    ..DreamConfig::default()
                },
                Arc::clone(&buffer),
                Arc::clone(&episodic),
                ConsolidationPolicy::new(config.consolidation_threshold),
                Arc::clone(&detector),
                Arc::clone(&bus),
            )
            .with_provider(Arc::clone(&rote)),
        );

        let router = Arc::new(InferenceRouter::new(
            RouterConfig {
                max_retries: config.inference_max_retries,
                deadline: config.inference_deadline(),
                ..RouterConfig::default()
            },
            Arc::clone(&classifier),
            Arc::clone(&budget),
            deep,
            rote,
        ));

        let mut engine = CycleEngine::new(
            config.clone(),
            Arc::clone(&router),
            Arc::clone(&buffer),
            Arc::clone(&dreams),
            Arc::clone(&budget),
            Arc::clone(&bus),
            StatePersister::new(state_store),
        );
        if let Some(source) = self.thought_source {
            engine.set_thought_source(source);
        }
        if let Some(tuner) = self.tuner {
            engine.set_tuner(tuner);
        }
        if let Some(save_pointer) = self.save_pointer {
            engine.set_save_pointer(save_pointer);
        }

        Ok(Mind {
            config,
            bus,
            budget,
            buffer,
            classifier,
            detector,
            dreams,
            router,
            episodic,
            engine: Arc::new(engine),
            eviction_rx: Mutex::new(Some(eviction_rx)),
            running: Mutex::new(None),
        })
    }
}

struct RunHandles {
    cancel: CancelHandle,
    engine_task: JoinHandle<()>,
    promotion_task: JoinHandle<()>,
}

/// Point-in-time view across the whole system
#[derive(Debug, Clone)]
pub struct MindState {
    pub engine: EngineSnapshot,
    pub recent_dreams: Vec<DreamReport>,
    pub bus: BusStats,
}

/// Component references for external surfaces
#[derive(Clone)]
pub struct MindContext {
    pub bus: Arc<EventBus>,
    pub budget: Arc<BudgetManager>,
    pub buffer: Arc<WorkingBuffer>,
    pub classifier: Arc<ThoughtClassifier>,
    pub detector: Arc<BiasDetector>,
    pub dreams: Arc<DreamEngine>,
    pub router: Arc<InferenceRouter>,
    pub episodic: Arc<dyn EpisodicStore>,
}

/// The single handle over a wired cognitive loop
pub struct Mind {
    config: MindConfig,
    bus: Arc<EventBus>,
    budget: Arc<BudgetManager>,
    buffer: Arc<WorkingBuffer>,
    classifier: Arc<ThoughtClassifier>,
    detector: Arc<BiasDetector>,
    dreams: Arc<DreamEngine>,
    router: Arc<InferenceRouter>,
    episodic: Arc<dyn EpisodicStore>,
    engine: Arc<CycleEngine>,
    eviction_rx: Mutex<Option<mpsc::UnboundedReceiver<Memory>>>,
    running: Mutex<Option<RunHandles>>,
}

impl Mind {
    /// Begin building a loop from a configuration
    #[must_use]
    pub fn builder(config: MindConfig) -> MindBuilder {
        MindBuilder::new(config)
    }

    /// Load persisted state and launch the loop
    ///
    /// # Errors
    ///
    /// [`MindError::Disabled`] when the master toggle is off,
    /// [`MindError::AlreadyRunning`] when already started.
    pub async fn start(&self) -> Result<(), MindError> {
        if !self.config.enabled {
            return Err(MindError::Disabled);
        }
        if self.running.lock().expect("run handles poisoned").is_some() {
            return Err(MindError::AlreadyRunning);
        }

        // no lock held across the collaborator call
        self.engine.restore_state().await;

        let mut running = self.running.lock().expect("run handles poisoned");
        if running.is_some() {
            return Err(MindError::AlreadyRunning);
        }
        let (cancel_handle, cancel_token) = cancel_pair();
        let promotion_task = self.spawn_promotion_drain(cancel_token.clone());
        let engine_task = tokio::spawn(Arc::clone(&self.engine).run(cancel_token));
        *running = Some(RunHandles {
            cancel: cancel_handle,
            engine_task,
            promotion_task,
        });
        info!("mind started");
        Ok(())
    }

    /// Stop the loop, giving the current step a grace window
    ///
    /// After the grace expires the loop task is abandoned and state is
    /// persisted regardless. Safe to call when not running.
    pub async fn stop(&self, grace: Duration) {
        let handles = self
            .running
            .lock()
            .expect("run handles poisoned")
            .take();
        let Some(handles) = handles else {
            return;
        };

        handles.cancel.cancel();
        match tokio::time::timeout(grace, handles.engine_task).await {
            Ok(_) => info!("engine stopped within grace"),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "grace expired, abandoning loop task");
                // the engine publishes the stop and persists; shutdown is
                // idempotent so a late-finishing task is harmless
                self.engine.shutdown(StopReason::User).await;
            }
        }
        handles.promotion_task.abort();
    }

    /// Trigger a consolidation run right now
    ///
    /// # Errors
    ///
    /// [`DreamError::AlreadyRunning`] when one is in flight.
    pub async fn dream_now(&self) -> Result<DreamReport, DreamError> {
        self.dreams.run(DreamTrigger::Manual).await
    }

    /// Record a value application observed by an external surface
    ///
    /// First sight of a value publishes `value-formed`; every application
    /// re-evaluates it for bias. Accumulated findings feed the dream
    /// engine's bias-accumulation trigger.
    pub fn observe_value(&self, value: &Value, context: FormationContext) -> BiasFinding {
        if self.detector.register_value(value.clone()) {
            self.bus.publish(EventPayload::ValueFormed {
                value_id: value.id.clone(),
                category: value.category.clone(),
            });
        }
        self.detector.record_application(value, context)
    }

    /// Snapshot across engine, dreams, and bus
    #[must_use]
    pub fn state(&self) -> MindState {
        MindState {
            engine: self.engine.snapshot(),
            recent_dreams: self.engine.recent_dreams(),
            bus: self.bus.stats(),
        }
    }

    /// Component references for external surfaces
    #[must_use]
    pub fn context(&self) -> MindContext {
        MindContext {
            bus: Arc::clone(&self.bus),
            budget: Arc::clone(&self.budget),
            buffer: Arc::clone(&self.buffer),
            classifier: Arc::clone(&self.classifier),
            detector: Arc::clone(&self.detector),
            dreams: Arc::clone(&self.dreams),
            router: Arc::clone(&self.router),
            episodic: Arc::clone(&self.episodic),
        }
    }

    /// Whether the loop task is currently held
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().expect("run handles poisoned").is_some()
    }

    /// Drain eviction victims into the episodic store
    fn spawn_promotion_drain(&self, cancel: CancelToken) -> JoinHandle<()> {
        let mut rx = self
            .eviction_rx
            .lock()
            .expect("eviction receiver poisoned")
            .take()
            .expect("promotion drain already attached");
        let episodic = Arc::clone(&self.episodic);
        let bus = Arc::clone(&self.bus);

        tokio::spawn(async move {
            loop {
                let victim = tokio::select! {
                    () = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(memory) => memory,
                        None => break,
                    },
                };

                let mut promoted = victim;
                promoted.tier = MemoryTier::Consolidated;
                let memory_id = promoted.id.clone();
                let score = promoted.importance;
                match episodic.append(promoted, None).await {
                    Ok(()) => {
                        bus.publish(EventPayload::MemoryPromoted { memory_id, score });
                    }
                    Err(e) => {
                        warn!(memory_id = %memory_id, error = %e, "evicted memory lost to store failure");
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for Mind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mind")
            .field("running", &self.is_running())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
