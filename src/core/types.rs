//! Core Types for the Cognitive Loop
//!
//! The fundamental building blocks shared by every subsystem:
//! - `Thought`: a unit of self-generated input to the loop
//! - `Memory`: a working-buffer or consolidated episodic record
//! - `Classification`: the tier decision derived for a thought
//! - `InferenceResult`: the outcome of a routed inference call
//!
//! # Identifier Scheme
//!
//! Identifiers are opaque strings with a short type prefix (`th-`, `mem-`,
//! `dream-`, `val-`). The prefix carries no semantics beyond making logs and
//! persisted blobs self-describing; uniqueness comes from a UUIDv4.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a thought
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThoughtId(String);

impl ThoughtId {
    /// Create a new random thought ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("th-{}", Uuid::new_v4()))
    }

    /// View the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThoughtId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThoughtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a memory record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(String);

impl MemoryId {
    /// Create a new random memory ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("mem-{}", Uuid::new_v4()))
    }

    /// View the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a consolidation (dream) run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DreamId(String);

impl DreamId {
    /// Create a new random dream ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("dream-{}", Uuid::new_v4()))
    }

    /// View the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a formed value tracked by the bias detector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueId(String);

impl ValueId {
    /// Create a new random value ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("val-{}", Uuid::new_v4()))
    }

    /// View the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ValueId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of cognition a thought represents
///
/// The kind biases classification: an `Error` thought raises stakes, an
/// `Architecture` thought raises complexity, a `Reflection` raises creativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtKind {
    /// An instruction the loop gave itself
    Command,
    /// An open question to reason about
    Question,
    /// Introspection over past cycles
    Reflection,
    /// Thinking about the loop's own operation
    Meta,
    /// A failure being examined
    Error,
    /// A plain observation about current state
    Observation,
    /// A structural/design problem
    Architecture,
}

impl std::fmt::Display for ThoughtKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Command => "command",
            Self::Question => "question",
            Self::Reflection => "reflection",
            Self::Meta => "meta",
            Self::Error => "error",
            Self::Observation => "observation",
            Self::Architecture => "architecture",
        };
        write!(f, "{s}")
    }
}

/// Thought priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// A unit of self-generated input to the cognitive loop
///
/// Immutable once created: every field is set at construction and the loop
/// never mutates a thought in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Unique identifier
    pub id: ThoughtId,

    /// Natural-language content
    pub content: String,

    /// What kind of cognition this is
    pub kind: ThoughtKind,

    /// Scheduling priority
    pub priority: Priority,

    /// Source tag (which component generated it)
    pub source: String,

    /// When this thought was created
    pub created_at: DateTime<Utc>,
}

impl Thought {
    /// Create a new thought with medium priority
    #[must_use]
    pub fn new(content: impl Into<String>, kind: ThoughtKind) -> Self {
        Self {
            id: ThoughtId::new(),
            content: content.into(),
            kind,
            priority: Priority::Medium,
            source: "loop".to_string(),
            created_at: Utc::now(),
        }
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the source tag
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Inference tier a thought is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Expensive, budgeted provider
    Deep,
    /// Cheap/free local provider
    Rote,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deep => write!(f, "deep"),
            Self::Rote => write!(f, "rote"),
        }
    }
}

/// Per-dimension scores produced by the classifier, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorScores {
    pub complexity: f32,
    pub novelty: f32,
    pub creativity: f32,
    pub uncertainty: f32,
    pub stakes: f32,
}

impl FactorScores {
    /// Clamp every dimension into [0, 1]
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            complexity: self.complexity.clamp(0.0, 1.0),
            novelty: self.novelty.clamp(0.0, 1.0),
            creativity: self.creativity.clamp(0.0, 1.0),
            uncertainty: self.uncertainty.clamp(0.0, 1.0),
            stakes: self.stakes.clamp(0.0, 1.0),
        }
    }
}

/// A tier decision for a thought
///
/// Derived on every routed thought; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Selected inference tier
    pub tier: Tier,

    /// Weighted blend of the factor scores, in [0, 1]
    pub deep_score: f32,

    /// How far the score sits from the threshold, normalized to [0, 1]
    pub confidence: f32,

    /// The five dimension scores behind the decision
    pub factors: FactorScores,

    /// Human-readable explanation of the decision
    pub reason: String,
}

/// The outcome of a routed inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Provider response text
    pub text: String,

    /// Tier that actually served the request
    pub tier: Tier,

    /// Tokens consumed by the call (0 when the provider does not report)
    pub tokens_used: u64,

    /// Wall-clock duration of the successful call
    pub duration_ms: u64,

    /// True when a deep classification was downgraded for budget reasons
    pub budget_overridden: bool,

    /// Last deep-tier error when the rote fallback served the request
    pub fallback_reason: Option<String>,
}

/// What kind of episode a memory records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// A realization worth keeping
    Insight,
    /// A failure and its context
    Error,
    /// Something that worked
    Success,
    /// A thought/response reflection pair
    Reflection,
    /// A neutral observation
    Observation,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Insight => "insight",
            Self::Error => "error",
            Self::Success => "success",
            Self::Reflection => "reflection",
            Self::Observation => "observation",
        };
        write!(f, "{s}")
    }
}

/// Where a memory currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    /// In the fixed-slot working buffer
    Working,
    /// Promoted to episodic long-term storage
    Consolidated,
}

/// A working-buffer or consolidated episodic record
///
/// Growing fields are monotonic-only: `access_count` increases through
/// [`Memory::record_access`] and is never reset. Promotion copies the record
/// into long-term storage rather than mutating it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,

    /// Short summary used for retrieval and consolidation scoring
    pub summary: String,

    /// Full content, when the summary is not the whole story
    pub content: Option<String>,

    /// What kind of episode this records
    pub kind: MemoryKind,

    /// Importance rating in [0, 1]
    pub importance: f32,

    /// Emotional salience in [-1, 1]; sign is valence, magnitude is intensity
    pub emotional_salience: f32,

    /// Novelty at formation time, in [0, 1], when known
    pub novelty: Option<f32>,

    /// How many times this memory has been retrieved
    pub access_count: u32,

    /// When this memory was formed
    pub created_at: DateTime<Utc>,

    /// Where this memory currently lives
    pub tier: MemoryTier,

    /// Cycle number during which this memory was formed
    pub parent_cycle: u64,
}

impl Memory {
    /// Create a new working-tier memory
    #[must_use]
    pub fn new(summary: impl Into<String>, kind: MemoryKind) -> Self {
        Self {
            id: MemoryId::new(),
            summary: summary.into(),
            content: None,
            kind,
            importance: 0.5,
            emotional_salience: 0.0,
            novelty: None,
            access_count: 0,
            created_at: Utc::now(),
            tier: MemoryTier::Working,
            parent_cycle: 0,
        }
    }

    /// Attach full content
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set importance, clamped to [0, 1]
    #[must_use]
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Set emotional salience, clamped to [-1, 1]
    #[must_use]
    pub fn with_emotional_salience(mut self, salience: f32) -> Self {
        self.emotional_salience = salience.clamp(-1.0, 1.0);
        self
    }

    /// Set formation-time novelty, clamped to [0, 1]
    #[must_use]
    pub fn with_novelty(mut self, novelty: f32) -> Self {
        self.novelty = Some(novelty.clamp(0.0, 1.0));
        self
    }

    /// Record the cycle this memory was formed in
    #[must_use]
    pub fn for_cycle(mut self, cycle: u64) -> Self {
        self.parent_cycle = cycle;
        self
    }

    /// Increment the access counter (monotonic)
    pub fn record_access(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Age of this memory in hours at `now`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn age_hours(&self, now: DateTime<Utc>) -> f32 {
        let secs = (now - self.created_at).num_seconds().max(0) as f32;
        secs / 3600.0
    }

    /// Age of this memory in days at `now`
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> f32 {
        self.age_hours(now) / 24.0
    }

    /// Retrieval text: content when present, summary otherwise
    #[must_use]
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or(&self.summary)
    }
}

/// A memory paired with a retrieval score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f32,
}
