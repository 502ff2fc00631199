//! Bias Detection
//!
//! Watches the values the loop forms and flags self-reinforcing patterns:
//! monotonic strengthening without opposition, sensitive categories,
//! clinging to a value despite poor outcomes, and burst-formed values.
//! Detection is deterministic over recorded formation contexts and never
//! calls an external model; LLM-backed challenges are layered on top by
//! the dream engine and are strictly best-effort.
//!
//! A finding stays "unchallenged" until the dream engine's bias-check phase
//! records a challenge for it; the accumulation trigger counts only
//! unchallenged findings.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{Memory, ValueId};

/// Categories that flag a value as discriminatory outright
pub const SENSITIVE_CATEGORIES: &[&str] = &[
    "race",
    "ethnicity",
    "gender",
    "religion",
    "nationality",
    "age",
    "disability",
    "sexuality",
];

/// The kinds of bias the detector distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasKind {
    Discriminatory,
    Confirmation,
    Anchoring,
    Availability,
}

impl std::fmt::Display for BiasKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discriminatory => "discriminatory",
            Self::Confirmation => "confirmation",
            Self::Anchoring => "anchoring",
            Self::Availability => "availability",
        };
        write!(f, "{s}")
    }
}

/// A value the loop has formed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub id: ValueId,
    /// Topic area the value applies to (lowercase tag)
    pub category: String,
    /// Current strength in [0, 1]
    pub strength: f32,
    /// How many times the value has been applied
    pub incidents: u32,
}

impl Value {
    /// Create a value in the given category
    #[must_use]
    pub fn new(category: impl Into<String>, strength: f32) -> Self {
        Self {
            id: ValueId::new(),
            category: category.into().to_lowercase(),
            strength: strength.clamp(0.0, 1.0),
            incidents: 0,
        }
    }
}

/// One recorded application of a value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormationContext {
    /// Strength after this application
    pub strength: f32,
    /// Whether opposing evidence was present
    pub opposing_evidence: bool,
    /// Whether the application correlated with a poor outcome
    pub outcome_poor: bool,
    /// When the application happened
    pub at: DateTime<Utc>,
}

impl FormationContext {
    /// A plain reinforcing application at the current time
    #[must_use]
    pub fn reinforcing(strength: f32) -> Self {
        Self {
            strength,
            opposing_evidence: false,
            outcome_poor: false,
            at: Utc::now(),
        }
    }
}

/// The detector's verdict on one value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasFinding {
    pub value_id: ValueId,
    pub category: String,
    pub strength: f32,
    pub incidents: u32,
    pub bias_detected: bool,
    pub kind: Option<BiasKind>,
    pub confidence: f32,
}

/// Detection thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasDetectorConfig {
    /// Consecutive strengthening applications that flag confirmation bias
    pub monotonic_run: usize,
    /// Poor-outcome ratio at which anchoring is flagged
    pub poor_outcome_ratio: f32,
    /// Trailing window for burst detection
    pub availability_window_hours: i64,
    /// Share of applications inside the window that flags availability
    pub availability_share: f32,
    /// Minimum applications before availability can fire
    pub availability_min_incidents: usize,
}

impl Default for BiasDetectorConfig {
    fn default() -> Self {
        Self {
            monotonic_run: 5,
            poor_outcome_ratio: 0.6,
            availability_window_hours: 24,
            availability_share: 0.6,
            availability_min_incidents: 4,
        }
    }
}

/// Context history bound per value
const CONTEXT_LIMIT: usize = 50;

struct TrackedValue {
    value: Value,
    contexts: Vec<FormationContext>,
    finding: Option<BiasFinding>,
    challenged: bool,
}

/// Deterministic bias detector over the value registry
pub struct BiasDetector {
    config: BiasDetectorConfig,
    registry: Mutex<HashMap<ValueId, TrackedValue>>,
}

impl BiasDetector {
    /// Create a detector with default thresholds
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BiasDetectorConfig::default())
    }

    /// Create a detector with custom thresholds
    #[must_use]
    pub fn with_config(config: BiasDetectorConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Register a value; returns true when it was not tracked before
    pub fn register_value(&self, value: Value) -> bool {
        let mut registry = self.registry.lock().expect("value registry poisoned");
        match registry.entry(value.id.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(TrackedValue {
                    value,
                    contexts: Vec::new(),
                    finding: None,
                    challenged: false,
                });
                true
            }
        }
    }

    /// Record one application of a value and re-evaluate it
    ///
    /// Unknown ids are registered implicitly.
    pub fn record_application(&self, value: &Value, context: FormationContext) -> BiasFinding {
        let mut registry = self.registry.lock().expect("value registry poisoned");
        let tracked = registry
            .entry(value.id.clone())
            .or_insert_with(|| TrackedValue {
                value: value.clone(),
                contexts: Vec::new(),
                finding: None,
                challenged: false,
            });

        tracked.value.strength = context.strength.clamp(0.0, 1.0);
        tracked.value.incidents = tracked.value.incidents.saturating_add(1);
        tracked.contexts.push(context);
        if tracked.contexts.len() > CONTEXT_LIMIT {
            let overflow = tracked.contexts.len() - CONTEXT_LIMIT;
            tracked.contexts.drain(..overflow);
        }

        let finding = detect(&tracked.value, &tracked.contexts, &self.config, Utc::now());
        if finding.bias_detected
            && tracked.finding.as_ref().map(|f| f.kind) != Some(finding.kind)
        {
            debug!(value_id = %finding.value_id, kind = ?finding.kind, "bias pattern flagged");
            // a new kind of finding reopens the challenge question
            tracked.challenged = false;
        }
        tracked.finding = Some(finding.clone());
        finding
    }

    /// Re-evaluate one tracked value without recording an application
    #[must_use]
    pub fn evaluate(&self, id: &ValueId) -> Option<BiasFinding> {
        let registry = self.registry.lock().expect("value registry poisoned");
        let tracked = registry.get(id)?;
        Some(detect(
            &tracked.value,
            &tracked.contexts,
            &self.config,
            Utc::now(),
        ))
    }

    /// Every current finding with a detected bias
    #[must_use]
    pub fn findings(&self) -> Vec<BiasFinding> {
        let registry = self.registry.lock().expect("value registry poisoned");
        registry
            .values()
            .filter_map(|t| t.finding.clone())
            .filter(|f| f.bias_detected)
            .collect()
    }

    /// Findings with a detected bias that no dream has challenged yet
    #[must_use]
    pub fn unchallenged(&self) -> Vec<BiasFinding> {
        let registry = self.registry.lock().expect("value registry poisoned");
        registry
            .values()
            .filter(|t| !t.challenged)
            .filter_map(|t| t.finding.clone())
            .filter(|f| f.bias_detected)
            .collect()
    }

    /// Count of unchallenged findings (the dream-trigger signal)
    #[must_use]
    pub fn unchallenged_count(&self) -> usize {
        self.unchallenged().len()
    }

    /// Mark a finding as challenged; returns false for unknown ids
    pub fn mark_challenged(&self, id: &ValueId) -> bool {
        let mut registry = self.registry.lock().expect("value registry poisoned");
        match registry.get_mut(id) {
            Some(tracked) => {
                tracked.challenged = true;
                true
            }
            None => false,
        }
    }

    /// Whether a memory trips any currently flagged value
    ///
    /// Word-matches the memory text against the categories of flagged
    /// values; a discriminatory hit wins over any other kind.
    #[must_use]
    pub fn assess_memory(&self, memory: &Memory) -> Option<BiasKind> {
        let words = crate::core::text::word_bag(memory.text());
        let registry = self.registry.lock().expect("value registry poisoned");

        let mut hit: Option<BiasKind> = None;
        for tracked in registry.values() {
            let Some(finding) = &tracked.finding else {
                continue;
            };
            if !finding.bias_detected || !words.contains(&finding.category) {
                continue;
            }
            match finding.kind {
                Some(BiasKind::Discriminatory) => return Some(BiasKind::Discriminatory),
                other => hit = hit.or(other),
            }
        }
        hit
    }

    /// Number of tracked values
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.registry.lock().expect("value registry poisoned").len()
    }
}

impl Default for BiasDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BiasDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiasDetector")
            .field("tracked", &self.tracked_count())
            .field("unchallenged", &self.unchallenged_count())
            .finish_non_exhaustive()
    }
}

/// Pure detection over a value and its recorded contexts
#[allow(clippy::cast_precision_loss)]
fn detect(
    value: &Value,
    contexts: &[FormationContext],
    config: &BiasDetectorConfig,
    now: DateTime<Utc>,
) -> BiasFinding {
    let verdict = |kind: Option<BiasKind>, confidence: f32| BiasFinding {
        value_id: value.id.clone(),
        category: value.category.clone(),
        strength: value.strength,
        incidents: value.incidents,
        bias_detected: kind.is_some(),
        kind,
        confidence,
    };

    // sensitive category: flagged regardless of history
    if SENSITIVE_CATEGORIES.contains(&value.category.as_str()) {
        return verdict(Some(BiasKind::Discriminatory), 0.9);
    }

    // monotonic strengthening with no opposing evidence anywhere in the run
    if contexts.len() >= config.monotonic_run {
        let run = &contexts[contexts.len() - config.monotonic_run..];
        let strengthening = run.windows(2).all(|w| w[1].strength > w[0].strength);
        let unopposed = run.iter().all(|c| !c.opposing_evidence);
        if strengthening && unopposed {
            return verdict(Some(BiasKind::Confirmation), 0.75);
        }
    }

    // still applied while outcomes keep going poorly
    if contexts.len() >= 3 {
        let poor = contexts.iter().filter(|c| c.outcome_poor).count() as f32;
        let ratio = poor / contexts.len() as f32;
        if ratio >= config.poor_outcome_ratio {
            return verdict(Some(BiasKind::Anchoring), ratio.min(1.0));
        }
    }

    // burst formation: most applications inside the trailing window
    if contexts.len() >= config.availability_min_incidents {
        let window_start = now - ChronoDuration::hours(config.availability_window_hours);
        let recent = contexts.iter().filter(|c| c.at >= window_start).count() as f32;
        if recent / contexts.len() as f32 >= config.availability_share {
            return verdict(Some(BiasKind::Availability), 0.6);
        }
    }

    verdict(None, 0.5)
}
