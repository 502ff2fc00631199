//! Consolidation Policy
//!
//! Pure per-memory promotion scoring. Five weighted factors decide whether
//! a working memory earns a slot in episodic storage; the weights are
//! normalized so the promotion score always lands in [0, 1] regardless of
//! how an embedder tunes them.

use serde::{Deserialize, Serialize};

use crate::bias::BiasKind;
use crate::core::text;
use crate::core::types::{Memory, MemoryId, MemoryKind};

/// Per-factor scores behind one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConsolidationFactors {
    pub importance: f32,
    pub emotional_salience: f32,
    pub novelty: f32,
    pub access_frequency: f32,
    pub value_alignment: f32,
}

/// The verdict for one memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationEvaluation {
    pub memory_id: MemoryId,
    pub promotion_score: f32,
    pub threshold: f32,
    pub should_promote: bool,
    pub factors: ConsolidationFactors,
    pub reason: String,
}

/// Factor weights; normalized at scoring time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationWeights {
    pub importance: f32,
    pub emotional_salience: f32,
    pub novelty: f32,
    pub access_frequency: f32,
    pub value_alignment: f32,
}

impl Default for ConsolidationWeights {
    fn default() -> Self {
        Self {
            importance: 0.30,
            emotional_salience: 0.20,
            novelty: 0.15,
            access_frequency: 0.20,
            value_alignment: 0.15,
        }
    }
}

impl ConsolidationWeights {
    /// Sum across factors (1.0 for the default set)
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.importance
            + self.emotional_salience
            + self.novelty
            + self.access_frequency
            + self.value_alignment
    }
}

/// What the bias detector had to say about a memory, if anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueAlignment {
    /// No detector is configured
    #[default]
    NoDetector,
    /// A detector looked and found nothing
    Clear,
    /// A detector flagged the memory
    Flagged(BiasKind),
}

impl ValueAlignment {
    /// The alignment factor this verdict contributes
    #[must_use]
    pub const fn factor(self) -> f32 {
        match self {
            // benefit of the doubt when a detector actively cleared it
            Self::Clear => 0.9,
            Self::NoDetector => 0.7,
            Self::Flagged(BiasKind::Discriminatory) => 0.1,
            Self::Flagged(_) => 0.4,
        }
    }
}

/// Five-factor promotion evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationPolicy {
    weights: ConsolidationWeights,
    threshold: f32,
}

impl ConsolidationPolicy {
    /// Create a policy with the given promotion cutoff
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self {
            weights: ConsolidationWeights::default(),
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Override the factor weights
    #[must_use]
    pub fn with_weights(mut self, weights: ConsolidationWeights) -> Self {
        self.weights = weights;
        self
    }

    /// The configured promotion cutoff
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score one memory against its surroundings
    ///
    /// `recent` is the current working buffer, `existing` recent episodic
    /// memories; both feed the novelty factor. `alignment` carries the bias
    /// detector's verdict.
    #[must_use]
    pub fn evaluate(
        &self,
        memory: &Memory,
        recent: &[Memory],
        existing: &[Memory],
        alignment: ValueAlignment,
    ) -> ConsolidationEvaluation {
        let factors = ConsolidationFactors {
            importance: importance_factor(memory),
            emotional_salience: emotional_factor(memory),
            novelty: novelty_factor(memory, recent, existing),
            access_frequency: access_frequency_factor(memory.access_count),
            value_alignment: alignment.factor(),
        };

        let weight_sum = self.weights.sum();
        let promotion_score = if weight_sum > 0.0 {
            (factors.importance * self.weights.importance
                + factors.emotional_salience * self.weights.emotional_salience
                + factors.novelty * self.weights.novelty
                + factors.access_frequency * self.weights.access_frequency
                + factors.value_alignment * self.weights.value_alignment)
                / weight_sum
        } else {
            0.0
        };

        let should_promote = promotion_score >= self.threshold;
        let reason = reason_text(should_promote, promotion_score, self.threshold, &factors, &self.weights);

        ConsolidationEvaluation {
            memory_id: memory.id.clone(),
            promotion_score,
            threshold: self.threshold,
            should_promote,
            factors,
            reason,
        }
    }
}

fn importance_factor(memory: &Memory) -> f32 {
    let kind_bias = match memory.kind {
        MemoryKind::Error | MemoryKind::Insight => 0.15,
        MemoryKind::Success => 0.1,
        _ => 0.0,
    };
    (memory.importance + kind_bias).clamp(0.0, 1.0)
}

fn emotional_factor(memory: &Memory) -> f32 {
    let magnitude = memory.emotional_salience.abs();
    if magnitude > f32::EPSILON {
        return magnitude.clamp(0.0, 1.0);
    }
    // flat salience falls back to what the kind usually carries
    match memory.kind {
        MemoryKind::Error => 0.6,
        MemoryKind::Insight => 0.5,
        MemoryKind::Success => 0.4,
        _ => 0.2,
    }
}

fn novelty_factor(memory: &Memory, recent: &[Memory], existing: &[Memory]) -> f32 {
    let max_similarity = recent
        .iter()
        .chain(existing.iter())
        .filter(|other| other.id != memory.id)
        .map(|other| text::similarity(memory.text(), other.text()))
        .fold(None::<f32>, |acc, s| Some(acc.map_or(s, |a| a.max(s))));

    match max_similarity {
        Some(similarity) => (1.0 - similarity).clamp(0.0, 1.0),
        // nothing to compare against: trust formation-time novelty
        None => memory.novelty.unwrap_or(0.8),
    }
}

#[allow(clippy::cast_precision_loss)]
fn access_frequency_factor(access_count: u32) -> f32 {
    match access_count {
        0 => 0.2,
        n => (0.3 + (n - 1) as f32 * 0.175).min(1.0),
    }
}

fn reason_text(
    promote: bool,
    score: f32,
    threshold: f32,
    factors: &ConsolidationFactors,
    weights: &ConsolidationWeights,
) -> String {
    let mut contributions = [
        ("importance", factors.importance * weights.importance),
        (
            "emotionalSalience",
            factors.emotional_salience * weights.emotional_salience,
        ),
        ("novelty", factors.novelty * weights.novelty),
        (
            "accessFrequency",
            factors.access_frequency * weights.access_frequency,
        ),
        (
            "valueAlignment",
            factors.value_alignment * weights.value_alignment,
        ),
    ];
    contributions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let verdict = if promote { "promote" } else { "discard" };
    let relation = if promote { ">=" } else { "<" };
    format!(
        "{verdict}: {:.2} {relation} {:.2}, {} and {} lead",
        score, threshold, contributions[0].0, contributions[1].0
    )
}
