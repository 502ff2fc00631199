//! Thought Classification
//!
//! Scores a thought on five dimensions (complexity, novelty, creativity,
//! uncertainty, stakes) and blends them into a tier decision. Pure with
//! respect to its inputs: the only state is the bounded outcome window that
//! feeds the adaptive threshold, and classification itself performs no I/O
//! and cannot fail.
//!
//! # Adaptive Threshold
//!
//! Routed outcomes are recorded back into the classifier. Once at least 20
//! sit in the window, the effective threshold is recomputed from scratch:
//! each surplus misclassification on one side nudges the cutoff by 0.02 in
//! the direction that would have avoided it, clamped to [0.4, 0.8]. The
//! recomputation is idempotent: evaluating twice over the same window
//! yields the same threshold.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::text;
use crate::core::types::{Classification, FactorScores, Thought, ThoughtKind, Tier};

/// Outcome window bound
const OUTCOME_WINDOW: usize = 50;

/// Outcomes required before the threshold adapts
const MIN_OUTCOMES_FOR_ADAPTION: usize = 20;

/// Threshold nudge per surplus misclassification
const ADAPTION_STEP: f32 = 0.02;

/// Adaptive threshold clamp bounds
const THRESHOLD_FLOOR: f32 = 0.4;
const THRESHOLD_CEIL: f32 = 0.8;

/// Deep score assigned to empty content
const EMPTY_CONTENT_SCORE: f32 = 0.1;

/// Novelty assigned when there is no recent history to compare against
const EMPTY_HISTORY_NOVELTY: f32 = 0.8;

// Vocabulary buckets. Membership is word-exact against the lowercase bag.
const COMPLEX_VOCAB: &[&str] = &[
    "design", "architecture", "architect", "optimize", "refactor", "concurrent",
    "distributed", "tradeoff", "algorithm", "invariant", "scalability", "deadlock",
    "protocol", "schema", "migration", "consistency",
];
const SIMPLE_VOCAB: &[&str] = &[
    "list", "count", "rename", "copy", "echo", "print", "format", "status",
    "lookup", "fetch",
];
const CREATIVE_VOCAB: &[&str] = &[
    "imagine", "invent", "novel", "brainstorm", "combine", "metaphor", "reframe",
    "explore", "wonder", "alternative", "design", "synthesize",
];
const DETERMINISTIC_VOCAB: &[&str] = &[
    "exact", "precise", "compute", "sum", "sort", "parse", "verify", "measure",
    "count",
];
const HEDGE_VOCAB: &[&str] = &[
    "maybe", "perhaps", "might", "possibly", "unclear", "unsure", "somehow",
    "probably", "seems", "could",
];
const VAGUE_VOCAB: &[&str] = &[
    "something", "things", "stuff", "whatever", "someone", "somewhere", "somewhat",
];
const HIGH_STAKES_VOCAB: &[&str] = &[
    "critical", "production", "security", "irreversible", "outage", "corruption",
    "loss", "breaking", "deadline", "destructive",
];
const LOW_STAKES_VOCAB: &[&str] = &[
    "trivial", "minor", "cosmetic", "optional", "experiment", "sandbox",
];

/// Weights over the five dimensions; must sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierWeights {
    pub complexity: f32,
    pub novelty: f32,
    pub creativity: f32,
    pub uncertainty: f32,
    pub stakes: f32,
}

impl Default for ClassifierWeights {
    fn default() -> Self {
        Self {
            complexity: 0.25,
            novelty: 0.20,
            creativity: 0.20,
            uncertainty: 0.15,
            stakes: 0.20,
        }
    }
}

impl ClassifierWeights {
    /// Sum across dimensions (1.0 for the default set)
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.complexity + self.novelty + self.creativity + self.uncertainty + self.stakes
    }

    /// Weighted blend of a factor vector
    #[must_use]
    pub fn blend(&self, factors: &FactorScores) -> f32 {
        factors.complexity * self.complexity
            + factors.novelty * self.novelty
            + factors.creativity * self.creativity
            + factors.uncertainty * self.uncertainty
            + factors.stakes * self.stakes
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    tier: Tier,
    ok: bool,
}

/// Five-dimension thought scorer with an adaptive tier threshold
pub struct ThoughtClassifier {
    weights: ClassifierWeights,
    initial_threshold: f32,
    adaptive: bool,
    outcomes: Mutex<VecDeque<Outcome>>,
}

impl ThoughtClassifier {
    /// Create a classifier with the given initial threshold
    #[must_use]
    pub fn new(threshold: f32, adaptive: bool) -> Self {
        Self {
            weights: ClassifierWeights::default(),
            initial_threshold: threshold.clamp(THRESHOLD_FLOOR, THRESHOLD_CEIL),
            adaptive,
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    /// Classify a thought against the recent window
    ///
    /// Always returns a classification: empty content short-circuits to the
    /// rote tier with a fixed low score.
    #[must_use]
    pub fn classify(&self, thought: &Thought, recent: &[Thought]) -> Classification {
        let threshold = self.threshold();

        if thought.content.trim().is_empty() {
            return Classification {
                tier: Tier::Rote,
                deep_score: EMPTY_CONTENT_SCORE,
                confidence: confidence(EMPTY_CONTENT_SCORE, threshold),
                factors: FactorScores::default(),
                reason: "empty content".to_string(),
            };
        }

        let bag = text::word_bag(&thought.content);
        let factors = FactorScores {
            complexity: complexity_score(thought, &bag),
            novelty: novelty_score(thought, recent),
            creativity: creativity_score(thought, &bag),
            uncertainty: uncertainty_score(thought, &bag),
            stakes: stakes_score(thought, &bag),
        }
        .clamped();

        let deep_score = self.weights.blend(&factors).clamp(0.0, 1.0);
        let tier = if deep_score > threshold {
            Tier::Deep
        } else {
            Tier::Rote
        };

        let classification = Classification {
            tier,
            deep_score,
            confidence: confidence(deep_score, threshold),
            factors,
            reason: reason_text(tier, deep_score, threshold, &factors, &self.weights),
        };
        debug!(
            tier = %classification.tier,
            score = classification.deep_score,
            threshold,
            "thought classified"
        );
        classification
    }

    /// Record a routed outcome for threshold adaption
    pub fn record_outcome(&self, tier: Tier, ok: bool) {
        if !self.adaptive {
            return;
        }
        let mut outcomes = self.outcomes.lock().expect("outcome window poisoned");
        outcomes.push_back(Outcome { tier, ok });
        while outcomes.len() > OUTCOME_WINDOW {
            outcomes.pop_front();
        }
    }

    /// The currently effective threshold
    ///
    /// Recomputed from the outcome window on every call, so repeated
    /// evaluation over unchanged outcomes is idempotent. Balanced
    /// misclassifications (within one sample) leave the initial threshold
    /// untouched.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn threshold(&self) -> f32 {
        if !self.adaptive {
            return self.initial_threshold;
        }
        let outcomes = self.outcomes.lock().expect("outcome window poisoned");
        if outcomes.len() < MIN_OUTCOMES_FOR_ADAPTION {
            return self.initial_threshold;
        }

        let deep_misses = outcomes
            .iter()
            .filter(|o| o.tier == Tier::Deep && !o.ok)
            .count() as i64;
        let rote_misses = outcomes
            .iter()
            .filter(|o| o.tier == Tier::Rote && !o.ok)
            .count() as i64;

        let skew = deep_misses - rote_misses;
        if skew.abs() <= 1 {
            return self.initial_threshold;
        }

        // deep failures mean the cutoff sat too low; rote failures mean
        // thoughts that deserved the deep tier were starved
        (self.initial_threshold + ADAPTION_STEP * skew as f32)
            .clamp(THRESHOLD_FLOOR, THRESHOLD_CEIL)
    }

    /// Number of recorded outcomes currently in the window
    #[must_use]
    pub fn outcome_count(&self) -> usize {
        self.outcomes.lock().expect("outcome window poisoned").len()
    }
}

impl std::fmt::Debug for ThoughtClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThoughtClassifier")
            .field("initial_threshold", &self.initial_threshold)
            .field("adaptive", &self.adaptive)
            .field("outcomes", &self.outcome_count())
            .finish_non_exhaustive()
    }
}

fn confidence(score: f32, threshold: f32) -> f32 {
    ((score - threshold).abs() / 0.4).min(1.0)
}

#[allow(clippy::cast_precision_loss)]
fn complexity_score(thought: &Thought, bag: &std::collections::HashSet<String>) -> f32 {
    let tokens = text::token_count(&thought.content) as f32;
    let mut score = (tokens / 20.0).min(0.4);
    score += (text::vocab_hits(bag, COMPLEX_VOCAB) as f32 * 0.25).min(0.5);
    score -= text::vocab_hits(bag, SIMPLE_VOCAB) as f32 * 0.15;
    score += (text::clause_separators(&thought.content) as f32 * 0.05).min(0.15);
    score += match thought.kind {
        ThoughtKind::Architecture => 0.35,
        ThoughtKind::Meta => 0.15,
        ThoughtKind::Error => 0.1,
        ThoughtKind::Question => 0.05,
        _ => 0.0,
    };
    score
}

fn novelty_score(thought: &Thought, recent: &[Thought]) -> f32 {
    if recent.is_empty() {
        return EMPTY_HISTORY_NOVELTY;
    }
    let max_similarity = recent
        .iter()
        .map(|r| text::similarity(&thought.content, &r.content))
        .fold(0.0_f32, f32::max);
    1.0 - max_similarity
}

#[allow(clippy::cast_precision_loss)]
fn creativity_score(thought: &Thought, bag: &std::collections::HashSet<String>) -> f32 {
    let mut score = 0.2;
    score += (text::vocab_hits(bag, CREATIVE_VOCAB) as f32 * 0.2).min(0.4);
    score -= text::vocab_hits(bag, DETERMINISTIC_VOCAB) as f32 * 0.15;

    let content = thought.content.trim().to_lowercase();
    let open_ended = content.ends_with('?')
        && ["what if", "how might", "why", "how could", "what would"]
            .iter()
            .any(|prefix| content.starts_with(prefix));
    if open_ended {
        score += 0.2;
    }

    score += match thought.kind {
        ThoughtKind::Architecture => 0.4,
        ThoughtKind::Reflection => 0.25,
        ThoughtKind::Question => 0.1,
        _ => 0.0,
    };
    score
}

#[allow(clippy::cast_precision_loss)]
fn uncertainty_score(thought: &Thought, bag: &std::collections::HashSet<String>) -> f32 {
    let tokens = text::token_count(&thought.content).max(1) as f32;
    let hedge_density = text::vocab_hits(bag, HEDGE_VOCAB) as f32 / tokens;
    let vague_density = text::vocab_hits(bag, VAGUE_VOCAB) as f32 / tokens;

    let mut score = 0.2 + (hedge_density * 3.0).min(0.5) + (vague_density * 2.0).min(0.3);
    if text::has_numeral(&thought.content) {
        score -= 0.15;
    }
    if text::has_quoted_span(&thought.content) {
        score -= 0.15;
    }
    score
}

#[allow(clippy::cast_precision_loss)]
fn stakes_score(thought: &Thought, bag: &std::collections::HashSet<String>) -> f32 {
    let mut score = 0.25;
    score += (text::vocab_hits(bag, HIGH_STAKES_VOCAB) as f32 * 0.25).min(0.5);
    score -= text::vocab_hits(bag, LOW_STAKES_VOCAB) as f32 * 0.2;
    score += match thought.kind {
        ThoughtKind::Error => 0.3,
        ThoughtKind::Architecture => 0.45,
        ThoughtKind::Command => 0.15,
        _ => 0.0,
    };
    score
}

fn reason_text(
    tier: Tier,
    score: f32,
    threshold: f32,
    factors: &FactorScores,
    weights: &ClassifierWeights,
) -> String {
    let mut contributions = [
        ("complexity", factors.complexity * weights.complexity),
        ("novelty", factors.novelty * weights.novelty),
        ("creativity", factors.creativity * weights.creativity),
        ("uncertainty", factors.uncertainty * weights.uncertainty),
        ("stakes", factors.stakes * weights.stakes),
    ];
    contributions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let relation = if score > threshold { ">" } else { "<=" };
    format!(
        "{tier}: score {score:.2} {relation} threshold {threshold:.2} ({} and {} lead)",
        contributions[0].0, contributions[1].0
    )
}
