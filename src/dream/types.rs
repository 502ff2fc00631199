//! Dream Types
//!
//! Configuration, triggers, and reports for consolidation runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::types::DreamId;

/// Why a consolidation run started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DreamTrigger {
    /// Working buffer filled past the pressure threshold
    MemoryPressure,
    /// The configured interval elapsed since the last run
    TimeElapsed,
    /// No run has ever happened and enough cycles have passed
    FirstDream,
    /// Multiple high-importance memories are waiting
    HighImportance,
    /// Unchallenged bias findings accumulated
    BiasAccumulation,
    /// Explicit caller request
    Manual,
}

/// Trigger urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPriority {
    Medium,
    High,
}

impl DreamTrigger {
    /// How urgently this trigger wants a run
    #[must_use]
    pub const fn priority(self) -> TriggerPriority {
        match self {
            Self::MemoryPressure | Self::HighImportance | Self::BiasAccumulation | Self::Manual => {
                TriggerPriority::High
            }
            Self::TimeElapsed | Self::FirstDream => TriggerPriority::Medium,
        }
    }
}

impl std::fmt::Display for DreamTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MemoryPressure => "memory-pressure",
            Self::TimeElapsed => "time-elapsed",
            Self::FirstDream => "first-dream",
            Self::HighImportance => "high-importance",
            Self::BiasAccumulation => "bias-accumulation",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// The phases of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DreamPhase {
    Consolidation,
    BiasCheck,
    Recombination,
}

impl std::fmt::Display for DreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Consolidation => "consolidation",
            Self::BiasCheck => "bias-check",
            Self::Recombination => "recombination",
        };
        write!(f, "{s}")
    }
}

/// What happened in one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: DreamPhase,
    pub ok: bool,
    pub detail: String,
}

/// Consolidation-run tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamConfig {
    /// Buffer pressure at which a run triggers
    pub pressure_threshold: f32,
    /// Interval for the time-based trigger
    pub interval: Duration,
    /// Cycles that must pass before the very first run
    pub min_cycles_before_first: u64,
    /// Importance bar for the high-importance trigger
    pub high_importance_threshold: f32,
    /// Buffered memories over the bar needed to trigger
    pub high_importance_count: usize,
    /// Unchallenged findings needed to trigger
    pub bias_accumulation_count: usize,
    /// Memories needed before recombination is attempted
    pub recombination_min_memories: usize,
    /// Parsed insights shorter than this are discarded
    pub insight_min_chars: usize,
    /// Episodic memories pulled in as consolidation context
    pub context_recent: usize,
}

impl Default for DreamConfig {
    fn default() -> Self {
        Self {
            pressure_threshold: 0.8,
            interval: Duration::from_secs(24 * 3600),
            min_cycles_before_first: 5,
            high_importance_threshold: 0.8,
            high_importance_count: 2,
            bias_accumulation_count: 5,
            recombination_min_memories: 2,
            insight_min_chars: 10,
            context_recent: 10,
        }
    }
}

/// The record of one consolidation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamReport {
    pub id: DreamId,
    pub triggered_by: DreamTrigger,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub phases: Vec<PhaseRecord>,
    pub memories_promoted: usize,
    pub memories_discarded: usize,
    pub biases_challenged: usize,
    pub insights_generated: usize,
    pub ok: bool,
    pub error: Option<String>,
}
