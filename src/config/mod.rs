//! Loop Configuration
//!
//! The enumerated option set recognized by the orchestrator. Every knob the
//! loop honours is a named field here; there is no pass-through options bag.
//! Cadence is advisory within `[cycle_min_ms, cycle_max_ms]`: the tuner may
//! move it, the clamp keeps it sane.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors produced by [`MindConfig::validate`]
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A [0, 1] threshold is out of range
    #[error("threshold {name} = {value} outside [0, 1]")]
    InvalidThreshold { name: &'static str, value: f32 },

    /// The cadence clamp bounds are inverted or degenerate
    #[error("cycle bounds invalid: min {min_ms}ms, max {max_ms}ms")]
    InvalidCycleBounds { min_ms: u64, max_ms: u64 },

    /// A capacity or interval that must be positive is zero
    #[error("{name} must be positive")]
    ZeroValue { name: &'static str },
}

/// Full configuration for a cognitive loop instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MindConfig {
    /// Daily token cap for the deep tier
    pub daily_token_limit: u64,

    /// Initial cadence between cycles, in milliseconds
    pub cycle_interval_ms: u64,

    /// Lower clamp bound for tuner-adjusted cadence
    pub cycle_min_ms: u64,

    /// Upper clamp bound for tuner-adjusted cadence
    pub cycle_max_ms: u64,

    /// Working-memory capacity in slots
    pub buffer_slots: usize,

    /// Hours between time-triggered consolidation runs
    pub dream_interval_hours: u64,

    /// Buffer pressure at which consolidation triggers
    pub memory_pressure_threshold: f32,

    /// Promotion-score cutoff for consolidation
    pub consolidation_threshold: f32,

    /// Initial deep-tier cutoff for the classifier
    pub classifier_threshold: f32,

    /// Cycles between save-point calls
    pub auto_commit_interval: u64,

    /// Cycles between state persistence writes
    pub auto_save_interval: u64,

    /// Retry attempts per inference dispatch
    pub inference_max_retries: u32,

    /// Per-call inference deadline, in milliseconds
    pub inference_deadline_ms: u64,

    /// Master switch: a disabled loop refuses to start
    pub enabled: bool,

    /// Whether consolidation runs at all
    pub dream_enabled: bool,

    /// Whether the save-point step runs
    pub auto_commit_enabled: bool,

    /// Whether classifier outcomes feed the adaptive threshold
    pub learning_enabled: bool,
}

impl Default for MindConfig {
    fn default() -> Self {
        Self {
            daily_token_limit: 1_000_000,
            cycle_interval_ms: 30_000,
            cycle_min_ms: 10_000,
            cycle_max_ms: 300_000,
            buffer_slots: 5,
            dream_interval_hours: 24,
            memory_pressure_threshold: 0.8,
            consolidation_threshold: 0.6,
            classifier_threshold: 0.6,
            auto_commit_interval: 10,
            auto_save_interval: 5,
            inference_max_retries: 3,
            inference_deadline_ms: 30_000,
            enabled: true,
            dream_enabled: true,
            auto_commit_enabled: true,
            learning_enabled: true,
        }
    }
}

impl MindConfig {
    /// Check every field against its documented range
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("memoryPressureThreshold", self.memory_pressure_threshold),
            ("consolidationThreshold", self.consolidation_threshold),
            ("classifierThreshold", self.classifier_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }

        if self.cycle_min_ms == 0 || self.cycle_min_ms > self.cycle_max_ms {
            return Err(ConfigError::InvalidCycleBounds {
                min_ms: self.cycle_min_ms,
                max_ms: self.cycle_max_ms,
            });
        }

        if self.buffer_slots == 0 {
            return Err(ConfigError::ZeroValue {
                name: "bufferSlots",
            });
        }
        if self.daily_token_limit == 0 {
            return Err(ConfigError::ZeroValue {
                name: "dailyTokenLimit",
            });
        }
        if self.auto_save_interval == 0 {
            return Err(ConfigError::ZeroValue {
                name: "autoSaveInterval",
            });
        }
        if self.auto_commit_interval == 0 {
            return Err(ConfigError::ZeroValue {
                name: "autoCommitInterval",
            });
        }

        Ok(())
    }

    /// Initial cadence clamped into the configured bounds
    #[must_use]
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.clamp_interval_ms(self.cycle_interval_ms))
    }

    /// Clamp a proposed cadence (from the tuner) into bounds
    #[must_use]
    pub fn clamp_interval_ms(&self, proposed_ms: u64) -> u64 {
        proposed_ms.clamp(self.cycle_min_ms, self.cycle_max_ms)
    }

    /// Per-call inference deadline
    #[must_use]
    pub fn inference_deadline(&self) -> Duration {
        Duration::from_millis(self.inference_deadline_ms)
    }

    /// Interval for the time-based consolidation trigger
    #[must_use]
    pub fn dream_interval(&self) -> Duration {
        Duration::from_secs(self.dream_interval_hours * 3600)
    }

    /// Fast configuration for tests: tight cadence, tiny intervals
    #[must_use]
    pub fn fast() -> Self {
        Self {
            cycle_interval_ms: 10,
            cycle_min_ms: 1,
            cycle_max_ms: 1000,
            auto_save_interval: 2,
            auto_commit_interval: 3,
            inference_deadline_ms: 2_000,
            ..Self::default()
        }
    }
}
