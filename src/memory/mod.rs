//! Working Memory & Consolidation
//!
//! Short-term memory is a fixed-slot buffer with scored eviction; the
//! consolidation policy decides which working memories earn promotion to
//! the episodic store. The buffer hands eviction victims to a channel and
//! the policy is pure; neither knows what long-term storage looks like.

pub mod buffer;
pub mod consolidation;

pub use buffer::{evict_score, EvictionRecord, WorkingBuffer, EVICTION_LOG_LIMIT};
pub use consolidation::{
    ConsolidationEvaluation, ConsolidationFactors, ConsolidationPolicy, ConsolidationWeights,
    ValueAlignment,
};
