//! Core Building Blocks
//!
//! Fundamental types shared by every subsystem, plus the text heuristics
//! and the cooperative-cancellation primitive the engine loop is built on.

pub mod cancel;
pub mod text;
pub mod types;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use types::{
    Classification, DreamId, FactorScores, InferenceResult, Memory, MemoryId, MemoryKind,
    MemoryTier, Priority, ScoredMemory, Thought, ThoughtId, ThoughtKind, Tier, ValueId,
};
