//! GISKARD - an autonomous cognitive loop
//!
//! A long-running process that repeatedly generates an internal thought,
//! routes it to one of two inference tiers under a daily token budget,
//! folds the exchange into a bounded working memory, periodically
//! consolidates working memory into episodic storage ("dreams"), watches
//! its own values for self-reinforcing bias, and tunes its own cadence,
//! publishing typed events throughout.
//!
//! # Architecture
//!
//! - **Engine**: the serial cycle loop with cooperative cancellation and
//!   self-health auto-stop
//! - **Router**: classify → budget-check → dispatch → retry → fallback
//! - **Budget**: thread-safe daily token ledger with per-tier attribution
//! - **Memory**: fixed-slot working buffer with scored eviction, plus the
//!   consolidation policy that promotes memories to episodic storage
//! - **Dreams**: multi-trigger consolidation runs with bias challenge and
//!   creative recombination
//! - **Events**: typed pub/sub over a closed topic set
//!
//! The crate performs no I/O of its own: inference transports, episodic
//! storage, state blobs, save points, and thought generation are injected
//! through the traits in [`providers`], and the [`orchestrator`] wires a
//! concrete set into one [`orchestrator::Mind`] handle.

pub mod bias;
pub mod budget;
pub mod classifier;
pub mod config;
pub mod core;
pub mod dream;
pub mod engine;
pub mod events;
pub mod memory;
pub mod orchestrator;
pub mod persistence;
pub mod providers;
pub mod router;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::MindConfig;
pub use orchestrator::{Mind, MindBuilder, MindContext, MindError, MindState};
