//! Token Budget Accountant
//!
//! A daily ledger for deep-tier spending. The window rolls at the next UTC
//! midnight: the first operation at or past the boundary resets usage
//! atomically before doing its own work, so no charge is ever split across
//! two windows.
//!
//! # Concurrency
//!
//! All state sits behind one mutex and every operation is O(1) (history is
//! a bounded ring). Sections never hold the lock across an await: the
//! guard is a `std::sync::Mutex` guard, which cannot cross one.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::types::Tier;

/// In-memory charge-history bound
pub const HISTORY_LIMIT: usize = 256;

/// Budget operation errors
#[derive(Debug, Clone, Error)]
pub enum BudgetError {
    /// The charge would overrun the daily cap
    #[error("budget exceeded: requested {requested} with {remaining} remaining")]
    Exceeded { requested: u64, remaining: u64 },
}

/// Per-tier attribution of spent tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub deep: u64,
    pub rote: u64,
}

impl TierUsage {
    /// Total across tiers
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.deep + self.rote
    }
}

/// One recorded charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCharge {
    pub amount: u64,
    pub tier: Tier,
    pub at: DateTime<Utc>,
}

/// Full ledger state; also the persisted blob shape
///
/// Invariant: `used == used_by_tier.total() <= daily_limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub daily_limit: u64,
    pub used: u64,
    pub used_by_tier: TierUsage,
    pub next_reset_at: DateTime<Utc>,
    pub history: Vec<BudgetCharge>,
}

impl BudgetState {
    /// Tokens still spendable in the current window
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.used)
    }

    /// Remaining budget as a fraction of the daily cap, in [0, 1]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn remaining_fraction(&self) -> f32 {
        if self.daily_limit == 0 {
            return 0.0;
        }
        self.remaining() as f32 / self.daily_limit as f32
    }
}

/// Non-mutating affordability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub affordable: bool,
    pub remaining: u64,
}

struct Ledger {
    daily_limit: u64,
    used: u64,
    used_by_tier: TierUsage,
    next_reset_at: DateTime<Utc>,
    history: VecDeque<BudgetCharge>,
}

impl Ledger {
    fn roll_if_due(&mut self, now: DateTime<Utc>) {
        if now < self.next_reset_at {
            return;
        }
        info!(
            used = self.used,
            deep = self.used_by_tier.deep,
            rote = self.used_by_tier.rote,
            "daily budget window reset"
        );
        self.used = 0;
        self.used_by_tier = TierUsage::default();
        self.next_reset_at = next_utc_midnight(now);
    }
}

/// Thread-safe daily token ledger with per-tier attribution
pub struct BudgetManager {
    ledger: Mutex<Ledger>,
}

impl BudgetManager {
    /// Create a ledger with the given daily cap, window ending at the next
    /// UTC midnight
    #[must_use]
    pub fn new(daily_limit: u64) -> Self {
        let now = Utc::now();
        Self {
            ledger: Mutex::new(Ledger {
                daily_limit,
                used: 0,
                used_by_tier: TierUsage::default(),
                next_reset_at: next_utc_midnight(now),
                history: VecDeque::new(),
            }),
        }
    }

    /// Record spending against the daily cap
    ///
    /// Resets the window first when the wall clock has passed the boundary.
    /// A zero amount is a no-op.
    ///
    /// # Errors
    ///
    /// [`BudgetError::Exceeded`] when `used + amount` would overrun the cap;
    /// the ledger is left untouched.
    pub fn charge(&self, amount: u64, tier: Tier) -> Result<(), BudgetError> {
        if amount == 0 {
            return Ok(());
        }
        let now = Utc::now();
        let mut ledger = self.ledger.lock().expect("budget ledger poisoned");
        ledger.roll_if_due(now);

        if ledger.used + amount > ledger.daily_limit {
            return Err(BudgetError::Exceeded {
                requested: amount,
                remaining: ledger.daily_limit - ledger.used,
            });
        }

        ledger.used += amount;
        match tier {
            Tier::Deep => ledger.used_by_tier.deep += amount,
            Tier::Rote => ledger.used_by_tier.rote += amount,
        }
        ledger.history.push_back(BudgetCharge {
            amount,
            tier,
            at: now,
        });
        while ledger.history.len() > HISTORY_LIMIT {
            ledger.history.pop_front();
        }

        debug!(amount, %tier, used = ledger.used, "tokens charged");
        Ok(())
    }

    /// Check affordability without mutating usage (the reset rule still
    /// applies)
    #[must_use]
    pub fn quote(&self, amount: u64) -> Quote {
        let now = Utc::now();
        let mut ledger = self.ledger.lock().expect("budget ledger poisoned");
        ledger.roll_if_due(now);
        Quote {
            affordable: ledger.used + amount <= ledger.daily_limit,
            remaining: ledger.daily_limit - ledger.used,
        }
    }

    /// Consistent point-in-time copy of the ledger
    #[must_use]
    pub fn snapshot(&self) -> BudgetState {
        let mut ledger = self.ledger.lock().expect("budget ledger poisoned");
        ledger.roll_if_due(Utc::now());
        BudgetState {
            daily_limit: ledger.daily_limit,
            used: ledger.used,
            used_by_tier: ledger.used_by_tier,
            next_reset_at: ledger.next_reset_at,
            history: ledger.history.iter().cloned().collect(),
        }
    }

    /// Replace the ledger with a persisted snapshot
    ///
    /// The daily cap keeps its configured value; a snapshot whose usage
    /// attribution disagrees with its total is repaired from the per-tier
    /// figures and logged.
    pub fn restore(&self, state: BudgetState) {
        let mut ledger = self.ledger.lock().expect("budget ledger poisoned");

        let mut used = state.used;
        if state.used != state.used_by_tier.total() {
            warn!(
                used = state.used,
                by_tier = state.used_by_tier.total(),
                "restored budget attribution mismatch, trusting per-tier sums"
            );
            used = state.used_by_tier.total();
        }

        ledger.used = used.min(ledger.daily_limit);
        ledger.used_by_tier = state.used_by_tier;
        ledger.next_reset_at = state.next_reset_at;
        ledger.history = state.history.into_iter().collect();
        while ledger.history.len() > HISTORY_LIMIT {
            ledger.history.pop_front();
        }
        // a stale snapshot resets on the next operation
    }
}

impl std::fmt::Debug for BudgetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("BudgetManager")
            .field("daily_limit", &snapshot.daily_limit)
            .field("used", &snapshot.used)
            .field("next_reset_at", &snapshot.next_reset_at)
            .finish_non_exhaustive()
    }
}

/// The UTC midnight strictly after `now`
#[must_use]
fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
}
