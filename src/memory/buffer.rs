//! Working-Memory Buffer
//!
//! A fixed-slot, insertion-ordered buffer of live memories. When full, an
//! insert picks the eviction victim by composite score and hands it off for
//! promotion through a channel; the buffer never sees long-term storage
//! (the orchestrator drains the channel into the episodic store).
//!
//! # Eviction Scoring
//!
//! `evict_score = 0.4·age_days + 0.3·(1 / (access_count + 1)) +
//! 0.3·(1 − importance)`. The highest score loses its slot; ties break
//! toward the older `created_at`.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::text;
use crate::core::types::{Memory, MemoryId};

/// Bound on the retained eviction log
pub const EVICTION_LOG_LIMIT: usize = 100;

/// One logged eviction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionRecord {
    pub memory_id: MemoryId,
    pub evict_score: f32,
    pub at: DateTime<Utc>,
}

struct BufferInner {
    slots: Vec<Memory>,
    evictions: VecDeque<EvictionRecord>,
}

/// Fixed-capacity short-term memory with scored eviction
pub struct WorkingBuffer {
    capacity: usize,
    inner: Mutex<BufferInner>,
    eviction_sink: Mutex<Option<mpsc::UnboundedSender<Memory>>>,
}

impl WorkingBuffer {
    /// Create an empty buffer with the given slot count
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(BufferInner {
                slots: Vec::new(),
                evictions: VecDeque::new(),
            }),
            eviction_sink: Mutex::new(None),
        }
    }

    /// Attach the promotion hand-off channel for eviction victims
    pub fn set_eviction_sink(&self, sink: mpsc::UnboundedSender<Memory>) {
        *self.eviction_sink.lock().expect("eviction sink poisoned") = Some(sink);
    }

    /// Insert a memory, evicting the highest-scoring slot when full
    ///
    /// Returns the eviction record when a slot was freed. The victim itself
    /// is moved into the hand-off channel; without one attached it is
    /// dropped with a warning.
    pub fn insert(&self, memory: Memory) -> Option<EvictionRecord> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("working buffer poisoned");

        let record = if inner.slots.len() >= self.capacity {
            let victim_idx = eviction_victim(&inner.slots, now)?;
            let victim = inner.slots.remove(victim_idx);
            let record = EvictionRecord {
                memory_id: victim.id.clone(),
                evict_score: evict_score(&victim, now),
                at: now,
            };
            debug!(memory_id = %record.memory_id, score = record.evict_score, "slot evicted");
            inner.evictions.push_back(record.clone());
            while inner.evictions.len() > EVICTION_LOG_LIMIT {
                inner.evictions.pop_front();
            }

            let sink = self.eviction_sink.lock().expect("eviction sink poisoned");
            match sink.as_ref() {
                Some(tx) => {
                    if tx.send(victim).is_err() {
                        warn!("eviction sink closed, victim memory dropped");
                    }
                }
                None => warn!("no eviction sink attached, victim memory dropped"),
            }
            Some(record)
        } else {
            None
        };

        inner.slots.push(memory);
        debug_assert!(inner.slots.len() <= self.capacity);
        record
    }

    /// Increment a memory's access counter; unknown ids are a no-op
    pub fn touch(&self, id: &MemoryId) {
        let mut inner = self.inner.lock().expect("working buffer poisoned");
        if let Some(memory) = inner.slots.iter_mut().find(|m| &m.id == id) {
            memory.record_access();
        }
    }

    /// Retrieve the top-`k` memories for a query, touching each hit
    ///
    /// Scoring is text similarity with a recency boost
    /// (`max(0, 1 − age_hours/24) · 0.1`) and an importance boost
    /// (`importance · 0.2`).
    #[must_use]
    pub fn query(&self, query: &str, k: usize) -> Vec<Memory> {
        let now = Utc::now();
        let query_bag = text::word_bag(query);
        let mut inner = self.inner.lock().expect("working buffer poisoned");

        let mut scored: Vec<(usize, f32)> = inner
            .slots
            .iter()
            .enumerate()
            .map(|(idx, memory)| {
                let similarity = text::jaccard(&query_bag, &text::word_bag(memory.text()));
                let recency = (1.0 - memory.age_hours(now) / 24.0).max(0.0) * 0.1;
                let importance = memory.importance * 0.2;
                (idx, similarity + recency + importance)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut hits = Vec::with_capacity(scored.len());
        for (idx, _) in scored {
            inner.slots[idx].record_access();
            hits.push(inner.slots[idx].clone());
        }
        hits
    }

    /// Snapshot every slot in insertion order
    #[must_use]
    pub fn list(&self) -> Vec<Memory> {
        self.inner
            .lock()
            .expect("working buffer poisoned")
            .slots
            .clone()
    }

    /// Remove one memory by id, if it is still resident
    ///
    /// Consolidation uses this to apply promotions and discards after
    /// scoring outside the lock; a slot that moved in the meantime simply
    /// returns `None`.
    pub fn remove(&self, id: &MemoryId) -> Option<Memory> {
        let mut inner = self.inner.lock().expect("working buffer poisoned");
        let idx = inner.slots.iter().position(|m| &m.id == id)?;
        Some(inner.slots.remove(idx))
    }

    /// Drop every slot
    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("working buffer poisoned")
            .slots
            .clear();
    }

    /// Occupied slot count
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().expect("working buffer poisoned").slots.len()
    }

    /// Whether no slots are occupied
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Configured slot count
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill fraction in [0, 1]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pressure(&self) -> f32 {
        self.size() as f32 / self.capacity as f32
    }

    /// The retained eviction log, oldest first
    #[must_use]
    pub fn evictions(&self) -> Vec<EvictionRecord> {
        self.inner
            .lock()
            .expect("working buffer poisoned")
            .evictions
            .iter()
            .cloned()
            .collect()
    }

    /// Replace contents from a persisted snapshot
    ///
    /// Slots beyond capacity are dropped oldest-first.
    pub fn restore(&self, slots: Vec<Memory>, evictions: Vec<EvictionRecord>) {
        let mut inner = self.inner.lock().expect("working buffer poisoned");
        let overflow = slots.len().saturating_sub(self.capacity);
        inner.slots = slots.into_iter().skip(overflow).collect();
        inner.evictions = evictions.into_iter().collect();
        while inner.evictions.len() > EVICTION_LOG_LIMIT {
            inner.evictions.pop_front();
        }
    }
}

impl std::fmt::Debug for WorkingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingBuffer")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// Composite eviction score for one slot at `now`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn evict_score(memory: &Memory, now: DateTime<Utc>) -> f32 {
    0.4 * memory.age_days(now)
        + 0.3 * (1.0 / (memory.access_count as f32 + 1.0))
        + 0.3 * (1.0 - memory.importance)
}

/// Index of the slot to evict: highest score, ties to the older memory
fn eviction_victim(slots: &[Memory], now: DateTime<Utc>) -> Option<usize> {
    slots
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            evict_score(a, now)
                .partial_cmp(&evict_score(b, now))
                .unwrap_or(std::cmp::Ordering::Equal)
                // on equal score, the older created_at must win the eviction
                .then_with(|| b.created_at.cmp(&a.created_at))
        })
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MemoryKind;
    use chrono::Duration as ChronoDuration;

    fn memory(importance: f32, age_hours: i64, access_count: u32) -> Memory {
        let mut memory =
            Memory::new(format!("m-{importance}-{age_hours}"), MemoryKind::Observation)
                .with_importance(importance);
        memory.created_at = Utc::now() - ChronoDuration::hours(age_hours);
        memory.access_count = access_count;
        memory
    }

    #[test]
    fn insert_below_capacity_never_evicts() {
        let buffer = WorkingBuffer::new(3);
        for i in 0..3 {
            assert!(buffer.insert(memory(0.5, i, 0)).is_none());
        }
        assert_eq!(buffer.size(), 3);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let buffer = WorkingBuffer::new(2);
        for i in 0..10 {
            buffer.insert(memory(0.5, i, 0));
            assert!(buffer.size() <= 2);
        }
    }

    #[test]
    fn eviction_picks_highest_composite_score() {
        // slots as (importance, age_hours, access_count); the second slot
        // carries the worst composite despite not being the only old one
        let buffer = WorkingBuffer::new(5);
        let slots = [
            memory(0.9, 1, 3),
            memory(0.2, 48, 0),
            memory(0.5, 24, 1),
            memory(0.8, 2, 2),
            memory(0.3, 12, 0),
        ];
        let expected_victim = slots[1].id.clone();
        for slot in slots {
            buffer.insert(slot);
        }

        let record = buffer
            .insert(memory(1.0, 0, 0))
            .expect("full buffer must evict");
        assert_eq!(record.memory_id, expected_victim);
        assert_eq!(buffer.size(), 5);
    }

    #[test]
    fn eviction_tie_breaks_toward_older() {
        let buffer = WorkingBuffer::new(2);
        let older = memory(0.5, 10, 0);
        let newer = memory(0.5, 10, 0);
        let older_id = older.id.clone();
        // identical scores except created_at skewed
        let mut older = older;
        older.created_at -= ChronoDuration::seconds(30);
        buffer.insert(newer);
        buffer.insert(older);

        let record = buffer.insert(memory(0.5, 0, 0)).unwrap();
        assert_eq!(record.memory_id, older_id);
    }

    #[tokio::test]
    async fn victim_flows_through_the_hand_off_channel() {
        let buffer = WorkingBuffer::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        buffer.set_eviction_sink(tx);

        let first = memory(0.1, 24, 0);
        let first_id = first.id.clone();
        buffer.insert(first);
        buffer.insert(memory(0.9, 0, 0));

        let victim = rx.recv().await.expect("victim must be handed off");
        assert_eq!(victim.id, first_id);
    }

    #[test]
    fn touch_increments_and_missing_is_noop() {
        let buffer = WorkingBuffer::new(3);
        let resident = memory(0.5, 0, 0);
        let id = resident.id.clone();
        buffer.insert(resident);

        buffer.touch(&id);
        buffer.touch(&id);
        buffer.touch(&MemoryId::new()); // unknown id, nothing happens

        let slots = buffer.list();
        assert_eq!(slots[0].access_count, 2);
    }

    #[test]
    fn touch_is_commutative_across_distinct_ids() {
        let build = || {
            let buffer = WorkingBuffer::new(3);
            let a = memory(0.5, 0, 0);
            let b = memory(0.6, 0, 0);
            let (ida, idb) = (a.id.clone(), b.id.clone());
            buffer.insert(a);
            buffer.insert(b);
            (buffer, ida, idb)
        };

        let (left, la, lb) = build();
        left.touch(&la);
        left.touch(&lb);

        let (right, ra, rb) = build();
        right.touch(&rb);
        right.touch(&ra);

        let counts = |buffer: &WorkingBuffer| -> Vec<u32> {
            buffer.list().iter().map(|m| m.access_count).collect()
        };
        assert_eq!(counts(&left), counts(&right));
    }

    #[test]
    fn query_ranks_by_similarity_and_touches() {
        let buffer = WorkingBuffer::new(3);
        let relevant =
            Memory::new("retry backoff for flaky network calls", MemoryKind::Insight);
        let relevant_id = relevant.id.clone();
        buffer.insert(relevant);
        buffer.insert(Memory::new("unrelated gardening notes", MemoryKind::Observation));

        let hits = buffer.query("network retry backoff", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, relevant_id);
        assert_eq!(hits[0].access_count, 1, "query must touch returned memories");
    }

    #[test]
    fn query_importance_boost_breaks_similarity_ties() {
        let buffer = WorkingBuffer::new(2);
        let plain = Memory::new("deploy checklist", MemoryKind::Observation)
            .with_importance(0.1);
        let important = Memory::new("deploy checklist", MemoryKind::Observation)
            .with_importance(0.9);
        let important_id = important.id.clone();
        buffer.insert(plain);
        buffer.insert(important);

        let hits = buffer.query("deploy checklist", 1);
        assert_eq!(hits[0].id, important_id);
    }

    #[test]
    fn pressure_tracks_fill() {
        let buffer = WorkingBuffer::new(4);
        assert_eq!(buffer.pressure(), 0.0);
        buffer.insert(memory(0.5, 0, 0));
        assert!((buffer.pressure() - 0.25).abs() < f32::EPSILON);
        for i in 0..3 {
            buffer.insert(memory(0.5, i, 0));
        }
        assert!((buffer.pressure() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn remove_tolerates_missing_slots() {
        let buffer = WorkingBuffer::new(2);
        let resident = memory(0.5, 0, 0);
        let id = resident.id.clone();
        buffer.insert(resident);

        assert!(buffer.remove(&id).is_some());
        assert!(buffer.remove(&id).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn clear_empties_slots_but_keeps_eviction_log() {
        let buffer = WorkingBuffer::new(1);
        buffer.insert(memory(0.2, 48, 0));
        buffer.insert(memory(0.9, 0, 0)); // forces one eviction
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.evictions().len(), 1);
    }

    #[test]
    fn restore_round_trip() {
        let buffer = WorkingBuffer::new(3);
        buffer.insert(memory(0.5, 1, 0));
        buffer.insert(memory(0.6, 2, 1));
        let slots = buffer.list();
        let evictions = buffer.evictions();

        let restored = WorkingBuffer::new(3);
        restored.restore(slots.clone(), evictions);
        assert_eq!(restored.list(), slots);
    }

    #[test]
    fn restore_drops_overflow_oldest_first() {
        let buffer = WorkingBuffer::new(2);
        let slots = vec![memory(0.1, 3, 0), memory(0.2, 2, 0), memory(0.3, 1, 0)];
        let keep = slots[1..].to_vec();
        buffer.restore(slots, Vec::new());
        assert_eq!(buffer.list(), keep);
    }

    #[test]
    fn evict_score_formula() {
        let now = Utc::now();
        let slot = memory(0.2, 48, 0); // 2 days, untouched, low importance
        let score = evict_score(&slot, now);
        // 0.4*2 + 0.3*1 + 0.3*0.8 = 1.34
        assert!((score - 1.34).abs() < 0.01);
    }
}
