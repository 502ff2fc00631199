//! Event Publication
//!
//! Typed pub/sub for everything downstream surfaces observe. Topics are a
//! closed set; payloads are one enum variant per topic, so handler code gets
//! compile-time checks instead of string-keyed dispatch.
//!
//! # Delivery Contract
//!
//! - Within one topic, delivery order is publication order.
//! - Delivery is at-most-once and never blocks the publisher: each
//!   subscriber gets a bounded queue, and a full queue drops the event and
//!   bumps the bus-wide drop counter.
//! - No ordering is guaranteed across topics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::bias::BiasFinding;
use crate::core::types::{DreamId, InferenceResult, MemoryId, Thought, ThoughtId, ValueId};
use crate::dream::DreamReport;
use crate::engine::{CycleResult, StopReason};

/// Default per-subscriber queue depth
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// The closed set of event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    CycleStart,
    CycleComplete,
    ThoughtGenerated,
    ThoughtProcessed,
    MemoryAdded,
    MemoryPromoted,
    DreamStart,
    DreamComplete,
    DreamError,
    BiasDetected,
    ValueFormed,
    ValueChallenged,
    ParameterAdjusted,
    SavePointCreated,
    AttentionShift,
    TaskGenerated,
    ConsciousnessStopped,
}

impl Topic {
    /// Every topic, for exhaustive subscription
    pub const ALL: [Self; 17] = [
        Self::CycleStart,
        Self::CycleComplete,
        Self::ThoughtGenerated,
        Self::ThoughtProcessed,
        Self::MemoryAdded,
        Self::MemoryPromoted,
        Self::DreamStart,
        Self::DreamComplete,
        Self::DreamError,
        Self::BiasDetected,
        Self::ValueFormed,
        Self::ValueChallenged,
        Self::ParameterAdjusted,
        Self::SavePointCreated,
        Self::AttentionShift,
        Self::TaskGenerated,
        Self::ConsciousnessStopped,
    ];
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CycleStart => "cycle-start",
            Self::CycleComplete => "cycle-complete",
            Self::ThoughtGenerated => "thought-generated",
            Self::ThoughtProcessed => "thought-processed",
            Self::MemoryAdded => "memory-added",
            Self::MemoryPromoted => "memory-promoted",
            Self::DreamStart => "dream-start",
            Self::DreamComplete => "dream-complete",
            Self::DreamError => "dream-error",
            Self::BiasDetected => "bias-detected",
            Self::ValueFormed => "value-formed",
            Self::ValueChallenged => "value-challenged",
            Self::ParameterAdjusted => "parameter-adjusted",
            Self::SavePointCreated => "save-point-created",
            Self::AttentionShift => "attention-shift",
            Self::TaskGenerated => "task-generated",
            Self::ConsciousnessStopped => "consciousness-stopped",
        };
        write!(f, "{s}")
    }
}

/// Structured payload, one variant per topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    CycleStart {
        cycle: u64,
    },
    CycleComplete {
        result: CycleResult,
    },
    ThoughtGenerated {
        thought: Thought,
    },
    ThoughtProcessed {
        thought_id: ThoughtId,
        result: InferenceResult,
    },
    MemoryAdded {
        memory_id: MemoryId,
        summary: String,
    },
    MemoryPromoted {
        memory_id: MemoryId,
        score: f32,
    },
    DreamStart {
        dream_id: DreamId,
        reason: String,
    },
    DreamComplete {
        report: DreamReport,
    },
    DreamError {
        dream_id: DreamId,
        error: String,
    },
    BiasDetected {
        finding: BiasFinding,
    },
    ValueFormed {
        value_id: ValueId,
        category: String,
    },
    ValueChallenged {
        value_id: ValueId,
        challenge: String,
    },
    ParameterAdjusted {
        parameter: String,
        from: f64,
        to: f64,
    },
    SavePointCreated {
        cycle: u64,
        reference: String,
    },
    AttentionShift {
        from: String,
        to: String,
    },
    TaskGenerated {
        description: String,
    },
    ConsciousnessStopped {
        reason: StopReason,
    },
}

impl EventPayload {
    /// The topic this payload belongs to
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::CycleStart { .. } => Topic::CycleStart,
            Self::CycleComplete { .. } => Topic::CycleComplete,
            Self::ThoughtGenerated { .. } => Topic::ThoughtGenerated,
            Self::ThoughtProcessed { .. } => Topic::ThoughtProcessed,
            Self::MemoryAdded { .. } => Topic::MemoryAdded,
            Self::MemoryPromoted { .. } => Topic::MemoryPromoted,
            Self::DreamStart { .. } => Topic::DreamStart,
            Self::DreamComplete { .. } => Topic::DreamComplete,
            Self::DreamError { .. } => Topic::DreamError,
            Self::BiasDetected { .. } => Topic::BiasDetected,
            Self::ValueFormed { .. } => Topic::ValueFormed,
            Self::ValueChallenged { .. } => Topic::ValueChallenged,
            Self::ParameterAdjusted { .. } => Topic::ParameterAdjusted,
            Self::SavePointCreated { .. } => Topic::SavePointCreated,
            Self::AttentionShift { .. } => Topic::AttentionShift,
            Self::TaskGenerated { .. } => Topic::TaskGenerated,
            Self::ConsciousnessStopped { .. } => Topic::ConsciousnessStopped,
        }
    }
}

/// A published event: topic, timestamp, payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp a payload with its topic and the current time
    #[must_use]
    pub fn now(payload: EventPayload) -> Self {
        Self {
            topic: payload.topic(),
            at: Utc::now(),
            payload,
        }
    }
}

/// Bus-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Events handed to `publish`
    pub published: u64,
    /// Event copies enqueued to a subscriber
    pub delivered: u64,
    /// Event copies dropped because a subscriber queue was full
    pub dropped: u64,
}

/// Typed pub/sub over the closed topic set
pub struct EventBus {
    subscribers: Mutex<HashMap<Topic, Vec<mpsc::Sender<Event>>>>,
    capacity: usize,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    /// Create a bus with the default subscriber queue depth
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a bus with a custom subscriber queue depth
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach a subscriber to one topic
    ///
    /// The receiver owns delivered events. Dropping it detaches the
    /// subscription; the bus prunes closed senders on the next publish.
    pub fn subscribe(&self, topic: Topic) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .entry(topic)
            .or_default()
            .push(tx);
        rx
    }

    /// Publish a payload to its topic
    ///
    /// Never blocks: slow subscribers lose the event and the drop counter
    /// records it.
    pub fn publish(&self, payload: EventPayload) {
        let event = Event::now(payload);
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut registry = self
            .subscribers
            .lock()
            .expect("subscriber registry poisoned");
        let Some(senders) = registry.get_mut(&event.topic) else {
            return;
        };

        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(topic = %event.topic, "subscriber queue full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Number of live subscribers on a topic
    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Bus-wide counters
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_start(cycle: u64) -> EventPayload {
        EventPayload::CycleStart { cycle }
    }

    #[test]
    fn topic_names_are_kebab_case() {
        assert_eq!(Topic::CycleStart.to_string(), "cycle-start");
        assert_eq!(
            Topic::ConsciousnessStopped.to_string(),
            "consciousness-stopped"
        );
        // Display must agree with the serde rename
        for topic in Topic::ALL {
            let json = serde_json::to_string(&topic).unwrap();
            assert_eq!(json, format!("\"{topic}\""));
        }
    }

    #[test]
    fn all_lists_every_topic_once() {
        let mut seen = std::collections::HashSet::new();
        for topic in Topic::ALL {
            assert!(seen.insert(topic), "duplicate topic {topic}");
        }
        assert_eq!(seen.len(), 17);
    }

    #[tokio::test]
    async fn delivery_preserves_publication_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(Topic::CycleStart);

        for cycle in 0..10 {
            bus.publish(cycle_start(cycle));
        }

        for expected in 0..10 {
            let event = rx.recv().await.unwrap();
            assert_eq!(
                event.payload,
                EventPayload::CycleStart { cycle: expected }
            );
        }
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new();
        let mut starts = bus.subscribe(Topic::CycleStart);
        let mut tasks = bus.subscribe(Topic::TaskGenerated);

        bus.publish(cycle_start(1));

        let event = starts.recv().await.unwrap();
        assert_eq!(event.topic, Topic::CycleStart);
        assert!(tasks.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_not_blocks() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe(Topic::CycleStart);

        // queue depth 2: third publish must drop, not block
        bus.publish(cycle_start(0));
        bus.publish(cycle_start(1));
        bus.publish(cycle_start(2));

        let stats = bus.stats();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 1);

        // the two oldest made it through
        assert_eq!(
            rx.recv().await.unwrap().payload,
            EventPayload::CycleStart { cycle: 0 }
        );
        assert_eq!(
            rx.recv().await.unwrap().payload,
            EventPayload::CycleStart { cycle: 1 }
        );
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(Topic::CycleStart);
        assert_eq!(bus.subscriber_count(Topic::CycleStart), 1);

        drop(rx);
        bus.publish(cycle_start(0));
        assert_eq!(bus.subscriber_count(Topic::CycleStart), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let mut a = bus.subscribe(Topic::MemoryAdded);
        let mut b = bus.subscribe(Topic::MemoryAdded);

        let memory_id = MemoryId::new();
        bus.publish(EventPayload::MemoryAdded {
            memory_id: memory_id.clone(),
            summary: "noted".to_string(),
        });

        for rx in [&mut a, &mut b] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.topic, Topic::MemoryAdded);
        }
        assert_eq!(bus.stats().delivered, 2);
    }

    #[test]
    fn publish_without_subscribers_counts_only_published() {
        let bus = EventBus::new();
        bus.publish(cycle_start(0));
        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn payload_topic_mapping_is_total() {
        // spot-check a few variants; the match in topic() is exhaustive
        assert_eq!(cycle_start(0).topic(), Topic::CycleStart);
        assert_eq!(
            EventPayload::TaskGenerated {
                description: "follow up".to_string()
            }
            .topic(),
            Topic::TaskGenerated
        );
        assert_eq!(
            EventPayload::AttentionShift {
                from: "errors".to_string(),
                to: "latency".to_string()
            }
            .topic(),
            Topic::AttentionShift
        );
    }
}
