//! Event ledger (buffered, batched append) and rolling review counters.

use crate::events::{EntityType, Event, EventKind, Outcome};
use crate::store::EntityStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Usage,
    Success,
    Failure,
    Error,
    PerformanceDegradation,
}

/// Static mapping from event kind to the counter it increments, per §4.7.
fn counter_for(kind: EventKind) -> Option<CounterKind> {
    match kind {
        EventKind::ToolCalled => Some(CounterKind::Usage),
        EventKind::ToolCompleted | EventKind::TaskCompleted => Some(CounterKind::Success),
        EventKind::ToolFailed | EventKind::TaskFailed => Some(CounterKind::Failure),
        EventKind::SystemError => Some(CounterKind::Error),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct CounterKey {
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub counter_kind: CounterKind,
}

#[derive(Clone, Debug)]
pub struct ReviewCounter {
    pub count: u64,
    pub threshold: u64,
    pub last_review: DateTime<Utc>,
}

impl ReviewCounter {
    fn new(threshold: u64) -> Self {
        Self {
            count: 0,
            threshold,
            last_review: Utc::now(),
        }
    }
}

/// Holds review counters keyed by (entity, kind). A counter reaching its
/// threshold fires a snapshot and resets to zero.
#[derive(Default)]
pub struct CounterRegistry {
    counters: DashMap<CounterKey, ReviewCounter>,
    thresholds: DashMap<CounterKey, u64>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure (or override) the threshold for a specific counter. Newly
    /// observed counters without an explicit configuration default to 100.
    pub fn configure(&self, key: CounterKey, threshold: u64) {
        self.thresholds.insert(key, threshold);
        self.counters
            .entry(key)
            .and_modify(|c| c.threshold = threshold)
            .or_insert_with(|| ReviewCounter::new(threshold));
    }

    /// Increments the named counter; returns `Some(snapshot)` if the
    /// threshold was reached (the counter is reset atomically).
    pub fn increment(&self, key: CounterKey) -> Option<ReviewCounter> {
        let default_threshold = self.thresholds.get(&key).map(|v| *v).unwrap_or(100);
        let mut entry = self
            .counters
            .entry(key)
            .or_insert_with(|| ReviewCounter::new(default_threshold));
        entry.count += 1;
        if entry.count >= entry.threshold {
            let snapshot = entry.clone();
            entry.count = 0;
            entry.last_review = Utc::now();
            return Some(snapshot);
        }
        None
    }
}

struct DurationStat {
    samples: VecDeque<(DateTime<Utc>, u64)>,
}

impl DurationStat {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
        }
    }

    fn push(&mut self, duration_ms: u64) {
        let cutoff = Utc::now() - ChronoDuration::days(7);
        self.samples.retain(|(t, _)| *t >= cutoff);
        self.samples.push_back((Utc::now(), duration_ms));
    }

    fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|(_, d)| *d).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }
}

/// Buffered, batched append-only event log. Many writers (runtime,
/// processes, agent wrapper) append; a single background flusher drains.
pub struct EventLedger {
    store: Arc<dyn EntityStore>,
    buffer: Mutex<Vec<Event>>,
    recent: Mutex<VecDeque<Event>>,
    duration_stats: DashMap<(EventKind, EntityType, u64), DurationStat>,
    counters: CounterRegistry,
    next_id: AtomicU64,
    batch_size: usize,
    last_flush: Mutex<DateTime<Utc>>,
    flush_interval: Duration,
}

impl EventLedger {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self::with_settings(store, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_settings(
        store: Arc<dyn EntityStore>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store,
            buffer: Mutex::new(Vec::new()),
            recent: Mutex::new(VecDeque::new()),
            duration_stats: DashMap::new(),
            counters: CounterRegistry::new(),
            next_id: AtomicU64::new(1),
            batch_size,
            last_flush: Mutex::new(Utc::now()),
            flush_interval,
        }
    }

    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    /// Append one event. Applies the sampling policy, feeds the counter
    /// subsystem and the inline optimization-opportunity checks, then
    /// drains the buffer if a trigger condition is met.
    pub async fn append(&self, mut event: Event) -> crate::error::Result<()> {
        if !event.kind.always_recorded() && rand::random::<f64>() >= event.kind.sample_rate() {
            return Ok(());
        }

        event.id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let repeated_failures_event = self.check_repeated_failures(&event).await;
        let performance_degradation_event = self.check_performance_degradation(&event).await;
        let review_event = self.feed_counters(&event).await;

        {
            let mut recent = self.recent.lock().await;
            recent.push_back(event.clone());
            let cutoff = Utc::now() - ChronoDuration::hours(1);
            while let Some(front) = recent.front() {
                if front.timestamp < cutoff {
                    recent.pop_front();
                } else {
                    break;
                }
            }
        }

        let should_flush = {
            let mut buf = self.buffer.lock().await;
            buf.push(event);
            let age_exceeded = {
                let last = *self.last_flush.lock().await;
                Utc::now() - last
                    > ChronoDuration::from_std(self.flush_interval).unwrap_or_default()
            };
            buf.len() >= self.batch_size || age_exceeded
        };

        if should_flush {
            self.flush().await?;
        }

        // `review_triggered` never maps to a counter kind itself, so this
        // cannot recurse more than one level deep.
        if let Some(review_event) = review_event {
            Box::pin(self.append(review_event)).await?;
        }
        if let Some(opportunity) = repeated_failures_event {
            Box::pin(self.append(opportunity)).await?;
        }
        if let Some(opportunity) = performance_degradation_event {
            Box::pin(self.append(opportunity)).await?;
        }

        Ok(())
    }

    /// Drain writes all buffered events durably; on write failure, the
    /// batch is re-prepended (never silently dropped).
    pub async fn flush(&self) -> crate::error::Result<()> {
        let batch = {
            let mut buf = self.buffer.lock().await;
            if buf.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buf)
        };

        match self.store.append_events(batch.clone()).await {
            Ok(()) => {
                *self.last_flush.lock().await = Utc::now();
                Ok(())
            }
            Err(e) => {
                error!("event ledger flush failed, re-buffering {} events: {}", batch.len(), e);
                let mut buf = self.buffer.lock().await;
                let mut restored = batch;
                restored.extend(std::mem::take(&mut *buf));
                *buf = restored;
                Err(e)
            }
        }
    }

    /// Returns a `review_triggered` event to append if this event's counter
    /// just crossed its threshold.
    async fn feed_counters(&self, event: &Event) -> Option<Event> {
        let counter_kind = counter_for(event.kind)?;
        let key = CounterKey {
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            counter_kind,
        };
        let snapshot = self.counters.increment(key)?;
        warn!(
            entity_id = event.entity_id,
            ?counter_kind,
            "review counter threshold reached, triggering review"
        );
        Some(
            Event::new(EventKind::ReviewTriggered, event.entity_type, event.entity_id).with_data(
                serde_json::json!({
                    "counter_kind": counter_kind,
                    "threshold": snapshot.threshold,
                }),
            ),
        )
    }

    /// Returns an `optimization_opportunity` event of type `repeated_failures`
    /// if this failure is the third (or later) for the entity within an hour.
    async fn check_repeated_failures(&self, event: &Event) -> Option<Event> {
        if event.outcome != Outcome::Failure {
            return None;
        }
        let recent = self.recent.lock().await;
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        let count = recent
            .iter()
            .filter(|e| {
                e.timestamp >= cutoff
                    && e.entity_type == event.entity_type
                    && e.entity_id == event.entity_id
                    && e.outcome == Outcome::Failure
            })
            .count()
            + 1;
        if count < 3 {
            return None;
        }
        warn!(
            entity_id = event.entity_id,
            count, "repeated_failures optimization opportunity"
        );
        Some(
            Event::new(EventKind::OptimizationOpportunity, event.entity_type, event.entity_id).with_data(
                serde_json::json!({
                    "opportunity_type": "repeated_failures",
                    "count": count,
                }),
            ),
        )
    }

    /// Returns an `optimization_opportunity` event of type
    /// `performance_degradation` if this call ran 50% slower than its
    /// rolling 7-day average.
    async fn check_performance_degradation(&self, event: &Event) -> Option<Event> {
        let duration_ms = event.duration_ms?;
        if duration_ms == 0 {
            return None;
        }
        let key = (event.kind, event.entity_type, event.entity_id);
        let mut stats = self
            .duration_stats
            .entry(key)
            .or_insert_with(DurationStat::new);

        if event.outcome != Outcome::Success {
            return None;
        }

        let opportunity = stats.average().and_then(|baseline| {
            if baseline > 0.0 && duration_ms as f64 > baseline * 1.5 {
                warn!(
                    entity_id = event.entity_id,
                    duration_ms, baseline, "performance_degradation optimization opportunity"
                );
                Some(
                    Event::new(EventKind::OptimizationOpportunity, event.entity_type, event.entity_id).with_data(
                        serde_json::json!({
                            "opportunity_type": "performance_degradation",
                            "duration_ms": duration_ms,
                            "baseline_ms": baseline,
                        }),
                    ),
                )
            } else {
                None
            }
        });

        stats.push(duration_ms);
        opportunity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store_for_tests;

    #[tokio::test]
    async fn counter_triggers_at_threshold() {
        let key = CounterKey {
            entity_type: EntityType::Tool,
            entity_id: 1,
            counter_kind: CounterKind::Usage,
        };
        let registry = CounterRegistry::new();
        registry.configure(key, 5);
        for _ in 0..4 {
            assert!(registry.increment(key).is_none());
        }
        let snapshot = registry.increment(key).expect("threshold reached on 5th");
        assert_eq!(snapshot.threshold, 5);
        // after reset, counter starts a fresh window
        assert!(registry.increment(key).is_none());
    }

    #[tokio::test]
    async fn ledger_flushes_on_batch_size() {
        let store = memory_store_for_tests();
        let ledger = EventLedger::with_settings(store.clone(), 2, Duration::from_secs(3600));
        ledger
            .append(Event::new(EventKind::TaskCreated, EntityType::Task, 1))
            .await
            .unwrap();
        assert_eq!(store.event_count().await, 0);
        ledger
            .append(Event::new(EventKind::TaskCreated, EntityType::Task, 2))
            .await
            .unwrap();
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn always_recorded_kinds_bypass_sampling() {
        let store = memory_store_for_tests();
        let ledger = EventLedger::with_settings(store.clone(), 1, Duration::from_secs(3600));
        ledger
            .append(Event::new(EventKind::SystemError, EntityType::System, 0))
            .await
            .unwrap();
        assert_eq!(store.event_count().await, 1);
    }
}
