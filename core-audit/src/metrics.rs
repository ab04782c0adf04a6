// =====================================================================================
// File: core-audit/src/metrics.rs
// Description: Structured metric events and latency tracking against SLA targets
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::types::MetricEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Fixed latency histogram bucket bounds in milliseconds.
const BUCKET_BOUNDS_MS: [u64; 8] = [10, 50, 100, 250, 500, 1000, 2000, 5000];

/// Metrics sink trait for structured events and latency samples.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Record a structured event.
    async fn record_event(&self, event: MetricEvent);

    /// Record a latency sample for an operation, optionally measured against
    /// a hard target. Samples over the target count as deadline misses.
    async fn record_latency(&self, operation: &str, elapsed_ms: u64, target_ms: Option<u64>);

    /// Increment a named counter.
    async fn increment(&self, counter: &str);

    /// Snapshot of everything recorded so far.
    async fn snapshot(&self) -> MetricsSnapshot;
}

/// Per-operation latency aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
    /// Sample counts per bucket bound, final slot is the overflow bucket.
    pub buckets: Vec<u64>,
    pub target_misses: u64,
}

impl LatencySummary {
    fn new() -> Self {
        Self {
            buckets: vec![0; BUCKET_BOUNDS_MS.len() + 1],
            ..Default::default()
        }
    }

    fn observe(&mut self, elapsed_ms: u64, target_ms: Option<u64>) {
        self.count += 1;
        self.total_ms += elapsed_ms;
        self.max_ms = self.max_ms.max(elapsed_ms);
        let idx = BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| elapsed_ms <= *bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[idx] += 1;
        if let Some(target) = target_ms {
            if elapsed_ms > target {
                self.target_misses += 1;
            }
        }
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }

    /// Upper bound of the bucket containing the 99th percentile sample.
    pub fn p99_bound_ms(&self) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let threshold = (self.count as f64 * 0.99).ceil() as u64;
        let mut seen = 0;
        for (idx, bucket) in self.buckets.iter().enumerate() {
            seen += bucket;
            if seen >= threshold {
                return BUCKET_BOUNDS_MS.get(idx).copied().unwrap_or(u64::MAX);
            }
        }
        u64::MAX
    }
}

/// Aggregated metrics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub latencies: HashMap<String, LatencySummary>,
    pub event_count: u64,
}

/// In-memory metrics sink.
pub struct InMemoryMetricsSink {
    counters: RwLock<HashMap<String, u64>>,
    latencies: RwLock<HashMap<String, LatencySummary>>,
    events: RwLock<Vec<MetricEvent>>,
    /// Cap on retained raw events; aggregates are unaffected.
    event_capacity: usize,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
            event_capacity: 8192,
        }
    }

    /// Recent raw events, oldest first.
    pub async fn events(&self) -> Vec<MetricEvent> {
        self.events.read().await.clone()
    }
}

impl Default for InMemoryMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn record_event(&self, event: MetricEvent) {
        debug!(component = %event.component, event = %event.event, "metric event");
        let mut events = self.events.write().await;
        if events.len() >= self.event_capacity {
            events.remove(0);
        }
        events.push(event);
    }

    async fn record_latency(&self, operation: &str, elapsed_ms: u64, target_ms: Option<u64>) {
        let mut latencies = self.latencies.write().await;
        latencies
            .entry(operation.to_string())
            .or_insert_with(LatencySummary::new)
            .observe(elapsed_ms, target_ms);
    }

    async fn increment(&self, counter: &str) {
        let mut counters = self.counters.write().await;
        *counters.entry(counter.to_string()).or_insert(0) += 1;
    }

    async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.read().await.clone(),
            latencies: self.latencies.read().await.clone(),
            event_count: self.events.read().await.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latency_buckets_and_misses() {
        let sink = InMemoryMetricsSink::new();
        sink.record_latency("match_emergency", 12, Some(2000)).await;
        sink.record_latency("match_emergency", 2400, Some(2000)).await;

        let snapshot = sink.snapshot().await;
        let summary = snapshot.latencies.get("match_emergency").unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.target_misses, 1);
        assert_eq!(summary.max_ms, 2400);
    }

    #[tokio::test]
    async fn test_counters() {
        let sink = InMemoryMetricsSink::new();
        sink.increment("sessions_opened").await;
        sink.increment("sessions_opened").await;

        let snapshot = sink.snapshot().await;
        assert_eq!(snapshot.counters["sessions_opened"], 2);
    }

    #[tokio::test]
    async fn test_p99_bound() {
        let sink = InMemoryMetricsSink::new();
        for _ in 0..99 {
            sink.record_latency("assess", 5, None).await;
        }
        sink.record_latency("assess", 4800, None).await;

        let snapshot = sink.snapshot().await;
        let summary = snapshot.latencies.get("assess").unwrap();
        assert!(summary.p99_bound_ms() >= 10);
        assert!((summary.mean_ms() - 52.95).abs() < 1.0);
    }
}
