// =====================================================================================
// File: core-audit/src/sink.rs
// Description: Append-only audit sink with bounded in-memory buffering
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{
    error::AuditResult,
    types::{AuditOutcome, AuditRecord},
    AuditConfig,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Append-only audit sink trait. Implementations must preserve insertion
/// order per entity and must never drop a record silently: overflow is
/// surfaced through `overflow_count`.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a record. Records are immutable once appended.
    async fn append(&self, record: AuditRecord) -> AuditResult<()>;

    /// All records for an entity id, in append order.
    async fn records_for(&self, entity_id: &str) -> AuditResult<Vec<AuditRecord>>;

    /// Total records appended since startup.
    async fn appended_count(&self) -> u64;

    /// Records lost to buffer overflow while the sink was degraded.
    fn overflow_count(&self) -> u64;

    /// Whether the sink can currently accept records. A false value puts the
    /// platform in degraded mode: existing sessions continue, new sessions
    /// are refused.
    fn is_healthy(&self) -> bool;
}

/// In-memory audit sink backed by a bounded ring buffer.
pub struct InMemoryAuditSink {
    buffer: RwLock<VecDeque<AuditRecord>>,
    capacity: usize,
    appended: AtomicU64,
    overflowed: AtomicU64,
    healthy: AtomicBool,
}

impl InMemoryAuditSink {
    pub fn new(config: AuditConfig) -> Self {
        Self {
            buffer: RwLock::new(VecDeque::with_capacity(config.buffer_capacity)),
            capacity: config.buffer_capacity,
            appended: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    /// Mark the sink unavailable or restored. Used by health checks and tests.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
        if !healthy {
            warn!("audit sink marked unavailable; new sessions will be refused");
        }
    }

    /// Number of alert-severity records currently buffered.
    pub async fn alert_count(&self) -> usize {
        let buffer = self.buffer.read().await;
        buffer
            .iter()
            .filter(|r| r.outcome == AuditOutcome::Alert)
            .count()
    }

    /// Drain and return everything currently buffered, oldest first.
    pub async fn drain(&self) -> Vec<AuditRecord> {
        let mut buffer = self.buffer.write().await;
        buffer.drain(..).collect()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new(AuditConfig::default())
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> AuditResult<()> {
        let mut buffer = self.buffer.write().await;
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            self.overflowed.fetch_add(1, Ordering::SeqCst);
        }
        debug!(
            event = record.event_type.display_name(),
            entity_id = %record.entity_id,
            "audit record appended"
        );
        buffer.push_back(record);
        self.appended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn records_for(&self, entity_id: &str) -> AuditResult<Vec<AuditRecord>> {
        let buffer = self.buffer.read().await;
        Ok(buffer
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn appended_count(&self) -> u64 {
        self.appended.load(Ordering::SeqCst)
    }

    fn overflow_count(&self) -> u64 {
        self.overflowed.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuditEventType;

    fn record(entity_id: &str) -> AuditRecord {
        AuditRecord::new(
            AuditEventType::SessionStatusChanged,
            "session",
            entity_id,
            "test",
            serde_json::json!({}),
            AuditOutcome::Success,
        )
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let sink = InMemoryAuditSink::default();
        sink.append(record("s-1")).await.unwrap();
        sink.append(record("s-2")).await.unwrap();
        sink.append(record("s-1")).await.unwrap();

        let records = sink.records_for("s-1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(sink.appended_count().await, 3);
        assert_eq!(sink.overflow_count(), 0);
    }

    #[tokio::test]
    async fn test_overflow_increments_counter() {
        let sink = InMemoryAuditSink::new(AuditConfig {
            buffer_capacity: 2,
            ..AuditConfig::default()
        });

        sink.append(record("s-1")).await.unwrap();
        sink.append(record("s-2")).await.unwrap();
        sink.append(record("s-3")).await.unwrap();

        assert_eq!(sink.overflow_count(), 1);
        // Oldest record was dropped
        assert!(sink.records_for("s-1").await.unwrap().is_empty());
        assert_eq!(sink.records_for("s-3").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health_flag() {
        let sink = InMemoryAuditSink::default();
        assert!(sink.is_healthy());
        sink.set_healthy(false);
        assert!(!sink.is_healthy());
        sink.set_healthy(true);
        assert!(sink.is_healthy());
    }

    #[tokio::test]
    async fn test_append_order_preserved_per_entity() {
        let sink = InMemoryAuditSink::default();
        for _ in 0..5 {
            sink.append(record("s-1")).await.unwrap();
        }
        let records = sink.records_for("s-1").await.unwrap();
        for pair in records.windows(2) {
            assert!(pair[0].timestamp_ns <= pair[1].timestamp_ns);
        }
    }
}
