// =====================================================================================
// File: core-audit/src/lib.rs
// Description: Audit trail and metrics sinks for the SafeHaven crisis platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Audit Module
//!
//! Append-only audit trail and structured metrics for the SafeHaven platform.
//! Every state change in the dispatch path is recorded here; audit records are
//! never mutated. When the audit sink becomes unavailable the platform runs
//! degraded: records are buffered in a bounded in-memory ring and new sessions
//! are refused until the sink recovers.

pub mod error;
pub mod metrics;
pub mod sink;
pub mod types;

pub use error::{AuditError, AuditResult};
pub use metrics::{InMemoryMetricsSink, LatencySummary, MetricsSink, MetricsSnapshot};
pub use sink::{AuditSink, InMemoryAuditSink};
pub use types::{AuditOutcome, AuditRecord, AuditEventType, MetricEvent};

use serde::{Deserialize, Serialize};

/// Audit subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum records held in the in-memory ring buffer
    pub buffer_capacity: usize,
    /// Emit a metric event when an assessment moves severity by at least this much
    pub severity_delta_threshold: u8,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            severity_delta_threshold: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_config_default() {
        let config = AuditConfig::default();
        assert_eq!(config.buffer_capacity, 4096);
        assert_eq!(config.severity_delta_threshold, 2);
    }
}
