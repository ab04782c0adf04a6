// =====================================================================================
// File: core-audit/src/types.rs
// Description: Core types for audit records and metric events
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Audit event type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    /// A session was opened
    SessionOpened,
    /// A session changed lifecycle state
    SessionStatusChanged,
    /// A risk assessment moved session severity
    SeverityChanged,
    /// A volunteer slot was reserved
    VolunteerReserved,
    /// A volunteer slot was released
    VolunteerReleased,
    /// An escalation record was opened
    EscalationOpened,
    /// An escalation record was closed
    EscalationClosed,
    /// An external adapter was invoked
    AdapterInvoked,
    /// A hard latency deadline was missed
    DeadlineMissed,
    /// An integrity violation was rejected
    IntegrityViolation,
}

impl AuditEventType {
    pub fn display_name(&self) -> &'static str {
        match self {
            AuditEventType::SessionOpened => "session_opened",
            AuditEventType::SessionStatusChanged => "session_status_changed",
            AuditEventType::SeverityChanged => "severity_changed",
            AuditEventType::VolunteerReserved => "volunteer_reserved",
            AuditEventType::VolunteerReleased => "volunteer_released",
            AuditEventType::EscalationOpened => "escalation_opened",
            AuditEventType::EscalationClosed => "escalation_closed",
            AuditEventType::AdapterInvoked => "adapter_invoked",
            AuditEventType::DeadlineMissed => "deadline_missed",
            AuditEventType::IntegrityViolation => "integrity_violation",
        }
    }
}

/// Outcome attached to an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Failure,
    PartialFailure,
    /// Integrity violations are recorded at alert severity
    Alert,
}

/// Append-only audit record. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub event_type: AuditEventType,
    /// Entity kind, e.g. "session", "volunteer", "escalation"
    pub entity: String,
    pub entity_id: String,
    pub timestamp_ns: i64,
    pub actor: String,
    pub details: serde_json::Value,
    pub outcome: AuditOutcome,
}

impl AuditRecord {
    /// Build a record stamped with the current wall clock.
    pub fn new(
        event_type: AuditEventType,
        entity: impl Into<String>,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
        details: serde_json::Value,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            entity: entity.into(),
            entity_id: entity_id.into(),
            timestamp_ns: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            actor: actor.into(),
            details,
            outcome,
        }
    }
}

/// Structured metric event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    pub ts: DateTime<Utc>,
    pub component: String,
    pub event: String,
    pub fields: HashMap<String, serde_json::Value>,
}

impl MetricEvent {
    pub fn new(component: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            component: component.into(),
            event: event.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_creation() {
        let record = AuditRecord::new(
            AuditEventType::SessionOpened,
            "session",
            "abc-123",
            "system",
            serde_json::json!({"severity": 5}),
            AuditOutcome::Success,
        );

        assert_eq!(record.event_type, AuditEventType::SessionOpened);
        assert_eq!(record.entity, "session");
        assert!(record.timestamp_ns > 0);
    }

    #[test]
    fn test_metric_event_fields() {
        let event = MetricEvent::new("matcher", "reservation")
            .with_field("volunteer_id", serde_json::json!("v-1"))
            .with_field("load", serde_json::json!(2));

        assert_eq!(event.component, "matcher");
        assert_eq!(event.fields.len(), 2);
    }
}
