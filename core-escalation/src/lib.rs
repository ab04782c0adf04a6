// =====================================================================================
// File: core-escalation/src/lib.rs
// Description: Deadline-bounded emergency escalation engine
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Escalation Module
//!
//! Tiered escalation protocol for crisis sessions. A trigger opens (or joins)
//! the session's single open escalation record, maps to a response severity
//! with a hard deadline, and runs the response actions concurrently: emergency
//! services dispatch, 988 lifeline notification, crisis specialist
//! assignment, and emergency contact fan-out. Step failures never abort the
//! protocol; they are recorded and surfaced as human-readable next steps. A
//! person in crisis always gets a response, even when every downstream
//! provider is down.

pub mod adapters;
pub mod contacts;
pub mod engine;
pub mod error;
pub mod types;

pub use adapters::{
    AdapterAck, ContactNotification, ContactNotifier, EmergencyDispatchRequest,
    EmergencyServicesAdapter, HttpLifeline988Adapter, Lifeline988Adapter, LifelineRequest,
    NotifyChannel, RetryPolicy, StubContactNotifier, StubEmergencyServices, StubLifeline988,
};
pub use contacts::{EmergencyContact, EmergencyContactStore, NewContact};
pub use engine::EscalationEngine;
pub use error::{EscalationError, EscalationResult};
pub use types::{
    ActionRecord, Escalation, EscalationActionKind, EscalationOutcome, EscalationSeverity,
    EscalationTrigger, TriggerOutcome,
};

use serde::{Deserialize, Serialize};

/// Hard response deadlines per escalation severity, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    pub moderate_ms: u64,
    pub high_ms: u64,
    pub critical_ms: u64,
    pub emergency_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            moderate_ms: 180_000,
            high_ms: 120_000,
            critical_ms: 60_000,
            emergency_ms: 30_000,
        }
    }
}

/// Escalation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub deadlines: DeadlineConfig,
    /// Per-step timeout; effective timeout is capped by the severity deadline
    pub step_timeout_ms: u64,
    /// Window within which repeated triggers join the same escalation
    pub dedup_window_ms: u64,
    pub retry: adapters::RetryPolicy,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            deadlines: DeadlineConfig::default(),
            step_timeout_ms: 10_000,
            dedup_window_ms: 5_000,
            retry: adapters::RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_config_default() {
        let config = EscalationConfig::default();
        assert_eq!(config.deadlines.emergency_ms, 30_000);
        assert_eq!(config.deadlines.critical_ms, 60_000);
        assert_eq!(config.dedup_window_ms, 5_000);
        assert_eq!(config.retry.max_attempts, 3);
    }
}
