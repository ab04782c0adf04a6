// =====================================================================================
// File: core-escalation/src/types.rs
// Description: Core types for escalation records, triggers, and outcomes
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use chrono::{DateTime, Utc};
use core_session::EscalationTag;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What raised the escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscalationTrigger {
    AutomaticKeyword,
    VolunteerRequest,
    UserRequest,
    Timeout,
    AiAssessment,
}

impl EscalationTrigger {
    /// Persisted trigger category. AI assessments share the automatic
    /// category in the stored record; the originating trigger is kept in the
    /// audit trail so no information is lost.
    pub fn persisted_category(&self) -> EscalationTrigger {
        match self {
            EscalationTrigger::AiAssessment => EscalationTrigger::AutomaticKeyword,
            other => *other,
        }
    }
}

/// Response tier of an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EscalationSeverity {
    Moderate = 1,
    High = 2,
    Critical = 3,
    Emergency = 4,
}

impl EscalationSeverity {
    /// Map a trigger and the session's current severity to a response tier.
    pub fn from_trigger(trigger: EscalationTrigger, session_severity: u8) -> Self {
        match trigger {
            EscalationTrigger::AutomaticKeyword | EscalationTrigger::AiAssessment => {
                if session_severity >= 9 {
                    EscalationSeverity::Emergency
                } else {
                    EscalationSeverity::Critical
                }
            }
            EscalationTrigger::VolunteerRequest | EscalationTrigger::UserRequest => {
                if session_severity >= 8 {
                    EscalationSeverity::Critical
                } else {
                    EscalationSeverity::High
                }
            }
            EscalationTrigger::Timeout => {
                if session_severity >= 7 {
                    EscalationSeverity::Critical
                } else {
                    EscalationSeverity::High
                }
            }
        }
    }

    /// Session-facing tag for this tier.
    pub fn tag(&self) -> EscalationTag {
        match self {
            EscalationSeverity::Moderate => EscalationTag::Moderate,
            EscalationSeverity::High => EscalationTag::High,
            EscalationSeverity::Critical => EscalationTag::Critical,
            EscalationSeverity::Emergency => EscalationTag::Emergency,
        }
    }
}

/// Response action executed during an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscalationActionKind {
    EmergencyServicesContacted,
    Lifeline988Contacted,
    CrisisSpecialistAssigned,
    EmergencyContactsNotified,
}

/// One executed action, in completion order within `actions_taken`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: EscalationActionKind,
    pub succeeded: bool,
    pub detail: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Overall escalation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationOutcome {
    /// Every action step succeeded
    Completed,
    /// At least one action step failed; the response still went out
    PartialFailure,
}

/// Persisted escalation record. A session has at most one open escalation;
/// repeated triggers merge their actions into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: Uuid,
    pub session_id: Uuid,
    pub trigger: EscalationTrigger,
    pub severity: EscalationSeverity,
    pub actions_taken: Vec<ActionRecord>,
    pub emergency_contacted: bool,
    pub lifeline988_called: bool,
    pub specialist_assigned: bool,
    pub response_time_ms: u64,
    pub next_steps: Vec<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Result returned to the caller of a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub escalation_id: Uuid,
    pub severity: EscalationSeverity,
    pub actions_taken: Vec<ActionRecord>,
    pub next_steps: Vec<String>,
    pub response_time_ms: u64,
    /// Whether the severity deadline was met (forced false when every
    /// action step failed)
    pub target_met: bool,
    pub outcome: EscalationOutcome,
    /// True when this call joined an escalation already in flight
    pub deduplicated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping_automatic() {
        assert_eq!(
            EscalationSeverity::from_trigger(EscalationTrigger::AutomaticKeyword, 9),
            EscalationSeverity::Emergency
        );
        assert_eq!(
            EscalationSeverity::from_trigger(EscalationTrigger::AutomaticKeyword, 8),
            EscalationSeverity::Critical
        );
        assert_eq!(
            EscalationSeverity::from_trigger(EscalationTrigger::AiAssessment, 10),
            EscalationSeverity::Emergency
        );
    }

    #[test]
    fn test_severity_mapping_requests() {
        assert_eq!(
            EscalationSeverity::from_trigger(EscalationTrigger::UserRequest, 8),
            EscalationSeverity::Critical
        );
        assert_eq!(
            EscalationSeverity::from_trigger(EscalationTrigger::VolunteerRequest, 7),
            EscalationSeverity::High
        );
    }

    #[test]
    fn test_severity_mapping_timeout() {
        assert_eq!(
            EscalationSeverity::from_trigger(EscalationTrigger::Timeout, 7),
            EscalationSeverity::Critical
        );
        assert_eq!(
            EscalationSeverity::from_trigger(EscalationTrigger::Timeout, 6),
            EscalationSeverity::High
        );
    }

    #[test]
    fn test_ai_assessment_persisted_category() {
        assert_eq!(
            EscalationTrigger::AiAssessment.persisted_category(),
            EscalationTrigger::AutomaticKeyword
        );
        assert_eq!(
            EscalationTrigger::UserRequest.persisted_category(),
            EscalationTrigger::UserRequest
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(EscalationSeverity::Moderate < EscalationSeverity::High);
        assert!(EscalationSeverity::Critical < EscalationSeverity::Emergency);
    }
}
