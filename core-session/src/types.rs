// =====================================================================================
// File: core-session/src/types.rs
// Description: Core types for sessions, messages, and stream frames
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Open, no responder attached
    Active,
    /// A responder is attached
    Assigned,
    /// An escalation protocol is running or ran
    Escalated,
    /// Closed by a responder; terminal
    Resolved,
    /// Closed by inactivity timeout; terminal
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Resolved | SessionStatus::Abandoned)
    }
}

/// Escalation tier recorded on an escalated session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscalationTag {
    Moderate,
    High,
    Critical,
    Emergency,
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SenderType {
    AnonymousUser,
    Volunteer,
    System,
    AiAssistant,
}

/// Session record. The session key never appears here; key material stays
/// inside the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub anonymous_id: String,
    pub status: SessionStatus,
    /// Severity in 1..=10, monotonically non-decreasing unless a responder
    /// reassesses downward
    pub severity: u8,
    pub responder_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub emergency_triggered: bool,
    pub escalation_type: Option<EscalationTag>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u64,
}

/// Stored message. Bodies are ciphertext only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_type: SenderType,
    pub sender_id: String,
    /// Strictly increasing within the session
    pub timestamp_ns: i64,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub risk_score: Option<u8>,
    pub sentiment_score: Option<f64>,
    pub keywords_detected: Vec<String>,
    pub response_latency_ms: Option<u64>,
    pub client_request_id: Option<String>,
}

/// Frame delivered on a session's fan-out stream, in append order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionFrame {
    MessageAppended {
        message: Message,
    },
    VolunteerJoined {
        volunteer_id: Uuid,
    },
    SystemNotification {
        text: String,
    },
    EmergencyAlert {
        escalation_id: Uuid,
        tag: EscalationTag,
    },
    TypingIndicator {
        sender_type: SenderType,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Assigned.is_terminal());
        assert!(!SessionStatus::Escalated.is_terminal());
        assert!(SessionStatus::Resolved.is_terminal());
        assert!(SessionStatus::Abandoned.is_terminal());
    }
}
