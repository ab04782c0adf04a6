// =====================================================================================
// File: core-dispatch/src/types.rs
// Description: Request and response types for the public operations
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use core_audit::MetricsSnapshot;
use core_escalation::TriggerOutcome;
use core_matching::EnqueueOutcome;
use core_triage::{AssessmentAction, RiskLevel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Open a session for an anonymous user.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OpenSessionRequest {
    #[validate(length(min = 1, max = 128))]
    pub anonymous_id: String,
    /// Optional initial severity in 1..=10
    #[validate(range(min = 1, max = 10))]
    pub initial_severity: Option<u8>,
}

/// New session handle. The session key is delivered once for client-side
/// encryption and never again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    pub session_id: Uuid,
    pub session_token: String,
    pub ws_url: String,
    pub session_key: Vec<u8>,
}

/// Post one encrypted message into a session.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PostMessageRequest {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    /// Client idempotency key
    #[validate(length(min = 1, max = 128))]
    pub client_request_id: String,
}

/// Result of posting a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageResponse {
    pub message_id: Uuid,
    pub severity_after: u8,
    pub risk_level: RiskLevel,
    pub action_suggested: Vec<AssessmentAction>,
    /// True when this was an idempotent replay
    pub duplicate: bool,
    /// Set when no volunteer was available and the session is waiting
    pub queued: Option<EnqueueOutcome>,
    /// Set when the message crossed an escalation threshold
    pub escalation: Option<TriggerOutcome>,
}

/// Result of attaching a volunteer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachVolunteerResponse {
    pub ok: bool,
    pub responder_id: Uuid,
}

/// How a session ended, from the responder's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionOutcome {
    Stabilized,
    ReferredToCare,
    TransferredToHotline,
    Unresolved,
}

/// Final resolution request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResolveSessionRequest {
    pub outcome: ResolutionOutcome,
    #[validate(length(max = 4096))]
    pub notes: String,
}

/// Platform-wide statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisStats {
    pub active_sessions: usize,
    pub assigned_sessions: usize,
    pub escalated_sessions: usize,
    pub resolved_sessions: usize,
    pub abandoned_sessions: usize,
    pub open_escalations: usize,
    pub queued_sessions: usize,
    pub audit_records: u64,
    pub audit_overflow: u64,
    pub metrics: MetricsSnapshot,
}
