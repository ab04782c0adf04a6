// =====================================================================================
// File: core-triage/src/types.rs
// Description: Core types for message risk classification
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk level enumeration (ordered by severity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Severity 1-3
    Low = 1,
    /// Severity 4-5
    Moderate = 2,
    /// Severity 6-7
    High = 3,
    /// Severity 8
    Critical = 4,
    /// Severity 9-10
    Emergency = 5,
}

impl RiskLevel {
    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::Moderate => "Moderate Risk",
            RiskLevel::High => "High Risk",
            RiskLevel::Critical => "Critical Risk",
            RiskLevel::Emergency => "Emergency",
        }
    }
}

/// Keyword category in the weighted lexicon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeywordCategory {
    /// Immediate-danger language; any hit forces the emergency path
    Emergency,
    HighRisk,
    ModerateRisk,
    /// Protective factors reduce the score
    Protective,
    /// Coping language steers recommended actions
    Coping,
}

/// Recommended follow-up action derived from an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssessmentAction {
    ImmediateEscalation,
    EmergencyServicesAlert,
    SupervisorNotification,
    PriorityVolunteerAssignment,
    EnhancedMonitoring,
    StandardVolunteerAssignment,
    PeerSupportMatching,
    ResourceProvision,
    WellnessResources,
    ReinforceCopingStrategies,
    BuildOnPositiveIndicators,
}

/// Token authorizing a severity downgrade. Without one, a session's severity
/// is monotonically non-decreasing across assessments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowngradeToken {
    /// Responder that authorized the reassessment
    pub issued_by: String,
    pub issued_at: DateTime<Utc>,
}

/// Rolling session context fed into each assessment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRiskContext {
    /// Current session severity; the new assessment never drops below this
    /// unless a downgrade token is present
    pub severity: u8,
    pub downgrade_token: Option<DowngradeToken>,
}

impl SessionRiskContext {
    pub fn with_severity(severity: u8) -> Self {
        Self {
            severity,
            downgrade_token: None,
        }
    }
}

/// Result of classifying one message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Severity in 1..=10, higher is worse
    pub severity: u8,
    pub risk_level: RiskLevel,
    /// All matched lexicon patterns
    pub keywords_detected: Vec<String>,
    /// Matched patterns from the emergency category only
    pub emergency_keywords: Vec<String>,
    /// Sentiment in [-1, 1]
    pub sentiment_score: f64,
    /// Confidence in [0, 1]; zero when the text could not be analyzed
    pub confidence: f64,
    pub immediate_risk: bool,
    pub recommended_actions: Vec<AssessmentAction>,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert!(RiskLevel::Critical < RiskLevel::Emergency);
    }

    #[test]
    fn test_session_context_default() {
        let ctx = SessionRiskContext::default();
        assert_eq!(ctx.severity, 0);
        assert!(ctx.downgrade_token.is_none());
    }
}
