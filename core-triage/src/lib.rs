// =====================================================================================
// File: core-triage/src/lib.rs
// Description: Message risk classification for the SafeHaven crisis platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Triage Module
//!
//! Deterministic text-risk classification for inbound crisis messages. Each
//! message is scored against a weighted keyword lexicon, combined with
//! sentiment and urgency indicators, and mapped to a severity in `1..=10`, a
//! bucketed risk level, and a set of recommended actions.
//!
//! Classification is pure CPU work: it never suspends, never fails, and is
//! safe to call concurrently. Malformed input degrades to a floor severity
//! with zero confidence rather than an error.

pub mod assessor;
pub mod error;
pub mod lexicon;
pub mod types;

pub use assessor::RiskAssessor;
pub use error::{TriageError, TriageResult};
pub use lexicon::{Lexicon, LexiconEntry};
pub use types::{
    AssessmentAction, DowngradeToken, KeywordCategory, RiskAssessment, RiskLevel,
    SessionRiskContext,
};

use serde::{Deserialize, Serialize};

/// Severity thresholds used when bucketing severity into risk levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Severity at or above which risk is Emergency
    pub emergency: u8,
    /// Severity at or above which risk is Critical
    pub critical: u8,
    /// Severity at or above which risk is High
    pub high: u8,
    /// Severity at or above which risk is Moderate
    pub moderate: u8,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            emergency: 9,
            critical: 8,
            high: 6,
            moderate: 4,
        }
    }
}

/// Triage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    pub thresholds: RiskThresholds,
    /// Inline lexicon entries; empty means the built-in default set
    #[serde(default)]
    pub lexicon: Vec<LexiconEntry>,
    /// Severity assigned to text that cannot be analyzed
    pub fallback_severity: u8,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            lexicon: Vec::new(),
            fallback_severity: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triage_config_default() {
        let config = TriageConfig::default();
        assert_eq!(config.thresholds.emergency, 9);
        assert_eq!(config.fallback_severity, 5);
        assert!(config.lexicon.is_empty());
    }
}
