// =====================================================================================
// File: core-triage/src/assessor.rs
// Description: Deterministic severity scoring and recommended-action derivation
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{
    error::{TriageError, TriageResult},
    lexicon::{
        count_phrase_hits, Lexicon, FUTURE_TIME_WORDS, IMMEDIATE_TIME_WORDS, NEGATIVE_INDICATORS,
        POSITIVE_INDICATORS,
    },
    types::{AssessmentAction, RiskAssessment, RiskLevel, SessionRiskContext},
    TriageConfig,
};
use std::time::Instant;
use tracing::debug;

/// Weight multiplier applied to summed risk keyword weights.
const RISK_WEIGHT_FACTOR: f64 = 1.2;
/// Weight multiplier applied to summed protective keyword weights.
const PROTECTIVE_WEIGHT_FACTOR: f64 = 0.8;
/// Severity bonus per immediate-time hit (capped at two hits).
const IMMEDIATE_TIME_BONUS: f64 = 1.5;
/// Severity reduction per future-time hit (capped at two hits).
const FUTURE_TIME_BONUS: f64 = 1.0;
/// Extra urgency applied when the message shouts (caps, exclamations).
const URGENCY_BOOST: f64 = 0.5;

/// Message risk classifier. Stateless apart from its compiled configuration;
/// `assess` is pure CPU work and safe to call concurrently.
pub struct RiskAssessor {
    config: TriageConfig,
    lexicon: Lexicon,
}

impl RiskAssessor {
    pub fn new(config: TriageConfig) -> TriageResult<Self> {
        let t = &config.thresholds;
        if !(t.moderate < t.high && t.high < t.critical && t.critical < t.emergency) {
            return Err(TriageError::ThresholdError {
                message: "thresholds must be strictly increasing".to_string(),
            });
        }
        let lexicon = if config.lexicon.is_empty() {
            Lexicon::default_set()
        } else {
            Lexicon::from_entries(config.lexicon.clone())?
        };
        Ok(Self { config, lexicon })
    }

    /// Classify one message in the context of its session. Never fails:
    /// unanalyzable text yields the configured fallback severity with zero
    /// confidence.
    pub fn assess(&self, text: &str, ctx: &SessionRiskContext) -> RiskAssessment {
        let started = Instant::now();
        let normalized = normalize(text);

        if normalized.is_empty() {
            let severity = self.config.fallback_severity.max(ctx.severity).clamp(1, 10);
            let risk_level = self.risk_level_for(severity);
            return RiskAssessment {
                severity,
                risk_level,
                keywords_detected: Vec::new(),
                emergency_keywords: Vec::new(),
                sentiment_score: 0.0,
                confidence: 0.0,
                immediate_risk: false,
                recommended_actions: self.recommended_actions(risk_level, false, false, false),
                execution_time_ms: started.elapsed().as_millis() as u64,
            };
        }

        let scan = self.lexicon.scan(&normalized);
        let immediate_hits = count_phrase_hits(&normalized, IMMEDIATE_TIME_WORDS);
        let future_hits = count_phrase_hits(&normalized, FUTURE_TIME_WORDS);
        let positive_hits = count_phrase_hits(&normalized, POSITIVE_INDICATORS);
        let negative_hits = count_phrase_hits(&normalized, NEGATIVE_INDICATORS);

        // Indicator counts come from the original text, not the normalized form
        let caps_words = count_caps_words(text);
        let exclamations = text.matches('!').count();

        let sentiment_score = if positive_hits + negative_hits == 0 {
            0.0
        } else {
            (positive_hits as f64 - negative_hits as f64) / (positive_hits + negative_hits) as f64
        };
        let total_indicators = positive_hits + negative_hits + scan.keywords.len();
        let confidence = (total_indicators as f64 / 8.0).min(1.0);

        let urgency_boost = if caps_words >= 2 || exclamations >= 3 {
            URGENCY_BOOST
        } else {
            0.0
        };
        let immediate_bonus =
            IMMEDIATE_TIME_BONUS * immediate_hits.min(2) as f64 + urgency_boost;
        let future_bonus = FUTURE_TIME_BONUS * future_hits.min(2) as f64;

        let base = 2.0 + scan.total_weight * RISK_WEIGHT_FACTOR
            - scan.protective_weight * PROTECTIVE_WEIGHT_FACTOR
            + immediate_bonus
            - future_bonus;
        let base_severity = (base.round() as i64).clamp(1, 10) as u8;

        // Emergency override: any emergency keyword, or a near-maximal score
        // paired with immediate intent, forces the emergency floor.
        let mut severity = base_severity;
        let mut immediate_risk = false;
        if scan.has_emergency
            || (base_severity >= self.config.thresholds.emergency && immediate_hits > 0)
        {
            immediate_risk = true;
            let floor = if scan.has_emergency && immediate_hits > 0 {
                10
            } else {
                self.config.thresholds.emergency
            };
            severity = severity.max(floor);
        }

        // Session monotonicity unless explicitly downgraded by a responder
        if ctx.downgrade_token.is_none() {
            severity = severity.max(ctx.severity);
        }
        severity = severity.clamp(1, 10);

        let risk_level = if immediate_risk {
            RiskLevel::Emergency
        } else {
            self.risk_level_for(severity)
        };

        let recommended_actions = self.recommended_actions(
            risk_level,
            scan.has_emergency,
            scan.coping_hits > 0,
            sentiment_score > 0.0,
        );

        debug!(
            severity,
            ?risk_level,
            keywords = scan.keywords.len(),
            immediate_risk,
            "message assessed"
        );

        RiskAssessment {
            severity,
            risk_level,
            keywords_detected: scan.keywords,
            emergency_keywords: scan.emergency_keywords,
            sentiment_score,
            confidence,
            immediate_risk,
            recommended_actions,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn risk_level_for(&self, severity: u8) -> RiskLevel {
        let t = &self.config.thresholds;
        if severity >= t.emergency {
            RiskLevel::Emergency
        } else if severity >= t.critical {
            RiskLevel::Critical
        } else if severity >= t.high {
            RiskLevel::High
        } else if severity >= t.moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    /// Fixed decision table keyed by risk level, emergency keywords, and
    /// coping indicators.
    fn recommended_actions(
        &self,
        level: RiskLevel,
        has_emergency_keyword: bool,
        has_coping_indicator: bool,
        positive_sentiment: bool,
    ) -> Vec<AssessmentAction> {
        use AssessmentAction::*;
        let mut actions = match level {
            RiskLevel::Emergency => {
                if has_emergency_keyword {
                    vec![ImmediateEscalation, EmergencyServicesAlert, SupervisorNotification]
                } else {
                    vec![ImmediateEscalation, SupervisorNotification]
                }
            }
            RiskLevel::Critical => {
                vec![PriorityVolunteerAssignment, SupervisorNotification, EnhancedMonitoring]
            }
            RiskLevel::High => vec![PriorityVolunteerAssignment, EnhancedMonitoring],
            RiskLevel::Moderate => vec![StandardVolunteerAssignment, ResourceProvision],
            RiskLevel::Low => vec![PeerSupportMatching, WellnessResources],
        };
        if has_coping_indicator {
            actions.push(ReinforceCopingStrategies);
        }
        if level == RiskLevel::Low && positive_sentiment {
            actions.push(BuildOnPositiveIndicators);
        }
        actions
    }
}

/// Case-fold, strip punctuation, collapse whitespace. Apostrophes are
/// dropped so contractions match their bare forms.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if ch == '\'' || ch == '\u{2019}' {
            // drop
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Count fully-uppercase words of three or more letters in the original text.
fn count_caps_words(text: &str) -> usize {
    text.split_whitespace()
        .filter(|word| {
            let letters: Vec<char> = word.chars().filter(|c| c.is_alphabetic()).collect();
            letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase())
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assessor() -> RiskAssessor {
        RiskAssessor::new(TriageConfig::default()).unwrap()
    }

    #[test]
    fn test_emergency_keyword_with_immediate_intent() {
        let assessment = assessor().assess(
            "I have a gun and I'm going to use it tonight",
            &SessionRiskContext::with_severity(5),
        );

        assert_eq!(assessment.severity, 10);
        assert_eq!(assessment.risk_level, RiskLevel::Emergency);
        assert!(assessment.immediate_risk);
        assert!(!assessment.emergency_keywords.is_empty());
        assert!(assessment
            .recommended_actions
            .contains(&AssessmentAction::ImmediateEscalation));
        assert!(assessment
            .recommended_actions
            .contains(&AssessmentAction::EmergencyServicesAlert));
    }

    #[test]
    fn test_high_score_with_immediate_word_is_emergency() {
        // No emergency-category keyword, but the accumulated weight plus
        // immediate intent crosses the emergency threshold.
        let text = "hopeless worthless give up cant go on no reason to live pills cutting right now";
        let assessment = assessor().assess(text, &SessionRiskContext::with_severity(1));

        assert!(assessment.emergency_keywords.is_empty());
        assert!(assessment.severity >= 9);
        assert_eq!(assessment.risk_level, RiskLevel::Emergency);
        assert!(assessment.immediate_risk);
    }

    #[test]
    fn test_severity_monotonic_without_downgrade() {
        let assessment = assessor().assess(
            "i am feeling a bit better today",
            &SessionRiskContext::with_severity(7),
        );
        assert!(assessment.severity >= 7);
    }

    #[test]
    fn test_downgrade_token_allows_lower_severity() {
        let ctx = SessionRiskContext {
            severity: 7,
            downgrade_token: Some(crate::types::DowngradeToken {
                issued_by: "volunteer-1".to_string(),
                issued_at: chrono::Utc::now(),
            }),
        };
        let assessment = assessor().assess("i am feeling calm and safe", &ctx);
        assert!(assessment.severity < 7);
    }

    #[test]
    fn test_unparseable_text_degrades() {
        let assessment = assessor().assess("!!! ??? ...", &SessionRiskContext::with_severity(3));
        assert_eq!(assessment.severity, 5);
        assert_relative_eq!(assessment.confidence, 0.0);
        assert!(!assessment.immediate_risk);

        let assessment = assessor().assess("", &SessionRiskContext::with_severity(8));
        assert_eq!(assessment.severity, 8);
    }

    #[test]
    fn test_protective_factors_reduce_severity() {
        let distressed = assessor().assess(
            "i feel depressed and alone",
            &SessionRiskContext::with_severity(1),
        );
        let supported = assessor().assess(
            "i feel depressed and alone but i talked to my therapist and my family",
            &SessionRiskContext::with_severity(1),
        );
        assert!(supported.severity <= distressed.severity);
        assert!(supported
            .recommended_actions
            .contains(&AssessmentAction::ReinforceCopingStrategies));
    }

    #[test]
    fn test_sentiment_sign() {
        let positive = assessor().assess(
            "i am grateful and hopeful things are improving",
            &SessionRiskContext::with_severity(1),
        );
        assert!(positive.sentiment_score > 0.0);

        let negative = assessor().assess(
            "everything is terrible and i feel empty and tired",
            &SessionRiskContext::with_severity(1),
        );
        assert!(negative.sentiment_score < 0.0);
    }

    #[test]
    fn test_future_orientation_lowers_score() {
        let now = assessor().assess(
            "i am overwhelmed and scared right now",
            &SessionRiskContext::with_severity(1),
        );
        let later = assessor().assess(
            "i am overwhelmed and scared but i plan to see someone tomorrow",
            &SessionRiskContext::with_severity(1),
        );
        assert!(later.severity < now.severity);
    }

    #[test]
    fn test_low_risk_actions() {
        let assessment = assessor().assess(
            "doing okay, things are good",
            &SessionRiskContext::with_severity(1),
        );
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(assessment
            .recommended_actions
            .contains(&AssessmentAction::WellnessResources));
        assert!(assessment
            .recommended_actions
            .contains(&AssessmentAction::BuildOnPositiveIndicators));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = TriageConfig::default();
        config.thresholds.moderate = 9;
        assert!(RiskAssessor::new(config).is_err());
    }

    #[test]
    fn test_assessment_is_fast() {
        let assessment = assessor().assess(
            "i have been feeling anxious and alone lately and i cant sleep",
            &SessionRiskContext::with_severity(1),
        );
        assert!(assessment.execution_time_ms < 50);
    }
}
