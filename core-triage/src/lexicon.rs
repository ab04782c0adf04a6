// =====================================================================================
// File: core-triage/src/lexicon.rs
// Description: Weighted keyword lexicon and indicator word lists
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{
    error::{TriageError, TriageResult},
    types::KeywordCategory,
};
use serde::{Deserialize, Serialize};

/// Words signaling immediate intent. Their presence raises the severity
/// formula's time bonus and participates in the emergency override.
pub const IMMEDIATE_TIME_WORDS: &[&str] = &[
    "now",
    "tonight",
    "today",
    "immediately",
    "right now",
    "this minute",
];

/// Words signaling future orientation; these lower the computed severity.
pub const FUTURE_TIME_WORDS: &[&str] = &[
    "tomorrow",
    "plan",
    "planning",
    "someday",
    "next week",
    "future",
    "hope",
    "hoping",
];

/// Positive sentiment indicators.
pub const POSITIVE_INDICATORS: &[&str] = &[
    "hope", "better", "grateful", "thankful", "happy", "calm", "proud", "improving", "good",
    "love", "relieved",
];

/// Negative sentiment indicators.
pub const NEGATIVE_INDICATORS: &[&str] = &[
    "sad", "hopeless", "worthless", "angry", "hate", "terrible", "awful", "pain", "hurt",
    "alone", "scared", "tired", "empty", "numb",
];

/// One weighted lexicon pattern. Patterns are matched case-insensitively on
/// whole-word boundaries; multi-word patterns are supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub pattern: String,
    pub category: KeywordCategory,
    pub weight: f64,
}

impl LexiconEntry {
    pub fn new(pattern: &str, category: KeywordCategory, weight: f64) -> Self {
        Self {
            pattern: pattern.to_string(),
            category,
            weight,
        }
    }
}

/// Result of scanning one normalized message against the lexicon.
#[derive(Debug, Clone, Default)]
pub struct LexiconScan {
    pub keywords: Vec<String>,
    pub emergency_keywords: Vec<String>,
    /// Summed weights of emergency, high-risk, and moderate-risk hits
    pub total_weight: f64,
    /// Summed weights of protective hits
    pub protective_weight: f64,
    pub coping_hits: usize,
    pub has_emergency: bool,
}

/// Compiled keyword lexicon.
#[derive(Debug, Clone)]
pub struct Lexicon {
    entries: Vec<LexiconEntry>,
}

impl Lexicon {
    /// Build a lexicon from configured entries, validating each one.
    pub fn from_entries(entries: Vec<LexiconEntry>) -> TriageResult<Self> {
        for entry in &entries {
            if entry.pattern.trim().is_empty() {
                return Err(TriageError::LexiconError {
                    message: "empty pattern".to_string(),
                });
            }
            if !entry.weight.is_finite() || entry.weight <= 0.0 {
                return Err(TriageError::LexiconError {
                    message: format!("non-positive weight for pattern '{}'", entry.pattern),
                });
            }
        }
        let entries = entries
            .into_iter()
            .map(|e| LexiconEntry {
                pattern: e.pattern.to_lowercase(),
                ..e
            })
            .collect();
        Ok(Self { entries })
    }

    /// Built-in default set. Placeholder content with realistic shape; the
    /// clinical lexicon is supplied through configuration in production.
    pub fn default_set() -> Self {
        use KeywordCategory::*;
        let entries = vec![
            // Immediate danger
            LexiconEntry::new("kill myself", Emergency, 5.0),
            LexiconEntry::new("end my life", Emergency, 5.0),
            LexiconEntry::new("have a gun", Emergency, 5.0),
            LexiconEntry::new("suicide", Emergency, 4.5),
            LexiconEntry::new("end it all", Emergency, 4.5),
            LexiconEntry::new("want to die", Emergency, 4.0),
            LexiconEntry::new("overdose", Emergency, 4.0),
            LexiconEntry::new("jump off", Emergency, 4.0),
            LexiconEntry::new("gun", Emergency, 3.5),
            // Elevated risk
            LexiconEntry::new("hurt myself", HighRisk, 3.0),
            LexiconEntry::new("self harm", HighRisk, 3.0),
            LexiconEntry::new("no reason to live", HighRisk, 3.0),
            LexiconEntry::new("cutting", HighRisk, 2.5),
            LexiconEntry::new("pills", HighRisk, 2.5),
            LexiconEntry::new("cant go on", HighRisk, 2.5),
            LexiconEntry::new("give up", HighRisk, 2.0),
            LexiconEntry::new("hopeless", HighRisk, 2.0),
            LexiconEntry::new("worthless", HighRisk, 2.0),
            // Distress
            LexiconEntry::new("depressed", ModerateRisk, 1.5),
            LexiconEntry::new("panic", ModerateRisk, 1.5),
            LexiconEntry::new("overwhelmed", ModerateRisk, 1.2),
            LexiconEntry::new("anxious", ModerateRisk, 1.0),
            LexiconEntry::new("alone", ModerateRisk, 1.0),
            LexiconEntry::new("scared", ModerateRisk, 1.0),
            LexiconEntry::new("crying", ModerateRisk, 1.0),
            LexiconEntry::new("cant sleep", ModerateRisk, 0.8),
            // Protective factors
            LexiconEntry::new("therapist", Protective, 1.5),
            LexiconEntry::new("counselor", Protective, 1.5),
            LexiconEntry::new("medication", Protective, 1.0),
            LexiconEntry::new("family", Protective, 1.0),
            LexiconEntry::new("friend", Protective, 1.0),
            LexiconEntry::new("support", Protective, 1.0),
            LexiconEntry::new("safe", Protective, 0.8),
            // Coping language
            LexiconEntry::new("breathing", Coping, 1.0),
            LexiconEntry::new("meditation", Coping, 1.0),
            LexiconEntry::new("grounding", Coping, 1.0),
            LexiconEntry::new("journaling", Coping, 0.8),
            LexiconEntry::new("exercise", Coping, 0.8),
            LexiconEntry::new("coping", Coping, 0.8),
            LexiconEntry::new("talked to", Coping, 0.5),
        ];
        // Patterns above are already lowercase
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scan normalized text (lowercase, punctuation stripped, single spaces)
    /// for lexicon hits.
    pub fn scan(&self, normalized: &str) -> LexiconScan {
        let padded = format!(" {} ", normalized);
        let mut scan = LexiconScan::default();

        for entry in &self.entries {
            if !padded.contains(&format!(" {} ", entry.pattern)) {
                continue;
            }
            scan.keywords.push(entry.pattern.clone());
            match entry.category {
                KeywordCategory::Emergency => {
                    scan.has_emergency = true;
                    scan.emergency_keywords.push(entry.pattern.clone());
                    scan.total_weight += entry.weight;
                }
                KeywordCategory::HighRisk | KeywordCategory::ModerateRisk => {
                    scan.total_weight += entry.weight;
                }
                KeywordCategory::Protective => {
                    scan.protective_weight += entry.weight;
                }
                KeywordCategory::Coping => {
                    scan.coping_hits += 1;
                }
            }
        }
        scan
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::default_set()
    }
}

/// Count whole-word occurrences of the given phrases in normalized text.
pub fn count_phrase_hits(normalized: &str, phrases: &[&str]) -> usize {
    let padded = format!(" {} ", normalized);
    phrases
        .iter()
        .filter(|phrase| padded.contains(&format!(" {} ", phrase)))
        .count()
}
