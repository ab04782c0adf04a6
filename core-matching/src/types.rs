// =====================================================================================
// File: core-matching/src/types.rs
// Description: Core types for volunteers, match criteria, and reservations
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Burnout score at or above which a volunteer is excluded from matching.
pub const BURNOUT_CUTOFF: f64 = 0.7;

/// Volunteer presence state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolunteerStatus {
    Active,
    Busy,
    Offline,
}

/// Cached view of one volunteer. The registry exclusively owns mutations;
/// everything else reads snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volunteer {
    pub id: Uuid,
    pub anonymous_id: String,
    pub status: VolunteerStatus,
    pub is_active: bool,
    pub specializations: HashSet<String>,
    pub languages: HashSet<String>,
    pub current_load: u32,
    pub max_concurrent: u32,
    /// Average rating in [0, 5]
    pub average_rating: f64,
    /// Historical response rate in [0, 1]
    pub response_rate: f64,
    pub emergency_responder: bool,
    /// Burnout score in [0, 1]; values at or above the cutoff disqualify
    pub burnout_score: f64,
    /// Pre-computed priority for the emergency fast path, in [0, 1]
    pub priority_score: f64,
    pub last_active_at: DateTime<Utc>,
}

impl Volunteer {
    /// Availability predicate used by the matcher and reservation path.
    pub fn is_available(&self) -> bool {
        self.status == VolunteerStatus::Active
            && self.is_active
            && self.current_load < self.max_concurrent
            && self.burnout_score < BURNOUT_CUTOFF
    }

    /// Whether this volunteer speaks any of the given languages.
    pub fn speaks_any(&self, languages: &HashSet<String>) -> bool {
        !self.languages.is_disjoint(languages)
    }
}

/// Request urgency, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UrgencyLevel {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

/// Matching criteria for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCriteria {
    pub severity: u8,
    pub keywords: Vec<String>,
    pub urgency: UrgencyLevel,
    pub languages: Option<Vec<String>>,
    pub specializations: Option<Vec<String>>,
}

impl MatchCriteria {
    pub fn standard(severity: u8) -> Self {
        Self {
            severity,
            keywords: Vec::new(),
            urgency: UrgencyLevel::Normal,
            languages: None,
            specializations: None,
        }
    }
}

/// A reserved volunteer slot. Must be confirmed by a session attach within
/// the reservation TTL or the slot is reclaimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub volunteer_id: Uuid,
    pub reserved_at: DateTime<Utc>,
}

/// Successful match result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub volunteer_id: Uuid,
    pub score: f64,
    pub reservation: Reservation,
    /// Whether the emergency fast path produced this match
    pub emergency_path: bool,
    pub elapsed_ms: u64,
    /// Whether the applicable latency target was met
    pub target_met: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volunteer() -> Volunteer {
        Volunteer {
            id: Uuid::new_v4(),
            anonymous_id: "anon-1".to_string(),
            status: VolunteerStatus::Active,
            is_active: true,
            specializations: HashSet::new(),
            languages: ["en".to_string()].into_iter().collect(),
            current_load: 0,
            max_concurrent: 3,
            average_rating: 4.5,
            response_rate: 0.9,
            emergency_responder: false,
            burnout_score: 0.2,
            priority_score: 0.5,
            last_active_at: Utc::now(),
        }
    }

    #[test]
    fn test_availability_predicate() {
        let mut v = volunteer();
        assert!(v.is_available());

        v.current_load = 3;
        assert!(!v.is_available());

        v.current_load = 0;
        v.burnout_score = 0.7;
        assert!(!v.is_available());

        v.burnout_score = 0.2;
        v.status = VolunteerStatus::Offline;
        assert!(!v.is_available());
    }

    #[test]
    fn test_language_overlap() {
        let v = volunteer();
        let mut wanted = HashSet::new();
        wanted.insert("es".to_string());
        assert!(!v.speaks_any(&wanted));
        wanted.insert("en".to_string());
        assert!(v.speaks_any(&wanted));
    }

    #[test]
    fn test_urgency_ordering() {
        assert!(UrgencyLevel::Low < UrgencyLevel::Normal);
        assert!(UrgencyLevel::High < UrgencyLevel::Critical);
    }
}
