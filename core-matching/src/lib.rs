// =====================================================================================
// File: core-matching/src/lib.rs
// Description: Volunteer registry cache and priority matching
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Matching Module
//!
//! In-memory volunteer registry with snapshot reads, atomic slot
//! reservation, and a scored matcher with an emergency fast path. The
//! registry is the single writer for volunteer state; the matcher reads
//! snapshots and reserves slots. Sessions that cannot be matched wait in
//! per-urgency FIFO queues processed on every registry change.

pub mod error;
pub mod matcher;
pub mod registry;
pub mod types;

pub use error::{MatchError, MatchResult};
pub use matcher::{EnqueueOutcome, VolunteerMatcher};
pub use registry::{StaticDirectory, VolunteerDirectory, VolunteerRegistry};
pub use types::{
    Match, MatchCriteria, Reservation, UrgencyLevel, Volunteer, VolunteerStatus,
};

use serde::{Deserialize, Serialize};

/// Matching subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Hard latency target for the emergency path, milliseconds
    pub emergency_target_ms: u64,
    /// Hard latency target for the standard path, milliseconds
    pub standard_target_ms: u64,
    /// Registry snapshot TTL before a forced refresh, milliseconds
    pub cache_ttl_ms: u64,
    /// Minimum score a standard-path candidate must reach
    pub min_score: f64,
    /// Maximum candidates scored per standard-path match
    pub max_candidates_scored: usize,
    /// How long a reservation may stay unconfirmed before reclamation
    pub reservation_ttl_ms: u64,
    /// Reaper sweep interval for expired reservations
    pub reaper_interval_ms: u64,
    /// Wait-list capacity per urgency bucket before backpressure kicks in
    pub wait_queue_capacity: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            emergency_target_ms: 2_000,
            standard_target_ms: 5_000,
            cache_ttl_ms: 30_000,
            min_score: 0.6,
            max_candidates_scored: 20,
            reservation_ttl_ms: 10_000,
            reaper_interval_ms: 1_000,
            wait_queue_capacity: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matcher_config_default() {
        let config = MatcherConfig::default();
        assert_eq!(config.emergency_target_ms, 2_000);
        assert_eq!(config.standard_target_ms, 5_000);
        assert_eq!(config.cache_ttl_ms, 30_000);
        assert_eq!(config.min_score, 0.6);
        assert_eq!(config.max_candidates_scored, 20);
    }
}
