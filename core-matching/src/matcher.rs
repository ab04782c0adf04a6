// =====================================================================================
// File: core-matching/src/matcher.rs
// Description: Scored volunteer matching with emergency fast path and wait queues
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{
    error::{MatchError, MatchResult},
    registry::VolunteerRegistry,
    types::{Match, MatchCriteria, Reservation, UrgencyLevel, Volunteer},
    MatcherConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Score weight for remaining capacity.
const WEIGHT_AVAILABILITY: f64 = 0.40;
/// Score weight for historical response rate.
const WEIGHT_RESPONSE_RATE: f64 = 0.30;
/// Score weight for average rating.
const WEIGHT_RATING: f64 = 0.20;
/// Score weight for specialization overlap.
const WEIGHT_SPECIALIZATION: f64 = 0.10;

/// Outcome of enqueueing an unmatched session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EnqueueOutcome {
    Queued {
        position: usize,
        estimated_wait_ms: u64,
    },
}

struct QueuedRequest {
    session_id: Uuid,
    criteria: MatchCriteria,
    responder: oneshot::Sender<Match>,
}

/// Volunteer matcher. Reads registry snapshots, reserves atomically, and
/// parks unmatched sessions in per-urgency FIFO queues that are re-processed
/// on every registry change.
pub struct VolunteerMatcher {
    registry: Arc<VolunteerRegistry>,
    config: MatcherConfig,
    queues: Mutex<HashMap<UrgencyLevel, VecDeque<QueuedRequest>>>,
}

impl VolunteerMatcher {
    pub fn new(registry: Arc<VolunteerRegistry>, config: MatcherConfig) -> Self {
        Self {
            registry,
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Find and reserve the best candidate for the criteria. Returns `None`
    /// only when no candidate reaches the minimum score or the registry is
    /// empty after a forced refresh. Never returns an error to callers for
    /// lost reservation races; those fall through to the next candidate.
    pub async fn find_best_match(
        &self,
        criteria: &MatchCriteria,
        is_emergency: bool,
    ) -> MatchResult<Option<Match>> {
        let started = Instant::now();

        if self.registry.is_empty().await || self.registry.is_stale().await {
            if let Err(e) = self.registry.refresh().await {
                warn!(error = %e, "forced registry refresh failed");
            }
        }
        if self.registry.is_empty().await {
            return Ok(None);
        }

        let found = if is_emergency {
            match self.try_emergency_path(criteria).await {
                Some(hit) => Some(hit),
                // No emergency responder available: fall through to scoring
                None => self.try_standard_path(criteria).await,
            }
        } else {
            self.try_standard_path(criteria).await
        };

        let target_ms = if is_emergency {
            self.config.emergency_target_ms
        } else {
            self.config.standard_target_ms
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        Ok(found.map(|(reservation, score, emergency_path)| {
            debug!(
                volunteer_id = %reservation.volunteer_id,
                score,
                emergency_path,
                elapsed_ms,
                "match found"
            );
            Match {
                volunteer_id: reservation.volunteer_id,
                score,
                reservation,
                emergency_path,
                elapsed_ms,
                target_met: elapsed_ms <= target_ms,
            }
        }))
    }

    /// Walk the pre-sorted emergency priority list; first available candidate
    /// with a language overlap wins with score 1.0.
    async fn try_emergency_path(
        &self,
        criteria: &MatchCriteria,
    ) -> Option<(Reservation, f64, bool)> {
        let wanted = requested_languages(criteria);
        for candidate in self.registry.emergency_candidates().await {
            if !candidate.speaks_any(&wanted) {
                continue;
            }
            match self.registry.reserve(candidate.id).await {
                Ok(reservation) => return Some((reservation, 1.0, true)),
                Err(MatchError::ReservationConflict { .. }) => continue,
                Err(e) => {
                    warn!(volunteer_id = %candidate.id, error = %e, "emergency reserve failed");
                    continue;
                }
            }
        }
        None
    }

    /// Score up to the configured number of available candidates and reserve
    /// the best one at or above the minimum score.
    async fn try_standard_path(
        &self,
        criteria: &MatchCriteria,
    ) -> Option<(Reservation, f64, bool)> {
        let candidates = self
            .registry
            .available_candidates(self.config.max_candidates_scored)
            .await;

        let mut scored: Vec<(Volunteer, f64)> = candidates
            .into_iter()
            .map(|v| {
                let score = score_volunteer(&v, criteria);
                (v, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.current_load.cmp(&b.0.current_load))
                .then_with(|| {
                    b.0.priority_score
                        .partial_cmp(&a.0.priority_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        for (volunteer, score) in scored {
            if score < self.config.min_score {
                break;
            }
            match self.registry.reserve(volunteer.id).await {
                Ok(reservation) => return Some((reservation, score, false)),
                Err(MatchError::ReservationConflict { .. }) => continue,
                Err(e) => {
                    warn!(volunteer_id = %volunteer.id, error = %e, "reserve failed");
                    continue;
                }
            }
        }
        None
    }

    /// Park an unmatched session in its urgency bucket. Critical requests
    /// additionally force a registry refresh so they are retried immediately.
    pub async fn enqueue(
        &self,
        session_id: Uuid,
        criteria: MatchCriteria,
    ) -> (EnqueueOutcome, oneshot::Receiver<Match>) {
        let (tx, rx) = oneshot::channel();
        let urgency = criteria.urgency;

        let position = {
            let mut queues = self.queues.lock().await;
            let queue = queues.entry(urgency).or_default();
            if queue.len() >= self.config.wait_queue_capacity {
                info!(?urgency, depth = queue.len(), "wait queue over capacity");
            }
            queue.push_back(QueuedRequest {
                session_id,
                criteria,
                responder: tx,
            });
            queue.len()
        };

        if urgency == UrgencyLevel::Critical {
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                if let Err(e) = registry.refresh().await {
                    warn!(error = %e, "refresh for critical waiter failed");
                }
            });
        }

        debug!(%session_id, ?urgency, position, "session enqueued for matching");
        let estimated_wait_ms = position as u64 * self.config.standard_target_ms;
        (
            EnqueueOutcome::Queued {
                position,
                estimated_wait_ms,
            },
            rx,
        )
    }

    /// Try to match queued sessions, highest urgency first, FIFO within a
    /// bucket. Stops at the first head that cannot be matched.
    pub async fn process_waiting(&self) {
        let mut queues = self.queues.lock().await;
        'buckets: for urgency in [
            UrgencyLevel::Critical,
            UrgencyLevel::High,
            UrgencyLevel::Normal,
            UrgencyLevel::Low,
        ] {
            let Some(queue) = queues.get_mut(&urgency) else {
                continue;
            };
            while let Some(head) = queue.front() {
                if head.responder.is_closed() {
                    queue.pop_front();
                    continue;
                }
                let criteria = head.criteria.clone();
                let is_emergency = urgency == UrgencyLevel::Critical;
                match self.find_best_match(&criteria, is_emergency).await {
                    Ok(Some(matched)) => {
                        if let Some(request) = queue.pop_front() {
                            let volunteer_id = matched.volunteer_id;
                            info!(
                                session_id = %request.session_id,
                                %volunteer_id,
                                "queued session matched"
                            );
                            if request.responder.send(matched).is_err() {
                                // Waiter is gone; undo the reservation
                                let _ = self.registry.release(volunteer_id).await;
                            }
                        }
                    }
                    _ => break 'buckets,
                }
            }
        }
    }

    /// Total sessions currently waiting across all urgency buckets.
    pub async fn queued_len(&self) -> usize {
        self.queues.lock().await.values().map(|q| q.len()).sum()
    }

    /// Spawn the processor that re-runs queued matching on every registry
    /// change notification.
    pub fn start_queue_processor(self: &Arc<Self>) -> JoinHandle<()> {
        let matcher = Arc::clone(self);
        let mut changes = matcher.registry.subscribe_changes();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                matcher.process_waiting().await;
            }
        })
    }
}

/// Weighted candidate score per the platform's matching formula.
fn score_volunteer(volunteer: &Volunteer, criteria: &MatchCriteria) -> f64 {
    let load_component =
        1.0 - volunteer.current_load as f64 / volunteer.max_concurrent.max(1) as f64;
    let overlap = match criteria.specializations.as_deref() {
        Some(wanted) if !wanted.is_empty() => {
            let hits = wanted
                .iter()
                .filter(|s| volunteer.specializations.contains(s.as_str()))
                .count();
            hits as f64 / wanted.len() as f64
        }
        _ => 0.0,
    };

    WEIGHT_AVAILABILITY * load_component
        + WEIGHT_RESPONSE_RATE * volunteer.response_rate
        + WEIGHT_RATING * (volunteer.average_rating / 5.0)
        + WEIGHT_SPECIALIZATION * overlap
}

/// Criteria languages plus English, the platform's fallback language.
fn requested_languages(criteria: &MatchCriteria) -> HashSet<String> {
    let mut wanted: HashSet<String> = criteria
        .languages
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();
    wanted.insert("en".to_string());
    wanted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticDirectory;
    use crate::types::VolunteerStatus;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn volunteer(load: u32, max: u32, rating: f64, rate: f64) -> Volunteer {
        Volunteer {
            id: Uuid::new_v4(),
            anonymous_id: "anon".to_string(),
            status: VolunteerStatus::Active,
            is_active: true,
            specializations: HashSet::new(),
            languages: ["en".to_string()].into_iter().collect(),
            current_load: load,
            max_concurrent: max,
            average_rating: rating,
            response_rate: rate,
            emergency_responder: false,
            burnout_score: 0.1,
            priority_score: 0.5,
            last_active_at: Utc::now(),
        }
    }

    async fn matcher_with(volunteers: Vec<Volunteer>) -> Arc<VolunteerMatcher> {
        let directory = Arc::new(StaticDirectory::new());
        for v in volunteers {
            directory.upsert(v).await;
        }
        let registry = Arc::new(VolunteerRegistry::new(directory, MatcherConfig::default()));
        registry.refresh().await.unwrap();
        Arc::new(VolunteerMatcher::new(registry, MatcherConfig::default()))
    }

    #[tokio::test]
    async fn test_standard_match_prefers_availability() {
        let v1 = volunteer(2, 3, 4.9, 0.95);
        let v2 = volunteer(0, 2, 4.2, 0.80);
        let v3 = volunteer(1, 3, 4.8, 0.90);
        let v2_id = v2.id;

        let matcher = matcher_with(vec![v1, v2, v3]).await;
        let matched = matcher
            .find_best_match(&MatchCriteria::standard(6), false)
            .await
            .unwrap()
            .expect("a match");

        assert_eq!(matched.volunteer_id, v2_id);
        assert!(!matched.emergency_path);
        assert_eq!(
            matcher.registry.get(v2_id).await.unwrap().current_load,
            1
        );
    }

    #[tokio::test]
    async fn test_emergency_without_responders_falls_through() {
        let v1 = volunteer(2, 3, 4.9, 0.95);
        let v1_id = v1.id;

        let matcher = matcher_with(vec![v1]).await;
        let criteria = MatchCriteria {
            urgency: UrgencyLevel::Critical,
            ..MatchCriteria::standard(9)
        };
        let matched = matcher
            .find_best_match(&criteria, true)
            .await
            .unwrap()
            .expect("a match");

        assert_eq!(matched.volunteer_id, v1_id);
        assert!(!matched.emergency_path);
        assert!(matched.score >= 0.6);
    }

    #[tokio::test]
    async fn test_emergency_path_respects_priority_and_language() {
        let mut spanish_only = volunteer(0, 3, 5.0, 1.0);
        spanish_only.emergency_responder = true;
        spanish_only.priority_score = 0.99;
        spanish_only.languages = ["es".to_string()].into_iter().collect();

        let mut english = volunteer(0, 3, 4.0, 0.9);
        english.emergency_responder = true;
        english.priority_score = 0.5;
        let english_id = english.id;

        let matcher = matcher_with(vec![spanish_only, english]).await;
        let matched = matcher
            .find_best_match(&MatchCriteria::standard(9), true)
            .await
            .unwrap()
            .expect("a match");

        assert_eq!(matched.volunteer_id, english_id);
        assert!(matched.emergency_path);
        assert_relative_eq!(matched.score, 1.0);
    }

    #[tokio::test]
    async fn test_below_min_score_returns_none() {
        let weak = volunteer(2, 3, 2.0, 0.2);
        let matcher = matcher_with(vec![weak]).await;

        let matched = matcher
            .find_best_match(&MatchCriteria::standard(5), false)
            .await
            .unwrap();
        assert!(matched.is_none());
    }

    #[tokio::test]
    async fn test_empty_registry_returns_none() {
        let matcher = matcher_with(vec![]).await;
        let matched = matcher
            .find_best_match(&MatchCriteria::standard(5), false)
            .await
            .unwrap();
        assert!(matched.is_none());
    }

    #[tokio::test]
    async fn test_tie_break_prefers_lower_load() {
        // Equal scores: same rating and rate, both at half capacity
        let a = volunteer(1, 2, 4.0, 0.9);
        let b = volunteer(2, 4, 4.0, 0.9);
        let a_id = a.id;

        let matcher = matcher_with(vec![a, b]).await;
        let matched = matcher
            .find_best_match(&MatchCriteria::standard(5), false)
            .await
            .unwrap()
            .expect("a match");
        assert_eq!(matched.volunteer_id, a_id);
    }

    #[tokio::test]
    async fn test_specialization_overlap_scoring() {
        let mut specialist = volunteer(1, 2, 4.0, 0.8);
        specialist
            .specializations
            .insert("crisis-intervention".to_string());
        let generalist = volunteer(1, 2, 4.0, 0.8);
        let specialist_id = specialist.id;

        let matcher = matcher_with(vec![specialist, generalist]).await;
        let criteria = MatchCriteria {
            specializations: Some(vec!["crisis-intervention".to_string()]),
            ..MatchCriteria::standard(6)
        };
        let matched = matcher
            .find_best_match(&criteria, false)
            .await
            .unwrap()
            .expect("a match");
        assert_eq!(matched.volunteer_id, specialist_id);
    }

    #[tokio::test]
    async fn test_queued_session_matched_on_registry_change() {
        let directory = Arc::new(StaticDirectory::new());
        let registry = Arc::new(VolunteerRegistry::new(
            Arc::clone(&directory) as Arc<dyn crate::registry::VolunteerDirectory>,
            MatcherConfig::default(),
        ));
        registry.refresh().await.unwrap();
        let matcher = Arc::new(VolunteerMatcher::new(
            Arc::clone(&registry),
            MatcherConfig::default(),
        ));
        let _processor = matcher.start_queue_processor();

        let session_id = Uuid::new_v4();
        let (outcome, rx) = matcher
            .enqueue(session_id, MatchCriteria::standard(5))
            .await;
        assert!(matches!(outcome, EnqueueOutcome::Queued { position: 1, .. }));
        assert_eq!(matcher.queued_len().await, 1);

        // A volunteer becomes available; the waiter must be resolved
        let v = volunteer(0, 2, 4.5, 0.9);
        let v_id = v.id;
        registry.upsert(v).await;

        let matched = tokio::time::timeout(std::time::Duration::from_secs(2), rx)
            .await
            .expect("waiter resolved in time")
            .expect("match delivered");
        assert_eq!(matched.volunteer_id, v_id);
        assert_eq!(matcher.queued_len().await, 0);
    }

    #[test]
    fn test_score_formula() {
        let v = volunteer(2, 3, 4.9, 0.95);
        let score = score_volunteer(&v, &MatchCriteria::standard(6));
        // 0.4*(1/3) + 0.3*0.95 + 0.2*0.98 + 0.1*0
        assert_relative_eq!(score, 0.61433, epsilon = 1e-4);
    }
}
