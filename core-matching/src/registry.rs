// =====================================================================================
// File: core-matching/src/registry.rs
// Description: In-memory volunteer registry with atomic reservations and TTL refresh
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{
    error::{MatchError, MatchResult},
    types::{Reservation, Volunteer},
    MatcherConfig,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Backing store the registry refreshes from. Implementations are swappable
/// (database-backed in production, static in tests).
#[async_trait]
pub trait VolunteerDirectory: Send + Sync {
    async fn load_volunteers(&self) -> MatchResult<Vec<Volunteer>>;
}

/// Directory backed by an in-memory map. Used by tests and as a stand-in
/// while no persistent directory is wired.
pub struct StaticDirectory {
    volunteers: RwLock<HashMap<Uuid, Volunteer>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self {
            volunteers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn upsert(&self, volunteer: Volunteer) {
        self.volunteers.write().await.insert(volunteer.id, volunteer);
    }

    pub async fn remove(&self, volunteer_id: Uuid) {
        self.volunteers.write().await.remove(&volunteer_id);
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolunteerDirectory for StaticDirectory {
    async fn load_volunteers(&self) -> MatchResult<Vec<Volunteer>> {
        Ok(self.volunteers.read().await.values().cloned().collect())
    }
}

struct PendingReservation {
    volunteer_id: Uuid,
    reserved_at: Instant,
    confirmed: bool,
}

struct RegistryState {
    volunteers: HashMap<Uuid, Volunteer>,
    /// Emergency responders, available, sorted by priority score descending.
    /// Rebuilt on every refresh and mutation.
    emergency_list: Vec<Uuid>,
    refreshed_at: Option<Instant>,
    reservations: HashMap<Uuid, PendingReservation>,
}

impl RegistryState {
    fn rebuild_emergency_list(&mut self) {
        let mut candidates: Vec<&Volunteer> = self
            .volunteers
            .values()
            .filter(|v| v.emergency_responder && v.is_available())
            .collect();
        candidates.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.emergency_list = candidates.into_iter().map(|v| v.id).collect();
    }
}

/// Volunteer registry. Single writer for volunteer state; readers get full
/// snapshots, never partial views. Reservations are linearizable per
/// volunteer and reclaimed if not confirmed by a session attach in time.
pub struct VolunteerRegistry {
    directory: Arc<dyn VolunteerDirectory>,
    state: RwLock<RegistryState>,
    config: MatcherConfig,
    change_tx: watch::Sender<u64>,
}

impl VolunteerRegistry {
    pub fn new(directory: Arc<dyn VolunteerDirectory>, config: MatcherConfig) -> Self {
        let (change_tx, _) = watch::channel(0);
        Self {
            directory,
            state: RwLock::new(RegistryState {
                volunteers: HashMap::new(),
                emergency_list: Vec::new(),
                refreshed_at: None,
                reservations: HashMap::new(),
            }),
            config,
            change_tx,
        }
    }

    /// Subscribe to registry change notifications. The value is a version
    /// counter; every mutation or refresh bumps it.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.change_tx.subscribe()
    }

    fn notify_change(&self) {
        self.change_tx.send_modify(|version| *version += 1);
    }

    /// Reload the cache from the backing directory. Unconfirmed reservations
    /// made since the directory last saw the volunteer are re-applied so a
    /// refresh cannot resurrect a slot that is actually held.
    pub async fn refresh(&self) -> MatchResult<usize> {
        let loaded = self.directory.load_volunteers().await?;
        let count = loaded.len();

        let mut state = self.state.write().await;
        let mut volunteers = HashMap::with_capacity(count);
        for mut volunteer in loaded {
            let pending = state
                .reservations
                .values()
                .filter(|r| !r.confirmed && r.volunteer_id == volunteer.id)
                .count() as u32;
            volunteer.current_load =
                (volunteer.current_load + pending).min(volunteer.max_concurrent);
            volunteers.insert(volunteer.id, volunteer);
        }
        state.volunteers = volunteers;
        state.refreshed_at = Some(Instant::now());
        state.rebuild_emergency_list();
        drop(state);

        self.notify_change();
        debug!(count, "volunteer registry refreshed");
        Ok(count)
    }

    /// Whether the snapshot is older than the configured TTL.
    pub async fn is_stale(&self) -> bool {
        let state = self.state.read().await;
        match state.refreshed_at {
            None => true,
            Some(at) => at.elapsed() > Duration::from_millis(self.config.cache_ttl_ms),
        }
    }

    /// Consistent full snapshot of all cached volunteers.
    pub async fn snapshot(&self) -> Vec<Volunteer> {
        self.state.read().await.volunteers.values().cloned().collect()
    }

    pub async fn get(&self, volunteer_id: Uuid) -> Option<Volunteer> {
        self.state.read().await.volunteers.get(&volunteer_id).cloned()
    }

    /// Available candidates, up to `limit`.
    pub async fn available_candidates(&self, limit: usize) -> Vec<Volunteer> {
        self.state
            .read()
            .await
            .volunteers
            .values()
            .filter(|v| v.is_available())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Emergency responders in priority order.
    pub async fn emergency_candidates(&self) -> Vec<Volunteer> {
        let state = self.state.read().await;
        state
            .emergency_list
            .iter()
            .filter_map(|id| state.volunteers.get(id).cloned())
            .collect()
    }

    /// Atomically reserve a slot. Fails with `ReservationConflict` when the
    /// availability predicate no longer holds; concurrent reservations on
    /// one volunteer succeed at most `max_concurrent - current_load` times.
    pub async fn reserve(&self, volunteer_id: Uuid) -> MatchResult<Reservation> {
        let mut state = self.state.write().await;
        let volunteer = state
            .volunteers
            .get_mut(&volunteer_id)
            .ok_or(MatchError::NotFound { volunteer_id })?;

        if volunteer.current_load > volunteer.max_concurrent {
            return Err(MatchError::InvariantViolation {
                volunteer_id,
                message: format!(
                    "load {} exceeds max {}",
                    volunteer.current_load, volunteer.max_concurrent
                ),
            });
        }
        if !volunteer.is_available() {
            return Err(MatchError::ReservationConflict { volunteer_id });
        }

        volunteer.current_load += 1;
        let reservation = Reservation {
            id: Uuid::new_v4(),
            volunteer_id,
            reserved_at: Utc::now(),
        };
        state.reservations.insert(
            reservation.id,
            PendingReservation {
                volunteer_id,
                reserved_at: Instant::now(),
                confirmed: false,
            },
        );
        state.rebuild_emergency_list();
        drop(state);

        self.notify_change();
        debug!(%volunteer_id, reservation_id = %reservation.id, "volunteer reserved");
        Ok(reservation)
    }

    /// Confirm a reservation after the session attached. Unconfirmed
    /// reservations are reclaimed by the reaper.
    pub async fn confirm_attach(&self, reservation_id: Uuid) -> MatchResult<Uuid> {
        let mut state = self.state.write().await;
        let reservation = state
            .reservations
            .get_mut(&reservation_id)
            .ok_or(MatchError::ReservationExpired { reservation_id })?;
        reservation.confirmed = true;
        Ok(reservation.volunteer_id)
    }

    /// Release one slot, e.g. when a session resolves or a match is undone.
    pub async fn release(&self, volunteer_id: Uuid) -> MatchResult<()> {
        let mut state = self.state.write().await;
        let volunteer = state
            .volunteers
            .get_mut(&volunteer_id)
            .ok_or(MatchError::NotFound { volunteer_id })?;

        if volunteer.current_load == 0 {
            return Err(MatchError::InvariantViolation {
                volunteer_id,
                message: "release would drop load below zero".to_string(),
            });
        }
        volunteer.current_load -= 1;

        // Retire one confirmed reservation for this volunteer, if any
        if let Some(reservation_id) = state
            .reservations
            .iter()
            .find(|(_, r)| r.confirmed && r.volunteer_id == volunteer_id)
            .map(|(id, _)| *id)
        {
            state.reservations.remove(&reservation_id);
        }
        state.rebuild_emergency_list();
        drop(state);

        self.notify_change();
        debug!(%volunteer_id, "volunteer released");
        Ok(())
    }

    /// Reclaim reservations that were never confirmed within the TTL.
    /// Returns the number of slots reclaimed.
    pub async fn reap_expired(&self) -> usize {
        let ttl = Duration::from_millis(self.config.reservation_ttl_ms);
        let mut state = self.state.write().await;
        let expired: Vec<Uuid> = state
            .reservations
            .iter()
            .filter(|(_, r)| !r.confirmed && r.reserved_at.elapsed() >= ttl)
            .map(|(id, _)| *id)
            .collect();

        for reservation_id in &expired {
            if let Some(reservation) = state.reservations.remove(reservation_id) {
                if let Some(volunteer) = state.volunteers.get_mut(&reservation.volunteer_id) {
                    if volunteer.current_load == 0 {
                        warn!(
                            volunteer_id = %reservation.volunteer_id,
                            "expired reservation found with zero load"
                        );
                    } else {
                        volunteer.current_load -= 1;
                    }
                }
                info!(
                    reservation_id = %reservation_id,
                    volunteer_id = %reservation.volunteer_id,
                    "unconfirmed reservation reclaimed"
                );
            }
        }
        let reclaimed = expired.len();
        if reclaimed > 0 {
            state.rebuild_emergency_list();
            drop(state);
            self.notify_change();
        }
        reclaimed
    }

    /// Registry-owned mutation entry for a single volunteer (status change,
    /// burnout update, new registration). Rebuilds indexes and notifies.
    pub async fn upsert(&self, volunteer: Volunteer) {
        let mut state = self.state.write().await;
        state.volunteers.insert(volunteer.id, volunteer);
        state.rebuild_emergency_list();
        drop(state);
        self.notify_change();
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.volunteers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.volunteers.is_empty()
    }

    /// Spawn the background reaper that reclaims expired reservations.
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = Duration::from_millis(registry.config.reaper_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.reap_expired().await;
            }
        })
    }
}
