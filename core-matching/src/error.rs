// =====================================================================================
// File: core-matching/src/error.rs
// Description: Error types for the matching subsystem
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use thiserror::Error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result type alias for matching operations
pub type MatchResult<T> = Result<T, MatchError>;

/// Error types for registry and matcher operations
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum MatchError {
    /// Volunteer is not present in the registry
    #[error("Volunteer {volunteer_id} not found")]
    NotFound { volunteer_id: Uuid },

    /// Reservation lost: the volunteer was no longer available
    #[error("Reservation conflict for volunteer {volunteer_id}")]
    ReservationConflict { volunteer_id: Uuid },

    /// Reservation id is unknown or already reclaimed
    #[error("Reservation {reservation_id} not found or expired")]
    ReservationExpired { reservation_id: Uuid },

    /// Load invariant breached; the mutation was rejected
    #[error("Invariant violation for volunteer {volunteer_id}: {message}")]
    InvariantViolation { volunteer_id: Uuid, message: String },

    /// Backing directory could not be reached
    #[error("Directory error: {message}")]
    DirectoryError { message: String },
}
