// =====================================================================================
// File: core-dispatch/src/error.rs
// Description: Error types for public dispatch operations
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use core_escalation::EscalationError;
use core_matching::MatchError;
use core_session::SessionError;
use core_triage::TriageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Error types surfaced by the public operations.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum DispatchError {
    /// Too many sessions opened for this anonymous id
    #[error("Rate limited; retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    /// The platform is degraded (e.g. audit sink down) and refuses new work
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    /// A request failed validation
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Session-layer error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Matching-layer error
    #[error(transparent)]
    Matching(#[from] MatchError),

    /// Escalation-layer error
    #[error(transparent)]
    Escalation(#[from] EscalationError),

    /// Triage configuration error
    #[error(transparent)]
    Triage(#[from] TriageError),
}
