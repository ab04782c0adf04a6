// =====================================================================================
// File: core-escalation/src/error.rs
// Description: Error types for the escalation subsystem
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use thiserror::Error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result type alias for escalation operations
pub type EscalationResult<T> = Result<T, EscalationError>;

/// Error types for the escalation engine and its adapters. Adapter errors
/// never cross a step boundary; they become failed action records instead.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum EscalationError {
    /// The session does not exist; surfaced to the caller
    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: Uuid },

    /// The session is terminal and cannot escalate
    #[error("Session {session_id} is closed")]
    SessionClosed { session_id: Uuid },

    /// An external adapter call failed after retries
    #[error("Adapter '{adapter}' error: {message}")]
    AdapterError { adapter: String, message: String },

    /// An adapter call exceeded its step deadline
    #[error("Adapter '{adapter}' timed out after {elapsed_ms}ms")]
    AdapterTimeout { adapter: String, elapsed_ms: u64 },

    /// An emergency contact failed validation
    #[error("Contact error: {message}")]
    ContactError { message: String },

    /// Crypto failure while preparing encrypted notifications
    #[error("Crypto error: {message}")]
    CryptoError { message: String },
}
