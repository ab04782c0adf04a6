// =====================================================================================
// File: core-session/src/error.rs
// Description: Error types for the session subsystem
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use thiserror::Error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Error types for session operations. Domain errors surface to callers;
/// integrity errors reject the offending message while the session continues.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SessionError {
    /// The session has reached a terminal state and accepts no messages
    #[error("Session {session_id} is closed")]
    SessionClosed { session_id: Uuid },

    /// A transition was attempted on a terminal session
    #[error("Session {session_id} is already terminal")]
    AlreadyTerminal { session_id: Uuid },

    /// A responder is already attached
    #[error("Session {session_id} already has a responder attached")]
    AlreadyAttached { session_id: Uuid },

    /// Same idempotency key with a different payload
    #[error("Duplicate request {client_request_id} with conflicting payload")]
    DuplicateRequest { client_request_id: String },

    /// Unknown session id or token
    #[error("Session not found")]
    NotFound,

    /// Authenticated decryption failed; the message is rejected
    #[error("Crypto error: {message}")]
    CryptoError { message: String },

    /// A non-monotonic timestamp was observed
    #[error("Order violation: {message}")]
    OrderViolation { message: String },
}
