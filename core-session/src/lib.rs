// =====================================================================================
// File: core-session/src/lib.rs
// Description: Encrypted session lifecycle and message ordering
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Session Module
//!
//! Session lifecycle, encrypted message storage, and per-session fan-out for
//! the SafeHaven platform. Every session owns a symmetric key; message
//! bodies are stored as ciphertext with their nonce and decrypted only in
//! memory for risk assessment. Messages within a session are totally ordered
//! by a strictly-increasing per-session timestamp assigned at append time,
//! and all state transitions for one session serialize on that session's
//! critical section.

pub mod crypto;
pub mod error;
pub mod store;
pub mod types;

pub use crypto::{EncryptedMessage, SessionCipher};
pub use error::{SessionError, SessionResult};
pub use store::{AppendOutcome, AppendRequest, OpenedSession, SessionStore};
pub use types::{
    EscalationTag, Message, SenderType, Session, SessionFrame, SessionStatus,
};

use serde::{Deserialize, Serialize};

/// Session subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity window before an unassigned session is abandoned
    pub active_timeout_ms: u64,
    /// Inactivity window before an assigned session is abandoned
    pub assigned_timeout_ms: u64,
    /// Sweep interval for the inactivity monitor
    pub sweep_interval_ms: u64,
    /// Per-session fan-out channel capacity
    pub fanout_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            active_timeout_ms: 20 * 60 * 1_000,
            assigned_timeout_ms: 60 * 60 * 1_000,
            sweep_interval_ms: 30 * 1_000,
            fanout_buffer: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.active_timeout_ms, 1_200_000);
        assert_eq!(config.assigned_timeout_ms, 3_600_000);
    }
}
