// =====================================================================================
// File: core-triage/src/error.rs
// Description: Error types for triage configuration
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use thiserror::Error;
use serde::{Deserialize, Serialize};

/// Result type alias for triage operations
pub type TriageResult<T> = Result<T, TriageError>;

/// Error types for triage configuration. Classification itself never fails;
/// these only occur while building an assessor from configuration.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum TriageError {
    /// A lexicon entry is malformed
    #[error("Lexicon error: {message}")]
    LexiconError { message: String },

    /// A threshold configuration is inconsistent
    #[error("Threshold error: {message}")]
    ThresholdError { message: String },
}
