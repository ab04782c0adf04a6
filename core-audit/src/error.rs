// =====================================================================================
// File: core-audit/src/error.rs
// Description: Error types for the audit subsystem
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use thiserror::Error;
use serde::{Deserialize, Serialize};

/// Result type alias for audit operations
pub type AuditResult<T> = Result<T, AuditError>;

/// Error types for audit and metrics operations
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum AuditError {
    /// The sink is unavailable; records are being buffered
    #[error("Audit sink unavailable: {message}")]
    SinkUnavailable { message: String },

    /// Serialization of record details failed
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    /// Query for records could not be satisfied
    #[error("Query error: {message}")]
    QueryError { message: String },
}
