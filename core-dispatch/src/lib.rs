// =====================================================================================
// File: core-dispatch/src/lib.rs
// Description: Crisis dispatch orchestrator and public operations
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Dispatch Module
//!
//! The dispatch core wires the SafeHaven crisis subsystems together and
//! exposes the platform's public operations: open a session, post an
//! encrypted message, request an escalation, attach a volunteer, resolve a
//! session, subscribe to the session stream, and read platform stats.
//!
//! An inbound message flows: decrypt → risk assessment → append → volunteer
//! matching → escalation when thresholds are crossed, with every state
//! change recorded through the audit and metrics sinks.

pub mod error;
pub mod ratelimit;
pub mod service;
pub mod types;

pub use error::{DispatchError, DispatchResult};
pub use ratelimit::SessionRateLimiter;
pub use service::DispatchService;
pub use types::{
    AttachVolunteerResponse, CrisisStats, OpenSessionRequest, OpenSessionResponse,
    PostMessageRequest, PostMessageResponse, ResolutionOutcome, ResolveSessionRequest,
};

use core_audit::AuditConfig;
use core_escalation::EscalationConfig;
use core_matching::MatcherConfig;
use core_session::SessionConfig;
use core_triage::TriageConfig;
use serde::{Deserialize, Serialize};

/// Rate limiting for session opening, per anonymous id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub open_session_limit: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            open_session_limit: 5,
            window_seconds: 60,
        }
    }
}

/// Aggregated platform configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub triage: TriageConfig,
    pub matcher: MatcherConfig,
    pub session: SessionConfig,
    pub escalation: EscalationConfig,
    pub audit: AuditConfig,
    pub rate_limit: RateLimitConfig,
    pub ws_base_url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            triage: TriageConfig::default(),
            matcher: MatcherConfig::default(),
            session: SessionConfig::default(),
            escalation: EscalationConfig::default(),
            audit: AuditConfig::default(),
            rate_limit: RateLimitConfig::default(),
            ws_base_url: "wss://sessions.safehaven.example/ws".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Layered load: built-in defaults, then an optional file, then
    /// `SAFEHAVEN__`-prefixed environment variables.
    pub fn load(file: Option<&str>) -> DispatchResult<Self> {
        let defaults =
            config::Config::try_from(&DispatchConfig::default()).map_err(config_err)?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SAFEHAVEN").separator("__"),
        );
        builder
            .build()
            .map_err(config_err)?
            .try_deserialize()
            .map_err(config_err)
    }
}

fn config_err(e: config::ConfigError) -> DispatchError {
    DispatchError::Configuration {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_config_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.matcher.emergency_target_ms, 2_000);
        assert_eq!(config.escalation.deadlines.emergency_ms, 30_000);
        assert_eq!(config.rate_limit.open_session_limit, 5);
    }

    #[test]
    fn test_config_load_without_file() {
        let config = DispatchConfig::load(None).unwrap();
        assert_eq!(config.session.active_timeout_ms, 1_200_000);
        assert_eq!(config.matcher.min_score, 0.6);
    }
}
