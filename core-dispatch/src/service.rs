// =====================================================================================
// File: core-dispatch/src/service.rs
// Description: Dispatch service wiring the crisis subsystems together
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{
    error::{DispatchError, DispatchResult},
    ratelimit::SessionRateLimiter,
    types::{
        AttachVolunteerResponse, CrisisStats, OpenSessionRequest, OpenSessionResponse,
        PostMessageRequest, PostMessageResponse, ResolveSessionRequest,
    },
    DispatchConfig,
};
use core_audit::{
    AuditEventType, AuditOutcome, AuditRecord, AuditSink, InMemoryAuditSink,
    InMemoryMetricsSink, MetricEvent, MetricsSink,
};
use core_escalation::{
    ContactNotifier, EmergencyContactStore, EmergencyServicesAdapter, EscalationEngine,
    EscalationTrigger, Lifeline988Adapter, StubContactNotifier, StubEmergencyServices,
    StubLifeline988,
};
use core_matching::{
    Match, MatchCriteria, MatchError, StaticDirectory, UrgencyLevel, VolunteerDirectory,
    VolunteerMatcher, VolunteerRegistry,
};
use core_session::{
    AppendRequest, EncryptedMessage, SenderType, SessionError, SessionFrame, SessionStatus,
    SessionStore,
};
use core_triage::{AssessmentAction, RiskAssessment, RiskAssessor, RiskLevel, SessionRiskContext};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

/// Dispatch service. Owns the wired subsystem set and exposes the public
/// operations. All collaborators are injected at construction; `new` wires
/// the in-memory defaults.
pub struct DispatchService {
    config: DispatchConfig,
    assessor: RiskAssessor,
    sessions: Arc<SessionStore>,
    registry: Arc<VolunteerRegistry>,
    matcher: Arc<VolunteerMatcher>,
    engine: Arc<EscalationEngine>,
    contacts: Arc<EmergencyContactStore>,
    audit: Arc<InMemoryAuditSink>,
    metrics: Arc<InMemoryMetricsSink>,
    rate_limiter: SessionRateLimiter,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchService {
    /// Wire the service with in-memory defaults and stub adapters.
    pub fn new(config: DispatchConfig) -> DispatchResult<Self> {
        Self::with_adapters(
            config,
            Arc::new(StaticDirectory::new()),
            Arc::new(StubEmergencyServices::new()),
            Arc::new(StubLifeline988::new()),
            Arc::new(StubContactNotifier::new()),
        )
    }

    /// Wire the service with an explicit volunteer directory and adapter set.
    pub fn with_adapters(
        config: DispatchConfig,
        directory: Arc<dyn VolunteerDirectory>,
        emergency_services: Arc<dyn EmergencyServicesAdapter>,
        lifeline: Arc<dyn Lifeline988Adapter>,
        notifier: Arc<dyn ContactNotifier>,
    ) -> DispatchResult<Self> {
        let assessor = RiskAssessor::new(config.triage.clone())?;
        let audit = Arc::new(InMemoryAuditSink::new(config.audit.clone()));
        let metrics = Arc::new(InMemoryMetricsSink::new());
        let sessions = Arc::new(SessionStore::new(config.session.clone()));
        let registry = Arc::new(VolunteerRegistry::new(directory, config.matcher.clone()));
        let matcher = Arc::new(VolunteerMatcher::new(
            Arc::clone(&registry),
            config.matcher.clone(),
        ));
        let contacts = Arc::new(EmergencyContactStore::new()?);
        let engine = Arc::new(EscalationEngine::new(
            config.escalation.clone(),
            Arc::clone(&sessions),
            Arc::clone(&registry),
            Arc::clone(&contacts),
            emergency_services,
            lifeline,
            notifier,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        ));
        let rate_limiter = SessionRateLimiter::new(&config.rate_limit);

        Ok(Self {
            config,
            assessor,
            sessions,
            registry,
            matcher,
            engine,
            contacts,
            audit,
            metrics,
            rate_limiter,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start background workers: registry reaper, inactivity sweeper, and
    /// the wait-queue processor.
    pub async fn start(&self) {
        if let Err(e) = self.registry.refresh().await {
            warn!(error = %e, "initial volunteer refresh failed");
        }
        let mut tasks = self.tasks.lock().await;
        tasks.push(self.registry.start_reaper());
        tasks.push(self.sessions.start_sweeper());
        tasks.push(self.matcher.start_queue_processor());
        info!("dispatch service started");
    }

    /// Stop background workers, reclaim outstanding reservations, and record
    /// the shutdown in the audit trail.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        let reclaimed = self.registry.reap_expired().await;
        self.audit
            .append(AuditRecord::new(
                AuditEventType::SessionStatusChanged,
                "platform",
                "dispatch",
                "system",
                serde_json::json!({ "event": "shutdown", "reservations_reclaimed": reclaimed }),
                AuditOutcome::Success,
            ))
            .await
            .ok();
        info!("dispatch service stopped");
    }

    /// Open a new crisis session. Refused while the audit sink is down;
    /// rate limited per anonymous id.
    pub async fn open_session(
        &self,
        request: OpenSessionRequest,
    ) -> DispatchResult<OpenSessionResponse> {
        request.validate().map_err(validation_err)?;
        if !self.audit.is_healthy() {
            return Err(DispatchError::Unavailable {
                message: "audit sink unavailable; not accepting new sessions".to_string(),
            });
        }
        if let Err(retry_after_seconds) = self.rate_limiter.check(&request.anonymous_id).await {
            return Err(DispatchError::RateLimited {
                retry_after_seconds,
            });
        }

        let opened = self
            .sessions
            .open_session(&request.anonymous_id, request.initial_severity)
            .await?;
        self.audit
            .append(AuditRecord::new(
                AuditEventType::SessionOpened,
                "session",
                opened.session.id.to_string(),
                &request.anonymous_id,
                serde_json::json!({ "severity": opened.session.severity }),
                AuditOutcome::Success,
            ))
            .await
            .ok();
        self.metrics.increment("sessions_opened").await;

        Ok(OpenSessionResponse {
            session_id: opened.session.id,
            ws_url: format!("{}/{}", self.config.ws_base_url, opened.session.id),
            session_token: opened.token,
            session_key: opened.session_key,
        })
    }

    /// Post one encrypted message: decrypt in memory, assess, append,
    /// match a volunteer if none is attached, and escalate when the
    /// assessment crosses the emergency threshold.
    pub async fn post_message(
        &self,
        session_token: &str,
        request: PostMessageRequest,
    ) -> DispatchResult<PostMessageResponse> {
        request.validate().map_err(validation_err)?;
        let started = Instant::now();
        let session_id = self.sessions.resolve_token(session_token).await?;
        let session = self.sessions.session(session_id).await?;
        if session.status.is_terminal() {
            return Err(SessionError::SessionClosed { session_id }.into());
        }

        let encrypted = EncryptedMessage {
            ciphertext: request.ciphertext.clone(),
            nonce: request.nonce.clone(),
        };
        let plaintext = match self.sessions.decrypt_message(session_id, &encrypted).await {
            Ok(plaintext) => plaintext,
            Err(e) => {
                self.audit
                    .append(AuditRecord::new(
                        AuditEventType::IntegrityViolation,
                        "session",
                        session_id.to_string(),
                        "dispatch",
                        serde_json::json!({ "error": e.to_string() }),
                        AuditOutcome::Alert,
                    ))
                    .await
                    .ok();
                self.metrics.increment("crypto_rejections").await;
                return Err(e.into());
            }
        };
        let text = String::from_utf8_lossy(&plaintext);

        let assessment = self
            .assessor
            .assess(&text, &SessionRiskContext::with_severity(session.severity));
        self.metrics
            .record_latency("risk_assessment", assessment.execution_time_ms, Some(50))
            .await;

        let append = self
            .sessions
            .append_message(
                session_id,
                AppendRequest {
                    sender_type: SenderType::AnonymousUser,
                    sender_id: session.anonymous_id.clone(),
                    ciphertext: request.ciphertext,
                    nonce: request.nonce,
                    client_request_id: Some(request.client_request_id),
                    risk_score: Some(assessment.severity),
                    sentiment_score: Some(assessment.sentiment_score),
                    keywords_detected: assessment.keywords_detected.clone(),
                    response_latency_ms: Some(started.elapsed().as_millis() as u64),
                },
            )
            .await?;
        if append.duplicate {
            return Ok(PostMessageResponse {
                message_id: append.message.id,
                severity_after: session.severity,
                risk_level: assessment.risk_level,
                action_suggested: assessment.recommended_actions,
                duplicate: true,
                queued: None,
                escalation: None,
            });
        }

        let (old_severity, new_severity) = self
            .sessions
            .update_severity(session_id, assessment.severity)
            .await?;
        if new_severity.saturating_sub(old_severity) >= self.config.audit.severity_delta_threshold
        {
            self.audit
                .append(AuditRecord::new(
                    AuditEventType::SeverityChanged,
                    "session",
                    session_id.to_string(),
                    "risk-assessor",
                    serde_json::json!({ "from": old_severity, "to": new_severity }),
                    AuditOutcome::Success,
                ))
                .await
                .ok();
            self.metrics
                .record_event(
                    MetricEvent::new("triage", "severity_jump")
                        .with_field("from", serde_json::json!(old_severity))
                        .with_field("to", serde_json::json!(new_severity)),
                )
                .await;
        }

        let queued = self.match_if_unassigned(session_id, &assessment).await?;

        let escalation = if assessment.immediate_risk
            || assessment
                .recommended_actions
                .contains(&AssessmentAction::ImmediateEscalation)
        {
            match self
                .engine
                .trigger(session_id, EscalationTrigger::AutomaticKeyword)
                .await
            {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(%session_id, error = %e, "automatic escalation failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(PostMessageResponse {
            message_id: append.message.id,
            severity_after: new_severity,
            risk_level: assessment.risk_level,
            action_suggested: assessment.recommended_actions,
            duplicate: false,
            queued,
            escalation,
        })
    }

    /// Match and attach a volunteer when the session has no responder.
    /// Returns queueing info when no candidate is available.
    async fn match_if_unassigned(
        &self,
        session_id: Uuid,
        assessment: &RiskAssessment,
    ) -> DispatchResult<Option<core_matching::EnqueueOutcome>> {
        let session = self.sessions.session(session_id).await?;
        if session.responder_id.is_some() || session.status != SessionStatus::Active {
            return Ok(None);
        }

        let criteria = MatchCriteria {
            severity: assessment.severity,
            keywords: assessment.keywords_detected.clone(),
            urgency: urgency_for(assessment.risk_level),
            languages: None,
            specializations: None,
        };
        let is_emergency =
            assessment.immediate_risk || assessment.risk_level == RiskLevel::Emergency;

        match self.matcher.find_best_match(&criteria, is_emergency).await? {
            Some(matched) => {
                let operation = if is_emergency {
                    "match_emergency"
                } else {
                    "match_standard"
                };
                let target = if is_emergency {
                    self.config.matcher.emergency_target_ms
                } else {
                    self.config.matcher.standard_target_ms
                };
                self.metrics
                    .record_latency(operation, matched.elapsed_ms, Some(target))
                    .await;
                self.attach_match(session_id, &matched).await;
                Ok(None)
            }
            None => {
                let (outcome, rx) = self.matcher.enqueue(session_id, criteria).await;
                let sessions = Arc::clone(&self.sessions);
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    if let Ok(matched) = rx.await {
                        match sessions
                            .attach_responder(session_id, matched.volunteer_id)
                            .await
                        {
                            Ok(_) => {
                                let _ = registry.confirm_attach(matched.reservation.id).await;
                            }
                            Err(_) => {
                                let _ = registry.release(matched.volunteer_id).await;
                            }
                        }
                    }
                });
                Ok(Some(outcome))
            }
        }
    }

    async fn attach_match(&self, session_id: Uuid, matched: &Match) {
        match self
            .sessions
            .attach_responder(session_id, matched.volunteer_id)
            .await
        {
            Ok(_) => {
                let _ = self.registry.confirm_attach(matched.reservation.id).await;
                self.audit
                    .append(AuditRecord::new(
                        AuditEventType::VolunteerReserved,
                        "volunteer",
                        matched.volunteer_id.to_string(),
                        "matcher",
                        serde_json::json!({
                            "session_id": session_id,
                            "score": matched.score,
                            "emergency_path": matched.emergency_path,
                        }),
                        AuditOutcome::Success,
                    ))
                    .await
                    .ok();
            }
            Err(e) => {
                warn!(%session_id, error = %e, "attach after match failed; releasing slot");
                let _ = self.registry.release(matched.volunteer_id).await;
            }
        }
    }

    /// Run the escalation protocol for a session.
    pub async fn request_escalation(
        &self,
        session_token: &str,
        trigger: EscalationTrigger,
    ) -> DispatchResult<core_escalation::TriggerOutcome> {
        let session_id = self.sessions.resolve_token(session_token).await?;
        Ok(self.engine.trigger(session_id, trigger).await?)
    }

    /// Attach a specific volunteer to a session, reserving a slot first.
    pub async fn attach_volunteer(
        &self,
        session_id: Uuid,
        volunteer_id: Uuid,
    ) -> DispatchResult<AttachVolunteerResponse> {
        let reservation = match self.registry.reserve(volunteer_id).await {
            Ok(reservation) => reservation,
            Err(MatchError::ReservationConflict { .. }) | Err(MatchError::NotFound { .. }) => {
                return Err(DispatchError::Unavailable {
                    message: format!("volunteer {} is not available", volunteer_id),
                })
            }
            Err(e) => return Err(e.into()),
        };

        match self.sessions.attach_responder(session_id, volunteer_id).await {
            Ok(session) => {
                let _ = self.registry.confirm_attach(reservation.id).await;
                self.audit
                    .append(AuditRecord::new(
                        AuditEventType::VolunteerReserved,
                        "volunteer",
                        volunteer_id.to_string(),
                        "dispatch",
                        serde_json::json!({ "session_id": session_id }),
                        AuditOutcome::Success,
                    ))
                    .await
                    .ok();
                Ok(AttachVolunteerResponse {
                    ok: true,
                    responder_id: session.responder_id.unwrap_or(volunteer_id),
                })
            }
            Err(e) => {
                let _ = self.registry.release(volunteer_id).await;
                Err(e.into())
            }
        }
    }

    /// Final resolution by a responder. Releases the responder's slot and
    /// closes any open escalation.
    pub async fn resolve_session(
        &self,
        session_token: &str,
        request: ResolveSessionRequest,
    ) -> DispatchResult<()> {
        request.validate().map_err(validation_err)?;
        let session_id = self.sessions.resolve_token(session_token).await?;
        let resolved = self.sessions.resolve(session_id).await?;

        if let Some(responder_id) = resolved.responder_id {
            if let Err(e) = self.registry.release(responder_id).await {
                warn!(%responder_id, error = %e, "release on resolve failed");
            } else {
                self.audit
                    .append(AuditRecord::new(
                        AuditEventType::VolunteerReleased,
                        "volunteer",
                        responder_id.to_string(),
                        "dispatch",
                        serde_json::json!({ "session_id": session_id }),
                        AuditOutcome::Success,
                    ))
                    .await
                    .ok();
            }
        }
        self.engine.close_for_session(session_id).await;

        self.audit
            .append(AuditRecord::new(
                AuditEventType::SessionStatusChanged,
                "session",
                session_id.to_string(),
                "responder",
                serde_json::json!({
                    "status": "resolved",
                    "outcome": format!("{:?}", request.outcome),
                    "notes": request.notes,
                }),
                AuditOutcome::Success,
            ))
            .await
            .ok();
        self.metrics.increment("sessions_resolved").await;
        Ok(())
    }

    /// Subscribe to a session's fan-out stream.
    pub async fn subscribe(
        &self,
        session_token: &str,
    ) -> DispatchResult<broadcast::Receiver<SessionFrame>> {
        let session_id = self.sessions.resolve_token(session_token).await?;
        Ok(self.sessions.subscribe(session_id).await?)
    }

    /// Platform statistics snapshot.
    pub async fn get_stats(&self) -> CrisisStats {
        let counts = self.sessions.counts_by_status().await;
        CrisisStats {
            active_sessions: counts.get(&SessionStatus::Active).copied().unwrap_or(0),
            assigned_sessions: counts.get(&SessionStatus::Assigned).copied().unwrap_or(0),
            escalated_sessions: counts.get(&SessionStatus::Escalated).copied().unwrap_or(0),
            resolved_sessions: counts.get(&SessionStatus::Resolved).copied().unwrap_or(0),
            abandoned_sessions: counts.get(&SessionStatus::Abandoned).copied().unwrap_or(0),
            open_escalations: self.engine.open_count().await,
            queued_sessions: self.matcher.queued_len().await,
            audit_records: self.audit.appended_count().await,
            audit_overflow: self.audit.overflow_count(),
            metrics: self.metrics.snapshot().await,
        }
    }

    /// Force a volunteer registry refresh.
    pub async fn refresh_volunteers(&self) -> DispatchResult<usize> {
        Ok(self.registry.refresh().await?)
    }

    /// Emergency contact registry handle.
    pub fn contacts(&self) -> Arc<EmergencyContactStore> {
        Arc::clone(&self.contacts)
    }

    /// Audit sink handle, for health management.
    pub fn audit(&self) -> Arc<InMemoryAuditSink> {
        Arc::clone(&self.audit)
    }

    /// Session store handle.
    pub fn sessions(&self) -> Arc<SessionStore> {
        Arc::clone(&self.sessions)
    }
}

fn urgency_for(level: RiskLevel) -> UrgencyLevel {
    match level {
        RiskLevel::Low => UrgencyLevel::Low,
        RiskLevel::Moderate => UrgencyLevel::Normal,
        RiskLevel::High => UrgencyLevel::High,
        RiskLevel::Critical | RiskLevel::Emergency => UrgencyLevel::Critical,
    }
}

fn validation_err(e: validator::ValidationErrors) -> DispatchError {
    DispatchError::Validation {
        message: e.to_string(),
    }
}
