// =====================================================================================
// File: core-escalation/src/engine.rs
// Description: Escalation protocol execution under hard response deadlines
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{
    adapters::{
        with_retry, ContactNotification, ContactNotifier, EmergencyDispatchRequest,
        EmergencyServicesAdapter, Lifeline988Adapter, LifelineRequest, NotifyChannel,
    },
    contacts::EmergencyContactStore,
    error::{EscalationError, EscalationResult},
    types::{
        ActionRecord, Escalation, EscalationActionKind, EscalationOutcome, EscalationSeverity,
        EscalationTrigger, TriggerOutcome,
    },
    EscalationConfig,
};
use chrono::Utc;
use core_audit::{AuditEventType, AuditOutcome, AuditRecord, AuditSink, MetricEvent, MetricsSink};
use core_matching::{Volunteer, VolunteerRegistry};
use core_session::{SessionError, SessionStore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Specializations that qualify a volunteer as a crisis specialist.
const CRISIS_SPECIALIZATIONS: [&str; 3] = [
    "crisis-intervention",
    "suicide-prevention",
    "emergency-response",
];

/// Text of the encrypted notification fanned out to emergency contacts.
const CONTACT_ALERT_TEXT: &str =
    "SafeHaven crisis alert: someone who trusts you may need support right now. \
     Please reach out to them as soon as you can.";

/// Escalation engine. Adapters, stores, and sinks are constructor-injected;
/// a trigger never lets an adapter failure cross its step boundary.
pub struct EscalationEngine {
    config: EscalationConfig,
    sessions: Arc<SessionStore>,
    registry: Arc<VolunteerRegistry>,
    contacts: Arc<EmergencyContactStore>,
    emergency_services: Arc<dyn EmergencyServicesAdapter>,
    lifeline: Arc<dyn Lifeline988Adapter>,
    notifier: Arc<dyn ContactNotifier>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
    /// At most one open escalation per session
    open: Mutex<HashMap<Uuid, Escalation>>,
    /// Dedup window: trigger hash -> (seen at, escalation id)
    recent_triggers: Mutex<HashMap<String, (Instant, Uuid)>>,
}

impl EscalationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EscalationConfig,
        sessions: Arc<SessionStore>,
        registry: Arc<VolunteerRegistry>,
        contacts: Arc<EmergencyContactStore>,
        emergency_services: Arc<dyn EmergencyServicesAdapter>,
        lifeline: Arc<dyn Lifeline988Adapter>,
        notifier: Arc<dyn ContactNotifier>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            sessions,
            registry,
            contacts,
            emergency_services,
            lifeline,
            notifier,
            audit,
            metrics,
            open: Mutex::new(HashMap::new()),
            recent_triggers: Mutex::new(HashMap::new()),
        }
    }

    fn deadline_ms(&self, severity: EscalationSeverity) -> u64 {
        match severity {
            EscalationSeverity::Moderate => self.config.deadlines.moderate_ms,
            EscalationSeverity::High => self.config.deadlines.high_ms,
            EscalationSeverity::Critical => self.config.deadlines.critical_ms,
            EscalationSeverity::Emergency => self.config.deadlines.emergency_ms,
        }
    }

    /// Execute the escalation protocol for a session. Idempotent per
    /// `(session, trigger)` within the dedup window; repeat triggers on an
    /// escalated session merge into the existing open record.
    pub async fn trigger(
        &self,
        session_id: Uuid,
        trigger: EscalationTrigger,
    ) -> EscalationResult<TriggerOutcome> {
        let started = Instant::now();
        let session = self
            .sessions
            .session(session_id)
            .await
            .map_err(|_| EscalationError::SessionNotFound { session_id })?;
        if session.status.is_terminal() {
            return Err(EscalationError::SessionClosed { session_id });
        }

        let severity = EscalationSeverity::from_trigger(trigger, session.severity);
        let deadline_ms = self.deadline_ms(severity);
        let dedup_window = Duration::from_millis(self.config.dedup_window_ms);

        // Duplicate trigger inside the window: return the merged record
        let hash = dedup_hash(session_id, trigger);
        {
            let mut recent = self.recent_triggers.lock().await;
            recent.retain(|_, entry| entry.0.elapsed() < dedup_window);
            if recent.contains_key(&hash) {
                drop(recent);
                let open = self.open.lock().await;
                if let Some(record) = open.get(&session_id) {
                    info!(%session_id, ?trigger, "escalation trigger deduplicated");
                    return Ok(self.outcome_from(record, true));
                }
            }
        }

        // Open a record or join the session's existing one
        let escalation_id = {
            let mut open = self.open.lock().await;
            match open.get_mut(&session_id) {
                Some(record) => {
                    record.severity = record.severity.max(severity);
                    record.id
                }
                None => {
                    let record = Escalation {
                        id: Uuid::new_v4(),
                        session_id,
                        trigger: trigger.persisted_category(),
                        severity,
                        actions_taken: Vec::new(),
                        emergency_contacted: false,
                        lifeline988_called: false,
                        specialist_assigned: false,
                        response_time_ms: 0,
                        next_steps: Vec::new(),
                        opened_at: Utc::now(),
                        closed_at: None,
                    };
                    let id = record.id;
                    open.insert(session_id, record);
                    id
                }
            }
        };
        self.recent_triggers
            .lock()
            .await
            .insert(hash, (Instant::now(), escalation_id));

        error!(
            %session_id,
            %escalation_id,
            ?trigger,
            ?severity,
            "ESCALATION TRIGGERED"
        );
        self.audit
            .append(AuditRecord::new(
                AuditEventType::EscalationOpened,
                "escalation",
                escalation_id.to_string(),
                "escalation-engine",
                serde_json::json!({
                    "session_id": session_id,
                    "trigger": format!("{:?}", trigger),
                    "persisted_category": format!("{:?}", trigger.persisted_category()),
                    "severity": format!("{:?}", severity),
                }),
                AuditOutcome::Success,
            ))
            .await
            .ok();

        // The session is escalated before the response actions run so the
        // emergency alert reaches subscribers immediately.
        self.sessions
            .mark_escalated(session_id, severity.tag(), escalation_id)
            .await
            .map_err(|e| match e {
                SessionError::AlreadyTerminal { session_id } => {
                    EscalationError::SessionClosed { session_id }
                }
                _ => EscalationError::SessionNotFound { session_id },
            })?;

        let actions = self
            .run_response_actions(session_id, &session.anonymous_id, severity, deadline_ms, started)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        // Merge into the open record and derive the caller-facing outcome
        let outcome = {
            let mut open = self.open.lock().await;
            let record = open
                .get_mut(&session_id)
                .ok_or(EscalationError::SessionNotFound { session_id })?;
            for action in &actions {
                if action.succeeded {
                    match action.action {
                        EscalationActionKind::EmergencyServicesContacted => {
                            record.emergency_contacted = true
                        }
                        EscalationActionKind::Lifeline988Contacted => {
                            record.lifeline988_called = true
                        }
                        EscalationActionKind::CrisisSpecialistAssigned => {
                            record.specialist_assigned = true
                        }
                        EscalationActionKind::EmergencyContactsNotified => {}
                    }
                }
            }
            record.actions_taken.extend(actions.iter().cloned());
            record.response_time_ms = elapsed_ms;
            record.next_steps = derive_next_steps(&record.actions_taken);
            self.outcome_from(record, false)
        };

        for action in &actions {
            self.audit
                .append(AuditRecord::new(
                    AuditEventType::AdapterInvoked,
                    "escalation",
                    escalation_id.to_string(),
                    "escalation-engine",
                    serde_json::json!({
                        "action": format!("{:?}", action.action),
                        "detail": action.detail,
                    }),
                    if action.succeeded {
                        AuditOutcome::Success
                    } else {
                        AuditOutcome::Failure
                    },
                ))
                .await
                .ok();
        }

        let operation = format!("escalation_{:?}", severity).to_lowercase();
        self.metrics
            .record_latency(&operation, elapsed_ms, Some(deadline_ms))
            .await;
        if elapsed_ms > deadline_ms {
            warn!(%session_id, elapsed_ms, deadline_ms, "escalation deadline missed");
            self.audit
                .append(AuditRecord::new(
                    AuditEventType::DeadlineMissed,
                    "escalation",
                    escalation_id.to_string(),
                    "escalation-engine",
                    serde_json::json!({ "elapsed_ms": elapsed_ms, "deadline_ms": deadline_ms }),
                    AuditOutcome::Alert,
                ))
                .await
                .ok();
        }
        self.metrics
            .record_event(
                MetricEvent::new("escalation", "protocol_completed")
                    .with_field("severity", serde_json::json!(format!("{:?}", severity)))
                    .with_field("elapsed_ms", serde_json::json!(elapsed_ms)),
            )
            .await;

        Ok(outcome)
    }

    /// Run the conditional response steps concurrently. Every step resolves
    /// to an action record (success or failure) within its own timeout;
    /// records arrive in completion order.
    async fn run_response_actions(
        &self,
        session_id: Uuid,
        anonymous_id: &str,
        severity: EscalationSeverity,
        deadline_ms: u64,
        started: Instant,
    ) -> Vec<ActionRecord> {
        let step_timeout = Duration::from_millis(self.config.step_timeout_ms.min(deadline_ms));
        let (tx, mut rx) = mpsc::unbounded_channel::<ActionRecord>();
        let mut expected = 0usize;

        if severity == EscalationSeverity::Emergency {
            expected += 1;
            self.spawn_emergency_services_step(session_id, severity, step_timeout, tx.clone());
        }
        if severity >= EscalationSeverity::Critical {
            expected += 1;
            self.spawn_lifeline_step(session_id, severity, step_timeout, tx.clone());
        }
        expected += 1;
        self.spawn_specialist_step(session_id, step_timeout, tx.clone());

        let notifiable = self.contacts.notifiable(anonymous_id).await;
        if !notifiable.is_empty() {
            expected += 1;
            self.spawn_contact_step(session_id, notifiable, step_timeout, tx.clone());
        }
        drop(tx);

        let overall = Duration::from_millis(deadline_ms);
        let mut actions = Vec::with_capacity(expected);
        while actions.len() < expected {
            let remaining = overall.saturating_sub(started.elapsed());
            match timeout(remaining, rx.recv()).await {
                Ok(Some(record)) => actions.push(record),
                Ok(None) => break,
                Err(_) => {
                    warn!(%session_id, "top-level escalation deadline reached with steps outstanding");
                    break;
                }
            }
        }
        actions
    }

    fn spawn_emergency_services_step(
        &self,
        session_id: Uuid,
        severity: EscalationSeverity,
        step_timeout: Duration,
        tx: mpsc::UnboundedSender<ActionRecord>,
    ) {
        let adapter = Arc::clone(&self.emergency_services);
        let retry = self.config.retry.clone();
        tokio::spawn(async move {
            let request = EmergencyDispatchRequest {
                session_id,
                severity,
                location: None,
                language: "en".to_string(),
            };
            let request_id = Uuid::new_v4();
            let result = timeout(
                step_timeout,
                with_retry(&retry, step_timeout, || {
                    adapter.invoke(request.clone(), request_id)
                }),
            )
            .await;
            let _ = tx.send(step_record(
                EscalationActionKind::EmergencyServicesContacted,
                result,
            ));
        });
    }

    fn spawn_lifeline_step(
        &self,
        session_id: Uuid,
        severity: EscalationSeverity,
        step_timeout: Duration,
        tx: mpsc::UnboundedSender<ActionRecord>,
    ) {
        let adapter = Arc::clone(&self.lifeline);
        let retry = self.config.retry.clone();
        tokio::spawn(async move {
            let request = LifelineRequest {
                session_id,
                severity,
                language: "en".to_string(),
            };
            let request_id = Uuid::new_v4();
            let result = timeout(
                step_timeout,
                with_retry(&retry, step_timeout, || {
                    adapter.invoke(request.clone(), request_id)
                }),
            )
            .await;
            let _ = tx.send(step_record(
                EscalationActionKind::Lifeline988Contacted,
                result,
            ));
        });
    }

    fn spawn_specialist_step(
        &self,
        session_id: Uuid,
        step_timeout: Duration,
        tx: mpsc::UnboundedSender<ActionRecord>,
    ) {
        let registry = Arc::clone(&self.registry);
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let result = timeout(
                step_timeout,
                assign_crisis_specialist(registry, sessions, session_id),
            )
            .await;
            let record = match result {
                Ok(Ok(detail)) => ActionRecord {
                    action: EscalationActionKind::CrisisSpecialistAssigned,
                    succeeded: true,
                    detail: Some(detail),
                    completed_at: Utc::now(),
                },
                Ok(Err(e)) => ActionRecord {
                    action: EscalationActionKind::CrisisSpecialistAssigned,
                    succeeded: false,
                    detail: Some(e.to_string()),
                    completed_at: Utc::now(),
                },
                Err(_) => ActionRecord {
                    action: EscalationActionKind::CrisisSpecialistAssigned,
                    succeeded: false,
                    detail: Some("step timed out".to_string()),
                    completed_at: Utc::now(),
                },
            };
            let _ = tx.send(record);
        });
    }

    fn spawn_contact_step(
        &self,
        session_id: Uuid,
        notifiable: Vec<crate::contacts::EmergencyContact>,
        step_timeout: Duration,
        tx: mpsc::UnboundedSender<ActionRecord>,
    ) {
        let notifier = Arc::clone(&self.notifier);
        let sessions = Arc::clone(&self.sessions);
        let retry = self.config.retry.clone();
        tokio::spawn(async move {
            let result = timeout(
                step_timeout,
                notify_contacts(notifier, sessions, session_id, notifiable, retry),
            )
            .await;
            let record = match result {
                Ok(Ok((delivered, total))) => ActionRecord {
                    action: EscalationActionKind::EmergencyContactsNotified,
                    succeeded: delivered > 0,
                    detail: Some(format!("{}/{} contacts notified", delivered, total)),
                    completed_at: Utc::now(),
                },
                Ok(Err(e)) => ActionRecord {
                    action: EscalationActionKind::EmergencyContactsNotified,
                    succeeded: false,
                    detail: Some(e.to_string()),
                    completed_at: Utc::now(),
                },
                Err(_) => ActionRecord {
                    action: EscalationActionKind::EmergencyContactsNotified,
                    succeeded: false,
                    detail: Some("step timed out".to_string()),
                    completed_at: Utc::now(),
                },
            };
            let _ = tx.send(record);
        });
    }

    fn outcome_from(&self, record: &Escalation, deduplicated: bool) -> TriggerOutcome {
        let any_success = record.actions_taken.iter().any(|a| a.succeeded);
        let all_success =
            !record.actions_taken.is_empty() && record.actions_taken.iter().all(|a| a.succeeded);
        let deadline_ms = self.deadline_ms(record.severity);
        TriggerOutcome {
            escalation_id: record.id,
            severity: record.severity,
            actions_taken: record.actions_taken.clone(),
            next_steps: record.next_steps.clone(),
            response_time_ms: record.response_time_ms,
            target_met: record.response_time_ms <= deadline_ms && any_success,
            outcome: if all_success {
                EscalationOutcome::Completed
            } else {
                EscalationOutcome::PartialFailure
            },
            deduplicated,
        }
    }

    /// The open escalation for a session, if any.
    pub async fn escalation_for(&self, session_id: Uuid) -> Option<Escalation> {
        self.open.lock().await.get(&session_id).cloned()
    }

    /// Close the session's open escalation, e.g. on final resolution.
    pub async fn close_for_session(&self, session_id: Uuid) -> Option<Escalation> {
        let mut record = self.open.lock().await.remove(&session_id)?;
        record.closed_at = Some(Utc::now());
        self.audit
            .append(AuditRecord::new(
                AuditEventType::EscalationClosed,
                "escalation",
                record.id.to_string(),
                "escalation-engine",
                serde_json::json!({ "session_id": session_id }),
                AuditOutcome::Success,
            ))
            .await
            .ok();
        info!(%session_id, escalation_id = %record.id, "escalation closed");
        Some(record)
    }

    /// Number of escalations currently open.
    pub async fn open_count(&self) -> usize {
        self.open.lock().await.len()
    }
}

fn step_record(
    action: EscalationActionKind,
    result: Result<EscalationResult<crate::adapters::AdapterAck>, tokio::time::error::Elapsed>,
) -> ActionRecord {
    match result {
        Ok(Ok(ack)) if ack.delivered => ActionRecord {
            action,
            succeeded: true,
            detail: ack.reference,
            completed_at: Utc::now(),
        },
        Ok(Ok(ack)) => ActionRecord {
            action,
            succeeded: false,
            detail: ack.error,
            completed_at: Utc::now(),
        },
        Ok(Err(e)) => ActionRecord {
            action,
            succeeded: false,
            detail: Some(e.to_string()),
            completed_at: Utc::now(),
        },
        Err(_) => ActionRecord {
            action,
            succeeded: false,
            detail: Some("step timed out".to_string()),
            completed_at: Utc::now(),
        },
    }
}

/// Assign the best crisis specialist: emergency responders first, then
/// volunteers holding a crisis specialization, lightly loaded and highly
/// rated first. Releases the reserved slot if the attach fails.
async fn assign_crisis_specialist(
    registry: Arc<VolunteerRegistry>,
    sessions: Arc<SessionStore>,
    session_id: Uuid,
) -> EscalationResult<String> {
    let session = sessions
        .session(session_id)
        .await
        .map_err(|_| EscalationError::SessionNotFound { session_id })?;
    if session.responder_id.is_some() {
        return Ok("responder already attached".to_string());
    }

    let mut candidates: Vec<Volunteer> = registry
        .snapshot()
        .await
        .into_iter()
        .filter(|v| {
            v.is_available()
                && v.current_load < 3
                && (v.emergency_responder
                    || CRISIS_SPECIALIZATIONS
                        .iter()
                        .any(|s| v.specializations.contains(*s)))
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.emergency_responder
            .cmp(&a.emergency_responder)
            .then_with(|| a.current_load.cmp(&b.current_load))
            .then_with(|| {
                b.average_rating
                    .partial_cmp(&a.average_rating)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    for candidate in candidates {
        let reservation = match registry.reserve(candidate.id).await {
            Ok(reservation) => reservation,
            Err(_) => continue,
        };
        match sessions.attach_responder(session_id, candidate.id).await {
            Ok(_) => {
                let _ = registry.confirm_attach(reservation.id).await;
                return Ok(format!("specialist {} attached", candidate.id));
            }
            Err(SessionError::AlreadyAttached { .. }) => {
                let _ = registry.release(candidate.id).await;
                return Ok("responder already attached".to_string());
            }
            Err(e) => {
                let _ = registry.release(candidate.id).await;
                return Err(EscalationError::AdapterError {
                    adapter: "specialist-assignment".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
    Err(EscalationError::AdapterError {
        adapter: "specialist-assignment".to_string(),
        message: "no crisis specialist available".to_string(),
    })
}

/// Fan encrypted notifications out to the eligible contacts, highest
/// priority first. Returns `(delivered, total)`.
async fn notify_contacts(
    notifier: Arc<dyn ContactNotifier>,
    sessions: Arc<SessionStore>,
    session_id: Uuid,
    contacts: Vec<crate::contacts::EmergencyContact>,
    retry: crate::adapters::RetryPolicy,
) -> EscalationResult<(usize, usize)> {
    let encrypted = sessions
        .encrypt_message(session_id, CONTACT_ALERT_TEXT.as_bytes())
        .await
        .map_err(|e| EscalationError::CryptoError {
            message: e.to_string(),
        })?;

    let total = contacts.len();
    let mut delivered = 0usize;
    for contact in contacts {
        let notification = ContactNotification {
            contact_id: contact.id,
            channel: NotifyChannel::Sms,
            encrypted_message: encrypted.ciphertext.clone(),
        };
        let request_id = Uuid::new_v4();
        let attempt = with_retry(&retry, Duration::from_millis(2_000), || {
            notifier.invoke(notification.clone(), request_id)
        })
        .await;
        match attempt {
            Ok(ack) if ack.delivered => delivered += 1,
            Ok(_) | Err(_) => {
                warn!(contact_id = %contact.id, "emergency contact notification failed")
            }
        }
    }
    Ok((delivered, total))
}

/// Human-readable next steps derived from the latest outcome per action.
fn derive_next_steps(actions: &[ActionRecord]) -> Vec<String> {
    let mut latest: HashMap<EscalationActionKind, bool> = HashMap::new();
    for action in actions {
        latest.insert(action.action, action.succeeded);
    }

    let mut steps = Vec::new();
    for (kind, succeeded) in [
        EscalationActionKind::EmergencyServicesContacted,
        EscalationActionKind::Lifeline988Contacted,
        EscalationActionKind::CrisisSpecialistAssigned,
        EscalationActionKind::EmergencyContactsNotified,
    ]
    .iter()
    .filter_map(|k| latest.get(k).map(|s| (*k, *s)))
    {
        steps.push(next_step_text(kind, succeeded).to_string());
    }
    steps
}

fn next_step_text(kind: EscalationActionKind, succeeded: bool) -> &'static str {
    match (kind, succeeded) {
        (EscalationActionKind::EmergencyServicesContacted, true) => {
            "Emergency services have been notified and are responding"
        }
        (EscalationActionKind::EmergencyServicesContacted, false) => {
            "If you are in immediate danger, call 911 now"
        }
        (EscalationActionKind::Lifeline988Contacted, true) => {
            "988 Suicide & Crisis Lifeline has been notified"
        }
        (EscalationActionKind::Lifeline988Contacted, false) => {
            "Please call the 988 Suicide & Crisis Lifeline directly by dialing 988"
        }
        (EscalationActionKind::CrisisSpecialistAssigned, true) => {
            "A crisis specialist has joined your session"
        }
        (EscalationActionKind::CrisisSpecialistAssigned, false) => {
            "A crisis specialist will join you as soon as one becomes available"
        }
        (EscalationActionKind::EmergencyContactsNotified, true) => {
            "Your emergency contacts have been notified"
        }
        (EscalationActionKind::EmergencyContactsNotified, false) => {
            "We could not reach your emergency contacts"
        }
    }
}

fn dedup_hash(session_id: Uuid, trigger: EscalationTrigger) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(format!("{:?}", trigger).as_bytes());
    hex::encode(hasher.finalize())
}
