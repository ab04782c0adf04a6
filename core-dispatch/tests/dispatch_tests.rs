// =====================================================================================
// File: core-dispatch/tests/dispatch_tests.rs
// Description: End-to-end tests for the crisis dispatch flow
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use core_dispatch::{
    DispatchConfig, DispatchError, DispatchService, OpenSessionRequest, OpenSessionResponse,
    PostMessageRequest, ResolutionOutcome, ResolveSessionRequest,
};
use core_escalation::{
    EscalationActionKind, EscalationTrigger, StubContactNotifier, StubEmergencyServices,
    StubLifeline988,
};
use core_matching::{StaticDirectory, Volunteer, VolunteerStatus};
use core_session::{SessionCipher, SessionFrame, SessionStatus};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn volunteer(load: u32, max: u32, rating: f64, rate: f64) -> Volunteer {
    Volunteer {
        id: Uuid::new_v4(),
        anonymous_id: format!("vol-{}", Uuid::new_v4()),
        status: VolunteerStatus::Active,
        is_active: true,
        specializations: HashSet::new(),
        languages: ["en".to_string()].into_iter().collect(),
        current_load: load,
        max_concurrent: max,
        average_rating: rating,
        response_rate: rate,
        emergency_responder: false,
        burnout_score: 0.1,
        priority_score: 0.5,
        last_active_at: chrono::Utc::now(),
    }
}

fn emergency_specialist() -> Volunteer {
    let mut v = volunteer(0, 3, 4.9, 0.95);
    v.emergency_responder = true;
    v.priority_score = 0.95;
    v.specializations
        .insert("crisis-intervention".to_string());
    v
}

async fn service_with(
    config: DispatchConfig,
    volunteers: Vec<Volunteer>,
) -> (DispatchService, Arc<StaticDirectory>) {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let directory = Arc::new(StaticDirectory::new());
    for v in volunteers {
        directory.upsert(v).await;
    }
    let service = DispatchService::with_adapters(
        config,
        Arc::clone(&directory) as Arc<dyn core_matching::VolunteerDirectory>,
        Arc::new(StubEmergencyServices::new()),
        Arc::new(StubLifeline988::new()),
        Arc::new(StubContactNotifier::new()),
    )
    .unwrap();
    service.start().await;
    (service, directory)
}

async fn open(service: &DispatchService, anonymous_id: &str, severity: u8) -> OpenSessionResponse {
    service
        .open_session(OpenSessionRequest {
            anonymous_id: anonymous_id.to_string(),
            initial_severity: Some(severity),
        })
        .await
        .unwrap()
}

fn encrypt(opened: &OpenSessionResponse, text: &str, client_request_id: &str) -> PostMessageRequest {
    let cipher = SessionCipher::new(&opened.session_key).unwrap();
    let encrypted = cipher.encrypt(text.as_bytes()).unwrap();
    PostMessageRequest {
        ciphertext: encrypted.ciphertext,
        nonce: encrypted.nonce,
        client_request_id: client_request_id.to_string(),
    }
}

#[tokio::test]
async fn test_emergency_keyword_fast_path() {
    let (service, _) = service_with(
        DispatchConfig::default(),
        vec![emergency_specialist(), volunteer(1, 3, 4.5, 0.9)],
    )
    .await;
    let opened = open(&service, "anon-1", 5).await;

    let response = service
        .post_message(
            &opened.session_token,
            encrypt(&opened, "I have a gun and I'm going to use it tonight", "req-1"),
        )
        .await
        .unwrap();

    assert_eq!(response.severity_after, 10);
    assert_eq!(response.risk_level, core_triage::RiskLevel::Emergency);

    let escalation = response.escalation.expect("escalation triggered");
    assert_eq!(
        escalation.severity,
        core_escalation::EscalationSeverity::Emergency
    );
    assert!(escalation.response_time_ms < 30_000);
    assert!(escalation.target_met);
    let kinds: HashSet<EscalationActionKind> =
        escalation.actions_taken.iter().map(|a| a.action).collect();
    assert!(kinds.contains(&EscalationActionKind::EmergencyServicesContacted));
    assert!(kinds.contains(&EscalationActionKind::Lifeline988Contacted));
    assert!(kinds.contains(&EscalationActionKind::CrisisSpecialistAssigned));

    let session = service
        .sessions()
        .session(opened.session_id)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Escalated);
    assert!(session.emergency_triggered);
    assert!(session.responder_id.is_some());
}

#[tokio::test]
async fn test_standard_matcher_prefers_available_volunteer() {
    let v1 = volunteer(2, 3, 4.9, 0.95);
    let v2 = volunteer(0, 2, 4.2, 0.80);
    let v3 = volunteer(1, 3, 4.8, 0.90);
    let v2_id = v2.id;

    let (service, _) = service_with(DispatchConfig::default(), vec![v1, v2, v3]).await;
    let opened = open(&service, "anon-1", 1).await;

    let response = service
        .post_message(
            &opened.session_token,
            encrypt(&opened, "i feel depressed and alone", "req-1"),
        )
        .await
        .unwrap();
    assert!(response.queued.is_none());
    assert!(response.escalation.is_none());

    let session = service
        .sessions()
        .session(opened.session_id)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Assigned);
    assert_eq!(session.responder_id, Some(v2_id));
}

#[tokio::test]
async fn test_idempotent_escalation_requests() {
    let (service, _) = service_with(DispatchConfig::default(), vec![emergency_specialist()]).await;
    let opened = open(&service, "anon-1", 8).await;

    let first = service
        .request_escalation(&opened.session_token, EscalationTrigger::UserRequest)
        .await
        .unwrap();
    let second = service
        .request_escalation(&opened.session_token, EscalationTrigger::UserRequest)
        .await
        .unwrap();

    assert_eq!(first.escalation_id, second.escalation_id);
    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(
        first.actions_taken.len(),
        second.actions_taken.len()
    );

    let stats = service.get_stats().await;
    assert_eq!(stats.open_escalations, 1);
    assert_eq!(stats.escalated_sessions, 1);
}

#[tokio::test]
async fn test_concurrent_posts_are_totally_ordered() {
    let (service, _) = service_with(DispatchConfig::default(), vec![volunteer(0, 3, 4.5, 0.9)]).await;
    let service = Arc::new(service);
    let opened = Arc::new(open(&service, "anon-1", 1).await);
    let mut subscriber = service.subscribe(&opened.session_token).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..2 {
        let service = Arc::clone(&service);
        let opened = Arc::clone(&opened);
        handles.push(tokio::spawn(async move {
            service
                .post_message(
                    &opened.session_token,
                    encrypt(&opened, "doing okay today", &format!("req-{}", i)),
                )
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let messages = service
        .sessions()
        .messages(opened.session_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].timestamp_ns < messages[1].timestamp_ns);

    let mut observed = Vec::new();
    while observed.len() < 2 {
        match subscriber.recv().await.unwrap() {
            SessionFrame::MessageAppended { message } => observed.push(message.timestamp_ns),
            _ => {}
        }
    }
    let stored: Vec<i64> = messages.iter().map(|m| m.timestamp_ns).collect();
    assert_eq!(observed, stored);
}

#[tokio::test]
async fn test_post_message_idempotent_on_client_request_id() {
    let (service, _) = service_with(DispatchConfig::default(), vec![volunteer(0, 3, 4.5, 0.9)]).await;
    let opened = open(&service, "anon-1", 1).await;

    let request = encrypt(&opened, "rough evening", "req-1");
    let first = service
        .post_message(&opened.session_token, request.clone())
        .await
        .unwrap();
    let second = service
        .post_message(&opened.session_token, request)
        .await
        .unwrap();

    assert_eq!(first.message_id, second.message_id);
    assert!(!first.duplicate);
    assert!(second.duplicate);

    let messages = service
        .sessions()
        .messages(opened.session_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_open_session_rate_limited() {
    let mut config = DispatchConfig::default();
    config.rate_limit.open_session_limit = 2;
    let (service, _) = service_with(config, vec![]).await;

    open(&service, "anon-1", 1).await;
    open(&service, "anon-1", 1).await;
    let err = service
        .open_session(OpenSessionRequest {
            anonymous_id: "anon-1".to_string(),
            initial_severity: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::RateLimited { .. }));

    // A different user is unaffected
    open(&service, "anon-2", 1).await;
}

#[tokio::test]
async fn test_degraded_audit_refuses_new_sessions() {
    let (service, _) = service_with(DispatchConfig::default(), vec![volunteer(0, 3, 4.5, 0.9)]).await;
    let opened = open(&service, "anon-1", 1).await;

    service.audit().set_healthy(false);
    let err = service
        .open_session(OpenSessionRequest {
            anonymous_id: "anon-2".to_string(),
            initial_severity: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Unavailable { .. }));

    // Existing sessions continue to work
    let response = service
        .post_message(
            &opened.session_token,
            encrypt(&opened, "still here", "req-1"),
        )
        .await
        .unwrap();
    assert!(response.severity_after >= 1);

    service.audit().set_healthy(true);
    open(&service, "anon-3", 1).await;
}

#[tokio::test]
async fn test_attach_and_resolve_flow() {
    let v = volunteer(0, 2, 4.5, 0.9);
    let v_id = v.id;
    let (service, _) = service_with(DispatchConfig::default(), vec![v]).await;
    let opened = open(&service, "anon-1", 2).await;

    let attached = service
        .attach_volunteer(opened.session_id, v_id)
        .await
        .unwrap();
    assert!(attached.ok);
    assert_eq!(attached.responder_id, v_id);

    // Second explicit attach is rejected
    let err = service
        .attach_volunteer(opened.session_id, v_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Session(core_session::SessionError::AlreadyAttached { .. })
    ));

    service
        .resolve_session(
            &opened.session_token,
            ResolveSessionRequest {
                outcome: ResolutionOutcome::Stabilized,
                notes: "caller reached a safety plan".to_string(),
            },
        )
        .await
        .unwrap();

    let err = service
        .resolve_session(
            &opened.session_token,
            ResolveSessionRequest {
                outcome: ResolutionOutcome::Stabilized,
                notes: String::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Session(core_session::SessionError::AlreadyTerminal { .. })
    ));

    let stats = service.get_stats().await;
    assert_eq!(stats.resolved_sessions, 1);
}

#[tokio::test]
async fn test_unmatched_session_queued_then_assigned() {
    let (service, directory) = service_with(DispatchConfig::default(), vec![]).await;
    let opened = open(&service, "anon-1", 1).await;

    let response = service
        .post_message(
            &opened.session_token,
            encrypt(&opened, "i feel anxious and alone", "req-1"),
        )
        .await
        .unwrap();
    assert!(response.queued.is_some());

    // A volunteer comes online; the queued session must be assigned
    directory.upsert(volunteer(0, 3, 4.5, 0.9)).await;
    service.refresh_volunteers().await.unwrap();

    let mut assigned = false;
    for _ in 0..50 {
        let session = service
            .sessions()
            .session(opened.session_id)
            .await
            .unwrap();
        if session.responder_id.is_some() {
            assert_eq!(session.status, SessionStatus::Assigned);
            assigned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(assigned, "queued session was never assigned");
}

#[tokio::test]
async fn test_tampered_ciphertext_rejected() {
    let (service, _) = service_with(DispatchConfig::default(), vec![]).await;
    let opened = open(&service, "anon-1", 1).await;

    let mut request = encrypt(&opened, "hello", "req-1");
    request.ciphertext[0] ^= 0xff;
    let err = service
        .post_message(&opened.session_token, request)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Session(core_session::SessionError::CryptoError { .. })
    ));

    // The rejected message was not stored
    let messages = service
        .sessions()
        .messages(opened.session_id)
        .await
        .unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn test_unknown_token_rejected() {
    let (service, _) = service_with(DispatchConfig::default(), vec![]).await;
    let err = service
        .post_message(
            "not-a-token",
            PostMessageRequest {
                ciphertext: vec![1, 2, 3],
                nonce: vec![0; 12],
                client_request_id: "req-1".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Session(core_session::SessionError::NotFound)
    ));
}
