// =====================================================================================
// File: core-session/src/store.rs
// Description: Session store with per-session critical sections and fan-out
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{
    crypto::{mint_token, EncryptedMessage, SessionCipher},
    error::{SessionError, SessionResult},
    types::{EscalationTag, Message, SenderType, Session, SessionFrame, SessionStatus},
    SessionConfig,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A freshly opened session with its token and key material. The key is
/// handed to the transport layer for client-side encryption and never
/// persisted outside the store.
pub struct OpenedSession {
    pub session: Session,
    pub token: String,
    pub session_key: Vec<u8>,
}

/// Append request for one encrypted message.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub sender_type: SenderType,
    pub sender_id: String,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub client_request_id: Option<String>,
    pub risk_score: Option<u8>,
    pub sentiment_score: Option<f64>,
    pub keywords_detected: Vec<String>,
    pub response_latency_ms: Option<u64>,
}

impl AppendRequest {
    pub fn new(sender_type: SenderType, sender_id: &str, encrypted: EncryptedMessage) -> Self {
        Self {
            sender_type,
            sender_id: sender_id.to_string(),
            ciphertext: encrypted.ciphertext,
            nonce: encrypted.nonce,
            client_request_id: None,
            risk_score: None,
            sentiment_score: None,
            keywords_detected: Vec::new(),
            response_latency_ms: None,
        }
    }
}

/// Result of an append. `duplicate` marks an idempotent replay: the message
/// is the one stored by the original request.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub message: Message,
    pub duplicate: bool,
}

struct SessionEntry {
    session: Session,
    cipher: SessionCipher,
    session_key: Vec<u8>,
    messages: Vec<Message>,
    /// (sender_id, client_request_id) -> message id
    idempotency: HashMap<(String, String), Uuid>,
    fanout: broadcast::Sender<SessionFrame>,
    last_timestamp_ns: i64,
}

impl SessionEntry {
    fn publish(&self, frame: SessionFrame) {
        // No receivers is fine; frames are best-effort to live subscribers
        let _ = self.fanout.send(frame);
    }
}

/// Session store. All transitions for one session serialize on that
/// session's entry lock; there is no global lock on the hot path.
pub struct SessionStore {
    config: SessionConfig,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<SessionEntry>>>>,
    tokens: RwLock<HashMap<String, Uuid>>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    async fn entry(&self, session_id: Uuid) -> SessionResult<Arc<Mutex<SessionEntry>>> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    /// Open a new session with a fresh key and opaque token.
    pub async fn open_session(
        &self,
        anonymous_id: &str,
        initial_severity: Option<u8>,
    ) -> SessionResult<OpenedSession> {
        let session_key = SessionCipher::generate_key()?;
        let cipher = SessionCipher::new(&session_key)?;
        let token = mint_token()?;

        let session = Session {
            id: Uuid::new_v4(),
            anonymous_id: anonymous_id.to_string(),
            status: SessionStatus::Active,
            severity: initial_severity.unwrap_or(1).clamp(1, 10),
            responder_id: None,
            started_at: Utc::now(),
            ended_at: None,
            emergency_triggered: false,
            escalation_type: None,
            escalated_at: None,
            last_message_at: None,
            message_count: 0,
        };

        let (fanout, _) = broadcast::channel(self.config.fanout_buffer);
        let entry = SessionEntry {
            session: session.clone(),
            cipher,
            session_key: session_key.clone(),
            messages: Vec::new(),
            idempotency: HashMap::new(),
            fanout,
            last_timestamp_ns: 0,
        };

        self.sessions
            .write()
            .await
            .insert(session.id, Arc::new(Mutex::new(entry)));
        self.tokens.write().await.insert(token.clone(), session.id);

        info!(session_id = %session.id, severity = session.severity, "session opened");
        Ok(OpenedSession {
            session,
            token,
            session_key,
        })
    }

    /// Resolve an opaque session token.
    pub async fn resolve_token(&self, token: &str) -> SessionResult<Uuid> {
        self.tokens
            .read()
            .await
            .get(token)
            .copied()
            .ok_or(SessionError::NotFound)
    }

    /// Snapshot of one session.
    pub async fn session(&self, session_id: Uuid) -> SessionResult<Session> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        Ok(guard.session.clone())
    }

    /// Session key material, for transport-layer key delivery.
    pub async fn session_key(&self, session_id: Uuid) -> SessionResult<Vec<u8>> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        Ok(guard.session_key.clone())
    }

    /// Decrypt a message body in memory. Plaintext is never stored.
    pub async fn decrypt_message(
        &self,
        session_id: Uuid,
        encrypted: &EncryptedMessage,
    ) -> SessionResult<Vec<u8>> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        guard.cipher.decrypt(encrypted)
    }

    /// Encrypt a body with the session key, for system-authored messages.
    pub async fn encrypt_message(
        &self,
        session_id: Uuid,
        plaintext: &[u8],
    ) -> SessionResult<EncryptedMessage> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        guard.cipher.encrypt(plaintext)
    }

    /// Append a message. Assigns the session's next strictly-increasing
    /// timestamp, deduplicates on `(sender_id, client_request_id)`, and fans
    /// the message out to subscribers in append order.
    pub async fn append_message(
        &self,
        session_id: Uuid,
        request: AppendRequest,
    ) -> SessionResult<AppendOutcome> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;

        if guard.session.status.is_terminal() {
            return Err(SessionError::SessionClosed { session_id });
        }

        if let Some(client_request_id) = &request.client_request_id {
            let key = (request.sender_id.clone(), client_request_id.clone());
            if let Some(existing_id) = guard.idempotency.get(&key) {
                let existing = guard
                    .messages
                    .iter()
                    .find(|m| m.id == *existing_id)
                    .cloned();
                if let Some(existing) = existing {
                    if existing.ciphertext == request.ciphertext {
                        debug!(%session_id, %client_request_id, "idempotent replay");
                        return Ok(AppendOutcome {
                            message: existing,
                            duplicate: true,
                        });
                    }
                    return Err(SessionError::DuplicateRequest {
                        client_request_id: client_request_id.clone(),
                    });
                }
            }
        }

        let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let timestamp_ns = now_ns.max(guard.last_timestamp_ns + 1);
        if timestamp_ns <= guard.last_timestamp_ns {
            return Err(SessionError::OrderViolation {
                message: format!(
                    "timestamp {} not after {}",
                    timestamp_ns, guard.last_timestamp_ns
                ),
            });
        }
        guard.last_timestamp_ns = timestamp_ns;

        let message = Message {
            id: Uuid::new_v4(),
            session_id,
            sender_type: request.sender_type,
            sender_id: request.sender_id.clone(),
            timestamp_ns,
            ciphertext: request.ciphertext,
            nonce: request.nonce,
            risk_score: request.risk_score,
            sentiment_score: request.sentiment_score,
            keywords_detected: request.keywords_detected,
            response_latency_ms: request.response_latency_ms,
            client_request_id: request.client_request_id.clone(),
        };

        if let Some(client_request_id) = &request.client_request_id {
            guard.idempotency.insert(
                (request.sender_id.clone(), client_request_id.clone()),
                message.id,
            );
        }

        guard.session.last_message_at = Some(Utc::now());
        guard.session.message_count += 1;
        guard.messages.push(message.clone());
        guard.publish(SessionFrame::MessageAppended {
            message: message.clone(),
        });

        Ok(AppendOutcome {
            message,
            duplicate: false,
        })
    }

    /// Update the session's rolling severity. Returns `(old, new)`.
    pub async fn update_severity(
        &self,
        session_id: Uuid,
        severity: u8,
    ) -> SessionResult<(u8, u8)> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        if guard.session.status.is_terminal() {
            return Err(SessionError::AlreadyTerminal { session_id });
        }
        let old = guard.session.severity;
        guard.session.severity = severity.clamp(1, 10);
        Ok((old, guard.session.severity))
    }

    /// Attach a responder. Active sessions become Assigned; escalated
    /// sessions keep their state and gain the responder.
    pub async fn attach_responder(
        &self,
        session_id: Uuid,
        volunteer_id: Uuid,
    ) -> SessionResult<Session> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;

        if guard.session.status.is_terminal() {
            return Err(SessionError::AlreadyTerminal { session_id });
        }
        if guard.session.responder_id.is_some() {
            return Err(SessionError::AlreadyAttached { session_id });
        }

        guard.session.responder_id = Some(volunteer_id);
        if guard.session.status == SessionStatus::Active {
            guard.session.status = SessionStatus::Assigned;
        }
        guard.publish(SessionFrame::VolunteerJoined { volunteer_id });
        info!(%session_id, %volunteer_id, "responder attached");
        Ok(guard.session.clone())
    }

    /// Detach the responder, returning an assigned session to Active.
    pub async fn detach_responder(&self, session_id: Uuid) -> SessionResult<()> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        if guard.session.status.is_terminal() {
            return Err(SessionError::AlreadyTerminal { session_id });
        }
        guard.session.responder_id = None;
        if guard.session.status == SessionStatus::Assigned {
            guard.session.status = SessionStatus::Active;
        }
        Ok(())
    }

    /// Move a session to Escalated. Idempotent for an already escalated
    /// session; terminal sessions reject the transition.
    pub async fn mark_escalated(
        &self,
        session_id: Uuid,
        tag: EscalationTag,
        escalation_id: Uuid,
    ) -> SessionResult<Session> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;

        if guard.session.status.is_terminal() {
            return Err(SessionError::AlreadyTerminal { session_id });
        }
        if guard.session.status != SessionStatus::Escalated {
            guard.session.status = SessionStatus::Escalated;
            guard.session.escalated_at = Some(Utc::now());
        }
        guard.session.emergency_triggered = true;
        guard.session.escalation_type = Some(tag);
        guard.publish(SessionFrame::EmergencyAlert { escalation_id, tag });
        warn!(%session_id, ?tag, "session escalated");
        Ok(guard.session.clone())
    }

    /// Final resolution by a responder. Terminal and immutable afterwards.
    pub async fn resolve(&self, session_id: Uuid) -> SessionResult<Session> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        if guard.session.status.is_terminal() {
            return Err(SessionError::AlreadyTerminal { session_id });
        }
        guard.session.status = SessionStatus::Resolved;
        guard.session.ended_at = Some(Utc::now());
        info!(%session_id, "session resolved");
        Ok(guard.session.clone())
    }

    /// Subscribe to the session's fan-out stream. Subscribers observe frames
    /// of a single session in append order.
    pub async fn subscribe(
        &self,
        session_id: Uuid,
    ) -> SessionResult<broadcast::Receiver<SessionFrame>> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        Ok(guard.fanout.subscribe())
    }

    /// Push a system notification frame.
    pub async fn notify_system(&self, session_id: Uuid, text: &str) -> SessionResult<()> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        guard.publish(SessionFrame::SystemNotification {
            text: text.to_string(),
        });
        Ok(())
    }

    /// Push a typing indicator frame.
    pub async fn notify_typing(
        &self,
        session_id: Uuid,
        sender_type: SenderType,
    ) -> SessionResult<()> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        guard.publish(SessionFrame::TypingIndicator { sender_type });
        Ok(())
    }

    /// All stored messages for a session, in append order.
    pub async fn messages(&self, session_id: Uuid) -> SessionResult<Vec<Message>> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        Ok(guard.messages.clone())
    }

    /// Abandon sessions whose inactivity window elapsed. Escalated sessions
    /// never time out. Returns the abandoned session ids.
    pub async fn sweep_inactive(&self) -> Vec<Uuid> {
        let entries: Vec<(Uuid, Arc<Mutex<SessionEntry>>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();

        let now = Utc::now();
        let mut abandoned = Vec::new();
        for (session_id, entry) in entries {
            let mut guard = entry.lock().await;
            let timeout_ms = match guard.session.status {
                SessionStatus::Active => self.config.active_timeout_ms,
                SessionStatus::Assigned => self.config.assigned_timeout_ms,
                _ => continue,
            };
            let last_activity = guard
                .session
                .last_message_at
                .unwrap_or(guard.session.started_at);
            let idle_ms = (now - last_activity).num_milliseconds();
            if idle_ms >= 0 && idle_ms as u64 >= timeout_ms {
                guard.session.status = SessionStatus::Abandoned;
                guard.session.ended_at = Some(now);
                info!(%session_id, idle_ms, "session abandoned by inactivity");
                abandoned.push(session_id);
            }
        }
        abandoned
    }

    /// Spawn the inactivity sweeper.
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let interval = Duration::from_millis(store.config.sweep_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.sweep_inactive().await;
            }
        })
    }

    /// Count of sessions per status.
    pub async fn counts_by_status(&self) -> HashMap<SessionStatus, usize> {
        let entries: Vec<Arc<Mutex<SessionEntry>>> =
            self.sessions.read().await.values().cloned().collect();
        let mut counts = HashMap::new();
        for entry in entries {
            let guard = entry.lock().await;
            *counts.entry(guard.session.status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(sender_id: &str, body: &[u8], client_request_id: Option<&str>) -> AppendRequest {
        AppendRequest {
            sender_type: SenderType::AnonymousUser,
            sender_id: sender_id.to_string(),
            ciphertext: body.to_vec(),
            nonce: vec![0u8; 12],
            client_request_id: client_request_id.map(str::to_string),
            risk_score: None,
            sentiment_score: None,
            keywords_detected: Vec::new(),
            response_latency_ms: None,
        }
    }

    async fn store_with_session() -> (Arc<SessionStore>, Uuid, String) {
        let store = Arc::new(SessionStore::new(SessionConfig::default()));
        let opened = store.open_session("anon-1", Some(3)).await.unwrap();
        (store, opened.session.id, opened.token)
    }

    #[tokio::test]
    async fn test_open_and_resolve_token() {
        let (store, session_id, token) = store_with_session().await;
        assert_eq!(store.resolve_token(&token).await.unwrap(), session_id);
        assert!(matches!(
            store.resolve_token("unknown").await.unwrap_err(),
            SessionError::NotFound
        ));

        let session = store.session(session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.severity, 3);
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_timestamps() {
        let (store, session_id, _) = store_with_session().await;
        let a = store
            .append_message(session_id, request("u", b"one", None))
            .await
            .unwrap();
        let b = store
            .append_message(session_id, request("u", b"two", None))
            .await
            .unwrap();
        assert!(b.message.timestamp_ns > a.message.timestamp_ns);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_totally_ordered() {
        let (store, session_id, _) = store_with_session().await;
        let mut subscriber = store.subscribe(session_id).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10u8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append_message(session_id, request("u", &[i], None))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let messages = store.messages(session_id).await.unwrap();
        assert_eq!(messages.len(), 10);
        for pair in messages.windows(2) {
            assert!(pair[0].timestamp_ns < pair[1].timestamp_ns);
        }

        // Subscribers observe the same append order
        let mut seen = Vec::new();
        for _ in 0..10 {
            if let SessionFrame::MessageAppended { message } = subscriber.recv().await.unwrap() {
                seen.push(message.timestamp_ns);
            }
        }
        let stored: Vec<i64> = messages.iter().map(|m| m.timestamp_ns).collect();
        assert_eq!(seen, stored);
    }

    #[tokio::test]
    async fn test_idempotent_append() {
        let (store, session_id, _) = store_with_session().await;
        let first = store
            .append_message(session_id, request("u", b"hello", Some("req-1")))
            .await
            .unwrap();
        assert!(!first.duplicate);

        let replay = store
            .append_message(session_id, request("u", b"hello", Some("req-1")))
            .await
            .unwrap();
        assert!(replay.duplicate);
        assert_eq!(replay.message.id, first.message.id);

        let messages = store.messages(session_id).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_duplicate_rejected() {
        let (store, session_id, _) = store_with_session().await;
        store
            .append_message(session_id, request("u", b"hello", Some("req-1")))
            .await
            .unwrap();
        let err = store
            .append_message(session_id, request("u", b"different", Some("req-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateRequest { .. }));
    }

    #[tokio::test]
    async fn test_terminal_session_rejects_appends() {
        let (store, session_id, _) = store_with_session().await;
        store.resolve(session_id).await.unwrap();
        let err = store
            .append_message(session_id, request("u", b"late", None))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionClosed { .. }));

        let err = store.resolve(session_id).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn test_attach_and_double_attach() {
        let (store, session_id, _) = store_with_session().await;
        let volunteer = Uuid::new_v4();

        let session = store.attach_responder(session_id, volunteer).await.unwrap();
        assert_eq!(session.status, SessionStatus::Assigned);
        assert_eq!(session.responder_id, Some(volunteer));

        let err = store
            .attach_responder(session_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyAttached { .. }));

        store.detach_responder(session_id).await.unwrap();
        let session = store.session(session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.responder_id.is_none());
    }

    #[tokio::test]
    async fn test_escalation_marks_session() {
        let (store, session_id, _) = store_with_session().await;
        let escalation_id = Uuid::new_v4();
        let session = store
            .mark_escalated(session_id, EscalationTag::Emergency, escalation_id)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Escalated);
        assert!(session.emergency_triggered);
        assert_eq!(session.escalation_type, Some(EscalationTag::Emergency));
        assert!(session.escalated_at.is_some());

        // An escalated session can still receive a responder
        let session = store
            .attach_responder(session_id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Escalated);
        assert!(session.responder_id.is_some());
    }

    #[tokio::test]
    async fn test_inactivity_sweep() {
        let config = SessionConfig {
            active_timeout_ms: 10,
            assigned_timeout_ms: 10,
            ..SessionConfig::default()
        };
        let store = Arc::new(SessionStore::new(config));
        let opened = store.open_session("anon-1", None).await.unwrap();
        let escalated = store.open_session("anon-2", None).await.unwrap();
        store
            .mark_escalated(escalated.session.id, EscalationTag::High, Uuid::new_v4())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let abandoned = store.sweep_inactive().await;
        assert_eq!(abandoned, vec![opened.session.id]);

        let session = store.session(opened.session.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Abandoned);
        // Escalated sessions never time out
        let session = store.session(escalated.session.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Escalated);
    }

    #[tokio::test]
    async fn test_notification_frames_delivered_in_order() {
        let (store, session_id, _) = store_with_session().await;
        let mut subscriber = store.subscribe(session_id).await.unwrap();

        store.notify_typing(session_id, SenderType::Volunteer).await.unwrap();
        store.notify_system(session_id, "a volunteer is reviewing your message").await.unwrap();

        assert!(matches!(
            subscriber.recv().await.unwrap(),
            SessionFrame::TypingIndicator {
                sender_type: SenderType::Volunteer
            }
        ));
        assert!(matches!(
            subscriber.recv().await.unwrap(),
            SessionFrame::SystemNotification { .. }
        ));
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_through_store() {
        let (store, session_id, _) = store_with_session().await;
        let encrypted = store
            .encrypt_message(session_id, b"how are you feeling")
            .await
            .unwrap();
        let plaintext = store
            .decrypt_message(session_id, &encrypted)
            .await
            .unwrap();
        assert_eq!(plaintext, b"how are you feeling".to_vec());
    }
}
