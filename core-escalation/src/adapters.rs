// =====================================================================================
// File: core-escalation/src/adapters.rs
// Description: External adapter contracts with retry and backoff semantics
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{
    error::{EscalationError, EscalationResult},
    types::EscalationSeverity,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Retry policy for adapter invocations: bounded attempts with exponential
/// backoff and jitter, always capped by the step deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

/// Run an adapter operation under the retry policy. Gives up when attempts
/// are exhausted or the step deadline would be exceeded.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    step_deadline: Duration,
    mut op: F,
) -> EscalationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EscalationResult<T>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= policy.max_attempts || started.elapsed() >= step_deadline {
                    return Err(e);
                }
                let backoff = policy
                    .base_backoff_ms
                    .saturating_mul(1 << (attempt - 1))
                    .min(policy.max_backoff_ms);
                let jitter = fastrand::u64(0..=backoff / 2);
                let remaining = step_deadline.saturating_sub(started.elapsed());
                let delay = Duration::from_millis(backoff + jitter).min(remaining);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying adapter call");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Acknowledgement from an external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterAck {
    pub delivered: bool,
    pub reference: Option<String>,
    pub error: Option<String>,
}

/// Emergency services dispatch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyDispatchRequest {
    pub session_id: Uuid,
    pub severity: EscalationSeverity,
    pub location: Option<String>,
    pub language: String,
}

/// 988 lifeline notification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifelineRequest {
    pub session_id: Uuid,
    pub severity: EscalationSeverity,
    pub language: String,
}

/// Notification channel for emergency contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyChannel {
    Sms,
    Voice,
    Email,
}

/// Encrypted notification to one emergency contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactNotification {
    pub contact_id: Uuid,
    pub channel: NotifyChannel,
    pub encrypted_message: Vec<u8>,
}

/// Emergency services adapter. Must be idempotent on session id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmergencyServicesAdapter: Send + Sync {
    async fn invoke(
        &self,
        request: EmergencyDispatchRequest,
        request_id: Uuid,
    ) -> EscalationResult<AdapterAck>;
}

/// 988 Suicide & Crisis Lifeline adapter. Must be idempotent on session id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Lifeline988Adapter: Send + Sync {
    async fn invoke(
        &self,
        request: LifelineRequest,
        request_id: Uuid,
    ) -> EscalationResult<AdapterAck>;
}

/// Emergency contact notifier (SMS, voice, email).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContactNotifier: Send + Sync {
    async fn invoke(
        &self,
        notification: ContactNotification,
        request_id: Uuid,
    ) -> EscalationResult<AdapterAck>;
}

/// In-memory emergency services stub. Tracks dispatched sessions so repeat
/// invocations return the original reference.
pub struct StubEmergencyServices {
    should_fail: AtomicBool,
    dispatched: Mutex<HashMap<Uuid, String>>,
    calls: AtomicU32,
}

impl StubEmergencyServices {
    pub fn new() -> Self {
        Self {
            should_fail: AtomicBool::new(false),
            dispatched: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubEmergencyServices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmergencyServicesAdapter for StubEmergencyServices {
    async fn invoke(
        &self,
        request: EmergencyDispatchRequest,
        _request_id: Uuid,
    ) -> EscalationResult<AdapterAck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(EscalationError::AdapterError {
                adapter: "emergency-services".to_string(),
                message: "dispatch center unreachable".to_string(),
            });
        }
        let mut dispatched = self.dispatched.lock().await;
        let reference = dispatched
            .entry(request.session_id)
            .or_insert_with(|| format!("dispatch-{}", Uuid::new_v4()))
            .clone();
        Ok(AdapterAck {
            delivered: true,
            reference: Some(reference),
            error: None,
        })
    }
}

/// In-memory 988 lifeline stub with the same idempotency behavior.
pub struct StubLifeline988 {
    should_fail: AtomicBool,
    notified: Mutex<HashMap<Uuid, String>>,
    calls: AtomicU32,
}

impl StubLifeline988 {
    pub fn new() -> Self {
        Self {
            should_fail: AtomicBool::new(false),
            notified: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubLifeline988 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Lifeline988Adapter for StubLifeline988 {
    async fn invoke(
        &self,
        request: LifelineRequest,
        _request_id: Uuid,
    ) -> EscalationResult<AdapterAck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(EscalationError::AdapterError {
                adapter: "988-lifeline".to_string(),
                message: "lifeline gateway unreachable".to_string(),
            });
        }
        let mut notified = self.notified.lock().await;
        let reference = notified
            .entry(request.session_id)
            .or_insert_with(|| format!("988-{}", Uuid::new_v4()))
            .clone();
        Ok(AdapterAck {
            delivered: true,
            reference: Some(reference),
            error: None,
        })
    }
}

/// In-memory contact notifier stub. Records accepted notifications.
pub struct StubContactNotifier {
    should_fail: AtomicBool,
    accepted: Mutex<Vec<ContactNotification>>,
}

impl StubContactNotifier {
    pub fn new() -> Self {
        Self {
            should_fail: AtomicBool::new(false),
            accepted: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    pub async fn accepted(&self) -> Vec<ContactNotification> {
        self.accepted.lock().await.clone()
    }
}

impl Default for StubContactNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContactNotifier for StubContactNotifier {
    async fn invoke(
        &self,
        notification: ContactNotification,
        _request_id: Uuid,
    ) -> EscalationResult<AdapterAck> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(EscalationError::AdapterError {
                adapter: "contact-notifier".to_string(),
                message: "provider rejected the notification".to_string(),
            });
        }
        self.accepted.lock().await.push(notification);
        Ok(AdapterAck {
            delivered: true,
            reference: Some(format!("notify-{}", Uuid::new_v4())),
            error: None,
        })
    }
}

/// Webhook-backed 988 lifeline adapter for live deployments. Posts the
/// request as JSON; the gateway is expected to deduplicate on session id.
pub struct HttpLifeline988Adapter {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpLifeline988Adapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct LifelineWirePayload<'a> {
    request_id: Uuid,
    #[serde(flatten)]
    request: &'a LifelineRequest,
}

#[derive(Deserialize)]
struct LifelineWireAck {
    dispatched: bool,
    reference: Option<String>,
    error: Option<String>,
}

#[async_trait]
impl Lifeline988Adapter for HttpLifeline988Adapter {
    async fn invoke(
        &self,
        request: LifelineRequest,
        request_id: Uuid,
    ) -> EscalationResult<AdapterAck> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&LifelineWirePayload {
                request_id,
                request: &request,
            })
            .send()
            .await
            .map_err(|e| EscalationError::AdapterError {
                adapter: "988-lifeline".to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "lifeline gateway returned an error status");
            return Err(EscalationError::AdapterError {
                adapter: "988-lifeline".to_string(),
                message: format!("gateway status {}", response.status()),
            });
        }

        let ack: LifelineWireAck =
            response
                .json()
                .await
                .map_err(|e| EscalationError::AdapterError {
                    adapter: "988-lifeline".to_string(),
                    message: format!("malformed gateway response: {}", e),
                })?;
        Ok(AdapterAck {
            delivered: ack.dispatched,
            reference: ack.reference,
            error: ack.error,
        })
    }
}
