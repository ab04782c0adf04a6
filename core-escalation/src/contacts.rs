// =====================================================================================
// File: core-escalation/src/contacts.rs
// Description: Encrypted emergency contact registry with consent gating
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::error::{EscalationError, EscalationResult};
use chrono::{DateTime, Utc};
use core_session::{EncryptedMessage, SessionCipher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Registration request with plaintext fields. Plaintext is encrypted on
/// registration and never stored.
#[derive(Debug, Clone)]
pub struct NewContact {
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    /// 1 is highest priority
    pub priority: u8,
    pub relationship: String,
    pub auto_notify: bool,
    pub crisis_only: bool,
    pub has_consent: bool,
    pub verified: bool,
    pub available_hours: Option<String>,
}

/// Stored emergency contact. Identifying fields are encrypted at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub id: Uuid,
    pub user_id: String,
    pub name: EncryptedMessage,
    pub phone: EncryptedMessage,
    pub email: EncryptedMessage,
    pub priority: u8,
    pub relationship: String,
    pub auto_notify: bool,
    pub crisis_only: bool,
    pub has_consent: bool,
    pub verified: bool,
    pub available_hours: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Emergency contact registry. Enforces the consent invariant: auto-notify
/// requires both consent and verification.
pub struct EmergencyContactStore {
    cipher: SessionCipher,
    contacts: RwLock<HashMap<String, Vec<EmergencyContact>>>,
}

impl EmergencyContactStore {
    pub fn new() -> EscalationResult<Self> {
        let key = SessionCipher::generate_key().map_err(crypto_err)?;
        let cipher = SessionCipher::new(&key).map_err(crypto_err)?;
        Ok(Self {
            cipher,
            contacts: RwLock::new(HashMap::new()),
        })
    }

    /// Register a contact for a user. Rejects auto-notify without consent
    /// and verification.
    pub async fn register(&self, new: NewContact) -> EscalationResult<EmergencyContact> {
        if new.auto_notify && !(new.has_consent && new.verified) {
            return Err(EscalationError::ContactError {
                message: "auto-notify requires consent and verification".to_string(),
            });
        }
        if new.priority == 0 {
            return Err(EscalationError::ContactError {
                message: "priority must be at least 1".to_string(),
            });
        }

        let contact = EmergencyContact {
            id: Uuid::new_v4(),
            user_id: new.user_id.clone(),
            name: self.cipher.encrypt(new.name.as_bytes()).map_err(crypto_err)?,
            phone: self.cipher.encrypt(new.phone.as_bytes()).map_err(crypto_err)?,
            email: self.cipher.encrypt(new.email.as_bytes()).map_err(crypto_err)?,
            priority: new.priority,
            relationship: new.relationship,
            auto_notify: new.auto_notify,
            crisis_only: new.crisis_only,
            has_consent: new.has_consent,
            verified: new.verified,
            available_hours: new.available_hours,
            registered_at: Utc::now(),
        };

        let mut contacts = self.contacts.write().await;
        let list = contacts.entry(new.user_id).or_default();
        list.push(contact.clone());
        list.sort_by_key(|c| c.priority);
        info!(contact_id = %contact.id, "emergency contact registered");
        Ok(contact)
    }

    /// All contacts for a user, highest priority first.
    pub async fn contacts_for(&self, user_id: &str) -> Vec<EmergencyContact> {
        self.contacts
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Contacts eligible for automatic notification, highest priority first.
    pub async fn notifiable(&self, user_id: &str) -> Vec<EmergencyContact> {
        self.contacts_for(user_id)
            .await
            .into_iter()
            .filter(|c| c.auto_notify && c.has_consent && c.verified)
            .collect()
    }
}

fn crypto_err(e: core_session::SessionError) -> EscalationError {
    EscalationError::CryptoError {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(user_id: &str, priority: u8, auto_notify: bool) -> NewContact {
        NewContact {
            user_id: user_id.to_string(),
            name: "Jamie Doe".to_string(),
            phone: "+15555550100".to_string(),
            email: "jamie@example.com".to_string(),
            priority,
            relationship: "sibling".to_string(),
            auto_notify,
            crisis_only: true,
            has_consent: true,
            verified: true,
            available_hours: None,
        }
    }

    #[tokio::test]
    async fn test_register_encrypts_fields() {
        let store = EmergencyContactStore::new().unwrap();
        let saved = store.register(contact("user-1", 1, true)).await.unwrap();
        assert_ne!(saved.name.ciphertext, b"Jamie Doe".to_vec());
        assert_ne!(saved.phone.ciphertext, b"+15555550100".to_vec());
    }

    #[tokio::test]
    async fn test_auto_notify_requires_consent_and_verification() {
        let store = EmergencyContactStore::new().unwrap();
        let mut unverified = contact("user-1", 1, true);
        unverified.verified = false;
        assert!(store.register(unverified).await.is_err());

        let mut no_consent = contact("user-1", 1, true);
        no_consent.has_consent = false;
        assert!(store.register(no_consent).await.is_err());

        // Without auto-notify, neither flag is required
        let mut passive = contact("user-1", 1, false);
        passive.has_consent = false;
        passive.verified = false;
        assert!(store.register(passive).await.is_ok());
    }

    #[tokio::test]
    async fn test_notifiable_ordering_and_filtering() {
        let store = EmergencyContactStore::new().unwrap();
        store.register(contact("user-1", 2, true)).await.unwrap();
        store.register(contact("user-1", 1, true)).await.unwrap();
        store.register(contact("user-1", 3, false)).await.unwrap();

        let notifiable = store.notifiable("user-1").await;
        assert_eq!(notifiable.len(), 2);
        assert_eq!(notifiable[0].priority, 1);
        assert_eq!(notifiable[1].priority, 2);

        assert!(store.notifiable("other").await.is_empty());
    }
}
