// =====================================================================================
// File: core-session/src/crypto.rs
// Description: Per-session authenticated encryption for message bodies
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::error::{SessionError, SessionResult};
use base64::{engine::general_purpose, Engine as _};
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM},
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};

/// AES-256-GCM key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;
/// GCM nonce length in bytes. A fresh nonce is generated per message and
/// stored beside the ciphertext.
pub const NONCE_LEN: usize = 12;

/// Ciphertext with its nonce. The GCM tag is appended to the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Per-session cipher wrapping the session's symmetric key.
pub struct SessionCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SessionCipher {
    /// Wrap existing key material.
    pub fn new(key_bytes: &[u8]) -> SessionResult<Self> {
        if key_bytes.len() != SESSION_KEY_LEN {
            return Err(SessionError::CryptoError {
                message: format!("session key must be {} bytes", SESSION_KEY_LEN),
            });
        }
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes).map_err(|e| {
            SessionError::CryptoError {
                message: format!("failed to create key: {:?}", e),
            }
        })?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Generate fresh session key material.
    pub fn generate_key() -> SessionResult<Vec<u8>> {
        let rng = SystemRandom::new();
        let mut key = vec![0u8; SESSION_KEY_LEN];
        rng.fill(&mut key).map_err(|e| SessionError::CryptoError {
            message: format!("failed to generate key: {:?}", e),
        })?;
        Ok(key)
    }

    /// Encrypt a message body with a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> SessionResult<EncryptedMessage> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|e| SessionError::CryptoError {
                message: format!("failed to generate nonce: {:?}", e),
            })?;

        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        let mut ciphertext = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut ciphertext)
            .map_err(|e| SessionError::CryptoError {
                message: format!("encryption failed: {:?}", e),
            })?;

        Ok(EncryptedMessage {
            ciphertext,
            nonce: nonce_bytes.to_vec(),
        })
    }

    /// Decrypt and authenticate a message body. A MAC mismatch is a
    /// `CryptoError`; the caller rejects the message.
    pub fn decrypt(&self, encrypted: &EncryptedMessage) -> SessionResult<Vec<u8>> {
        if encrypted.nonce.len() != NONCE_LEN {
            return Err(SessionError::CryptoError {
                message: "invalid nonce length".to_string(),
            });
        }
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&encrypted.nonce);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut buffer = encrypted.ciphertext.clone();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| SessionError::CryptoError {
                message: "authentication failed".to_string(),
            })?;
        Ok(plaintext.to_vec())
    }
}

/// Mint an opaque session token (32 random bytes, URL-safe base64).
pub fn mint_token() -> SessionResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).map_err(|e| SessionError::CryptoError {
        message: format!("failed to mint token: {:?}", e),
    })?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
