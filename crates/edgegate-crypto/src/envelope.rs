// crates/edgegate-crypto/src/envelope.rs
// ============================================================================
// Module: Secret Envelope
// Description: Per-record data-key encryption wrapped under a versioned master key.
// Purpose: Keep backend tokens and CI secrets sealed everywhere outside worker scope.
// Dependencies: aes-gcm, base64, rand, serde
// ============================================================================

//! ## Overview
//! Every sealed record gets a fresh 256-bit data-encryption key (DEK). The
//! plaintext is encrypted with AES-256-GCM under the DEK, and the DEK is
//! wrapped under the active master key. The wrap carries the master key id so
//! rotation keeps previously sealed records openable.
//!
//! Security posture: a failed open is treated as tamper and reported without
//! detail beyond the error kind.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use aes_gcm::Aes256Gcm;
use aes_gcm::Key;
use aes_gcm::Nonce;
use aes_gcm::aead::Aead;
use aes_gcm::aead::KeyInit;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// AES-256 key length in bytes.
const KEY_LEN: usize = 32;
/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;
/// Minimum decoded master key material length in bytes.
const MIN_MASTER_KEY_BYTES: usize = 32;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by envelope seal and open operations.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The master key referenced by the wrap is not loaded.
    #[error("master key unavailable: {0}")]
    KeyUnavailable(String),
    /// Ciphertext, wrap, or authentication tag failed to verify.
    #[error("envelope decrypt failed")]
    DecryptFailed,
    /// Master key material is malformed or too short.
    #[error("invalid master key material: {0}")]
    InvalidMasterKey(String),
    /// Encryption failed (should not occur with well-formed keys).
    #[error("envelope encrypt failed")]
    EncryptFailed,
}

// ============================================================================
// SECTION: Sealed Form
// ============================================================================

/// Persisted form of an envelope-sealed secret.
///
/// # Invariants
/// - `wrapped_dek` carries the id of the master key that wrapped the DEK.
/// - All fields are base64; raw key bytes never appear in serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// Base64 nonce for the payload encryption.
    pub nonce: String,
    /// Base64 AES-256-GCM ciphertext of the plaintext.
    pub ciphertext: String,
    /// Wrapped data-encryption key.
    pub wrapped_dek: WrappedDek,
}

/// Data-encryption key wrapped under a master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedDek {
    /// Identifier of the master key used for the wrap.
    pub master_key_id: String,
    /// Base64 nonce for the wrap encryption.
    pub nonce: String,
    /// Base64 AES-256-GCM ciphertext of the DEK.
    pub wrapped: String,
}

// ============================================================================
// SECTION: Master Keyring
// ============================================================================

/// Master keys indexed by stable id, with one active key for new seals.
///
/// # Invariants
/// - The active id always resolves to a loaded key.
/// - Keys are process-wide singletons; rotation adds entries, never mutates.
pub struct MasterKeyring {
    /// Identifier of the key used for new seals.
    active_id: String,
    /// Loaded master keys by id.
    keys: BTreeMap<String, [u8; KEY_LEN]>,
}

impl fmt::Debug for MasterKeyring {
    /// Renders the active key id and loaded key ids only; never key material.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyring")
            .field("active_id", &self.active_id)
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MasterKeyring {
    /// Builds a keyring with a single active master key from base64 material.
    ///
    /// Material shorter than 32 decoded bytes is rejected. The AES key is the
    /// SHA-256 of the decoded material, so operators may supply any blob of
    /// at least 32 bytes without worrying about exact length.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidMasterKey`] when decoding fails or the
    /// material is too short.
    pub fn from_base64(key_id: impl Into<String>, material: &str) -> Result<Self, EnvelopeError> {
        let decoded = BASE64
            .decode(material.trim())
            .map_err(|err| EnvelopeError::InvalidMasterKey(err.to_string()))?;
        if decoded.len() < MIN_MASTER_KEY_BYTES {
            return Err(EnvelopeError::InvalidMasterKey(format!(
                "master key material must be at least {MIN_MASTER_KEY_BYTES} bytes"
            )));
        }
        let digest = Sha256::digest(&decoded);
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);

        let active_id = key_id.into();
        let mut keys = BTreeMap::new();
        keys.insert(active_id.clone(), key);
        Ok(Self {
            active_id,
            keys,
        })
    }

    /// Adds a previous master key so older seals stay openable.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidMasterKey`] when decoding fails or the
    /// material is too short.
    pub fn add_previous(
        &mut self,
        key_id: impl Into<String>,
        material: &str,
    ) -> Result<(), EnvelopeError> {
        let decoded = BASE64
            .decode(material.trim())
            .map_err(|err| EnvelopeError::InvalidMasterKey(err.to_string()))?;
        if decoded.len() < MIN_MASTER_KEY_BYTES {
            return Err(EnvelopeError::InvalidMasterKey(format!(
                "master key material must be at least {MIN_MASTER_KEY_BYTES} bytes"
            )));
        }
        let digest = Sha256::digest(&decoded);
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);
        self.keys.insert(key_id.into(), key);
        Ok(())
    }

    /// Returns the id of the active master key.
    #[must_use]
    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    /// Seals plaintext under a fresh DEK wrapped by the active master key.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::KeyUnavailable`] when the active key is not
    /// loaded and [`EnvelopeError::EncryptFailed`] when encryption fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedSecret, EnvelopeError> {
        let master = self
            .keys
            .get(&self.active_id)
            .ok_or_else(|| EnvelopeError::KeyUnavailable(self.active_id.clone()))?;

        let mut dek = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut dek);
        let mut payload_nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut payload_nonce);
        let mut wrap_nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut wrap_nonce);

        let payload_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek));
        let ciphertext = payload_cipher
            .encrypt(Nonce::from_slice(&payload_nonce), plaintext)
            .map_err(|_| EnvelopeError::EncryptFailed)?;

        let wrap_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master));
        let wrapped = wrap_cipher
            .encrypt(Nonce::from_slice(&wrap_nonce), dek.as_slice())
            .map_err(|_| EnvelopeError::EncryptFailed)?;

        Ok(SealedSecret {
            nonce: BASE64.encode(payload_nonce),
            ciphertext: BASE64.encode(ciphertext),
            wrapped_dek: WrappedDek {
                master_key_id: self.active_id.clone(),
                nonce: BASE64.encode(wrap_nonce),
                wrapped: BASE64.encode(wrapped),
            },
        })
    }

    /// Opens a sealed secret. Plaintext lives only in the caller's scope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::KeyUnavailable`] when the stamped master key
    /// is not loaded and [`EnvelopeError::DecryptFailed`] on any integrity
    /// failure (treated as tamper).
    pub fn open(&self, sealed: &SealedSecret) -> Result<Vec<u8>, EnvelopeError> {
        let master = self
            .keys
            .get(&sealed.wrapped_dek.master_key_id)
            .ok_or_else(|| EnvelopeError::KeyUnavailable(sealed.wrapped_dek.master_key_id.clone()))?;

        let wrap_nonce = decode_exact(&sealed.wrapped_dek.nonce, NONCE_LEN)?;
        let wrapped = BASE64
            .decode(&sealed.wrapped_dek.wrapped)
            .map_err(|_| EnvelopeError::DecryptFailed)?;
        let wrap_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master));
        let dek_bytes = wrap_cipher
            .decrypt(Nonce::from_slice(&wrap_nonce), wrapped.as_slice())
            .map_err(|_| EnvelopeError::DecryptFailed)?;
        if dek_bytes.len() != KEY_LEN {
            return Err(EnvelopeError::DecryptFailed);
        }

        let payload_nonce = decode_exact(&sealed.nonce, NONCE_LEN)?;
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .map_err(|_| EnvelopeError::DecryptFailed)?;
        let payload_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek_bytes));
        payload_cipher
            .decrypt(Nonce::from_slice(&payload_nonce), ciphertext.as_slice())
            .map_err(|_| EnvelopeError::DecryptFailed)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Decodes base64 into a buffer of an exact expected length.
fn decode_exact(encoded: &str, expected: usize) -> Result<Vec<u8>, EnvelopeError> {
    let decoded = BASE64.decode(encoded).map_err(|_| EnvelopeError::DecryptFailed)?;
    if decoded.len() != expected {
        return Err(EnvelopeError::DecryptFailed);
    }
    Ok(decoded)
}
