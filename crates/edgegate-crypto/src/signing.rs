// crates/edgegate-crypto/src/signing.rs
// ============================================================================
// Module: Evidence Signing
// Description: Ed25519 signing and verification for evidence bundles.
// Purpose: Bind bundle summaries to a registered signing key id.
// Dependencies: base64, ed25519-dalek
// ============================================================================

//! ## Overview
//! Evidence bundles are signed over the canonical bytes of `summary.json`
//! with Ed25519. Key files hold either raw 32-byte seeds or base64 text.
//! Verification needs only the detached signature, the canonical bytes, and
//! the public key published for the recorded key id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier;
use ed25519_dalek::VerifyingKey;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted signing key file size in bytes.
const MAX_SIGNING_KEY_BYTES: u64 = 4096;
/// Ed25519 seed and public key length in bytes.
const KEY_LEN: usize = 32;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by signing key handling and verification.
#[derive(Debug, Error)]
pub enum SignError {
    /// Key file could not be read.
    #[error("failed to read key file: {0}")]
    KeyRead(String),
    /// Key material is not a valid Ed25519 key.
    #[error("invalid ed25519 key material")]
    KeyInvalid,
    /// Signature bytes are malformed or do not verify.
    #[error("signature verification failed")]
    VerifyFailed,
}

// ============================================================================
// SECTION: Signer
// ============================================================================

/// Evidence signer pairing an Ed25519 key with its registered id.
pub struct EvidenceSigner {
    /// Registered signing key id recorded in bundle summaries.
    key_id: String,
    /// Ed25519 signing key.
    key: SigningKey,
}

impl EvidenceSigner {
    /// Creates a signer from a loaded key and its registered id.
    #[must_use]
    pub const fn new(key_id: String, key: SigningKey) -> Self {
        Self {
            key_id,
            key,
        }
    }

    /// Returns the registered key id.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the public key bytes for registry publication.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; KEY_LEN] {
        self.key.verifying_key().to_bytes()
    }

    /// Signs canonical bytes, returning the detached 64-byte signature.
    #[must_use]
    pub fn sign(&self, canonical_bytes: &[u8]) -> Vec<u8> {
        self.key.sign(canonical_bytes).to_bytes().to_vec()
    }
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies a detached Ed25519 signature over canonical bytes.
///
/// # Errors
///
/// Returns [`SignError::VerifyFailed`] when the signature is malformed or
/// does not verify under the provided key.
pub fn verify_detached(
    key: &VerifyingKey,
    canonical_bytes: &[u8],
    signature: &[u8],
) -> Result<(), SignError> {
    let signature = Signature::try_from(signature).map_err(|_| SignError::VerifyFailed)?;
    key.verify(canonical_bytes, &signature).map_err(|_| SignError::VerifyFailed)
}

// ============================================================================
// SECTION: Key Loading
// ============================================================================

/// Loads an Ed25519 signing key from disk (raw 32 bytes or base64 text).
///
/// # Errors
///
/// Returns [`SignError::KeyRead`] on I/O failure and [`SignError::KeyInvalid`]
/// when the material is not a 32-byte seed in either form.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, SignError> {
    let bytes = read_key_bytes(path)?;
    let seed = decode_key_material(&bytes)?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Loads an Ed25519 public key from disk (raw 32 bytes or base64 text).
///
/// # Errors
///
/// Returns [`SignError::KeyRead`] on I/O failure and [`SignError::KeyInvalid`]
/// when the material is not a valid public key in either form.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, SignError> {
    let bytes = read_key_bytes(path)?;
    let raw = decode_key_material(&bytes)?;
    VerifyingKey::from_bytes(&raw).map_err(|_| SignError::KeyInvalid)
}

/// Reads a key file with a hard size cap.
fn read_key_bytes(path: &Path) -> Result<Vec<u8>, SignError> {
    let metadata = fs::metadata(path).map_err(|err| SignError::KeyRead(err.to_string()))?;
    if metadata.len() > MAX_SIGNING_KEY_BYTES {
        return Err(SignError::KeyRead(format!(
            "key file exceeds {MAX_SIGNING_KEY_BYTES} bytes"
        )));
    }
    fs::read(path).map_err(|err| SignError::KeyRead(err.to_string()))
}

/// Decodes raw-32 or base64 key material into a 32-byte array.
fn decode_key_material(bytes: &[u8]) -> Result<[u8; KEY_LEN], SignError> {
    if bytes.len() == KEY_LEN {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| SignError::KeyInvalid)?;
        return Ok(key);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| SignError::KeyInvalid)?;
    let decoded = BASE64.decode(text.trim().as_bytes()).map_err(|_| SignError::KeyInvalid)?;
    if decoded.len() != KEY_LEN {
        return Err(SignError::KeyInvalid);
    }
    let key: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| SignError::KeyInvalid)?;
    Ok(key)
}
