// crates/edgegate-cli/src/headers.rs
// ============================================================================
// Module: CI Header Signing
// Description: Builds the four HMAC ingress headers for a CI request.
// Purpose: Sign `timestamp \n nonce \n body` exactly as the server verifies.
// Dependencies: edgegate-core, edgegate-crypto, rand
// ============================================================================

//! ## Overview
//! CI callers send `X-EdgeGate-Workspace`, `X-EdgeGate-Timestamp`,
//! `X-EdgeGate-Nonce`, and `X-EdgeGate-Signature`. The signature is the hex
//! HMAC-SHA256 of `timestamp \n nonce \n body` under the workspace secret.
//! Nonces are 32 random bytes hex-encoded, comfortably inside the 64
//! character limit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use edgegate_core::Timestamp;
use edgegate_crypto::hex_encode;
use edgegate_crypto::hmac_sha256_hex;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

// ============================================================================
// SECTION: Header Names
// ============================================================================

/// Workspace header name.
pub const HEADER_WORKSPACE: &str = "X-EdgeGate-Workspace";
/// Timestamp header name.
pub const HEADER_TIMESTAMP: &str = "X-EdgeGate-Timestamp";
/// Nonce header name.
pub const HEADER_NONCE: &str = "X-EdgeGate-Nonce";
/// Signature header name.
pub const HEADER_SIGNATURE: &str = "X-EdgeGate-Signature";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Header building errors.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The timestamp could not be rendered as RFC 3339.
    #[error("timestamp render failed: {0}")]
    Timestamp(String),
}

// ============================================================================
// SECTION: Headers
// ============================================================================

/// The four signed ingress headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiHeaders {
    /// Workspace identifier value.
    pub workspace: String,
    /// RFC 3339 timestamp value.
    pub timestamp: String,
    /// Nonce value.
    pub nonce: String,
    /// Hex HMAC-SHA256 signature value.
    pub signature: String,
}

impl CiHeaders {
    /// Returns the headers as name/value pairs in send order.
    #[must_use]
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            (HEADER_WORKSPACE, self.workspace.as_str()),
            (HEADER_TIMESTAMP, self.timestamp.as_str()),
            (HEADER_NONCE, self.nonce.as_str()),
            (HEADER_SIGNATURE, self.signature.as_str()),
        ]
    }
}

/// Builds signed headers for one request.
///
/// # Errors
///
/// Returns [`HeaderError::Timestamp`] when the instant cannot be rendered.
pub fn build_ci_headers(
    workspace: &str,
    secret: &str,
    nonce: &str,
    now: Timestamp,
    body: &[u8],
) -> Result<CiHeaders, HeaderError> {
    let timestamp = now.to_rfc3339().map_err(|err| HeaderError::Timestamp(err.to_string()))?;
    let mut payload = Vec::with_capacity(timestamp.len() + nonce.len() + body.len() + 2);
    payload.extend_from_slice(timestamp.as_bytes());
    payload.push(b'\n');
    payload.extend_from_slice(nonce.as_bytes());
    payload.push(b'\n');
    payload.extend_from_slice(body);

    Ok(CiHeaders {
        workspace: workspace.to_string(),
        timestamp,
        nonce: nonce.to_string(),
        signature: hmac_sha256_hex(secret.as_bytes(), &payload),
    })
}

/// Generates a fresh random nonce (64 hex characters).
#[must_use]
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex_encode(&bytes)
}
