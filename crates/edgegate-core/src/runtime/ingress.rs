// crates/edgegate-core/src/runtime/ingress.rs
// ============================================================================
// Module: EdgeGate CI Ingress Verification
// Description: HMAC-SHA256 + timestamp window + single-use nonce checks.
// Purpose: Authenticate webhook-triggered runs with replay protection.
// Dependencies: crate::{core, interfaces}, edgegate-crypto
// ============================================================================

//! ## Overview
//! CI requests carry four headers: workspace, RFC 3339 timestamp, nonce, and
//! a hex HMAC-SHA256 signature over `timestamp \n nonce \n body`. The
//! verifier checks the clock window (inclusive five minutes), verifies the
//! signature in constant time, and only then spends the nonce; a uniqueness
//! conflict on insert is the replay proof. Failure classification is the
//! closed set `STALE_TIMESTAMP`, `REPLAY`, `INVALID_SIGNATURE`,
//! `UNKNOWN_WORKSPACE`.
//!
//! Security posture: signature verification happens before the nonce is
//! spent so unauthenticated traffic cannot burn nonces.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use edgegate_crypto::verify_hmac_sha256_hex;

use crate::core::errors::ErrorCode;
use crate::core::identifiers::WorkspaceId;
use crate::core::limits;
use crate::core::secret::SecretString;
use crate::core::time::Timestamp;
use crate::interfaces::NonceError;
use crate::interfaces::NonceStore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Accepted clock skew in milliseconds (inclusive bound).
const MAX_CLOCK_SKEW_MILLIS: u64 = 5 * 60 * 1000;
/// Nonce lifetime in milliseconds.
const NONCE_TTL_MILLIS: i64 = 5 * 60 * 1000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CI ingress verification failures.
#[derive(Debug, Error)]
pub enum IngressError {
    /// Timestamp missing, unparseable, or outside the accepted window.
    #[error("stale timestamp: {0}")]
    StaleTimestamp(String),
    /// The `(workspace, nonce)` pair was already spent.
    #[error("nonce replay")]
    Replay,
    /// The signature did not verify, or the request is malformed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    /// The workspace is unknown or has no CI secret.
    #[error("unknown workspace")]
    UnknownWorkspace,
    /// The nonce store failed.
    #[error("nonce store failure: {0}")]
    Store(String),
}

impl IngressError {
    /// Returns the stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::StaleTimestamp(_) => ErrorCode::StaleTimestamp,
            Self::Replay => ErrorCode::Replay,
            Self::InvalidSignature(_) => ErrorCode::InvalidSignature,
            Self::UnknownWorkspace => ErrorCode::UnknownWorkspace,
            Self::Store(_) => ErrorCode::NotFound,
        }
    }
}

// ============================================================================
// SECTION: Request
// ============================================================================

/// An incoming CI request, already split into its signed parts.
#[derive(Debug, Clone)]
pub struct CiRequest {
    /// Workspace asserted by `X-EdgeGate-Workspace`.
    pub workspace_id: WorkspaceId,
    /// Raw `X-EdgeGate-Timestamp` header value.
    pub timestamp: String,
    /// Raw `X-EdgeGate-Nonce` header value.
    pub nonce: String,
    /// Hex `X-EdgeGate-Signature` header value.
    pub signature: String,
    /// Exact request body bytes (empty for GET).
    pub body: Vec<u8>,
}

impl CiRequest {
    /// Returns the exact byte string the signature covers.
    #[must_use]
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(self.timestamp.len() + self.nonce.len() + self.body.len() + 2);
        payload.extend_from_slice(self.timestamp.as_bytes());
        payload.push(b'\n');
        payload.extend_from_slice(self.nonce.as_bytes());
        payload.push(b'\n');
        payload.extend_from_slice(&self.body);
        payload
    }
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies a CI request against the workspace secret and spends its nonce.
///
/// The caller resolves the workspace's CI secret first and maps a missing
/// secret to [`IngressError::UnknownWorkspace`].
///
/// # Errors
///
/// Returns the closed [`IngressError`] classification; the nonce is spent
/// only when every other check has already passed.
pub fn verify_ci_request<N: NonceStore>(
    request: &CiRequest,
    secret: &SecretString,
    now: Timestamp,
    nonces: &N,
) -> Result<(), IngressError> {
    if limits::check_nonce_length(request.nonce.chars().count()).is_err() {
        return Err(IngressError::InvalidSignature("nonce exceeds maximum length".to_string()));
    }
    if request.nonce.is_empty() {
        return Err(IngressError::InvalidSignature("nonce must not be empty".to_string()));
    }

    let timestamp = Timestamp::parse_rfc3339(&request.timestamp)
        .map_err(|err| IngressError::StaleTimestamp(err.to_string()))?;
    let skew = timestamp.abs_diff_millis(&now);
    if skew > MAX_CLOCK_SKEW_MILLIS {
        return Err(IngressError::StaleTimestamp(format!(
            "timestamp skew {skew}ms exceeds {MAX_CLOCK_SKEW_MILLIS}ms"
        )));
    }

    let payload = request.signed_payload();
    if !verify_hmac_sha256_hex(secret.reveal().as_bytes(), &payload, &request.signature) {
        return Err(IngressError::InvalidSignature("hmac mismatch".to_string()));
    }

    let expires_at = timestamp.plus_millis(NONCE_TTL_MILLIS);
    match nonces.insert(&request.workspace_id, &request.nonce, now, expires_at) {
        Ok(()) => Ok(()),
        Err(NonceError::Replay) => Err(IngressError::Replay),
        Err(NonceError::Io(err)) => Err(IngressError::Store(err)),
    }
}
