// crates/edgegate-core/tests/ingress.rs
// ============================================================================
// Module: CI Ingress Tests
// Description: Tests for HMAC verification, clock skew, and replay protection.
// ============================================================================
//! ## Overview
//! Exercises the signed-payload contract (`timestamp \n nonce \n body`), the
//! inclusive five-minute skew window, nonce single-use, and the rule that
//! unauthenticated requests never spend a nonce.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use edgegate_core::CiRequest;
use edgegate_core::InMemoryNonceStore;
use edgegate_core::IngressError;
use edgegate_core::NonceStore;
use edgegate_core::SecretString;
use edgegate_core::Timestamp;
use edgegate_core::WorkspaceId;
use edgegate_core::verify_ci_request;
use edgegate_crypto::hmac_sha256_hex;

use common::ts;

/// Builds a correctly signed request for the given instants.
fn signed_request(secret: &str, timestamp: Timestamp, nonce: &str, body: &[u8]) -> CiRequest {
    let rendered = timestamp.to_rfc3339().unwrap();
    let mut payload = Vec::new();
    payload.extend_from_slice(rendered.as_bytes());
    payload.push(b'\n');
    payload.extend_from_slice(nonce.as_bytes());
    payload.push(b'\n');
    payload.extend_from_slice(body);
    CiRequest {
        workspace_id: WorkspaceId::new("ws-ci"),
        timestamp: rendered,
        nonce: nonce.to_string(),
        signature: hmac_sha256_hex(secret.as_bytes(), &payload),
        body: body.to_vec(),
    }
}

/// A fixed wall-clock instant for the tests.
const NOW_MILLIS: i64 = 1_760_000_000_000;

// ============================================================================
// SECTION: Acceptance
// ============================================================================

/// A correctly signed request is accepted and its nonce recorded.
#[test]
fn test_valid_request_accepted() {
    let secret = SecretString::from("ci-secret-abcd");
    let nonces = InMemoryNonceStore::new();
    let request = signed_request("ci-secret-abcd", ts(NOW_MILLIS), "nonce-1", b"{\"ref\":\"main\"}");

    verify_ci_request(&request, &secret, ts(NOW_MILLIS), &nonces).unwrap();
}

/// Replaying the same `(workspace, nonce)` pair fails REPLAY.
#[test]
fn test_replay_rejected() {
    let secret = SecretString::from("ci-secret-abcd");
    let nonces = InMemoryNonceStore::new();
    let request = signed_request("ci-secret-abcd", ts(NOW_MILLIS), "nonce-dup", b"");

    verify_ci_request(&request, &secret, ts(NOW_MILLIS), &nonces).unwrap();
    let err = verify_ci_request(&request, &secret, ts(NOW_MILLIS + 1_000), &nonces).unwrap_err();
    assert!(matches!(err, IngressError::Replay));
}

// ============================================================================
// SECTION: Clock Window
// ============================================================================

/// Exactly five minutes of skew is accepted; one millisecond more is not.
#[test]
fn test_skew_boundary_is_inclusive() {
    let secret = SecretString::from("ci-secret-abcd");
    let nonces = InMemoryNonceStore::new();
    let five_minutes = 5 * 60 * 1000;

    let at_limit = signed_request("ci-secret-abcd", ts(NOW_MILLIS - five_minutes), "nonce-a", b"");
    verify_ci_request(&at_limit, &secret, ts(NOW_MILLIS), &nonces).unwrap();

    let past_limit =
        signed_request("ci-secret-abcd", ts(NOW_MILLIS - five_minutes - 1), "nonce-b", b"");
    let err = verify_ci_request(&past_limit, &secret, ts(NOW_MILLIS), &nonces).unwrap_err();
    assert!(matches!(err, IngressError::StaleTimestamp(_)));
}

/// An unparseable timestamp classifies as stale.
#[test]
fn test_malformed_timestamp_is_stale() {
    let secret = SecretString::from("ci-secret-abcd");
    let nonces = InMemoryNonceStore::new();
    let mut request = signed_request("ci-secret-abcd", ts(NOW_MILLIS), "nonce-c", b"");
    request.timestamp = "yesterday".to_string();

    let err = verify_ci_request(&request, &secret, ts(NOW_MILLIS), &nonces).unwrap_err();
    assert!(matches!(err, IngressError::StaleTimestamp(_)));
}

// ============================================================================
// SECTION: Signature
// ============================================================================

/// A wrong key fails INVALID_SIGNATURE without spending the nonce.
#[test]
fn test_bad_signature_does_not_spend_nonce() {
    let secret = SecretString::from("ci-secret-abcd");
    let nonces = InMemoryNonceStore::new();
    let forged = signed_request("wrong-key", ts(NOW_MILLIS), "nonce-d", b"");

    let err = verify_ci_request(&forged, &secret, ts(NOW_MILLIS), &nonces).unwrap_err();
    assert!(matches!(err, IngressError::InvalidSignature(_)));

    // The nonce is still fresh for a correctly signed retry.
    let genuine = signed_request("ci-secret-abcd", ts(NOW_MILLIS), "nonce-d", b"");
    verify_ci_request(&genuine, &secret, ts(NOW_MILLIS), &nonces).unwrap();
}

/// Body bytes are part of the signed payload.
#[test]
fn test_body_tamper_rejected() {
    let secret = SecretString::from("ci-secret-abcd");
    let nonces = InMemoryNonceStore::new();
    let mut request = signed_request("ci-secret-abcd", ts(NOW_MILLIS), "nonce-e", b"original");
    request.body = b"tampered".to_vec();

    let err = verify_ci_request(&request, &secret, ts(NOW_MILLIS), &nonces).unwrap_err();
    assert!(matches!(err, IngressError::InvalidSignature(_)));
}

/// Oversized nonces are rejected before any verification work.
#[test]
fn test_oversized_nonce_rejected() {
    let secret = SecretString::from("ci-secret-abcd");
    let nonces = InMemoryNonceStore::new();
    let long_nonce = "n".repeat(65);
    let request = signed_request("ci-secret-abcd", ts(NOW_MILLIS), &long_nonce, b"");

    let err = verify_ci_request(&request, &secret, ts(NOW_MILLIS), &nonces).unwrap_err();
    assert!(matches!(err, IngressError::InvalidSignature(_)));
}

// ============================================================================
// SECTION: Purge
// ============================================================================

/// The purge removes only rows whose expiry is in the past.
#[test]
fn test_purge_removes_only_expired_rows() {
    let nonces = InMemoryNonceStore::new();
    let workspace = WorkspaceId::new("ws-ci");
    nonces.insert(&workspace, "old", ts(NOW_MILLIS), ts(NOW_MILLIS + 1_000)).unwrap();
    nonces.insert(&workspace, "fresh", ts(NOW_MILLIS), ts(NOW_MILLIS + 600_000)).unwrap();

    let purged = nonces.purge_expired(ts(NOW_MILLIS + 10_000)).unwrap();
    assert_eq!(purged, 1);

    // The fresh nonce is still spent; replay continues to fail.
    let err = nonces
        .insert(&workspace, "fresh", ts(NOW_MILLIS + 11_000), ts(NOW_MILLIS + 700_000))
        .unwrap_err();
    assert!(matches!(err, edgegate_core::NonceError::Replay));
}
