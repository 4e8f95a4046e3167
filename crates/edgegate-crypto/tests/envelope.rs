// crates/edgegate-crypto/tests/envelope.rs
// ============================================================================
// Module: Envelope Tests
// Description: Tests for seal/open round-trips, rotation, and tamper handling.
// ============================================================================
//! ## Overview
//! Validates the data-key envelope: round-trip law, master-key rotation via
//! stamped key ids, and fail-closed behavior on tampered material.

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

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use edgegate_crypto::EnvelopeError;
use edgegate_crypto::MasterKeyring;
use proptest::prelude::*;

/// Returns base64 master key material of the given byte length.
fn material(len: usize, fill: u8) -> String {
    BASE64.encode(vec![fill; len])
}

// ============================================================================
// SECTION: Round Trip
// ============================================================================

/// Tests seal then open returns the original plaintext.
#[test]
fn test_seal_open_round_trip() {
    let keyring = MasterKeyring::from_base64("mk-1", &material(32, 7)).unwrap();
    let sealed = keyring.seal(b"qai-token-secret").unwrap();

    let opened = keyring.open(&sealed).unwrap();
    assert_eq!(opened, b"qai-token-secret");
}

/// Tests distinct seals of the same plaintext produce distinct ciphertexts.
#[test]
fn test_seal_uses_fresh_dek_per_record() {
    let keyring = MasterKeyring::from_base64("mk-1", &material(32, 7)).unwrap();
    let first = keyring.seal(b"same-plaintext").unwrap();
    let second = keyring.seal(b"same-plaintext").unwrap();

    assert_ne!(first.ciphertext, second.ciphertext);
    assert_ne!(first.wrapped_dek.wrapped, second.wrapped_dek.wrapped);
}

proptest! {
    /// Property: open(seal(x)) == x for arbitrary plaintext.
    #[test]
    fn prop_seal_open_identity(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
        let keyring = MasterKeyring::from_base64("mk-1", &material(48, 3)).unwrap();
        let sealed = keyring.seal(&plaintext).unwrap();
        let opened = keyring.open(&sealed).unwrap();
        prop_assert_eq!(opened, plaintext);
    }
}

// ============================================================================
// SECTION: Rotation
// ============================================================================

/// Tests a rotated keyring opens records sealed under a previous master.
#[test]
fn test_rotation_opens_old_seals_via_stamped_key_id() {
    let old = MasterKeyring::from_base64("mk-1", &material(32, 1)).unwrap();
    let sealed = old.seal(b"rotate-me").unwrap();
    assert_eq!(sealed.wrapped_dek.master_key_id, "mk-1");

    let mut rotated = MasterKeyring::from_base64("mk-2", &material(32, 2)).unwrap();
    rotated.add_previous("mk-1", &material(32, 1)).unwrap();

    assert_eq!(rotated.active_id(), "mk-2");
    assert_eq!(rotated.open(&sealed).unwrap(), b"rotate-me");
}

/// Tests an unknown stamped key id fails with KeyUnavailable.
#[test]
fn test_missing_master_key_is_key_unavailable() {
    let sealer = MasterKeyring::from_base64("mk-1", &material(32, 1)).unwrap();
    let sealed = sealer.seal(b"secret").unwrap();

    let other = MasterKeyring::from_base64("mk-9", &material(32, 9)).unwrap();
    let err = other.open(&sealed).unwrap_err();
    assert!(matches!(err, EnvelopeError::KeyUnavailable(id) if id == "mk-1"));
}

// ============================================================================
// SECTION: Tamper
// ============================================================================

/// Tests flipped ciphertext bytes fail as DecryptFailed.
#[test]
fn test_tampered_ciphertext_is_decrypt_failed() {
    let keyring = MasterKeyring::from_base64("mk-1", &material(32, 5)).unwrap();
    let mut sealed = keyring.seal(b"integrity").unwrap();

    let mut raw = BASE64.decode(&sealed.ciphertext).unwrap();
    raw[0] ^= 0xff;
    sealed.ciphertext = BASE64.encode(raw);

    assert!(matches!(keyring.open(&sealed).unwrap_err(), EnvelopeError::DecryptFailed));
}

/// Tests a tampered wrap fails as DecryptFailed.
#[test]
fn test_tampered_wrap_is_decrypt_failed() {
    let keyring = MasterKeyring::from_base64("mk-1", &material(32, 5)).unwrap();
    let mut sealed = keyring.seal(b"integrity").unwrap();

    let mut raw = BASE64.decode(&sealed.wrapped_dek.wrapped).unwrap();
    raw[4] ^= 0x01;
    sealed.wrapped_dek.wrapped = BASE64.encode(raw);

    assert!(matches!(keyring.open(&sealed).unwrap_err(), EnvelopeError::DecryptFailed));
}

/// Tests short master key material is rejected.
#[test]
fn test_short_master_key_rejected() {
    let err = MasterKeyring::from_base64("mk-1", &material(16, 1)).unwrap_err();
    assert!(matches!(err, EnvelopeError::InvalidMasterKey(_)));
}
