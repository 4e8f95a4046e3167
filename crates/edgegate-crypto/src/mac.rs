// crates/edgegate-crypto/src/mac.rs
// ============================================================================
// Module: Ingress MAC Primitives
// Description: HMAC-SHA256 computation and constant-time verification helpers.
// Purpose: Authenticate CI webhook requests without timing side-channels.
// Dependencies: hmac, sha2, subtle
// ============================================================================

//! ## Overview
//! The CI ingress signs `timestamp \n nonce \n body` with a per-workspace
//! secret. This module computes the hex HMAC and verifies candidates in
//! constant time over raw MAC bytes, so neither hex formatting nor compare
//! order leaks information about the expected value.

// ============================================================================
// SECTION: Imports
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// HMAC-SHA256 instantiation used by the ingress.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: HMAC
// ============================================================================

/// Computes the lowercase hex HMAC-SHA256 of `message` under `key`.
#[must_use]
pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> String {
    hex_encode(&hmac_sha256(key, message))
}

/// Verifies a hex-encoded candidate MAC against the expected value.
///
/// Malformed hex fails verification. The comparison runs in constant time
/// over the raw 32-byte MACs.
#[must_use]
pub fn verify_hmac_sha256_hex(key: &[u8], message: &[u8], candidate_hex: &str) -> bool {
    let Some(candidate) = hex_decode(candidate_hex) else {
        return false;
    };
    let expected = hmac_sha256(key, message);
    constant_time_eq(&expected, &candidate)
}

/// Computes the raw HMAC-SHA256 of `message` under `key`.
fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length; new_from_slice cannot fail for SHA-256.
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return Vec::new();
    };
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

// ============================================================================
// SECTION: Constant-Time Comparisons
// ============================================================================

/// Compares two byte slices in constant time.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Compares two strings in constant time.
#[must_use]
pub fn constant_time_eq_str(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Decodes a hex string into bytes, accepting upper and lower case.
///
/// Returns `None` for odd lengths or non-hex characters.
#[must_use]
pub fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if !text.len().is_multiple_of(2) {
        return None;
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        let high = hex_nibble(bytes[index])?;
        let low = hex_nibble(bytes[index + 1])?;
        out.push((high << 4) | low);
        index += 2;
    }
    Some(out)
}

/// Decodes a single hex character into its nibble value.
const fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
