// crates/edgegate-core/src/core/secret.rs
// ============================================================================
// Module: EdgeGate Secret Values
// Description: Redaction-by-construction wrapper for token and secret material.
// Purpose: Make accidental logging of secret plaintext a type error.
// Dependencies: serde (redacted form only)
// ============================================================================

//! ## Overview
//! Secrets are modeled as a dedicated value type whose public render is
//! `"****" + last4`. The plaintext is reachable only through an explicit
//! accessor, never through `Debug`, `Display`, or serde. Persisting a secret
//! goes through the envelope in `edgegate-crypto`; only the sealed form and
//! the last four characters are ever stored or returned to clients.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

// ============================================================================
// SECTION: Secret String
// ============================================================================

/// Secret material held transiently in worker scope.
///
/// # Invariants
/// - `Debug` and `Display` render only the redacted form.
/// - The type deliberately implements neither `Serialize` nor `Deserialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString {
    /// The secret plaintext.
    plaintext: String,
}

impl SecretString {
    /// Wraps secret plaintext.
    #[must_use]
    pub const fn new(plaintext: String) -> Self {
        Self {
            plaintext,
        }
    }

    /// Returns the plaintext. Callers must keep the borrow short-lived and
    /// never persist or log it.
    #[must_use]
    pub fn reveal(&self) -> &str {
        &self.plaintext
    }

    /// Returns the last four characters, the only substring ever shown.
    #[must_use]
    pub fn last4(&self) -> String {
        let chars: Vec<char> = self.plaintext.chars().collect();
        let start = chars.len().saturating_sub(4);
        chars[start..].iter().collect()
    }

    /// Returns the redacted render, `"****" + last4`.
    #[must_use]
    pub fn redacted(&self) -> String {
        format!("****{}", self.last4())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}
