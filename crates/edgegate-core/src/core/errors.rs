// crates/edgegate-core/src/core/errors.rs
// ============================================================================
// Module: EdgeGate Error Codes
// Description: The closed error-code set surfaced on runs and API payloads.
// Purpose: Keep terminal failure classification stable for CI consumers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every terminal `error` run and every API failure carries one code from
//! this closed set. Codes serialize in SCREAMING_SNAKE_CASE and are stable
//! wire contract; `detail` strings are free-form and may change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Closed set of EdgeGate error codes.
///
/// # Invariants
/// - Variants are stable for serialization and CI contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A hard limit was hit (model size, case count, devices, repeats,
    /// tokens, timeout bounds).
    LimitExceeded,
    /// Model packaging-shape validation rejected the artifact.
    InvalidModelPackage,
    /// The referenced promptpack version is not published.
    DependencyNotPublished,
    /// The workspace has no active backend integration.
    NoIntegration,
    /// The backend rejected the integration credentials.
    TokenInvalid,
    /// An external submit failed after one retry.
    SubmitFailed,
    /// The backend reported a terminal job failure.
    BackendJobFailed,
    /// The run deadline was exceeded.
    Timeout,
    /// The run was explicitly cancelled.
    Cancelled,
    /// A required gate's metric has no stable mapping or no value.
    MissingRequiredMetric,
    /// A required gate depends on a metric whose dispersion exceeds the
    /// family threshold.
    FlakyMetric,
    /// Evidence assembly or signing failed.
    BundleFailed,
    /// CI ingress: timestamp outside the accepted window.
    StaleTimestamp,
    /// CI ingress: nonce already spent.
    Replay,
    /// CI ingress: signature did not verify.
    InvalidSignature,
    /// CI ingress: workspace unknown or without a CI secret.
    UnknownWorkspace,
    /// Caller lacks the required role.
    Forbidden,
    /// Record does not exist, or belongs to another workspace.
    NotFound,
    /// Stored bytes no longer match the recorded SHA-256.
    IntegrityError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LimitExceeded => "LIMIT_EXCEEDED",
            Self::InvalidModelPackage => "INVALID_MODEL_PACKAGE",
            Self::DependencyNotPublished => "DEPENDENCY_NOT_PUBLISHED",
            Self::NoIntegration => "NO_INTEGRATION",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::SubmitFailed => "SUBMIT_FAILED",
            Self::BackendJobFailed => "BACKEND_JOB_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::MissingRequiredMetric => "MISSING_REQUIRED_METRIC",
            Self::FlakyMetric => "FLAKY_METRIC",
            Self::BundleFailed => "BUNDLE_FAILED",
            Self::StaleTimestamp => "STALE_TIMESTAMP",
            Self::Replay => "REPLAY",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::UnknownWorkspace => "UNKNOWN_WORKSPACE",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::IntegrityError => "INTEGRITY_ERROR",
        };
        f.write_str(label)
    }
}

// ============================================================================
// SECTION: Run Failure
// ============================================================================

/// A terminal run failure: code plus free-form detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Stable error code.
    pub code: ErrorCode,
    /// Free-form detail (vendor reason, gate name, limit description).
    pub detail: String,
}

impl RunFailure {
    /// Creates a failure with code and detail.
    #[must_use]
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}
