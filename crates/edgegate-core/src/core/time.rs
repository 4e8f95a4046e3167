// crates/edgegate-core/src/core/time.rs
// ============================================================================
// Module: EdgeGate Time Model
// Description: Canonical timestamp representation for runs, audit, and ingress.
// Purpose: Provide deterministic, replayable time values across EdgeGate records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! EdgeGate timestamps are unix-epoch milliseconds. The core engines never
//! read wall-clock time directly; hosts supply timestamps through the
//! [`crate::interfaces::Clock`] seam so evaluation and replay stay
//! deterministic. RFC 3339 forms are used at the CI ingress and in bundle
//! summaries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when parsing or formatting timestamps.
#[derive(Debug, Error)]
pub enum TimeError {
    /// The input is not a valid RFC 3339 timestamp.
    #[error("invalid rfc3339 timestamp: {0}")]
    Parse(String),
    /// The value is out of the representable range.
    #[error("timestamp out of range")]
    OutOfRange,
}

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp in unix-epoch milliseconds.
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads
///   wall-clock time directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix-epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix-epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(&self) -> i64 {
        self.0
    }

    /// Returns this timestamp advanced by the given number of milliseconds.
    #[must_use]
    pub const fn plus_millis(&self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Returns the absolute distance to another timestamp in milliseconds.
    #[must_use]
    pub const fn abs_diff_millis(&self, other: &Self) -> u64 {
        self.0.abs_diff(other.0)
    }

    /// Parses an RFC 3339 timestamp (UTC or offset form).
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Parse`] when the input is not valid RFC 3339 and
    /// [`TimeError::OutOfRange`] when the instant does not fit milliseconds.
    pub fn parse_rfc3339(input: &str) -> Result<Self, TimeError> {
        let parsed = OffsetDateTime::parse(input, &Rfc3339)
            .map_err(|err| TimeError::Parse(err.to_string()))?;
        let nanos = parsed.unix_timestamp_nanos();
        let millis = nanos / 1_000_000;
        let millis = i64::try_from(millis).map_err(|_| TimeError::OutOfRange)?;
        Ok(Self(millis))
    }

    /// Formats the timestamp as RFC 3339 UTC.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::OutOfRange`] when the instant cannot be
    /// represented by the formatter.
    pub fn to_rfc3339(&self) -> Result<String, TimeError> {
        let nanos = i128::from(self.0) * 1_000_000;
        let instant =
            OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|_| TimeError::OutOfRange)?;
        instant.format(&Rfc3339).map_err(|_| TimeError::OutOfRange)
    }
}
