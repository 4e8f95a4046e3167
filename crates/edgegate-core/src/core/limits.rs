// crates/edgegate-core/src/core/limits.rs
// ============================================================================
// Module: EdgeGate Limits
// Description: Hard limits and the limit-violation error type.
// Purpose: Centralize every hard cap so enforcement sites agree on the numbers.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! All hard limits live here. Enforcement sites return [`LimitError`] naming
//! the violated limit; the API layer maps it to `LIMIT_EXCEEDED`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum model artifact size in bytes (500 MB, inclusive).
pub const MAX_MODEL_BYTES: u64 = 500 * 1024 * 1024;
/// Maximum number of cases in a promptpack.
pub const MAX_PROMPT_CASES: usize = 50;
/// Maximum number of devices in a pipeline device matrix.
pub const MAX_DEVICES: usize = 5;
/// Minimum measurement repeats per device.
pub const MIN_MEASUREMENT_REPEATS: u32 = 1;
/// Maximum measurement repeats per device.
pub const MAX_MEASUREMENT_REPEATS: u32 = 5;
/// Maximum new tokens generated per case.
pub const MAX_NEW_TOKENS: u32 = 256;
/// Minimum run timeout in minutes.
pub const MIN_TIMEOUT_MINUTES: u32 = 1;
/// Maximum run timeout in minutes.
pub const MAX_TIMEOUT_MINUTES: u32 = 45;
/// Maximum CI nonce length in characters.
pub const MAX_NONCE_LENGTH: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// A hard limit violation, naming the limit and the offending value.
#[derive(Debug, Error)]
pub enum LimitError {
    /// Model artifact exceeds [`MAX_MODEL_BYTES`].
    #[error("model size {actual_bytes} bytes exceeds limit {max_bytes}")]
    ModelTooLarge {
        /// Maximum allowed bytes.
        max_bytes: u64,
        /// Actual artifact size in bytes.
        actual_bytes: u64,
    },
    /// Promptpack exceeds [`MAX_PROMPT_CASES`].
    #[error("promptpack has {actual} cases, limit is {max}")]
    TooManyCases {
        /// Maximum allowed cases.
        max: usize,
        /// Actual case count.
        actual: usize,
    },
    /// Device matrix exceeds [`MAX_DEVICES`].
    #[error("device matrix has {actual} devices, limit is {max}")]
    TooManyDevices {
        /// Maximum allowed devices.
        max: usize,
        /// Actual device count.
        actual: usize,
    },
    /// Measurement repeats outside the allowed range.
    #[error("measurement repeats {actual} outside [{min}, {max}]")]
    RepeatsOutOfRange {
        /// Minimum allowed repeats.
        min: u32,
        /// Maximum allowed repeats.
        max: u32,
        /// Actual repeats requested.
        actual: u32,
    },
    /// New-token budget exceeds [`MAX_NEW_TOKENS`].
    #[error("max_new_tokens {actual} exceeds limit {max}")]
    TokensTooLarge {
        /// Maximum allowed tokens.
        max: u32,
        /// Actual tokens requested.
        actual: u32,
    },
    /// Timeout outside the allowed range.
    #[error("timeout_minutes {actual} outside [{min}, {max}]")]
    TimeoutOutOfRange {
        /// Minimum allowed minutes.
        min: u32,
        /// Maximum allowed minutes.
        max: u32,
        /// Actual minutes requested.
        actual: u32,
    },
    /// CI nonce exceeds [`MAX_NONCE_LENGTH`].
    #[error("nonce length {actual} exceeds limit {max}")]
    NonceTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        actual: usize,
    },
}

// ============================================================================
// SECTION: Checks
// ============================================================================

/// Checks a model artifact size against [`MAX_MODEL_BYTES`].
///
/// # Errors
///
/// Returns [`LimitError::ModelTooLarge`] when the size exceeds the limit.
pub const fn check_model_bytes(actual_bytes: u64) -> Result<(), LimitError> {
    if actual_bytes > MAX_MODEL_BYTES {
        return Err(LimitError::ModelTooLarge {
            max_bytes: MAX_MODEL_BYTES,
            actual_bytes,
        });
    }
    Ok(())
}

/// Checks a promptpack case count against [`MAX_PROMPT_CASES`].
///
/// # Errors
///
/// Returns [`LimitError::TooManyCases`] when the count exceeds the limit.
pub const fn check_case_count(actual: usize) -> Result<(), LimitError> {
    if actual > MAX_PROMPT_CASES {
        return Err(LimitError::TooManyCases {
            max: MAX_PROMPT_CASES,
            actual,
        });
    }
    Ok(())
}

/// Checks a device matrix size against [`MAX_DEVICES`].
///
/// # Errors
///
/// Returns [`LimitError::TooManyDevices`] when the count exceeds the limit.
pub const fn check_device_count(actual: usize) -> Result<(), LimitError> {
    if actual > MAX_DEVICES {
        return Err(LimitError::TooManyDevices {
            max: MAX_DEVICES,
            actual,
        });
    }
    Ok(())
}

/// Checks measurement repeats against the allowed range.
///
/// # Errors
///
/// Returns [`LimitError::RepeatsOutOfRange`] when outside the range.
pub const fn check_repeats(actual: u32) -> Result<(), LimitError> {
    if actual < MIN_MEASUREMENT_REPEATS || actual > MAX_MEASUREMENT_REPEATS {
        return Err(LimitError::RepeatsOutOfRange {
            min: MIN_MEASUREMENT_REPEATS,
            max: MAX_MEASUREMENT_REPEATS,
            actual,
        });
    }
    Ok(())
}

/// Checks a new-token budget against [`MAX_NEW_TOKENS`].
///
/// # Errors
///
/// Returns [`LimitError::TokensTooLarge`] when the budget exceeds the limit.
pub const fn check_new_tokens(actual: u32) -> Result<(), LimitError> {
    if actual > MAX_NEW_TOKENS {
        return Err(LimitError::TokensTooLarge {
            max: MAX_NEW_TOKENS,
            actual,
        });
    }
    Ok(())
}

/// Checks a timeout against the allowed range.
///
/// # Errors
///
/// Returns [`LimitError::TimeoutOutOfRange`] when outside the range.
pub const fn check_timeout_minutes(actual: u32) -> Result<(), LimitError> {
    if actual < MIN_TIMEOUT_MINUTES || actual > MAX_TIMEOUT_MINUTES {
        return Err(LimitError::TimeoutOutOfRange {
            min: MIN_TIMEOUT_MINUTES,
            max: MAX_TIMEOUT_MINUTES,
            actual,
        });
    }
    Ok(())
}

/// Checks a CI nonce length against [`MAX_NONCE_LENGTH`].
///
/// # Errors
///
/// Returns [`LimitError::NonceTooLong`] when the nonce is too long.
pub const fn check_nonce_length(actual: usize) -> Result<(), LimitError> {
    if actual > MAX_NONCE_LENGTH {
        return Err(LimitError::NonceTooLong {
            max: MAX_NONCE_LENGTH,
            actual,
        });
    }
    Ok(())
}
