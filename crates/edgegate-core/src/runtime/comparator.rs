// crates/edgegate-core/src/runtime/comparator.rs
// ============================================================================
// Module: EdgeGate Gate Comparator
// Description: Decimal-exact threshold comparison for gate predicates.
// Purpose: Keep gate boundaries free of binary floating-point drift.
// Dependencies: bigdecimal, crate::core::pipeline
// ============================================================================

//! ## Overview
//! Gate thresholds arrive as JSON numbers and observed medians as `f64`.
//! Both sides are parsed into `BigDecimal` through their shortest string
//! form before comparison, so a threshold of `3500` and a median of exactly
//! `3500.0` compare equal and the inclusive operators behave as documented:
//! exact equality satisfies `<=`, `>=`, and `=`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde_json::Number;

use crate::core::pipeline::GateOp;

// ============================================================================
// SECTION: Comparison
// ============================================================================

/// Evaluates `observed op threshold` with decimal-exact semantics.
///
/// Returns `None` when either side cannot be represented as a decimal
/// (non-finite observed values or malformed thresholds); callers treat that
/// as a missing value.
#[must_use]
pub fn compare_gate(observed: f64, op: GateOp, threshold: &Number) -> Option<bool> {
    let ordering = decimal_cmp(observed, threshold)?;
    let result = match op {
        GateOp::Lt => ordering.is_lt(),
        GateOp::Le => ordering.is_le(),
        GateOp::Gt => ordering.is_gt(),
        GateOp::Ge => ordering.is_ge(),
        GateOp::Eq => ordering.is_eq(),
    };
    Some(result)
}

/// Orders an observed value against a JSON-number threshold as decimals.
fn decimal_cmp(observed: f64, threshold: &Number) -> Option<Ordering> {
    if !observed.is_finite() {
        return None;
    }
    let observed = decimal_from_str(&observed.to_string())?;
    let threshold = decimal_from_str(&threshold.to_string())?;
    Some(observed.cmp(&threshold))
}

/// Parses a stable string rendering into `BigDecimal`.
fn decimal_from_str(rendered: &str) -> Option<BigDecimal> {
    BigDecimal::from_str(rendered).ok()
}
