// crates/edgegate-core/src/runtime/extract.rs
// ============================================================================
// Module: EdgeGate Metric Extraction
// Description: JSON-path extraction of normalized metrics from hub payloads.
// Purpose: Read backend payloads only through probe-proven paths.
// Dependencies: jsonpath_lib, serde_json
// ============================================================================

//! ## Overview
//! Backend payloads are arbitrary JSON whose shape is not known a priori.
//! Extraction therefore runs only with paths the probe suite has proven to
//! resolve; a path that fails to resolve yields an absent value, never a
//! guess. Single-element matches unwrap to the element; anything else is
//! treated as absent because metrics are scalar by definition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use jsonpath_lib::select;
use serde_json::Value;

// ============================================================================
// SECTION: Extraction
// ============================================================================

/// Extracts a scalar numeric metric from a payload at a proven path.
///
/// Returns `None` when the path is invalid, does not resolve, resolves to
/// multiple values, or resolves to a non-numeric value.
#[must_use]
pub fn extract_metric(payload: &Value, json_path: &str) -> Option<f64> {
    let matches = select(payload, json_path).ok()?;
    if matches.len() != 1 {
        return None;
    }
    number_value(matches[0])
}

/// Resolves a path to any single JSON value (used by probe derivation).
#[must_use]
pub fn extract_value(payload: &Value, json_path: &str) -> Option<Value> {
    let matches = select(payload, json_path).ok()?;
    if matches.len() != 1 {
        return None;
    }
    Some(matches[0].clone())
}

/// Converts a JSON value into a finite `f64`.
fn number_value(value: &Value) -> Option<f64> {
    let number = value.as_f64()?;
    number.is_finite().then_some(number)
}
