// crates/edgegate-core/src/runtime/correctness.rs
// ============================================================================
// Module: EdgeGate Correctness Scoring
// Description: Per-repeat 0/1 scoring of model outputs against expectations.
// Purpose: Turn promptpack expectations into deterministic scores.
// Dependencies: jsonschema, regex, crate::core::promptpack
// ============================================================================

//! ## Overview
//! Each case's per-repeat score is 0 or 1: `json_schema` outputs must parse
//! as JSON and validate, `regex` outputs must fully match the pattern,
//! `exact` outputs must equal the expected text after canonicalization, and
//! `none` cases are excluded from scoring entirely. Scoring never errors:
//! any malformed output scores 0.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::core::promptpack::Expectation;
use crate::core::promptpack::canonicalize_text;

// ============================================================================
// SECTION: Scoring
// ============================================================================

/// Scores one model output against a case expectation.
///
/// Returns `None` for non-scoring (`none`) expectations, `Some(1.0)` when
/// the expectation holds, and `Some(0.0)` otherwise.
#[must_use]
pub fn score_output(expectation: &Expectation, output: &str) -> Option<f64> {
    match expectation {
        Expectation::None => None,
        Expectation::JsonSchema {
            schema,
        } => Some(score_bool(validates_schema(schema, output))),
        Expectation::Regex {
            pattern,
        } => Some(score_bool(matches_pattern(pattern, output))),
        Expectation::Exact {
            expected,
        } => Some(score_bool(canonicalize_text(output) == canonicalize_text(expected))),
    }
}

/// Maps a boolean verdict to the 0/1 score domain.
const fn score_bool(ok: bool) -> f64 {
    if ok { 1.0 } else { 0.0 }
}

/// Checks whether output parses as JSON and validates against the schema.
fn validates_schema(schema: &Value, output: &str) -> bool {
    let Ok(instance) = serde_json::from_str::<Value>(output) else {
        return false;
    };
    let Ok(validator) = jsonschema::validator_for(schema) else {
        return false;
    };
    validator.is_valid(&instance)
}

/// Checks whether output fully matches the pattern.
fn matches_pattern(pattern: &str, output: &str) -> bool {
    let anchored = format!("^(?s:{pattern})$");
    let Ok(compiled) = regex::Regex::new(&anchored) else {
        return false;
    };
    compiled.is_match(output)
}
