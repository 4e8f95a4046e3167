// crates/edgegate-core/src/core/promptpack.rs
// ============================================================================
// Module: EdgeGate PromptPacks
// Description: Versioned prompt suites with expectation rules.
// Purpose: Pin correctness inputs; immutable once published.
// Dependencies: crate::core::{hashing, identifiers, limits}, serde
// ============================================================================

//! ## Overview
//! A promptpack is a suite of at most fifty prompt cases, each with an
//! expectation of kind `json_schema`, `regex`, `exact`, or `none`. Content is
//! canonicalized (LF line endings, trailing whitespace stripped, canonical
//! JSON) before hashing, so the recorded SHA-256 is stable across editors.
//! Once published, a `(logical_id, version)` pair is immutable; edits require
//! a new version.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing;
use crate::core::hashing::HashError;
use crate::core::hashing::Sha256Hex;
use crate::core::identifiers::PromptPackId;
use crate::core::identifiers::WorkspaceId;
use crate::core::limits;
use crate::core::limits::LimitError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when validating or canonicalizing a promptpack.
#[derive(Debug, Error)]
pub enum PromptPackError {
    /// A hard limit was violated.
    #[error(transparent)]
    Limit(#[from] LimitError),
    /// Canonical hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// A case declares an invalid expectation.
    #[error("case {case_id}: {reason}")]
    InvalidCase {
        /// Offending case identifier.
        case_id: String,
        /// Human-readable reason.
        reason: String,
    },
}

// ============================================================================
// SECTION: Expectations
// ============================================================================

/// Expectation attached to a prompt case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    /// Output must validate against a JSON schema.
    JsonSchema {
        /// The schema document.
        schema: Value,
    },
    /// Output must fully match a regular expression.
    Regex {
        /// The pattern, anchored by the scorer.
        pattern: String,
    },
    /// Output must equal the expected text after canonicalization.
    Exact {
        /// The expected text.
        expected: String,
    },
    /// No expectation; the case is excluded from correctness scoring.
    None,
}

impl Expectation {
    /// Returns whether this expectation participates in correctness scoring.
    #[must_use]
    pub const fn scores(&self) -> bool {
        !matches!(self, Self::None)
    }
}

// ============================================================================
// SECTION: Cases
// ============================================================================

/// One prompt case within a promptpack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCase {
    /// Case identifier, unique within the pack.
    pub case_id: String,
    /// Prompt text sent to the model.
    pub prompt: String,
    /// Expectation evaluated against the model output.
    pub expectation: Expectation,
}

// ============================================================================
// SECTION: PromptPack
// ============================================================================

/// A versioned, immutable-once-published prompt suite.
///
/// # Invariants
/// - At most [`limits::MAX_PROMPT_CASES`] cases.
/// - `sha256` is computed over the canonical form.
/// - Once `published`, the `(logical_id, version)` content never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPack {
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Logical identifier shared across versions.
    pub logical_id: PromptPackId,
    /// Version string.
    pub version: String,
    /// SHA-256 of the canonical content.
    pub sha256: Sha256Hex,
    /// Prompt cases in declared order.
    pub cases: Vec<PromptCase>,
    /// Whether this version is published.
    pub published: bool,
}

impl PromptPack {
    /// Validates case count, case ids, and expectation well-formedness.
    ///
    /// # Errors
    ///
    /// Returns [`PromptPackError`] naming the offending case or limit.
    pub fn validate(&self) -> Result<(), PromptPackError> {
        limits::check_case_count(self.cases.len())?;
        for case in &self.cases {
            if case.case_id.trim().is_empty() {
                return Err(PromptPackError::InvalidCase {
                    case_id: case.case_id.clone(),
                    reason: "case_id must not be empty".to_string(),
                });
            }
            if let Expectation::Regex {
                pattern,
            } = &case.expectation
                && regex::Regex::new(pattern).is_err()
            {
                return Err(PromptPackError::InvalidCase {
                    case_id: case.case_id.clone(),
                    reason: format!("invalid regex pattern: {pattern}"),
                });
            }
        }
        Ok(())
    }

    /// Computes the SHA-256 of the canonical content (cases only).
    ///
    /// # Errors
    ///
    /// Returns [`PromptPackError::Hash`] when canonicalization fails.
    pub fn canonical_sha256(&self) -> Result<Sha256Hex, PromptPackError> {
        let canonical: Vec<PromptCase> = self.cases.iter().map(canonicalize_case).collect();
        Ok(hashing::hash_canonical_json(&canonical)?)
    }
}

// ============================================================================
// SECTION: Canonicalization
// ============================================================================

/// Normalizes text: CRLF/CR to LF, trailing whitespace stripped per line,
/// trailing blank lines dropped.
///
/// Idempotent on already-canonical input.
#[must_use]
pub fn canonicalize_text(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> =
        unified.split('\n').map(|line| line.trim_end().to_string()).collect();
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines.join("\n")
}

/// Returns a canonicalized copy of a case.
fn canonicalize_case(case: &PromptCase) -> PromptCase {
    PromptCase {
        case_id: case.case_id.clone(),
        prompt: canonicalize_text(&case.prompt),
        expectation: match &case.expectation {
            Expectation::Exact {
                expected,
            } => Expectation::Exact {
                expected: canonicalize_text(expected),
            },
            other => other.clone(),
        },
    }
}
