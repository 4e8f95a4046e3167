// crates/edgegate-core/src/core/artifact.rs
// ============================================================================
// Module: EdgeGate Artifacts
// Description: Content-addressed artifact records and retention metadata.
// Purpose: Track immutable blobs by SHA-256 under per-workspace ownership.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Artifacts are immutable blobs keyed by SHA-256 and scoped to a workspace.
//! Identical bytes under the same workspace deduplicate. Expired artifacts
//! keep their row as a tombstone so hash references inside old evidence
//! bundles remain attributable after the bytes are deleted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::Sha256Hex;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::WorkspaceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Artifact Kind
// ============================================================================

/// Artifact kinds stored by EdgeGate.
///
/// # Invariants
/// - Variants are stable for serialization and storage-layout matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Uploaded model package.
    Model,
    /// Canonicalized promptpack JSON.
    PromptpackJson,
    /// Raw probe payload captured from the backend.
    ProbeRaw,
    /// Signed evidence bundle.
    Bundle,
    /// Materialized job specification.
    JobSpec,
    /// Raw run payload captured from the backend.
    RunRaw,
    /// Backend job log.
    BackendLog,
    /// Workspace capabilities document.
    Capabilities,
    /// Workspace metric mapping document.
    MetricMapping,
    /// Materialized measurement table.
    Measurements,
}

/// Artifact retention window in days, counted from `created_at`.
pub const ARTIFACT_RETENTION_DAYS: i64 = 30;

// ============================================================================
// SECTION: Artifact Record
// ============================================================================

/// Metadata row for one content-addressed artifact.
///
/// # Invariants
/// - `sha256` is computed from the bytes actually stored, never declared.
/// - A tombstoned artifact retains its row while the bytes are deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact identifier.
    pub artifact_id: ArtifactId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// SHA-256 of the stored bytes.
    pub sha256: Sha256Hex,
    /// Storage key, `artifacts/{sha256}/{filename}`.
    pub storage_url: String,
    /// Size of the stored bytes.
    pub bytes: u64,
    /// Original filename as uploaded.
    pub original_filename: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Expiry time for retention enforcement.
    pub expires_at: Timestamp,
    /// Whether the underlying bytes have been deleted.
    pub tombstoned: bool,
}

impl ArtifactRecord {
    /// Returns the storage key for a digest and filename.
    #[must_use]
    pub fn storage_key(sha256: &Sha256Hex, filename: &str) -> String {
        format!("artifacts/{sha256}/{filename}")
    }
}
