// crates/edgegate-core/src/core/bundle.rs
// ============================================================================
// Module: EdgeGate Bundle Summary
// Description: Evidence bundle summary schema and manifest entries.
// Purpose: Define the normative summary whose canonical bytes are signed.
// Dependencies: crate::core::{hashing, identifiers}, serde
// ============================================================================

//! ## Overview
//! `summary.json` is the normative description of a run inside an evidence
//! bundle. Its RFC 8785 canonical bytes are what `summary.sig` signs, so the
//! schema here is a stable wire contract. `artifacts.json` indexes every
//! other file in the bundle with its SHA-256 so verifiers can replay
//! integrity offline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::Sha256Hex;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::DeviceId;
use crate::core::identifiers::KeyId;
use crate::core::identifiers::PipelineId;
use crate::core::identifiers::PromptPackId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkspaceId;
use crate::core::run::GateEvaluation;
use crate::core::run::NormalizedMetric;
use crate::core::run::RunOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Current bundle schema version.
pub const BUNDLE_VERSION: &str = "1.0";

// ============================================================================
// SECTION: Input References
// ============================================================================

/// Model artifact reference recorded in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    /// Artifact identifier.
    pub artifact_id: ArtifactId,
    /// SHA-256 of the model bytes.
    pub sha256: Sha256Hex,
}

/// Promptpack reference recorded in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPackRef {
    /// Logical promptpack identifier.
    pub promptpack_id: PromptPackId,
    /// Version string.
    pub version: String,
    /// SHA-256 of the canonical promptpack content.
    pub sha256: Sha256Hex,
}

/// Device reference recorded in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    /// Backend device identifier.
    pub device_id: DeviceId,
    /// Human-readable device name.
    pub device_name: String,
}

/// Inputs block of the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInputsRef {
    /// Model under test.
    pub model: ModelRef,
    /// Promptpack used for correctness.
    pub promptpack: PromptPackRef,
    /// Devices in matrix order.
    pub devices: Vec<DeviceRef>,
}

// ============================================================================
// SECTION: Results and Manifest
// ============================================================================

/// Results block of the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleResults {
    /// Terminal outcome.
    #[serde(flatten)]
    pub status: RunOutcome,
    /// Aggregated metrics.
    pub normalized_metrics: Vec<NormalizedMetric>,
    /// Gate decisions in evaluation order.
    pub gates_evaluation: Vec<GateEvaluation>,
}

/// Hash entry for a file referenced by the summary or the zip manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Bundle-relative path.
    pub path: String,
    /// SHA-256 of the file contents.
    pub sha256: Sha256Hex,
    /// File size in bytes.
    pub bytes: u64,
}

/// Signing block of the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningInfo {
    /// Signature algorithm; always `ed25519`.
    pub algo: String,
    /// Registered key id that produced `summary.sig`.
    pub public_key_id: KeyId,
}

// ============================================================================
// SECTION: Summary
// ============================================================================

/// The normative bundle summary; canonical bytes of this document are what
/// `summary.sig` signs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSummary {
    /// Bundle schema version.
    pub bundle_version: String,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Pipeline executed.
    pub pipeline_id: PipelineId,
    /// Run documented by this bundle.
    pub run_id: RunId,
    /// Bundle creation time, RFC 3339 UTC.
    pub created_at: String,
    /// Input references.
    pub inputs: BundleInputsRef,
    /// Artifact id of the capabilities document in force.
    pub capabilities_ref: ArtifactId,
    /// Artifact id of the metric mapping in force.
    pub metric_mapping_ref: ArtifactId,
    /// Results block.
    pub results: BundleResults,
    /// Hash entries for the evidence payload files under `raw/`, `mapping/`,
    /// and `capabilities/`.
    pub artifacts: Vec<ArtifactEntry>,
    /// Signing block.
    pub signing: SigningInfo,
}
