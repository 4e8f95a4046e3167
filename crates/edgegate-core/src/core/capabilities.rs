// crates/edgegate-core/src/core/capabilities.rs
// ============================================================================
// Module: EdgeGate Capabilities and Metric Mapping
// Description: Per-workspace capability ledger and probed metric paths.
// Purpose: Record what the backend provably exposes; never assume a path.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! The capability ledger enumerates what the backend exposes for one
//! workspace, each claim justified by the raw probe payload that proved it.
//! The metric mapping records, per normalized metric, the JSON-path into the
//! backend's profile payload plus a unit and stability marker. A path exists
//! only when probe derivation observed it resolve consistently in at least
//! two runs; nothing here is ever populated by assumption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkspaceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Normalized metric names the probe derivation searches for.
pub const NORMALIZED_METRICS: &[&str] = &[
    "peak_ram_mb",
    "ttft_ms",
    "tokens_per_sec",
    "inference_time_ms",
    "npu_compute_percent",
    "gpu_compute_percent",
    "cpu_compute_percent",
];

// ============================================================================
// SECTION: Capability Ledger
// ============================================================================

/// Capability identifiers the probe suite must report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapabilityId {
    /// Backend accepted the integration token.
    TokenValidation,
    /// Backend returned a device list.
    DeviceList,
    /// Backend compiled to the `qnn_dlc` target runtime.
    TargetQnnDlc,
    /// Backend accepted an ONNX model with external data.
    ModelOnnxExternalData,
    /// Backend accepted an AIMET quantized package.
    ModelAimetOnnxEncodings,
    /// Backend profile payloads carried usable metrics.
    ProfileMetrics,
    /// Backend inference payloads carried outputs.
    InferenceOutputs,
    /// Backend served job logs.
    JobLogs,
}

impl CapabilityId {
    /// All capability ids, in ledger order.
    pub const ALL: &'static [Self] = &[
        Self::TokenValidation,
        Self::DeviceList,
        Self::TargetQnnDlc,
        Self::ModelOnnxExternalData,
        Self::ModelAimetOnnxEncodings,
        Self::ProfileMetrics,
        Self::InferenceOutputs,
        Self::JobLogs,
    ];
}

/// Tri-state stability classification for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStability {
    /// Observed consistently across probe runs.
    Stable,
    /// Observed, but with divergent shapes across probe runs.
    Unstable,
    /// Not enough observations to classify.
    Unknown,
}

/// One capability claim, justified by a raw probe payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Capability identifier.
    pub capability: CapabilityId,
    /// Whether the capability is available for this workspace.
    pub available: bool,
    /// Stability classification.
    pub stability: CapabilityStability,
    /// Artifact whose shape justified the claim, when one exists.
    pub evidence_artifact_id: Option<ArtifactId>,
    /// Free-form detail (vendor error, fixture name).
    pub detail: Option<String>,
}

/// Workspace capability document, stored as `workspace_capabilities.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesDoc {
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Probe completion time.
    pub probed_at: Timestamp,
    /// Capability claims in ledger order.
    pub capabilities: Vec<CapabilityRecord>,
}

impl CapabilitiesDoc {
    /// Returns the record for a capability, when present.
    #[must_use]
    pub fn record(&self, capability: CapabilityId) -> Option<&CapabilityRecord> {
        self.capabilities.iter().find(|record| record.capability == capability)
    }
}

// ============================================================================
// SECTION: Metric Mapping
// ============================================================================

/// Stability of one normalized metric's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStability {
    /// Same path and unit resolved in at least two probe runs.
    Stable,
    /// Present, but path or unit diverged across probe runs.
    Unstable,
    /// Never resolved; `json_path` is null.
    Unavailable,
}

/// One normalized metric's path, unit, and stability.
///
/// # Invariants
/// - `json_path` is non-null only when derived from probe payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricPath {
    /// JSON-path into the backend profile payload, when proven.
    pub json_path: Option<String>,
    /// Unit of the resolved value, when proven.
    pub unit: Option<String>,
    /// Stability marker.
    pub stability: MetricStability,
}

impl MetricPath {
    /// Returns an unavailable path (no observation).
    #[must_use]
    pub const fn unavailable() -> Self {
        Self {
            json_path: None,
            unit: None,
            stability: MetricStability::Unavailable,
        }
    }
}

/// Workspace metric mapping, stored as `metric_mapping.json`.
///
/// # Invariants
/// - Any non-null path is justified by at least two payload refs in
///   `derived_from_artifacts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricMapping {
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Raw probe payloads the derivation ran over.
    pub derived_from_artifacts: Vec<ArtifactId>,
    /// Normalized metric name to path record.
    pub metrics: BTreeMap<String, MetricPath>,
}

impl MetricMapping {
    /// Returns the path record for a metric, defaulting to unavailable.
    #[must_use]
    pub fn metric(&self, name: &str) -> MetricPath {
        self.metrics.get(name).cloned().unwrap_or_else(MetricPath::unavailable)
    }
}

// ============================================================================
// SECTION: Capabilities Record
// ============================================================================

/// The per-workspace pointer to the current capability documents.
///
/// # Invariants
/// - Exactly one current record per workspace; replacement swaps the whole
///   record, never edits blobs in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesRecord {
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Blob holding `workspace_capabilities.json`.
    pub capabilities_blob_id: ArtifactId,
    /// Blob holding `metric_mapping.json`.
    pub metric_mapping_blob_id: ArtifactId,
    /// Probe completion time.
    pub probed_at: Timestamp,
    /// Probe run that produced the documents.
    pub source_probe_run_id: RunId,
}
