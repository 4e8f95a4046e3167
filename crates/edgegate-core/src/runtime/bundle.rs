// crates/edgegate-core/src/runtime/bundle.rs
// ============================================================================
// Module: EdgeGate Evidence Bundler
// Description: Deterministic bundle assembly, signing, and offline verification.
// Purpose: Produce the signed evidence a build pipeline can block on.
// Dependencies: crate::{core, interfaces}, edgegate-crypto
// ============================================================================

//! ## Overview
//! A bundle holds `summary.json` (canonical RFC 8785 bytes, exactly what
//! `summary.sig` signs), `report.html` derived from the summary,
//! `artifacts.json` indexing every other file with its SHA-256, and the
//! `raw/`, `mapping/`, and `capabilities/` evidence subtrees. Verifiers need
//! only the summary, the signature, and the published public key; every file
//! is then checkable through the manifest hashes. The builder is
//! container-agnostic: hosts supply the sink (zip or directory).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use ed25519_dalek::VerifyingKey;
use thiserror::Error;

use edgegate_crypto::EvidenceSigner;
use edgegate_crypto::verify_detached;

use crate::core::bundle::ArtifactEntry;
use crate::core::bundle::BUNDLE_VERSION;
use crate::core::bundle::BundleInputsRef;
use crate::core::bundle::BundleResults;
use crate::core::bundle::BundleSummary;
use crate::core::bundle::DeviceRef;
use crate::core::bundle::ModelRef;
use crate::core::bundle::PromptPackRef;
use crate::core::bundle::SigningInfo;
use crate::core::hashing;
use crate::core::hashing::HashError;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::KeyId;
use crate::core::identifiers::PipelineId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkspaceId;
use crate::core::run::GateEvaluation;
use crate::core::run::GateStatus;
use crate::core::run::NormalizedMetric;
use crate::core::run::RunOutcome;
use crate::core::time::Timestamp;
use crate::interfaces::BundleReader;
use crate::interfaces::BundleSink;
use crate::interfaces::BundleSinkError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bundle path of the canonical summary.
const SUMMARY_PATH: &str = "summary.json";
/// Bundle path of the detached signature (raw 64 bytes).
const SIGNATURE_PATH: &str = "summary.sig";
/// Bundle path of the human-readable report.
const REPORT_PATH: &str = "report.html";
/// Bundle path of the file manifest.
const MANIFEST_PATH: &str = "artifacts.json";
/// Bundle path of the metric mapping document.
const MAPPING_PATH: &str = "mapping/metric_mapping.json";
/// Bundle path of the capabilities document.
const CAPABILITIES_PATH: &str = "capabilities/workspace_capabilities.json";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while building or verifying a bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Canonicalization failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// Sink or reader failure.
    #[error(transparent)]
    Sink(#[from] BundleSinkError),
    /// Summary formatting failed.
    #[error("bundle summary error: {0}")]
    Summary(String),
    /// Verification failed; the bundle must be treated as tampered.
    #[error("bundle verification failed: {0}")]
    Verify(String),
}

// ============================================================================
// SECTION: Inputs
// ============================================================================

/// Everything the builder needs to assemble one bundle.
pub struct BundleInputs {
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Pipeline executed.
    pub pipeline_id: PipelineId,
    /// Run documented by the bundle.
    pub run_id: RunId,
    /// Bundle creation time.
    pub created_at: Timestamp,
    /// Model reference.
    pub model: ModelRef,
    /// Promptpack reference.
    pub promptpack: PromptPackRef,
    /// Devices in matrix order.
    pub devices: Vec<DeviceRef>,
    /// Artifact id of the capabilities document.
    pub capabilities_ref: ArtifactId,
    /// Artifact id of the metric mapping document.
    pub metric_mapping_ref: ArtifactId,
    /// Terminal outcome.
    pub outcome: RunOutcome,
    /// Aggregated metrics.
    pub normalized_metrics: Vec<NormalizedMetric>,
    /// Gate decisions in evaluation order.
    pub gates_evaluation: Vec<GateEvaluation>,
    /// Raw payload files placed under `raw/` as `(filename, bytes)`.
    pub raw_payloads: Vec<(String, Vec<u8>)>,
    /// `metric_mapping.json` bytes.
    pub mapping_json: Vec<u8>,
    /// `workspace_capabilities.json` bytes.
    pub capabilities_json: Vec<u8>,
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Evidence bundle builder; signs with the current active key.
pub struct BundleBuilder<'a> {
    /// Active evidence signer.
    signer: &'a EvidenceSigner,
}

impl<'a> BundleBuilder<'a> {
    /// Creates a builder over the active signing key.
    #[must_use]
    pub const fn new(signer: &'a EvidenceSigner) -> Self {
        Self {
            signer,
        }
    }

    /// Assembles, signs, and writes a bundle through the sink.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError`] when canonicalization, signing, or the sink
    /// fails; callers map any failure to `BUNDLE_FAILED`.
    pub fn build<S: BundleSink>(
        &self,
        sink: &mut S,
        inputs: &BundleInputs,
    ) -> Result<BundleSummary, BundleError> {
        let mut evidence_entries = Vec::new();

        for (filename, bytes) in &inputs.raw_payloads {
            let path = format!("raw/{filename}");
            sink.write(&path, bytes)?;
            evidence_entries.push(entry_for(&path, bytes));
        }
        sink.write(MAPPING_PATH, &inputs.mapping_json)?;
        evidence_entries.push(entry_for(MAPPING_PATH, &inputs.mapping_json));
        sink.write(CAPABILITIES_PATH, &inputs.capabilities_json)?;
        evidence_entries.push(entry_for(CAPABILITIES_PATH, &inputs.capabilities_json));

        let created_at = inputs
            .created_at
            .to_rfc3339()
            .map_err(|err| BundleError::Summary(err.to_string()))?;
        let summary = BundleSummary {
            bundle_version: BUNDLE_VERSION.to_string(),
            workspace_id: inputs.workspace_id.clone(),
            pipeline_id: inputs.pipeline_id.clone(),
            run_id: inputs.run_id.clone(),
            created_at,
            inputs: BundleInputsRef {
                model: inputs.model.clone(),
                promptpack: inputs.promptpack.clone(),
                devices: inputs.devices.clone(),
            },
            capabilities_ref: inputs.capabilities_ref.clone(),
            metric_mapping_ref: inputs.metric_mapping_ref.clone(),
            results: BundleResults {
                status: inputs.outcome.clone(),
                normalized_metrics: inputs.normalized_metrics.clone(),
                gates_evaluation: inputs.gates_evaluation.clone(),
            },
            artifacts: evidence_entries.clone(),
            signing: SigningInfo {
                algo: "ed25519".to_string(),
                public_key_id: KeyId::new(self.signer.key_id()),
            },
        };

        let summary_bytes = hashing::canonical_json_bytes(&summary)?;
        sink.write(SUMMARY_PATH, &summary_bytes)?;
        let signature = self.signer.sign(&summary_bytes);
        sink.write(SIGNATURE_PATH, &signature)?;

        let report = render_report(&summary);
        sink.write(REPORT_PATH, report.as_bytes())?;

        let mut manifest_entries = evidence_entries;
        manifest_entries.push(entry_for(SUMMARY_PATH, &summary_bytes));
        manifest_entries.push(entry_for(SIGNATURE_PATH, &signature));
        manifest_entries.push(entry_for(REPORT_PATH, report.as_bytes()));
        manifest_entries.sort_by(|a, b| a.path.cmp(&b.path));
        let manifest_bytes = hashing::canonical_json_bytes(&manifest_entries)?;
        sink.write(MANIFEST_PATH, &manifest_bytes)?;

        Ok(summary)
    }
}

/// Builds a manifest entry for one written file.
fn entry_for(path: &str, bytes: &[u8]) -> ArtifactEntry {
    ArtifactEntry {
        path: path.to_string(),
        sha256: hashing::hash_bytes(bytes),
        bytes: bytes.len() as u64,
    }
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies a bundle offline: manifest hash replay plus signature check.
///
/// Fails closed on missing entries, extra files, digest mismatches, or a
/// signature that does not verify under `key`.
///
/// # Errors
///
/// Returns [`BundleError::Verify`] naming the first failing check.
pub fn verify_bundle<R: BundleReader>(
    reader: &R,
    key: &VerifyingKey,
) -> Result<BundleSummary, BundleError> {
    let manifest_bytes = reader.read(MANIFEST_PATH)?;
    let entries: Vec<ArtifactEntry> = serde_json::from_slice(&manifest_bytes)
        .map_err(|err| BundleError::Verify(format!("malformed {MANIFEST_PATH}: {err}")))?;

    let mut indexed: BTreeSet<String> = BTreeSet::new();
    for entry in &entries {
        let bytes = reader.read(&entry.path)?;
        let digest = hashing::hash_bytes(&bytes);
        if digest != entry.sha256 {
            return Err(BundleError::Verify(format!("digest mismatch for {}", entry.path)));
        }
        if bytes.len() as u64 != entry.bytes {
            return Err(BundleError::Verify(format!("size mismatch for {}", entry.path)));
        }
        indexed.insert(entry.path.clone());
    }

    for path in reader.paths()? {
        if path != MANIFEST_PATH && !indexed.contains(&path) {
            return Err(BundleError::Verify(format!("unindexed file {path}")));
        }
    }
    if !indexed.contains(SUMMARY_PATH) || !indexed.contains(SIGNATURE_PATH) {
        return Err(BundleError::Verify("summary or signature missing from manifest".to_string()));
    }

    let summary_bytes = reader.read(SUMMARY_PATH)?;
    let summary: BundleSummary = serde_json::from_slice(&summary_bytes)
        .map_err(|err| BundleError::Verify(format!("malformed {SUMMARY_PATH}: {err}")))?;
    if summary.signing.algo != "ed25519" {
        return Err(BundleError::Verify(format!(
            "unsupported signature algorithm {}",
            summary.signing.algo
        )));
    }

    let signature = reader.read(SIGNATURE_PATH)?;
    verify_detached(key, &summary_bytes, &signature)
        .map_err(|_| BundleError::Verify("signature does not verify".to_string()))?;

    for entry in &summary.artifacts {
        let bytes = reader.read(&entry.path)?;
        if hashing::hash_bytes(&bytes) != entry.sha256 {
            return Err(BundleError::Verify(format!(
                "summary artifact digest mismatch for {}",
                entry.path
            )));
        }
    }

    Ok(summary)
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Renders the human-readable report from the summary, deterministically.
fn render_report(summary: &BundleSummary) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head><title>EdgeGate Run ");
    html.push_str(&escape(summary.run_id.as_str()));
    html.push_str("</title></head>\n<body>\n");
    html.push_str(&format!(
        "<h1>Run {}</h1>\n<p>Workspace {} / pipeline {} / created {}</p>\n",
        escape(summary.run_id.as_str()),
        escape(summary.workspace_id.as_str()),
        escape(summary.pipeline_id.as_str()),
        escape(&summary.created_at)
    ));
    let status = match &summary.results.status {
        RunOutcome::Passed => "passed".to_string(),
        RunOutcome::Failed => "failed".to_string(),
        RunOutcome::Error {
            code,
            detail,
        } => format!("error ({code}): {}", escape(detail)),
    };
    html.push_str(&format!("<h2>Status: {status}</h2>\n<h3>Gates</h3>\n<ul>\n"));
    for gate in &summary.results.gates_evaluation {
        let label = match gate.status {
            GateStatus::Pass => "pass",
            GateStatus::Fail => "fail",
            GateStatus::Skipped => "skipped",
        };
        html.push_str(&format!(
            "<li>{} on {}: {label} (required: {})</li>\n",
            escape(&gate.metric),
            escape(gate.device_id.as_str()),
            gate.required
        ));
    }
    html.push_str("</ul>\n<h3>Metrics</h3>\n<ul>\n");
    for metric in &summary.results.normalized_metrics {
        html.push_str(&format!(
            "<li>{} on {}: median {} ({} repeats)</li>\n",
            escape(&metric.metric),
            escape(metric.device_id.as_str()),
            metric.median,
            metric.repeats
        ));
    }
    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

/// Escapes HTML-significant characters.
fn escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
