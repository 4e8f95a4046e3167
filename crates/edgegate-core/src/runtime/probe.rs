// crates/edgegate-core/src/runtime/probe.rs
// ============================================================================
// Module: EdgeGate Probe Suite
// Description: Capability discovery and metric-mapping derivation.
// Purpose: Learn, per workspace, what the backend provably exposes.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The probe suite drives the backend with fixture models to discover
//! capabilities and derive the workspace metric mapping. Every step is
//! fail-soft: a failing step records its capability as unavailable and the
//! walk continues where possible. Mapping derivation is strict the other
//! way: a metric path is marked stable only when the same path resolves,
//! with a consistent unit, in at least two probe runs. No path is ever
//! populated by assumption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::artifact::ArtifactKind;
use crate::core::capabilities::CapabilitiesDoc;
use crate::core::capabilities::CapabilitiesRecord;
use crate::core::capabilities::CapabilityId;
use crate::core::capabilities::CapabilityRecord;
use crate::core::capabilities::CapabilityStability;
use crate::core::capabilities::MetricMapping;
use crate::core::capabilities::MetricPath;
use crate::core::capabilities::MetricStability;
use crate::core::capabilities::NORMALIZED_METRICS;
use crate::core::hashing::HashError;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::DeviceId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkspaceId;
use crate::core::pipeline::PackageKind;
use crate::core::secret::SecretString;
use crate::core::time::Timestamp;
use crate::interfaces::Backend;
use crate::interfaces::BackendConnector;
use crate::interfaces::BlobStore;
use crate::interfaces::Clock;
use crate::interfaces::JobHandle;
use crate::interfaces::JobStatus;
use crate::interfaces::PackageFile;
use crate::interfaces::StoreError;
use crate::interfaces::TargetRuntime;
use crate::runtime::extract::extract_metric;
use crate::runtime::package::validate_package;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Poll backoff base in milliseconds.
const POLL_BASE_MILLIS: u64 = 2_000;
/// Poll backoff cap in milliseconds.
const POLL_CAP_MILLIS: u64 = 60_000;
/// Total probe budget per pass in milliseconds.
const PROBE_PASS_BUDGET_MILLIS: i64 = 10 * 60 * 1000;
/// Number of probe passes a mapping derivation requires.
const REQUIRED_PASSES: usize = 2;

/// Canonical candidate paths searched per normalized metric, in order.
const CANDIDATE_PATHS: &[(&str, &[(&str, &str)])] = &[
    ("peak_ram_mb", &[
        ("$.execution_summary.estimated_inference_peak_memory_mb", "mb"),
        ("$.metrics.peak_ram_mb", "mb"),
        ("$.profile.memory.peak_mb", "mb"),
    ]),
    ("ttft_ms", &[
        ("$.execution_summary.time_to_first_token_ms", "ms"),
        ("$.metrics.ttft_ms", "ms"),
    ]),
    ("tokens_per_sec", &[
        ("$.execution_summary.tokens_per_second", "tokens/sec"),
        ("$.metrics.tokens_per_sec", "tokens/sec"),
    ]),
    ("inference_time_ms", &[
        ("$.execution_summary.estimated_inference_time_ms", "ms"),
        ("$.metrics.inference_time_ms", "ms"),
    ]),
    ("npu_compute_percent", &[
        ("$.execution_detail.npu_compute_percent", "percent"),
        ("$.metrics.npu_compute_percent", "percent"),
    ]),
    ("gpu_compute_percent", &[
        ("$.execution_detail.gpu_compute_percent", "percent"),
        ("$.metrics.gpu_compute_percent", "percent"),
    ]),
    ("cpu_compute_percent", &[
        ("$.execution_detail.cpu_compute_percent", "percent"),
        ("$.metrics.cpu_compute_percent", "percent"),
    ]),
];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Probe suite failures that cannot be absorbed fail-soft.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The blob store failed while persisting probe evidence.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Canonicalization failed while writing documents.
    #[error(transparent)]
    Hash(#[from] HashError),
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of a full probe: documents stored, record ready to persist.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Capability document (also stored as a blob).
    pub capabilities: CapabilitiesDoc,
    /// Derived metric mapping (also stored as a blob).
    pub mapping: MetricMapping,
    /// Record pointing at the stored documents.
    pub record: CapabilitiesRecord,
}

/// One capability observation: id, availability, evidence, and detail.
type PassObservation = (CapabilityId, bool, Option<ArtifactId>, Option<String>);

/// Observations from a single probe pass.
struct ProbePass {
    /// Availability per capability, in ledger order.
    available: Vec<PassObservation>,
    /// Profile payloads captured during the pass.
    profile_payloads: Vec<(ArtifactId, Value)>,
}

// ============================================================================
// SECTION: Probe Suite
// ============================================================================

/// Capability discovery engine for one workspace.
pub struct ProbeSuite<'a, C: BackendConnector, B: BlobStore, K: Clock> {
    /// Backend connector.
    connector: &'a C,
    /// Content store for raw payloads and documents.
    blobs: &'a B,
    /// Host clock for polling.
    clock: &'a K,
}

impl<'a, C: BackendConnector, B: BlobStore, K: Clock> ProbeSuite<'a, C, B, K> {
    /// Creates a probe suite over the given seams.
    #[must_use]
    pub const fn new(connector: &'a C, blobs: &'a B, clock: &'a K) -> Self {
        Self {
            connector,
            blobs,
            clock,
        }
    }

    /// Runs the full probe: two passes, capability merge, mapping
    /// derivation, and document storage.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] only for store or canonicalization failures;
    /// backend failures are absorbed as unavailable capabilities.
    pub fn run(
        &self,
        workspace_id: &WorkspaceId,
        token: &SecretString,
        probe_run_id: &RunId,
    ) -> Result<ProbeOutcome, ProbeError> {
        let mut passes = Vec::with_capacity(REQUIRED_PASSES);
        for pass_index in 0..REQUIRED_PASSES {
            passes.push(self.execute_pass(workspace_id, token, pass_index)?);
        }

        let probed_at = self.clock.now();
        let capabilities = merge_passes(workspace_id, &passes, probed_at);

        let payloads: Vec<(ArtifactId, Value)> =
            passes.iter().flat_map(|pass| pass.profile_payloads.clone()).collect();
        let mapping = derive_metric_mapping(workspace_id, &payloads);

        let capabilities_bytes = crate::core::hashing::canonical_json_bytes(&capabilities)?;
        let capabilities_blob = self.blobs.put(
            workspace_id,
            ArtifactKind::Capabilities,
            &capabilities_bytes,
            "workspace_capabilities.json",
            probed_at,
        )?;
        let mapping_bytes = crate::core::hashing::canonical_json_bytes(&mapping)?;
        let mapping_blob = self.blobs.put(
            workspace_id,
            ArtifactKind::MetricMapping,
            &mapping_bytes,
            "metric_mapping.json",
            probed_at,
        )?;

        let record = CapabilitiesRecord {
            workspace_id: workspace_id.clone(),
            capabilities_blob_id: capabilities_blob.artifact_id,
            metric_mapping_blob_id: mapping_blob.artifact_id,
            probed_at,
            source_probe_run_id: probe_run_id.clone(),
        };

        Ok(ProbeOutcome {
            capabilities,
            mapping,
            record,
        })
    }

    /// Executes one fail-soft probe pass.
    fn execute_pass(
        &self,
        workspace_id: &WorkspaceId,
        token: &SecretString,
        pass_index: usize,
    ) -> Result<ProbePass, ProbeError> {
        let deadline = self.clock.now().plus_millis(PROBE_PASS_BUDGET_MILLIS);
        let mut pass = ProbePass {
            available: Vec::new(),
            profile_payloads: Vec::new(),
        };

        let session = match self.connector.connect(token) {
            Ok(session) => session,
            Err(err) => {
                record_all_unavailable(&mut pass, &format!("connect failed: {err}"));
                return Ok(pass);
            }
        };

        let identity_ok = match session.identity() {
            Ok(_) => {
                pass.available.push((CapabilityId::TokenValidation, true, None, None));
                true
            }
            Err(err) => {
                pass.available.push((
                    CapabilityId::TokenValidation,
                    false,
                    None,
                    Some(err.to_string()),
                ));
                false
            }
        };
        if !identity_ok {
            record_remaining_unavailable(&mut pass, "token validation failed");
            return Ok(pass);
        }

        let devices = match session.list_devices() {
            Ok(devices) if !devices.is_empty() => {
                pass.available.push((CapabilityId::DeviceList, true, None, None));
                devices
            }
            Ok(_) => {
                pass.available.push((
                    CapabilityId::DeviceList,
                    false,
                    None,
                    Some("device list empty".to_string()),
                ));
                record_remaining_unavailable(&mut pass, "no devices available");
                return Ok(pass);
            }
            Err(err) => {
                pass.available.push((CapabilityId::DeviceList, false, None, Some(err.to_string())));
                record_remaining_unavailable(&mut pass, "device list failed");
                return Ok(pass);
            }
        };
        let primary = devices[0].device_id.clone();

        let mut compile_ok = false;
        let mut inference_evidence: Option<ArtifactId> = None;
        let mut completed_job: Option<JobHandle> = None;

        for fixture in [fixture_onnx_single(), fixture_onnx_external(), fixture_aimet()] {
            let fixture_result = self.probe_fixture(
                workspace_id,
                &session,
                &primary,
                &fixture,
                pass_index,
                deadline,
            )?;
            if let Some(result) = fixture_result {
                compile_ok = true;
                if inference_evidence.is_none() {
                    inference_evidence = result.inference_artifact;
                }
                if let Some((payload_id, payload)) = result.profile_payload {
                    pass.profile_payloads.push((payload_id, payload));
                }
                if completed_job.is_none() {
                    completed_job = result.completed_job;
                }
                record_fixture_capability(&mut pass, fixture.kind, true, None);
            } else {
                record_fixture_capability(
                    &mut pass,
                    fixture.kind,
                    false,
                    Some("fixture walk failed".to_string()),
                );
            }
        }

        let profile_evidence = pass.profile_payloads.first().map(|(id, _)| id.clone());
        pass.available.push((CapabilityId::TargetQnnDlc, compile_ok, None, None));
        pass.available.push((
            CapabilityId::ProfileMetrics,
            profile_evidence.is_some(),
            profile_evidence,
            None,
        ));
        pass.available.push((
            CapabilityId::InferenceOutputs,
            inference_evidence.is_some(),
            inference_evidence,
            None,
        ));

        let logs_ok = completed_job
            .as_ref()
            .and_then(|job| session.fetch_logs(job).ok().flatten())
            .map(|bytes| {
                self.blobs.put(
                    workspace_id,
                    ArtifactKind::BackendLog,
                    &bytes,
                    &format!("probe-pass{pass_index}-logs.txt"),
                    self.clock.now(),
                )
            })
            .transpose()?;
        pass.available.push((
            CapabilityId::JobLogs,
            logs_ok.is_some(),
            logs_ok.map(|record| record.artifact_id),
            None,
        ));

        Ok(pass)
    }

    /// Walks one fixture: validate, upload, compile, profile, inference.
    fn probe_fixture<S: Backend>(
        &self,
        workspace_id: &WorkspaceId,
        session: &S,
        primary: &DeviceId,
        fixture: &PackageFixture,
        pass_index: usize,
        deadline: Timestamp,
    ) -> Result<Option<FixtureResult>, ProbeError> {
        if validate_package(fixture.container_name.as_deref(), &fixture.files).is_err() {
            return Ok(None);
        }
        let Ok(model) =
            session.upload_model(&fixture.files[0].bytes, fixture.kind, &fixture.name)
        else {
            return Ok(None);
        };
        let Ok(compile_job) =
            session.submit_compile(&model, primary, TargetRuntime::QnnDlc, &json!({}))
        else {
            return Ok(None);
        };
        if !self.poll_to_success(session, &compile_job, deadline) {
            return Ok(None);
        }

        let mut result = FixtureResult {
            completed_job: Some(compile_job.clone()),
            profile_payload: None,
            inference_artifact: None,
        };

        if let Ok(profile_job) = session.submit_profile(&compile_job, primary, &json!({}))
            && self.poll_to_success(session, &profile_job, deadline)
            && let Ok(bytes) = session.fetch_payload(&profile_job)
        {
            let record = self.blobs.put(
                workspace_id,
                ArtifactKind::ProbeRaw,
                &bytes,
                &format!("probe-pass{pass_index}-{}-profile.json", fixture.name),
                self.clock.now(),
            )?;
            if let Ok(payload) = serde_json::from_slice::<Value>(&bytes) {
                result.profile_payload = Some((record.artifact_id, payload));
            }
            result.completed_job = Some(profile_job);
        }

        if let Ok(inference_job) =
            session.submit_inference(&compile_job, primary, &json!({ "inputs": [] }))
            && self.poll_to_success(session, &inference_job, deadline)
            && let Ok(bytes) = session.fetch_payload(&inference_job)
        {
            let record = self.blobs.put(
                workspace_id,
                ArtifactKind::ProbeRaw,
                &bytes,
                &format!("probe-pass{pass_index}-{}-inference.json", fixture.name),
                self.clock.now(),
            )?;
            result.inference_artifact = Some(record.artifact_id);
        }

        Ok(Some(result))
    }

    /// Polls a job to terminal success under the pass budget.
    fn poll_to_success<S: Backend>(
        &self,
        session: &S,
        job: &JobHandle,
        deadline: Timestamp,
    ) -> bool {
        let mut backoff = POLL_BASE_MILLIS;
        loop {
            if self.clock.now() > deadline {
                return false;
            }
            match session.poll(job) {
                Ok(JobStatus::Success) => return true,
                Ok(JobStatus::Failed {
                    ..
                }) => return false,
                Ok(JobStatus::Pending | JobStatus::Running) => {
                    self.clock.sleep_millis(backoff);
                    backoff = (backoff * 2).min(POLL_CAP_MILLIS);
                }
                Err(_) => return false,
            }
        }
    }
}

/// Per-fixture probe result.
struct FixtureResult {
    /// A terminal job usable for the log probe.
    completed_job: Option<JobHandle>,
    /// Stored profile payload, when profiling succeeded.
    profile_payload: Option<(ArtifactId, Value)>,
    /// Stored inference payload, when inference succeeded.
    inference_artifact: Option<ArtifactId>,
}

// ============================================================================
// SECTION: Capability Merge
// ============================================================================

/// Records every capability as unavailable (connect-level failure).
fn record_all_unavailable(pass: &mut ProbePass, detail: &str) {
    for capability in CapabilityId::ALL {
        pass.available.push((*capability, false, None, Some(detail.to_string())));
    }
}

/// Records remaining capabilities as unavailable after an early stop.
fn record_remaining_unavailable(pass: &mut ProbePass, detail: &str) {
    let seen: Vec<CapabilityId> =
        pass.available.iter().map(|(capability, ..)| *capability).collect();
    for capability in CapabilityId::ALL {
        if !seen.contains(capability) {
            pass.available.push((*capability, false, None, Some(detail.to_string())));
        }
    }
}

/// Records a fixture-specific packaging capability.
fn record_fixture_capability(
    pass: &mut ProbePass,
    kind: PackageKind,
    available: bool,
    detail: Option<String>,
) {
    let capability = match kind {
        PackageKind::OnnxSingle => return,
        PackageKind::OnnxExternal => CapabilityId::ModelOnnxExternalData,
        PackageKind::AimetQuant => CapabilityId::ModelAimetOnnxEncodings,
    };
    pass.available.push((capability, available, None, detail));
}

/// Merges pass observations into the capability document.
fn merge_passes(
    workspace_id: &WorkspaceId,
    passes: &[ProbePass],
    probed_at: Timestamp,
) -> CapabilitiesDoc {
    let mut capabilities = Vec::with_capacity(CapabilityId::ALL.len());
    for capability in CapabilityId::ALL {
        let observations: Vec<&PassObservation> = passes
            .iter()
            .filter_map(|pass| pass.available.iter().find(|entry| entry.0 == *capability))
            .collect();
        let available_count = observations.iter().filter(|entry| entry.1).count();
        let available = observations.last().is_some_and(|entry| entry.1);
        let stability = if available_count == passes.len() && !passes.is_empty() {
            CapabilityStability::Stable
        } else if available_count > 0 {
            CapabilityStability::Unstable
        } else {
            CapabilityStability::Unknown
        };
        let evidence_artifact_id = observations.iter().find_map(|entry| entry.2.clone());
        let detail = observations.iter().find_map(|entry| entry.3.clone());
        capabilities.push(CapabilityRecord {
            capability: *capability,
            available,
            stability,
            evidence_artifact_id,
            detail,
        });
    }
    CapabilitiesDoc {
        workspace_id: workspace_id.clone(),
        probed_at,
        capabilities,
    }
}

// ============================================================================
// SECTION: Mapping Derivation
// ============================================================================

/// Derives the metric mapping from profile payloads across probe passes.
///
/// A metric is stable only when one canonical candidate path resolves to a
/// number in at least two payloads; present-but-divergent observations are
/// unstable; everything else is unavailable with a null path.
#[must_use]
pub fn derive_metric_mapping(
    workspace_id: &WorkspaceId,
    payloads: &[(ArtifactId, Value)],
) -> MetricMapping {
    let mut mapping = MetricMapping {
        workspace_id: workspace_id.clone(),
        derived_from_artifacts: payloads.iter().map(|(id, _)| id.clone()).collect(),
        metrics: std::collections::BTreeMap::new(),
    };

    for metric in NORMALIZED_METRICS {
        let candidates = CANDIDATE_PATHS
            .iter()
            .find(|(name, _)| name == metric)
            .map(|(_, candidates)| *candidates)
            .unwrap_or(&[]);

        let mut resolved: Option<MetricPath> = None;
        if payloads.len() >= REQUIRED_PASSES {
            for (path, unit) in candidates {
                let hits = payloads
                    .iter()
                    .filter(|(_, payload)| extract_metric(payload, path).is_some())
                    .count();
                if hits >= REQUIRED_PASSES {
                    resolved = Some(MetricPath {
                        json_path: Some((*path).to_string()),
                        unit: Some((*unit).to_string()),
                        stability: MetricStability::Stable,
                    });
                    break;
                }
                if hits > 0 && resolved.is_none() {
                    resolved = Some(MetricPath {
                        json_path: Some((*path).to_string()),
                        unit: Some((*unit).to_string()),
                        stability: MetricStability::Unstable,
                    });
                }
            }
        }

        mapping
            .metrics
            .insert((*metric).to_string(), resolved.unwrap_or_else(MetricPath::unavailable));
    }
    mapping
}

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// One packaging fixture submitted during a probe pass.
struct PackageFixture {
    /// Fixture display name.
    name: String,
    /// Container directory name, when the shape requires one.
    container_name: Option<String>,
    /// Fixture files.
    files: Vec<PackageFile>,
    /// Expected packaging kind.
    kind: PackageKind,
}

/// Single-file ONNX fixture.
fn fixture_onnx_single() -> PackageFixture {
    PackageFixture {
        name: "fixture-onnx-single".to_string(),
        container_name: None,
        files: vec![PackageFile::new("model.onnx", b"edgegate-probe-fixture:onnx".to_vec())],
        kind: PackageKind::OnnxSingle,
    }
}

/// ONNX + external data fixture; the model bytes reference the data name.
fn fixture_onnx_external() -> PackageFixture {
    PackageFixture {
        name: "fixture-onnx-external".to_string(),
        container_name: None,
        files: vec![
            PackageFile::new("model.onnx", b"edgegate-probe-fixture:onnx model.data".to_vec()),
            PackageFile::new("model.data", b"edgegate-probe-fixture:external".to_vec()),
        ],
        kind: PackageKind::OnnxExternal,
    }
}

/// AIMET quantized package fixture.
fn fixture_aimet() -> PackageFixture {
    PackageFixture {
        name: "fixture-aimet".to_string(),
        container_name: Some("fixture.aimet".to_string()),
        files: vec![
            PackageFile::new("model.onnx", b"edgegate-probe-fixture:onnx model.data".to_vec()),
            PackageFile::new("model.encodings", b"{}".to_vec()),
            PackageFile::new("model.data", b"edgegate-probe-fixture:external".to_vec()),
        ],
        kind: PackageKind::AimetQuant,
    }
}
