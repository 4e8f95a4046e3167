// crates/edgegate-core/src/core/run.rs
// ============================================================================
// Module: EdgeGate Run State
// Description: Run records, state machine states, integrations, signing keys.
// Purpose: Capture deterministic run evolution for replay and audit.
// Dependencies: crate::core::{errors, identifiers, pipeline, time}, serde
// ============================================================================

//! ## Overview
//! A run is one execution of a pipeline against a model artifact. State
//! mutations are totally ordered and append-only; a terminal state is never
//! left. The record also persists submitted job handles and payload artifact
//! ids so a crashed worker resumes by re-running the idempotent next step.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Number;

use crate::core::errors::ErrorCode;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::DeviceId;
use crate::core::identifiers::KeyId;
use crate::core::identifiers::PipelineId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkspaceId;
use crate::core::pipeline::GateOp;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Run States
// ============================================================================

/// Run lifecycle states.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
/// - `Passed`, `Failed`, and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepted, waiting for the workspace slot.
    Queued,
    /// Dispatched to a worker; hydrating inputs.
    Preparing,
    /// Submitting jobs to the backend.
    Submitting,
    /// Polling outstanding backend jobs.
    Running,
    /// Fetching payloads and materializing the measurement table.
    Collecting,
    /// Running the gating evaluator.
    Evaluating,
    /// Building and signing the evidence bundle.
    Reporting,
    /// Terminal: all required gates passed.
    Passed,
    /// Terminal: a required gate failed.
    Failed,
    /// Terminal: the run errored; see `error_code`.
    Error,
}

impl RunState {
    /// Returns whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Error)
    }

    /// Returns whether `next` is a legal successor of this state.
    ///
    /// The forward chain is total; `Error` is reachable from any
    /// non-terminal state; terminal states have no successors.
    #[must_use]
    pub const fn can_transition(&self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Error) {
            return true;
        }
        matches!(
            (self, next),
            (Self::Queued, Self::Preparing)
                | (Self::Preparing, Self::Submitting)
                | (Self::Submitting, Self::Running)
                | (Self::Running, Self::Collecting)
                | (Self::Collecting, Self::Evaluating)
                | (Self::Evaluating, Self::Reporting)
                | (Self::Reporting, Self::Passed | Self::Failed)
        )
    }
}

/// What triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Triggered manually through the control plane.
    Manual,
    /// Triggered by an authenticated CI webhook.
    Ci,
}

// ============================================================================
// SECTION: Evaluation Records
// ============================================================================

/// Aggregated value for one `(device, metric)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetric {
    /// Device the metric was measured on.
    pub device_id: DeviceId,
    /// Normalized metric name.
    pub metric: String,
    /// Median over measurement repeats (or the derived single value).
    pub median: f64,
    /// Unit from the metric mapping, when known.
    pub unit: Option<String>,
    /// Coefficient of variation over repeats; absent when undefined.
    pub cv: Option<f64>,
    /// Whether dispersion exceeded the family threshold.
    pub flaky: bool,
    /// Number of measurement repeats aggregated.
    pub repeats: usize,
}

/// Status of one evaluated gate on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// The predicate held.
    Pass,
    /// The predicate did not hold.
    Fail,
    /// The gate was skipped; see `reason`.
    Skipped,
}

/// One gate decision for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    /// Gated metric name.
    pub metric: String,
    /// Device the gate was evaluated on.
    pub device_id: DeviceId,
    /// Comparison operator.
    pub op: GateOp,
    /// Threshold the median was compared against.
    pub threshold: Number,
    /// Whether the gate was required.
    pub required: bool,
    /// Decision.
    pub status: GateStatus,
    /// Observed median, when a value existed.
    pub observed: Option<f64>,
    /// Reason for a skip or error classification.
    pub reason: Option<String>,
}

/// Terminal outcome decided by the gating evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// All required gates passed.
    Passed,
    /// At least one required gate failed.
    Failed,
    /// Evaluation terminated with an error.
    Error {
        /// Stable error code.
        code: ErrorCode,
        /// Detail naming the gate or metric.
        detail: String,
    },
}

// ============================================================================
// SECTION: Submitted Jobs
// ============================================================================

/// Kind of backend job submitted for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Compile to the target runtime.
    Compile,
    /// Profile a compiled model.
    Profile,
    /// Run inference for correctness outputs.
    Inference,
}

/// A job handle persisted for crash recovery and collection.
///
/// Iteration index 0 is the warmup; measurement repeats start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    /// Device the job targets.
    pub device_id: DeviceId,
    /// Job kind.
    pub kind: JobKind,
    /// Iteration index (0 = warmup).
    pub iteration: u32,
    /// Opaque backend job handle.
    pub job_handle: String,
}

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// One execution of a pipeline against a model artifact.
///
/// # Invariants
/// - `state` mutations form a totally ordered, monotone sequence ending in a
///   terminal state; once terminal, `state` never changes.
/// - At most one run per workspace is in a non-terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Pipeline executed.
    pub pipeline_id: PipelineId,
    /// Trigger source.
    pub trigger: RunTrigger,
    /// Current state.
    pub state: RunState,
    /// Model artifact under test.
    pub model_artifact_id: ArtifactId,
    /// Time the run left `Queued`; anchors the hard deadline.
    pub started_at: Option<Timestamp>,
    /// Materialized job spec blob, set during preparing.
    pub job_spec_artifact_id: Option<ArtifactId>,
    /// Jobs submitted to the backend, set during submitting.
    pub submitted_jobs: Vec<SubmittedJob>,
    /// Raw payload blobs captured during collecting.
    pub raw_payload_artifacts: Vec<ArtifactId>,
    /// Materialized measurement table blob, set during collecting.
    pub measurement_table_artifact_id: Option<ArtifactId>,
    /// Outcome decided by the evaluator, set during evaluating.
    pub outcome: Option<RunOutcome>,
    /// Aggregated metrics, set during evaluating.
    pub normalized_metrics: Option<Vec<NormalizedMetric>>,
    /// Gate decisions, set during evaluating.
    pub gates_eval: Option<Vec<GateEvaluation>>,
    /// Signed evidence bundle, set during reporting.
    pub bundle_artifact_id: Option<ArtifactId>,
    /// Error code for terminal `Error` runs.
    pub error_code: Option<ErrorCode>,
    /// Error detail for terminal `Error` runs.
    pub error_detail: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last state-change time.
    pub updated_at: Timestamp,
}

impl RunRecord {
    /// Creates a fresh run in `Queued` state.
    #[must_use]
    pub fn new_queued(
        run_id: RunId,
        workspace_id: WorkspaceId,
        pipeline_id: PipelineId,
        trigger: RunTrigger,
        model_artifact_id: ArtifactId,
        created_at: Timestamp,
    ) -> Self {
        Self {
            run_id,
            workspace_id,
            pipeline_id,
            trigger,
            state: RunState::Queued,
            model_artifact_id,
            started_at: None,
            job_spec_artifact_id: None,
            submitted_jobs: Vec::new(),
            raw_payload_artifacts: Vec::new(),
            measurement_table_artifact_id: None,
            outcome: None,
            normalized_metrics: None,
            gates_eval: None,
            bundle_artifact_id: None,
            error_code: None,
            error_detail: None,
            created_at,
            updated_at: created_at,
        }
    }
}

// ============================================================================
// SECTION: Integrations
// ============================================================================

/// Backend integration status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    /// Usable for runs.
    Active,
    /// Present but disabled.
    Disabled,
}

/// Backend integration for one workspace.
///
/// # Invariants
/// - Token plaintext exists only in worker memory; this record holds the
///   sealed form and the last four characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Provider label (`qaihub`).
    pub provider: String,
    /// Status.
    pub status: IntegrationStatus,
    /// Envelope-sealed token, serialized [`edgegate_crypto::SealedSecret`].
    pub sealed_token: serde_json::Value,
    /// Last four characters of the token; the only substring ever returned.
    pub token_last4: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub updated_at: Timestamp,
}

// ============================================================================
// SECTION: Signing Keys
// ============================================================================

/// Registered evidence signing key.
///
/// # Invariants
/// - Records are never deleted; revocation only sets `revoked_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    /// Key identifier recorded in bundle summaries.
    pub key_id: KeyId,
    /// Base64 Ed25519 public key.
    pub public_key: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Revocation time, when revoked.
    pub revoked_at: Option<Timestamp>,
}
