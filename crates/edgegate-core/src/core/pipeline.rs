// crates/edgegate-core/src/core/pipeline.rs
// ============================================================================
// Module: EdgeGate Pipelines
// Description: Pipeline configuration: devices, promptpack ref, gates, policy.
// Purpose: Pin the full run configuration a CI trigger executes against.
// Dependencies: crate::core::{identifiers, limits}, serde
// ============================================================================

//! ## Overview
//! A pipeline pins everything a run needs except the model artifact: the
//! device matrix, the promptpack reference, the ordered gate list, and the
//! run policy. Gate order and device order are load-bearing; the evaluator
//! walks both in declared order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Number;

use crate::core::identifiers::DeviceId;
use crate::core::identifiers::PipelineId;
use crate::core::identifiers::PromptPackId;
use crate::core::identifiers::WorkspaceId;
use crate::core::limits;
use crate::core::limits::LimitError;

// ============================================================================
// SECTION: Package Kind
// ============================================================================

/// Accepted model packaging shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// Exactly one `.onnx` file.
    OnnxSingle,
    /// Exactly one `.onnx` plus exactly one `.data` file.
    OnnxExternal,
    /// An `.aimet` container directory with `.onnx`, `.encodings`, and an
    /// optional `.data` file.
    AimetQuant,
}

// ============================================================================
// SECTION: Gates
// ============================================================================

/// Comparison operator for a gate predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOp {
    /// Strictly less than.
    Lt,
    /// Less than or equal; exact equality passes.
    Le,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal; exact equality passes.
    Ge,
    /// Equal; exact equality passes.
    Eq,
}

/// One gate predicate: `metric op threshold` with a required flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    /// Normalized metric name the gate reads.
    pub metric: String,
    /// Comparison operator.
    pub op: GateOp,
    /// Threshold value; kept as a JSON number for decimal-exact comparison.
    pub threshold: Number,
    /// Whether a missing, flaky, or failing value blocks the run.
    pub required: bool,
}

// ============================================================================
// SECTION: Run Policy
// ============================================================================

/// Per-pipeline execution policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPolicy {
    /// Warmup iterations per device, excluded from aggregation and gating.
    #[serde(default = "default_warmup_runs")]
    pub warmup_runs: u32,
    /// Measurement repeats per device.
    #[serde(default = "default_measurement_repeats")]
    pub measurement_repeats: u32,
    /// New-token budget per case.
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    /// Hard run deadline in minutes.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
}

/// Default warmup iterations.
const fn default_warmup_runs() -> u32 {
    1
}

/// Default measurement repeats.
const fn default_measurement_repeats() -> u32 {
    3
}

/// Default new-token budget.
const fn default_max_new_tokens() -> u32 {
    128
}

/// Default run deadline in minutes.
const fn default_timeout_minutes() -> u32 {
    20
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            warmup_runs: default_warmup_runs(),
            measurement_repeats: default_measurement_repeats(),
            max_new_tokens: default_max_new_tokens(),
            timeout_minutes: default_timeout_minutes(),
        }
    }
}

impl RunPolicy {
    /// Validates the policy against the hard limits.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError`] naming the violated limit.
    pub const fn validate(&self) -> Result<(), LimitError> {
        if let Err(err) = limits::check_repeats(self.measurement_repeats) {
            return Err(err);
        }
        if let Err(err) = limits::check_new_tokens(self.max_new_tokens) {
            return Err(err);
        }
        limits::check_timeout_minutes(self.timeout_minutes)
    }

    /// Returns the run deadline in milliseconds.
    #[must_use]
    pub const fn timeout_millis(&self) -> i64 {
        (self.timeout_minutes as i64) * 60_000
    }
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Reference to a specific promptpack version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPackVersionRef {
    /// Logical promptpack identifier.
    pub logical_id: PromptPackId,
    /// Version string.
    pub version: String,
}

/// A device selected into a pipeline's matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixDevice {
    /// Backend device identifier.
    pub device_id: DeviceId,
    /// Human-readable device name.
    pub device_name: String,
}

/// Pinned run configuration for one workspace pipeline.
///
/// # Invariants
/// - `device_matrix` holds at most [`limits::MAX_DEVICES`] entries.
/// - `gates` order is the evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline identifier.
    pub pipeline_id: PipelineId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Display name.
    pub name: String,
    /// Ordered device matrix.
    pub device_matrix: Vec<MatrixDevice>,
    /// Promptpack version reference.
    pub promptpack_ref: PromptPackVersionRef,
    /// Ordered gate list.
    pub gates: Vec<GateSpec>,
    /// Execution policy.
    pub run_policy: RunPolicy,
}

impl Pipeline {
    /// Validates the pipeline against the hard limits.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError`] naming the violated limit.
    pub fn validate(&self) -> Result<(), LimitError> {
        limits::check_device_count(self.device_matrix.len())?;
        self.run_policy.validate()
    }
}
