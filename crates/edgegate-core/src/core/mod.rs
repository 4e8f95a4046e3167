// crates/edgegate-core/src/core/mod.rs
// ============================================================================
// Module: EdgeGate Core Types
// Description: Canonical EdgeGate schema and run-state structures.
// Purpose: Provide stable, serializable types for pipelines, runs, and evidence.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! EdgeGate core types define workspaces' pipelines, promptpacks, artifacts,
//! capability ledgers, metric mappings, measurement tables, run records, and
//! bundle summaries. These types are the canonical source of truth for any
//! derived API surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod artifact;
pub mod audit;
pub mod bundle;
pub mod capabilities;
pub mod errors;
pub mod hashing;
pub mod identifiers;
pub mod limits;
pub mod measurement;
pub mod pipeline;
pub mod promptpack;
pub mod run;
pub mod secret;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use artifact::ARTIFACT_RETENTION_DAYS;
pub use artifact::ArtifactKind;
pub use artifact::ArtifactRecord;
pub use audit::AuditEvent;
pub use audit::FileAuditSink;
pub use bundle::ArtifactEntry;
pub use bundle::BUNDLE_VERSION;
pub use bundle::BundleInputsRef;
pub use bundle::BundleResults;
pub use bundle::BundleSummary;
pub use bundle::DeviceRef;
pub use bundle::ModelRef;
pub use bundle::PromptPackRef;
pub use bundle::SigningInfo;
pub use capabilities::CapabilitiesDoc;
pub use capabilities::CapabilitiesRecord;
pub use capabilities::CapabilityId;
pub use capabilities::CapabilityRecord;
pub use capabilities::CapabilityStability;
pub use capabilities::MetricMapping;
pub use capabilities::MetricPath;
pub use capabilities::MetricStability;
pub use capabilities::NORMALIZED_METRICS;
pub use errors::ErrorCode;
pub use errors::RunFailure;
pub use hashing::HashError;
pub use hashing::Sha256Hex;
pub use hashing::canonical_json_bytes;
pub use hashing::hash_bytes;
pub use hashing::hash_canonical_json;
pub use identifiers::ActorId;
pub use identifiers::ArtifactId;
pub use identifiers::DeviceId;
pub use identifiers::KeyId;
pub use identifiers::PipelineId;
pub use identifiers::PromptPackId;
pub use identifiers::RunId;
pub use identifiers::WorkspaceId;
pub use limits::LimitError;
pub use limits::MAX_DEVICES;
pub use limits::MAX_MEASUREMENT_REPEATS;
pub use limits::MAX_MODEL_BYTES;
pub use limits::MAX_NEW_TOKENS;
pub use limits::MAX_NONCE_LENGTH;
pub use limits::MAX_PROMPT_CASES;
pub use limits::MAX_TIMEOUT_MINUTES;
pub use limits::MIN_MEASUREMENT_REPEATS;
pub use limits::MIN_TIMEOUT_MINUTES;
pub use limits::check_case_count;
pub use limits::check_device_count;
pub use limits::check_model_bytes;
pub use limits::check_new_tokens;
pub use limits::check_nonce_length;
pub use limits::check_repeats;
pub use limits::check_timeout_minutes;
pub use measurement::CorrectnessRow;
pub use measurement::DerivedValue;
pub use measurement::MeasurementRow;
pub use measurement::MeasurementTable;
pub use pipeline::GateOp;
pub use pipeline::GateSpec;
pub use pipeline::MatrixDevice;
pub use pipeline::PackageKind;
pub use pipeline::Pipeline;
pub use pipeline::PromptPackVersionRef;
pub use pipeline::RunPolicy;
pub use promptpack::Expectation;
pub use promptpack::PromptCase;
pub use promptpack::PromptPack;
pub use promptpack::PromptPackError;
pub use promptpack::canonicalize_text;
pub use run::GateEvaluation;
pub use run::GateStatus;
pub use run::Integration;
pub use run::IntegrationStatus;
pub use run::JobKind;
pub use run::NormalizedMetric;
pub use run::RunOutcome;
pub use run::RunRecord;
pub use run::RunState;
pub use run::RunTrigger;
pub use run::SigningKeyRecord;
pub use run::SubmittedJob;
pub use secret::SecretString;
pub use time::TimeError;
pub use time::Timestamp;
