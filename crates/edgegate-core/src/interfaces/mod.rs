// crates/edgegate-core/src/interfaces/mod.rs
// ============================================================================
// Module: EdgeGate Interfaces
// Description: Backend-agnostic interfaces for the hub, storage, and audit.
// Purpose: Define the contract surfaces the EdgeGate runtime composes over.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how EdgeGate integrates with the compute hub and its
//! stores without embedding vendor details. Implementations must be
//! deterministic and fail closed on missing or invalid data. The hub adapter
//! is the only component that speaks the external protocol; every payload it
//! returns is an opaque byte blob to the rest of the core.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::artifact::ArtifactKind;
use crate::core::artifact::ArtifactRecord;
use crate::core::audit::AuditEvent;
use crate::core::capabilities::CapabilitiesRecord;
use crate::core::hashing::Sha256Hex;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::DeviceId;
use crate::core::identifiers::PipelineId;
use crate::core::identifiers::PromptPackId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkspaceId;
use crate::core::limits::LimitError;
use crate::core::pipeline::PackageKind;
use crate::core::pipeline::Pipeline;
use crate::core::promptpack::PromptPack;
use crate::core::run::Integration;
use crate::core::run::RunRecord;
use crate::core::secret::SecretString;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Backend Adapter
// ============================================================================

/// Identity reported by the backend for a validated token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendIdentity {
    /// Account or organization label.
    pub account: String,
}

/// A device exposed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Backend device identifier.
    pub device_id: DeviceId,
    /// Human-readable device name.
    pub device_name: String,
    /// Chipset label when reported.
    pub chipset: Option<String>,
}

/// Handle to a model uploaded to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteModelHandle(pub String);

/// Handle to a backend job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Target runtime for compile submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRuntime {
    /// Qualcomm QNN DLC runtime.
    QnnDlc,
}

/// Status of a polled backend job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started.
    Pending,
    /// Executing.
    Running,
    /// Terminal success; payload is fetched separately.
    Success,
    /// Terminal failure with the vendor reason.
    Failed {
        /// Vendor-reported reason.
        reason: String,
    },
}

/// Backend adapter errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend rejected the integration credentials.
    #[error("backend rejected token: {0}")]
    TokenRejected(String),
    /// Network or transport failure; submits may retry once.
    #[error("backend transport error: {0}")]
    Transport(String),
    /// The backend rejected the request contents.
    #[error("backend rejected request: {0}")]
    Rejected(String),
    /// The backend response violated the expected protocol shape.
    #[error("backend protocol error: {0}")]
    Protocol(String),
}

/// Abstract compute-hub session, authenticated by a workspace token.
///
/// The adapter is the only component that speaks the external protocol.
/// Payload bytes are opaque; interpretation belongs to the probe engine and
/// the worker's mapping-driven extraction.
pub trait Backend {
    /// Validates the session token and returns the backend identity.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::TokenRejected`] for bad credentials.
    fn identity(&self) -> Result<BackendIdentity, BackendError>;

    /// Lists devices available to this account.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the hub cannot be queried.
    fn list_devices(&self) -> Result<Vec<Device>, BackendError>;

    /// Uploads a model package.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the upload fails.
    fn upload_model(
        &self,
        bytes: &[u8],
        kind: PackageKind,
        name: &str,
    ) -> Result<RemoteModelHandle, BackendError>;

    /// Submits a compile job for an uploaded model.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when submission fails.
    fn submit_compile(
        &self,
        model: &RemoteModelHandle,
        device: &DeviceId,
        target: TargetRuntime,
        options: &Value,
    ) -> Result<JobHandle, BackendError>;

    /// Submits a profile job for a compiled model.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when submission fails.
    fn submit_profile(
        &self,
        compiled: &JobHandle,
        device: &DeviceId,
        options: &Value,
    ) -> Result<JobHandle, BackendError>;

    /// Submits an inference job for a compiled model.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when submission fails.
    fn submit_inference(
        &self,
        compiled: &JobHandle,
        device: &DeviceId,
        inputs: &Value,
    ) -> Result<JobHandle, BackendError>;

    /// Polls a job for its current status.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the hub cannot be queried.
    fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError>;

    /// Fetches the opaque result payload of a successful job.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the payload cannot be fetched.
    fn fetch_payload(&self, job: &JobHandle) -> Result<Vec<u8>, BackendError>;

    /// Fetches job logs; `None` when the hub reports them unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the hub cannot be queried.
    fn fetch_logs(&self, job: &JobHandle) -> Result<Option<Vec<u8>>, BackendError>;
}

/// Builds an authenticated backend session from a decrypted token.
pub trait BackendConnector {
    /// Concrete session type.
    type Session: Backend;

    /// Connects with the provided token.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the session cannot be constructed.
    fn connect(&self, token: &SecretString) -> Result<Self::Session, BackendError>;
}

// ============================================================================
// SECTION: Package Opening
// ============================================================================

/// One file inside a model package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// File name relative to the package root.
    pub name: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl PackageFile {
    /// Creates a package file.
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// A model package expanded into its file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageListing {
    /// Container directory name, when the upload carried one.
    pub container_name: Option<String>,
    /// Files in the package.
    pub files: Vec<PackageFile>,
}

/// Package opener errors.
#[derive(Debug, Error)]
pub enum PackageOpenError {
    /// The uploaded bytes are not a readable package.
    #[error("unreadable model package: {0}")]
    Unreadable(String),
}

/// Expands an uploaded model artifact into a package listing.
///
/// Single `.onnx` uploads expand to a one-file listing; archive uploads are
/// expanded by the host's archive-aware implementation.
pub trait PackageOpener {
    /// Opens an uploaded artifact into a listing.
    ///
    /// # Errors
    ///
    /// Returns [`PackageOpenError`] when the bytes cannot be expanded.
    fn open(
        &self,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<PackageListing, PackageOpenError>;
}

// ============================================================================
// SECTION: Content Store
// ============================================================================

/// Store errors shared by the blob and control stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record does not exist, or belongs to another workspace.
    #[error("not found")]
    NotFound,
    /// Stored bytes no longer match the recorded SHA-256.
    #[error("integrity error: {0}")]
    Integrity(String),
    /// A hard limit was violated.
    #[error(transparent)]
    Limit(#[from] LimitError),
    /// Underlying I/O failed.
    #[error("store io error: {0}")]
    Io(String),
    /// A uniqueness or state-transition constraint was violated.
    #[error("store conflict: {0}")]
    Conflict(String),
    /// Stored data is invalid.
    #[error("store invalid data: {0}")]
    Invalid(String),
}

/// Content-addressed, workspace-scoped blob store.
///
/// Cross-workspace access fails `NotFound`, never `Forbidden`, to avoid
/// existence leaks.
pub trait BlobStore {
    /// Stores bytes and returns the artifact record (deduplicated by
    /// `(workspace, sha256)`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure or limit violation.
    fn put(
        &self,
        workspace_id: &WorkspaceId,
        kind: ArtifactKind,
        bytes: &[u8],
        original_filename: &str,
        now: Timestamp,
    ) -> Result<ArtifactRecord, StoreError>;

    /// Stores a stream with bounded memory; `kind = Model` enforces the
    /// 500 MB cap against both the declared and the actual size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure or limit violation.
    fn put_stream(
        &self,
        workspace_id: &WorkspaceId,
        kind: ArtifactKind,
        reader: &mut dyn Read,
        declared_size: u64,
        original_filename: &str,
        now: Timestamp,
    ) -> Result<ArtifactRecord, StoreError>;

    /// Fetches artifact bytes, verifying the stored SHA-256.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown or cross-workspace ids
    /// and [`StoreError::Integrity`] on digest mismatch.
    fn get(
        &self,
        workspace_id: &WorkspaceId,
        artifact_id: &ArtifactId,
    ) -> Result<Vec<u8>, StoreError>;

    /// Looks up an artifact by content digest within a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn lookup_by_sha(
        &self,
        workspace_id: &WorkspaceId,
        sha256: &Sha256Hex,
    ) -> Result<Option<ArtifactRecord>, StoreError>;

    /// Returns the metadata row for an artifact without fetching bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown or cross-workspace ids.
    fn stat(
        &self,
        workspace_id: &WorkspaceId,
        artifact_id: &ArtifactId,
    ) -> Result<ArtifactRecord, StoreError>;

    /// Deletes bytes for artifacts expired before `cutoff`, retaining rows
    /// as tombstones. Returns the number of artifacts expired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn expire_older_than(&self, cutoff: Timestamp) -> Result<usize, StoreError>;
}

// ============================================================================
// SECTION: Control Store
// ============================================================================

/// Durable store for runs, pipelines, promptpacks, and capability records.
pub trait ControlStore {
    /// Persists a new run in `Queued` state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the run id already exists.
    fn create_run(&self, run: &RunRecord) -> Result<(), StoreError>;

    /// Loads a run scoped to a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown or cross-workspace runs.
    fn load_run(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<RunRecord, StoreError>;

    /// Persists a run mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the state change is not a legal
    /// transition from the persisted state.
    fn save_run(&self, run: &RunRecord) -> Result<(), StoreError>;

    /// Attempts to acquire the per-workspace single-flight lock for a run.
    /// Returns `false` when another run holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn try_acquire_workspace_lock(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<bool, StoreError>;

    /// Releases the per-workspace lock held by a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn release_workspace_lock(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<(), StoreError>;

    /// Returns the oldest queued run for a workspace, when any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn next_queued_run(&self, workspace_id: &WorkspaceId) -> Result<Option<RunId>, StoreError>;

    /// Loads a pipeline scoped to a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown or cross-workspace ids.
    fn load_pipeline(
        &self,
        workspace_id: &WorkspaceId,
        pipeline_id: &PipelineId,
    ) -> Result<Pipeline, StoreError>;

    /// Loads a promptpack version scoped to a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown or cross-workspace refs.
    fn load_promptpack(
        &self,
        workspace_id: &WorkspaceId,
        logical_id: &PromptPackId,
        version: &str,
    ) -> Result<PromptPack, StoreError>;

    /// Loads the active backend integration for a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no active integration exists.
    fn load_integration(&self, workspace_id: &WorkspaceId) -> Result<Integration, StoreError>;

    /// Loads the current capabilities record for a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the workspace was never probed.
    fn load_capabilities_record(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<CapabilitiesRecord, StoreError>;

    /// Replaces the current capabilities record for a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn save_capabilities_record(&self, record: &CapabilitiesRecord) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Nonce Store
// ============================================================================

/// Nonce store errors.
#[derive(Debug, Error)]
pub enum NonceError {
    /// The `(workspace, nonce)` pair was already spent.
    #[error("nonce replay")]
    Replay,
    /// Underlying I/O failed.
    #[error("nonce store io error: {0}")]
    Io(String),
}

/// Single-use nonce store backing CI replay protection.
///
/// A row's existence proves the nonce has been spent; insertion races are
/// resolved by a uniqueness constraint, never by read-then-write.
pub trait NonceStore {
    /// Records a spent nonce.
    ///
    /// # Errors
    ///
    /// Returns [`NonceError::Replay`] when the pair already exists.
    fn insert(
        &self,
        workspace_id: &WorkspaceId,
        nonce: &str,
        used_at: Timestamp,
        expires_at: Timestamp,
    ) -> Result<(), NonceError>;

    /// Deletes rows whose `expires_at` is strictly in the past. Returns the
    /// number purged.
    ///
    /// # Errors
    ///
    /// Returns [`NonceError::Io`] on I/O failure.
    fn purge_expired(&self, now: Timestamp) -> Result<usize, NonceError>;
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Audit sink errors.
#[derive(Debug, Error)]
pub enum AuditSinkError {
    /// Underlying I/O failed.
    #[error("audit sink io error: {0}")]
    Io(String),
    /// Event serialization failed.
    #[error("audit sink serialize error: {0}")]
    Serialize(String),
}

/// Destination for ordered audit events.
pub trait AuditSink {
    /// Records one event, assigning its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`AuditSinkError`] when the event cannot be recorded.
    fn record(&self, event: AuditEvent) -> Result<(), AuditSinkError>;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Host-supplied time source; the core never reads wall-clock time directly.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> Timestamp;

    /// Sleeps for the given number of milliseconds (no-op in tests).
    fn sleep_millis(&self, millis: u64);
}

// ============================================================================
// SECTION: Bundle Sink / Reader
// ============================================================================

/// Bundle sink errors.
#[derive(Debug, Error)]
pub enum BundleSinkError {
    /// Writing an entry failed.
    #[error("bundle sink error: {0}")]
    Write(String),
    /// Reading an entry failed.
    #[error("bundle read error: {0}")]
    Read(String),
}

/// Ordered writer for evidence bundle entries.
pub trait BundleSink {
    /// Writes one bundle-relative file.
    ///
    /// # Errors
    ///
    /// Returns [`BundleSinkError::Write`] when writing fails.
    fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), BundleSinkError>;
}

/// Creates and seals bundle sinks bound to run-scoped storage.
pub trait BundleStore {
    /// Concrete sink type.
    type Sink: BundleSink;

    /// Opens a sink for a run's evidence bundle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the bundle location cannot be created.
    fn open_bundle(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<Self::Sink, StoreError>;

    /// Seals a finished sink and registers the bundle artifact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when finalization or registration fails.
    fn seal_bundle(
        &self,
        sink: Self::Sink,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
        now: Timestamp,
    ) -> Result<ArtifactRecord, StoreError>;
}

/// Reader over an assembled evidence bundle.
pub trait BundleReader {
    /// Reads one bundle-relative file.
    ///
    /// # Errors
    ///
    /// Returns [`BundleSinkError::Read`] when the entry is missing or
    /// unreadable.
    fn read(&self, path: &str) -> Result<Vec<u8>, BundleSinkError>;

    /// Lists every bundle-relative path.
    ///
    /// # Errors
    ///
    /// Returns [`BundleSinkError::Read`] when the listing fails.
    fn paths(&self) -> Result<Vec<String>, BundleSinkError>;
}
