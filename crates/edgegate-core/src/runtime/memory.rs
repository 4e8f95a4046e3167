// crates/edgegate-core/src/runtime/memory.rs
// ============================================================================
// Module: EdgeGate In-Memory Stores
// Description: Reference implementations of the storage and host seams.
// Purpose: Back tests and embedded usage without external infrastructure.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! These implementations honor every interface contract (content
//! addressing, cross-workspace `NotFound`, transition legality, nonce
//! uniqueness, ordered audit) while holding everything in process memory.
//! They are the reference semantics the SQLite store is tested against, and
//! the fixtures the core test suite runs on.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::core::artifact::ARTIFACT_RETENTION_DAYS;
use crate::core::artifact::ArtifactKind;
use crate::core::artifact::ArtifactRecord;
use crate::core::audit::AuditEvent;
use crate::core::capabilities::CapabilitiesRecord;
use crate::core::hashing;
use crate::core::hashing::Sha256Hex;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::PipelineId;
use crate::core::identifiers::PromptPackId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkspaceId;
use crate::core::limits;
use crate::core::pipeline::Pipeline;
use crate::core::promptpack::PromptPack;
use crate::core::run::Integration;
use crate::core::run::RunRecord;
use crate::core::run::RunState;
use crate::core::time::Timestamp;
use crate::interfaces::AuditSink;
use crate::interfaces::AuditSinkError;
use crate::interfaces::BlobStore;
use crate::interfaces::BundleReader;
use crate::interfaces::BundleSink;
use crate::interfaces::BundleSinkError;
use crate::interfaces::BundleStore;
use crate::interfaces::Clock;
use crate::interfaces::ControlStore;
use crate::interfaces::NonceError;
use crate::interfaces::NonceStore;
use crate::interfaces::StoreError;

/// Milliseconds in one retention day.
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Combined in-memory control, blob, and bundle store.
#[derive(Default)]
pub struct InMemoryStore {
    /// All mutable state behind one lock.
    inner: Mutex<StoreInner>,
}

/// Mutable store state.
#[derive(Default)]
struct StoreInner {
    /// Artifact metadata by id.
    artifacts: BTreeMap<ArtifactId, ArtifactRecord>,
    /// Artifact bytes by id (absent when tombstoned).
    blobs: BTreeMap<ArtifactId, Vec<u8>>,
    /// Next artifact sequence number.
    next_artifact: u64,
    /// Runs by id.
    runs: BTreeMap<RunId, RunRecord>,
    /// Queued-run arrival order.
    queue_order: Vec<RunId>,
    /// Workspace lock holders.
    locks: BTreeMap<WorkspaceId, RunId>,
    /// Pipelines by id.
    pipelines: BTreeMap<PipelineId, Pipeline>,
    /// Promptpacks by `(logical_id, version)`.
    promptpacks: BTreeMap<(PromptPackId, String), PromptPack>,
    /// Integrations by workspace.
    integrations: BTreeMap<WorkspaceId, Integration>,
    /// Capabilities records by workspace.
    capabilities: BTreeMap<WorkspaceId, CapabilitiesRecord>,
    /// Sealed bundles by run.
    bundles: BTreeMap<RunId, BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pipeline (test setup surface).
    pub fn insert_pipeline(&self, pipeline: Pipeline) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pipelines.insert(pipeline.pipeline_id.clone(), pipeline);
        }
    }

    /// Inserts a promptpack version (test setup surface).
    pub fn insert_promptpack(&self, promptpack: PromptPack) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .promptpacks
                .insert((promptpack.logical_id.clone(), promptpack.version.clone()), promptpack);
        }
    }

    /// Inserts a backend integration (test setup surface).
    pub fn insert_integration(&self, integration: Integration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.integrations.insert(integration.workspace_id.clone(), integration);
        }
    }

    /// Returns the sealed bundle file map for a run, when one exists.
    #[must_use]
    pub fn bundle_files(&self, run_id: &RunId) -> Option<BTreeMap<String, Vec<u8>>> {
        self.inner.lock().ok().and_then(|inner| inner.bundles.get(run_id).cloned())
    }

    /// Locks the inner state, mapping poisoning to a store error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Io("store lock poisoned".to_string()))
    }
}

impl StoreInner {
    /// Registers bytes as an artifact, deduplicating by workspace digest.
    fn register(
        &mut self,
        workspace_id: &WorkspaceId,
        kind: ArtifactKind,
        bytes: Vec<u8>,
        original_filename: &str,
        now: Timestamp,
    ) -> ArtifactRecord {
        let sha256 = hashing::hash_bytes(&bytes);
        let existing = self.artifacts.values().find(|record| {
            &record.workspace_id == workspace_id
                && record.sha256 == sha256
                && !record.tombstoned
        });
        if let Some(record) = existing {
            return record.clone();
        }

        self.next_artifact += 1;
        let artifact_id = ArtifactId::new(format!("art-{:06}", self.next_artifact));
        let record = ArtifactRecord {
            artifact_id: artifact_id.clone(),
            workspace_id: workspace_id.clone(),
            kind,
            storage_url: ArtifactRecord::storage_key(&sha256, original_filename),
            sha256,
            bytes: bytes.len() as u64,
            original_filename: original_filename.to_string(),
            created_at: now,
            expires_at: now.plus_millis(ARTIFACT_RETENTION_DAYS * DAY_MILLIS),
            tombstoned: false,
        };
        self.artifacts.insert(artifact_id.clone(), record.clone());
        self.blobs.insert(artifact_id, bytes);
        record
    }
}

impl BlobStore for InMemoryStore {
    fn put(
        &self,
        workspace_id: &WorkspaceId,
        kind: ArtifactKind,
        bytes: &[u8],
        original_filename: &str,
        now: Timestamp,
    ) -> Result<ArtifactRecord, StoreError> {
        if kind == ArtifactKind::Model {
            limits::check_model_bytes(bytes.len() as u64)?;
        }
        let mut inner = self.lock()?;
        Ok(inner.register(workspace_id, kind, bytes.to_vec(), original_filename, now))
    }

    fn put_stream(
        &self,
        workspace_id: &WorkspaceId,
        kind: ArtifactKind,
        reader: &mut dyn Read,
        declared_size: u64,
        original_filename: &str,
        now: Timestamp,
    ) -> Result<ArtifactRecord, StoreError> {
        if kind == ArtifactKind::Model {
            limits::check_model_bytes(declared_size)?;
        }
        let mut bytes = Vec::new();
        if kind == ArtifactKind::Model {
            let mut limited = reader.take(limits::MAX_MODEL_BYTES + 1);
            limited.read_to_end(&mut bytes).map_err(|err| StoreError::Io(err.to_string()))?;
            limits::check_model_bytes(bytes.len() as u64)?;
        } else {
            reader.read_to_end(&mut bytes).map_err(|err| StoreError::Io(err.to_string()))?;
        }
        let mut inner = self.lock()?;
        Ok(inner.register(workspace_id, kind, bytes, original_filename, now))
    }

    fn get(
        &self,
        workspace_id: &WorkspaceId,
        artifact_id: &ArtifactId,
    ) -> Result<Vec<u8>, StoreError> {
        let inner = self.lock()?;
        let record = inner.artifacts.get(artifact_id).ok_or(StoreError::NotFound)?;
        if &record.workspace_id != workspace_id || record.tombstoned {
            return Err(StoreError::NotFound);
        }
        let bytes = inner.blobs.get(artifact_id).ok_or(StoreError::NotFound)?;
        if hashing::hash_bytes(bytes) != record.sha256 {
            return Err(StoreError::Integrity(format!(
                "artifact {artifact_id} bytes do not match recorded sha256"
            )));
        }
        Ok(bytes.clone())
    }

    fn lookup_by_sha(
        &self,
        workspace_id: &WorkspaceId,
        sha256: &Sha256Hex,
    ) -> Result<Option<ArtifactRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .artifacts
            .values()
            .find(|record| {
                &record.workspace_id == workspace_id
                    && &record.sha256 == sha256
                    && !record.tombstoned
            })
            .cloned())
    }

    fn stat(
        &self,
        workspace_id: &WorkspaceId,
        artifact_id: &ArtifactId,
    ) -> Result<ArtifactRecord, StoreError> {
        let inner = self.lock()?;
        let record = inner.artifacts.get(artifact_id).ok_or(StoreError::NotFound)?;
        if &record.workspace_id != workspace_id {
            return Err(StoreError::NotFound);
        }
        Ok(record.clone())
    }

    fn expire_older_than(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let expired: Vec<ArtifactId> = inner
            .artifacts
            .values()
            .filter(|record| !record.tombstoned && record.expires_at < cutoff)
            .map(|record| record.artifact_id.clone())
            .collect();
        for artifact_id in &expired {
            if let Some(record) = inner.artifacts.get_mut(artifact_id) {
                record.tombstoned = true;
            }
            inner.blobs.remove(artifact_id);
        }
        Ok(expired.len())
    }
}

impl ControlStore for InMemoryStore {
    fn create_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.runs.contains_key(&run.run_id) {
            return Err(StoreError::Conflict(format!("run {} already exists", run.run_id)));
        }
        if run.state != RunState::Queued {
            return Err(StoreError::Invalid("new runs must be queued".to_string()));
        }
        inner.queue_order.push(run.run_id.clone());
        inner.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn load_run(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<RunRecord, StoreError> {
        let inner = self.lock()?;
        let run = inner.runs.get(run_id).ok_or(StoreError::NotFound)?;
        if &run.workspace_id != workspace_id {
            return Err(StoreError::NotFound);
        }
        Ok(run.clone())
    }

    fn save_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let existing = inner.runs.get(&run.run_id).ok_or(StoreError::NotFound)?;
        if existing.state != run.state && !existing.state.can_transition(run.state) {
            return Err(StoreError::Conflict(format!(
                "illegal run transition for {}",
                run.run_id
            )));
        }
        inner.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn try_acquire_workspace_lock(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.locks.get(workspace_id) {
            Some(holder) if holder != run_id => Ok(false),
            _ => {
                inner.locks.insert(workspace_id.clone(), run_id.clone());
                Ok(true)
            }
        }
    }

    fn release_workspace_lock(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.locks.get(workspace_id) == Some(run_id) {
            inner.locks.remove(workspace_id);
        }
        Ok(())
    }

    fn next_queued_run(&self, workspace_id: &WorkspaceId) -> Result<Option<RunId>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .queue_order
            .iter()
            .find(|run_id| {
                inner.runs.get(run_id).is_some_and(|run| {
                    &run.workspace_id == workspace_id && run.state == RunState::Queued
                })
            })
            .cloned())
    }

    fn load_pipeline(
        &self,
        workspace_id: &WorkspaceId,
        pipeline_id: &PipelineId,
    ) -> Result<Pipeline, StoreError> {
        let inner = self.lock()?;
        let pipeline = inner.pipelines.get(pipeline_id).ok_or(StoreError::NotFound)?;
        if &pipeline.workspace_id != workspace_id {
            return Err(StoreError::NotFound);
        }
        Ok(pipeline.clone())
    }

    fn load_promptpack(
        &self,
        workspace_id: &WorkspaceId,
        logical_id: &PromptPackId,
        version: &str,
    ) -> Result<PromptPack, StoreError> {
        let inner = self.lock()?;
        let promptpack = inner
            .promptpacks
            .get(&(logical_id.clone(), version.to_string()))
            .ok_or(StoreError::NotFound)?;
        if &promptpack.workspace_id != workspace_id {
            return Err(StoreError::NotFound);
        }
        Ok(promptpack.clone())
    }

    fn load_integration(&self, workspace_id: &WorkspaceId) -> Result<Integration, StoreError> {
        let inner = self.lock()?;
        inner.integrations.get(workspace_id).cloned().ok_or(StoreError::NotFound)
    }

    fn load_capabilities_record(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<CapabilitiesRecord, StoreError> {
        let inner = self.lock()?;
        inner.capabilities.get(workspace_id).cloned().ok_or(StoreError::NotFound)
    }

    fn save_capabilities_record(&self, record: &CapabilitiesRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.capabilities.insert(record.workspace_id.clone(), record.clone());
        Ok(())
    }
}

impl BundleStore for InMemoryStore {
    type Sink = MemoryBundleSink;

    fn open_bundle(
        &self,
        _workspace_id: &WorkspaceId,
        _run_id: &RunId,
    ) -> Result<Self::Sink, StoreError> {
        Ok(MemoryBundleSink::new())
    }

    fn seal_bundle(
        &self,
        sink: Self::Sink,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
        now: Timestamp,
    ) -> Result<ArtifactRecord, StoreError> {
        let files = sink.into_files();
        let bytes = serde_json::to_vec(&files)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let mut inner = self.lock()?;
        inner.bundles.insert(run_id.clone(), files);
        Ok(inner.register(workspace_id, ArtifactKind::Bundle, bytes, "evidence.zip", now))
    }
}

// ============================================================================
// SECTION: Memory Bundle Sink
// ============================================================================

/// Bundle sink holding entries in memory; doubles as a reader for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBundleSink {
    /// Entries by bundle-relative path.
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryBundleSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the sink into its file map.
    #[must_use]
    pub fn into_files(self) -> BTreeMap<String, Vec<u8>> {
        self.files
    }

    /// Builds a reader over a sealed file map.
    #[must_use]
    pub const fn from_files(files: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            files,
        }
    }
}

impl BundleSink for MemoryBundleSink {
    fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), BundleSinkError> {
        if self.files.contains_key(path) {
            return Err(BundleSinkError::Write(format!("duplicate bundle entry {path}")));
        }
        self.files.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }
}

impl BundleReader for MemoryBundleSink {
    fn read(&self, path: &str) -> Result<Vec<u8>, BundleSinkError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| BundleSinkError::Read(format!("missing bundle entry {path}")))
    }

    fn paths(&self) -> Result<Vec<String>, BundleSinkError> {
        Ok(self.files.keys().cloned().collect())
    }
}

// ============================================================================
// SECTION: Nonce Store
// ============================================================================

/// In-memory nonce store with uniqueness on `(workspace, nonce)`.
#[derive(Default)]
pub struct InMemoryNonceStore {
    /// Spent nonces with expiry.
    spent: Mutex<BTreeMap<(WorkspaceId, String), Timestamp>>,
}

impl InMemoryNonceStore {
    /// Creates an empty nonce store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStore for InMemoryNonceStore {
    fn insert(
        &self,
        workspace_id: &WorkspaceId,
        nonce: &str,
        _used_at: Timestamp,
        expires_at: Timestamp,
    ) -> Result<(), NonceError> {
        let mut spent =
            self.spent.lock().map_err(|_| NonceError::Io("nonce lock poisoned".to_string()))?;
        let key = (workspace_id.clone(), nonce.to_string());
        if spent.contains_key(&key) {
            return Err(NonceError::Replay);
        }
        spent.insert(key, expires_at);
        Ok(())
    }

    fn purge_expired(&self, now: Timestamp) -> Result<usize, NonceError> {
        let mut spent =
            self.spent.lock().map_err(|_| NonceError::Io("nonce lock poisoned".to_string()))?;
        let before = spent.len();
        spent.retain(|_, expires_at| *expires_at >= now);
        Ok(before - spent.len())
    }
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Audit sink collecting events in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events with assigned sequence numbers.
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditSinkError> {
        let mut events =
            self.events.lock().map_err(|_| AuditSinkError::Io("sink poisoned".to_string()))?;
        let mut event = event;
        event.seq = events.len() as u64 + 1;
        events.push(event);
        Ok(())
    }
}

// ============================================================================
// SECTION: Clocks
// ============================================================================

/// Wall-clock implementation backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        Timestamp::from_unix_millis(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    fn sleep_millis(&self, millis: u64) {
        thread::sleep(Duration::from_millis(millis));
    }
}

/// Deterministic clock for tests: sleeping advances time instantly.
#[derive(Default)]
pub struct ManualClock {
    /// Current time in unix milliseconds.
    now: Mutex<i64>,
}

impl ManualClock {
    /// Creates a clock at the given instant.
    #[must_use]
    pub fn at(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now.as_unix_millis()),
        }
    }

    /// Advances the clock.
    pub fn advance_millis(&self, millis: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now = now.saturating_add(millis);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.now.lock().map(|now| *now).unwrap_or_default())
    }

    fn sleep_millis(&self, millis: u64) {
        self.advance_millis(i64::try_from(millis).unwrap_or(i64::MAX));
    }
}
