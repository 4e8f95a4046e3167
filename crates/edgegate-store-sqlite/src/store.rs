// crates/edgegate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite EdgeGate Store
// Description: Durable control, blob, nonce, and audit store over SQLite WAL.
// Purpose: Persist orchestrator state with deterministic serialization.
// Dependencies: edgegate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! One SQLite database holds the relational records (runs, pipelines,
//! promptpacks, integrations, capabilities, nonces, audit, signing keys)
//! while blob bytes live on the filesystem under the content-addressed
//! layout. Run snapshots are stored as canonical JSON with their digest, and
//! loads fail closed on corruption. Nonce uniqueness and workspace locks are
//! enforced by SQLite constraints, never by read-then-write.
//!
//! Security posture: database contents are untrusted on load; digests and
//! transition legality are re-checked before use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;

use edgegate_core::ARTIFACT_RETENTION_DAYS;
use edgegate_core::ArtifactId;
use edgegate_core::ArtifactKind;
use edgegate_core::ArtifactRecord;
use edgegate_core::AuditEvent;
use edgegate_core::AuditSink;
use edgegate_core::AuditSinkError;
use edgegate_core::BlobStore;
use edgegate_core::BundleStore;
use edgegate_core::CapabilitiesRecord;
use edgegate_core::ControlStore;
use edgegate_core::Integration;
use edgegate_core::KeyId;
use edgegate_core::NonceError;
use edgegate_core::NonceStore;
use edgegate_core::Pipeline;
use edgegate_core::PipelineId;
use edgegate_core::PromptPack;
use edgegate_core::PromptPackId;
use edgegate_core::RunId;
use edgegate_core::RunRecord;
use edgegate_core::RunState;
use edgegate_core::Sha256Hex;
use edgegate_core::SigningKeyRecord;
use edgegate_core::StoreError;
use edgegate_core::Timestamp;
use edgegate_core::WorkspaceId;
use edgegate_core::canonical_json_bytes;
use edgegate_core::hash_bytes;
use edgegate_core::limits;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

use crate::bundle_zip::ZipBundleSink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SQLite schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Milliseconds in one retention day.
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// SQLite journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the SQLite pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// SQLite sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the SQLite pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the SQLite store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Root directory for blob bytes and bundle zips.
    pub data_dir: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// SQLite journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// SQLite sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for SQLite connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// SQLite store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// SQLite engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<SqliteStoreError> for StoreError {
    fn from(err: SqliteStoreError) -> Self {
        match err {
            SqliteStoreError::Io(detail) | SqliteStoreError::Db(detail) => Self::Io(detail),
            SqliteStoreError::Corrupt(detail) => Self::Integrity(detail),
            SqliteStoreError::VersionMismatch(detail) => Self::Invalid(detail),
        }
    }
}

/// Maps a SQLite error to a store error, detecting uniqueness conflicts.
fn map_sql(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &err
        && inner.code == ErrorCode::ConstraintViolation
    {
        return StoreError::Conflict(err.to_string());
    }
    StoreError::Io(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Durable EdgeGate store over SQLite and the filesystem.
pub struct SqliteStore {
    /// Serialized connection handle.
    conn: Mutex<Connection>,
    /// Root directory for blob bytes and bundles.
    data_dir: PathBuf,
}

impl SqliteStore {
    /// Opens (or creates) the store, applying pragmas and the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened, the
    /// schema version is newer than this build, or pragmas fail.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        }
        fs::create_dir_all(&config.data_dir)
            .map_err(|err| SqliteStoreError::Io(err.to_string()))?;

        let conn = Connection::open(&config.path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};",
            config.journal_mode.pragma_value()
        ))?;
        conn.execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "database schema {version} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA)?;
            conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
            data_dir: config.data_dir.clone(),
        })
    }

    /// Locks the connection, mapping poisoning to a store error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Io("store lock poisoned".to_string()))
    }

    /// Returns the on-disk path for a blob.
    fn blob_path(&self, sha256: &Sha256Hex, filename: &str) -> PathBuf {
        self.data_dir.join("artifacts").join(sha256.as_str()).join(sanitize_component(filename))
    }

    /// Returns the on-disk path for a run's bundle zip.
    fn bundle_path(&self, run_id: &RunId) -> PathBuf {
        self.data_dir.join("bundles").join(sanitize_component(run_id.as_str())).join("evidence.zip")
    }

    /// Registers blob bytes, writing them to disk and the metadata row.
    fn register_blob(
        &self,
        workspace_id: &WorkspaceId,
        kind: ArtifactKind,
        bytes: &[u8],
        original_filename: &str,
        now: Timestamp,
    ) -> Result<ArtifactRecord, StoreError> {
        let sha256 = hash_bytes(bytes);
        if let Some(existing) = self.lookup_by_sha(workspace_id, &sha256)? {
            return Ok(existing);
        }

        let path = self.blob_path(&sha256, original_filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::Io(err.to_string()))?;
        }
        fs::write(&path, bytes).map_err(|err| StoreError::Io(err.to_string()))?;

        let record = ArtifactRecord {
            artifact_id: ArtifactId::new(format!("art-{}", &sha256.as_str()[..16])),
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

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO artifacts (artifact_id, workspace_id, kind, sha256, storage_url, \
             bytes, original_filename, created_at, expires_at, tombstoned) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
            params![
                record.artifact_id.as_str(),
                record.workspace_id.as_str(),
                kind_label(kind),
                record.sha256.as_str(),
                record.storage_url,
                record.bytes as i64,
                record.original_filename,
                record.created_at.as_unix_millis(),
                record.expires_at.as_unix_millis(),
            ],
        )
        .map_err(map_sql)?;
        Ok(record)
    }

    /// Reads one artifact row scoped to a workspace.
    fn artifact_row(
        &self,
        workspace_id: &WorkspaceId,
        artifact_id: &ArtifactId,
    ) -> Result<ArtifactRecord, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT artifact_id, workspace_id, kind, sha256, storage_url, bytes, \
                 original_filename, created_at, expires_at, tombstoned \
                 FROM artifacts WHERE artifact_id = ?1",
                params![artifact_id.as_str()],
                row_to_artifact,
            )
            .optional()
            .map_err(map_sql)?
            .ok_or(StoreError::NotFound)?;
        if &record.workspace_id != workspace_id {
            return Err(StoreError::NotFound);
        }
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Control-plane write surface (consumed by API hosts, not the worker)
    // ------------------------------------------------------------------

    /// Inserts or replaces a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when validation or persistence fails.
    pub fn upsert_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
        pipeline.validate()?;
        let body = serde_json::to_string(pipeline)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pipelines (pipeline_id, workspace_id, body) VALUES (?1, ?2, ?3) \
             ON CONFLICT(pipeline_id) DO UPDATE SET workspace_id = ?2, body = ?3",
            params![pipeline.pipeline_id.as_str(), pipeline.workspace_id.as_str(), body],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Inserts a promptpack version, enforcing publish immutability: once a
    /// `(logical_id, version)` is published, content-changing writes fail.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a published-version rewrite.
    pub fn upsert_promptpack(&self, promptpack: &PromptPack) -> Result<(), StoreError> {
        promptpack.validate().map_err(|err| StoreError::Invalid(err.to_string()))?;
        limits::check_case_count(promptpack.cases.len())?;
        let existing = self.load_promptpack(
            &promptpack.workspace_id,
            &promptpack.logical_id,
            &promptpack.version,
        );
        if let Ok(existing) = existing
            && existing.published
            && existing.sha256 != promptpack.sha256
        {
            return Err(StoreError::Conflict(format!(
                "promptpack {}@{} is published and immutable",
                promptpack.logical_id, promptpack.version
            )));
        }

        let body = serde_json::to_string(promptpack)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO promptpacks (logical_id, version, workspace_id, published, body) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(logical_id, version) DO UPDATE SET published = ?4, body = ?5",
            params![
                promptpack.logical_id.as_str(),
                promptpack.version,
                promptpack.workspace_id.as_str(),
                i64::from(promptpack.published),
                body,
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Marks a promptpack version published.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown versions.
    pub fn publish_promptpack(
        &self,
        workspace_id: &WorkspaceId,
        logical_id: &PromptPackId,
        version: &str,
    ) -> Result<(), StoreError> {
        let mut promptpack = self.load_promptpack(workspace_id, logical_id, version)?;
        promptpack.published = true;
        let body = serde_json::to_string(&promptpack)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE promptpacks SET published = 1, body = ?3 \
             WHERE logical_id = ?1 AND version = ?2",
            params![logical_id.as_str(), version, body],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Inserts or replaces a workspace's backend integration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    pub fn upsert_integration(&self, integration: &Integration) -> Result<(), StoreError> {
        let body = serde_json::to_string(integration)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO integrations (workspace_id, body) VALUES (?1, ?2) \
             ON CONFLICT(workspace_id) DO UPDATE SET body = ?2",
            params![integration.workspace_id.as_str(), body],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Removes a workspace's backend integration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    pub fn delete_integration(&self, workspace_id: &WorkspaceId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM integrations WHERE workspace_id = ?1",
            params![workspace_id.as_str()],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Registers a signing key; records are never deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the key id already exists.
    pub fn insert_signing_key(&self, record: &SigningKeyRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO signing_keys (key_id, public_key, created_at, revoked_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.key_id.as_str(),
                record.public_key,
                record.created_at.as_unix_millis(),
                record.revoked_at.map(|at| at.as_unix_millis()),
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Marks a signing key revoked.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown key ids.
    pub fn revoke_signing_key(&self, key_id: &KeyId, at: Timestamp) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE signing_keys SET revoked_at = ?2 WHERE key_id = ?1",
                params![key_id.as_str(), at.as_unix_millis()],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Loads a signing key record; revoked keys remain loadable so old
    /// bundles stay verifiable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown key ids.
    pub fn load_signing_key(&self, key_id: &KeyId) -> Result<SigningKeyRecord, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT key_id, public_key, created_at, revoked_at FROM signing_keys \
             WHERE key_id = ?1",
            params![key_id.as_str()],
            |row| {
                Ok(SigningKeyRecord {
                    key_id: KeyId::new(row.get::<_, String>(0)?),
                    public_key: row.get(1)?,
                    created_at: Timestamp::from_unix_millis(row.get(2)?),
                    revoked_at: row
                        .get::<_, Option<i64>>(3)?
                        .map(Timestamp::from_unix_millis),
                })
            },
        )
        .optional()
        .map_err(map_sql)?
        .ok_or(StoreError::NotFound)
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Store schema, applied when `user_version` is behind.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS artifacts (
    artifact_id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    storage_url TEXT NOT NULL,
    bytes INTEGER NOT NULL,
    original_filename TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    tombstoned INTEGER NOT NULL DEFAULT 0,
    UNIQUE (workspace_id, sha256)
);
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    state TEXT NOT NULL,
    snapshot TEXT NOT NULL,
    snapshot_sha256 TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS workspace_locks (
    workspace_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS pipelines (
    pipeline_id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS promptpacks (
    logical_id TEXT NOT NULL,
    version TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    published INTEGER NOT NULL DEFAULT 0,
    body TEXT NOT NULL,
    PRIMARY KEY (logical_id, version)
);
CREATE TABLE IF NOT EXISTS integrations (
    workspace_id TEXT PRIMARY KEY,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS capabilities (
    workspace_id TEXT PRIMARY KEY,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS nonces (
    workspace_id TEXT NOT NULL,
    nonce TEXT NOT NULL,
    used_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (workspace_id, nonce)
);
CREATE TABLE IF NOT EXISTS audit_events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace_id TEXT NOT NULL,
    actor TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    ts INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS signing_keys (
    key_id TEXT PRIMARY KEY,
    public_key TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    revoked_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_runs_workspace_state ON runs (workspace_id, state, created_at);
CREATE INDEX IF NOT EXISTS idx_artifacts_workspace_sha ON artifacts (workspace_id, sha256);
";

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Maps an artifact row.
fn row_to_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        artifact_id: ArtifactId::new(row.get::<_, String>(0)?),
        workspace_id: WorkspaceId::new(row.get::<_, String>(1)?),
        kind: label_kind(&row.get::<_, String>(2)?),
        sha256: Sha256Hex::new(row.get::<_, String>(3)?),
        storage_url: row.get(4)?,
        bytes: row.get::<_, i64>(5)?.unsigned_abs(),
        original_filename: row.get(6)?,
        created_at: Timestamp::from_unix_millis(row.get(7)?),
        expires_at: Timestamp::from_unix_millis(row.get(8)?),
        tombstoned: row.get::<_, i64>(9)? != 0,
    })
}

/// Stable storage label for an artifact kind.
const fn kind_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Model => "model",
        ArtifactKind::PromptpackJson => "promptpack_json",
        ArtifactKind::ProbeRaw => "probe_raw",
        ArtifactKind::Bundle => "bundle",
        ArtifactKind::JobSpec => "job_spec",
        ArtifactKind::RunRaw => "run_raw",
        ArtifactKind::BackendLog => "backend_log",
        ArtifactKind::Capabilities => "capabilities",
        ArtifactKind::MetricMapping => "metric_mapping",
        ArtifactKind::Measurements => "measurements",
    }
}

/// Parses a stored kind label, defaulting unknown labels to raw payloads.
fn label_kind(label: &str) -> ArtifactKind {
    match label {
        "model" => ArtifactKind::Model,
        "promptpack_json" => ArtifactKind::PromptpackJson,
        "bundle" => ArtifactKind::Bundle,
        "job_spec" => ArtifactKind::JobSpec,
        "run_raw" => ArtifactKind::RunRaw,
        "backend_log" => ArtifactKind::BackendLog,
        "capabilities" => ArtifactKind::Capabilities,
        "metric_mapping" => ArtifactKind::MetricMapping,
        "measurements" => ArtifactKind::Measurements,
        _ => ArtifactKind::ProbeRaw,
    }
}

/// Restricts a path component to a safe character set.
fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') { ch } else { '_' }
        })
        .collect()
}

// ============================================================================
// SECTION: BlobStore
// ============================================================================

impl BlobStore for SqliteStore {
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
        self.register_blob(workspace_id, kind, bytes, original_filename, now)
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
        self.register_blob(workspace_id, kind, &bytes, original_filename, now)
    }

    fn get(
        &self,
        workspace_id: &WorkspaceId,
        artifact_id: &ArtifactId,
    ) -> Result<Vec<u8>, StoreError> {
        let record = self.artifact_row(workspace_id, artifact_id)?;
        if record.tombstoned {
            return Err(StoreError::NotFound);
        }
        let path = self.blob_path(&record.sha256, &record.original_filename);
        let bytes = fs::read(&path).map_err(|err| StoreError::Io(err.to_string()))?;
        if hash_bytes(&bytes) != record.sha256 {
            return Err(StoreError::Integrity(format!(
                "artifact {artifact_id} bytes do not match recorded sha256"
            )));
        }
        Ok(bytes)
    }

    fn lookup_by_sha(
        &self,
        workspace_id: &WorkspaceId,
        sha256: &Sha256Hex,
    ) -> Result<Option<ArtifactRecord>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT artifact_id, workspace_id, kind, sha256, storage_url, bytes, \
             original_filename, created_at, expires_at, tombstoned \
             FROM artifacts WHERE workspace_id = ?1 AND sha256 = ?2 AND tombstoned = 0",
            params![workspace_id.as_str(), sha256.as_str()],
            row_to_artifact,
        )
        .optional()
        .map_err(map_sql)
    }

    fn stat(
        &self,
        workspace_id: &WorkspaceId,
        artifact_id: &ArtifactId,
    ) -> Result<ArtifactRecord, StoreError> {
        self.artifact_row(workspace_id, artifact_id)
    }

    fn expire_older_than(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        let expired: Vec<ArtifactRecord> = {
            let conn = self.lock()?;
            let mut statement = conn
                .prepare(
                    "SELECT artifact_id, workspace_id, kind, sha256, storage_url, bytes, \
                     original_filename, created_at, expires_at, tombstoned \
                     FROM artifacts WHERE tombstoned = 0 AND expires_at < ?1",
                )
                .map_err(map_sql)?;
            let rows = statement
                .query_map(params![cutoff.as_unix_millis()], row_to_artifact)
                .map_err(map_sql)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sql)?
        };

        for record in &expired {
            let path = self.blob_path(&record.sha256, &record.original_filename);
            // Bytes may already be gone; tombstoning is what matters.
            let _removed = fs::remove_file(&path);
            let conn = self.lock()?;
            conn.execute(
                "UPDATE artifacts SET tombstoned = 1 WHERE artifact_id = ?1",
                params![record.artifact_id.as_str()],
            )
            .map_err(map_sql)?;
        }
        Ok(expired.len())
    }
}

// ============================================================================
// SECTION: ControlStore
// ============================================================================

impl ControlStore for SqliteStore {
    fn create_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        if run.state != RunState::Queued {
            return Err(StoreError::Invalid("new runs must be queued".to_string()));
        }
        let snapshot = canonical_json_bytes(run)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let digest = hash_bytes(&snapshot);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (run_id, workspace_id, state, snapshot, snapshot_sha256, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.run_id.as_str(),
                run.workspace_id.as_str(),
                state_label(run.state),
                String::from_utf8_lossy(&snapshot).into_owned(),
                digest.as_str(),
                run.created_at.as_unix_millis(),
                run.updated_at.as_unix_millis(),
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    fn load_run(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<RunRecord, StoreError> {
        let (snapshot, digest, owner): (String, String, String) = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT snapshot, snapshot_sha256, workspace_id FROM runs WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(map_sql)?
            .ok_or(StoreError::NotFound)?
        };
        if owner != workspace_id.as_str() {
            return Err(StoreError::NotFound);
        }
        if hash_bytes(snapshot.as_bytes()).as_str() != digest {
            return Err(StoreError::Integrity(format!(
                "run {run_id} snapshot does not match recorded sha256"
            )));
        }
        serde_json::from_str(&snapshot).map_err(|err| StoreError::Invalid(err.to_string()))
    }

    fn save_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let existing = self.load_run(&run.workspace_id, &run.run_id)?;
        if existing.state != run.state && !existing.state.can_transition(run.state) {
            return Err(StoreError::Conflict(format!(
                "illegal run transition for {}",
                run.run_id
            )));
        }
        let snapshot = canonical_json_bytes(run)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let digest = hash_bytes(&snapshot);
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET state = ?2, snapshot = ?3, snapshot_sha256 = ?4, updated_at = ?5 \
             WHERE run_id = ?1",
            params![
                run.run_id.as_str(),
                state_label(run.state),
                String::from_utf8_lossy(&snapshot).into_owned(),
                digest.as_str(),
                run.updated_at.as_unix_millis(),
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    fn try_acquire_workspace_lock(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let holder: Option<String> = conn
            .query_row(
                "SELECT run_id FROM workspace_locks WHERE workspace_id = ?1",
                params![workspace_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql)?;
        match holder {
            Some(holder) if holder != run_id.as_str() => Ok(false),
            Some(_) => Ok(true),
            None => {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO workspace_locks (workspace_id, run_id) \
                     VALUES (?1, ?2)",
                    params![workspace_id.as_str(), run_id.as_str()],
                );
                match inserted {
                    Ok(count) => Ok(count == 1),
                    Err(err) => Err(map_sql(err)),
                }
            }
        }
    }

    fn release_workspace_lock(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM workspace_locks WHERE workspace_id = ?1 AND run_id = ?2",
            params![workspace_id.as_str(), run_id.as_str()],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    fn next_queued_run(&self, workspace_id: &WorkspaceId) -> Result<Option<RunId>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT run_id FROM runs WHERE workspace_id = ?1 AND state = 'queued' \
             ORDER BY created_at ASC, run_id ASC LIMIT 1",
            params![workspace_id.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(map_sql)
        .map(|run_id| run_id.map(RunId::new))
    }

    fn load_pipeline(
        &self,
        workspace_id: &WorkspaceId,
        pipeline_id: &PipelineId,
    ) -> Result<Pipeline, StoreError> {
        let conn = self.lock()?;
        let body: String = conn
            .query_row(
                "SELECT body FROM pipelines WHERE pipeline_id = ?1 AND workspace_id = ?2",
                params![pipeline_id.as_str(), workspace_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql)?
            .ok_or(StoreError::NotFound)?;
        serde_json::from_str(&body).map_err(|err| StoreError::Invalid(err.to_string()))
    }

    fn load_promptpack(
        &self,
        workspace_id: &WorkspaceId,
        logical_id: &PromptPackId,
        version: &str,
    ) -> Result<PromptPack, StoreError> {
        let conn = self.lock()?;
        let body: String = conn
            .query_row(
                "SELECT body FROM promptpacks WHERE logical_id = ?1 AND version = ?2 \
                 AND workspace_id = ?3",
                params![logical_id.as_str(), version, workspace_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql)?
            .ok_or(StoreError::NotFound)?;
        serde_json::from_str(&body).map_err(|err| StoreError::Invalid(err.to_string()))
    }

    fn load_integration(&self, workspace_id: &WorkspaceId) -> Result<Integration, StoreError> {
        let conn = self.lock()?;
        let body: String = conn
            .query_row(
                "SELECT body FROM integrations WHERE workspace_id = ?1",
                params![workspace_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql)?
            .ok_or(StoreError::NotFound)?;
        serde_json::from_str(&body).map_err(|err| StoreError::Invalid(err.to_string()))
    }

    fn load_capabilities_record(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<CapabilitiesRecord, StoreError> {
        let conn = self.lock()?;
        let body: String = conn
            .query_row(
                "SELECT body FROM capabilities WHERE workspace_id = ?1",
                params![workspace_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql)?
            .ok_or(StoreError::NotFound)?;
        serde_json::from_str(&body).map_err(|err| StoreError::Invalid(err.to_string()))
    }

    fn save_capabilities_record(&self, record: &CapabilitiesRecord) -> Result<(), StoreError> {
        let body =
            serde_json::to_string(record).map_err(|err| StoreError::Invalid(err.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO capabilities (workspace_id, body) VALUES (?1, ?2) \
             ON CONFLICT(workspace_id) DO UPDATE SET body = ?2",
            params![record.workspace_id.as_str(), body],
        )
        .map_err(map_sql)?;
        Ok(())
    }
}

/// Stable storage label for a run state.
const fn state_label(state: RunState) -> &'static str {
    match state {
        RunState::Queued => "queued",
        RunState::Preparing => "preparing",
        RunState::Submitting => "submitting",
        RunState::Running => "running",
        RunState::Collecting => "collecting",
        RunState::Evaluating => "evaluating",
        RunState::Reporting => "reporting",
        RunState::Passed => "passed",
        RunState::Failed => "failed",
        RunState::Error => "error",
    }
}

// ============================================================================
// SECTION: NonceStore
// ============================================================================

impl NonceStore for SqliteStore {
    fn insert(
        &self,
        workspace_id: &WorkspaceId,
        nonce: &str,
        used_at: Timestamp,
        expires_at: Timestamp,
    ) -> Result<(), NonceError> {
        let conn = self.conn.lock().map_err(|_| NonceError::Io("lock poisoned".to_string()))?;
        let result = conn.execute(
            "INSERT INTO nonces (workspace_id, nonce, used_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                workspace_id.as_str(),
                nonce,
                used_at.as_unix_millis(),
                expires_at.as_unix_millis(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(inner, _))
                if inner.code == ErrorCode::ConstraintViolation =>
            {
                Err(NonceError::Replay)
            }
            Err(err) => Err(NonceError::Io(err.to_string())),
        }
    }

    fn purge_expired(&self, now: Timestamp) -> Result<usize, NonceError> {
        let conn = self.conn.lock().map_err(|_| NonceError::Io("lock poisoned".to_string()))?;
        conn.execute("DELETE FROM nonces WHERE expires_at < ?1", params![now.as_unix_millis()])
            .map_err(|err| NonceError::Io(err.to_string()))
    }
}

// ============================================================================
// SECTION: AuditSink
// ============================================================================

impl AuditSink for SqliteStore {
    fn record(&self, event: AuditEvent) -> Result<(), AuditSinkError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|err| AuditSinkError::Serialize(err.to_string()))?;
        let conn =
            self.conn.lock().map_err(|_| AuditSinkError::Io("lock poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO audit_events (workspace_id, actor, event_type, payload, ts) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.workspace_id.as_str(),
                event.actor.as_str(),
                event.event_type,
                payload,
                event.ts.as_unix_millis(),
            ],
        )
        .map_err(|err| AuditSinkError::Io(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: BundleStore
// ============================================================================

impl BundleStore for SqliteStore {
    type Sink = ZipBundleSink;

    fn open_bundle(
        &self,
        _workspace_id: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<Self::Sink, StoreError> {
        let path = self.bundle_path(run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::Io(err.to_string()))?;
        }
        ZipBundleSink::create(&path).map_err(|err| StoreError::Io(err.to_string()))
    }

    fn seal_bundle(
        &self,
        sink: Self::Sink,
        workspace_id: &WorkspaceId,
        _run_id: &RunId,
        now: Timestamp,
    ) -> Result<ArtifactRecord, StoreError> {
        let path = sink.finish().map_err(|err| StoreError::Io(err.to_string()))?;
        let bytes = fs::read(&path).map_err(|err| StoreError::Io(err.to_string()))?;
        // Register through the content-addressed layout; the zip under
        // bundles/{run_id}/ stays as the serving location.
        self.register_blob(workspace_id, ArtifactKind::Bundle, &bytes, "evidence.zip", now)
    }
}
