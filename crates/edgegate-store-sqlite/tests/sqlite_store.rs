// crates/edgegate-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Contract tests for the durable store implementation.
// ============================================================================
//! ## Overview
//! Exercises the SQLite store against the same contracts the in-memory
//! reference honors: content addressing, tenancy, run transition legality,
//! lock single-flight, nonce uniqueness, promptpack immutability, and
//! signing-key revocation.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use edgegate_core::ArtifactKind;
use edgegate_core::BlobStore;
use edgegate_core::ControlStore;
use edgegate_core::Expectation;
use edgegate_core::KeyId;
use edgegate_core::NonceError;
use edgegate_core::NonceStore;
use edgegate_core::PipelineId;
use edgegate_core::PromptCase;
use edgegate_core::PromptPack;
use edgegate_core::PromptPackId;
use edgegate_core::RunId;
use edgegate_core::RunRecord;
use edgegate_core::RunState;
use edgegate_core::RunTrigger;
use edgegate_core::SigningKeyRecord;
use edgegate_core::StoreError;
use edgegate_core::Timestamp;
use edgegate_core::WorkspaceId;
use edgegate_core::hash_bytes;
use edgegate_store_sqlite::SqliteStore;
use edgegate_store_sqlite::SqliteStoreConfig;
use tempfile::TempDir;

/// Opens a store rooted in a fresh temp directory.
fn open_store() -> (SqliteStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = SqliteStoreConfig {
        path: dir.path().join("edgegate.db"),
        data_dir: dir.path().join("data"),
        busy_timeout_ms: 1_000,
        journal_mode: edgegate_store_sqlite::SqliteJournalMode::Wal,
        sync_mode: edgegate_store_sqlite::SqliteSyncMode::Normal,
    };
    (SqliteStore::open(&config).unwrap(), dir)
}

/// Timestamp helper.
fn ts(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

/// A queued run for `ws-a`.
fn queued_run(run_id: &str) -> RunRecord {
    RunRecord::new_queued(
        RunId::new(run_id),
        WorkspaceId::new("ws-a"),
        PipelineId::new("pl-1"),
        RunTrigger::Manual,
        edgegate_core::ArtifactId::new("art-model"),
        ts(1_000),
    )
}

// ============================================================================
// SECTION: Blob Contract
// ============================================================================

/// Blob bytes round-trip through the filesystem layout.
#[test]
fn test_blob_put_get_round_trip() {
    let (store, _dir) = open_store();
    let workspace = WorkspaceId::new("ws-a");
    let record = store
        .put(&workspace, ArtifactKind::ProbeRaw, b"payload bytes", "probe.json", ts(1_000))
        .unwrap();

    assert_eq!(record.sha256, hash_bytes(b"payload bytes"));
    assert_eq!(store.get(&workspace, &record.artifact_id).unwrap(), b"payload bytes");
    assert_eq!(store.stat(&workspace, &record.artifact_id).unwrap().bytes, 13);
}

/// Identical bytes deduplicate; cross-workspace reads are NotFound.
#[test]
fn test_blob_dedup_and_tenancy() {
    let (store, _dir) = open_store();
    let workspace = WorkspaceId::new("ws-a");
    let first =
        store.put(&workspace, ArtifactKind::ProbeRaw, b"shared", "a.json", ts(1_000)).unwrap();
    let second =
        store.put(&workspace, ArtifactKind::ProbeRaw, b"shared", "b.json", ts(2_000)).unwrap();
    assert_eq!(first.artifact_id, second.artifact_id);

    let err = store.get(&WorkspaceId::new("ws-b"), &first.artifact_id).unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

/// Expiry tombstones rows and deletes bytes.
#[test]
fn test_blob_expiry_tombstones() {
    let (store, _dir) = open_store();
    let workspace = WorkspaceId::new("ws-a");
    let record =
        store.put(&workspace, ArtifactKind::ProbeRaw, b"old", "old.json", ts(1_000)).unwrap();

    let cutoff = ts(1_000 + 40 * 24 * 60 * 60 * 1000);
    assert_eq!(store.expire_older_than(cutoff).unwrap(), 1);
    assert!(matches!(store.get(&workspace, &record.artifact_id), Err(StoreError::NotFound)));
    assert!(store.stat(&workspace, &record.artifact_id).unwrap().tombstoned);
}

// ============================================================================
// SECTION: Run Contract
// ============================================================================

/// Runs round-trip with digest-checked snapshots.
#[test]
fn test_run_round_trip() {
    let (store, _dir) = open_store();
    let run = queued_run("run-1");
    store.create_run(&run).unwrap();

    let loaded = store.load_run(&WorkspaceId::new("ws-a"), &RunId::new("run-1")).unwrap();
    assert_eq!(loaded, run);

    let err = store.load_run(&WorkspaceId::new("ws-b"), &RunId::new("run-1")).unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

/// Skipping states or leaving terminal states is rejected.
#[test]
fn test_illegal_transitions_rejected() {
    let (store, _dir) = open_store();
    let mut run = queued_run("run-1");
    store.create_run(&run).unwrap();

    // Queued cannot jump straight to running.
    run.state = RunState::Running;
    assert!(matches!(store.save_run(&run).unwrap_err(), StoreError::Conflict(_)));

    // Any state may error.
    run.state = RunState::Error;
    store.save_run(&run).unwrap();

    // Terminal states never change.
    run.state = RunState::Passed;
    assert!(matches!(store.save_run(&run).unwrap_err(), StoreError::Conflict(_)));
}

/// The workspace lock is single-flight and re-entrant per run.
#[test]
fn test_workspace_lock_single_flight() {
    let (store, _dir) = open_store();
    let workspace = WorkspaceId::new("ws-a");

    assert!(store.try_acquire_workspace_lock(&workspace, &RunId::new("run-1")).unwrap());
    assert!(store.try_acquire_workspace_lock(&workspace, &RunId::new("run-1")).unwrap());
    assert!(!store.try_acquire_workspace_lock(&workspace, &RunId::new("run-2")).unwrap());

    store.release_workspace_lock(&workspace, &RunId::new("run-1")).unwrap();
    assert!(store.try_acquire_workspace_lock(&workspace, &RunId::new("run-2")).unwrap());
}

/// Queued runs dispatch in arrival order.
#[test]
fn test_next_queued_is_fifo() {
    let (store, _dir) = open_store();
    store.create_run(&queued_run("run-1")).unwrap();
    let mut second = queued_run("run-2");
    second.created_at = ts(2_000);
    second.updated_at = ts(2_000);
    store.create_run(&second).unwrap();

    assert_eq!(
        store.next_queued_run(&WorkspaceId::new("ws-a")).unwrap(),
        Some(RunId::new("run-1"))
    );
}

// ============================================================================
// SECTION: Nonce Contract
// ============================================================================

/// Nonce uniqueness is enforced by the primary key, per workspace.
#[test]
fn test_nonce_uniqueness_per_workspace() {
    let (store, _dir) = open_store();
    let workspace_a = WorkspaceId::new("ws-a");
    let workspace_b = WorkspaceId::new("ws-b");

    store.insert(&workspace_a, "nonce-1", ts(1_000), ts(300_000)).unwrap();
    let err = store.insert(&workspace_a, "nonce-1", ts(2_000), ts(300_000)).unwrap_err();
    assert!(matches!(err, NonceError::Replay));

    // The same nonce is fresh for a different workspace.
    store.insert(&workspace_b, "nonce-1", ts(1_000), ts(300_000)).unwrap();

    assert_eq!(store.purge_expired(ts(400_000)).unwrap(), 2);
}

// ============================================================================
// SECTION: PromptPack Immutability
// ============================================================================

/// A published version rejects content-changing writes; a new version works.
#[test]
fn test_published_promptpack_is_immutable() {
    let (store, _dir) = open_store();
    let mut pack = PromptPack {
        workspace_id: WorkspaceId::new("ws-a"),
        logical_id: PromptPackId::new("pp-1"),
        version: "1.0.0".to_string(),
        sha256: hash_bytes(b"v1"),
        cases: vec![PromptCase {
            case_id: "a".to_string(),
            prompt: "Say hello.".to_string(),
            expectation: Expectation::None,
        }],
        published: false,
    };
    pack.sha256 = pack.canonical_sha256().unwrap();
    store.upsert_promptpack(&pack).unwrap();
    store.publish_promptpack(&pack.workspace_id, &pack.logical_id, "1.0.0").unwrap();

    // Same content re-upload is tolerated; changed content is not.
    let mut changed = pack.clone();
    changed.published = true;
    changed.cases[0].prompt = "Say goodbye.".to_string();
    changed.sha256 = changed.canonical_sha256().unwrap();
    assert!(matches!(store.upsert_promptpack(&changed).unwrap_err(), StoreError::Conflict(_)));

    // A new version of the same logical id succeeds.
    changed.version = "1.0.1".to_string();
    store.upsert_promptpack(&changed).unwrap();
}

// ============================================================================
// SECTION: Signing Keys
// ============================================================================

/// Revocation marks a key without deleting it.
#[test]
fn test_signing_key_revocation_keeps_record() {
    let (store, _dir) = open_store();
    let record = SigningKeyRecord {
        key_id: KeyId::new("sk-2026-01"),
        public_key: "AAAA".to_string(),
        created_at: ts(1_000),
        revoked_at: None,
    };
    store.insert_signing_key(&record).unwrap();
    store.revoke_signing_key(&record.key_id, ts(2_000)).unwrap();

    let loaded = store.load_signing_key(&record.key_id).unwrap();
    assert_eq!(loaded.revoked_at, Some(ts(2_000)));
    assert_eq!(loaded.public_key, "AAAA");
}
