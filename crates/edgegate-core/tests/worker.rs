// crates/edgegate-core/tests/worker.rs
// ============================================================================
// Module: Run Worker Tests
// Description: End-to-end state machine tests over the mock backend.
// ============================================================================
//! ## Overview
//! Drives runs through the full state machine against the scripted hub:
//! happy path to a signed bundle, submit retry, terminal error paths,
//! per-workspace single-flight, cancellation, and the deadline.

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
    clippy::float_cmp,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use edgegate_core::CancelFlag;
use edgegate_core::ControlStore;
use edgegate_core::ErrorCode;
use edgegate_core::FlatOpener;
use edgegate_core::GateOp;
use edgegate_core::InMemoryStore;
use edgegate_core::ManualClock;
use edgegate_core::MemoryAuditSink;
use edgegate_core::MemoryBundleSink;
use edgegate_core::PipelineId;
use edgegate_core::RunId;
use edgegate_core::RunRecord;
use edgegate_core::RunState;
use edgegate_core::RunTrigger;
use edgegate_core::RunWorker;
use edgegate_core::WorkerConfig;
use edgegate_core::WorkspaceId;
use edgegate_core::verify_bundle;
use edgegate_crypto::EvidenceSigner;

use common::MockBehavior;
use common::MockConnector;
use common::gate;
use common::profile_payload;
use common::seed_model;
use common::seed_workspace;
use common::ts;

/// Base wall-clock instant for worker tests.
const NOW_MILLIS: i64 = 1_760_000_000_000;

/// Builds a worker plus its seeded store for the given behavior and gates.
fn build_worker(
    behavior: MockBehavior,
    gates: Vec<edgegate_core::GateSpec>,
    stable_metrics: &[&str],
) -> (
    RunWorker<MockConnector, InMemoryStore, MemoryAuditSink, ManualClock, FlatOpener>,
    RunId,
) {
    let store = InMemoryStore::new();
    let keyring = seed_workspace(&store, "ws-a", gates, stable_metrics);
    let model_id = seed_model(&store, "ws-a");

    let run = RunRecord::new_queued(
        RunId::new("run-1"),
        WorkspaceId::new("ws-a"),
        PipelineId::new("pl-1"),
        RunTrigger::Manual,
        model_id,
        ts(NOW_MILLIS),
    );
    store.create_run(&run).unwrap();

    let signer = EvidenceSigner::new("sk-2026-01".to_string(), SigningKey::from_bytes(&[11u8; 32]));
    let worker = RunWorker::new(
        MockConnector {
            behavior,
        },
        store,
        MemoryAuditSink::new(),
        ManualClock::at(ts(NOW_MILLIS)),
        FlatOpener,
        keyring,
        signer,
        WorkerConfig::default(),
    );
    (worker, RunId::new("run-1"))
}

/// Behavior whose three measurement repeats pass the standard gates.
fn passing_behavior() -> MockBehavior {
    MockBehavior {
        profile_payloads: vec![
            // Iteration 0 is the warmup; its absurd values must be excluded.
            profile_payload(&[("peak_ram_mb", 9000.0), ("tokens_per_sec", 0.1)]),
            profile_payload(&[("peak_ram_mb", 3200.0), ("tokens_per_sec", 18.0)]),
            profile_payload(&[("peak_ram_mb", 3250.0), ("tokens_per_sec", 18.5)]),
            profile_payload(&[("peak_ram_mb", 3300.0), ("tokens_per_sec", 17.5)]),
        ],
        inference_outputs: [("greeting".to_string(), "hello".to_string())].into_iter().collect(),
        ..MockBehavior::default()
    }
}

/// Standard gate set.
fn standard_gates() -> Vec<edgegate_core::GateSpec> {
    vec![
        gate("peak_ram_mb", GateOp::Le, 3500.0, true),
        gate("tokens_per_sec", GateOp::Ge, 12.0, false),
    ]
}

// ============================================================================
// SECTION: Happy Path
// ============================================================================

/// A run flows to `passed` with a verifiable signed bundle.
#[test]
fn test_run_passes_end_to_end() {
    let (worker, run_id) =
        build_worker(passing_behavior(), standard_gates(), &["peak_ram_mb", "tokens_per_sec"]);
    let workspace = WorkspaceId::new("ws-a");

    let run = worker.dispatch(&workspace, &run_id, &CancelFlag::new()).unwrap();

    assert_eq!(run.state, RunState::Passed);
    assert!(run.job_spec_artifact_id.is_some());
    assert!(run.bundle_artifact_id.is_some());

    let metrics = run.normalized_metrics.unwrap();
    let ram = metrics.iter().find(|metric| metric.metric == "peak_ram_mb").unwrap();
    assert_eq!(ram.median, 3250.0);
    assert_eq!(ram.repeats, 3);
    let correctness = metrics.iter().find(|metric| metric.metric == "correctness").unwrap();
    assert_eq!(correctness.median, 1.0);

    // The bundle the store sealed verifies offline.
    let files = worker.store().bundle_files(&run_id).unwrap();
    let reader = MemoryBundleSink::from_files(files);
    let signer = EvidenceSigner::new("sk-2026-01".to_string(), SigningKey::from_bytes(&[11u8; 32]));
    let key = VerifyingKey::from_bytes(&signer.public_key_bytes()).unwrap();
    let summary = verify_bundle(&reader, &key).unwrap();
    assert_eq!(summary.run_id, run_id);
}

/// One transport failure per submit succeeds via the single retry.
#[test]
fn test_submit_retries_once_on_transport_failure() {
    let behavior = MockBehavior {
        submit_transport_failures: 1,
        ..passing_behavior()
    };
    let (worker, run_id) =
        build_worker(behavior, standard_gates(), &["peak_ram_mb", "tokens_per_sec"]);

    let run = worker.dispatch(&WorkspaceId::new("ws-a"), &run_id, &CancelFlag::new()).unwrap();
    assert_eq!(run.state, RunState::Passed);
}

// ============================================================================
// SECTION: Error Paths
// ============================================================================

/// A backend job failure terminates with BACKEND_JOB_FAILED and the reason.
#[test]
fn test_backend_job_failure() {
    let behavior = MockBehavior {
        fail_jobs: Some("device reset during profiling".to_string()),
        ..passing_behavior()
    };
    let (worker, run_id) =
        build_worker(behavior, standard_gates(), &["peak_ram_mb", "tokens_per_sec"]);

    let run = worker.dispatch(&WorkspaceId::new("ws-a"), &run_id, &CancelFlag::new()).unwrap();
    assert_eq!(run.state, RunState::Error);
    assert_eq!(run.error_code, Some(ErrorCode::BackendJobFailed));
    assert!(run.error_detail.unwrap().contains("device reset"));
}

/// A rejected token terminates with TOKEN_INVALID.
#[test]
fn test_rejected_token() {
    let behavior = MockBehavior {
        token_ok: false,
        ..passing_behavior()
    };
    let (worker, run_id) =
        build_worker(behavior, standard_gates(), &["peak_ram_mb", "tokens_per_sec"]);

    let run = worker.dispatch(&WorkspaceId::new("ws-a"), &run_id, &CancelFlag::new()).unwrap();
    assert_eq!(run.state, RunState::Error);
    assert_eq!(run.error_code, Some(ErrorCode::TokenInvalid));
}

/// A required gate whose metric lacks a mapping errors, with the bundle
/// still produced for auditability.
#[test]
fn test_missing_required_metric_run() {
    let (worker, run_id) =
        build_worker(passing_behavior(), standard_gates(), &["tokens_per_sec"]);

    let run = worker.dispatch(&WorkspaceId::new("ws-a"), &run_id, &CancelFlag::new()).unwrap();
    assert_eq!(run.state, RunState::Error);
    assert_eq!(run.error_code, Some(ErrorCode::MissingRequiredMetric));
    assert!(run.error_detail.unwrap().contains("peak_ram_mb"));
    assert!(run.bundle_artifact_id.is_some());
}

/// Jobs that never finish exhaust the deadline into TIMEOUT.
#[test]
fn test_timeout_on_stuck_jobs() {
    let behavior = MockBehavior {
        pending_polls: u32::MAX,
        ..passing_behavior()
    };
    let (worker, run_id) =
        build_worker(behavior, standard_gates(), &["peak_ram_mb", "tokens_per_sec"]);

    // The manual clock advances on every backoff sleep, so the 20 minute
    // deadline is crossed without wall-clock waiting.
    let run = worker.dispatch(&WorkspaceId::new("ws-a"), &run_id, &CancelFlag::new()).unwrap();
    assert_eq!(run.state, RunState::Error);
    assert_eq!(run.error_code, Some(ErrorCode::Timeout));
}

/// An explicit cancel terminates with CANCELLED.
#[test]
fn test_cancel_before_dispatch() {
    let (worker, run_id) =
        build_worker(passing_behavior(), standard_gates(), &["peak_ram_mb", "tokens_per_sec"]);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let run = worker.dispatch(&WorkspaceId::new("ws-a"), &run_id, &cancel).unwrap();
    assert_eq!(run.state, RunState::Error);
    assert_eq!(run.error_code, Some(ErrorCode::Cancelled));
}

// ============================================================================
// SECTION: Concurrency and Ordering
// ============================================================================

/// A second queued run stays queued while the first holds the lock, and
/// dispatches after release.
#[test]
fn test_workspace_single_flight() {
    let (worker, first_id) =
        build_worker(passing_behavior(), standard_gates(), &["peak_ram_mb", "tokens_per_sec"]);
    let workspace = WorkspaceId::new("ws-a");

    let second_id = RunId::new("run-2");
    // Content addressing dedups the identical model bytes to the same id.
    let model_id = seed_model(worker.store(), "ws-a");
    let second = RunRecord::new_queued(
        second_id.clone(),
        workspace.clone(),
        PipelineId::new("pl-1"),
        RunTrigger::Ci,
        model_id,
        ts(NOW_MILLIS),
    );
    worker.store().create_run(&second).unwrap();

    // Hold the lock on behalf of the first run, then try the second.
    assert!(worker.store().try_acquire_workspace_lock(&workspace, &first_id).unwrap());
    let parked = worker.dispatch(&workspace, &second_id, &CancelFlag::new()).unwrap();
    assert_eq!(parked.state, RunState::Queued);

    worker.store().release_workspace_lock(&workspace, &first_id).unwrap();
    let first = worker.dispatch(&workspace, &first_id, &CancelFlag::new()).unwrap();
    assert_eq!(first.state, RunState::Passed);

    assert_eq!(worker.store().next_queued_run(&workspace).unwrap(), Some(second_id.clone()));
    let second = worker.dispatch(&workspace, &second_id, &CancelFlag::new()).unwrap();
    assert_eq!(second.state, RunState::Passed);
}

/// Terminal states never change: re-dispatch is a no-op.
#[test]
fn test_terminal_run_is_immutable() {
    let (worker, run_id) =
        build_worker(passing_behavior(), standard_gates(), &["peak_ram_mb", "tokens_per_sec"]);
    let workspace = WorkspaceId::new("ws-a");

    let first = worker.dispatch(&workspace, &run_id, &CancelFlag::new()).unwrap();
    assert_eq!(first.state, RunState::Passed);
    let again = worker.dispatch(&workspace, &run_id, &CancelFlag::new()).unwrap();
    assert_eq!(again.state, RunState::Passed);
    assert_eq!(again.updated_at, first.updated_at);
}

/// Audit events record the ordered forward transition chain.
#[test]
fn test_audit_records_ordered_transitions() {
    let (worker, run_id) =
        build_worker(passing_behavior(), standard_gates(), &["peak_ram_mb", "tokens_per_sec"]);

    worker.dispatch(&WorkspaceId::new("ws-a"), &run_id, &CancelFlag::new()).unwrap();

    let events = worker.audit().events();
    let transitions: Vec<String> = events
        .iter()
        .filter(|event| event.event_type == "run_state_changed")
        .map(|event| event.payload.get("to").and_then(|to| to.as_str()).unwrap().to_string())
        .collect();
    assert_eq!(
        transitions,
        vec![
            "preparing",
            "submitting",
            "running",
            "collecting",
            "evaluating",
            "reporting",
            "passed"
        ]
    );
    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);
}
