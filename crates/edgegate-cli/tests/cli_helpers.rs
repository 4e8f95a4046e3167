// crates/edgegate-cli/tests/cli_helpers.rs
// ============================================================================
// Module: CLI Helper Tests
// Description: Tests for header signing, exit mapping, and offline verify.
// ============================================================================
//! ## Overview
//! Checks that client-built headers verify under the server-side ingress
//! logic, that the exit-code contract is stable, and that bundle
//! verification works from a zip on disk.

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

use ed25519_dalek::SigningKey;
use edgegate_cli::build_ci_headers;
use edgegate_cli::exit_code_for_state;
use edgegate_cli::generate_nonce;
use edgegate_cli::verify_bundle_file;
use edgegate_core::ArtifactId;
use edgegate_core::BundleBuilder;
use edgegate_core::BundleInputs;
use edgegate_core::CiRequest;
use edgegate_core::DeviceId;
use edgegate_core::DeviceRef;
use edgegate_core::InMemoryNonceStore;
use edgegate_core::ModelRef;
use edgegate_core::PipelineId;
use edgegate_core::PromptPackId;
use edgegate_core::PromptPackRef;
use edgegate_core::RunId;
use edgegate_core::RunOutcome;
use edgegate_core::RunState;
use edgegate_core::SecretString;
use edgegate_core::Timestamp;
use edgegate_core::WorkspaceId;
use edgegate_core::verify_ci_request;
use edgegate_crypto::EvidenceSigner;
use edgegate_store_sqlite::ZipBundleSink;
use tempfile::TempDir;

/// Base wall-clock instant for the tests.
const NOW_MILLIS: i64 = 1_760_000_000_000;

// ============================================================================
// SECTION: Header Signing
// ============================================================================

/// Client-built headers pass server-side verification.
#[test]
fn test_client_headers_verify_server_side() {
    let now = Timestamp::from_unix_millis(NOW_MILLIS);
    let body = br#"{"pipeline_id":"pl-1"}"#;
    let nonce = generate_nonce();
    let headers = build_ci_headers("ws-a", "ci-secret-abcd", &nonce, now, body).unwrap();

    let request = CiRequest {
        workspace_id: WorkspaceId::new(headers.workspace.clone()),
        timestamp: headers.timestamp.clone(),
        nonce: headers.nonce.clone(),
        signature: headers.signature.clone(),
        body: body.to_vec(),
    };
    let nonces = InMemoryNonceStore::new();
    verify_ci_request(&request, &SecretString::from("ci-secret-abcd"), now, &nonces).unwrap();
}

/// Generated nonces fit the ingress limit and do not repeat.
#[test]
fn test_generated_nonce_shape() {
    let first = generate_nonce();
    let second = generate_nonce();
    assert_eq!(first.len(), 64);
    assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
    assert_ne!(first, second);
}

/// Header order is the documented wire order.
#[test]
fn test_header_pair_order() {
    let now = Timestamp::from_unix_millis(NOW_MILLIS);
    let headers = build_ci_headers("ws-a", "secret", "nonce-1", now, b"").unwrap();
    let names: Vec<&str> = headers.pairs().iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec![
        "X-EdgeGate-Workspace",
        "X-EdgeGate-Timestamp",
        "X-EdgeGate-Nonce",
        "X-EdgeGate-Signature"
    ]);
}

// ============================================================================
// SECTION: Exit Codes
// ============================================================================

/// The exit-code contract: 0 passed, 1 failed, 2 error or non-terminal.
#[test]
fn test_exit_code_contract() {
    assert_eq!(exit_code_for_state(RunState::Passed), 0);
    assert_eq!(exit_code_for_state(RunState::Failed), 1);
    assert_eq!(exit_code_for_state(RunState::Error), 2);
    assert_eq!(exit_code_for_state(RunState::Running), 2);
}

// ============================================================================
// SECTION: Offline Verification
// ============================================================================

/// A signed zip verifies from disk with the published public key.
#[test]
fn test_verify_bundle_file() {
    let dir = TempDir::new().unwrap();
    let bundle_path = dir.path().join("evidence.zip");
    let key_path = dir.path().join("public.key");

    let signer = EvidenceSigner::new("sk-2026-01".to_string(), SigningKey::from_bytes(&[5u8; 32]));
    std::fs::write(&key_path, signer.public_key_bytes()).unwrap();

    let inputs = BundleInputs {
        workspace_id: WorkspaceId::new("ws-a"),
        pipeline_id: PipelineId::new("pl-1"),
        run_id: RunId::new("run-7"),
        created_at: Timestamp::from_unix_millis(NOW_MILLIS),
        model: ModelRef {
            artifact_id: ArtifactId::new("art-model"),
            sha256: edgegate_core::hash_bytes(b"model"),
        },
        promptpack: PromptPackRef {
            promptpack_id: PromptPackId::new("pp-1"),
            version: "1.0.0".to_string(),
            sha256: edgegate_core::hash_bytes(b"pack"),
        },
        devices: vec![DeviceRef {
            device_id: DeviceId::new("sm8650"),
            device_name: "Snapdragon 8 Gen 3".to_string(),
        }],
        capabilities_ref: ArtifactId::new("art-caps"),
        metric_mapping_ref: ArtifactId::new("art-map"),
        outcome: RunOutcome::Failed,
        normalized_metrics: Vec::new(),
        gates_evaluation: Vec::new(),
        raw_payloads: Vec::new(),
        mapping_json: b"{}".to_vec(),
        capabilities_json: b"{}".to_vec(),
    };
    let mut sink = ZipBundleSink::create(&bundle_path).unwrap();
    BundleBuilder::new(&signer).build(&mut sink, &inputs).unwrap();
    sink.finish().unwrap();

    let summary = verify_bundle_file(&bundle_path, &key_path).unwrap();
    assert_eq!(summary.run_id, RunId::new("run-7"));
    assert_eq!(summary.results.status, RunOutcome::Failed);

    // A wrong key fails closed.
    let other = EvidenceSigner::new("sk-x".to_string(), SigningKey::from_bytes(&[6u8; 32]));
    std::fs::write(&key_path, other.public_key_bytes()).unwrap();
    assert!(verify_bundle_file(&bundle_path, &key_path).is_err());
}
