// crates/edgegate-core/tests/bundle.rs
// ============================================================================
// Module: Evidence Bundle Tests
// Description: Tests for bundle assembly, canonical signing, and verification.
// ============================================================================
//! ## Overview
//! Builds bundles through the memory sink and verifies them offline:
//! signature round-trip, canonical re-serialization idempotence, manifest
//! hash replay, and fail-closed behavior on tampered or extra files.

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

mod common;

use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use edgegate_core::ArtifactId;
use edgegate_core::BundleBuilder;
use edgegate_core::BundleError;
use edgegate_core::BundleInputs;
use edgegate_core::BundleReader;
use edgegate_core::BundleSink;
use edgegate_core::DeviceId;
use edgegate_core::KeyId;
use edgegate_core::MemoryBundleSink;
use edgegate_core::PipelineId;
use edgegate_core::PromptPackId;
use edgegate_core::RunId;
use edgegate_core::RunOutcome;
use edgegate_core::WorkspaceId;
use edgegate_core::verify_bundle;
use edgegate_crypto::EvidenceSigner;

use common::ts;

/// Deterministic signer for the tests.
fn signer() -> EvidenceSigner {
    EvidenceSigner::new("sk-2026-01".to_string(), SigningKey::from_bytes(&[11u8; 32]))
}

/// Public key matching [`signer`].
fn public_key() -> VerifyingKey {
    VerifyingKey::from_bytes(&signer().public_key_bytes()).unwrap()
}

/// Minimal bundle inputs with one raw payload.
fn inputs() -> BundleInputs {
    BundleInputs {
        workspace_id: WorkspaceId::new("ws-a"),
        pipeline_id: PipelineId::new("pl-1"),
        run_id: RunId::new("run-1"),
        created_at: ts(1_760_000_000_000),
        model: edgegate_core::ModelRef {
            artifact_id: ArtifactId::new("art-model"),
            sha256: edgegate_core::hash_bytes(b"model"),
        },
        promptpack: edgegate_core::PromptPackRef {
            promptpack_id: PromptPackId::new("pp-smoke"),
            version: "1.0.0".to_string(),
            sha256: edgegate_core::hash_bytes(b"pack"),
        },
        devices: vec![edgegate_core::DeviceRef {
            device_id: DeviceId::new("sm8650"),
            device_name: "Snapdragon 8 Gen 3".to_string(),
        }],
        capabilities_ref: ArtifactId::new("art-caps"),
        metric_mapping_ref: ArtifactId::new("art-map"),
        outcome: RunOutcome::Passed,
        normalized_metrics: Vec::new(),
        gates_evaluation: Vec::new(),
        raw_payloads: vec![(
            "sm8650-profile-i1.json".to_string(),
            br#"{"metrics":{"peak_ram_mb":3250}}"#.to_vec(),
        )],
        mapping_json: br#"{"metrics":{}}"#.to_vec(),
        capabilities_json: br#"{"capabilities":[]}"#.to_vec(),
    }
}

// ============================================================================
// SECTION: Round Trip
// ============================================================================

/// A built bundle verifies under the signing public key.
#[test]
fn test_build_verify_round_trip() {
    let signer = signer();
    let mut sink = MemoryBundleSink::new();
    let summary = BundleBuilder::new(&signer).build(&mut sink, &inputs()).unwrap();

    assert_eq!(summary.signing.public_key_id, KeyId::new("sk-2026-01"));
    assert_eq!(summary.bundle_version, "1.0");

    let verified = verify_bundle(&sink, &public_key()).unwrap();
    assert_eq!(verified.run_id, RunId::new("run-1"));
    assert_eq!(verified.results.status, RunOutcome::Passed);
}

/// Canonical re-serialization of the summary is byte-identical.
#[test]
fn test_summary_canonicalization_is_idempotent() {
    let signer = signer();
    let mut sink = MemoryBundleSink::new();
    BundleBuilder::new(&signer).build(&mut sink, &inputs()).unwrap();

    let stored = sink.read("summary.json").unwrap();
    let parsed: edgegate_core::BundleSummary = serde_json::from_slice(&stored).unwrap();
    let reserialized = edgegate_core::canonical_json_bytes(&parsed).unwrap();
    assert_eq!(stored, reserialized);
}

/// The manifest indexes every file except itself.
#[test]
fn test_manifest_covers_all_files() {
    let signer = signer();
    let mut sink = MemoryBundleSink::new();
    BundleBuilder::new(&signer).build(&mut sink, &inputs()).unwrap();

    let manifest: Vec<edgegate_core::ArtifactEntry> =
        serde_json::from_slice(&sink.read("artifacts.json").unwrap()).unwrap();
    let indexed: Vec<&str> = manifest.iter().map(|entry| entry.path.as_str()).collect();

    for path in sink.paths().unwrap() {
        if path != "artifacts.json" {
            assert!(indexed.contains(&path.as_str()), "manifest misses {path}");
        }
    }
    assert!(indexed.contains(&"summary.json"));
    assert!(indexed.contains(&"summary.sig"));
    assert!(indexed.contains(&"report.html"));
    assert!(indexed.contains(&"raw/sm8650-profile-i1.json"));
    assert!(indexed.contains(&"mapping/metric_mapping.json"));
    assert!(indexed.contains(&"capabilities/workspace_capabilities.json"));
}

// ============================================================================
// SECTION: Tamper
// ============================================================================

/// A tampered raw payload fails hash replay.
#[test]
fn test_tampered_payload_fails_verification() {
    let signer = signer();
    let mut sink = MemoryBundleSink::new();
    BundleBuilder::new(&signer).build(&mut sink, &inputs()).unwrap();

    let mut files = sink.into_files();
    files.insert("raw/sm8650-profile-i1.json".to_string(), b"{\"metrics\":{}}".to_vec());
    let tampered = MemoryBundleSink::from_files(files);

    let err = verify_bundle(&tampered, &public_key()).unwrap_err();
    assert!(matches!(err, BundleError::Verify(_)));
}

/// A tampered summary fails the signature even with a matching manifest.
#[test]
fn test_tampered_summary_fails_signature() {
    let signer = signer();
    let mut sink = MemoryBundleSink::new();
    BundleBuilder::new(&signer).build(&mut sink, &inputs()).unwrap();

    let mut files = sink.into_files();
    let summary = files.get("summary.json").unwrap().clone();
    let altered = String::from_utf8(summary).unwrap().replace("passed", "failed");
    files.insert("summary.json".to_string(), altered.clone().into_bytes());
    // Rewrite the manifest entry so only the signature can catch it.
    let manifest = files.get("artifacts.json").unwrap().clone();
    let mut entries: Vec<edgegate_core::ArtifactEntry> =
        serde_json::from_slice(&manifest).unwrap();
    for entry in &mut entries {
        if entry.path == "summary.json" {
            entry.sha256 = edgegate_core::hash_bytes(altered.as_bytes());
            entry.bytes = altered.len() as u64;
        }
    }
    files.insert("artifacts.json".to_string(), serde_json::to_vec(&entries).unwrap());
    let tampered = MemoryBundleSink::from_files(files);

    let err = verify_bundle(&tampered, &public_key()).unwrap_err();
    assert!(matches!(err, BundleError::Verify(_)));
}

/// Files not present in the manifest fail verification.
#[test]
fn test_unindexed_file_fails_verification() {
    let signer = signer();
    let mut sink = MemoryBundleSink::new();
    BundleBuilder::new(&signer).build(&mut sink, &inputs()).unwrap();
    sink.write("raw/smuggled.json", b"{}").unwrap();

    let err = verify_bundle(&sink, &public_key()).unwrap_err();
    assert!(matches!(err, BundleError::Verify(_)));
}

/// Verification under the wrong public key fails.
#[test]
fn test_wrong_key_fails_verification() {
    let signer = signer();
    let mut sink = MemoryBundleSink::new();
    BundleBuilder::new(&signer).build(&mut sink, &inputs()).unwrap();

    let wrong = SigningKey::from_bytes(&[99u8; 32]);
    let wrong_key = VerifyingKey::from_bytes(&wrong.verifying_key().to_bytes()).unwrap();
    let err = verify_bundle(&sink, &wrong_key).unwrap_err();
    assert!(matches!(err, BundleError::Verify(_)));
}
