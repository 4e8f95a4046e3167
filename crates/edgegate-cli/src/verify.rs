// crates/edgegate-cli/src/verify.rs
// ============================================================================
// Module: Offline Verification and Exit Mapping
// Description: Bundle verification wrapper and CI exit-code contract.
// Purpose: Let build pipelines block on signed evidence without a server.
// Dependencies: edgegate-core, edgegate-crypto, edgegate-store-sqlite
// ============================================================================

//! ## Overview
//! `verify_bundle_file` replays a bundle's manifest hashes and Ed25519
//! signature from a zip on disk plus the published public key. Exit codes
//! follow the CI contract: 0 passed, 1 failed, 2 error, 3 auth/config.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use edgegate_core::BundleSummary;
use edgegate_core::RunState;
use edgegate_core::verify_bundle;
use edgegate_crypto::load_verifying_key;
use edgegate_store_sqlite::ZipBundleReader;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Offline verification errors.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The public key file could not be loaded.
    #[error("public key load failed: {0}")]
    Key(String),
    /// The bundle failed to open or verify.
    #[error("bundle verification failed: {0}")]
    Bundle(String),
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies an `evidence.zip` against a public key file.
///
/// # Errors
///
/// Returns [`VerifyError`] when the key cannot be loaded or any manifest or
/// signature check fails.
pub fn verify_bundle_file(
    bundle_path: &Path,
    public_key_path: &Path,
) -> Result<BundleSummary, VerifyError> {
    let key =
        load_verifying_key(public_key_path).map_err(|err| VerifyError::Key(err.to_string()))?;
    let reader =
        ZipBundleReader::open(bundle_path).map_err(|err| VerifyError::Bundle(err.to_string()))?;
    verify_bundle(&reader, &key).map_err(|err| VerifyError::Bundle(err.to_string()))
}

// ============================================================================
// SECTION: Exit Codes
// ============================================================================

/// Maps a terminal run state to the CI exit-code contract.
///
/// Non-terminal states map to the error code so a timed-out wait still
/// blocks the pipeline.
#[must_use]
pub const fn exit_code_for_state(state: RunState) -> u8 {
    match state {
        RunState::Passed => 0,
        RunState::Failed => 1,
        _ => 2,
    }
}
