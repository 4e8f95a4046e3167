// crates/edgegate-core/tests/package.rs
// ============================================================================
// Module: Package Validator Tests
// Description: Tests for the three packaging shapes and their strict bounds.
// ============================================================================
//! ## Overview
//! Validates suffix counting for the accepted shapes and the warning-only
//! behavior of the external-data reference check.

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

use edgegate_core::PackageFile;
use edgegate_core::PackageKind;
use edgegate_core::runtime::package::PackageError;
use edgegate_core::runtime::package::validate_package;

/// File helper.
fn file(name: &str, bytes: &[u8]) -> PackageFile {
    PackageFile::new(name, bytes.to_vec())
}

// ============================================================================
// SECTION: Accepted Shapes
// ============================================================================

/// A single .onnx file classifies as OnnxSingle.
#[test]
fn test_single_onnx_accepted() {
    let result = validate_package(None, &[file("model.onnx", b"onnx")]).unwrap();
    assert_eq!(result.kind, PackageKind::OnnxSingle);
    assert!(result.warnings.is_empty());
}

/// One .onnx plus one .data classifies as OnnxExternal when referenced.
#[test]
fn test_onnx_external_accepted_with_reference() {
    let files = [
        file("model.onnx", b"onnx references weights.data here"),
        file("weights.data", b"weights"),
    ];
    let result = validate_package(None, &files).unwrap();
    assert_eq!(result.kind, PackageKind::OnnxExternal);
    assert!(result.warnings.is_empty());
}

/// A missing data reference is a recorded warning, not a rejection.
#[test]
fn test_onnx_external_missing_reference_warns() {
    let files = [file("model.onnx", b"onnx with no reference"), file("weights.data", b"weights")];
    let result = validate_package(None, &files).unwrap();
    assert_eq!(result.kind, PackageKind::OnnxExternal);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("weights.data"));
}

/// An .aimet container with onnx, encodings, and data classifies as quant.
#[test]
fn test_aimet_container_accepted() {
    let files = [
        file("model.onnx", b"onnx"),
        file("model.encodings", b"{}"),
        file("model.data", b"weights"),
    ];
    let result = validate_package(Some("llama.aimet"), &files).unwrap();
    assert_eq!(result.kind, PackageKind::AimetQuant);
}

/// The .data file is optional inside an .aimet container.
#[test]
fn test_aimet_container_without_data_accepted() {
    let files = [file("model.onnx", b"onnx"), file("model.encodings", b"{}")];
    let result = validate_package(Some("llama.aimet"), &files).unwrap();
    assert_eq!(result.kind, PackageKind::AimetQuant);
}

// ============================================================================
// SECTION: Rejections
// ============================================================================

/// Two .onnx files match no shape.
#[test]
fn test_two_onnx_rejected() {
    let files = [file("a.onnx", b"a"), file("b.onnx", b"b")];
    let err = validate_package(None, &files).unwrap_err();
    assert!(matches!(err, PackageError::InvalidShape(_)));
}

/// Extra .data files match no shape.
#[test]
fn test_two_data_rejected() {
    let files = [file("a.onnx", b"a"), file("a.data", b"x"), file("b.data", b"y")];
    assert!(validate_package(None, &files).is_err());
}

/// Encodings outside an .aimet container are rejected.
#[test]
fn test_encodings_outside_aimet_rejected() {
    let files = [file("model.onnx", b"a"), file("model.encodings", b"{}")];
    let err = validate_package(None, &files).unwrap_err();
    assert!(matches!(err, PackageError::InvalidShape(_)));
}

/// A container without the .aimet marker uses the flat rules.
#[test]
fn test_container_without_marker_uses_flat_rules() {
    let files = [file("model.onnx", b"a"), file("model.encodings", b"{}")];
    assert!(validate_package(Some("llama-quantized"), &files).is_err());
}

/// An .aimet container missing encodings is rejected.
#[test]
fn test_aimet_missing_encodings_rejected() {
    let files = [file("model.onnx", b"a")];
    assert!(validate_package(Some("llama.aimet"), &files).is_err());
}

/// Empty packages are rejected.
#[test]
fn test_empty_package_rejected() {
    assert!(matches!(validate_package(None, &[]).unwrap_err(), PackageError::Empty));
}
