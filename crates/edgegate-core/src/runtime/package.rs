// crates/edgegate-core/src/runtime/package.rs
// ============================================================================
// Module: EdgeGate Package Validator
// Description: Model packaging-shape validation without content parsing.
// Purpose: Accept exactly the three supported packaging shapes, strictly.
// Dependencies: crate::core::pipeline, serde, thiserror
// ============================================================================

//! ## Overview
//! The validator classifies a model package by counting file suffixes; it
//! never executes or interprets ONNX content. The one content-touching check
//! (does the ONNX reference its external data file by name) is best-effort:
//! an unparseable model yields a recorded warning, never a rejection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::pipeline::PackageKind;
use crate::interfaces::PackageFile;
use crate::interfaces::PackageListing;
use crate::interfaces::PackageOpenError;
use crate::interfaces::PackageOpener;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Package validation rejection with a cause.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The file set matches none of the supported shapes.
    #[error("invalid model package: {0}")]
    InvalidShape(String),
    /// The package contains no files.
    #[error("invalid model package: empty package")]
    Empty,
}

// ============================================================================
// SECTION: Inputs and Outputs
// ============================================================================

/// Accepted validation result: the kind plus recorded warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageValidation {
    /// Classified packaging shape.
    pub kind: PackageKind,
    /// Non-fatal findings recorded into the run.
    pub warnings: Vec<String>,
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a model package against the three supported shapes.
///
/// - `OnnxSingle`: exactly one `.onnx`, nothing else of the counted kinds.
/// - `OnnxExternal`: exactly one `.onnx` and exactly one `.data`.
/// - `AimetQuant`: container name contains `.aimet`; exactly one `.onnx`,
///   exactly one `.encodings`, optionally one `.data`.
///
/// # Errors
///
/// Returns [`PackageError`] when the file set matches no supported shape.
pub fn validate_package(
    container_name: Option<&str>,
    files: &[PackageFile],
) -> Result<PackageValidation, PackageError> {
    if files.is_empty() {
        return Err(PackageError::Empty);
    }

    let onnx: Vec<&PackageFile> = files_with_suffix(files, ".onnx");
    let data: Vec<&PackageFile> = files_with_suffix(files, ".data");
    let encodings: Vec<&PackageFile> = files_with_suffix(files, ".encodings");

    let is_aimet_container = container_name.is_some_and(|name| name.contains(".aimet"));

    if is_aimet_container {
        if onnx.len() == 1 && encodings.len() == 1 && data.len() <= 1 {
            return Ok(PackageValidation {
                kind: PackageKind::AimetQuant,
                warnings: Vec::new(),
            });
        }
        return Err(PackageError::InvalidShape(format!(
            "aimet container must hold exactly one .onnx and one .encodings \
             (found {} .onnx, {} .encodings, {} .data)",
            onnx.len(),
            encodings.len(),
            data.len()
        )));
    }

    if !encodings.is_empty() {
        return Err(PackageError::InvalidShape(
            ".encodings files are only accepted inside an .aimet container".to_string(),
        ));
    }

    match (onnx.len(), data.len()) {
        (1, 0) => Ok(PackageValidation {
            kind: PackageKind::OnnxSingle,
            warnings: Vec::new(),
        }),
        (1, 1) => {
            let mut warnings = Vec::new();
            if let Some(warning) = check_external_data_reference(onnx[0], &data[0].name) {
                warnings.push(warning);
            }
            Ok(PackageValidation {
                kind: PackageKind::OnnxExternal,
                warnings,
            })
        }
        (onnx_count, data_count) => Err(PackageError::InvalidShape(format!(
            "expected one .onnx with at most one .data, found {onnx_count} .onnx \
             and {data_count} .data"
        ))),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the files whose lowercase name ends with `suffix`.
fn files_with_suffix<'a>(files: &'a [PackageFile], suffix: &str) -> Vec<&'a PackageFile> {
    files.iter().filter(|file| file.name.to_lowercase().ends_with(suffix)).collect()
}

/// Best-effort check that the ONNX references its external data by name.
///
/// Searches the raw model bytes for the data file's relative name. Absence
/// is reported as a warning, never a rejection, because the check depends on
/// parsing vendor bytes we deliberately do not interpret.
fn check_external_data_reference(onnx: &PackageFile, data_name: &str) -> Option<String> {
    let needle = data_name.as_bytes();
    if needle.is_empty() || onnx.bytes.windows(needle.len()).any(|window| window == needle) {
        return None;
    }
    Some(format!(
        "onnx file {} does not appear to reference external data file {data_name}",
        onnx.name
    ))
}

// ============================================================================
// SECTION: Flat Opener
// ============================================================================

/// Archive-unaware opener: every upload is a single-file package.
///
/// Hosts with archive-aware storage substitute their own opener; this one
/// covers the bare `.onnx` upload path and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatOpener;

impl PackageOpener for FlatOpener {
    fn open(
        &self,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<PackageListing, PackageOpenError> {
        if original_filename.trim().is_empty() {
            return Err(PackageOpenError::Unreadable("missing filename".to_string()));
        }
        Ok(PackageListing {
            container_name: None,
            files: vec![PackageFile::new(original_filename, bytes.to_vec())],
        })
    }
}
