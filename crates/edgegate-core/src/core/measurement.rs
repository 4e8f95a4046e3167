// crates/edgegate-core/src/core/measurement.rs
// ============================================================================
// Module: EdgeGate Measurement Tables
// Description: Normalized per-repeat measurement rows and correctness scores.
// Purpose: Feed the gating evaluator a flat, deterministic value table.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! During collection the worker materializes measurement rows keyed by
//! `(device, metric, repeat_index)` from backend payloads, with warmup rows
//! held in a separate table that never reaches aggregation. Correctness
//! scores and other locally computed single values enter as derived values,
//! which are exempt from dispersion checks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DeviceId;

// ============================================================================
// SECTION: Rows
// ============================================================================

/// One measured value for `(device, metric, repeat_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    /// Device the measurement ran on.
    pub device_id: DeviceId,
    /// Normalized metric name.
    pub metric: String,
    /// Zero-based measurement repeat index.
    pub repeat_index: u32,
    /// Extracted value.
    pub value: f64,
    /// Unit recorded by the metric mapping, when known.
    pub unit: Option<String>,
}

/// One per-repeat correctness score for `(device, case, repeat_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectnessRow {
    /// Device the case ran on.
    pub device_id: DeviceId,
    /// Case identifier.
    pub case_id: String,
    /// Zero-based measurement repeat index.
    pub repeat_index: u32,
    /// Score: 1.0 when the expectation held, else 0.0.
    pub score: f64,
}

/// A locally computed single value, exempt from dispersion checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedValue {
    /// Device the value belongs to.
    pub device_id: DeviceId,
    /// Normalized metric name.
    pub metric: String,
    /// The value.
    pub value: f64,
}

// ============================================================================
// SECTION: Table
// ============================================================================

/// The evaluator's input: measurement rows, warmup rows, and derived values.
///
/// # Invariants
/// - Warmup rows never reach aggregation, dispersion checks, or gating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementTable {
    /// Measurement rows in collection order.
    pub rows: Vec<MeasurementRow>,
    /// Warmup rows, kept for evidence only.
    pub warmup_rows: Vec<MeasurementRow>,
    /// Locally computed single values (correctness aggregate).
    pub derived: Vec<DerivedValue>,
}

impl MeasurementTable {
    /// Returns the measured values for `(device, metric)` ordered by repeat.
    #[must_use]
    pub fn values_for(&self, device_id: &DeviceId, metric: &str) -> Vec<f64> {
        let mut rows: Vec<&MeasurementRow> = self
            .rows
            .iter()
            .filter(|row| &row.device_id == device_id && row.metric == metric)
            .collect();
        rows.sort_by_key(|row| row.repeat_index);
        rows.iter().map(|row| row.value).collect()
    }

    /// Returns the unit recorded for `(device, metric)`, when any.
    #[must_use]
    pub fn unit_for(&self, device_id: &DeviceId, metric: &str) -> Option<String> {
        self.rows
            .iter()
            .find(|row| &row.device_id == device_id && row.metric == metric)
            .and_then(|row| row.unit.clone())
    }

    /// Returns the derived value for `(device, metric)`, when any.
    #[must_use]
    pub fn derived_for(&self, device_id: &DeviceId, metric: &str) -> Option<f64> {
        self.derived
            .iter()
            .find(|value| &value.device_id == device_id && value.metric == metric)
            .map(|value| value.value)
    }
}
