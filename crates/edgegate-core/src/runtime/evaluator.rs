// crates/edgegate-core/src/runtime/evaluator.rs
// ============================================================================
// Module: EdgeGate Gating Evaluator
// Description: Median aggregation, flake detection, and ordered gate walk.
// Purpose: Decide pass/fail/error deterministically from a measurement table.
// Dependencies: crate::{core, runtime::comparator}
// ============================================================================

//! ## Overview
//! The evaluator consumes a measurement table whose warmup rows were already
//! excluded at materialization, aggregates each `(device, metric)` pair to
//! the median of its repeats, flags flaky metrics by coefficient of
//! variation, and walks the gates in declared order against devices in
//! matrix order. Missing or flaky metrics skip optional gates and terminate
//! the run for required ones. Exactly equal values satisfy the inclusive
//! operators.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::capabilities::MetricMapping;
use crate::core::capabilities::MetricStability;
use crate::core::errors::ErrorCode;
use crate::core::identifiers::DeviceId;
use crate::core::measurement::MeasurementTable;
use crate::core::pipeline::GateSpec;
use crate::core::run::GateEvaluation;
use crate::core::run::GateStatus;
use crate::core::run::NormalizedMetric;
use crate::core::run::RunOutcome;
use crate::runtime::comparator::compare_gate;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// CV threshold above which throughput-family metrics are flaky.
const THROUGHPUT_CV_LIMIT: f64 = 0.15;
/// CV threshold above which latency-family metrics are flaky.
const LATENCY_CV_LIMIT: f64 = 0.20;

// ============================================================================
// SECTION: Result
// ============================================================================

/// Full evaluator output embedded into the run record and bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Terminal outcome.
    pub outcome: RunOutcome,
    /// Gate decisions in evaluation order.
    pub gates: Vec<GateEvaluation>,
    /// Aggregated metrics for every `(device, metric)` pair observed.
    pub metrics: Vec<NormalizedMetric>,
}

// ============================================================================
// SECTION: Evaluator
// ============================================================================

/// Deterministic gating evaluator.
pub struct GatingEvaluator<'a> {
    /// Metric mapping in force for the workspace.
    mapping: &'a MetricMapping,
}

impl<'a> GatingEvaluator<'a> {
    /// Creates an evaluator over the workspace's metric mapping.
    #[must_use]
    pub const fn new(mapping: &'a MetricMapping) -> Self {
        Self {
            mapping,
        }
    }

    /// Evaluates gates against the measurement table.
    ///
    /// `devices` must be the pipeline's device matrix in declared order;
    /// both gate order and device order are part of the contract.
    #[must_use]
    pub fn evaluate(
        &self,
        table: &MeasurementTable,
        gates: &[GateSpec],
        devices: &[DeviceId],
    ) -> EvaluationResult {
        let metrics = self.aggregate(table, devices);
        let mut evaluations = Vec::new();
        let mut error: Option<(ErrorCode, String)> = None;

        'walk: for gate in gates {
            for device_id in devices {
                let evaluation = self.evaluate_gate(table, &metrics, gate, device_id);
                let terminal = terminal_error(gate, &evaluation);
                evaluations.push(evaluation);
                if let Some(failure) = terminal {
                    error = Some(failure);
                    break 'walk;
                }
            }
        }

        let outcome = match error {
            Some((code, detail)) => RunOutcome::Error {
                code,
                detail,
            },
            None => {
                let any_required_fail = evaluations
                    .iter()
                    .any(|eval| eval.required && eval.status == GateStatus::Fail);
                if any_required_fail { RunOutcome::Failed } else { RunOutcome::Passed }
            }
        };

        EvaluationResult {
            outcome,
            gates: evaluations,
            metrics,
        }
    }

    /// Aggregates every observed `(device, metric)` pair.
    fn aggregate(&self, table: &MeasurementTable, devices: &[DeviceId]) -> Vec<NormalizedMetric> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for row in &table.rows {
            names.insert(row.metric.clone());
        }

        let mut out = Vec::new();
        for device_id in devices {
            for name in &names {
                let values = table.values_for(device_id, name);
                if values.is_empty() {
                    continue;
                }
                let median = median(&values);
                let cv = coefficient_of_variation(&values);
                let flaky = cv.is_some_and(|cv| cv > cv_limit(name));
                out.push(NormalizedMetric {
                    device_id: device_id.clone(),
                    metric: name.clone(),
                    median,
                    unit: table
                        .unit_for(device_id, name)
                        .or_else(|| self.mapping.metric(name).unit),
                    cv,
                    flaky,
                    repeats: values.len(),
                });
            }
            for derived in &table.derived {
                if &derived.device_id != device_id {
                    continue;
                }
                out.push(NormalizedMetric {
                    device_id: device_id.clone(),
                    metric: derived.metric.clone(),
                    median: derived.value,
                    unit: None,
                    cv: None,
                    flaky: false,
                    repeats: 1,
                });
            }
        }
        out
    }

    /// Evaluates one gate on one device.
    fn evaluate_gate(
        &self,
        table: &MeasurementTable,
        metrics: &[NormalizedMetric],
        gate: &GateSpec,
        device_id: &DeviceId,
    ) -> GateEvaluation {
        let mut evaluation = GateEvaluation {
            metric: gate.metric.clone(),
            device_id: device_id.clone(),
            op: gate.op,
            threshold: gate.threshold.clone(),
            required: gate.required,
            status: GateStatus::Skipped,
            observed: None,
            reason: None,
        };

        // Locally derived values (correctness) bypass the mapping check.
        let derived = table.derived_for(device_id, &gate.metric);
        let aggregated = metrics
            .iter()
            .find(|metric| &metric.device_id == device_id && metric.metric == gate.metric);

        let (observed, flaky) = if let Some(value) = derived {
            (Some(value), false)
        } else {
            let stability = self.mapping.metric(&gate.metric).stability;
            if stability == MetricStability::Unavailable {
                evaluation.reason = Some(format!("metric {} has no stable mapping", gate.metric));
                return evaluation;
            }
            match aggregated {
                Some(metric) => (Some(metric.median), metric.flaky),
                None => (None, false),
            }
        };

        let Some(observed) = observed else {
            evaluation.reason = Some(format!("metric {} has no value", gate.metric));
            return evaluation;
        };
        evaluation.observed = Some(observed);

        if flaky {
            evaluation.reason =
                Some(format!("metric {} is flaky on device {device_id}", gate.metric));
            return evaluation;
        }

        match compare_gate(observed, gate.op, &gate.threshold) {
            Some(true) => evaluation.status = GateStatus::Pass,
            Some(false) => evaluation.status = GateStatus::Fail,
            None => {
                evaluation.observed = None;
                evaluation.reason = Some(format!("metric {} has no value", gate.metric));
            }
        }
        evaluation
    }
}

/// Classifies a skipped required gate into its terminating error.
fn terminal_error(gate: &GateSpec, evaluation: &GateEvaluation) -> Option<(ErrorCode, String)> {
    if !gate.required || evaluation.status != GateStatus::Skipped {
        return None;
    }
    let detail = evaluation
        .reason
        .clone()
        .unwrap_or_else(|| format!("required gate on {} skipped", gate.metric));
    if evaluation.observed.is_some() {
        return Some((ErrorCode::FlakyMetric, detail));
    }
    Some((ErrorCode::MissingRequiredMetric, detail))
}

// ============================================================================
// SECTION: Statistics
// ============================================================================

/// Median of a non-empty value list; even counts average the middle pair.
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len().is_multiple_of(2) {
        f64::midpoint(sorted[mid - 1], sorted[mid])
    } else {
        sorted[mid]
    }
}

/// Sample coefficient of variation; undefined for fewer than two repeats or
/// a zero mean.
fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return None;
    }
    let variance = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() / mean.abs())
}

/// Returns the CV limit for a metric by family.
///
/// Throughput family: `tokens_per_sec`, any `*_per_sec`, and `tps`.
/// Everything else, including `ttft_ms` and `inference_time_ms`, inherits
/// the latency rule.
fn cv_limit(metric: &str) -> f64 {
    if metric == "tokens_per_sec" || metric == "tps" || metric.ends_with("_per_sec") {
        THROUGHPUT_CV_LIMIT
    } else {
        LATENCY_CV_LIMIT
    }
}
