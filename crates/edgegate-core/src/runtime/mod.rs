// crates/edgegate-core/src/runtime/mod.rs
// ============================================================================
// Module: EdgeGate Runtime
// Description: Engines driving validation, gating, probing, bundling, and runs.
// Purpose: Expose the deterministic execution paths composed by hosts.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The runtime holds every engine in the orchestrator core: the package
//! validator, the gating evaluator, the probe suite, the evidence bundler,
//! the CI ingress verifier, and the run worker. All engines are synchronous
//! straight-line code; hosts parallelize across runs, never inside one.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod bundle;
pub mod comparator;
pub mod correctness;
pub mod evaluator;
pub mod extract;
pub mod ingress;
pub mod memory;
pub mod package;
pub mod probe;
pub mod worker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bundle::BundleBuilder;
pub use bundle::BundleError;
pub use bundle::BundleInputs;
pub use bundle::verify_bundle;
pub use comparator::compare_gate;
pub use correctness::score_output;
pub use evaluator::EvaluationResult;
pub use evaluator::GatingEvaluator;
pub use extract::extract_metric;
pub use extract::extract_value;
pub use ingress::CiRequest;
pub use ingress::IngressError;
pub use ingress::verify_ci_request;
pub use memory::InMemoryNonceStore;
pub use memory::InMemoryStore;
pub use memory::ManualClock;
pub use memory::MemoryAuditSink;
pub use memory::MemoryBundleSink;
pub use memory::SystemClock;
pub use package::FlatOpener;
pub use package::PackageError;
pub use package::PackageValidation;
pub use package::validate_package;
pub use probe::ProbeError;
pub use probe::ProbeOutcome;
pub use probe::ProbeSuite;
pub use probe::derive_metric_mapping;
pub use worker::CancelFlag;
pub use worker::RunWorker;
pub use worker::WorkerConfig;
pub use worker::WorkerError;
