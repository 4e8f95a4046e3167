// crates/edgegate-core/src/runtime/worker.rs
// ============================================================================
// Module: EdgeGate Run Worker
// Description: The run state machine and its straight-line execution steps.
// Purpose: Drive queued runs to a signed terminal record across the backend.
// Dependencies: crate::{core, interfaces, runtime}, edgegate-crypto
// ============================================================================

//! ## Overview
//! The worker transitions a run through `queued -> preparing -> submitting ->
//! running -> collecting -> evaluating -> reporting` to a terminal state.
//! Every transition persists the run and writes an audit event before any
//! external I/O, so crash recovery resumes by re-running the idempotent next
//! step. The per-workspace lock is acquired on the `queued -> preparing`
//! edge and released at terminal states; at most one run per workspace is
//! ever non-terminal.
//!
//! All execution is straight-line synchronous code with a blocking poll
//! step; hosts parallelize across runs, never inside one.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use edgegate_crypto::EvidenceSigner;
use edgegate_crypto::MasterKeyring;
use edgegate_crypto::SealedSecret;

use crate::core::artifact::ArtifactKind;
use crate::core::audit::AuditEvent;
use crate::core::bundle::DeviceRef;
use crate::core::bundle::ModelRef;
use crate::core::bundle::PromptPackRef;
use crate::core::capabilities::CapabilitiesRecord;
use crate::core::capabilities::MetricMapping;
use crate::core::capabilities::MetricStability;
use crate::core::errors::ErrorCode;
use crate::core::errors::RunFailure;
use crate::core::hashing;
use crate::core::identifiers::ActorId;
use crate::core::identifiers::DeviceId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkspaceId;
use crate::core::measurement::CorrectnessRow;
use crate::core::measurement::DerivedValue;
use crate::core::measurement::MeasurementRow;
use crate::core::measurement::MeasurementTable;
use crate::core::pipeline::Pipeline;
use crate::core::promptpack::PromptPack;
use crate::core::run::JobKind;
use crate::core::run::RunOutcome;
use crate::core::run::RunRecord;
use crate::core::run::RunState;
use crate::core::run::SubmittedJob;
use crate::core::secret::SecretString;
use crate::interfaces::AuditSink;
use crate::interfaces::AuditSinkError;
use crate::interfaces::Backend;
use crate::interfaces::BackendConnector;
use crate::interfaces::BackendError;
use crate::interfaces::BlobStore;
use crate::interfaces::BundleStore;
use crate::interfaces::Clock;
use crate::interfaces::ControlStore;
use crate::interfaces::JobHandle;
use crate::interfaces::JobStatus;
use crate::interfaces::PackageOpener;
use crate::interfaces::StoreError;
use crate::runtime::bundle::BundleBuilder;
use crate::runtime::bundle::BundleInputs;
use crate::runtime::correctness::score_output;
use crate::runtime::evaluator::GatingEvaluator;
use crate::runtime::extract::extract_metric;
use crate::runtime::package::validate_package;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Worker polling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Poll backoff base in milliseconds.
    pub poll_base_millis: u64,
    /// Poll backoff multiplier.
    pub poll_factor: u64,
    /// Poll backoff cap in milliseconds.
    pub poll_cap_millis: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_base_millis: 2_000,
            poll_factor: 2,
            poll_cap_millis: 60_000,
        }
    }
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Explicit cancellation signal checked at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    /// Shared flag.
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Worker infrastructure failures (distinct from run-level failures, which
/// terminate the run with an error code).
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The control or blob store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The audit sink failed.
    #[error(transparent)]
    Audit(#[from] AuditSinkError),
    /// The run is in a state the worker cannot drive.
    #[error("illegal run state: {0}")]
    IllegalState(String),
}

// ============================================================================
// SECTION: Run Context
// ============================================================================

/// Hydrated inputs rebuilt from persisted records on every dispatch.
struct RunContext {
    /// Pipeline configuration.
    pipeline: Pipeline,
    /// Published promptpack.
    promptpack: PromptPack,
    /// Metric mapping in force.
    mapping: MetricMapping,
    /// Capabilities record the mapping came from.
    capabilities: CapabilitiesRecord,
    /// Decrypted backend token.
    token: SecretString,
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// The run orchestrator: composes the envelope, the content store, the
/// backend adapter, the evaluator, and the bundler behind the state machine.
pub struct RunWorker<C, S, A, K, O>
where
    C: BackendConnector,
    S: ControlStore + BlobStore + BundleStore,
    A: AuditSink,
    K: Clock,
    O: PackageOpener,
{
    /// Backend connector.
    connector: C,
    /// Combined control, blob, and bundle store.
    store: S,
    /// Audit sink.
    audit: A,
    /// Host clock.
    clock: K,
    /// Model package opener.
    opener: O,
    /// Master keyring for envelope opens.
    keyring: MasterKeyring,
    /// Active evidence signer.
    signer: EvidenceSigner,
    /// Polling configuration.
    config: WorkerConfig,
}

impl<C, S, A, K, O> RunWorker<C, S, A, K, O>
where
    C: BackendConnector,
    S: ControlStore + BlobStore + BundleStore,
    A: AuditSink,
    K: Clock,
    O: PackageOpener,
{
    /// Creates a worker over the given seams.
    #[must_use]
    pub const fn new(
        connector: C,
        store: S,
        audit: A,
        clock: K,
        opener: O,
        keyring: MasterKeyring,
        signer: EvidenceSigner,
        config: WorkerConfig,
    ) -> Self {
        Self {
            connector,
            store,
            audit,
            clock,
            opener,
            keyring,
            signer,
            config,
        }
    }

    /// Returns the composed store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the audit sink.
    #[must_use]
    pub const fn audit(&self) -> &A {
        &self.audit
    }

    /// Drives a run from its persisted state to a terminal state.
    ///
    /// A queued run that cannot take the workspace slot is returned
    /// unchanged. Terminal runs are returned as-is (idempotent).
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] only for infrastructure failures; run-level
    /// failures terminate the run with an error code instead.
    pub fn dispatch(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &RunId,
        cancel: &CancelFlag,
    ) -> Result<RunRecord, WorkerError> {
        let mut run = self.store.load_run(workspace_id, run_id)?;
        if run.state.is_terminal() {
            return Ok(run);
        }

        if run.state == RunState::Queued {
            if !self.store.try_acquire_workspace_lock(workspace_id, run_id)? {
                return Ok(run);
            }
            run.started_at = Some(self.clock.now());
            self.transition(&mut run, RunState::Preparing)?;
        }

        loop {
            if run.state.is_terminal() {
                self.store.release_workspace_lock(workspace_id, run_id)?;
                return Ok(run);
            }
            if let Some(failure) = self.interrupted(&run, cancel) {
                self.fail(&mut run, failure)?;
                continue;
            }

            let step = match run.state {
                RunState::Preparing => self.step_preparing(&mut run),
                RunState::Submitting => self.step_submitting(&mut run),
                RunState::Running => self.step_running(&mut run, cancel),
                RunState::Collecting => self.step_collecting(&mut run),
                RunState::Evaluating => self.step_evaluating(&mut run),
                RunState::Reporting => self.step_reporting(&mut run),
                other => {
                    let state = serde_json::to_string(&other).unwrap_or_default();
                    return Err(WorkerError::IllegalState(format!(
                        "run {run_id} cannot be driven from state {state}"
                    )));
                }
            };

            match step {
                Ok(()) => {}
                Err(StepFailure::Run(failure)) => self.fail(&mut run, failure)?,
                Err(StepFailure::Infra(err)) => return Err(err),
            }
        }
    }

    /// Returns the deadline/cancel failure to apply, when one is due.
    fn interrupted(&self, run: &RunRecord, cancel: &CancelFlag) -> Option<RunFailure> {
        if cancel.is_cancelled() {
            return Some(RunFailure::new(ErrorCode::Cancelled, "run cancelled by request"));
        }
        let started_at = run.started_at?;
        // The deadline needs the policy; a missing pipeline surfaces in
        // preparing instead, so absence here just skips the check.
        let pipeline = self.store.load_pipeline(&run.workspace_id, &run.pipeline_id).ok()?;
        let deadline = started_at.plus_millis(pipeline.run_policy.timeout_millis());
        (self.clock.now() > deadline).then(|| {
            RunFailure::new(
                ErrorCode::Timeout,
                format!("run exceeded {} minute deadline", pipeline.run_policy.timeout_minutes),
            )
        })
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    /// Preparing: validate packaging, hydrate dependencies, materialize the
    /// job spec, decrypt the token.
    fn step_preparing(&self, run: &mut RunRecord) -> Result<(), StepFailure> {
        let ctx = self.hydrate(run)?;

        let model = self.store.stat(&run.workspace_id, &run.model_artifact_id)?;
        let model_bytes = self.store.get(&run.workspace_id, &run.model_artifact_id)?;
        let listing = self
            .opener
            .open(&model.original_filename, &model_bytes)
            .map_err(|err| RunFailure::new(ErrorCode::InvalidModelPackage, err.to_string()))?;
        let validation = validate_package(listing.container_name.as_deref(), &listing.files)
            .map_err(|err| RunFailure::new(ErrorCode::InvalidModelPackage, err.to_string()))?;

        let job_spec = json!({
            "pipeline": ctx.pipeline,
            "promptpack_sha256": ctx.promptpack.sha256,
            "model_sha256": model.sha256,
            "model_package_kind": validation.kind,
            "package_warnings": validation.warnings,
            "devices": ctx.pipeline.device_matrix,
            "run_policy": ctx.pipeline.run_policy,
            "metric_mapping": ctx.mapping,
        });
        let job_spec_bytes = hashing::canonical_json_bytes(&job_spec)
            .map_err(|err| RunFailure::new(ErrorCode::BundleFailed, err.to_string()))?;
        let record = self.store.put(
            &run.workspace_id,
            ArtifactKind::JobSpec,
            &job_spec_bytes,
            "job_spec.json",
            self.clock.now(),
        )?;
        run.job_spec_artifact_id = Some(record.artifact_id);

        self.transition(run, RunState::Submitting)?;
        Ok(())
    }

    /// Submitting: upload the model and submit compile/profile/inference
    /// jobs per device; each submit retried once on transport failure.
    fn step_submitting(&self, run: &mut RunRecord) -> Result<(), StepFailure> {
        let ctx = self.hydrate(run)?;
        let session = self.connect(&ctx)?;

        let model = self.store.stat(&run.workspace_id, &run.model_artifact_id)?;
        let model_bytes = self.store.get(&run.workspace_id, &run.model_artifact_id)?;
        let listing = self
            .opener
            .open(&model.original_filename, &model_bytes)
            .map_err(|err| RunFailure::new(ErrorCode::InvalidModelPackage, err.to_string()))?;
        let validation = validate_package(listing.container_name.as_deref(), &listing.files)
            .map_err(|err| RunFailure::new(ErrorCode::InvalidModelPackage, err.to_string()))?;

        let handle = retry_once(|| {
            session.upload_model(&model_bytes, validation.kind, &model.original_filename)
        })
        .map_err(classify_submit_failure)?;

        // Re-dispatch after a crash resubmits everything; stale handles from
        // the interrupted attempt are abandoned.
        run.submitted_jobs.clear();
        let needs_outputs = ctx.promptpack.cases.iter().any(|case| case.expectation.scores());
        let policy = &ctx.pipeline.run_policy;
        let iterations = policy.warmup_runs + policy.measurement_repeats;

        for device in &ctx.pipeline.device_matrix {
            let compile = retry_once(|| {
                session.submit_compile(
                    &handle,
                    &device.device_id,
                    crate::interfaces::TargetRuntime::QnnDlc,
                    &json!({}),
                )
            })
            .map_err(classify_submit_failure)?;
            run.submitted_jobs.push(SubmittedJob {
                device_id: device.device_id.clone(),
                kind: JobKind::Compile,
                iteration: 0,
                job_handle: compile.0.clone(),
            });

            for iteration in 0..iterations {
                let profile = retry_once(|| {
                    session.submit_profile(&compile, &device.device_id, &json!({
                        "iteration": iteration,
                    }))
                })
                .map_err(classify_submit_failure)?;
                run.submitted_jobs.push(SubmittedJob {
                    device_id: device.device_id.clone(),
                    kind: JobKind::Profile,
                    iteration,
                    job_handle: profile.0,
                });

                if needs_outputs {
                    let inference = retry_once(|| {
                        session.submit_inference(&compile, &device.device_id, &json!({
                            "cases": ctx.promptpack.cases.iter().map(|case| json!({
                                "case_id": case.case_id,
                                "prompt": case.prompt,
                            })).collect::<Vec<Value>>(),
                            "max_new_tokens": policy.max_new_tokens,
                            "iteration": iteration,
                        }))
                    })
                    .map_err(classify_submit_failure)?;
                    run.submitted_jobs.push(SubmittedJob {
                        device_id: device.device_id.clone(),
                        kind: JobKind::Inference,
                        iteration,
                        job_handle: inference.0,
                    });
                }
            }
        }

        self.transition(run, RunState::Running)?;
        Ok(())
    }

    /// Running: poll outstanding jobs with exponential backoff under the
    /// run deadline.
    fn step_running(&self, run: &mut RunRecord, cancel: &CancelFlag) -> Result<(), StepFailure> {
        let ctx = self.hydrate(run)?;
        let session = self.connect(&ctx)?;

        let deadline = run
            .started_at
            .unwrap_or(run.created_at)
            .plus_millis(ctx.pipeline.run_policy.timeout_millis());
        let mut backoff = self.config.poll_base_millis;
        let mut outstanding: Vec<JobHandle> =
            run.submitted_jobs.iter().map(|job| JobHandle(job.job_handle.clone())).collect();

        while !outstanding.is_empty() {
            if cancel.is_cancelled() {
                return Err(RunFailure::new(ErrorCode::Cancelled, "run cancelled by request")
                    .into());
            }
            if self.clock.now() > deadline {
                return Err(RunFailure::new(
                    ErrorCode::Timeout,
                    format!(
                        "run exceeded {} minute deadline",
                        ctx.pipeline.run_policy.timeout_minutes
                    ),
                )
                .into());
            }

            let mut still_outstanding = Vec::new();
            for job in outstanding {
                match session.poll(&job) {
                    Ok(JobStatus::Success) => {}
                    Ok(JobStatus::Failed {
                        reason,
                    }) => {
                        return Err(RunFailure::new(ErrorCode::BackendJobFailed, reason).into());
                    }
                    Ok(JobStatus::Pending | JobStatus::Running) => still_outstanding.push(job),
                    Err(BackendError::TokenRejected(detail)) => {
                        return Err(RunFailure::new(ErrorCode::TokenInvalid, detail).into());
                    }
                    // Transient poll failures retry on the next sweep.
                    Err(_) => still_outstanding.push(job),
                }
            }
            outstanding = still_outstanding;

            if !outstanding.is_empty() {
                self.clock.sleep_millis(backoff);
                backoff = (backoff * self.config.poll_factor).min(self.config.poll_cap_millis);
            }
        }

        self.transition(run, RunState::Collecting)?;
        Ok(())
    }

    /// Collecting: fetch payloads, store raw evidence, materialize the
    /// measurement table through the metric mapping.
    fn step_collecting(&self, run: &mut RunRecord) -> Result<(), StepFailure> {
        let ctx = self.hydrate(run)?;
        let session = self.connect(&ctx)?;

        let warmup_runs = ctx.pipeline.run_policy.warmup_runs;
        let mut table = MeasurementTable::default();
        let mut correctness: Vec<CorrectnessRow> = Vec::new();
        run.raw_payload_artifacts.clear();

        for job in &run.submitted_jobs {
            if job.kind == JobKind::Compile {
                continue;
            }
            let handle = JobHandle(job.job_handle.clone());
            let bytes = session
                .fetch_payload(&handle)
                .map_err(|err| RunFailure::new(ErrorCode::BackendJobFailed, err.to_string()))?;
            let record = self.store.put(
                &run.workspace_id,
                ArtifactKind::RunRaw,
                &bytes,
                &payload_filename(job),
                self.clock.now(),
            )?;
            // Identical payload bytes dedup to one artifact; keep the list
            // free of repeats so the bundle stages each blob once.
            if !run.raw_payload_artifacts.contains(&record.artifact_id) {
                run.raw_payload_artifacts.push(record.artifact_id);
            }

            let payload: Value = match serde_json::from_slice(&bytes) {
                Ok(payload) => payload,
                Err(err) => {
                    return Err(RunFailure::new(
                        ErrorCode::BackendJobFailed,
                        format!("unparseable payload for job {}: {err}", job.job_handle),
                    )
                    .into());
                }
            };

            match job.kind {
                JobKind::Profile => collect_profile_rows(
                    &mut table,
                    &ctx.mapping,
                    &payload,
                    job,
                    warmup_runs,
                ),
                JobKind::Inference => {
                    if job.iteration >= warmup_runs {
                        collect_correctness_rows(
                            &mut correctness,
                            &ctx.promptpack,
                            &payload,
                            job,
                            warmup_runs,
                        );
                    }
                }
                JobKind::Compile => {}
            }
        }

        derive_correctness(&mut table, &correctness, &ctx.pipeline.device_matrix);

        let table_bytes = hashing::canonical_json_bytes(&table)
            .map_err(|err| RunFailure::new(ErrorCode::BundleFailed, err.to_string()))?;
        let record = self.store.put(
            &run.workspace_id,
            ArtifactKind::Measurements,
            &table_bytes,
            "measurements.json",
            self.clock.now(),
        )?;
        run.measurement_table_artifact_id = Some(record.artifact_id);

        self.transition(run, RunState::Evaluating)?;
        Ok(())
    }

    /// Evaluating: run the gating evaluator and persist its verdict.
    fn step_evaluating(&self, run: &mut RunRecord) -> Result<(), StepFailure> {
        let ctx = self.hydrate(run)?;
        let table = self.load_measurements(run)?;

        let devices: Vec<DeviceId> =
            ctx.pipeline.device_matrix.iter().map(|device| device.device_id.clone()).collect();
        let evaluator = GatingEvaluator::new(&ctx.mapping);
        let result = evaluator.evaluate(&table, &ctx.pipeline.gates, &devices);

        run.outcome = Some(result.outcome);
        run.normalized_metrics = Some(result.metrics);
        run.gates_eval = Some(result.gates);

        self.transition(run, RunState::Reporting)?;
        Ok(())
    }

    /// Reporting: build and sign the bundle, then write the terminal state
    /// decided by the evaluator.
    fn step_reporting(&self, run: &mut RunRecord) -> Result<(), StepFailure> {
        let ctx = self.hydrate(run)?;
        let outcome = run.outcome.clone().ok_or_else(|| {
            StepFailure::Infra(WorkerError::IllegalState(
                "reporting entered without an evaluator outcome".to_string(),
            ))
        })?;

        let model = self.store.stat(&run.workspace_id, &run.model_artifact_id)?;
        let mapping_json =
            self.store.get(&run.workspace_id, &ctx.capabilities.metric_mapping_blob_id)?;
        let capabilities_json =
            self.store.get(&run.workspace_id, &ctx.capabilities.capabilities_blob_id)?;

        let mut raw_payloads = Vec::with_capacity(run.raw_payload_artifacts.len());
        for artifact_id in &run.raw_payload_artifacts {
            let record = self.store.stat(&run.workspace_id, artifact_id)?;
            let bytes = self.store.get(&run.workspace_id, artifact_id)?;
            raw_payloads.push((record.original_filename, bytes));
        }

        let inputs = BundleInputs {
            workspace_id: run.workspace_id.clone(),
            pipeline_id: run.pipeline_id.clone(),
            run_id: run.run_id.clone(),
            created_at: self.clock.now(),
            model: ModelRef {
                artifact_id: run.model_artifact_id.clone(),
                sha256: model.sha256,
            },
            promptpack: PromptPackRef {
                promptpack_id: ctx.promptpack.logical_id.clone(),
                version: ctx.promptpack.version.clone(),
                sha256: ctx.promptpack.sha256.clone(),
            },
            devices: ctx
                .pipeline
                .device_matrix
                .iter()
                .map(|device| DeviceRef {
                    device_id: device.device_id.clone(),
                    device_name: device.device_name.clone(),
                })
                .collect(),
            capabilities_ref: ctx.capabilities.capabilities_blob_id.clone(),
            metric_mapping_ref: ctx.capabilities.metric_mapping_blob_id.clone(),
            outcome: outcome.clone(),
            normalized_metrics: run.normalized_metrics.clone().unwrap_or_default(),
            gates_evaluation: run.gates_eval.clone().unwrap_or_default(),
            raw_payloads,
            mapping_json,
            capabilities_json,
        };

        let builder = BundleBuilder::new(&self.signer);
        let mut sink = self.store.open_bundle(&run.workspace_id, &run.run_id)?;
        builder
            .build(&mut sink, &inputs)
            .map_err(|err| RunFailure::new(ErrorCode::BundleFailed, err.to_string()))?;
        let bundle = self.store.seal_bundle(sink, &run.workspace_id, &run.run_id, self.clock.now())?;
        run.bundle_artifact_id = Some(bundle.artifact_id);

        match outcome {
            RunOutcome::Passed => self.transition(run, RunState::Passed)?,
            RunOutcome::Failed => self.transition(run, RunState::Failed)?,
            RunOutcome::Error {
                code,
                detail,
            } => {
                return Err(RunFailure::new(code, detail).into());
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Hydrates pipeline, promptpack, mapping, and token from stored records.
    fn hydrate(&self, run: &RunRecord) -> Result<RunContext, StepFailure> {
        let pipeline = match self.store.load_pipeline(&run.workspace_id, &run.pipeline_id) {
            Ok(pipeline) => pipeline,
            Err(StoreError::NotFound) => {
                return Err(RunFailure::new(ErrorCode::NotFound, "pipeline not found").into());
            }
            Err(err) => return Err(StepFailure::Infra(err.into())),
        };
        pipeline
            .validate()
            .map_err(|err| RunFailure::new(ErrorCode::LimitExceeded, err.to_string()))?;

        let promptpack = match self.store.load_promptpack(
            &run.workspace_id,
            &pipeline.promptpack_ref.logical_id,
            &pipeline.promptpack_ref.version,
        ) {
            Ok(promptpack) => promptpack,
            Err(StoreError::NotFound) => {
                return Err(RunFailure::new(
                    ErrorCode::DependencyNotPublished,
                    format!(
                        "promptpack {}@{} not found",
                        pipeline.promptpack_ref.logical_id, pipeline.promptpack_ref.version
                    ),
                )
                .into());
            }
            Err(err) => return Err(StepFailure::Infra(err.into())),
        };
        if !promptpack.published {
            return Err(RunFailure::new(
                ErrorCode::DependencyNotPublished,
                format!(
                    "promptpack {}@{} is not published",
                    promptpack.logical_id, promptpack.version
                ),
            )
            .into());
        }

        let capabilities = match self.store.load_capabilities_record(&run.workspace_id) {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                return Err(RunFailure::new(
                    ErrorCode::MissingRequiredMetric,
                    "workspace has no probed metric mapping",
                )
                .into());
            }
            Err(err) => return Err(StepFailure::Infra(err.into())),
        };
        let mapping_bytes =
            self.store.get(&run.workspace_id, &capabilities.metric_mapping_blob_id)?;
        let mapping: MetricMapping = serde_json::from_slice(&mapping_bytes).map_err(|err| {
            StepFailure::Infra(WorkerError::Store(StoreError::Invalid(format!(
                "metric mapping blob unparseable: {err}"
            ))))
        })?;

        let integration = match self.store.load_integration(&run.workspace_id) {
            Ok(integration) => integration,
            Err(StoreError::NotFound) => {
                return Err(RunFailure::new(
                    ErrorCode::NoIntegration,
                    "workspace has no active backend integration",
                )
                .into());
            }
            Err(err) => return Err(StepFailure::Infra(err.into())),
        };
        let sealed: SealedSecret =
            serde_json::from_value(integration.sealed_token).map_err(|err| {
                StepFailure::Infra(WorkerError::Store(StoreError::Invalid(format!(
                    "sealed token unparseable: {err}"
                ))))
            })?;
        let token_bytes = self
            .keyring
            .open(&sealed)
            .map_err(|err| RunFailure::new(ErrorCode::TokenInvalid, err.to_string()))?;
        let token = SecretString::new(String::from_utf8_lossy(&token_bytes).into_owned());

        Ok(RunContext {
            pipeline,
            promptpack,
            mapping,
            capabilities,
            token,
        })
    }

    /// Connects an authenticated backend session.
    fn connect(&self, ctx: &RunContext) -> Result<C::Session, StepFailure> {
        match self.connector.connect(&ctx.token) {
            Ok(session) => Ok(session),
            Err(BackendError::TokenRejected(detail)) => {
                Err(RunFailure::new(ErrorCode::TokenInvalid, detail).into())
            }
            Err(err) => Err(RunFailure::new(ErrorCode::SubmitFailed, err.to_string()).into()),
        }
    }

    /// Loads the persisted measurement table.
    fn load_measurements(&self, run: &RunRecord) -> Result<MeasurementTable, StepFailure> {
        let Some(artifact_id) = &run.measurement_table_artifact_id else {
            return Err(StepFailure::Infra(WorkerError::IllegalState(
                "evaluating entered without a measurement table".to_string(),
            )));
        };
        let bytes = self.store.get(&run.workspace_id, artifact_id)?;
        serde_json::from_slice(&bytes).map_err(|err| {
            StepFailure::Infra(WorkerError::Store(StoreError::Invalid(format!(
                "measurement table blob unparseable: {err}"
            ))))
        })
    }

    /// Persists a state transition and writes its audit event.
    fn transition(&self, run: &mut RunRecord, next: RunState) -> Result<(), WorkerError> {
        let from = run.state;
        run.state = next;
        run.updated_at = self.clock.now();
        self.store.save_run(run)?;
        self.audit.record(AuditEvent::new(
            run.workspace_id.clone(),
            ActorId::new("system"),
            "run_state_changed",
            json!({
                "run_id": run.run_id,
                "from": from,
                "to": next,
            }),
            run.updated_at,
        ))?;
        Ok(())
    }

    /// Terminates a run with an error code, retaining partial artifacts.
    fn fail(&self, run: &mut RunRecord, failure: RunFailure) -> Result<(), WorkerError> {
        run.error_code = Some(failure.code);
        run.error_detail = Some(failure.detail.clone());
        run.state = RunState::Error;
        run.updated_at = self.clock.now();
        self.store.save_run(run)?;
        self.audit.record(AuditEvent::new(
            run.workspace_id.clone(),
            ActorId::new("system"),
            "run_errored",
            json!({
                "run_id": run.run_id,
                "code": failure.code,
                "detail": failure.detail,
            }),
            run.updated_at,
        ))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Step Failure
// ============================================================================

/// Internal step result: run-level failure or infrastructure failure.
enum StepFailure {
    /// Terminates the run with an error code.
    Run(RunFailure),
    /// Aborts the dispatch; the run stays in its persisted state.
    Infra(WorkerError),
}

impl From<RunFailure> for StepFailure {
    fn from(failure: RunFailure) -> Self {
        Self::Run(failure)
    }
}

impl From<StoreError> for StepFailure {
    fn from(err: StoreError) -> Self {
        Self::Infra(WorkerError::Store(err))
    }
}

impl From<WorkerError> for StepFailure {
    fn from(err: WorkerError) -> Self {
        Self::Infra(err)
    }
}

// ============================================================================
// SECTION: Submission Helpers
// ============================================================================

/// Calls a submit closure, retrying once on transport failure.
fn retry_once<T>(
    mut submit: impl FnMut() -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    match submit() {
        Ok(value) => Ok(value),
        Err(BackendError::Transport(_)) => submit(),
        Err(err) => Err(err),
    }
}

/// Maps a submit failure to its run error code.
fn classify_submit_failure(err: BackendError) -> StepFailure {
    match err {
        BackendError::TokenRejected(detail) => {
            StepFailure::Run(RunFailure::new(ErrorCode::TokenInvalid, detail))
        }
        other => StepFailure::Run(RunFailure::new(ErrorCode::SubmitFailed, other.to_string())),
    }
}

/// Builds the stored filename for a job payload.
fn payload_filename(job: &SubmittedJob) -> String {
    let kind = match job.kind {
        JobKind::Compile => "compile",
        JobKind::Profile => "profile",
        JobKind::Inference => "inference",
    };
    format!("{}-{kind}-i{}.json", job.device_id, job.iteration)
}

// ============================================================================
// SECTION: Collection Helpers
// ============================================================================

/// Extracts mapped metrics from one profile payload into the table.
fn collect_profile_rows(
    table: &mut MeasurementTable,
    mapping: &MetricMapping,
    payload: &Value,
    job: &SubmittedJob,
    warmup_runs: u32,
) {
    for (metric, path) in &mapping.metrics {
        if path.stability == MetricStability::Unavailable {
            continue;
        }
        let Some(json_path) = &path.json_path else {
            continue;
        };
        let Some(value) = extract_metric(payload, json_path) else {
            continue;
        };
        let row = MeasurementRow {
            device_id: job.device_id.clone(),
            metric: metric.clone(),
            repeat_index: job.iteration.saturating_sub(warmup_runs),
            value,
            unit: path.unit.clone(),
        };
        if job.iteration < warmup_runs {
            table.warmup_rows.push(row);
        } else {
            table.rows.push(row);
        }
    }
}

/// Scores one inference payload's outputs into correctness rows.
fn collect_correctness_rows(
    rows: &mut Vec<CorrectnessRow>,
    promptpack: &PromptPack,
    payload: &Value,
    job: &SubmittedJob,
    warmup_runs: u32,
) {
    let outputs = payload.get("outputs").and_then(Value::as_array);
    for case in &promptpack.cases {
        let text = outputs
            .and_then(|outputs| {
                outputs.iter().find(|output| {
                    output.get("case_id").and_then(Value::as_str) == Some(case.case_id.as_str())
                })
            })
            .and_then(|output| output.get("text").and_then(Value::as_str))
            .unwrap_or("");
        let Some(score) = score_output(&case.expectation, text) else {
            continue;
        };
        rows.push(CorrectnessRow {
            device_id: job.device_id.clone(),
            case_id: case.case_id.clone(),
            repeat_index: job.iteration.saturating_sub(warmup_runs),
            score,
        });
    }
}

/// Aggregates correctness: per-case median over repeats, mean over cases.
fn derive_correctness(
    table: &mut MeasurementTable,
    rows: &[CorrectnessRow],
    devices: &[crate::core::pipeline::MatrixDevice],
) {
    for device in devices {
        let mut case_scores: Vec<f64> = Vec::new();
        let mut case_ids: Vec<&str> = rows
            .iter()
            .filter(|row| row.device_id == device.device_id)
            .map(|row| row.case_id.as_str())
            .collect();
        case_ids.sort_unstable();
        case_ids.dedup();

        for case_id in case_ids {
            let mut repeats: Vec<f64> = rows
                .iter()
                .filter(|row| row.device_id == device.device_id && row.case_id == case_id)
                .map(|row| row.score)
                .collect();
            repeats.sort_by(f64::total_cmp);
            if repeats.is_empty() {
                continue;
            }
            let mid = repeats.len() / 2;
            let median = if repeats.len().is_multiple_of(2) {
                f64::midpoint(repeats[mid - 1], repeats[mid])
            } else {
                repeats[mid]
            };
            case_scores.push(median);
        }

        if !case_scores.is_empty() {
            let mean = case_scores.iter().sum::<f64>() / case_scores.len() as f64;
            table.derived.push(DerivedValue {
                device_id: device.device_id.clone(),
                metric: "correctness".to_string(),
                value: mean,
            });
        }
    }
}
