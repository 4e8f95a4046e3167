// crates/edgegate-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Support
// Description: Scriptable mock backend and record builders for core tests.
// ============================================================================
//! ## Overview
//! Provides a deterministic mock compute hub plus builders for pipelines,
//! promptpacks, mappings, and sealed integrations used across the suite.

#![allow(
    dead_code,
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only support code shared across integration suites."
)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use edgegate_core::ArtifactKind;
use edgegate_core::Backend;
use edgegate_core::BackendConnector;
use edgegate_core::BackendError;
use edgegate_core::BackendIdentity;
use edgegate_core::BlobStore;
use edgegate_core::CapabilitiesRecord;
use edgegate_core::ControlStore;
use edgegate_core::Device;
use edgegate_core::DeviceId;
use edgegate_core::Expectation;
use edgegate_core::GateOp;
use edgegate_core::GateSpec;
use edgegate_core::InMemoryStore;
use edgegate_core::Integration;
use edgegate_core::IntegrationStatus;
use edgegate_core::JobHandle;
use edgegate_core::JobStatus;
use edgegate_core::MatrixDevice;
use edgegate_core::MetricMapping;
use edgegate_core::MetricPath;
use edgegate_core::MetricStability;
use edgegate_core::Pipeline;
use edgegate_core::PipelineId;
use edgegate_core::PromptCase;
use edgegate_core::PromptPack;
use edgegate_core::PromptPackId;
use edgegate_core::PromptPackVersionRef;
use edgegate_core::RemoteModelHandle;
use edgegate_core::RunId;
use edgegate_core::RunPolicy;
use edgegate_core::SecretString;
use edgegate_core::Timestamp;
use edgegate_core::WorkspaceId;
use edgegate_crypto::MasterKeyring;
use serde_json::Number;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Mock Backend
// ============================================================================

/// Scripted behavior for the mock hub.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Whether the token validates.
    pub token_ok: bool,
    /// Devices returned by the device list.
    pub devices: Vec<Device>,
    /// Profile payloads by iteration index (shared across devices).
    pub profile_payloads: Vec<Value>,
    /// Inference output text by case id (shared across iterations).
    pub inference_outputs: BTreeMap<String, String>,
    /// Pending polls each job answers before turning terminal.
    pub pending_polls: u32,
    /// Terminal failure reason applied to every job, when set.
    pub fail_jobs: Option<String>,
    /// Transport failures injected before each submit succeeds.
    pub submit_transport_failures: u32,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            token_ok: true,
            devices: vec![device("sm8650", "Snapdragon 8 Gen 3")],
            profile_payloads: Vec::new(),
            inference_outputs: BTreeMap::new(),
            pending_polls: 0,
            fail_jobs: None,
            submit_transport_failures: 0,
        }
    }
}

/// Returns a device record.
pub fn device(id: &str, name: &str) -> Device {
    Device {
        device_id: DeviceId::new(id),
        device_name: name.to_string(),
        chipset: Some("qualcomm".to_string()),
    }
}

/// Deterministic mock compute hub.
pub struct MockBackend {
    /// Scripted behavior.
    behavior: MockBehavior,
    /// Remaining pending polls per job handle.
    polls: Mutex<BTreeMap<String, u32>>,
    /// Remaining transport failures before submits succeed.
    transport_failures: Mutex<u32>,
    /// Submit counter used to mint job handles.
    submits: Mutex<u32>,
}

impl MockBackend {
    /// Creates a mock hub with the given behavior.
    pub fn new(behavior: MockBehavior) -> Self {
        let transport_failures = behavior.submit_transport_failures;
        Self {
            behavior,
            polls: Mutex::new(BTreeMap::new()),
            transport_failures: Mutex::new(transport_failures),
            submits: Mutex::new(0),
        }
    }

    /// Mints a job handle encoding kind, device, and iteration.
    fn mint(&self, kind: &str, device_id: &DeviceId, iteration: u64) -> JobHandle {
        let mut submits = self.submits.lock().unwrap();
        *submits += 1;
        let handle = format!("{kind}@{device_id}@{iteration}@{}", *submits);
        self.polls.lock().unwrap().insert(handle.clone(), self.behavior.pending_polls);
        JobHandle(handle)
    }

    /// Consumes one injected transport failure, when any remain.
    fn take_transport_failure(&self) -> bool {
        let mut remaining = self.transport_failures.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return true;
        }
        false
    }

    /// Parses the iteration index out of a minted handle.
    fn iteration_of(handle: &JobHandle) -> usize {
        handle.as_str().split('@').nth(2).and_then(|index| index.parse::<usize>().ok()).unwrap_or(0)
    }
}

impl Backend for MockBackend {
    fn identity(&self) -> Result<BackendIdentity, BackendError> {
        if self.behavior.token_ok {
            Ok(BackendIdentity {
                account: "mock-org".to_string(),
            })
        } else {
            Err(BackendError::TokenRejected("mock token rejected".to_string()))
        }
    }

    fn list_devices(&self) -> Result<Vec<Device>, BackendError> {
        Ok(self.behavior.devices.clone())
    }

    fn upload_model(
        &self,
        _bytes: &[u8],
        _kind: edgegate_core::PackageKind,
        name: &str,
    ) -> Result<RemoteModelHandle, BackendError> {
        if !self.behavior.token_ok {
            return Err(BackendError::TokenRejected("mock token rejected".to_string()));
        }
        if self.take_transport_failure() {
            return Err(BackendError::Transport("mock upload transport failure".to_string()));
        }
        Ok(RemoteModelHandle(format!("model-{name}")))
    }

    fn submit_compile(
        &self,
        _model: &RemoteModelHandle,
        device: &DeviceId,
        _target: edgegate_core::TargetRuntime,
        _options: &Value,
    ) -> Result<JobHandle, BackendError> {
        if self.take_transport_failure() {
            return Err(BackendError::Transport("mock compile transport failure".to_string()));
        }
        Ok(self.mint("compile", device, 0))
    }

    fn submit_profile(
        &self,
        _compiled: &JobHandle,
        device: &DeviceId,
        options: &Value,
    ) -> Result<JobHandle, BackendError> {
        if self.take_transport_failure() {
            return Err(BackendError::Transport("mock profile transport failure".to_string()));
        }
        let iteration = options.get("iteration").and_then(Value::as_u64).unwrap_or(0);
        Ok(self.mint("profile", device, iteration))
    }

    fn submit_inference(
        &self,
        _compiled: &JobHandle,
        device: &DeviceId,
        inputs: &Value,
    ) -> Result<JobHandle, BackendError> {
        if self.take_transport_failure() {
            return Err(BackendError::Transport("mock inference transport failure".to_string()));
        }
        let iteration = inputs.get("iteration").and_then(Value::as_u64).unwrap_or(0);
        Ok(self.mint("inference", device, iteration))
    }

    fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError> {
        if let Some(reason) = &self.behavior.fail_jobs {
            return Ok(JobStatus::Failed {
                reason: reason.clone(),
            });
        }
        let mut polls = self.polls.lock().unwrap();
        let remaining = polls.entry(job.as_str().to_string()).or_insert(0);
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(JobStatus::Running);
        }
        Ok(JobStatus::Success)
    }

    fn fetch_payload(&self, job: &JobHandle) -> Result<Vec<u8>, BackendError> {
        let iteration = Self::iteration_of(job);
        if job.as_str().starts_with("profile@") {
            let payload = self
                .behavior
                .profile_payloads
                .get(iteration)
                .cloned()
                .unwrap_or_else(|| json!({}));
            return Ok(serde_json::to_vec(&payload).unwrap_or_default());
        }
        if job.as_str().starts_with("inference@") {
            let outputs: Vec<Value> = self
                .behavior
                .inference_outputs
                .iter()
                .map(|(case_id, text)| json!({ "case_id": case_id, "text": text }))
                .collect();
            return Ok(serde_json::to_vec(&json!({ "outputs": outputs })).unwrap_or_default());
        }
        Ok(serde_json::to_vec(&json!({ "compiled": true })).unwrap_or_default())
    }

    fn fetch_logs(&self, _job: &JobHandle) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(Some(b"mock job log".to_vec()))
    }
}

/// Connector handing out mock sessions with shared behavior.
pub struct MockConnector {
    /// Behavior applied to every session.
    pub behavior: MockBehavior,
}

impl BackendConnector for MockConnector {
    type Session = MockBackend;

    fn connect(&self, token: &SecretString) -> Result<Self::Session, BackendError> {
        if token.reveal().is_empty() {
            return Err(BackendError::TokenRejected("empty token".to_string()));
        }
        Ok(MockBackend::new(self.behavior.clone()))
    }
}

// ============================================================================
// SECTION: Record Builders
// ============================================================================

/// Timestamp helper.
pub fn ts(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

/// Gate helper.
pub fn gate(metric: &str, op: GateOp, threshold: f64, required: bool) -> GateSpec {
    GateSpec {
        metric: metric.to_string(),
        op,
        threshold: Number::from_f64(threshold).unwrap(),
        required,
    }
}

/// Pipeline over one device with the given gates.
pub fn pipeline(workspace: &str, gates: Vec<GateSpec>) -> Pipeline {
    Pipeline {
        pipeline_id: PipelineId::new("pl-1"),
        workspace_id: WorkspaceId::new(workspace),
        name: "nightly-gate".to_string(),
        device_matrix: vec![MatrixDevice {
            device_id: DeviceId::new("sm8650"),
            device_name: "Snapdragon 8 Gen 3".to_string(),
        }],
        promptpack_ref: PromptPackVersionRef {
            logical_id: PromptPackId::new("pp-smoke"),
            version: "1.0.0".to_string(),
        },
        gates,
        run_policy: RunPolicy::default(),
    }
}

/// Published promptpack with one exact-match case and one unscored case.
pub fn promptpack(workspace: &str) -> PromptPack {
    let mut pack = PromptPack {
        workspace_id: WorkspaceId::new(workspace),
        logical_id: PromptPackId::new("pp-smoke"),
        version: "1.0.0".to_string(),
        sha256: edgegate_core::hash_bytes(b"placeholder"),
        cases: vec![
            PromptCase {
                case_id: "greeting".to_string(),
                prompt: "Say hello.".to_string(),
                expectation: Expectation::Exact {
                    expected: "hello".to_string(),
                },
            },
            PromptCase {
                case_id: "freeform".to_string(),
                prompt: "Tell a story.".to_string(),
                expectation: Expectation::None,
            },
        ],
        published: true,
    };
    pack.sha256 = pack.canonical_sha256().unwrap();
    pack
}

/// Metric mapping with stable paths for the named metrics.
pub fn mapping(workspace: &str, stable: &[&str]) -> MetricMapping {
    let mut metrics = BTreeMap::new();
    for metric in edgegate_core::NORMALIZED_METRICS {
        let path = if stable.contains(metric) {
            MetricPath {
                json_path: Some(format!("$.metrics.{metric}")),
                unit: Some(unit_for(metric).to_string()),
                stability: MetricStability::Stable,
            }
        } else {
            MetricPath::unavailable()
        };
        metrics.insert((*metric).to_string(), path);
    }
    MetricMapping {
        workspace_id: WorkspaceId::new(workspace),
        derived_from_artifacts: vec!["art-probe-1".into(), "art-probe-2".into()],
        metrics,
    }
}

/// Unit label for a normalized metric.
fn unit_for(metric: &str) -> &'static str {
    match metric {
        "peak_ram_mb" => "mb",
        "tokens_per_sec" => "tokens/sec",
        metric if metric.ends_with("_percent") => "percent",
        _ => "ms",
    }
}

/// Profile payload carrying `$.metrics.*` values.
pub fn profile_payload(values: &[(&str, f64)]) -> Value {
    let mut metrics = serde_json::Map::new();
    for (metric, value) in values {
        metrics.insert((*metric).to_string(), json!(value));
    }
    json!({ "metrics": metrics })
}

// ============================================================================
// SECTION: Store Seeding
// ============================================================================

/// Seeds a workspace: pipeline, promptpack, sealed integration, mapping
/// blobs, and the capabilities record. Returns the keyring used to seal.
pub fn seed_workspace(
    store: &InMemoryStore,
    workspace: &str,
    gates: Vec<GateSpec>,
    stable_metrics: &[&str],
) -> MasterKeyring {
    use base64::Engine;

    let workspace_id = WorkspaceId::new(workspace);
    store.insert_pipeline(pipeline(workspace, gates));
    store.insert_promptpack(promptpack(workspace));

    let material = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
    let keyring = MasterKeyring::from_base64("mk-test", &material).unwrap();
    let sealed = keyring.seal(b"qai-mock-token-7788").unwrap();
    store.insert_integration(Integration {
        workspace_id: workspace_id.clone(),
        provider: "qaihub".to_string(),
        status: IntegrationStatus::Active,
        sealed_token: serde_json::to_value(&sealed).unwrap(),
        token_last4: "7788".to_string(),
        created_at: ts(1_000),
        updated_at: ts(1_000),
    });

    let mapping = mapping(workspace, stable_metrics);
    let mapping_bytes = edgegate_core::canonical_json_bytes(&mapping).unwrap();
    let mapping_blob = store
        .put(&workspace_id, ArtifactKind::MetricMapping, &mapping_bytes, "metric_mapping.json", ts(1_000))
        .unwrap();
    let capabilities_bytes = b"{\"capabilities\":[]}".to_vec();
    let capabilities_blob = store
        .put(
            &workspace_id,
            ArtifactKind::Capabilities,
            &capabilities_bytes,
            "workspace_capabilities.json",
            ts(1_000),
        )
        .unwrap();
    store
        .save_capabilities_record(&CapabilitiesRecord {
            workspace_id: workspace_id.clone(),
            capabilities_blob_id: capabilities_blob.artifact_id,
            metric_mapping_blob_id: mapping_blob.artifact_id,
            probed_at: ts(1_000),
            source_probe_run_id: RunId::new("probe-run-1"),
        })
        .unwrap();

    keyring
}

/// Uploads a bare-ONNX model artifact and returns its id.
pub fn seed_model(store: &InMemoryStore, workspace: &str) -> edgegate_core::ArtifactId {
    let workspace_id = WorkspaceId::new(workspace);
    store
        .put(&workspace_id, ArtifactKind::Model, b"onnx-model-bytes", "model.onnx", ts(1_000))
        .unwrap()
        .artifact_id
}
