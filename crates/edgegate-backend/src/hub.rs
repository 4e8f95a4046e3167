// crates/edgegate-backend/src/hub.rs
// ============================================================================
// Module: Compute Hub Client
// Description: Blocking HTTP client implementing the Backend seam.
// Purpose: Submit, poll, and fetch jobs against the vendor REST surface.
// Dependencies: edgegate-core, reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! The client wraps the vendor job API with hardened defaults: no redirects,
//! request timeout, response size cap, scheme check, and an optional host
//! allowlist. Credential failures map to token rejection so the orchestrator
//! can classify them; response payloads pass through as opaque bytes.
//!
//! Security posture: the bearer token is injected per request from a
//! [`SecretString`] and never stored on the client in renderable form.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::io::Read;
use std::time::Duration;

use edgegate_core::Backend;
use edgegate_core::BackendConnector;
use edgegate_core::BackendError;
use edgegate_core::BackendIdentity;
use edgegate_core::Device;
use edgegate_core::DeviceId;
use edgegate_core::JobHandle;
use edgegate_core::JobStatus;
use edgegate_core::PackageKind;
use edgegate_core::RemoteModelHandle;
use edgegate_core::SecretString;
use edgegate_core::TargetRuntime;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use reqwest::blocking::Response;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the hub client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubClientConfig {
    /// Hub base URL.
    pub base_url: String,
    /// Allow cleartext HTTP (disabled by default; tests only).
    pub allow_http: bool,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum response size allowed, in bytes.
    pub max_response_bytes: usize,
    /// Optional host allowlist.
    pub allowed_hosts: Option<BTreeSet<String>>,
    /// User agent string for outbound requests.
    pub user_agent: String,
}

impl Default for HubClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.aihub.qualcomm.com".to_string(),
            allow_http: false,
            timeout_ms: 30_000,
            max_response_bytes: 32 * 1024 * 1024,
            allowed_hosts: None,
            user_agent: "edgegate/0.1".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Authenticated hub session.
#[derive(Debug)]
pub struct HubClient {
    /// Client configuration, including limits and policy.
    config: HubClientConfig,
    /// HTTP client used for outbound requests.
    client: Client,
    /// Bearer token for this session.
    token: SecretString,
}

impl HubClient {
    /// Creates a new hub session with the given configuration and token.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Protocol`] when the base URL is invalid and
    /// [`BackendError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: HubClientConfig, token: SecretString) -> Result<Self, BackendError> {
        let base = Url::parse(&config.base_url)
            .map_err(|_| BackendError::Protocol("invalid hub base url".to_string()))?;
        validate_url(&base, &config)?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(|err| BackendError::Transport(format!("http client build failed: {err}")))?;
        Ok(Self {
            config,
            client,
            token,
        })
    }

    /// Builds a full URL under the hub base.
    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        let base = Url::parse(&self.config.base_url)
            .map_err(|_| BackendError::Protocol("invalid hub base url".to_string()))?;
        base.join(path).map_err(|_| BackendError::Protocol(format!("invalid endpoint {path}")))
    }

    /// Attaches the bearer token to a request.
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(self.token.reveal())
    }

    /// Sends a request and classifies transport and status failures.
    fn send(&self, builder: RequestBuilder) -> Result<Response, BackendError> {
        let response = self
            .authorized(builder)
            .send()
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(BackendError::TokenRejected(format!("hub returned {}", response.status())))
            }
            status if status.is_client_error() || status.is_server_error() => {
                Err(BackendError::Rejected(format!("hub returned {status}")))
            }
            _ => Ok(response),
        }
    }

    /// Reads a response body under the configured size cap.
    fn read_limited(&self, mut response: Response) -> Result<Vec<u8>, BackendError> {
        let max_bytes = u64::try_from(self.config.max_response_bytes)
            .map_err(|_| BackendError::Protocol("response size limit exceeds u64".to_string()))?;
        if let Some(expected) = response.content_length()
            && expected > max_bytes
        {
            return Err(BackendError::Protocol("hub response exceeds size limit".to_string()));
        }
        let mut buf = Vec::new();
        let mut limited = (&mut response).take(max_bytes.saturating_add(1));
        limited
            .read_to_end(&mut buf)
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        if buf.len() as u64 > max_bytes {
            return Err(BackendError::Protocol("hub response exceeds size limit".to_string()));
        }
        Ok(buf)
    }

    /// Reads and parses a JSON response body.
    fn read_json(&self, response: Response) -> Result<Value, BackendError> {
        let bytes = self.read_limited(response)?;
        serde_json::from_slice(&bytes)
            .map_err(|err| BackendError::Protocol(format!("unparseable hub response: {err}")))
    }

    /// Extracts a required string field from a hub response.
    fn string_field(payload: &Value, field: &str) -> Result<String, BackendError> {
        payload
            .get(field)
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| BackendError::Protocol(format!("hub response missing {field}")))
    }
}

impl Backend for HubClient {
    fn identity(&self) -> Result<BackendIdentity, BackendError> {
        let url = self.endpoint("v1/user")?;
        let payload = self.read_json(self.send(self.client.get(url))?)?;
        Ok(BackendIdentity {
            account: Self::string_field(&payload, "account")?,
        })
    }

    fn list_devices(&self) -> Result<Vec<Device>, BackendError> {
        let url = self.endpoint("v1/devices")?;
        let payload = self.read_json(self.send(self.client.get(url))?)?;
        let devices = payload
            .get("devices")
            .and_then(Value::as_array)
            .ok_or_else(|| BackendError::Protocol("hub response missing devices".to_string()))?;
        devices
            .iter()
            .map(|device| {
                Ok(Device {
                    device_id: DeviceId::new(Self::string_field(device, "id")?),
                    device_name: Self::string_field(device, "name")?,
                    chipset: device
                        .get("chipset")
                        .and_then(Value::as_str)
                        .map(ToString::to_string),
                })
            })
            .collect()
    }

    fn upload_model(
        &self,
        bytes: &[u8],
        kind: PackageKind,
        name: &str,
    ) -> Result<RemoteModelHandle, BackendError> {
        let kind_label = match kind {
            PackageKind::OnnxSingle => "onnx",
            PackageKind::OnnxExternal => "onnx_external",
            PackageKind::AimetQuant => "aimet",
        };
        let mut url = self.endpoint("v1/models")?;
        url.query_pairs_mut().append_pair("name", name).append_pair("kind", kind_label);
        let payload = self.read_json(self.send(
            self.client.post(url).header("content-type", "application/octet-stream").body(
                bytes.to_vec(),
            ),
        )?)?;
        Ok(RemoteModelHandle(Self::string_field(&payload, "model_id")?))
    }

    fn submit_compile(
        &self,
        model: &RemoteModelHandle,
        device: &DeviceId,
        target: TargetRuntime,
        options: &Value,
    ) -> Result<JobHandle, BackendError> {
        let target_label = match target {
            TargetRuntime::QnnDlc => "qnn_dlc",
        };
        let url = self.endpoint("v1/jobs/compile")?;
        let payload = self.read_json(self.send(self.client.post(url).json(&json!({
            "model_id": model.0,
            "device_id": device.as_str(),
            "target_runtime": target_label,
            "options": options,
        })))?)?;
        Ok(JobHandle(Self::string_field(&payload, "job_id")?))
    }

    fn submit_profile(
        &self,
        compiled: &JobHandle,
        device: &DeviceId,
        options: &Value,
    ) -> Result<JobHandle, BackendError> {
        let url = self.endpoint("v1/jobs/profile")?;
        let payload = self.read_json(self.send(self.client.post(url).json(&json!({
            "compile_job_id": compiled.as_str(),
            "device_id": device.as_str(),
            "options": options,
        })))?)?;
        Ok(JobHandle(Self::string_field(&payload, "job_id")?))
    }

    fn submit_inference(
        &self,
        compiled: &JobHandle,
        device: &DeviceId,
        inputs: &Value,
    ) -> Result<JobHandle, BackendError> {
        let url = self.endpoint("v1/jobs/inference")?;
        let payload = self.read_json(self.send(self.client.post(url).json(&json!({
            "compile_job_id": compiled.as_str(),
            "device_id": device.as_str(),
            "inputs": inputs,
        })))?)?;
        Ok(JobHandle(Self::string_field(&payload, "job_id")?))
    }

    fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError> {
        let url = self.endpoint(&format!("v1/jobs/{}", job.as_str()))?;
        let payload = self.read_json(self.send(self.client.get(url))?)?;
        let state = Self::string_field(&payload, "state")?;
        match state.as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed {
                reason: payload
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified hub failure")
                    .to_string(),
            }),
            other => Err(BackendError::Protocol(format!("unknown job state {other}"))),
        }
    }

    fn fetch_payload(&self, job: &JobHandle) -> Result<Vec<u8>, BackendError> {
        let url = self.endpoint(&format!("v1/jobs/{}/payload", job.as_str()))?;
        let response = self.send(self.client.get(url))?;
        self.read_limited(response)
    }

    fn fetch_logs(&self, job: &JobHandle) -> Result<Option<Vec<u8>>, BackendError> {
        let url = self.endpoint(&format!("v1/jobs/{}/logs", job.as_str()))?;
        let response = self
            .authorized(self.client.get(url))
            .send()
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(BackendError::TokenRejected(format!("hub returned {}", response.status())))
            }
            status if status.is_client_error() || status.is_server_error() => {
                Err(BackendError::Rejected(format!("hub returned {status}")))
            }
            _ => Ok(Some(self.read_limited(response)?)),
        }
    }
}

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Builds authenticated hub sessions from decrypted tokens.
#[derive(Debug, Clone, Default)]
pub struct HubConnector {
    /// Client configuration shared by every session.
    pub config: HubClientConfig,
}

impl HubConnector {
    /// Creates a connector with the given configuration.
    #[must_use]
    pub const fn new(config: HubClientConfig) -> Self {
        Self {
            config,
        }
    }
}

impl BackendConnector for HubConnector {
    type Session = HubClient;

    fn connect(&self, token: &SecretString) -> Result<Self::Session, BackendError> {
        HubClient::new(self.config.clone(), token.clone())
    }
}

// ============================================================================
// SECTION: URL Policy
// ============================================================================

/// Validates URL scheme and allowlist policy.
fn validate_url(url: &Url, config: &HubClientConfig) -> Result<(), BackendError> {
    match url.scheme() {
        "https" => {}
        "http" if config.allow_http => {}
        _ => return Err(BackendError::Protocol("unsupported hub url scheme".to_string())),
    }
    if let Some(allowlist) = &config.allowed_hosts {
        let host = url
            .host_str()
            .ok_or_else(|| BackendError::Protocol("hub url host required".to_string()))?;
        if !allowlist.contains(host) {
            return Err(BackendError::Protocol("hub url host not allowed".to_string()));
        }
    }
    Ok(())
}
