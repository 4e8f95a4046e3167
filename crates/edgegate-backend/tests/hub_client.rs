// crates/edgegate-backend/tests/hub_client.rs
// ============================================================================
// Module: Hub Client Tests
// Description: Wire tests for the hub adapter against a local HTTP server.
// ============================================================================
//! ## Overview
//! Runs the blocking client against a scripted `tiny_http` server: identity
//! and device listing, the job submit/poll/payload flow, credential
//! rejection, and the response size cap.

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

use std::thread;

use edgegate_backend::HubClient;
use edgegate_backend::HubClientConfig;
use edgegate_core::Backend;
use edgegate_core::BackendError;
use edgegate_core::DeviceId;
use edgegate_core::JobHandle;
use edgegate_core::JobStatus;
use edgegate_core::SecretString;
use tiny_http::Response;
use tiny_http::Server;

/// Starts a server answering `count` requests via the handler.
fn serve(count: usize, handler: impl Fn(&str) -> (u16, String) + Send + 'static) -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = format!("http://{}", server.server_addr().to_ip().unwrap());
    thread::spawn(move || {
        for _ in 0..count {
            let Ok(request) = server.recv() else {
                return;
            };
            let (status, body) = handler(request.url());
            let response = Response::from_string(body).with_status_code(status);
            let _served = request.respond(response);
        }
    });
    addr
}

/// Builds a client against a local server address.
fn client(base_url: String) -> HubClient {
    let config = HubClientConfig {
        base_url,
        allow_http: true,
        timeout_ms: 5_000,
        max_response_bytes: 64 * 1024,
        allowed_hosts: None,
        user_agent: "edgegate-test/0.1".to_string(),
    };
    HubClient::new(config, SecretString::from("test-token-1234")).unwrap()
}

// ============================================================================
// SECTION: Identity and Devices
// ============================================================================

/// Identity and device listing parse the vendor shapes.
#[test]
fn test_identity_and_devices() {
    let addr = serve(2, |url| match url {
        "/v1/user" => (200, r#"{"account":"edge-ci"}"#.to_string()),
        "/v1/devices" => (
            200,
            r#"{"devices":[{"id":"sm8650","name":"Snapdragon 8 Gen 3","chipset":"qualcomm"}]}"#
                .to_string(),
        ),
        _ => (404, String::new()),
    });
    let client = client(addr);

    assert_eq!(client.identity().unwrap().account, "edge-ci");
    let devices = client.list_devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, DeviceId::new("sm8650"));
    assert_eq!(devices[0].chipset.as_deref(), Some("qualcomm"));
}

/// Credential failures classify as token rejection.
#[test]
fn test_unauthorized_is_token_rejected() {
    let addr = serve(1, |_| (401, String::new()));
    let client = client(addr);

    let err = client.identity().unwrap_err();
    assert!(matches!(err, BackendError::TokenRejected(_)));
}

// ============================================================================
// SECTION: Job Flow
// ============================================================================

/// Submit, poll, and payload fetch round-trip the job endpoints.
#[test]
fn test_job_flow() {
    let addr = serve(4, |url| match url {
        "/v1/jobs/compile" => (200, r#"{"job_id":"job-1"}"#.to_string()),
        "/v1/jobs/job-1" => (200, r#"{"state":"success"}"#.to_string()),
        "/v1/jobs/job-1/payload" => (200, r#"{"metrics":{"peak_ram_mb":3000}}"#.to_string()),
        "/v1/jobs/job-1/logs" => (404, String::new()),
        _ => (404, String::new()),
    });
    let client = client(addr);

    let job = client
        .submit_compile(
            &edgegate_core::RemoteModelHandle("model-1".to_string()),
            &DeviceId::new("sm8650"),
            edgegate_core::TargetRuntime::QnnDlc,
            &serde_json::json!({}),
        )
        .unwrap();
    assert_eq!(job, JobHandle("job-1".to_string()));

    assert_eq!(client.poll(&job).unwrap(), JobStatus::Success);
    let payload = client.fetch_payload(&job).unwrap();
    assert!(payload.starts_with(b"{\"metrics\""));
    assert!(client.fetch_logs(&job).unwrap().is_none());
}

/// A failed job carries the vendor reason.
#[test]
fn test_failed_job_reason() {
    let addr = serve(1, |_| {
        (200, r#"{"state":"failed","reason":"device disconnected"}"#.to_string())
    });
    let client = client(addr);

    let status = client.poll(&JobHandle("job-9".to_string())).unwrap();
    assert_eq!(status, JobStatus::Failed {
        reason: "device disconnected".to_string(),
    });
}

// ============================================================================
// SECTION: Hardening
// ============================================================================

/// Responses over the configured cap are rejected.
#[test]
fn test_response_size_cap() {
    let addr = serve(1, |_| (200, "x".repeat(128 * 1024)));
    let config = HubClientConfig {
        base_url: addr,
        allow_http: true,
        timeout_ms: 5_000,
        max_response_bytes: 1024,
        allowed_hosts: None,
        user_agent: "edgegate-test/0.1".to_string(),
    };
    let client = HubClient::new(config, SecretString::from("test-token-1234")).unwrap();

    let err = client.fetch_payload(&JobHandle("job-1".to_string())).unwrap_err();
    assert!(matches!(err, BackendError::Protocol(_)));
}

/// Cleartext HTTP is rejected unless explicitly allowed.
#[test]
fn test_http_scheme_requires_opt_in() {
    let config = HubClientConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        allow_http: false,
        ..HubClientConfig::default()
    };
    let err = HubClient::new(config, SecretString::from("test-token-1234")).unwrap_err();
    assert!(matches!(err, BackendError::Protocol(_)));
}
