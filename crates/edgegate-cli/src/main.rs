// crates/edgegate-cli/src/main.rs
// ============================================================================
// Module: EdgeGate CLI
// Description: CI client helper for triggering, polling, and verifying runs.
// Purpose: Give build pipelines a blocking gate with the stable exit codes.
// Dependencies: clap, edgegate-cli, edgegate-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! The `edgegate` binary covers the CI loop end to end: trigger a run
//! through the HMAC ingress, poll it to a terminal state, and verify the
//! signed evidence bundle offline. Exit codes follow the CI contract:
//! 0 passed, 1 failed, 2 error, 3 auth/config.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use edgegate_cli::build_ci_headers;
use edgegate_cli::exit_code_for_state;
use edgegate_cli::generate_nonce;
use edgegate_cli::verify_bundle_file;
use edgegate_core::RunOutcome;
use edgegate_core::RunState;
use edgegate_core::Timestamp;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Poll backoff base in milliseconds.
const WAIT_BASE_MILLIS: u64 = 2_000;
/// Poll backoff cap in milliseconds.
const WAIT_CAP_MILLIS: u64 = 60_000;
/// Maximum accepted secret file size in bytes.
const MAX_SECRET_FILE_BYTES: u64 = 4096;

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// EdgeGate CI client.
#[derive(Debug, Parser)]
#[command(name = "edgegate", version, about = "EdgeGate CI gating client")]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Command,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Trigger and poll runs.
    #[command(subcommand)]
    Run(RunCommand),
    /// Verify evidence bundles offline.
    #[command(subcommand)]
    Bundle(BundleCommand),
    /// CI ingress helpers.
    #[command(subcommand)]
    Ci(CiCommand),
}

/// Run subcommands.
#[derive(Debug, Subcommand)]
enum RunCommand {
    /// Trigger a run through the HMAC ingress.
    Submit(SubmitArgs),
    /// Poll a run until terminal and exit per the CI contract.
    Wait(WaitArgs),
}

/// Bundle subcommands.
#[derive(Debug, Subcommand)]
enum BundleCommand {
    /// Verify an evidence.zip against a published public key.
    Verify(VerifyArgs),
}

/// CI subcommands.
#[derive(Debug, Subcommand)]
enum CiCommand {
    /// Print the four signed ingress headers for a request body.
    Sign(SignArgs),
}

/// Arguments for `run submit`.
#[derive(Debug, Args)]
struct SubmitArgs {
    /// EdgeGate API base URL.
    #[arg(long)]
    base_url: String,
    /// Workspace identifier.
    #[arg(long)]
    workspace: String,
    /// Pipeline identifier.
    #[arg(long)]
    pipeline: String,
    /// Model artifact identifier.
    #[arg(long)]
    model_artifact: String,
    /// Path to the CI secret file (shown once at generation).
    #[arg(long)]
    secret_file: PathBuf,
}

/// Arguments for `run wait`.
#[derive(Debug, Args)]
struct WaitArgs {
    /// EdgeGate API base URL.
    #[arg(long)]
    base_url: String,
    /// Workspace identifier.
    #[arg(long)]
    workspace: String,
    /// Run identifier.
    #[arg(long)]
    run: String,
    /// Bearer token for the read API.
    #[arg(long)]
    token: String,
    /// Maximum minutes to wait before giving up.
    #[arg(long, default_value_t = 45)]
    timeout_minutes: u64,
}

/// Arguments for `bundle verify`.
#[derive(Debug, Args)]
struct VerifyArgs {
    /// Path to evidence.zip.
    #[arg(long)]
    bundle: PathBuf,
    /// Path to the Ed25519 public key (raw 32 bytes or base64).
    #[arg(long)]
    public_key: PathBuf,
}

/// Arguments for `ci sign`.
#[derive(Debug, Args)]
struct SignArgs {
    /// Workspace identifier.
    #[arg(long)]
    workspace: String,
    /// Path to the CI secret file.
    #[arg(long)]
    secret_file: PathBuf,
    /// Path to the request body file; omit for an empty body.
    #[arg(long)]
    body_file: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures; every variant exits with code 3 (auth/config).
#[derive(Debug, Error)]
enum CliError {
    /// Local configuration problem (files, URLs, keys).
    #[error("{0}")]
    Config(String),
    /// The server rejected authentication.
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// Transport or protocol failure.
    #[error("request failed: {0}")]
    Request(String),
}

/// CLI result alias.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err.to_string());
            ExitCode::from(3)
        }
    }
}

/// Dispatches the parsed command.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(RunCommand::Submit(args)) => command_submit(&args),
        Command::Run(RunCommand::Wait(args)) => command_wait(&args),
        Command::Bundle(BundleCommand::Verify(args)) => command_verify(&args),
        Command::Ci(CiCommand::Sign(args)) => command_sign(&args),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Triggers a run through the HMAC ingress.
fn command_submit(args: &SubmitArgs) -> CliResult<ExitCode> {
    let secret = read_secret(&args.secret_file)?;
    let body = serde_json::to_vec(&json!({
        "pipeline_id": args.pipeline,
        "model_artifact_id": args.model_artifact,
    }))
    .map_err(|err| CliError::Config(err.to_string()))?;

    let headers = build_ci_headers(&args.workspace, &secret, &generate_nonce(), now(), &body)
        .map_err(|err| CliError::Config(err.to_string()))?;

    let client = http_client()?;
    let url = join_url(&args.base_url, "v1/ci/github/run")?;
    let mut request = client.post(url).header("content-type", "application/json").body(body);
    for (name, value) in headers.pairs() {
        request = request.header(name, value);
    }
    let response = request.send().map_err(|err| CliError::Request(err.to_string()))?;

    match response.status() {
        StatusCode::ACCEPTED => {
            let payload: Value = response
                .json()
                .map_err(|err| CliError::Request(format!("unparseable response: {err}")))?;
            let run_id = payload.get("run_id").and_then(Value::as_str).unwrap_or("unknown");
            emit_line(run_id);
            Ok(ExitCode::SUCCESS)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::CONFLICT => {
            Err(CliError::Auth(format!("ingress returned {}", response.status())))
        }
        status => Err(CliError::Request(format!("ingress returned {status}"))),
    }
}

/// Polls a run until terminal, then exits per the CI contract.
fn command_wait(args: &WaitArgs) -> CliResult<ExitCode> {
    let client = http_client()?;
    let path = format!("v1/workspaces/{}/runs/{}", args.workspace, args.run);
    let url = join_url(&args.base_url, &path)?;
    let deadline = SystemTime::now() + Duration::from_secs(args.timeout_minutes * 60);
    let mut backoff = WAIT_BASE_MILLIS;

    loop {
        let response = client
            .get(url.clone())
            .bearer_auth(&args.token)
            .send()
            .map_err(|err| CliError::Request(err.to_string()))?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(CliError::Auth(format!("api returned {}", response.status())));
            }
            status => return Err(CliError::Request(format!("api returned {status}"))),
        }
        let payload: Value = response
            .json()
            .map_err(|err| CliError::Request(format!("unparseable response: {err}")))?;
        let state = parse_state(&payload)?;

        if state.is_terminal() {
            let detail = payload.get("error_detail").and_then(Value::as_str).unwrap_or("");
            emit_line(&render_state(state, detail));
            return Ok(ExitCode::from(exit_code_for_state(state)));
        }
        if SystemTime::now() > deadline {
            let label = serde_json::to_string(&state).unwrap_or_default();
            emit_error(&format!("run still {label} after {} minutes", args.timeout_minutes));
            return Ok(ExitCode::from(2));
        }
        thread::sleep(Duration::from_millis(backoff));
        backoff = (backoff * 2).min(WAIT_CAP_MILLIS);
    }
}

/// Verifies an evidence bundle offline.
fn command_verify(args: &VerifyArgs) -> CliResult<ExitCode> {
    match verify_bundle_file(&args.bundle, &args.public_key) {
        Ok(summary) => {
            let status = match &summary.results.status {
                RunOutcome::Passed => "passed".to_string(),
                RunOutcome::Failed => "failed".to_string(),
                RunOutcome::Error {
                    code, ..
                } => format!("error ({code})"),
            };
            emit_line(&format!("verified run {} ({status})", summary.run_id));
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            emit_error(&err.to_string());
            Ok(ExitCode::from(2))
        }
    }
}

/// Prints the four signed ingress headers.
fn command_sign(args: &SignArgs) -> CliResult<ExitCode> {
    let secret = read_secret(&args.secret_file)?;
    let body = match &args.body_file {
        Some(path) => fs::read(path).map_err(|err| CliError::Config(err.to_string()))?,
        None => Vec::new(),
    };
    let headers = build_ci_headers(&args.workspace, &secret, &generate_nonce(), now(), &body)
        .map_err(|err| CliError::Config(err.to_string()))?;
    for (name, value) in headers.pairs() {
        emit_line(&format!("{name}: {value}"));
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads and trims the CI secret file under a hard size cap.
fn read_secret(path: &Path) -> CliResult<String> {
    let metadata = fs::metadata(path).map_err(|err| CliError::Config(err.to_string()))?;
    if metadata.len() > MAX_SECRET_FILE_BYTES {
        return Err(CliError::Config(format!(
            "secret file exceeds {MAX_SECRET_FILE_BYTES} bytes"
        )));
    }
    let raw = fs::read_to_string(path).map_err(|err| CliError::Config(err.to_string()))?;
    let secret = raw.trim().to_string();
    if secret.is_empty() {
        return Err(CliError::Config("secret file is empty".to_string()));
    }
    Ok(secret)
}

/// Builds the hardened blocking client.
fn http_client() -> CliResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .redirect(Policy::none())
        .user_agent("edgegate-cli/0.1")
        .build()
        .map_err(|err| CliError::Config(format!("http client build failed: {err}")))
}

/// Joins a path under the API base URL.
fn join_url(base: &str, path: &str) -> CliResult<reqwest::Url> {
    let base = reqwest::Url::parse(base)
        .map_err(|_| CliError::Config(format!("invalid base url {base}")))?;
    base.join(path).map_err(|_| CliError::Config(format!("invalid path {path}")))
}

/// Returns the current wall-clock time.
fn now() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    Timestamp::from_unix_millis(i64::try_from(millis).unwrap_or(i64::MAX))
}

/// Parses the run state out of an API payload.
fn parse_state(payload: &Value) -> CliResult<RunState> {
    let state = payload
        .get("state")
        .cloned()
        .ok_or_else(|| CliError::Request("response missing state".to_string()))?;
    serde_json::from_value(state)
        .map_err(|err| CliError::Request(format!("unknown run state: {err}")))
}

/// Renders a terminal state line for CI logs.
fn render_state(state: RunState, detail: &str) -> String {
    match state {
        RunState::Passed => "passed".to_string(),
        RunState::Failed => "failed".to_string(),
        RunState::Error if detail.is_empty() => "error".to_string(),
        RunState::Error => format!("error: {detail}"),
        _ => "pending".to_string(),
    }
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Writes one line to stdout; output failures are ignored (broken pipe).
fn emit_line(line: &str) {
    let mut stdout = std::io::stdout();
    let _written = writeln!(stdout, "{line}");
}

/// Writes one prefixed line to stderr; output failures are ignored.
fn emit_error(message: &str) {
    let mut stderr = std::io::stderr();
    let _written = writeln!(stderr, "edgegate: {message}");
}
