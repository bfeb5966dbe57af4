//! Program-runner capability and its two implementations.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;

use neuroforge_sandbox::{ArtifactCapture, ContainerRunner, RunOutcome, RunRequest, SandboxError};

use crate::error::KernelError;
use crate::state::{RunPayload, RunResult};

/// Extra host-side tolerance on top of the sandbox wall-clock limit, so a
/// healthy runner always finishes (or times out) before the client does.
pub const RUNNER_GRACE_SECS: u64 = 60;

#[async_trait]
pub trait ProgramRunner: Send + Sync {
    async fn run(&self, payload: RunPayload) -> Result<RunResult, KernelError>;
}

/// In-process bridge to the container sandbox.
pub struct SandboxRunner {
    runner: Arc<ContainerRunner>,
}

impl SandboxRunner {
    pub fn new(runner: Arc<ContainerRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ProgramRunner for SandboxRunner {
    async fn run(&self, payload: RunPayload) -> Result<RunResult, KernelError> {
        let request = RunRequest {
            language: payload.language,
            code: payload.code,
            timeout_secs: payload.timeout,
            requirements: payload.requirements,
            extra_requirements: payload.extra_requirements,
            network: payload.network,
            input_files: payload.input_files,
        };
        let outcome = self
            .runner
            .run(request)
            .await
            .map_err(|err: SandboxError| KernelError::Runner(err.to_string()))?;
        Ok(outcome_to_result(outcome))
    }
}

fn outcome_to_result(outcome: RunOutcome) -> RunResult {
    let (artifacts_zip, artifacts_note) = match outcome.artifacts {
        Some(ArtifactCapture::Zip(bytes)) => (Some(bytes), None),
        Some(ArtifactCapture::Note(note)) => (None, Some(note)),
        None => (None, None),
    };
    RunResult {
        exit_code: outcome.exit_code,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        inputs_required: None,
        artifacts_zip,
        artifacts_note,
    }
}

/// Client for a remote runner service exposing `POST /run`.
pub struct HttpRunner {
    http: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct WireRunRequest<'a> {
    language: &'a str,
    code: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    requirements: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extra_requirements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    files_b64: BTreeMap<&'a str, String>,
}

impl HttpRunner {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProgramRunner for HttpRunner {
    async fn run(&self, payload: RunPayload) -> Result<RunResult, KernelError> {
        let files_b64 = payload
            .input_files
            .iter()
            .map(|(name, bytes)| {
                (
                    name.as_str(),
                    base64::engine::general_purpose::STANDARD.encode(bytes),
                )
            })
            .collect();
        let body = WireRunRequest {
            language: payload.language.as_str(),
            code: &payload.code,
            timeout: payload.timeout,
            requirements: payload.requirements.clone(),
            extra_requirements: payload.extra_requirements.clone(),
            network: payload.network.as_deref(),
            files_b64,
        };

        let response = self
            .http
            .post(&self.url)
            .timeout(Duration::from_secs(payload.timeout + RUNNER_GRACE_SECS))
            .json(&body)
            .send()
            .await
            .map_err(|err| KernelError::Runner(err.to_string()))?
            .error_for_status()
            .map_err(|err| KernelError::Runner(err.to_string()))?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|err| KernelError::Runner(err.to_string()))?;
        RunResult::from_json_value(value).map_err(|err| KernelError::Runner(err.to_string()))
    }
}
