//! Values carried through the orchestration state machine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use neuroforge_sandbox::Language;

pub const MIN_STATE_TIMEOUT_SECS: u64 = 8;
pub const MAX_STATE_TIMEOUT_SECS: u64 = 300;

/// Immutable description of what the caller wants run.
#[derive(Clone, Debug, Default)]
pub struct Task {
    pub task_text: String,
    /// Input files staged into the workspace, name → bytes.
    pub input_files: BTreeMap<String, Vec<u8>>,
    /// Caller-suggested starting timeout, seconds.
    pub timeout_hint: Option<u64>,
}

impl Task {
    pub fn new(task_text: impl Into<String>) -> Self {
        Self {
            task_text: task_text.into(),
            ..Self::default()
        }
    }
}

/// Mutable state of one run, owned by the orchestrator for its lifetime
/// and carried by value between transitions.
#[derive(Clone, Debug)]
pub struct AttemptState {
    pub task_text: String,
    pub language: Option<Language>,
    pub code: String,
    pub last_result: Option<RunResult>,
    /// Last stderr, set exactly when the last exit code was nonzero.
    pub error_text: Option<String>,
    pub error_signature: Option<String>,
    pub attempts: u32,
    /// Seconds; grows on repair, never past the cap.
    pub timeout: u64,
    pub input_files: BTreeMap<String, Vec<u8>>,
    pub inputs_required: Option<Vec<String>>,
}

impl AttemptState {
    pub fn new(task: &Task) -> Self {
        let timeout = task
            .timeout_hint
            .unwrap_or(MIN_STATE_TIMEOUT_SECS)
            .clamp(MIN_STATE_TIMEOUT_SECS, MAX_STATE_TIMEOUT_SECS);
        Self {
            task_text: task.task_text.clone(),
            language: None,
            code: String::new(),
            last_result: None,
            error_text: None,
            error_signature: None,
            attempts: 0,
            timeout,
            input_files: task.input_files.clone(),
            inputs_required: None,
        }
    }
}

/// What one sandbox execution produced.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(alias = "returncode")]
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_required: Option<Vec<String>>,
    /// ZIP of the post-run workspace; omitted when oversized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_zip: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_note: Option<String>,
}

impl RunResult {
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Parses a runner response body. The canonical shape is flat
    /// (`{"returncode": …}`); older callers wrap it as
    /// `{"result": {"returncode": …}}`, and both are accepted.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let flat = match value {
            serde_json::Value::Object(mut map)
                if !map.contains_key("returncode") && !map.contains_key("exit_code") =>
            {
                map.remove("result")
                    .unwrap_or(serde_json::Value::Object(map))
            }
            other => other,
        };
        let mut parsed: RunResult = serde_json::from_value(flat.clone())?;
        if let Some(encoded) = flat.get("artifacts_zip_b64").and_then(|v| v.as_str()) {
            use base64::Engine;
            parsed.artifacts_zip = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok();
        }
        Ok(parsed)
    }
}

/// Payload handed to the program runner for one execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunPayload {
    pub language: Language,
    pub code: String,
    /// Wall-clock limit inside the sandbox, seconds.
    pub timeout: u64,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub extra_requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing)]
    pub input_files: BTreeMap<String, Vec<u8>>,
}

impl RunPayload {
    pub fn new(language: Language, code: impl Into<String>, timeout: u64) -> Self {
        Self {
            language,
            code: code.into(),
            timeout,
            requirements: Vec::new(),
            extra_requirements: Vec::new(),
            network: None,
            input_files: BTreeMap::new(),
        }
    }
}

/// Final report of a run, emitted when the machine reaches DONE.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub language: Option<String>,
    pub attempts: u32,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_required: Option<Vec<String>>,
}
