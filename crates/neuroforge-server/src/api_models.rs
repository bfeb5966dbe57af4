//! API DTOs for the task and runner surfaces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use neuroforge_kernel::TaskOutcome;

/// `POST /run_task` body: a natural-language task plus optional inputs.
#[derive(Clone, Debug, Deserialize)]
pub struct RunTaskRequest {
    pub task: String,
    /// Input files, name → base64 bytes.
    #[serde(default)]
    pub files_b64: Option<BTreeMap<String, String>>,
    /// Starting timeout hint, seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunTaskResponse {
    pub status: &'static str,
    pub result: TaskOutcome,
}

impl RunTaskResponse {
    pub fn success(result: TaskOutcome) -> Self {
        Self {
            status: "success",
            result,
        }
    }
}

/// `POST /run` body: one sandbox execution.
#[derive(Clone, Debug, Deserialize)]
pub struct RunRequestBody {
    pub language: String,
    pub code: String,
    pub timeout: u64,
    #[serde(default)]
    pub requirements: Option<Vec<String>>,
    #[serde(default)]
    pub extra_requirements: Option<Vec<String>>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub files_b64: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunResponseBody {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_zip_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_note: Option<String>,
}
