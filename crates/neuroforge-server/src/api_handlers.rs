//! Axum handlers: thin transport over the orchestrator and the sandbox.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde_json::json;

use neuroforge_kernel::{Orchestrator, Task};
use neuroforge_sandbox::{
    ArtifactCapture, ContainerRunner, Language, RunRequest, SandboxError,
};

use crate::api_errors::ApiError;
use crate::api_models::{RunRequestBody, RunResponseBody, RunTaskRequest, RunTaskResponse};

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sandbox: Arc<ContainerRunner>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/run_task", post(run_task))
        .route("/run_task_multipart", post(run_task_multipart))
        .route("/run", post(run))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "NeuroForge kernel is alive" }))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn run_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunTaskRequest>,
) -> Result<Json<RunTaskResponse>, ApiError> {
    let input_files = decode_files(request.files_b64)?;
    let task = Task {
        task_text: request.task,
        input_files,
        timeout_hint: request.timeout,
    };
    let result = state.orchestrator.run_task(task).await?;
    Ok(Json(RunTaskResponse::success(result)))
}

async fn run_task_multipart(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<RunTaskResponse>, ApiError> {
    let mut task_text: Option<String> = None;
    let mut timeout: Option<u64> = None;
    let mut input_files: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("malformed multipart body: {err}")))?
    {
        match field.name() {
            Some("task") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::bad_request(format!("unreadable task field: {err}")))?;
                task_text = Some(text);
            }
            Some("timeout") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::bad_request(format!("unreadable timeout field: {err}")))?;
                timeout = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| ApiError::bad_request(format!("invalid timeout: {text}")))?,
                );
            }
            Some("files") => {
                // Filenames are taken verbatim; staging validates them later.
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::bad_request("uploaded file has no filename"))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::bad_request(format!("unreadable upload {name}: {err}")))?;
                input_files.insert(name, bytes.to_vec());
            }
            _ => {}
        }
    }

    let task_text = task_text.ok_or_else(|| ApiError::bad_request("missing task field"))?;
    let task = Task {
        task_text,
        input_files,
        timeout_hint: timeout,
    };
    let result = state.orchestrator.run_task(task).await?;
    Ok(Json(RunTaskResponse::success(result)))
}

async fn run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunRequestBody>,
) -> Result<Json<RunResponseBody>, ApiError> {
    let language: Language = body
        .language
        .parse()
        .map_err(|err: neuroforge_sandbox::UnknownLanguage| ApiError::bad_request(err.to_string()))?;
    let input_files = decode_files(body.files_b64)?;

    let request = RunRequest {
        language,
        code: body.code,
        timeout_secs: body.timeout,
        requirements: body.requirements.unwrap_or_default(),
        extra_requirements: body.extra_requirements.unwrap_or_default(),
        network: body.network,
        input_files,
    };
    let outcome = state.sandbox.run(request).await.map_err(|err| match err {
        SandboxError::InvalidInput(message) => ApiError::bad_request(message),
    })?;

    let (artifacts_zip_b64, artifacts_note) = match outcome.artifacts {
        Some(ArtifactCapture::Zip(bytes)) => (
            Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            None,
        ),
        Some(ArtifactCapture::Note(note)) => (None, Some(note)),
        None => (None, None),
    };
    Ok(Json(RunResponseBody {
        returncode: outcome.exit_code,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        artifacts_zip_b64,
        artifacts_note,
    }))
}

fn decode_files(
    files_b64: Option<BTreeMap<String, String>>,
) -> Result<BTreeMap<String, Vec<u8>>, ApiError> {
    let mut decoded = BTreeMap::new();
    for (name, encoded) in files_b64.unwrap_or_default() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|err| ApiError::bad_request(format!("invalid base64 for {name}: {err}")))?;
        decoded.insert(name, bytes);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use async_trait::async_trait;
    use neuroforge_kernel::{
        CodeGenerator, GeneratedProgram, KernelError, OrchestratorConfig, ProgramRunner,
        RunPayload, RunResult,
    };
    use neuroforge_memory::{HashingEmbedder, InMemoryIndex, MemoryAdapter};
    use neuroforge_sandbox::SandboxSettings;

    struct EchoGenerator;

    #[async_trait]
    impl CodeGenerator for EchoGenerator {
        async fn generate(
            &self,
            _task: &str,
            _language: Option<Language>,
            _context: Option<&str>,
        ) -> Result<GeneratedProgram, KernelError> {
            Ok(GeneratedProgram {
                code: "print(\"hello world\")".into(),
                language: Language::Python,
            })
        }
    }

    struct NoopRepairer;

    #[async_trait]
    impl neuroforge_kernel::CodeRepairer for NoopRepairer {
        async fn repair(
            &self,
            code: &str,
            _error: &str,
            _language: Language,
            _context: Option<&str>,
        ) -> Result<String, KernelError> {
            Ok(code.to_string())
        }
    }

    struct AlwaysOkRunner;

    #[async_trait]
    impl ProgramRunner for AlwaysOkRunner {
        async fn run(&self, _payload: RunPayload) -> Result<RunResult, KernelError> {
            Ok(RunResult {
                exit_code: 0,
                stdout: "hello world\n".into(),
                ..RunResult::default()
            })
        }
    }

    fn test_state() -> Arc<AppState> {
        let memory = Arc::new(MemoryAdapter::new(
            Arc::new(HashingEmbedder),
            Arc::new(InMemoryIndex::new()),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(EchoGenerator),
            Arc::new(NoopRepairer),
            Arc::new(AlwaysOkRunner),
            memory,
            OrchestratorConfig::default(),
        ));
        let sandbox = Arc::new(ContainerRunner::new(SandboxSettings::default()));
        Arc::new(AppState {
            orchestrator,
            sandbox,
        })
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn run_task_returns_success_envelope() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/run_task")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"task":"print hello world in python"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["result"]["returncode"], 0);
        assert_eq!(body["result"]["language"], "python");
        assert_eq!(body["result"]["attempts"], 1);
        assert_eq!(body["result"]["stdout"], "hello world\n");
    }

    #[tokio::test]
    async fn run_task_rejects_bad_base64() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/run_task")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"task":"x","files_b64":{"data.csv":"!!not-base64!!"}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert!(body["detail"].as_str().unwrap().contains("data.csv"));
    }

    #[tokio::test]
    async fn run_task_rejects_empty_task() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/run_task")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"task":"   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn run_rejects_unknown_language() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/run")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"language":"cobol","code":"DISPLAY 'HI'.","timeout":10}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert!(body["detail"].as_str().unwrap().contains("cobol"));
    }

    #[tokio::test]
    async fn run_rejects_out_of_range_timeout() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/run")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"language":"python","code":"print(1)","timeout":0}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn multipart_without_task_field_is_rejected() {
        let app = build_router(test_state());
        let boundary = "nf-test-boundary";
        let payload = format!("--{boundary}--\r\n");
        let response = app
            .oneshot(
                Request::post("/run_task_multipart")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn multipart_accepts_task_timeout_and_files() {
        let app = build_router(test_state());
        let boundary = "nf-test-boundary";
        let payload = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"task\"\r\n\r\n\
             summarize the data\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"timeout\"\r\n\r\n\
             20\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"data.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             a,b\r\n\
             --{boundary}--\r\n"
        );
        let response = app
            .oneshot(
                Request::post("/run_task_multipart")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["result"]["returncode"], 0);
    }
}
