//! Container runner: one disposable container per run, bounded admission.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::artifacts::{capture_artifacts, ArtifactCapture};
use crate::profiles::Language;
use crate::TIMEOUT_EXIT_CODE;

const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 25 * 1024 * 1024;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Operator-tunable limits and container flags, read from the environment.
#[derive(Clone, Debug)]
pub struct SandboxSettings {
    /// Container network; defaults to `none`.
    pub network: String,
    pub memory_limit: Option<String>,
    pub cpu_limit: Option<String>,
    pub pids_limit: Option<String>,
    pub tmpfs_size: Option<String>,
    /// Extra flags appended verbatim to container creation.
    pub extra_flags: Vec<String>,
    /// Host directory mounted at `/root/.cache/pip` for requirement-aware languages.
    pub package_cache: Option<PathBuf>,
    pub max_artifact_bytes: u64,
    pub max_output_bytes: usize,
    pub max_concurrency: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            network: "none".into(),
            memory_limit: None,
            cpu_limit: None,
            pids_limit: Some("64".into()),
            tmpfs_size: None,
            extra_flags: Vec::new(),
            package_cache: None,
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl SandboxSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            network: non_empty_env("SANDBOX_DOCKER_NETWORK").unwrap_or(defaults.network),
            memory_limit: non_empty_env("SANDBOX_MEMORY_LIMIT"),
            cpu_limit: non_empty_env("SANDBOX_CPU_LIMIT"),
            pids_limit: non_empty_env("SANDBOX_PIDS_LIMIT").or(defaults.pids_limit),
            tmpfs_size: non_empty_env("SANDBOX_TMPFS_SIZE"),
            extra_flags: non_empty_env("SANDBOX_EXTRA_DOCKER_FLAGS")
                .map(|raw| shell_split(&raw))
                .unwrap_or_default(),
            package_cache: non_empty_env("SANDBOX_PACKAGE_CACHE").map(PathBuf::from),
            max_artifact_bytes: non_empty_env("SANDBOX_MAX_ARTIFACT_BYTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_artifact_bytes),
            max_output_bytes: non_empty_env("SANDBOX_MAX_OUTPUT_BYTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_output_bytes),
            max_concurrency: non_empty_env("SANDBOX_MAX_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_concurrency),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// One program execution request.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub language: Language,
    pub code: String,
    pub timeout_secs: u64,
    pub requirements: Vec<String>,
    pub extra_requirements: Vec<String>,
    /// Per-run network override.
    pub network: Option<String>,
    /// Input files staged under the workspace root; relative paths only.
    pub input_files: BTreeMap<String, Vec<u8>>,
}

impl RunRequest {
    pub fn new(language: Language, code: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            language,
            code: code.into(),
            timeout_secs,
            requirements: Vec::new(),
            extra_requirements: Vec::new(),
            network: None,
            input_files: BTreeMap::new(),
        }
    }
}

/// Observed result of a run. Infrastructure faults are reported through the
/// same shape: exit code 1 and a message in `stderr`.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub artifacts: Option<ArtifactCapture>,
}

impl RunOutcome {
    fn timed_out() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: "Execution timed out.".into(),
            artifacts: None,
        }
    }

    fn runtime_unavailable(err: &io::Error) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: format!("Container runtime unavailable: {err}"),
            artifacts: None,
        }
    }

    fn runner_error(message: impl std::fmt::Display) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: format!("Runner error: {message}"),
            artifacts: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Executes programs in disposable containers, at most `max_concurrency`
/// at a time. The permit is held for the container's whole lifetime and
/// released on every exit path.
pub struct ContainerRunner {
    settings: SandboxSettings,
    permits: Arc<Semaphore>,
}

impl ContainerRunner {
    pub fn new(settings: SandboxSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrency));
        Self { settings, permits }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, SandboxError> {
        let requirements = validate(&request)?;

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Ok(RunOutcome::runner_error("run permits closed")),
        };

        // TempDir removal on drop covers every exit path below.
        let workspace = match tempfile::Builder::new().prefix("nf_").tempdir() {
            Ok(dir) => dir,
            Err(err) => return Ok(RunOutcome::runner_error(err)),
        };
        if let Err(err) = stage_workspace(workspace.path(), &request, &requirements) {
            return match err {
                StageError::Traversal(name) => Err(SandboxError::InvalidInput(format!(
                    "input file escapes the workspace: {name}"
                ))),
                StageError::Io(err) => Ok(RunOutcome::runner_error(err)),
            };
        }

        let container = container_name();
        tracing::info!(
            container = %container,
            language = %request.language,
            timeout_secs = request.timeout_secs,
            "starting sandboxed run"
        );
        let outcome = self.execute(&request, workspace.path(), &container).await;
        self.remove_container(&container).await;
        tracing::info!(container = %container, exit_code = outcome.exit_code, "run finished");
        Ok(outcome)
    }

    async fn execute(&self, request: &RunRequest, workspace: &Path, container: &str) -> RunOutcome {
        let create_args = self.create_args(request, container);
        let created = match docker(&create_args).await {
            Ok(output) => output,
            Err(err) => return io_outcome(err),
        };
        if !created.status.success() {
            return command_failed(&created, self.settings.max_output_bytes);
        }

        let source = format!("{}/.", workspace.display());
        let target = format!("{container}:/workspace");
        let copied = match docker(&["cp", source.as_str(), target.as_str()]).await {
            Ok(output) => output,
            Err(err) => return io_outcome(err),
        };
        if !copied.status.success() {
            return command_failed(&copied, self.settings.max_output_bytes);
        }

        let wall_clock = Duration::from_secs(request.timeout_secs);
        let attach_args = ["start", "--attach", container];
        let attached = docker(&attach_args);
        let output = match tokio::time::timeout(wall_clock, attached).await {
            Err(_) => return RunOutcome::timed_out(),
            Ok(Err(err)) => return io_outcome(err),
            Ok(Ok(output)) => output,
        };

        RunOutcome {
            exit_code: output.status.code().unwrap_or(1),
            stdout: truncate_output(&output.stdout, self.settings.max_output_bytes),
            stderr: truncate_output(&output.stderr, self.settings.max_output_bytes),
            artifacts: self.collect_artifacts(container).await,
        }
    }

    fn create_args(&self, request: &RunRequest, container: &str) -> Vec<String> {
        let profile = request.language.profile();
        let network = request
            .network
            .clone()
            .unwrap_or_else(|| self.settings.network.clone());

        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            container.into(),
            "--network".into(),
            network,
        ];
        if let Some(memory) = &self.settings.memory_limit {
            args.extend(["--memory".into(), memory.clone()]);
        }
        if let Some(cpus) = &self.settings.cpu_limit {
            args.extend(["--cpus".into(), cpus.clone()]);
        }
        if let Some(pids) = &self.settings.pids_limit {
            args.extend(["--pids-limit".into(), pids.clone()]);
        }
        if let Some(size) = &self.settings.tmpfs_size {
            args.extend(["--tmpfs".into(), format!("/tmp:rw,size={size}")]);
        }
        args.extend(self.settings.extra_flags.iter().cloned());
        if profile.supports_requirements {
            if let Some(cache) = &self.settings.package_cache {
                args.extend([
                    "-v".into(),
                    format!("{}:/root/.cache/pip", cache.display()),
                ]);
            }
        }
        args.extend([
            "--workdir".into(),
            "/workspace".into(),
            profile.resolved_image(),
            "bash".into(),
            "-lc".into(),
            profile.shell_command(),
        ]);
        args
    }

    async fn collect_artifacts(&self, container: &str) -> Option<ArtifactCapture> {
        let out = tempfile::Builder::new().prefix("nf_out_").tempdir().ok()?;
        let destination = out.path().to_string_lossy().to_string();
        let source = format!("{container}:/workspace");
        let copied = docker(&["cp", source.as_str(), destination.as_str()])
            .await
            .ok()?;
        if !copied.status.success() {
            tracing::warn!(container = %container, "workspace copy-back failed");
            return None;
        }
        capture_artifacts(
            &out.path().join("workspace"),
            self.settings.max_artifact_bytes,
        )
    }

    async fn remove_container(&self, container: &str) {
        let removal_args = ["rm", "-f", container];
        let removal = docker(&removal_args);
        if tokio::time::timeout(CLEANUP_TIMEOUT, removal).await.is_err() {
            tracing::warn!(container = %container, "container removal timed out");
        }
    }
}

async fn docker<S: AsRef<str>>(args: &[S]) -> io::Result<std::process::Output> {
    let mut command = Command::new("docker");
    command.kill_on_drop(true);
    for arg in args {
        command.arg(arg.as_ref());
    }
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.output().await
}

fn io_outcome(err: io::Error) -> RunOutcome {
    if err.kind() == io::ErrorKind::NotFound {
        RunOutcome::runtime_unavailable(&err)
    } else {
        RunOutcome::runner_error(err)
    }
}

fn command_failed(output: &std::process::Output, max_output_bytes: usize) -> RunOutcome {
    RunOutcome {
        exit_code: output.status.code().unwrap_or(1),
        stdout: String::new(),
        stderr: truncate_output(&output.stderr, max_output_bytes),
        artifacts: None,
    }
}

fn truncate_output(bytes: &[u8], max_output_bytes: usize) -> String {
    let limit = bytes.len().min(max_output_bytes);
    String::from_utf8_lossy(&bytes[..limit]).into_owned()
}

fn container_name() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("nf_{}", &hex[..12])
}

fn validate(request: &RunRequest) -> Result<Vec<String>, SandboxError> {
    if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&request.timeout_secs) {
        return Err(SandboxError::InvalidInput(format!(
            "timeout must be within [{MIN_TIMEOUT_SECS}, {MAX_TIMEOUT_SECS}] seconds, got {}",
            request.timeout_secs
        )));
    }
    let mut merged = Vec::new();
    for entry in request
        .requirements
        .iter()
        .chain(request.extra_requirements.iter())
    {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            return Err(SandboxError::InvalidInput(
                "requirements entries must be nonempty".into(),
            ));
        }
        if !merged.iter().any(|existing| existing == trimmed) {
            merged.push(trimmed.to_string());
        }
    }
    Ok(merged)
}

#[derive(Debug)]
enum StageError {
    Traversal(String),
    Io(io::Error),
}

impl From<io::Error> for StageError {
    fn from(err: io::Error) -> Self {
        StageError::Io(err)
    }
}

fn stage_workspace(
    workspace: &Path,
    request: &RunRequest,
    requirements: &[String],
) -> Result<(), StageError> {
    let profile = request.language.profile();
    std::fs::write(workspace.join(profile.filename), &request.code)?;

    for (name, bytes) in &request.input_files {
        let relative = safe_relative_path(name).ok_or_else(|| StageError::Traversal(name.clone()))?;
        let destination = workspace.join(relative);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, bytes)?;
    }

    if profile.supports_requirements && !requirements.is_empty() {
        std::fs::write(workspace.join("requirements.txt"), requirements.join("\n"))?;
    }
    Ok(())
}

fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.as_os_str().is_empty() {
        return None;
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path.to_path_buf())
}

/// Minimal shell-style splitter for operator-supplied flag strings.
/// Handles single and double quotes; no escapes beyond that.
fn shell_split(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in raw.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            None => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(timeout: u64) -> RunRequest {
        RunRequest::new(Language::Python, "print('hi')\n", timeout)
    }

    #[test]
    fn validate_rejects_out_of_range_timeouts() {
        assert!(validate(&request(0)).is_err());
        assert!(validate(&request(301)).is_err());
        assert!(validate(&request(1)).is_ok());
        assert!(validate(&request(300)).is_ok());
    }

    #[test]
    fn validate_rejects_blank_requirements() {
        let mut req = request(10);
        req.requirements = vec!["pandas".into(), "   ".into()];
        assert!(matches!(
            validate(&req),
            Err(SandboxError::InvalidInput(_))
        ));
    }

    #[test]
    fn requirements_merge_is_order_preserving_and_deduplicated() {
        let mut req = request(10);
        req.requirements = vec!["pandas".into(), " numpy ".into()];
        req.extra_requirements = vec!["numpy".into(), "pandas".into(), "requests".into()];
        let merged = validate(&req).unwrap();
        assert_eq!(merged, vec!["pandas", "numpy", "requests"]);
    }

    #[test]
    fn container_names_are_prefixed_twelve_hex() {
        let name = container_name();
        assert!(name.starts_with("nf_"));
        let suffix = &name[3..];
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn rejects_path_traversal_in_input_files() {
        assert!(safe_relative_path("../etc/passwd").is_none());
        assert!(safe_relative_path("/etc/passwd").is_none());
        assert!(safe_relative_path("data/../../leak").is_none());
        assert!(safe_relative_path("").is_none());
        assert_eq!(
            safe_relative_path("data/report.pdf").unwrap(),
            PathBuf::from("data/report.pdf")
        );
    }

    #[test]
    fn stage_workspace_writes_code_inputs_and_requirements() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(10);
        req.input_files
            .insert("data/input.csv".into(), b"a,b\n1,2\n".to_vec());
        let staged = stage_workspace(dir.path(), &req, &["pandas".to_string()]);
        assert!(staged.is_ok());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.py")).unwrap(),
            "print('hi')\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("data/input.csv")).unwrap(),
            "a,b\n1,2\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap(),
            "pandas"
        );
    }

    #[test]
    fn stage_workspace_skips_requirements_for_unsupported_language() {
        let dir = tempfile::tempdir().unwrap();
        let req = RunRequest::new(Language::Javascript, "console.log(1)\n", 10);
        stage_workspace(dir.path(), &req, &["left-pad".to_string()]).unwrap();
        assert!(!dir.path().join("requirements.txt").exists());
        assert!(dir.path().join("main.js").exists());
    }

    #[test]
    fn create_args_carry_limits_and_shell_command() {
        let settings = SandboxSettings {
            memory_limit: Some("256m".into()),
            cpu_limit: Some("0.5".into()),
            tmpfs_size: Some("64m".into()),
            package_cache: Some(PathBuf::from("/var/cache/nf-pip")),
            ..SandboxSettings::default()
        };
        let runner = ContainerRunner::new(settings);
        let args = runner.create_args(&request(10), "nf_abc123abc123");

        let joined = args.join(" ");
        assert!(joined.contains("--network none"));
        assert!(joined.contains("--memory 256m"));
        assert!(joined.contains("--cpus 0.5"));
        assert!(joined.contains("--pids-limit 64"));
        assert!(joined.contains("--tmpfs /tmp:rw,size=64m"));
        assert!(joined.contains("-v /var/cache/nf-pip:/root/.cache/pip"));
        assert!(joined.contains("--workdir /workspace"));
        assert_eq!(args.last().unwrap(), &Language::Python.profile().shell_command());
    }

    #[test]
    fn create_args_honor_per_run_network_override() {
        let runner = ContainerRunner::new(SandboxSettings::default());
        let mut req = request(10);
        req.network = Some("bridge".into());
        let args = runner.create_args(&req, "nf_abc123abc123");
        assert!(args.join(" ").contains("--network bridge"));
    }

    #[test]
    fn permit_pool_matches_configured_concurrency() {
        let runner = ContainerRunner::new(SandboxSettings {
            max_concurrency: 2,
            ..SandboxSettings::default()
        });
        assert_eq!(runner.permits.available_permits(), 2);
    }

    #[tokio::test]
    async fn invalid_timeout_never_consumes_a_permit() {
        let runner = ContainerRunner::new(SandboxSettings::default());
        let result = runner.run(request(0)).await;
        assert!(matches!(result, Err(SandboxError::InvalidInput(_))));
        assert_eq!(runner.permits.available_permits(), 4);
    }

    #[test]
    fn shell_split_honors_quotes() {
        assert_eq!(
            shell_split("--cap-drop ALL --label 'nf sandbox'"),
            vec!["--cap-drop", "ALL", "--label", "nf sandbox"]
        );
        assert_eq!(shell_split("  "), Vec::<String>::new());
    }
}
