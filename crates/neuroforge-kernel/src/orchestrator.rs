//! The write → execute → repair state machine.
//!
//! Sequential within one task; distinct tasks run on separate spawns and
//! share only the memory adapter and the sandbox admission semaphore.
//! Memory writes always happen after the observation that motivated them:
//! tools after a confirmed success, errors after a confirmed failure,
//! fixes after a repair has been authored.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use neuroforge_memory::{auto_promote_metadata, MemoryAdapter, Primitive};
use neuroforge_sandbox::Language;

use crate::agents::{sanitize_completion, CodeGenerator, CodeRepairer};
use crate::error::KernelError;
use crate::inference::{
    extract_missing_inputs, infer_python_requirements, is_heavy_distribution,
    map_import_to_distribution,
};
use crate::runner_client::ProgramRunner;
use crate::signature::error_signature;
use crate::state::{AttemptState, RunPayload, RunResult, Task, TaskOutcome, MAX_STATE_TIMEOUT_SECS};

const TOOL_PRIMING_TOP_K: usize = 5;
const DOC_PRIMING_TOP_K: usize = 5;
const FIX_LOOKUP_TOP_K: usize = 2;
const ERROR_LOOKUP_TOP_K: usize = 4;

static MISSING_MODULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"No module named '([A-Za-z_][\w.]*)'").expect("missing module pattern")
});

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_attempts: u32,
    /// Infer and pre-install Python requirements from imports.
    pub auto_requirements: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            auto_requirements: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Write,
    Execute,
    Repair,
    Done,
}

pub struct Orchestrator {
    generator: Arc<dyn CodeGenerator>,
    repairer: Arc<dyn CodeRepairer>,
    runner: Arc<dyn ProgramRunner>,
    memory: Arc<MemoryAdapter>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        repairer: Arc<dyn CodeRepairer>,
        runner: Arc<dyn ProgramRunner>,
        memory: Arc<MemoryAdapter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            generator,
            repairer,
            runner,
            memory,
            config,
        }
    }

    /// Drives one task to completion. The attempt state is owned here for
    /// the whole run and carried through the transitions by value.
    pub async fn run_task(&self, task: Task) -> Result<TaskOutcome, KernelError> {
        if task.task_text.trim().is_empty() {
            return Err(KernelError::InvalidTask("task text cannot be empty".into()));
        }
        let mut state = AttemptState::new(&task);
        let mut fatal: Option<String> = None;
        let mut phase = Phase::Write;
        loop {
            phase = match phase {
                Phase::Write => match self.write(&mut state).await {
                    Ok(()) => Phase::Execute,
                    Err(err) => {
                        tracing::error!(error = %err, "generation failed, run is fatal");
                        fatal = Some(err.to_string());
                        Phase::Done
                    }
                },
                Phase::Execute => self.execute(&mut state).await,
                Phase::Repair => match self.repair(&mut state).await {
                    Ok(next) => next,
                    Err(err) => {
                        tracing::error!(error = %err, "repair failed, run is fatal");
                        fatal = Some(err.to_string());
                        Phase::Done
                    }
                },
                Phase::Done => break,
            };
        }
        Ok(finish(state, fatal))
    }

    async fn write(&self, state: &mut AttemptState) -> Result<(), KernelError> {
        let context = self.priming_context(&state.task_text).await;
        let generated = self
            .generator
            .generate(&state.task_text, state.language, context.as_deref())
            .await?;
        let code = sanitize_completion(&generated.code);
        if code.is_empty() {
            return Err(KernelError::Generation("generator returned empty code".into()));
        }
        state.code = code;
        state.language = Some(generated.language);
        state.attempts += 1;
        tracing::info!(
            attempt = state.attempts,
            language = %generated.language,
            "wrote candidate program"
        );
        Ok(())
    }

    async fn execute(&self, state: &mut AttemptState) -> Phase {
        let Some(language) = state.language else {
            state.error_text = Some("no language selected".into());
            state.last_result = Some(RunResult::failure(1, "no language selected"));
            return Phase::Done;
        };

        let inferred = if language == Language::Python && self.config.auto_requirements {
            infer_python_requirements(&state.code)
        } else {
            Vec::new()
        };
        let heavy = inferred.iter().any(|dist| is_heavy_distribution(dist));
        let floor = 30 + if inferred.is_empty() { 0 } else { 20 } + if heavy { 20 } else { 0 };
        let mut timeout = state.timeout.max(floor);
        state.timeout = timeout;

        let mut requirements = inferred;
        let mut auto_install_done = false;

        loop {
            let payload = RunPayload {
                language,
                code: state.code.clone(),
                timeout,
                requirements: requirements.clone(),
                extra_requirements: Vec::new(),
                network: None,
                input_files: state.input_files.clone(),
            };
            tracing::info!(attempt = state.attempts, timeout, "executing candidate");
            let result = match self.runner.run(payload).await {
                Ok(result) => result,
                Err(err) => {
                    // Infrastructure fault: surface verbatim, never retried.
                    tracing::error!(error = %err, "runner infrastructure failure");
                    let message = err.to_string();
                    state.error_text = Some(message.clone());
                    state.last_result = Some(RunResult::failure(1, message));
                    return Phase::Done;
                }
            };

            if result.exit_code == 0 {
                tracing::info!(attempt = state.attempts, "execution succeeded");
                state.error_text = None;
                state.error_signature = None;
                state.last_result = Some(result);
                self.promote_tool(state, language).await;
                return Phase::Done;
            }

            let missing_inputs = result
                .inputs_required
                .clone()
                .filter(|names| !names.is_empty())
                .unwrap_or_else(|| extract_missing_inputs(&result.stderr));
            if !missing_inputs.is_empty() {
                tracing::info!(?missing_inputs, "run needs caller-supplied inputs");
                state.inputs_required = Some(missing_inputs);
                state.error_text = Some(result.stderr.clone());
                state.last_result = Some(result);
                return Phase::Done;
            }

            let missing_modules = if language == Language::Python {
                extract_missing_modules(&result.stderr)
            } else {
                Vec::new()
            };
            if !missing_modules.is_empty() && !auto_install_done {
                auto_install_done = true;
                if self.similar_error_known(&result.stderr).await {
                    tracing::info!(
                        "missing-module failure matches a remembered error, skipping install retry"
                    );
                } else {
                    for module in &missing_modules {
                        let distribution = map_import_to_distribution(module);
                        if !requirements.contains(&distribution) {
                            requirements.push(distribution);
                        }
                    }
                    timeout = (timeout.max(60) + 60).min(MAX_STATE_TIMEOUT_SECS);
                    state.timeout = timeout;
                    tracing::info!(?requirements, timeout, "retrying with inferred installs");
                    continue;
                }
            }

            let stderr = result.stderr.clone();
            state.error_text = Some(stderr.clone());
            state.error_signature = Some(error_signature(&stderr));
            state.last_result = Some(result);
            if let Err(err) = self
                .memory
                .add_error(&stderr, Some(&stderr), Some(&state.code))
                .await
            {
                tracing::warn!(error = %err, "failed to persist error record");
            }
            return Phase::Repair;
        }
    }

    async fn repair(&self, state: &mut AttemptState) -> Result<Phase, KernelError> {
        if state.attempts >= self.config.max_attempts {
            tracing::info!(attempts = state.attempts, "attempt budget exhausted");
            return Ok(Phase::Done);
        }
        let Some(language) = state.language else {
            return Ok(Phase::Done);
        };
        let error_text = state.error_text.clone().unwrap_or_default();
        if state.error_signature.is_none() {
            state.error_signature = Some(error_signature(&error_text));
        }
        let signature = state
            .error_signature
            .clone()
            .unwrap_or_default();

        // Prior fixes are advisory: a hit raises confidence but cannot
        // replay code, so the repairer always authors the actual fix.
        let mut fix_hits = self.lookup_fixes(&signature).await;
        if fix_hits == 0 {
            fix_hits = self.lookup_fixes(&error_text).await;
        }
        if fix_hits > 0 {
            tracing::info!(hits = fix_hits, "this failure has been repaired before");
        }

        let context = self.priming_context(&state.task_text).await;
        let repaired = self
            .repairer
            .repair(&state.code, &error_text, language, context.as_deref())
            .await?;
        let repaired = sanitize_completion(&repaired);
        if repaired.is_empty() {
            return Err(KernelError::Repair("repairer returned empty code".into()));
        }
        state.code = repaired;

        if let Err(err) = self
            .memory
            .add_fix(&signature, language.as_str(), &state.code, None)
            .await
        {
            tracing::warn!(error = %err, "failed to persist fix record");
        }

        state.timeout = (state.timeout + 30).clamp(60, MAX_STATE_TIMEOUT_SECS);
        state.attempts += 1;
        tracing::info!(
            attempt = state.attempts,
            timeout = state.timeout,
            "repair authored, re-executing"
        );
        Ok(Phase::Execute)
    }

    /// Priming text for the generator/repairer: remembered tool code and
    /// doc snippets relevant to the task. Failures degrade to no context.
    async fn priming_context(&self, query: &str) -> Option<String> {
        let tools = match self.memory.retrieve_tools(query, TOOL_PRIMING_TOP_K).await {
            Ok(matches) => matches,
            Err(err) => {
                tracing::warn!(error = %err, "tool retrieval failed");
                Vec::new()
            }
        };
        let docs = match self.memory.retrieve_docs(query, DOC_PRIMING_TOP_K).await {
            Ok(matches) => matches,
            Err(err) => {
                tracing::warn!(error = %err, "doc retrieval failed");
                Vec::new()
            }
        };

        let mut snippets = Vec::new();
        for tool in &tools {
            if let Some(code) = tool.metadata.get("code").and_then(Primitive::as_str) {
                snippets.push(code.to_string());
            }
        }
        for doc in &docs {
            let title = doc
                .metadata
                .get("title")
                .and_then(Primitive::as_str)
                .unwrap_or_default();
            let content = doc
                .metadata
                .get("content")
                .and_then(Primitive::as_str)
                .unwrap_or_default();
            if !title.is_empty() || !content.is_empty() {
                snippets.push(format!("{title}\n{content}"));
            }
        }
        if snippets.is_empty() {
            None
        } else {
            Some(snippets.join("\n\n"))
        }
    }

    async fn similar_error_known(&self, stderr: &str) -> bool {
        match self
            .memory
            .retrieve_similar_errors(stderr, ERROR_LOOKUP_TOP_K)
            .await
        {
            Ok(hits) => !hits.is_empty(),
            Err(err) => {
                tracing::warn!(error = %err, "error lookup failed");
                false
            }
        }
    }

    async fn lookup_fixes(&self, query: &str) -> usize {
        match self.memory.retrieve_fixes(query, FIX_LOOKUP_TOP_K).await {
            Ok(hits) => hits.len(),
            Err(err) => {
                tracing::warn!(error = %err, "fix lookup failed");
                0
            }
        }
    }

    async fn promote_tool(&self, state: &AttemptState, language: Language) {
        if let Err(err) = self
            .memory
            .add_tool(
                None,
                language.as_str(),
                &state.code,
                Some(auto_promote_metadata()),
            )
            .await
        {
            tracing::warn!(error = %err, "tool promotion failed");
        }
    }
}

/// Every mentioned module, in order of first mention.
fn extract_missing_modules(stderr: &str) -> Vec<String> {
    let mut modules = Vec::new();
    for capture in MISSING_MODULE.captures_iter(stderr) {
        let root = capture[1].split('.').next().unwrap_or(&capture[1]).to_string();
        if !modules.contains(&root) {
            modules.push(root);
        }
    }
    modules
}

fn finish(state: AttemptState, fatal: Option<String>) -> TaskOutcome {
    let language = state.language.map(|lang| lang.as_str().to_string());
    if let Some(message) = fatal {
        return TaskOutcome {
            language,
            attempts: state.attempts,
            stdout: String::new(),
            stderr: message,
            returncode: 1,
            inputs_required: None,
        };
    }
    match state.last_result {
        Some(result) => TaskOutcome {
            language,
            attempts: state.attempts,
            stdout: result.stdout,
            stderr: result.stderr,
            returncode: result.exit_code,
            inputs_required: state.inputs_required,
        },
        None => TaskOutcome {
            language,
            attempts: state.attempts,
            stdout: String::new(),
            stderr: state.error_text.unwrap_or_default(),
            returncode: 1,
            inputs_required: None,
        },
    }
}
