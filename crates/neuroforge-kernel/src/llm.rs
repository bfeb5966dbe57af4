//! Gemini backend for the generation and repair capabilities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use neuroforge_sandbox::Language;

use crate::agents::{sanitize_completion, CodeGenerator, CodeRepairer, GeneratedProgram};
use crate::error::KernelError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GENERATE_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_REPAIR_MODEL: &str = "gemini-2.5-pro";
const DEFAULT_RETRIES: u32 = 2;

/// Remote LLM client speaking the `generateContent` protocol. One instance
/// serves both capabilities; models differ per call.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    generate_model: String,
    repair_model: String,
    generate_retries: u32,
    repair_retries: u32,
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            generate_model: DEFAULT_GENERATE_MODEL.into(),
            repair_model: DEFAULT_REPAIR_MODEL.into(),
            generate_retries: DEFAULT_RETRIES,
            repair_retries: DEFAULT_RETRIES,
        }
    }

    /// Reads `GEMINI_API_KEY` (required) plus the optional model and retry
    /// overrides `GEMINI_MODEL`, `GEMINI_FIX_MODEL`, `GEN_RETRIES`,
    /// `FIX_RETRIES`.
    pub fn from_env() -> Result<Self, KernelError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| KernelError::Generation("GEMINI_API_KEY is not set".into()))?;
        let mut client = Self::new(api_key);
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            if !model.trim().is_empty() {
                client.generate_model = model;
            }
        }
        if let Ok(model) = std::env::var("GEMINI_FIX_MODEL") {
            if !model.trim().is_empty() {
                client.repair_model = model;
            }
        }
        if let Some(retries) = env_u32("GEN_RETRIES") {
            client.generate_retries = retries;
        }
        if let Some(retries) = env_u32("FIX_RETRIES") {
            client.repair_retries = retries;
        }
        Ok(client)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn generate_content(&self, model: &str, prompt: &str) -> Result<String, KernelError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| KernelError::Generation(err.to_string()))?
            .error_for_status()
            .map_err(|err| KernelError::Generation(err.to_string()))?
            .json::<GeminiResponse>()
            .await
            .map_err(|err| KernelError::Generation(err.to_string()))?;

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .map(|part| part.text)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(KernelError::Generation("empty completion".into()));
        }
        Ok(text)
    }

    /// Classifies the task into a supported language; defaults to Python
    /// when the model is unavailable or noncommittal.
    async fn detect_language(&self, task: &str) -> Language {
        let prompt = format!(
            "You are a language detection assistant.\n\
             The user will describe a coding task. Determine which programming \
             language they are referring to.\n\
             Supported options: Python, JavaScript, C, C++, Java.\n\
             Respond with only the language name in lowercase \
             (e.g. \"python\", \"c\", \"cpp\", \"java\", \"javascript\").\n\n\
             User task:\n{task}"
        );
        match self.generate_content(&self.generate_model, &prompt).await {
            Ok(answer) => parse_detected_language(&answer),
            Err(err) => {
                tracing::warn!(error = %err, "language detection failed, defaulting to python");
                Language::Python
            }
        }
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn parse_detected_language(answer: &str) -> Language {
    let lowered = answer.trim().to_lowercase();
    if lowered.contains("c++") || lowered.contains("cpp") {
        return Language::Cpp;
    }
    for language in [
        Language::Python,
        Language::Javascript,
        Language::Java,
        Language::C,
    ] {
        if lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == language.as_str())
        {
            return language;
        }
    }
    Language::Python
}

fn language_hint(language: Language) -> &'static str {
    match language {
        Language::Python => "Python 3.10+ script (run with `python file.py`)",
        Language::Javascript => "JavaScript for Node.js (use console.log)",
        Language::C => "C program (compile with gcc, standard C11)",
        Language::Cpp => "C++ program (compile with g++, standard C++17)",
        Language::Java => {
            "Java program (public class Main, compile with javac Main.java)"
        }
    }
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    async fn generate(
        &self,
        task: &str,
        language: Option<Language>,
        context: Option<&str>,
    ) -> Result<GeneratedProgram, KernelError> {
        if task.trim().is_empty() {
            return Err(KernelError::InvalidTask("task cannot be empty".into()));
        }
        let language = match language {
            Some(language) => language,
            None => self.detect_language(task).await,
        };

        let mut prompt = format!(
            "Write a {language} program to {task}.\n\
             Rules:\n\
             - Return only executable {language} code (no explanations).\n\
             - Must print or output results to STDOUT.\n\
             - {hint}",
            language = language,
            task = task,
            hint = language_hint(language),
        );
        if let Some(context) = context {
            prompt.push_str("\nContext:\n");
            prompt.push_str(context);
        }

        let mut last_error = KernelError::Generation("no attempts made".into());
        for attempt in 1..=self.generate_retries.max(1) {
            match self.generate_content(&self.generate_model, &prompt).await {
                Ok(raw) => {
                    let code = sanitize_completion(&raw);
                    if code.is_empty() {
                        last_error = KernelError::Generation("empty code returned".into());
                        continue;
                    }
                    tracing::info!(%language, "code generation succeeded");
                    return Ok(GeneratedProgram { code, language });
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "generation attempt failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl CodeRepairer for GeminiClient {
    async fn repair(
        &self,
        code: &str,
        error: &str,
        language: Language,
        context: Option<&str>,
    ) -> Result<String, KernelError> {
        if code.is_empty() || error.is_empty() {
            return Err(KernelError::Repair("code and error are required".into()));
        }
        let mut prompt = format!(
            "You are an assistant that fixes {language} programs.\n\
             The user will provide the original script and the runtime error. \
             Provide only corrected, runnable code with minimal changes.\n\
             Constraints:\n\
             - Do not add network or filesystem calls unless necessary.\n\
             - Avoid use of dangerous system calls.\n\n\
             Original code:\n{code}\n\n\
             Runtime error / traceback:\n{error}"
        );
        if language == Language::Java {
            prompt.push_str(
                "\nEnsure the public class is named Main (public class Main { ... }).",
            );
        }
        if let Some(context) = context {
            prompt.push_str("\n\nContext:\n");
            prompt.push_str(context);
        }

        let mut last_error = KernelError::Repair("no attempts made".into());
        for attempt in 1..=self.repair_retries.max(1) {
            match self.generate_content(&self.repair_model, &prompt).await {
                Ok(raw) => {
                    let fixed = sanitize_completion(&raw);
                    if fixed.is_empty() {
                        last_error = KernelError::Repair("empty fix returned".into());
                        continue;
                    }
                    tracing::info!(attempt, %language, "repair attempt succeeded");
                    return Ok(fixed);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "repair attempt failed");
                    last_error = KernelError::Repair(err.to_string());
                }
            }
        }
        Err(last_error)
    }
}
