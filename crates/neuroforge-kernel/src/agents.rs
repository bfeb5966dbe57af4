//! Code generation and repair capabilities.
//!
//! Both are string-in/string-out seams: any backend (remote API, local
//! model, test stub) satisfies them. The kernel never assumes more than
//! "given a task, produce source" and "given source plus an error,
//! produce repaired source".

use async_trait::async_trait;

use neuroforge_sandbox::Language;

use crate::error::KernelError;

#[derive(Clone, Debug)]
pub struct GeneratedProgram {
    pub code: String,
    pub language: Language,
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Writes a program for `task`. `language` pins the target language when
    /// the caller already knows it; `context` is priming text assembled from
    /// memory and may be woven into the prompt.
    async fn generate(
        &self,
        task: &str,
        language: Option<Language>,
        context: Option<&str>,
    ) -> Result<GeneratedProgram, KernelError>;
}

#[async_trait]
pub trait CodeRepairer: Send + Sync {
    /// Produces a corrected variant of `code` given the observed error.
    async fn repair(
        &self,
        code: &str,
        error: &str,
        language: Language,
        context: Option<&str>,
    ) -> Result<String, KernelError>;
}

const LANGUAGE_TOKENS: &[&str] = &["python", "c", "cpp", "c++", "javascript", "java"];

/// Normalizes an LLM completion into plain source: strips a UTF-8 BOM,
/// leading lines that are bare language tokens, and fenced-code markers on
/// either end. Idempotent, so callers may sanitize defensively.
pub fn sanitize_completion(raw: &str) -> String {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw).trim();
    let mut lines: Vec<&str> = text.lines().collect();

    while let Some(first) = lines.first() {
        let trimmed = first.trim();
        let is_fence = trimmed.starts_with("```");
        let is_token = LANGUAGE_TOKENS
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token));
        if is_fence || is_token {
            lines.remove(0);
        } else {
            break;
        }
    }
    while let Some(last) = lines.last() {
        if last.trim().starts_with("```") {
            lines.pop();
        } else {
            break;
        }
    }
    lines.join("\n").trim().to_string()
}
