//! Typed facade over the embedding + index capabilities.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::records::{sanitize_metadata, Metadata, MemoryMatch, Namespace, Primitive};
use crate::MemoryError;

/// Text fed to the encoder is clipped to this many bytes.
const EMBED_TEXT_LIMIT: usize = 8192;
/// Code slice kept alongside a fix record for context.
const FIX_CODE_SLICE: usize = 2048;

/// Facade the orchestrator talks to. Wrappers never mutate existing
/// records; every upsert mints a fresh id.
pub struct MemoryAdapter {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl MemoryAdapter {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Embeds `embed_text` (clipped) and stores it with sanitized metadata
    /// under a fresh opaque id.
    pub async fn upsert(
        &self,
        namespace: Namespace,
        embed_text: &str,
        metadata: Metadata,
    ) -> Result<String, MemoryError> {
        let id = uuid::Uuid::new_v4().to_string();
        let clipped = truncate_utf8(embed_text, EMBED_TEXT_LIMIT);
        let vectors = self.embedder.embed(&[clipped.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::Embedding("encoder returned no vectors".into()))?;
        self.index
            .upsert(namespace, &id, &vector, &metadata)
            .await?;
        Ok(id)
    }

    pub async fn query(
        &self,
        namespace: Namespace,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        let clipped = truncate_utf8(text, EMBED_TEXT_LIMIT);
        let vectors = self.embedder.embed(&[clipped.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::Embedding("encoder returned no vectors".into()))?;
        self.index.query(namespace, &vector, top_k).await
    }

    /// Stores a historically-successful program. The code itself rides in the
    /// metadata (clipped) so later retrievals can prime generation with it.
    pub async fn add_tool(
        &self,
        name: Option<&str>,
        language: &str,
        code: &str,
        extra: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<String, MemoryError> {
        let mut metadata = sanitize_metadata(extra.unwrap_or_default());
        metadata.insert("language".into(), Primitive::Str(language.into()));
        if let Some(name) = name {
            metadata.insert("name".into(), Primitive::Str(name.into()));
        }
        metadata.insert(
            "created_at".into(),
            Primitive::Str(Utc::now().to_rfc3339()),
        );
        metadata.insert(
            "code".into(),
            Primitive::Str(truncate_utf8(code, EMBED_TEXT_LIMIT).to_string()),
        );
        let embed_text = format!(
            "{}\n{}",
            name.unwrap_or_default(),
            truncate_utf8(code, EMBED_TEXT_LIMIT)
        );
        self.upsert(Namespace::Tools, &embed_text, metadata).await
    }

    /// Similarity hits re-ranked to favor proven and recent tools:
    /// `score + 0.2 * success_count + 0.05` when a creation stamp exists.
    pub async fn retrieve_tools(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        let mut matches = self.query(Namespace::Tools, query, top_k * 2).await?;
        matches.sort_by(|a, b| tool_rank(b).total_cmp(&tool_rank(a)));
        matches.truncate(top_k);
        Ok(matches)
    }

    pub async fn add_error(
        &self,
        error_text: &str,
        stderr: Option<&str>,
        context: Option<&str>,
    ) -> Result<String, MemoryError> {
        let mut metadata = Metadata::new();
        if let Some(stderr) = stderr {
            metadata.insert("stderr".into(), Primitive::Str(stderr.into()));
        }
        if let Some(context) = context {
            metadata.insert("context".into(), Primitive::Str(context.into()));
        }
        metadata.insert(
            "created_at".into(),
            Primitive::Str(Utc::now().to_rfc3339()),
        );
        let embed_text = format!("{}\n{}", error_text, context.unwrap_or_default());
        self.upsert(Namespace::Errors, &embed_text, metadata).await
    }

    pub async fn retrieve_similar_errors(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        self.query(Namespace::Errors, query, top_k).await
    }

    /// Associates a normalized error signature with the repaired source.
    /// The record is advisory: it raises confidence on later hits but is not
    /// a durable code store.
    pub async fn add_fix(
        &self,
        error_signature: &str,
        language: &str,
        fixed_code: &str,
        extra: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<String, MemoryError> {
        let mut metadata = sanitize_metadata(extra.unwrap_or_default());
        metadata.insert("language".into(), Primitive::Str(language.into()));
        metadata.insert(
            "error_signature".into(),
            Primitive::Str(error_signature.into()),
        );
        metadata.insert(
            "created_at".into(),
            Primitive::Str(Utc::now().to_rfc3339()),
        );
        let embed_text = format!(
            "{}\n{}",
            error_signature,
            truncate_utf8(fixed_code, FIX_CODE_SLICE)
        );
        self.upsert(Namespace::Fixes, &embed_text, metadata).await
    }

    pub async fn retrieve_fixes(
        &self,
        signature_or_text: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        self.query(Namespace::Fixes, signature_or_text, top_k).await
    }

    pub async fn add_doc(&self, title: &str, content: &str) -> Result<String, MemoryError> {
        let mut metadata = Metadata::new();
        metadata.insert("title".into(), Primitive::Str(title.into()));
        metadata.insert(
            "content".into(),
            Primitive::Str(truncate_utf8(content, EMBED_TEXT_LIMIT).to_string()),
        );
        metadata.insert(
            "created_at".into(),
            Primitive::Str(Utc::now().to_rfc3339()),
        );
        let embed_text = format!("{}\n{}", title, truncate_utf8(content, EMBED_TEXT_LIMIT));
        self.upsert(Namespace::Docs, &embed_text, metadata).await
    }

    pub async fn retrieve_docs(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        self.query(Namespace::Docs, query, top_k).await
    }

    pub async fn add_pattern(&self, name: &str, content: &str) -> Result<String, MemoryError> {
        let mut metadata = Metadata::new();
        metadata.insert("name".into(), Primitive::Str(name.into()));
        metadata.insert(
            "created_at".into(),
            Primitive::Str(Utc::now().to_rfc3339()),
        );
        self.upsert(
            Namespace::Patterns,
            truncate_utf8(content, EMBED_TEXT_LIMIT),
            metadata,
        )
        .await
    }

    pub async fn retrieve_patterns(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        self.query(Namespace::Patterns, query, top_k).await
    }
}

fn tool_rank(entry: &MemoryMatch) -> f64 {
    let success = entry
        .metadata
        .get("success_count")
        .and_then(Primitive::as_f64)
        .unwrap_or(1.0);
    let recency_bonus = if entry.metadata.contains_key("created_at") {
        0.05
    } else {
        0.0
    };
    f64::from(entry.score) + 0.2 * success + recency_bonus
}

/// Byte-limited clip that never splits a UTF-8 sequence.
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Convenience metadata used when promoting a freshly-successful program.
pub fn auto_promote_metadata() -> serde_json::Map<String, serde_json::Value> {
    let serde_json::Value::Object(map) = json!({
        "source": "auto_promote",
        "success_count": 1,
    }) else {
        unreachable!()
    };
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::index::InMemoryIndex;

    fn adapter() -> MemoryAdapter {
        MemoryAdapter::new(Arc::new(HashingEmbedder), Arc::new(InMemoryIndex::new()))
    }

    #[tokio::test]
    async fn add_tool_stamps_standard_metadata() {
        let memory = adapter();
        memory
            .add_tool(
                Some("csv-summarizer"),
                "python",
                "import csv\nprint('ok')\n",
                Some(auto_promote_metadata()),
            )
            .await
            .unwrap();

        let matches = memory.retrieve_tools("summarize a csv", 4).await.unwrap();
        assert_eq!(matches.len(), 1);
        let metadata = &matches[0].metadata;
        assert_eq!(metadata.get("language"), Some(&Primitive::Str("python".into())));
        assert_eq!(metadata.get("name"), Some(&Primitive::Str("csv-summarizer".into())));
        assert_eq!(metadata.get("success_count"), Some(&Primitive::Int(1)));
        assert!(metadata.contains_key("created_at"));
        assert!(metadata
            .get("code")
            .and_then(Primitive::as_str)
            .unwrap()
            .contains("import csv"));
    }

    #[tokio::test]
    async fn tool_rerank_prefers_higher_success_count() {
        let memory = adapter();
        memory
            .add_tool(Some("plain"), "python", "print('a')", None)
            .await
            .unwrap();
        let mut proven = auto_promote_metadata();
        proven.insert("success_count".into(), serde_json::json!(10));
        memory
            .add_tool(Some("proven"), "python", "print('a')", Some(proven))
            .await
            .unwrap();

        let matches = memory.retrieve_tools("print('a')", 2).await.unwrap();
        assert_eq!(
            matches[0].metadata.get("name"),
            Some(&Primitive::Str("proven".into()))
        );
    }

    #[tokio::test]
    async fn fixes_are_found_by_signature() {
        let memory = adapter();
        let signature = "3f786850e387550fdab836ed7e6dc881de23001b";
        memory
            .add_fix(signature, "python", "print('fixed')\n", None)
            .await
            .unwrap();

        let matches = memory.retrieve_fixes(signature, 2).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(
            matches[0].metadata.get("error_signature"),
            Some(&Primitive::Str(signature.into()))
        );
    }

    #[tokio::test]
    async fn errors_embed_with_context() {
        let memory = adapter();
        memory
            .add_error(
                "NameError: name 'x' is not defined",
                Some("Traceback ..."),
                Some("print(x)"),
            )
            .await
            .unwrap();
        let matches = memory
            .retrieve_similar_errors("NameError: name 'x' is not defined", 4)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(
            matches[0].metadata.get("context"),
            Some(&Primitive::Str("print(x)".into()))
        );
    }

    #[test]
    fn truncate_utf8_respects_char_boundaries() {
        let text = "héllo";
        let clipped = truncate_utf8(text, 2);
        assert_eq!(clipped, "h");
        assert_eq!(truncate_utf8("abc", 16), "abc");
    }
}
