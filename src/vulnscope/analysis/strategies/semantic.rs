//! LLM semantic analysis strategy.
//!
//! Sends (truncated) file content to the completion service for a deeper
//! reading than regexes allow. When an embedding client is available the
//! prompt is enriched with the most similar vulnerability pattern
//! descriptions from the graph (cosine similarity over stored pattern
//! embeddings).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};
use crate::vulnscope::analysis::strategies::{AnalysisOptions, AnalysisStrategy};
use crate::vulnscope::client::{CompletionClient, CompletionRequest, EmbeddingClient};
use crate::vulnscope::graph::GraphStore;

const MAX_CONTENT_CHARS: usize = 8000;

/// AI-model-driven detection of security issues.
pub struct SemanticAnalysisStrategy {
    graph: Arc<dyn GraphStore>,
    client: Arc<dyn CompletionClient>,
    embeddings: Option<Arc<dyn EmbeddingClient>>,
    model: String,
}

impl SemanticAnalysisStrategy {
    pub fn new(graph: Arc<dyn GraphStore>, client: Arc<dyn CompletionClient>) -> Self {
        let model = client.default_model().to_string();
        Self {
            graph,
            client,
            embeddings: None,
            model,
        }
    }

    /// Enable pattern-similarity context (builder pattern).
    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingClient>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    /// Override the completion model (builder pattern).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Descriptions of the stored patterns most similar to the content.
    async fn similar_pattern_context(&self, content: &str) -> String {
        let Some(embeddings) = &self.embeddings else {
            return String::new();
        };
        let embedding = match embeddings.get_embedding(content).await {
            Ok(embedding) => embedding,
            Err(err) => {
                log::warn!("embedding lookup failed: {}", err);
                return String::new();
            }
        };

        let rows = match self
            .graph
            .run_query(
                "MATCH (p:VulnerabilityPattern) \
                 WHERE p.embedding IS NOT NULL \
                 WITH p, gds.similarity.cosine(p.embedding, $embedding) AS similarity \
                 WHERE similarity > 0.7 \
                 RETURN p.name as name, p.description as description, similarity \
                 ORDER BY similarity DESC LIMIT 5",
                json!({"embedding": embedding}),
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                log::warn!("pattern similarity query failed: {}", err);
                return String::new();
            }
        };

        rows.iter()
            .filter_map(|row| {
                let name = row.get("name")?.as_str()?;
                let description = row.get("description")?.as_str()?;
                Some(format!("- {}: {}", name, description))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl AnalysisStrategy for SemanticAnalysisStrategy {
    fn name(&self) -> &'static str {
        "semantic_analysis"
    }

    async fn analyze(
        &self,
        file_id: i64,
        content: &str,
        language: &str,
        _options: &AnalysisOptions,
    ) -> Vec<Finding> {
        log::debug!("semantic analysis for file {}", file_id);

        let truncated = if content.len() > MAX_CONTENT_CHARS {
            let mut end = MAX_CONTENT_CHARS;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}\n... (truncated)", &content[..end])
        } else {
            content.to_string()
        };

        let pattern_context = self.similar_pattern_context(&truncated).await;

        let prompt = format!(
            "Analyze this {language} code for security vulnerabilities:\n\n\
             ```{language}\n{code}\n```\n\n\
             Potentially relevant vulnerability patterns:\n{context}\n\n\
             Return a JSON array of objects with fields: vulnerability_type, description, \
             line_number, severity (Low, Medium, or High), confidence (0 to 1), and suggestion. \
             Only report actual security issues; return [] when there are none.",
            language = language,
            code = truncated,
            context = if pattern_context.is_empty() {
                "No specific patterns identified.".to_string()
            } else {
                pattern_context
            },
        );

        let request = CompletionRequest::new(prompt, &self.model)
            .with_temperature(0.1)
            .expecting_json();
        let response = match self.client.create_completion(request).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("semantic analysis completion failed: {}", err);
                return Vec::new();
            }
        };

        let parsed: Vec<Value> = match serde_json::from_str::<Value>(response.text().trim()) {
            Ok(Value::Array(items)) => items,
            Ok(_) => {
                log::error!("semantic analysis returned a non-array JSON value");
                Vec::new()
            }
            Err(err) => {
                log::error!("failed to parse semantic analysis result: {}", err);
                Vec::new()
            }
        };

        let findings: Vec<Finding> = parsed
            .iter()
            .map(|item| {
                let mut finding = Finding::new(
                    DetectionKind::Semantic,
                    item.get("vulnerability_type")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown"),
                    item.get("description").and_then(Value::as_str).unwrap_or(""),
                    file_id,
                    item.get("line_number").and_then(Value::as_u64).unwrap_or(0) as u32,
                )
                .with_severity(
                    item.get("severity")
                        .and_then(Value::as_str)
                        .and_then(Severity::parse)
                        .unwrap_or(Severity::Medium),
                )
                .with_confidence(item.get("confidence").and_then(Value::as_f64).unwrap_or(0.5));
                if let Some(suggestion) = item.get("suggestion").and_then(Value::as_str) {
                    if !suggestion.is_empty() {
                        finding = finding.with_suggestion(suggestion);
                    }
                }
                finding
            })
            .collect();

        log::debug!(
            "semantic analysis complete for file {}: {} findings",
            file_id,
            findings.len()
        );
        findings
    }
}
