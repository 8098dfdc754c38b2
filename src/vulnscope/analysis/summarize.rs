//! Code summarization.
//!
//! Produces structured summaries of functions, classes, or modules through
//! the completion client, using the prompt templates from
//! [`SummarizationSettings`](crate::config::SummarizationSettings). Parse
//! failures degrade to a minimal summary, never an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::vulnscope::client::{CompletionClient, CompletionRequest};
use crate::vulnscope::config::SummarizationSettings;

/// Granularity of a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLevel {
    Function,
    Class,
    Module,
}

impl SummaryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Module => "module",
        }
    }
}

/// Structured summary of one code unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSummary {
    pub name: String,
    pub summary: String,
    pub component_type: String,
    pub complexity: i64,
    #[serde(default)]
    pub responsible_for: Vec<String>,
    #[serde(default)]
    pub input_types: Vec<String>,
    #[serde(default)]
    pub output_types: Vec<String>,
    #[serde(default)]
    pub security_considerations: Vec<String>,
}

impl CodeSummary {
    fn fallback(level: SummaryLevel) -> Self {
        Self {
            name: "unknown".to_string(),
            summary: "Summary generation failed".to_string(),
            component_type: level.as_str().to_string(),
            complexity: 0,
            responsible_for: Vec::new(),
            input_types: Vec::new(),
            output_types: Vec::new(),
            security_considerations: Vec::new(),
        }
    }
}

/// Summarizes code through the completion client.
pub struct CodeSummarizer {
    client: Arc<dyn CompletionClient>,
    settings: SummarizationSettings,
}

impl CodeSummarizer {
    pub fn new(client: Arc<dyn CompletionClient>, settings: SummarizationSettings) -> Self {
        Self { client, settings }
    }

    /// Summarize one code unit at the requested level.
    pub async fn summarize(&self, code: &str, language: &str, level: SummaryLevel) -> CodeSummary {
        let template = match level {
            SummaryLevel::Function => &self.settings.prompts.function,
            SummaryLevel::Class => &self.settings.prompts.class,
            SummaryLevel::Module => &self.settings.prompts.module,
        };
        let prompt = format!(
            "{}\n\n{}\n\nReturn a JSON object with fields: name, summary, component_type, \
             complexity (integer), responsible_for, input_types, output_types, \
             security_considerations (all arrays of strings).",
            self.settings.prompts.system,
            template
                .replace("{code}", code)
                .replace("{language}", language),
        );

        let request = CompletionRequest::new(prompt, &self.settings.default_model)
            .with_temperature(0.1)
            .expecting_json();
        let response = match self.client.create_completion(request).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("summarization completion failed: {}", err);
                return CodeSummary::fallback(level);
            }
        };

        match serde_json::from_str::<Value>(response.text().trim())
            .ok()
            .and_then(|value| serde_json::from_value::<CodeSummary>(value).ok())
        {
            Some(mut summary) => {
                if summary.component_type.is_empty() {
                    summary.component_type = level.as_str().to_string();
                }
                summary
            }
            None => {
                log::error!("failed to parse code summary");
                CodeSummary::fallback(level)
            }
        }
    }
}
