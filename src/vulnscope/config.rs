//! Engine configuration.
//!
//! [`EngineConfig`] is the full recognized option surface. It is a plain
//! serde-deserializable struct with sensible defaults; hosts construct it
//! manually or load it from whatever format they prefer and hand it to the
//! components that need it. No config-file parsing is built in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// # Example
///
/// ```rust
/// use vulnscope::config::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(
///     r#"{"analysis": {"max_concurrency": 4}}"#,
/// ).unwrap();
/// assert_eq!(config.analysis.max_concurrency, Some(4));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analysis: AnalysisSettings,
    pub codeql: CodeQlSettings,
    /// External tool definitions keyed by tool name.
    pub tools: HashMap<String, ToolSettings>,
    pub summarization: SummarizationSettings,
}

/// Options of the parallel analysis orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Permit count of the analysis semaphore. Defaults to the host CPU
    /// count when absent.
    pub max_concurrency: Option<usize>,
}

/// CodeQL binary and query locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeQlSettings {
    /// Path to the `codeql` binary. Falls back to a PATH lookup.
    pub path: Option<String>,
    /// Directory holding custom query files.
    pub queries_dir: Option<String>,
}

/// One configured external analysis tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Base command to run.
    pub command: String,
    /// Name of the output parser to use (`bandit`, `eslint`, `semgrep`,
    /// `flawfinder`, `pmd`, `spotbugs`, `gosec`, or `generic`).
    pub parser: Option<String>,
    /// Language the tool supports; absent means every language.
    pub language: Option<String>,
    /// Command used to probe whether the tool is installed.
    pub version_command: Option<String>,
    /// Where to find installation instructions.
    pub installation_url: Option<String>,
    /// Short description.
    pub description: Option<String>,
    /// Extra command-line arguments, in order.
    pub args: Vec<String>,
}

/// Prompts and model for code summarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationSettings {
    pub prompts: SummarizationPrompts,
    /// Model used when the caller does not pick one.
    pub default_model: String,
}

impl Default for SummarizationSettings {
    fn default() -> Self {
        Self {
            prompts: SummarizationPrompts::default(),
            default_model: "gpt-4o".to_string(),
        }
    }
}

/// Per-level summarization prompt templates. The literal `{code}` marker is
/// replaced with the code under summarization; `{language}` with its
/// language.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationPrompts {
    pub function: String,
    pub class: String,
    pub module: String,
    /// System framing prepended to every summarization prompt.
    pub system: String,
}

impl Default for SummarizationPrompts {
    fn default() -> Self {
        Self {
            function: "Summarize the purpose, inputs, outputs, and security-relevant behavior of this {language} function:\n\n{code}".to_string(),
            class: "Summarize the responsibility, collaborators, and security-relevant behavior of this {language} class:\n\n{code}".to_string(),
            module: "Summarize the role and security-relevant behavior of this {language} module:\n\n{code}".to_string(),
            system: "You are a precise code summarization assistant. Respond with a single JSON object.".to_string(),
        }
    }
}
