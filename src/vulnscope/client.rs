//! Provider-agnostic LLM service contracts.
//!
//! The engine talks to exactly one completion surface: prompt in, text (or
//! JSON) out, shaped as `{choices: [{text}]}`. [`CompletionClient`] abstracts
//! the provider; [`EmbeddingClient`] is the optional vector surface used only
//! by the semantic analysis strategy.
//!
//! Implementations must be thread-safe (`Send + Sync`) so one client can be
//! shared across agents and analysis tasks. A reqwest-backed implementation
//! lives in [`crate::clients::http`]; tests use pure in-process mocks.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Response shaping hint forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Ask the provider to return a single JSON value.
    Json,
}

/// A completion request.
///
/// # Example
///
/// ```rust
/// use vulnscope::client::CompletionRequest;
///
/// let request = CompletionRequest::new("Summarize this code", "gpt-4o")
///     .with_temperature(0.2)
///     .with_max_tokens(1500)
///     .expecting_json();
/// assert!(request.response_format.is_some());
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// The full prompt text.
    pub prompt: String,
    /// Provider model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token budget.
    pub max_tokens: u32,
    /// Optional response shaping (JSON).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl CompletionRequest {
    /// Create a request with the default temperature (0.2) and a 2000 token
    /// budget.
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: 2000,
            response_format: None,
        }
    }

    /// Override the sampling temperature (builder pattern).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the completion token budget (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Demand a JSON response (builder pattern).
    pub fn expecting_json(mut self) -> Self {
        self.response_format = Some(ResponseFormat::Json);
        self
    }
}

/// One completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    /// The generated text.
    pub text: String,
}

/// A completion response, `{choices: [{text}]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,
}

impl CompletionResponse {
    /// Build a single-choice response. Test and mock convenience.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![CompletionChoice { text: text.into() }],
        }
    }

    /// Text of the first choice, or the empty string when there is none.
    pub fn text(&self) -> &str {
        self.choices.first().map(|c| c.text.as_str()).unwrap_or("")
    }
}

/// Error raised by completion and embedding calls.
#[derive(Debug)]
pub struct CompletionError {
    message: String,
}

impl CompletionError {
    /// Wrap an error description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "completion error: {}", self.message)
    }
}

impl Error for CompletionError {}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        CompletionError::new(err.to_string())
    }
}

/// Trait-driven abstraction for the LLM completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one completion round-trip.
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;

    /// Default model identifier for callers that do not pick one.
    fn default_model(&self) -> &str {
        "gpt-4o"
    }
}

/// Optional vector embedding surface, used only by the semantic strategy.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed one text into a vector.
    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, CompletionError>;
}
