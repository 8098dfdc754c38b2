//! OpenAI-compatible HTTP completion client.
//!
//! Talks to any endpoint that accepts `POST {base}/completions` with
//! `{model, prompt, temperature, max_tokens, response_format?}` and answers
//! `{choices: [{text}]}`, plus `POST {base}/embeddings` for vectors. Covers
//! hosted OpenAI-style gateways and local inference servers alike.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::vulnscope::client::{
    CompletionClient, CompletionError, CompletionRequest, CompletionResponse, EmbeddingClient,
    ResponseFormat,
};

/// Reqwest-backed [`CompletionClient`] and [`EmbeddingClient`].
///
/// # Example
///
/// ```rust,no_run
/// use vulnscope::clients::HttpCompletionClient;
///
/// let client = HttpCompletionClient::new(
///     "https://api.openai.com/v1",
///     std::env::var("OPENAI_API_KEY").unwrap(),
/// )
/// .with_default_model("gpt-4o");
/// ```
pub struct HttpCompletionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    embedding_model: String,
}

impl HttpCompletionClient {
    /// Create a client against the given API base URL.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }

    /// Override the default completion model (builder pattern).
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Override the embedding model (builder pattern).
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct WireCompletion {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireEmbeddingRow {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    data: Vec<WireEmbeddingRow>,
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if let Some(ResponseFormat::Json) = request.response_format {
            body["response_format"] = json!({"type": "json"});
        }

        let response = self
            .http
            .post(format!("{}/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CompletionError::new(format!(
                "completion endpoint returned {}: {}",
                status, detail
            )));
        }

        let wire: WireCompletion = response.json().await?;
        Ok(CompletionResponse {
            choices: wire
                .choices
                .into_iter()
                .map(|c| crate::vulnscope::client::CompletionChoice { text: c.text })
                .collect(),
        })
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[async_trait]
impl EmbeddingClient for HttpCompletionClient {
    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, CompletionError> {
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.embedding_model,
                "input": text,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CompletionError::new(format!(
                "embedding endpoint returned {}: {}",
                status, detail
            )));
        }

        let wire: WireEmbedding = response.json().await?;
        wire.data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| CompletionError::new("embedding endpoint returned no vectors"))
    }
}
