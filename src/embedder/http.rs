//! HTTP client for a remote embedding service.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

use super::Embedder;

/// Configuration for the remote embedder client.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Service base URL
    pub base_url: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Model name for query-text embeddings
    pub text_model: String,
    /// Model name for HTML embeddings
    pub html_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl EmbedderConfig {
    /// Create a configuration for the given base URL with default models.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            text_model: "minilm-l6-v2".to_string(),
            html_model: "markuplm-base".to_string(),
            timeout_secs: 30,
        }
    }

    /// Set the bearer token.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the text model name.
    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    /// Set the HTML model name.
    pub fn with_html_model(mut self, model: impl Into<String>) -> Self {
        self.html_model = model.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Embedder backed by an HTTP embedding service.
pub struct HttpEmbedder {
    config: EmbedderConfig,
    http: Client,
}

// Service API types
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    error: ServiceErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorDetail {
    message: String,
}

impl HttpEmbedder {
    /// Create a client from configuration.
    pub fn new(config: EmbedderConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    async fn embed_batch(&self, model: &str, input: &[String]) -> Result<Vec<Vec<f32>>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.config.base_url.trim_end_matches('/'));
        let request = EmbeddingRequest { model, input };

        let mut builder = self.http.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::embedder(model, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ServiceError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(Error::embedder(model, format!("{status}: {message}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::embedder(model, format!("invalid response body: {e}")))?;

        if parsed.data.len() != input.len() {
            return Err(Error::embedder(
                model,
                format!(
                    "service returned {} vectors for {} inputs",
                    parsed.data.len(),
                    input.len()
                ),
            ));
        }

        Ok(parsed.data.into_iter().map(|r| r.embedding).collect())
    }

    async fn embed_one(&self, model: &str, content: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(model, &[content.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::embedder(model, "empty response"))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(&self.config.text_model, text).await
    }

    async fn embed_text_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(&self.config.text_model, texts).await
    }

    async fn embed_html(&self, html: &str) -> Result<Vec<f32>> {
        self.embed_one(&self.config.html_model, html).await
    }

    async fn embed_html_batch(&self, htmls: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(&self.config.html_model, htmls).await
    }

    fn text_model_name(&self) -> &str {
        &self.config.text_model
    }

    fn html_model_name(&self) -> &str {
        &self.config.html_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EmbedderConfig::new("http://localhost:8080/")
            .with_api_key("secret")
            .with_text_model("mini-test")
            .with_timeout(5);

        assert_eq!(config.base_url, "http://localhost:8080/");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.text_model, "mini-test");
        assert_eq!(config.html_model, "markuplm-base");
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn test_client_construction() {
        let embedder = HttpEmbedder::new(EmbedderConfig::new("http://localhost:9000")).unwrap();
        assert_eq!(embedder.text_model_name(), "minilm-l6-v2");
        assert_eq!(embedder.html_model_name(), "markuplm-base");
    }
}
