//! OpenAI-compatible embeddings client.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use async_trait::async_trait;
use embed_types::{Embedding, ProviderSettings};

use crate::error::ProviderError;
use crate::provider::EmbeddingProvider;

/// Configuration for the OpenAI-compatible client.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API base URL (e.g., "https://api.openai.com/v1")
    pub base_url: String,

    /// Embedding model (e.g., "text-embedding-3-small")
    pub model: String,

    /// Expected embedding dimension
    pub dimension: usize,

    /// API key; None leaves the client unconfigured
    pub api_key: Option<SecretString>,

    /// Request timeout
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Create config for the public OpenAI API.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            dimension,
            api_key: Some(SecretString::from(api_key.into())),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build config from settings, resolving the API key from the
    /// configured environment variable.
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: settings.model.clone(),
            dimension: settings.dimension,
            api_key: std::env::var(&settings.api_key_env)
                .ok()
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// OpenAI-compatible embeddings client.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiEmbedder {
    /// Create a new client.
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Make a single embeddings request for the given texts.
    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError> {
        #[derive(Serialize)]
        struct EmbeddingsRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct EmbeddingsResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::NotConfigured("missing API key".to_string()))?;

        let request = EmbeddingsRequest {
            model: &self.config.model,
            input: texts,
        };

        let url = format!("{}/embeddings", self.config.base_url);
        debug!(count = texts.len(), model = %self.config.model, "Requesting embeddings");

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Auth(body));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let response_body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if response_body.data.len() != texts.len() {
            return Err(ProviderError::Parse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response_body.data.len()
            )));
        }

        let mut data = response_body.data;
        data.sort_by_key(|d| d.index);

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            if item.embedding.len() != self.config.dimension {
                return Err(ProviderError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: item.embedding.len(),
                });
            }
            embeddings.push(Embedding::new(item.embedding));
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn id(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        let texts = [text.to_string()];
        let mut embeddings = self.request_embeddings(&texts).await?;
        embeddings
            .pop()
            .ok_or_else(|| ProviderError::Parse("empty response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OpenAiConfig::new("test-key", "text-embedding-3-small", 1536);
        assert!(config.base_url.contains("openai"));
        assert_eq!(config.dimension, 1536);
    }

    #[test]
    fn test_unconfigured_without_key() {
        let config = OpenAiConfig {
            api_key: None,
            ..OpenAiConfig::new("", "text-embedding-3-small", 1536)
        };
        let embedder = OpenAiEmbedder::new(config).unwrap();
        assert!(!embedder.is_configured());
    }

    #[tokio::test]
    async fn test_embed_without_key_fails_immediately() {
        let config = OpenAiConfig {
            api_key: None,
            ..OpenAiConfig::new("", "text-embedding-3-small", 1536)
        };
        let embedder = OpenAiEmbedder::new(config).unwrap();
        let result = embedder.embed("hello").await;
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn test_from_settings_resolves_env_key() {
        let settings = ProviderSettings {
            api_key_env: "OPENAI_TEST_KEY_UNSET_VAR".to_string(),
            ..Default::default()
        };
        let config = OpenAiConfig::from_settings(&settings);
        assert!(config.api_key.is_none());
        assert_eq!(config.model, "text-embedding-3-small");
    }
}
