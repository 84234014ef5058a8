//! Voyage AI embeddings client.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use async_trait::async_trait;
use embed_types::{Embedding, ProviderSettings};

use crate::error::ProviderError;
use crate::provider::EmbeddingProvider;

/// Configuration for the Voyage AI client.
#[derive(Debug, Clone)]
pub struct VoyageConfig {
    /// API base URL (e.g., "https://api.voyageai.com/v1")
    pub base_url: String,

    /// Embedding model (e.g., "voyage-3")
    pub model: String,

    /// Expected embedding dimension
    pub dimension: usize,

    /// API key; None leaves the client unconfigured
    pub api_key: Option<SecretString>,

    /// Request timeout
    pub timeout: Duration,
}

impl VoyageConfig {
    /// Create config for the public Voyage API.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: "https://api.voyageai.com/v1".to_string(),
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
                .unwrap_or_else(|| "https://api.voyageai.com/v1".to_string()),
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

/// Voyage AI embeddings client.
pub struct VoyageEmbedder {
    client: Client,
    config: VoyageConfig,
}

impl VoyageEmbedder {
    /// Create a new client.
    pub fn new(config: VoyageConfig) -> Result<Self, ProviderError> {
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
            input_type: &'a str,
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
            input_type: "document",
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
impl EmbeddingProvider for VoyageEmbedder {
    fn id(&self) -> &str {
        "voyage"
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
