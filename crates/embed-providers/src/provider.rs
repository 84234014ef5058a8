//! Embedding provider capability.

use async_trait::async_trait;
use embed_types::Embedding;

use crate::error::ProviderError;

/// A remote embedding provider.
///
/// Implementations differ only in endpoint, auth, and request shaping; the
/// engine never depends on anything beyond the vector and its length.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable provider identity ("openai", "voyage"), part of cache keys.
    fn id(&self) -> &str;

    /// Model identifier, part of cache keys.
    fn model(&self) -> &str;

    /// Dimension of the vectors this provider produces.
    fn dimension(&self) -> usize;

    /// Whether the provider has the configuration it needs to make calls.
    fn is_configured(&self) -> bool;

    /// Generate one embedding.
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError>;

    /// Generate embeddings for several texts in one round-trip.
    ///
    /// The returned vector has the same length and order as `texts`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError>;
}
