//! Token estimation and sub-batch splitting.
//!
//! Provider batch calls are bounded by an item count and a token budget;
//! both limits are provider-specific configuration, not contract.

use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

/// Token counter backed by tiktoken, with a character heuristic fallback
/// when the encoder cannot be constructed.
pub struct TokenEstimator {
    bpe: Option<CoreBPE>,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        let bpe = match cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(error = %e, "Tokenizer unavailable, falling back to char estimate");
                None
            }
        };
        Self { bpe }
    }

    /// Estimated token count for one text.
    pub fn estimate(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            // ~4 chars per token is the usual English approximation
            None => text.len().div_ceil(4),
        }
    }

    /// Estimated token count across texts.
    pub fn estimate_many(&self, texts: &[String]) -> usize {
        texts.iter().map(|t| self.estimate(t)).sum()
    }
}

/// Split texts into provider-sized sub-batches.
///
/// Greedy in input order, so concatenating the chunks reproduces the input
/// exactly; a single text over the token budget still gets its own chunk
/// (the provider, not the splitter, decides whether to reject it).
pub fn split_batches(
    texts: &[String],
    estimator: &TokenEstimator,
    max_items: usize,
    max_tokens: usize,
) -> Vec<Vec<String>> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for text in texts {
        let tokens = estimator.estimate(text);
        let over_items = current.len() >= max_items;
        let over_tokens = !current.is_empty() && current_tokens + tokens > max_tokens;

        if over_items || over_tokens {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }

        current_tokens += tokens;
        current.push(text.clone());
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("document number {}", i)).collect()
    }

    #[test]
    fn test_estimate_nonzero_for_text() {
        let est = TokenEstimator::new();
        assert!(est.estimate("hello world") > 0);
        assert_eq!(est.estimate(""), 0);
    }

    #[test]
    fn test_split_respects_item_cap() {
        let est = TokenEstimator::new();
        let chunks = split_batches(&texts(10), &est, 4, usize::MAX);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 4);
        assert_eq!(chunks[2].len(), 2);
    }

    #[test]
    fn test_split_preserves_order() {
        let est = TokenEstimator::new();
        let input = texts(7);
        let chunks = split_batches(&input, &est, 3, usize::MAX);
        let flattened: Vec<String> = chunks.into_iter().flatten().collect();
        assert_eq!(flattened, input);
    }

    #[test]
    fn test_split_respects_token_budget() {
        let est = TokenEstimator::new();
        let input = texts(6);
        let per_text = est.estimate(&input[0]);
        // Budget for roughly two texts per chunk
        let chunks = split_batches(&input, &est, 100, per_text * 2);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(est.estimate_many(chunk) <= per_text * 2);
        }
    }

    #[test]
    fn test_oversized_text_gets_own_chunk() {
        let est = TokenEstimator::new();
        let input = vec![
            "short".to_string(),
            "long ".repeat(100).trim().to_string(),
            "tiny".to_string(),
        ];
        let chunks = split_batches(&input, &est, 10, 20);
        // Oversized middle text is isolated, not dropped
        let flattened: Vec<String> = chunks.iter().flatten().cloned().collect();
        assert_eq!(flattened, input);
        assert!(chunks.iter().any(|c| c.len() == 1 && c[0].starts_with("long")));
    }

    #[test]
    fn test_empty_input_no_chunks() {
        let est = TokenEstimator::new();
        assert!(split_batches(&[], &est, 4, 100).is_empty());
    }
}
