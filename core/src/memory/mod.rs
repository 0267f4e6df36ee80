//! Semantic memory: a narrow `search`/`log` leaf. The orchestration core
//! only ever goes through the `SemanticMemory` trait here — the real
//! embedding-backed vector store this is meant to front is treated as an
//! external collaborator, so this module ships a small, genuinely-working
//! in-process implementation plus the LRU cache that sits in front of every
//! embedding call.

pub mod cache;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::llm::LlmClient;

pub use cache::EmbeddingCache;

/// Default capacity of the embedding cache every `CachedSemanticMemory`
/// starts with.
const DEFAULT_CACHE_CAPACITY: usize = 50;

#[async_trait]
pub trait SemanticMemory: Send + Sync {
    /// Returns up to `limit` previously logged entries most relevant to
    /// `query`, most relevant first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>>;

    /// Records a fact or interaction summary for later retrieval.
    async fn log(&self, entry: &str) -> Result<()>;
}

struct Entry {
    text: String,
    embedding: Vec<f32>,
}

/// In-process semantic memory: embeds every logged entry through the Model
/// Gateway (caching embeddings in a small LRU) and searches by cosine
/// similarity. Falls back to a case-insensitive substring match if the
/// embedding call itself fails, so a misconfigured embedding model degrades
/// memory quality rather than breaking the turn.
pub struct CachedSemanticMemory {
    llm: Arc<LlmClient>,
    embed_model: String,
    cache: EmbeddingCache,
    entries: Mutex<Vec<Entry>>,
}

impl CachedSemanticMemory {
    pub fn new(llm: Arc<LlmClient>, embed_model: impl Into<String>) -> Self {
        Self {
            llm,
            embed_model: embed_model.into(),
            cache: EmbeddingCache::new(DEFAULT_CACHE_CAPACITY),
            entries: Mutex::new(Vec::new()),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(cached);
        }
        let embedding = self.llm.embed(&self.embed_model, text).await?;
        self.cache.put(text, embedding.clone());
        Ok(embedding)
    }

    fn substring_fallback(&self, query: &str, limit: usize) -> Vec<String> {
        let needle = query.to_lowercase();
        self.entries
            .lock()
            .iter()
            .filter(|e| e.text.to_lowercase().contains(&needle))
            .take(limit)
            .map(|e| e.text.clone())
            .collect()
    }
}

#[async_trait]
impl SemanticMemory for CachedSemanticMemory {
    async fn log(&self, entry: &str) -> Result<()> {
        let embedding = self.embed(entry).await?;
        self.entries.lock().push(Entry {
            text: entry.to_string(),
            embedding,
        });
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let query_embedding = match self.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "semantic memory embedding failed, falling back to substring match");
                return Ok(self.substring_fallback(query, limit));
            }
        };

        let entries = self.entries.lock();
        let mut scored: Vec<(f32, &str)> = entries
            .iter()
            .map(|e| (cosine_similarity(&query_embedding, &e.embedding), e.text.as_str()))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, text)| text.to_string()).collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, LlmProvider, ModelSpec};

    fn memory_with_no_models() -> CachedSemanticMemory {
        let llm = Arc::new(LlmClient::new(vec![ModelSpec {
            id: "embed-model".to_string(),
            provider: LlmProvider::OpenAiCompatible,
            base_url: "http://127.0.0.1:0".to_string(),
            api_key: None,
        }]));
        CachedSemanticMemory::new(llm, "embed-model")
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn search_falls_back_to_substring_match_when_embedding_fails() {
        let memory = memory_with_no_models();
        memory.entries.lock().push(Entry {
            text: "the sky is blue".to_string(),
            embedding: vec![],
        });
        memory.entries.lock().push(Entry {
            text: "coffee tastes bitter".to_string(),
            embedding: vec![],
        });

        let results = memory.search("sky", 5).await.unwrap();
        assert_eq!(results, vec!["the sky is blue".to_string()]);
    }
}
