//! Embedding generation and the vector-index interface.
//!
//! The default embedder is a deterministic feature-hashing model: tokens hash
//! into a fixed-dimension signed bag, L2-normalized. It keeps the core fully
//! local and testable; a learned model slots in behind the same trait.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::RecordStore;

const DEFAULT_DIMENSION: usize = 384;

/// Text-to-vector capability.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic local embedder (feature hashing).
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        hash_embed(text, self.dimension)
    }
}

fn hash_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut vec = vec![0.0_f32; dimension];
    let mut seen = 0usize;

    for token in text.split_whitespace() {
        let token = token.trim().to_lowercase();
        if token.is_empty() {
            continue;
        }
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let hash = hasher.finish();
        let idx = (hash as usize) % dimension;
        let sign = if (hash & 1) == 0 { 1.0 } else { -1.0 };
        vec[idx] += sign;
        seen += 1;
    }

    if seen == 0 {
        return vec;
    }

    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vec {
            *value /= norm;
        }
    }

    vec
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (va, vb) in a.iter().zip(b.iter()) {
        dot += va * vb;
        norm_a += va * va;
        norm_b += vb * vb;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// One similarity-search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub source_type: String,
}

/// Similarity search scoped to one user's records.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn similarity_search(
        &self,
        user_id: &str,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, StoreError>;
}

/// Brute-force index over the in-memory store's embedded records.
pub struct MemoryVectorIndex {
    store: std::sync::Arc<crate::store::MemoryStore>,
}

impl MemoryVectorIndex {
    pub fn new(store: std::sync::Arc<crate::store::MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn similarity_search(
        &self,
        user_id: &str,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let mut hits: Vec<SearchHit> = self
            .store
            .embedded_records(user_id)
            .into_iter()
            .filter_map(|record| {
                let vector = record.embedding.as_ref()?;
                let score = cosine_similarity(embedding, vector);
                if score < threshold {
                    return None;
                }
                let item = record.to_context_item(Some(score));
                Some(SearchHit {
                    id: item.id,
                    score,
                    text: item.text,
                    source_type: item.source_type,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }
}

/// Embed a user's text-bearing records that have no embedding yet.
///
/// Runs fire-and-forget after a sync pass. Per-record store failures are
/// logged and skipped; the pass never fails the sync that spawned it.
pub async fn backfill_user_embeddings(
    store: &dyn RecordStore,
    embedder: &dyn Embedder,
    user_id: &str,
    batch_size: usize,
) -> Result<usize, StoreError> {
    let pending = store.records_missing_embeddings(user_id, batch_size).await?;
    if pending.is_empty() {
        return Ok(0);
    }

    log::info!(
        "Generating embeddings for {} record(s) (user {})",
        pending.len(),
        user_id
    );

    let mut updated = 0usize;
    for record in pending {
        let Some(text) = record.payload.embedding_text() else {
            continue;
        };
        let embedding = embedder.embed(&text);
        match store.set_embedding(&record.key(), embedding).await {
            Ok(()) => updated += 1,
            Err(e) => {
                log::warn!(
                    "Embedding write failed for {} ({}): {}",
                    record.payload.source_id(),
                    user_id,
                    e
                );
            }
        }
    }

    Ok(updated)
}
