// SPDX-License-Identifier: MIT OR Apache-2.0
//! C2: nearest-neighbor embedding index over a user's verified examples
//!

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod mem;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use xpn_core::ExpenseEmbedding;
use xpn_error::ExpenseError;

/// Text truncation ceiling applied before embedding
pub const MAX_EMBED_CHARS: usize = 500;

/// Default cosine-similarity threshold for [`VectorIndex::top_k`],
/// `EMBED_SIMILARITY_THRESHOLD`.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.92;

/// The external embedding model, a process-wide singleton in production
/// Absence of a configured embedder is represented by not
/// wiring one into [`VectorIndex::new`] — [`VectorIndex::embed`] then
/// fails with [`ExpenseError::ServiceUnavailable`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Computes the embedding vector for `text`. Callers are
    /// responsible for truncation; implementations may assume `text` is
    /// already within the deployment's accepted length.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExpenseError>;
}

/// Storage seam C2 is built against.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Persists a new embedding row, returning it with its assigned id.
    async fn insert(&self, embedding: ExpenseEmbedding) -> Result<ExpenseEmbedding, ExpenseError>;

    /// All embeddings owned by `user_id`. `xpn-db` pushes the cosine
    /// distance computation into Postgres via `pgvector`; the in-memory
    /// implementation here does the comparison in [`VectorIndex::top_k`]
    /// after fetching the full set.
    async fn by_user(&self, user_id: Uuid) -> Result<Vec<ExpenseEmbedding>, ExpenseError>;

    /// Deletes rows with `expires_at < now`, returning the count
    /// removed. Verified rows (`expires_at == None`) are never matched.
    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64, ExpenseError>;
}

/// A scored nearest-neighbor hit (`top_k`).
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    /// The matched embedding row.
    pub embedding: ExpenseEmbedding,
    /// Cosine similarity in `[-1, 1]`, in practice `[0, 1]` for
    /// non-negative embedding spaces.
    pub cosine_similarity: f64,
}

/// C2's public operations, parameterized over a [`EmbeddingStore`] and
/// an optional [`Embedder`].
pub struct VectorIndex<S: EmbeddingStore> {
    store: S,
    embedder: Option<Box<dyn Embedder>>,
}

impl<S: EmbeddingStore> VectorIndex<S> {
    /// Wraps a store with no embedder configured; [`Self::embed`] and
    /// [`Self::insert_verified`] will fail until [`Self::with_embedder`]
    /// is used instead.
    pub fn new(store: S) -> Self {
        Self {
            store,
            embedder: None,
        }
    }

    /// Wraps a store with an embedder configured.
    pub fn with_embedder(store: S, embedder: Box<dyn Embedder>) -> Self {
        Self {
            store,
            embedder: Some(embedder),
        }
    }

    /// `embed(text) -> vector`: truncates `text` to
    /// [`MAX_EMBED_CHARS`] characters and delegates to the configured
    /// embedder.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::ServiceUnavailable`] if no embedder is
    /// configured, or the embedder's own error.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ExpenseError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| ExpenseError::ServiceUnavailable {
                service: "embedder",
                message: "no embedder configured".to_string(),
            })?;
        let truncated: String = text.chars().take(MAX_EMBED_CHARS).collect();
        embedder.embed(&truncated).await
    }

    /// `top_k(vector, user_id, k, threshold) -> [entry...]`:
    /// entries with `cosine_similarity >= threshold`, ordered by
    /// descending similarity, truncated to `k`.
    ///
    /// Never returns an error: a failure to read the store is logged
    /// and treated as "no hit" ("failure of `top_k` is
    /// non-fatal").
    pub async fn top_k(
        &self,
        vector: &[f32],
        user_id: Uuid,
        k: usize,
        threshold: f64,
    ) -> Vec<SimilarityMatch> {
        let candidates = match self.store.by_user(user_id).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, %user_id, "top_k store read failed, treating as no hit");
                return Vec::new();
            }
        };

        let mut scored: Vec<SimilarityMatch> = candidates
            .into_iter()
            .filter_map(|embedding| {
                let sim = cosine_similarity(vector, &embedding.embedding)?;
                (sim >= threshold).then_some(SimilarityMatch {
                    embedding,
                    cosine_similarity: sim,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.cosine_similarity
                .partial_cmp(&a.cosine_similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }

    /// `insert_verified(text, gl_code, department, user_id,
    /// transaction_id, vendor_normalized?)`: embeds `text`
    /// and persists it with `verified = true, expires_at = None`.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::embed`]'s or the store's error.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_verified(
        &self,
        text: &str,
        gl_code: Option<String>,
        department: Option<String>,
        user_id: Uuid,
        transaction_id: Option<Uuid>,
        vendor_normalized: Option<String>,
    ) -> Result<ExpenseEmbedding, ExpenseError> {
        let vector = self.embed(text).await?;
        let row = ExpenseEmbedding {
            id: Uuid::new_v4(),
            user_id,
            transaction_id,
            description_text: text.to_string(),
            vendor_normalized,
            embedding: vector,
            gl_code,
            department,
            verified: true,
            expires_at: None,
        };
        self.store.insert(row).await
    }

    /// `purge_stale(now)`: deletes entries where
    /// `expires_at < now`. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> Result<u64, ExpenseError> {
        self.store.delete_expired_before(now).await
    }
}

/// `None` if the vectors differ in dimension or either has zero
/// magnitude (no defined direction to compare).
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::InMemoryEmbeddingStore;
    use chrono::Duration;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ExpenseError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_mismatched_dimension_is_none() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
    }

    #[tokio::test]
    async fn embed_without_configured_embedder_is_service_unavailable() {
        let idx = VectorIndex::new(InMemoryEmbeddingStore::default());
        let err = idx.embed("hello").await.unwrap_err();
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn embed_truncates_before_delegating() {
        let long = "x".repeat(1000);
        let idx = VectorIndex::with_embedder(
            InMemoryEmbeddingStore::default(),
            Box::new(FixedEmbedder(vec![1.0])),
        );
        // FixedEmbedder ignores its input, so this only exercises that
        // embed() doesn't itself fail on long input.
        idx.embed(&long).await.unwrap();
    }

    #[tokio::test]
    async fn top_k_filters_by_threshold_and_orders_descending() {
        let store = InMemoryEmbeddingStore::default();
        let idx = VectorIndex::with_embedder(store, Box::new(FixedEmbedder(vec![1.0, 0.0])));
        let user_id = Uuid::new_v4();

        idx.insert_verified("close match", None, None, user_id, None, None)
            .await
            .unwrap();

        let hits = idx.top_k(&[1.0, 0.0], user_id, 5, 0.92).await;
        assert_eq!(hits.len(), 1);
        assert!((hits[0].cosine_similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn top_k_excludes_rows_below_threshold() {
        let store = InMemoryEmbeddingStore::default();
        let idx = VectorIndex::with_embedder(store, Box::new(FixedEmbedder(vec![0.0, 1.0])));
        let user_id = Uuid::new_v4();
        idx.insert_verified("orthogonal", None, None, user_id, None, None)
            .await
            .unwrap();

        let hits = idx.top_k(&[1.0, 0.0], user_id, 5, 0.92).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn top_k_truncates_to_k() {
        let store = InMemoryEmbeddingStore::default();
        let idx = VectorIndex::with_embedder(store, Box::new(FixedEmbedder(vec![1.0, 0.0])));
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            idx.insert_verified("dup", None, None, user_id, None, None)
                .await
                .unwrap();
        }

        let hits = idx.top_k(&[1.0, 0.0], user_id, 2, 0.5).await;
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn insert_verified_rows_have_no_expiry() {
        let store = InMemoryEmbeddingStore::default();
        let idx = VectorIndex::with_embedder(store, Box::new(FixedEmbedder(vec![1.0])));
        let row = idx
            .insert_verified("text", Some("5000".into()), None, Uuid::new_v4(), None, None)
            .await
            .unwrap();
        assert!(row.verified);
        assert!(row.expires_at.is_none());
    }

    #[tokio::test]
    async fn purge_stale_only_removes_expired_unverified_rows() {
        let store = InMemoryEmbeddingStore::default();
        let user_id = Uuid::new_v4();
        store
            .insert(ExpenseEmbedding {
                id: Uuid::new_v4(),
                user_id,
                transaction_id: None,
                description_text: "old".into(),
                vendor_normalized: None,
                embedding: vec![1.0],
                gl_code: None,
                department: None,
                verified: false,
                expires_at: Some(Utc::now() - Duration::days(1)),
            })
            .await
            .unwrap();

        let idx = VectorIndex::new(store);
        let removed = idx.purge_stale(Utc::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(idx.top_k(&[1.0], user_id, 5, 0.0).await.is_empty());
    }
}
