//! In-memory [`EmbeddingStore`] used by unit tests across the workspace.

use crate::EmbeddingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use xpn_core::ExpenseEmbedding;
use xpn_error::ExpenseError;

/// A `Mutex`-guarded `Vec` implementation of [`EmbeddingStore`]. Scores
/// every row on every `top_k` call — `xpn-db` pushes the nearest-neighbor
/// search into Postgres via `pgvector` instead. `Clone`-able, sharing its
/// backing `Vec` between every clone, so one store can back multiple
/// owned [`crate::VectorIndex`] wrappers in tests.
#[derive(Clone, Default)]
pub struct InMemoryEmbeddingStore {
    rows: Arc<Mutex<Vec<ExpenseEmbedding>>>,
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn insert(&self, embedding: ExpenseEmbedding) -> Result<ExpenseEmbedding, ExpenseError> {
        self.rows.lock().unwrap().push(embedding.clone());
        Ok(embedding)
    }

    async fn by_user(&self, user_id: Uuid) -> Result<Vec<ExpenseEmbedding>, ExpenseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64, ExpenseError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|e| !matches!(e.expires_at, Some(exp) if exp < now));
        Ok((before - rows.len()) as u64)
    }
}
