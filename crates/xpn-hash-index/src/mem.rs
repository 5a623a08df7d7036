//! In-memory [`HashIndexStore`] used by unit tests across the workspace.

use crate::HashIndexStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use xpn_core::NormalizedTextCache;
use xpn_error::ExpenseError;

/// A `Mutex`-guarded `HashMap` implementation of [`HashIndexStore`].
///
/// Not for production use — `xpn-db` provides the durable Postgres-backed
/// implementation — but gives every crate in the workspace a real,
/// spec-correct store to exercise without a database.
#[derive(Default)]
pub struct InMemoryHashIndexStore {
    rows: Mutex<HashMap<String, NormalizedTextCache>>,
}

#[async_trait]
impl HashIndexStore for InMemoryHashIndexStore {
    async fn get(&self, hash: &str) -> Result<Option<NormalizedTextCache>, ExpenseError> {
        Ok(self.rows.lock().unwrap().get(hash).cloned())
    }

    async fn upsert(
        &self,
        hash: &str,
        raw_text: &str,
        canonical_text: &str,
    ) -> Result<(), ExpenseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(hash) {
            Some(existing) => {
                existing.canonical_text = canonical_text.to_string();
            }
            None => {
                rows.insert(
                    hash.to_string(),
                    NormalizedTextCache {
                        hash: hash.to_string(),
                        raw_text: raw_text.to_string(),
                        canonical_text: canonical_text.to_string(),
                        hit_count: 0,
                        last_accessed_at: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn record_hit(&self, hash: &str) -> Result<(), ExpenseError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(hash) {
            row.hit_count += 1;
            row.last_accessed_at = Utc::now();
        }
        Ok(())
    }
}
