//! Postgres-backed [`HashIndexStore`] (C1).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use xpn_core::NormalizedTextCache;
use xpn_error::ExpenseError;
use xpn_hash_index::HashIndexStore;

use crate::session::{map_sqlx_err, DbSession};

#[derive(sqlx::FromRow)]
struct CacheRow {
    hash: String,
    raw_text: String,
    canonical_text: String,
    hit_count: i64,
    last_accessed_at: DateTime<Utc>,
}

impl From<CacheRow> for NormalizedTextCache {
    fn from(row: CacheRow) -> Self {
        NormalizedTextCache {
            hash: row.hash,
            raw_text: row.raw_text,
            canonical_text: row.canonical_text,
            hit_count: row.hit_count.max(0) as u64,
            last_accessed_at: row.last_accessed_at,
        }
    }
}

/// `normalized_text_cache` table.
pub struct PgHashIndexStore {
    session: DbSession,
}

impl PgHashIndexStore {
    /// Wraps a session.
    pub fn new(session: DbSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HashIndexStore for PgHashIndexStore {
    async fn get(&self, hash: &str) -> Result<Option<NormalizedTextCache>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: Option<CacheRow> = sqlx::query_as(
            "SELECT hash, raw_text, canonical_text, hit_count, last_accessed_at
             FROM normalized_text_cache WHERE hash = $1",
        )
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(row.map(Into::into))
    }

    async fn upsert(
        &self,
        hash: &str,
        raw_text: &str,
        canonical_text: &str,
    ) -> Result<(), ExpenseError> {
        let mut conn = self.session.lock().await;
        sqlx::query(
            "INSERT INTO normalized_text_cache (hash, raw_text, canonical_text, hit_count, last_accessed_at)
             VALUES ($1, $2, $3, 0, now())
             ON CONFLICT (hash) DO UPDATE SET canonical_text = EXCLUDED.canonical_text",
        )
        .bind(hash)
        .bind(raw_text)
        .bind(canonical_text)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn record_hit(&self, hash: &str) -> Result<(), ExpenseError> {
        let mut conn = self.session.lock().await;
        sqlx::query(
            "UPDATE normalized_text_cache
             SET hit_count = hit_count + 1, last_accessed_at = now()
             WHERE hash = $1",
        )
        .bind(hash)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}
