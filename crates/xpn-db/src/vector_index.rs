//! Postgres-backed [`EmbeddingStore`] (C2), using `pgvector` for the
//! embedding column and pushing the nearest-neighbor scan into SQL
//! where `xpn-vector-index`'s in-memory store has to do it in Rust.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use uuid::Uuid;
use xpn_core::ExpenseEmbedding;
use xpn_error::ExpenseError;
use xpn_vector_index::EmbeddingStore;

use crate::session::{map_sqlx_err, DbSession};

#[derive(sqlx::FromRow)]
struct EmbeddingRow {
    id: Uuid,
    user_id: Uuid,
    transaction_id: Option<Uuid>,
    description_text: String,
    vendor_normalized: Option<String>,
    embedding: Vector,
    gl_code: Option<String>,
    department: Option<String>,
    verified: bool,
    expires_at: Option<DateTime<Utc>>,
}

impl From<EmbeddingRow> for ExpenseEmbedding {
    fn from(row: EmbeddingRow) -> Self {
        ExpenseEmbedding {
            id: row.id,
            user_id: row.user_id,
            transaction_id: row.transaction_id,
            description_text: row.description_text,
            vendor_normalized: row.vendor_normalized,
            embedding: row.embedding.to_vec(),
            gl_code: row.gl_code,
            department: row.department,
            verified: row.verified,
            expires_at: row.expires_at,
        }
    }
}

/// `expense_embeddings` table, with a `vector` column for `embedding`.
#[derive(Clone)]
pub struct PgEmbeddingStore {
    session: DbSession,
}

impl PgEmbeddingStore {
    /// Wraps a session.
    pub fn new(session: DbSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl EmbeddingStore for PgEmbeddingStore {
    async fn insert(&self, embedding: ExpenseEmbedding) -> Result<ExpenseEmbedding, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: EmbeddingRow = sqlx::query_as(
            "INSERT INTO expense_embeddings
                (id, user_id, transaction_id, description_text, vendor_normalized,
                 embedding, gl_code, department, verified, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING id, user_id, transaction_id, description_text, vendor_normalized,
                       embedding, gl_code, department, verified, expires_at",
        )
        .bind(embedding.id)
        .bind(embedding.user_id)
        .bind(embedding.transaction_id)
        .bind(&embedding.description_text)
        .bind(&embedding.vendor_normalized)
        .bind(Vector::from(embedding.embedding.clone()))
        .bind(&embedding.gl_code)
        .bind(&embedding.department)
        .bind(embedding.verified)
        .bind(embedding.expires_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(row.into())
    }

    async fn by_user(&self, user_id: Uuid) -> Result<Vec<ExpenseEmbedding>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let rows: Vec<EmbeddingRow> = sqlx::query_as(
            "SELECT id, user_id, transaction_id, description_text, vendor_normalized,
                    embedding, gl_code, department, verified, expires_at
             FROM expense_embeddings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64, ExpenseError> {
        let mut conn = self.session.lock().await;
        let result = sqlx::query(
            "DELETE FROM expense_embeddings WHERE expires_at IS NOT NULL AND expires_at < $1",
        )
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}
