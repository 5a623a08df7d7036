//! Postgres-backed [`FingerprintStore`] (C7).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;
use xpn_core::{AmountSign, StatementFingerprint};
use xpn_error::ExpenseError;
use xpn_fingerprint::FingerprintStore;

use crate::session::{map_sqlx_err, map_sqlx_not_found, DbSession};

#[derive(sqlx::FromRow)]
struct FingerprintRow {
    id: Uuid,
    user_id: Option<Uuid>,
    header_hash: String,
    source_name: String,
    column_mapping: Value,
    date_format: String,
    amount_sign: String,
    hit_count: i64,
    last_used_at: DateTime<Utc>,
}

fn sign_to_text(sign: AmountSign) -> &'static str {
    match sign {
        AmountSign::NegativeCharges => "negative_charges",
        AmountSign::PositiveCharges => "positive_charges",
    }
}

fn sign_from_text(text: &str) -> AmountSign {
    match text {
        "positive_charges" => AmountSign::PositiveCharges,
        _ => AmountSign::NegativeCharges,
    }
}

impl TryFrom<FingerprintRow> for StatementFingerprint {
    type Error = ExpenseError;

    fn try_from(row: FingerprintRow) -> Result<Self, ExpenseError> {
        let column_mapping: BTreeMap<String, String> =
            serde_json::from_value(row.column_mapping).map_err(|e| ExpenseError::ParseError {
                message: format!("corrupt column_mapping for fingerprint {}: {e}", row.id),
            })?;
        Ok(StatementFingerprint {
            id: row.id,
            user_id: row.user_id,
            header_hash: row.header_hash,
            source_name: row.source_name,
            column_mapping,
            date_format: row.date_format,
            amount_sign: sign_from_text(&row.amount_sign),
            hit_count: row.hit_count.max(0) as u64,
            last_used_at: row.last_used_at,
        })
    }
}

/// `statement_fingerprints` table.
pub struct PgFingerprintStore {
    session: DbSession,
}

impl PgFingerprintStore {
    /// Wraps a session.
    pub fn new(session: DbSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl FingerprintStore for PgFingerprintStore {
    async fn find(
        &self,
        header_hash: &str,
        user_id: Option<Uuid>,
    ) -> Result<Option<StatementFingerprint>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: Option<FingerprintRow> = sqlx::query_as(
            "SELECT id, user_id, header_hash, source_name, column_mapping,
                    date_format, amount_sign, hit_count, last_used_at
             FROM statement_fingerprints
             WHERE header_hash = $1 AND user_id IS NOT DISTINCT FROM $2",
        )
        .bind(header_hash)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn upsert(
        &self,
        fingerprint: StatementFingerprint,
    ) -> Result<StatementFingerprint, ExpenseError> {
        let mut conn = self.session.lock().await;
        let column_mapping = serde_json::to_value(&fingerprint.column_mapping)
            .expect("BTreeMap<String, String> always serializes");
        let row: FingerprintRow = sqlx::query_as(
            "INSERT INTO statement_fingerprints
                (id, user_id, header_hash, source_name, column_mapping,
                 date_format, amount_sign, hit_count, last_used_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                column_mapping = EXCLUDED.column_mapping,
                date_format = EXCLUDED.date_format,
                amount_sign = EXCLUDED.amount_sign
             RETURNING id, user_id, header_hash, source_name, column_mapping,
                       date_format, amount_sign, hit_count, last_used_at",
        )
        .bind(fingerprint.id)
        .bind(fingerprint.user_id)
        .bind(&fingerprint.header_hash)
        .bind(&fingerprint.source_name)
        .bind(column_mapping)
        .bind(&fingerprint.date_format)
        .bind(sign_to_text(fingerprint.amount_sign))
        .bind(fingerprint.hit_count as i64)
        .bind(fingerprint.last_used_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        row.try_into()
    }

    async fn record_hit(&self, id: Uuid) -> Result<StatementFingerprint, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: FingerprintRow = sqlx::query_as(
            "UPDATE statement_fingerprints
             SET hit_count = hit_count + 1, last_used_at = now()
             WHERE id = $1
             RETURNING id, user_id, header_hash, source_name, column_mapping,
                       date_format, amount_sign, hit_count, last_used_at",
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_not_found(e, "statement_fingerprint", id))?;
        row.try_into()
    }
}
