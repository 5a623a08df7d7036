//! Append-only `tier_usage_log` repository (C9). `xpn-metering` does the
//! aggregation over what this repository fetches; this module only
//! ever inserts and selects.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use xpn_core::{OperationType, Tier, TierUsageLog};
use xpn_error::ExpenseError;
use xpn_metering::DescriptionUsage;

use crate::session::{map_sqlx_err, DbSession};

fn operation_to_text(op: OperationType) -> &'static str {
    match op {
        OperationType::Normalization => "normalization",
        OperationType::CategorizeGl => "categorize_gl",
        OperationType::CategorizeDepartment => "categorize_department",
    }
}

fn operation_from_text(text: &str) -> OperationType {
    match text {
        "categorize_gl" => OperationType::CategorizeGl,
        "categorize_department" => OperationType::CategorizeDepartment,
        _ => OperationType::Normalization,
    }
}

fn tier_to_i16(tier: Tier) -> i16 {
    tier as i16
}

fn tier_from_i16(value: i16) -> Tier {
    match value {
        1 => Tier::One,
        2 => Tier::Two,
        3 => Tier::Three,
        _ => Tier::None,
    }
}

#[derive(sqlx::FromRow)]
struct UsageLogRow {
    user_id: Uuid,
    transaction_id: Option<Uuid>,
    operation_type: String,
    tier: i16,
    confidence: Option<f64>,
    response_time_ms: i64,
    cache_hit: bool,
    created_at: DateTime<Utc>,
}

impl From<UsageLogRow> for TierUsageLog {
    fn from(row: UsageLogRow) -> Self {
        TierUsageLog {
            user_id: row.user_id,
            transaction_id: row.transaction_id,
            operation_type: operation_from_text(&row.operation_type),
            tier: tier_from_i16(row.tier),
            confidence: row.confidence,
            response_time_ms: row.response_time_ms.max(0) as u64,
            cache_hit: row.cache_hit,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TierSampleRow {
    user_id: Uuid,
    transaction_id: Option<Uuid>,
    operation_type: String,
    tier: i16,
    confidence: Option<f64>,
    response_time_ms: i64,
    cache_hit: bool,
    created_at: DateTime<Utc>,
    description: String,
}

impl From<TierSampleRow> for DescriptionUsage {
    fn from(row: TierSampleRow) -> Self {
        DescriptionUsage {
            description: row.description,
            log: TierUsageLog {
                user_id: row.user_id,
                transaction_id: row.transaction_id,
                operation_type: operation_from_text(&row.operation_type),
                tier: tier_from_i16(row.tier),
                confidence: row.confidence,
                response_time_ms: row.response_time_ms.max(0) as u64,
                cache_hit: row.cache_hit,
                created_at: row.created_at,
            },
        }
    }
}

/// `tier_usage_log` table.
pub struct TierUsageLogRepo {
    session: DbSession,
}

impl TierUsageLogRepo {
    /// Wraps a session.
    pub fn new(session: DbSession) -> Self {
        Self { session }
    }

    /// Appends one usage row. Never mutated afterward.
    ///
    /// # Errors
    ///
    /// Propagates the underlying connection's error.
    pub async fn insert(&self, log: &TierUsageLog) -> Result<(), ExpenseError> {
        let mut conn = self.session.lock().await;
        sqlx::query(
            "INSERT INTO tier_usage_log
                (user_id, transaction_id, operation_type, tier, confidence,
                 response_time_ms, cache_hit, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(log.user_id)
        .bind(log.transaction_id)
        .bind(operation_to_text(log.operation_type))
        .bind(tier_to_i16(log.tier))
        .bind(log.confidence)
        .bind(log.response_time_ms as i64)
        .bind(log.cache_hit)
        .bind(log.created_at)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// Every row for `user_id` whose `created_at` falls in `[start, end)`,
    /// for `xpn-metering::aggregate`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying connection's error.
    pub async fn for_user_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TierUsageLog>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let rows: Vec<UsageLogRow> = sqlx::query_as(
            "SELECT user_id, transaction_id, operation_type, tier, confidence,
                    response_time_ms, cache_hit, created_at
             FROM tier_usage_log
             WHERE user_id = $1 AND created_at >= $2 AND created_at < $3",
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Joins tier-3 normalization usage against the transaction it was
    /// made on behalf of, to recover the description `xpn-metering`'s
    /// `vendor_candidates` groups by — `tier_usage_log` itself has no
    /// `description` column.
    ///
    /// # Errors
    ///
    /// Propagates the underlying connection's error.
    pub async fn tier3_samples_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DescriptionUsage>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let rows: Vec<TierSampleRow> = sqlx::query_as(
            "SELECT l.user_id, l.transaction_id, l.operation_type, l.tier, l.confidence,
                    l.response_time_ms, l.cache_hit, l.created_at, t.description
             FROM tier_usage_log l
             JOIN transactions t ON t.id = l.transaction_id
             WHERE l.user_id = $1 AND l.tier = 3 AND l.operation_type = 'normalization'
               AND l.created_at >= $2 AND l.created_at < $3",
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
