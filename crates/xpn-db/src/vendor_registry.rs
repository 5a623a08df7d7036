//! Postgres-backed [`VendorAliasStore`] (C5).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use xpn_core::{VendorAlias, VendorCategory};
use xpn_error::ExpenseError;
use xpn_vendor_registry::VendorAliasStore;

use crate::session::{map_sqlx_err, DbSession};

#[derive(sqlx::FromRow)]
struct AliasRow {
    id: Uuid,
    canonical_name: String,
    alias_pattern: String,
    display_name: String,
    category: String,
    default_gl_code: Option<String>,
    default_department: Option<String>,
    gl_confirm_count: i32,
    dept_confirm_count: i32,
    match_count: i64,
    last_matched_at: Option<DateTime<Utc>>,
    confidence: f64,
}

fn category_to_text(category: VendorCategory) -> &'static str {
    match category {
        VendorCategory::Generic => "generic",
        VendorCategory::Airline => "airline",
        VendorCategory::Hotel => "hotel",
        VendorCategory::Restaurant => "restaurant",
        VendorCategory::GroundTransport => "ground_transport",
        VendorCategory::Software => "software",
        VendorCategory::OfficeSupplies => "office_supplies",
    }
}

fn category_from_text(text: &str) -> VendorCategory {
    match text {
        "airline" => VendorCategory::Airline,
        "hotel" => VendorCategory::Hotel,
        "restaurant" => VendorCategory::Restaurant,
        "ground_transport" => VendorCategory::GroundTransport,
        "software" => VendorCategory::Software,
        "office_supplies" => VendorCategory::OfficeSupplies,
        _ => VendorCategory::Generic,
    }
}

impl From<AliasRow> for VendorAlias {
    fn from(row: AliasRow) -> Self {
        VendorAlias {
            id: row.id,
            canonical_name: row.canonical_name,
            alias_pattern: row.alias_pattern,
            display_name: row.display_name,
            category: category_from_text(&row.category),
            default_gl_code: row.default_gl_code,
            default_department: row.default_department,
            gl_confirm_count: row.gl_confirm_count.max(0) as u32,
            dept_confirm_count: row.dept_confirm_count.max(0) as u32,
            match_count: row.match_count.max(0) as u64,
            last_matched_at: row.last_matched_at,
            confidence: row.confidence,
        }
    }
}

/// `vendor_aliases` table.
#[derive(Clone)]
pub struct PgVendorAliasStore {
    session: DbSession,
}

impl PgVendorAliasStore {
    /// Wraps a session.
    pub fn new(session: DbSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl VendorAliasStore for PgVendorAliasStore {
    async fn all(&self) -> Result<Vec<VendorAlias>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let rows: Vec<AliasRow> = sqlx::query_as(
            "SELECT id, canonical_name, alias_pattern, display_name, category,
                    default_gl_code, default_department, gl_confirm_count,
                    dept_confirm_count, match_count, last_matched_at, confidence
             FROM vendor_aliases",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_by_canonical_name(
        &self,
        canonical_name: &str,
    ) -> Result<Option<VendorAlias>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: Option<AliasRow> = sqlx::query_as(
            "SELECT id, canonical_name, alias_pattern, display_name, category,
                    default_gl_code, default_department, gl_confirm_count,
                    dept_confirm_count, match_count, last_matched_at, confidence
             FROM vendor_aliases WHERE canonical_name = $1",
        )
        .bind(canonical_name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(row.map(Into::into))
    }

    async fn upsert(&self, alias: VendorAlias) -> Result<VendorAlias, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: AliasRow = sqlx::query_as(
            "INSERT INTO vendor_aliases
                (id, canonical_name, alias_pattern, display_name, category,
                 default_gl_code, default_department, gl_confirm_count,
                 dept_confirm_count, match_count, last_matched_at, confidence)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (canonical_name, alias_pattern) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                category = EXCLUDED.category,
                default_gl_code = EXCLUDED.default_gl_code,
                default_department = EXCLUDED.default_department
             RETURNING id, canonical_name, alias_pattern, display_name, category,
                       default_gl_code, default_department, gl_confirm_count,
                       dept_confirm_count, match_count, last_matched_at, confidence",
        )
        .bind(alias.id)
        .bind(&alias.canonical_name)
        .bind(&alias.alias_pattern)
        .bind(&alias.display_name)
        .bind(category_to_text(alias.category))
        .bind(&alias.default_gl_code)
        .bind(&alias.default_department)
        .bind(alias.gl_confirm_count as i32)
        .bind(alias.dept_confirm_count as i32)
        .bind(alias.match_count as i64)
        .bind(alias.last_matched_at)
        .bind(alias.confidence)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(row.into())
    }

    async fn save(&self, alias: &VendorAlias) -> Result<(), ExpenseError> {
        let mut conn = self.session.lock().await;
        sqlx::query(
            "UPDATE vendor_aliases SET
                display_name = $2, category = $3, default_gl_code = $4,
                default_department = $5, gl_confirm_count = $6,
                dept_confirm_count = $7, match_count = $8,
                last_matched_at = $9, confidence = $10
             WHERE id = $1",
        )
        .bind(alias.id)
        .bind(&alias.display_name)
        .bind(category_to_text(alias.category))
        .bind(&alias.default_gl_code)
        .bind(&alias.default_department)
        .bind(alias.gl_confirm_count as i32)
        .bind(alias.dept_confirm_count as i32)
        .bind(alias.match_count as i64)
        .bind(alias.last_matched_at)
        .bind(alias.confidence)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}
