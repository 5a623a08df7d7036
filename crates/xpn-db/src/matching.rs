//! Postgres-backed [`CandidateSource`] and [`MatchStore`] (C8).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use xpn_core::{
    CalendarDate, MatchRecordStatus, MatchStatus, Money, Receipt, ReceiptTransactionMatch,
    Transaction, TransactionGroup,
};
use xpn_error::ExpenseError;
use xpn_matching::{CandidateSource, MatchStore};

use crate::session::{map_sqlx_err, map_sqlx_not_found, DbSession};

fn match_status_to_text(status: MatchStatus) -> &'static str {
    match status {
        MatchStatus::Unmatched => "unmatched",
        MatchStatus::Proposed => "proposed",
        MatchStatus::Matched => "matched",
    }
}

fn match_status_from_text(text: &str) -> MatchStatus {
    match text {
        "proposed" => MatchStatus::Proposed,
        "matched" => MatchStatus::Matched,
        _ => MatchStatus::Unmatched,
    }
}

fn record_status_to_text(status: MatchRecordStatus) -> &'static str {
    match status {
        MatchRecordStatus::Proposed => "proposed",
        MatchRecordStatus::Confirmed => "confirmed",
        MatchRecordStatus::Rejected => "rejected",
    }
}

fn record_status_from_text(text: &str) -> MatchRecordStatus {
    match text {
        "confirmed" => MatchRecordStatus::Confirmed,
        "rejected" => MatchRecordStatus::Rejected,
        _ => MatchRecordStatus::Proposed,
    }
}

#[derive(sqlx::FromRow)]
struct ReceiptRow {
    id: Uuid,
    user_id: Uuid,
    vendor_extracted: Option<String>,
    date_extracted: Option<CalendarDate>,
    amount_extracted: Option<Decimal>,
    match_status: String,
    matched_transaction_id: Option<Uuid>,
}

impl From<ReceiptRow> for Receipt {
    fn from(row: ReceiptRow) -> Self {
        Receipt {
            id: row.id,
            user_id: row.user_id,
            vendor_extracted: row.vendor_extracted,
            date_extracted: row.date_extracted,
            amount_extracted: row.amount_extracted.map(Money::from),
            match_status: match_status_from_text(&row.match_status),
            matched_transaction_id: row.matched_transaction_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    description: String,
    original_description: String,
    transaction_date: CalendarDate,
    amount: Decimal,
    match_status: String,
    group_id: Option<Uuid>,
    matched_receipt_id: Option<Uuid>,
}

impl From<TransactionRow> for Transaction {
    fn from(row: TransactionRow) -> Self {
        Transaction {
            id: row.id,
            user_id: row.user_id,
            description: row.description,
            original_description: row.original_description,
            transaction_date: row.transaction_date,
            amount: Money::from(row.amount),
            match_status: match_status_from_text(&row.match_status),
            group_id: row.group_id,
            matched_receipt_id: row.matched_receipt_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    combined_amount: Decimal,
    display_date: CalendarDate,
    transaction_count: i32,
    match_status: String,
    matched_receipt_id: Option<Uuid>,
}

impl From<GroupRow> for TransactionGroup {
    fn from(row: GroupRow) -> Self {
        TransactionGroup {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            combined_amount: Money::from(row.combined_amount),
            display_date: row.display_date,
            transaction_count: row.transaction_count.max(0) as u32,
            match_status: match_status_from_text(&row.match_status),
            matched_receipt_id: row.matched_receipt_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MatchRow {
    id: Uuid,
    user_id: Uuid,
    receipt_id: Uuid,
    transaction_id: Option<Uuid>,
    transaction_group_id: Option<Uuid>,
    status: String,
    confidence_score: f64,
    amount_score: f64,
    date_score: f64,
    vendor_score: f64,
    match_reason: String,
    matched_vendor_alias_id: Option<Uuid>,
    is_manual_match: bool,
    confirmed_at: Option<DateTime<Utc>>,
    confirmed_by_user_id: Option<Uuid>,
}

impl From<MatchRow> for ReceiptTransactionMatch {
    fn from(row: MatchRow) -> Self {
        ReceiptTransactionMatch {
            id: row.id,
            user_id: row.user_id,
            receipt_id: row.receipt_id,
            transaction_id: row.transaction_id,
            transaction_group_id: row.transaction_group_id,
            status: record_status_from_text(&row.status),
            confidence_score: row.confidence_score,
            amount_score: row.amount_score,
            date_score: row.date_score,
            vendor_score: row.vendor_score,
            match_reason: row.match_reason,
            matched_vendor_alias_id: row.matched_vendor_alias_id,
            is_manual_match: row.is_manual_match,
            confirmed_at: row.confirmed_at,
            confirmed_by_user_id: row.confirmed_by_user_id,
        }
    }
}

/// `receipts`, `transactions`, `transaction_groups`, and
/// `receipt_transaction_matches` tables. Implements both
/// [`CandidateSource`] and [`MatchStore`] over the same session so a
/// write made through one seam is immediately visible through the
/// other within a request.
#[derive(Clone)]
pub struct PgMatchRepository {
    session: DbSession,
}

impl PgMatchRepository {
    /// Wraps a session.
    pub fn new(session: DbSession) -> Self {
        Self { session }
    }

    /// Receipts for `user_id` not yet attached to a transaction, the
    /// input set an auto-match pass runs over.
    ///
    /// # Errors
    ///
    /// Propagates the underlying query's error.
    pub async fn unmatched_receipts(&self, user_id: Uuid) -> Result<Vec<Receipt>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let rows: Vec<ReceiptRow> = sqlx::query_as(
            "SELECT id, user_id, vendor_extracted, date_extracted, amount_extracted,
                    match_status, matched_transaction_id
             FROM receipts
             WHERE user_id = $1 AND match_status = 'unmatched'",
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl CandidateSource for PgMatchRepository {
    async fn unmatched_transactions(
        &self,
        user_id: Uuid,
        window_start: CalendarDate,
        window_end: CalendarDate,
    ) -> Result<Vec<Transaction>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT id, user_id, description, original_description, transaction_date,
                    amount, match_status, group_id, matched_receipt_id
             FROM transactions
             WHERE user_id = $1 AND group_id IS NULL AND match_status = 'unmatched'
               AND transaction_date BETWEEN $2 AND $3",
        )
        .bind(user_id)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn unmatched_groups(
        &self,
        user_id: Uuid,
        window_start: CalendarDate,
        window_end: CalendarDate,
    ) -> Result<Vec<TransactionGroup>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let rows: Vec<GroupRow> = sqlx::query_as(
            "SELECT id, user_id, name, combined_amount, display_date,
                    transaction_count, match_status, matched_receipt_id
             FROM transaction_groups
             WHERE user_id = $1 AND match_status = 'unmatched'
               AND display_date BETWEEN $2 AND $3",
        )
        .bind(user_id)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl MatchStore for PgMatchRepository {
    async fn get_match(&self, match_id: Uuid) -> Result<ReceiptTransactionMatch, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: MatchRow = sqlx::query_as(
            "SELECT id, user_id, receipt_id, transaction_id, transaction_group_id, status,
                    confidence_score, amount_score, date_score, vendor_score, match_reason,
                    matched_vendor_alias_id, is_manual_match, confirmed_at, confirmed_by_user_id
             FROM receipt_transaction_matches WHERE id = $1",
        )
        .bind(match_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_not_found(e, "match", match_id))?;
        Ok(row.into())
    }

    async fn proposed_matches_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ReceiptTransactionMatch>, ExpenseError> {
        let mut conn = self.session.lock().await;
        let rows: Vec<MatchRow> = sqlx::query_as(
            "SELECT id, user_id, receipt_id, transaction_id, transaction_group_id, status,
                    confidence_score, amount_score, date_score, vendor_score, match_reason,
                    matched_vendor_alias_id, is_manual_match, confirmed_at, confirmed_by_user_id
             FROM receipt_transaction_matches WHERE user_id = $1 AND status = 'proposed'",
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_match(
        &self,
        record: ReceiptTransactionMatch,
    ) -> Result<ReceiptTransactionMatch, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: MatchRow = sqlx::query_as(
            "INSERT INTO receipt_transaction_matches
                (id, user_id, receipt_id, transaction_id, transaction_group_id, status,
                 confidence_score, amount_score, date_score, vendor_score, match_reason,
                 matched_vendor_alias_id, is_manual_match, confirmed_at, confirmed_by_user_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING id, user_id, receipt_id, transaction_id, transaction_group_id, status,
                       confidence_score, amount_score, date_score, vendor_score, match_reason,
                       matched_vendor_alias_id, is_manual_match, confirmed_at, confirmed_by_user_id",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.receipt_id)
        .bind(record.transaction_id)
        .bind(record.transaction_group_id)
        .bind(record_status_to_text(record.status))
        .bind(record.confidence_score)
        .bind(record.amount_score)
        .bind(record.date_score)
        .bind(record.vendor_score)
        .bind(&record.match_reason)
        .bind(record.matched_vendor_alias_id)
        .bind(record.is_manual_match)
        .bind(record.confirmed_at)
        .bind(record.confirmed_by_user_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(row.into())
    }

    async fn save_match(&self, record: &ReceiptTransactionMatch) -> Result<(), ExpenseError> {
        let mut conn = self.session.lock().await;
        sqlx::query(
            "UPDATE receipt_transaction_matches SET
                status = $2, confirmed_at = $3, confirmed_by_user_id = $4
             WHERE id = $1",
        )
        .bind(record.id)
        .bind(record_status_to_text(record.status))
        .bind(record.confirmed_at)
        .bind(record.confirmed_by_user_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_not_found(e, "match", record.id))?;
        Ok(())
    }

    async fn get_receipt(&self, receipt_id: Uuid) -> Result<Receipt, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: ReceiptRow = sqlx::query_as(
            "SELECT id, user_id, vendor_extracted, date_extracted, amount_extracted,
                    match_status, matched_transaction_id
             FROM receipts WHERE id = $1",
        )
        .bind(receipt_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_not_found(e, "receipt", receipt_id))?;
        Ok(row.into())
    }

    async fn save_receipt(&self, receipt: &Receipt) -> Result<(), ExpenseError> {
        let mut conn = self.session.lock().await;
        sqlx::query(
            "UPDATE receipts SET match_status = $2, matched_transaction_id = $3 WHERE id = $1",
        )
        .bind(receipt.id)
        .bind(match_status_to_text(receipt.match_status))
        .bind(receipt.matched_transaction_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_not_found(e, "receipt", receipt.id))?;
        Ok(())
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: TransactionRow = sqlx::query_as(
            "SELECT id, user_id, description, original_description, transaction_date,
                    amount, match_status, group_id, matched_receipt_id
             FROM transactions WHERE id = $1",
        )
        .bind(transaction_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_not_found(e, "transaction", transaction_id))?;
        Ok(row.into())
    }

    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), ExpenseError> {
        let mut conn = self.session.lock().await;
        sqlx::query(
            "UPDATE transactions SET match_status = $2, matched_receipt_id = $3 WHERE id = $1",
        )
        .bind(transaction.id)
        .bind(match_status_to_text(transaction.match_status))
        .bind(transaction.matched_receipt_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_not_found(e, "transaction", transaction.id))?;
        Ok(())
    }

    async fn get_group(&self, group_id: Uuid) -> Result<TransactionGroup, ExpenseError> {
        let mut conn = self.session.lock().await;
        let row: GroupRow = sqlx::query_as(
            "SELECT id, user_id, name, combined_amount, display_date,
                    transaction_count, match_status, matched_receipt_id
             FROM transaction_groups WHERE id = $1",
        )
        .bind(group_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_not_found(e, "transaction_group", group_id))?;
        Ok(row.into())
    }

    async fn save_group(&self, group: &TransactionGroup) -> Result<(), ExpenseError> {
        let mut conn = self.session.lock().await;
        sqlx::query(
            "UPDATE transaction_groups SET match_status = $2, matched_receipt_id = $3 WHERE id = $1",
        )
        .bind(group.id)
        .bind(match_status_to_text(group.match_status))
        .bind(group.matched_receipt_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_not_found(e, "transaction_group", group.id))?;
        Ok(())
    }
}
