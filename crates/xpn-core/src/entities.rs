//! Shared domain entities. Each struct is a plain record — no change
//! tracking, no lazy-loaded relations. Repositories in `xpn-db` are the
//! only thing that knows how to persist or load these.

use crate::enums::{AmountSign, MatchRecordStatus, MatchStatus, VendorCategory};
use crate::money::Money;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A calendar date without a time component
pub type CalendarDate = NaiveDate;

/// `NormalizedTextCache(hash, raw_text, canonical_text, hit_count,
/// last_accessed_at)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTextCache {
    /// `lowercase_hex(SHA-256(lower(trim(raw_text))))`.
    pub hash: String,
    /// The first raw text ever seen for this hash.
    pub raw_text: String,
    /// The (possibly later-replaced) canonical normalization.
    pub canonical_text: String,
    /// Monotonically non-decreasing hit counter.
    pub hit_count: u64,
    /// Timestamp of the most recent lookup hit.
    pub last_accessed_at: DateTime<Utc>,
}

/// `VendorAlias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorAlias {
    /// Surrogate identifier.
    pub id: Uuid,
    /// The canonical vendor name (e.g. `"AMAZON"`).
    pub canonical_name: String,
    /// Case-insensitive substring pattern matched against descriptions.
    pub alias_pattern: String,
    /// Display name shown to users.
    pub display_name: String,
    /// Broad vendor category.
    pub category: VendorCategory,
    /// GL code applied when this alias resolves at tier 1.
    pub default_gl_code: Option<String>,
    /// Department applied when this alias resolves at tier 1.
    pub default_department: Option<String>,
    /// Count of GL confirmations toward promotion, capped at the
    /// configured threshold.
    pub gl_confirm_count: u32,
    /// Count of department confirmations toward promotion, capped at the
    /// configured threshold.
    pub dept_confirm_count: u32,
    /// Number of times this alias has matched a transaction description.
    pub match_count: u64,
    /// Timestamp of the most recent match.
    pub last_matched_at: Option<DateTime<Utc>>,
    /// Confidence in `[0, 1]`, used to break ties in `find`.
    pub confidence: f64,
}

/// `ExpenseEmbedding`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseEmbedding {
    /// Surrogate identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Source transaction, if this embedding was derived from one.
    pub transaction_id: Option<Uuid>,
    /// The text that was embedded.
    pub description_text: String,
    /// Canonical vendor pattern, if known.
    pub vendor_normalized: Option<String>,
    /// The embedding vector. Read-only once stored.
    pub embedding: Vec<f32>,
    /// GL code this example was labeled with, if categorization data.
    pub gl_code: Option<String>,
    /// Department this example was labeled with, if categorization data.
    pub department: Option<String>,
    /// Verified rows never expire and are excluded from the purge sweep.
    pub verified: bool,
    /// Expiry for unverified rows; `None` for verified rows.
    pub expires_at: Option<DateTime<Utc>>,
}

/// `StatementFingerprint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementFingerprint {
    /// Surrogate identifier.
    pub id: Uuid,
    /// `None` for a system-wide fallback; `Some` for a user override.
    pub user_id: Option<Uuid>,
    /// `header_hash` of the statement's column headers.
    pub header_hash: String,
    /// Human-readable source name (bank/card issuer), for display only.
    pub source_name: String,
    /// Maps the statement's original header text to a canonical field.
    pub column_mapping: BTreeMap<String, String>,
    /// `strftime`-style date format used by this statement source.
    pub date_format: String,
    /// Whether charges appear as negative or positive amounts.
    pub amount_sign: AmountSign,
    /// Number of times this fingerprint has been reused.
    pub hit_count: u64,
    /// Timestamp of the most recent reuse.
    pub last_used_at: DateTime<Utc>,
}

/// `TierUsageLog`. Append-only; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierUsageLog {
    /// Owning user.
    pub user_id: Uuid,
    /// Transaction this invocation was made on behalf of, if any.
    pub transaction_id: Option<Uuid>,
    /// Kind of tiered operation.
    pub operation_type: crate::enums::OperationType,
    /// Tier that produced the answer (`0` encodes "no tier answered").
    pub tier: crate::enums::Tier,
    /// Confidence reported by the resolving tier.
    pub confidence: Option<f64>,
    /// Wall-clock latency of the whole `resolve` call, in milliseconds.
    pub response_time_ms: u64,
    /// `true` iff `tier == Tier::One`.
    pub cache_hit: bool,
    /// When this invocation happened.
    pub created_at: DateTime<Utc>,
}

/// A receipt awaiting a transaction match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Surrogate identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Vendor name extracted by (external) OCR/extraction.
    pub vendor_extracted: Option<String>,
    /// Date extracted from the receipt image/PDF.
    pub date_extracted: Option<CalendarDate>,
    /// Amount extracted from the receipt image/PDF.
    pub amount_extracted: Option<Money>,
    /// Current matching lifecycle state.
    pub match_status: MatchStatus,
    /// The transaction this receipt is matched to, if any.
    pub matched_transaction_id: Option<Uuid>,
}

/// A bank transaction awaiting a receipt match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Surrogate identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Normalized description (after tier-router normalization).
    pub description: String,
    /// The description exactly as it appeared in the statement.
    pub original_description: String,
    /// Date the transaction posted.
    pub transaction_date: CalendarDate,
    /// Signed amount (negative = charge, by internal convention; the
    /// statement's own sign convention is normalized away during
    /// ingestion using [`AmountSign`]).
    pub amount: Money,
    /// Current matching lifecycle state.
    pub match_status: MatchStatus,
    /// The group this transaction belongs to, if grouped. Grouped
    /// transactions are hidden from the auto-match candidate pool.
    pub group_id: Option<Uuid>,
    /// The receipt this transaction is matched to, if any.
    pub matched_receipt_id: Option<Uuid>,
}

/// A group of transactions treated as one atomic match candidate: its
/// members are excluded from the candidate pool while grouped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionGroup {
    /// Surrogate identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Display name, often of the form `"<VENDOR> (N charges)"`.
    pub name: String,
    /// Sum of the member transactions' amounts.
    pub combined_amount: Money,
    /// Date shown to the user for this group.
    pub display_date: CalendarDate,
    /// Number of member transactions.
    pub transaction_count: u32,
    /// Current matching lifecycle state.
    pub match_status: MatchStatus,
    /// The receipt this group is matched to, if any.
    pub matched_receipt_id: Option<Uuid>,
}

/// A proposed or confirmed link between a receipt and a transaction
/// or group. Exactly one of `transaction_id` / `transaction_group_id`
/// is `Some`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptTransactionMatch {
    /// Surrogate identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// The receipt side of the match.
    pub receipt_id: Uuid,
    /// The transaction side of the match, if this links to a single
    /// transaction rather than a group.
    pub transaction_id: Option<Uuid>,
    /// The transaction-group side of the match, if this links to a
    /// group rather than a single transaction.
    pub transaction_group_id: Option<Uuid>,
    /// Lifecycle state of this match record.
    pub status: MatchRecordStatus,
    /// Total score in `[0, 100]`.
    pub confidence_score: f64,
    /// Amount-axis component score, `[0, 40]`.
    pub amount_score: f64,
    /// Date-axis component score, `[0, 35]`.
    pub date_score: f64,
    /// Vendor-axis component score, `[0, 25]`.
    pub vendor_score: f64,
    /// Human-readable explanation of why this match was proposed.
    pub match_reason: String,
    /// The vendor alias that contributed the vendor-axis score, if any.
    pub matched_vendor_alias_id: Option<Uuid>,
    /// `true` for matches created via `manual_match`.
    pub is_manual_match: bool,
    /// When the match was confirmed, if it has been.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// The user who confirmed the match, if confirmed.
    pub confirmed_by_user_id: Option<Uuid>,
}

impl ReceiptTransactionMatch {
    /// `true` if this record links to a single transaction rather than a
    /// group.
    pub fn is_transaction_match(&self) -> bool {
        self.transaction_id.is_some()
    }

    /// `true` if this record links to a transaction group.
    pub fn is_group_match(&self) -> bool {
        self.transaction_group_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_match() -> ReceiptTransactionMatch {
        ReceiptTransactionMatch {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            receipt_id: Uuid::nil(),
            transaction_id: Some(Uuid::nil()),
            transaction_group_id: None,
            status: MatchRecordStatus::Proposed,
            confidence_score: 90.0,
            amount_score: 40.0,
            date_score: 35.0,
            vendor_score: 15.0,
            match_reason: "test".into(),
            matched_vendor_alias_id: None,
            is_manual_match: false,
            confirmed_at: None,
            confirmed_by_user_id: None,
        }
    }

    #[test]
    fn exactly_one_of_transaction_or_group_xor() {
        let m = sample_match();
        assert!(m.is_transaction_match());
        assert!(!m.is_group_match());
    }
}
