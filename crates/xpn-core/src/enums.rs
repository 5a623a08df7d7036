//! Shared domain enumerations.

use serde::{Deserialize, Serialize};

/// Broad vendor classification used to scope alias lookups in
/// `find(description, categories[])`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorCategory {
    /// No special handling.
    Generic,
    /// Airlines.
    Airline,
    /// Hotels and lodging.
    Hotel,
    /// Restaurants and dining.
    Restaurant,
    /// Ground transportation (rideshare, taxi, rental car).
    GroundTransport,
    /// Software / SaaS subscriptions.
    Software,
    /// Office supplies and equipment.
    OfficeSupplies,
}

/// Lifecycle state shared by receipts, transactions, and transaction
/// groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// No candidate has been proposed or confirmed.
    Unmatched,
    /// A candidate has been proposed and awaits user action.
    Proposed,
    /// The match has been confirmed.
    Matched,
}

/// Status of an individual [`crate::ReceiptTransactionMatch`] row, distinct
/// from the derived `MatchStatus` of the receipt/transaction it links
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRecordStatus {
    /// Proposed by the auto-match pass, awaiting confirmation.
    Proposed,
    /// Confirmed by the user (or created directly via manual match).
    Confirmed,
    /// Rejected by the user.
    Rejected,
}

/// Whether a statement's amount column expresses charges as negative or
/// positive numbers (`StatementFingerprint.amount_sign`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountSign {
    /// Charges (money spent) are represented as negative numbers.
    NegativeCharges,
    /// Charges are represented as positive numbers.
    PositiveCharges,
}

/// The tier that answered a [`crate::TierUsageLog`]-producing request
/// (spec glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// No tier produced an answer; a degraded result was returned.
    None = 0,
    /// Content-addressed cache hit.
    One = 1,
    /// Nearest-neighbor vector search hit.
    Two = 2,
    /// External AI model invocation.
    Three = 3,
}

impl Tier {
    /// `true` for [`Tier::One`]: `cache_hit` is true iff `tier == 1`.
    pub fn is_cache_hit(&self) -> bool {
        matches!(self, Tier::One)
    }
}

/// The kind of tiered operation a [`crate::TierUsageLog`] row records
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Description normalization.
    Normalization,
    /// GL-code categorization.
    CategorizeGl,
    /// Department categorization.
    CategorizeDepartment,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationType::Normalization => "normalization",
            OperationType::CategorizeGl => "categorize_gl",
            OperationType::CategorizeDepartment => "categorize_department",
        };
        f.write_str(s)
    }
}
