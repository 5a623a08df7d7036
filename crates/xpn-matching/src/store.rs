//! Persistence seam for match records and the entities whose lifecycle
//! a match transition touches ("Confirmation / rejection").

use async_trait::async_trait;
use uuid::Uuid;
use xpn_core::{Receipt, ReceiptTransactionMatch, Transaction, TransactionGroup};
use xpn_error::ExpenseError;

/// What [`crate::engine::MatchingEngine`] reads and writes to carry out
/// the match lifecycle. `xpn-db` supplies the Postgres-backed
/// implementation (one transaction per `confirm`/`reject`/
/// `manual_match`/`batch_approve` call, and a single commit at the end
/// of an auto-match pass); tests use the in-memory one in
/// [`crate::mem`].
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Fetches a match record by id.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::NotFound`] if no such match exists.
    async fn get_match(&self, match_id: Uuid) -> Result<ReceiptTransactionMatch, ExpenseError>;

    /// Every Proposed match belonging to `user_id`, for `batch_approve`'s
    /// `min_confidence` selector.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    async fn proposed_matches_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ReceiptTransactionMatch>, ExpenseError>;

    /// Inserts a new match record.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    async fn insert_match(
        &self,
        record: ReceiptTransactionMatch,
    ) -> Result<ReceiptTransactionMatch, ExpenseError>;

    /// Persists an in-place update to an existing match record.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    async fn save_match(&self, record: &ReceiptTransactionMatch) -> Result<(), ExpenseError>;

    /// Fetches a receipt by id.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::NotFound`] if no such receipt exists.
    async fn get_receipt(&self, receipt_id: Uuid) -> Result<Receipt, ExpenseError>;

    /// Persists an in-place update to a receipt.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    async fn save_receipt(&self, receipt: &Receipt) -> Result<(), ExpenseError>;

    /// Fetches a transaction by id.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::NotFound`] if no such transaction exists.
    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, ExpenseError>;

    /// Persists an in-place update to a transaction.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), ExpenseError>;

    /// Fetches a transaction group by id.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::NotFound`] if no such group exists.
    async fn get_group(&self, group_id: Uuid) -> Result<TransactionGroup, ExpenseError>;

    /// Persists an in-place update to a transaction group.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    async fn save_group(&self, group: &TransactionGroup) -> Result<(), ExpenseError>;
}

/// What `manual_match` links a receipt to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualMatchTarget {
    /// A single transaction.
    Transaction(Uuid),
    /// A transaction group.
    Group(Uuid),
}

/// How `batch_approve` selects which Proposed matches to confirm:
/// `batch_approve(min_confidence | explicit_ids)`.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchSelector {
    /// Confirm every Proposed match for the user scoring at least this.
    MinConfidence(f64),
    /// Confirm exactly these match ids.
    ExplicitIds(Vec<Uuid>),
}
