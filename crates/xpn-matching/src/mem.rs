//! In-memory [`CandidateSource`] and [`MatchStore`] used by unit and
//! integration tests across the workspace.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use xpn_core::{CalendarDate, MatchStatus, Receipt, ReceiptTransactionMatch, Transaction, TransactionGroup};
use xpn_error::ExpenseError;

use crate::candidate::CandidateSource;
use crate::store::MatchStore;

#[derive(Default)]
struct WorldState {
    receipts: Vec<Receipt>,
    transactions: Vec<Transaction>,
    groups: Vec<TransactionGroup>,
    matches: Vec<ReceiptTransactionMatch>,
}

/// A single in-memory "database": shared, cheaply `Clone`-able state
/// backing both [`CandidateSource`] and [`MatchStore`], the way a real
/// `xpn-db` repository backs both seams against the same Postgres
/// connection. Seeding and reading back through the two trait
/// implementations keeps engine tests honest about what a real
/// `confirm`/`reject` actually mutates.
#[derive(Clone, Default)]
pub struct InMemoryMatchWorld {
    state: Arc<Mutex<WorldState>>,
}

impl InMemoryMatchWorld {
    /// An empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a receipt.
    pub fn seed_receipt(&self, receipt: Receipt) {
        self.state.lock().unwrap().receipts.push(receipt);
    }

    /// Seeds a transaction.
    pub fn seed_transaction(&self, transaction: Transaction) {
        self.state.lock().unwrap().transactions.push(transaction);
    }

    /// Seeds a transaction group.
    pub fn seed_group(&self, group: TransactionGroup) {
        self.state.lock().unwrap().groups.push(group);
    }

    /// The current state of a seeded receipt, for test assertions.
    pub fn receipt(&self, receipt_id: Uuid) -> Option<Receipt> {
        self.state.lock().unwrap().receipts.iter().find(|r| r.id == receipt_id).cloned()
    }

    /// The current state of a seeded transaction, for test assertions.
    pub fn transaction(&self, transaction_id: Uuid) -> Option<Transaction> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .cloned()
    }

    /// The current state of a seeded group, for test assertions.
    pub fn group(&self, group_id: Uuid) -> Option<TransactionGroup> {
        self.state.lock().unwrap().groups.iter().find(|g| g.id == group_id).cloned()
    }
}

#[async_trait]
impl CandidateSource for InMemoryMatchWorld {
    async fn unmatched_transactions(
        &self,
        user_id: Uuid,
        window_start: CalendarDate,
        window_end: CalendarDate,
    ) -> Result<Vec<Transaction>, ExpenseError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .filter(|t| {
                t.user_id == user_id
                    && t.group_id.is_none()
                    && t.match_status == MatchStatus::Unmatched
                    && t.transaction_date >= window_start
                    && t.transaction_date <= window_end
            })
            .cloned()
            .collect())
    }

    async fn unmatched_groups(
        &self,
        user_id: Uuid,
        window_start: CalendarDate,
        window_end: CalendarDate,
    ) -> Result<Vec<TransactionGroup>, ExpenseError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .groups
            .iter()
            .filter(|g| {
                g.user_id == user_id
                    && g.match_status == MatchStatus::Unmatched
                    && g.display_date >= window_start
                    && g.display_date <= window_end
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchWorld {
    async fn get_match(&self, match_id: Uuid) -> Result<ReceiptTransactionMatch, ExpenseError> {
        self.state
            .lock()
            .unwrap()
            .matches
            .iter()
            .find(|m| m.id == match_id)
            .cloned()
            .ok_or_else(|| ExpenseError::NotFound {
                entity: "receipt_transaction_match",
                id: match_id.to_string(),
            })
    }

    async fn proposed_matches_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ReceiptTransactionMatch>, ExpenseError> {
        use xpn_core::MatchRecordStatus;
        Ok(self
            .state
            .lock()
            .unwrap()
            .matches
            .iter()
            .filter(|m| m.user_id == user_id && m.status == MatchRecordStatus::Proposed)
            .cloned()
            .collect())
    }

    async fn insert_match(
        &self,
        record: ReceiptTransactionMatch,
    ) -> Result<ReceiptTransactionMatch, ExpenseError> {
        let mut state = self.state.lock().unwrap();
        state.matches.push(record.clone());
        Ok(record)
    }

    async fn save_match(&self, record: &ReceiptTransactionMatch) -> Result<(), ExpenseError> {
        let mut state = self.state.lock().unwrap();
        match state.matches.iter_mut().find(|m| m.id == record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(ExpenseError::NotFound {
                entity: "receipt_transaction_match",
                id: record.id.to_string(),
            }),
        }
    }

    async fn get_receipt(&self, receipt_id: Uuid) -> Result<Receipt, ExpenseError> {
        self.state
            .lock()
            .unwrap()
            .receipts
            .iter()
            .find(|r| r.id == receipt_id)
            .cloned()
            .ok_or_else(|| ExpenseError::NotFound {
                entity: "receipt",
                id: receipt_id.to_string(),
            })
    }

    async fn save_receipt(&self, receipt: &Receipt) -> Result<(), ExpenseError> {
        let mut state = self.state.lock().unwrap();
        match state.receipts.iter_mut().find(|r| r.id == receipt.id) {
            Some(existing) => {
                *existing = receipt.clone();
                Ok(())
            }
            None => Err(ExpenseError::NotFound {
                entity: "receipt",
                id: receipt.id.to_string(),
            }),
        }
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, ExpenseError> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .cloned()
            .ok_or_else(|| ExpenseError::NotFound {
                entity: "transaction",
                id: transaction_id.to_string(),
            })
    }

    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), ExpenseError> {
        let mut state = self.state.lock().unwrap();
        match state.transactions.iter_mut().find(|t| t.id == transaction.id) {
            Some(existing) => {
                *existing = transaction.clone();
                Ok(())
            }
            None => Err(ExpenseError::NotFound {
                entity: "transaction",
                id: transaction.id.to_string(),
            }),
        }
    }

    async fn get_group(&self, group_id: Uuid) -> Result<TransactionGroup, ExpenseError> {
        self.state
            .lock()
            .unwrap()
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
            .ok_or_else(|| ExpenseError::NotFound {
                entity: "transaction_group",
                id: group_id.to_string(),
            })
    }

    async fn save_group(&self, group: &TransactionGroup) -> Result<(), ExpenseError> {
        let mut state = self.state.lock().unwrap();
        match state.groups.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => {
                *existing = group.clone();
                Ok(())
            }
            None => Err(ExpenseError::NotFound {
                entity: "transaction_group",
                id: group.id.to_string(),
            }),
        }
    }
}
