//! Candidate pool assembly ("Candidate pool for one receipt").

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;
use xpn_core::{CalendarDate, Transaction, TransactionGroup};
use xpn_error::ExpenseError;

use crate::scoring::MatchingThresholds;

/// One thing a receipt can be matched against: a single transaction, or
/// an atomic group of them. Groups are excluded from the pool while
/// grouped (their members are hidden too), so a group is scored as one
/// unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// A single unmatched transaction.
    Transaction(Transaction),
    /// An unmatched transaction group.
    Group(TransactionGroup),
}

impl Candidate {
    /// This candidate's surrogate id (the transaction's or the group's).
    pub fn id(&self) -> Uuid {
        match self {
            Candidate::Transaction(t) => t.id,
            Candidate::Group(g) => g.id,
        }
    }

    /// The amount compared against the receipt's extracted amount.
    pub fn amount(&self) -> Decimal {
        match self {
            Candidate::Transaction(t) => t.amount.as_decimal(),
            Candidate::Group(g) => g.combined_amount.as_decimal(),
        }
    }

    /// The date compared against the receipt's extracted date.
    pub fn date(&self) -> CalendarDate {
        match self {
            Candidate::Transaction(t) => t.transaction_date,
            Candidate::Group(g) => g.display_date,
        }
    }

    /// The text the vendor axis extracts a pattern from: the
    /// transaction's normalized description, or the group's display
    /// name.
    pub fn description_or_name(&self) -> &str {
        match self {
            Candidate::Transaction(t) => &t.description,
            Candidate::Group(g) => &g.name,
        }
    }

    /// `true` for a group candidate.
    pub fn is_group(&self) -> bool {
        matches!(self, Candidate::Group(_))
    }
}

/// Where a receipt's candidate pool comes from: the user's unmatched
/// transactions and transaction groups in a date window. `xpn-db`
/// supplies the Postgres-backed implementation; tests use the
/// in-memory one in [`crate::mem`].
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Unmatched transactions (`group_id IS NULL`) for `user_id` whose
    /// `transaction_date` falls in `[window_start, window_end]`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying store's error.
    async fn unmatched_transactions(
        &self,
        user_id: Uuid,
        window_start: CalendarDate,
        window_end: CalendarDate,
    ) -> Result<Vec<Transaction>, ExpenseError>;

    /// Unmatched transaction groups for `user_id` whose `display_date`
    /// falls in `[window_start, window_end]`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying store's error.
    async fn unmatched_groups(
        &self,
        user_id: Uuid,
        window_start: CalendarDate,
        window_end: CalendarDate,
    ) -> Result<Vec<TransactionGroup>, ExpenseError>;
}

/// Assembles the candidate pool for one receipt (steps 1-4):
/// fetches unmatched transactions and groups in the date window around
/// `date_r`, keeps only those within `AMOUNT_NEAR` of `amount_r`, and
/// drops anything already consumed earlier in this auto-match pass.
///
/// # Errors
///
/// Propagates the candidate source's error.
pub async fn assemble_pool<C: CandidateSource>(
    source: &C,
    user_id: Uuid,
    date_r: CalendarDate,
    amount_r: Decimal,
    consumed: &std::collections::HashSet<Uuid>,
    thresholds: &MatchingThresholds,
) -> Result<Vec<Candidate>, ExpenseError> {
    let half_width = Duration::days(thresholds.date_window_days);
    let window_start = date_r - half_width;
    let window_end = date_r + half_width;

    let transactions = source
        .unmatched_transactions(user_id, window_start, window_end)
        .await?;
    let groups = source
        .unmatched_groups(user_id, window_start, window_end)
        .await?;

    let mut pool = Vec::with_capacity(transactions.len() + groups.len());
    for t in transactions {
        if consumed.contains(&t.id) {
            continue;
        }
        if within_amount_near(amount_r, t.amount.as_decimal(), thresholds) {
            pool.push(Candidate::Transaction(t));
        }
    }
    for g in groups {
        if consumed.contains(&g.id) {
            continue;
        }
        if within_amount_near(amount_r, g.combined_amount.as_decimal(), thresholds) {
            pool.push(Candidate::Group(g));
        }
    }

    Ok(pool)
}

fn within_amount_near(amount_r: Decimal, amount_c: Decimal, thresholds: &MatchingThresholds) -> bool {
    (amount_r - amount_c.abs()).abs() <= thresholds.amount_near
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use xpn_core::MatchStatus;

    fn date(y: i32, m: u32, d: u32) -> CalendarDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct StubSource {
        transactions: Vec<Transaction>,
        groups: Vec<TransactionGroup>,
    }

    #[async_trait]
    impl CandidateSource for StubSource {
        async fn unmatched_transactions(
            &self,
            _user_id: Uuid,
            _window_start: CalendarDate,
            _window_end: CalendarDate,
        ) -> Result<Vec<Transaction>, ExpenseError> {
            Ok(self.transactions.clone())
        }

        async fn unmatched_groups(
            &self,
            _user_id: Uuid,
            _window_start: CalendarDate,
            _window_end: CalendarDate,
        ) -> Result<Vec<TransactionGroup>, ExpenseError> {
            Ok(self.groups.clone())
        }
    }

    fn transaction(amount: Decimal) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            description: "ACME COFFEE #0123".to_string(),
            original_description: "ACME COFFEE #0123".to_string(),
            transaction_date: date(2024, 5, 10),
            amount: amount.into(),
            match_status: MatchStatus::Unmatched,
            group_id: None,
            matched_receipt_id: None,
        }
    }

    #[tokio::test]
    async fn pool_filters_out_far_amounts_and_consumed_candidates() {
        let near = transaction(dec!(-42.17));
        let far = transaction(dec!(-90.00));
        let consumed_one = transaction(dec!(-42.20));
        let consumed_id = consumed_one.id;

        let source = StubSource {
            transactions: vec![near.clone(), far, consumed_one],
            groups: vec![],
        };
        let mut consumed = std::collections::HashSet::new();
        consumed.insert(consumed_id);

        let pool = assemble_pool(
            &source,
            Uuid::new_v4(),
            date(2024, 5, 10),
            dec!(42.17),
            &consumed,
            &MatchingThresholds::default(),
        )
        .await
        .unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id(), near.id);
    }
}
