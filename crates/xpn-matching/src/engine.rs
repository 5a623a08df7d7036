//! C8's public operations: decision logic and the match lifecycle.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;
use xpn_core::{
    CancellationToken, MatchRecordStatus, MatchStatus, Receipt, ReceiptTransactionMatch,
};
use xpn_error::{ExpenseError, MAX_TRANSIENT_RETRIES};
use xpn_vendor_registry::VendorAliasStore;

use crate::candidate::{assemble_pool, Candidate, CandidateSource};
use crate::scoring::{score_candidate, MatchingThresholds, ScoreBreakdown};
use crate::store::{BatchSelector, ManualMatchTarget, MatchStore};

/// Cap on `list_candidates`' `limit` ("`list_candidates(receipt,
/// limit ≤ 50)`").
pub const MAX_LIST_CANDIDATES: usize = 50;

/// One scored candidate: the candidate itself plus its component and
/// total scores.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The transaction or group this score was computed against.
    pub candidate: Candidate,
    /// The component and total scores.
    pub breakdown: ScoreBreakdown,
}

/// What [`MatchingEngine::run_auto_match`] returns.
#[derive(Debug, Clone)]
pub struct AutoMatchResult {
    /// Number of receipts a proposal was produced for.
    pub proposed: u32,
    /// Number of receipts considered.
    pub processed: u32,
    /// Number of receipts whose candidate pool was ambiguous.
    pub ambiguous: u32,
    /// Wall-clock duration of the whole pass.
    pub duration_ms: u64,
    /// The proposals produced, in the order their receipts were
    /// processed.
    pub proposals: Vec<ReceiptTransactionMatch>,
    /// How many proposals matched a single transaction.
    pub transaction_match_count: u32,
    /// How many proposals matched a transaction group.
    pub group_match_count: u32,
}

/// What [`MatchingEngine::confirm`] returns: the confirmed record plus
/// the context the caller needs to drive the learning loop (C6), which
/// this crate does not depend on directly (event 1 is the
/// facade's job to trigger).
#[derive(Debug, Clone)]
pub struct ConfirmedMatch {
    /// The now-Confirmed match record.
    pub record: ReceiptTransactionMatch,
    /// The transaction description or group display name the learning
    /// loop should derive a vendor pattern from.
    pub description_or_group_name: String,
    /// `true` if this match links to a group.
    pub is_group: bool,
    /// GL code the caller asked to confirm on this match, if any.
    pub override_gl: Option<String>,
    /// Department the caller asked to confirm on this match, if any.
    pub override_department: Option<String>,
}

/// What [`MatchingEngine::batch_approve`] returns: partial failures are
/// counted and skipped, successful ones commit.
#[derive(Debug, Clone, Default)]
pub struct BatchApproveResult {
    /// Matches successfully confirmed.
    pub confirmed: Vec<ReceiptTransactionMatch>,
    /// Match ids that failed to confirm, with the error's stable code.
    pub failed: Vec<(Uuid, String)>,
}

enum Decision {
    Proposed(ScoredCandidate),
    Ambiguous,
    NoProposal,
}

/// Applies `MIN_CONFIDENCE` and `AMBIGUOUS_GAP` to a receipt's scored
/// candidate pool ("Decision").
fn decide(mut scored: Vec<ScoredCandidate>, thresholds: &MatchingThresholds) -> Decision {
    scored.retain(|s| s.breakdown.total >= thresholds.min_confidence);
    if scored.is_empty() {
        return Decision::NoProposal;
    }
    scored.sort_by(|a, b| {
        b.breakdown
            .total
            .partial_cmp(&a.breakdown.total)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if scored.len() > 1 {
        let gap = scored[0].breakdown.total - scored[1].breakdown.total;
        if gap <= thresholds.ambiguous_gap {
            return Decision::Ambiguous;
        }
    }
    Decision::Proposed(scored.remove(0))
}

fn cancelled_error() -> ExpenseError {
    ExpenseError::TransientFault {
        message: "auto-match pass cancelled".to_string(),
        attempt: 1,
        max_attempts: MAX_TRANSIENT_RETRIES,
    }
}

fn not_owned(match_id: Uuid) -> ExpenseError {
    ExpenseError::NotFound {
        entity: "receipt_transaction_match",
        id: match_id.to_string(),
    }
}

fn not_proposed(match_id: Uuid) -> ExpenseError {
    ExpenseError::InvalidState {
        entity: "receipt_transaction_match",
        id: match_id.to_string(),
        message: "only a Proposed match can be confirmed or rejected".to_string(),
    }
}

struct PendingProposal {
    receipt: Receipt,
    winner: ScoredCandidate,
}

/// C8's public operations, parameterized over where candidates come
/// from, where matches are persisted, and the alias catalog the vendor
/// axis reads.
pub struct MatchingEngine<C: CandidateSource, M: MatchStore, V: VendorAliasStore> {
    candidate_source: C,
    match_store: M,
    alias_store: V,
    thresholds: MatchingThresholds,
}

impl<C: CandidateSource, M: MatchStore, V: VendorAliasStore> MatchingEngine<C, M, V> {
    /// Wires C8 to its collaborators and scoring thresholds.
    pub fn new(candidate_source: C, match_store: M, alias_store: V, thresholds: MatchingThresholds) -> Self {
        Self {
            candidate_source,
            match_store,
            alias_store,
            thresholds,
        }
    }

    /// Scores and proposes matches for `receipts`, one receipt at a
    /// time, applying the candidate-pool and decision rules in order. A
    /// single candidate can only win once per pass: a winner is removed
    /// from the pool for every receipt processed afterward.
    ///
    /// All writes happen in one final pass after every receipt has been
    /// scored, so a cancellation detected at any point — mid-scoring or
    /// just before the commit step — leaves nothing persisted. A
    /// cancelled auto-match must not leave partial proposals committed.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::TransientFault`] if `cancel` fires before the
    /// pass completes; otherwise propagates the candidate source,
    /// alias store, or match store's error.
    pub async fn run_auto_match(
        &self,
        user_id: Uuid,
        receipts: &[Receipt],
        cancel: &CancellationToken,
    ) -> Result<AutoMatchResult, ExpenseError> {
        let started = Instant::now();
        let mut consumed: HashSet<Uuid> = HashSet::new();
        let mut pending: Vec<PendingProposal> = Vec::new();
        let mut ambiguous = 0u32;
        let mut processed = 0u32;

        for receipt in receipts {
            if cancel.is_cancelled() {
                return Err(cancelled_error());
            }
            processed += 1;

            let Some(amount_r) = receipt.amount_extracted.map(|m| m.as_decimal()) else {
                tracing::warn!(receipt_id = %receipt.id, "receipt has no extracted amount, skipping");
                continue;
            };
            let Some(date_r) = receipt.date_extracted else {
                tracing::warn!(receipt_id = %receipt.id, "receipt has no extracted date, skipping");
                continue;
            };
            let vendor_r = receipt.vendor_extracted.clone().unwrap_or_default();

            let pool = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled_error()),
                result = assemble_pool(
                    &self.candidate_source,
                    user_id,
                    date_r,
                    amount_r,
                    &consumed,
                    &self.thresholds,
                ) => result?,
            };

            let scored = self.score_pool(amount_r, date_r, &vendor_r, pool).await?;

            match decide(scored, &self.thresholds) {
                Decision::NoProposal => {}
                Decision::Ambiguous => ambiguous += 1,
                Decision::Proposed(winner) => {
                    consumed.insert(winner.candidate.id());
                    pending.push(PendingProposal {
                        receipt: receipt.clone(),
                        winner,
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(cancelled_error());
        }

        let mut proposals = Vec::with_capacity(pending.len());
        let mut transaction_match_count = 0u32;
        let mut group_match_count = 0u32;

        for p in pending {
            let (transaction_id, transaction_group_id) = match &p.winner.candidate {
                Candidate::Transaction(t) => (Some(t.id), None),
                Candidate::Group(g) => (None, Some(g.id)),
            };

            let record = ReceiptTransactionMatch {
                id: Uuid::new_v4(),
                user_id,
                receipt_id: p.receipt.id,
                transaction_id,
                transaction_group_id,
                status: MatchRecordStatus::Proposed,
                confidence_score: p.winner.breakdown.total,
                amount_score: p.winner.breakdown.amount_score,
                date_score: p.winner.breakdown.date_score,
                vendor_score: p.winner.breakdown.vendor_score,
                match_reason: format!(
                    "auto-matched at {:.0}% confidence",
                    p.winner.breakdown.total
                ),
                matched_vendor_alias_id: p.winner.breakdown.matched_vendor_alias_id,
                is_manual_match: false,
                confirmed_at: None,
                confirmed_by_user_id: None,
            };
            let stored = self.match_store.insert_match(record).await?;

            let mut receipt = p.receipt;
            receipt.match_status = MatchStatus::Proposed;
            if let Some(tid) = transaction_id {
                receipt.matched_transaction_id = Some(tid);
            }
            self.match_store.save_receipt(&receipt).await?;

            if let Candidate::Group(mut g) = p.winner.candidate {
                g.match_status = MatchStatus::Proposed;
                self.match_store.save_group(&g).await?;
                group_match_count += 1;
            } else {
                transaction_match_count += 1;
            }

            proposals.push(stored);
        }

        Ok(AutoMatchResult {
            proposed: proposals.len() as u32,
            processed,
            ambiguous,
            duration_ms: started.elapsed().as_millis() as u64,
            proposals,
            transaction_match_count,
            group_match_count,
        })
    }

    /// Scores every candidate in `pool`.
    async fn score_pool(
        &self,
        amount_r: Decimal,
        date_r: xpn_core::CalendarDate,
        vendor_r: &str,
        pool: Vec<Candidate>,
    ) -> Result<Vec<ScoredCandidate>, ExpenseError> {
        let mut scored = Vec::with_capacity(pool.len());
        for candidate in pool {
            let breakdown =
                score_candidate(amount_r, date_r, vendor_r, &candidate, &self.alias_store, &self.thresholds)
                    .await?;
            scored.push(ScoredCandidate { candidate, breakdown });
        }
        Ok(scored)
    }

    /// Confirms a Proposed match ("Confirmation / rejection").
    ///
    /// # Errors
    ///
    /// [`ExpenseError::NotFound`] if the match does not exist or does
    /// not belong to `user_id`; [`ExpenseError::InvalidState`] if it is
    /// not Proposed; otherwise propagates the match store's error.
    pub async fn confirm(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        override_display_name: Option<String>,
        override_gl: Option<String>,
        override_department: Option<String>,
    ) -> Result<ConfirmedMatch, ExpenseError> {
        let mut record = self.match_store.get_match(match_id).await?;
        if record.user_id != user_id {
            return Err(not_owned(match_id));
        }
        if record.status != MatchRecordStatus::Proposed {
            return Err(not_proposed(match_id));
        }

        record.status = MatchRecordStatus::Confirmed;
        record.confirmed_at = Some(Utc::now());
        record.confirmed_by_user_id = Some(user_id);
        self.match_store.save_match(&record).await?;

        let mut receipt = self.match_store.get_receipt(record.receipt_id).await?;
        receipt.match_status = MatchStatus::Matched;

        let (description_or_group_name, is_group) = if let Some(transaction_id) = record.transaction_id {
            let mut transaction = self.match_store.get_transaction(transaction_id).await?;
            transaction.match_status = MatchStatus::Matched;
            transaction.matched_receipt_id = Some(record.receipt_id);
            let description = transaction.description.clone();
            self.match_store.save_transaction(&transaction).await?;
            receipt.matched_transaction_id = Some(transaction_id);
            (description, false)
        } else {
            let group_id = record
                .transaction_group_id
                .expect("a match links to exactly one of transaction/group");
            let mut group = self.match_store.get_group(group_id).await?;
            group.match_status = MatchStatus::Matched;
            group.matched_receipt_id = Some(record.receipt_id);
            if let Some(name) = &override_display_name {
                group.name = name.clone();
            }
            let name = group.name.clone();
            self.match_store.save_group(&group).await?;
            (name, true)
        };

        self.match_store.save_receipt(&receipt).await?;

        Ok(ConfirmedMatch {
            record,
            description_or_group_name,
            is_group,
            override_gl,
            override_department,
        })
    }

    /// Rejects a Proposed match: the receipt and any group
    /// revert to Unmatched; a single transaction's state is left
    /// untouched, since `propose` never marked it Proposed in the first
    /// place.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::NotFound`] if the match does not exist or does
    /// not belong to `user_id`; [`ExpenseError::InvalidState`] if it is
    /// not Proposed; otherwise propagates the match store's error.
    pub async fn reject(
        &self,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<ReceiptTransactionMatch, ExpenseError> {
        let mut record = self.match_store.get_match(match_id).await?;
        if record.user_id != user_id {
            return Err(not_owned(match_id));
        }
        if record.status != MatchRecordStatus::Proposed {
            return Err(not_proposed(match_id));
        }

        record.status = MatchRecordStatus::Rejected;
        self.match_store.save_match(&record).await?;

        let mut receipt = self.match_store.get_receipt(record.receipt_id).await?;
        receipt.match_status = MatchStatus::Unmatched;
        receipt.matched_transaction_id = None;
        self.match_store.save_receipt(&receipt).await?;

        if let Some(group_id) = record.transaction_group_id {
            let mut group = self.match_store.get_group(group_id).await?;
            group.match_status = MatchStatus::Unmatched;
            group.matched_receipt_id = None;
            self.match_store.save_group(&group).await?;
        }

        Ok(record)
    }

    /// Links a receipt directly to a transaction or group, bypassing
    /// scoring ("`manual_match`"): allowed only when both
    /// sides are Unmatched, and always produces an immediately
    /// Confirmed match at 100% confidence with every component score at
    /// 0.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::InvalidState`] if either side is not Unmatched;
    /// otherwise propagates the match store's error.
    pub async fn manual_match(
        &self,
        receipt_id: Uuid,
        target: ManualMatchTarget,
        user_id: Uuid,
    ) -> Result<ReceiptTransactionMatch, ExpenseError> {
        let mut receipt = self.match_store.get_receipt(receipt_id).await?;
        if receipt.match_status != MatchStatus::Unmatched {
            return Err(ExpenseError::InvalidState {
                entity: "receipt",
                id: receipt_id.to_string(),
                message: "manual_match requires an Unmatched receipt".to_string(),
            });
        }

        let (transaction_id, transaction_group_id) = match target {
            ManualMatchTarget::Transaction(id) => {
                let mut transaction = self.match_store.get_transaction(id).await?;
                if transaction.match_status != MatchStatus::Unmatched {
                    return Err(ExpenseError::InvalidState {
                        entity: "transaction",
                        id: id.to_string(),
                        message: "manual_match requires an Unmatched transaction".to_string(),
                    });
                }
                transaction.match_status = MatchStatus::Matched;
                transaction.matched_receipt_id = Some(receipt_id);
                self.match_store.save_transaction(&transaction).await?;
                (Some(id), None)
            }
            ManualMatchTarget::Group(id) => {
                let mut group = self.match_store.get_group(id).await?;
                if group.match_status != MatchStatus::Unmatched {
                    return Err(ExpenseError::InvalidState {
                        entity: "transaction_group",
                        id: id.to_string(),
                        message: "manual_match requires an Unmatched group".to_string(),
                    });
                }
                group.match_status = MatchStatus::Matched;
                group.matched_receipt_id = Some(receipt_id);
                self.match_store.save_group(&group).await?;
                (None, Some(id))
            }
        };

        receipt.match_status = MatchStatus::Matched;
        if let Some(tid) = transaction_id {
            receipt.matched_transaction_id = Some(tid);
        }
        self.match_store.save_receipt(&receipt).await?;

        let record = ReceiptTransactionMatch {
            id: Uuid::new_v4(),
            user_id,
            receipt_id,
            transaction_id,
            transaction_group_id,
            status: MatchRecordStatus::Confirmed,
            confidence_score: 100.0,
            amount_score: 0.0,
            date_score: 0.0,
            vendor_score: 0.0,
            match_reason: "manually matched by user".to_string(),
            matched_vendor_alias_id: None,
            is_manual_match: true,
            confirmed_at: Some(Utc::now()),
            confirmed_by_user_id: Some(user_id),
        };

        self.match_store.insert_match(record).await
    }

    /// Confirms a set of Proposed matches in one pass: partial failures
    /// are counted and skipped, successful ones commit independently.
    ///
    /// # Errors
    ///
    /// Propagates the match store's error only when listing the
    /// candidate set itself fails (e.g. [`BatchSelector::MinConfidence`]
    /// needs to enumerate a user's Proposed matches); per-match failures
    /// are collected in the result instead of short-circuiting the
    /// batch.
    pub async fn batch_approve(
        &self,
        user_id: Uuid,
        selector: BatchSelector,
    ) -> Result<BatchApproveResult, ExpenseError> {
        let candidates = match selector {
            BatchSelector::ExplicitIds(ids) => ids,
            BatchSelector::MinConfidence(min_confidence) => self
                .match_store
                .proposed_matches_for_user(user_id)
                .await?
                .into_iter()
                .filter(|m| m.confidence_score >= min_confidence)
                .map(|m| m.id)
                .collect(),
        };

        let mut result = BatchApproveResult::default();
        for match_id in candidates {
            match self.confirm(match_id, user_id, None, None, None).await {
                Ok(outcome) => result.confirmed.push(outcome.record),
                Err(err) => result.failed.push((match_id, err.code().to_string())),
            }
        }

        Ok(result)
    }

    /// Re-scores `receipt`'s current candidate pool without consuming
    /// or persisting anything, for manual review. `limit` is clamped to
    /// [`MAX_LIST_CANDIDATES`].
    ///
    /// # Errors
    ///
    /// Propagates the candidate source or alias store's error.
    pub async fn list_candidates(
        &self,
        receipt: &Receipt,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>, ExpenseError> {
        let limit = limit.min(MAX_LIST_CANDIDATES);
        let (Some(amount_r), Some(date_r)) = (
            receipt.amount_extracted.map(|m| m.as_decimal()),
            receipt.date_extracted,
        ) else {
            return Ok(Vec::new());
        };
        let vendor_r = receipt.vendor_extracted.clone().unwrap_or_default();

        let pool = assemble_pool(
            &self.candidate_source,
            receipt.user_id,
            date_r,
            amount_r,
            &HashSet::new(),
            &self.thresholds,
        )
        .await?;

        let mut scored = self.score_pool(amount_r, date_r, &vendor_r, pool).await?;
        scored.sort_by(|a, b| {
            b.breakdown
                .total
                .partial_cmp(&a.breakdown.total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }
}
