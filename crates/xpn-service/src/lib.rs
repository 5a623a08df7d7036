// SPDX-License-Identifier: MIT OR Apache-2.0
//! Application facade wiring C1-C10 into the operations an outer layer
//! calls, structured as a single orchestrator over its collaborators,
//! generic over them rather than `dyn`-erased: every component crate it
//! wires (`TierRouter`,
//! `MatchingEngine`, `LearningLoop`, `FingerprintResolver`) is itself
//! generic over its store/chat type, and this facade follows the same
//! shape rather than boxing them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use xpn_ai_adapter::{AiAdapter, Chat};
use xpn_config::EngineConfig;
use xpn_core::{CancellationToken, OperationType, Receipt, ReceiptTransactionMatch, TierUsageLog, VendorCategory};
use xpn_error::ExpenseError;
use xpn_fingerprint::{FingerprintOutcome, FingerprintResolver, FingerprintStore};
use xpn_hash_index::{HashIndex, HashIndexStore};
use xpn_learning::{CategorizationEdit, LearningLoop, LearningOutcome};
use xpn_matching::candidate::CandidateSource;
use xpn_matching::engine::{AutoMatchResult, BatchApproveResult, MatchingEngine, ScoredCandidate};
use xpn_matching::scoring::MatchingThresholds;
use xpn_matching::store::{BatchSelector, ManualMatchTarget, MatchStore};
use xpn_metering::{self, DescriptionUsage, PromotionCandidate, TierUsageSummary, UnitCosts};
use xpn_tier_router::{Operation, ResolveContext, TierResolution, TierRouter};
use xpn_vector_index::{EmbeddingStore, VectorIndex};
use xpn_vendor_registry::{VendorAliasStore, VendorRegistry};

/// Persistence seam for the append-only tier usage log: ingestion is
/// `xpn-db`'s job. No component crate already defines this trait —
/// `xpn-db::TierUsageLogRepo` implements it here.
#[async_trait]
pub trait UsageLogStore: Send + Sync {
    /// Appends one usage record.
    async fn insert(&self, log: &TierUsageLog) -> Result<(), ExpenseError>;

    /// Every log row for `user_id` with `created_at` in `range`, for
    /// [`ExpenseEngine::tier_usage`].
    async fn for_user_between(
        &self,
        user_id: Uuid,
        range: Range<DateTime<Utc>>,
    ) -> Result<Vec<TierUsageLog>, ExpenseError>;

    /// As [`UsageLogStore::for_user_between`], joined against the
    /// description each log row was produced for, for
    /// [`ExpenseEngine::vendor_candidates`].
    async fn tier3_samples_between(
        &self,
        user_id: Uuid,
        range: Range<DateTime<Utc>>,
    ) -> Result<Vec<DescriptionUsage>, ExpenseError>;
}

/// Narrowed cache-hit view over a user's usage log, returned by
/// [`ExpenseEngine::cache_stats`]: the fraction of normalization calls
/// C1 answered without falling through to C3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Normalization calls observed in the window.
    pub total_normalizations: u64,
    /// Of those, how many were tier-1 cache hits.
    pub cache_hits: u64,
}

impl CacheStats {
    /// `cache_hits / total_normalizations`, `0.0` if the window is empty.
    pub fn hit_rate(&self) -> f64 {
        if self.total_normalizations == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_normalizations as f64
        }
    }
}

/// What [`ExpenseEngine::confirm_match`] and
/// [`ExpenseEngine::manual_match`] return: the confirmed record plus
/// whatever the learning loop (C6) did with it. `learning` is `None`
/// when C6 failed: that failure is logged and never fails the match
/// confirmation it rode in on.
#[derive(Debug, Clone)]
pub struct MatchConfirmation {
    /// The now-Confirmed match record.
    pub record: ReceiptTransactionMatch,
    /// What the learning loop did, if it succeeded.
    pub learning: Option<LearningOutcome>,
}

/// C1-C10 wired together behind the handful of operations callers
/// need. Parameterized over every store/chat type its collaborators
/// need; `xpn-cli` instantiates this over the `xpn-db` Postgres types.
pub struct ExpenseEngine<H, E, V, C, F, Cand, M, U>
where
    H: HashIndexStore,
    E: EmbeddingStore + Clone,
    V: VendorAliasStore + Clone,
    C: Chat + Clone,
    F: FingerprintStore,
    Cand: CandidateSource,
    M: MatchStore,
    U: UsageLogStore,
{
    tier_router: TierRouter<H, E, V, C>,
    matching_engine: MatchingEngine<Cand, M, V>,
    learning_loop: LearningLoop<E, V>,
    fingerprint_resolver: FingerprintResolver<F, C>,
    usage_log: U,
    unit_costs: UnitCosts,
    vendor_candidate_threshold_high: u64,
    vendor_candidate_threshold_medium: u64,
    /// One lock per user so two concurrent `run_auto_match` calls for
    /// the same user serialize, while different users proceed in
    /// parallel, using a keyed `Arc<Mutex<..>>`-per-resource shape
    /// rather than one shared lock.
    auto_match_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<H, E, V, C, F, Cand, M, U> ExpenseEngine<H, E, V, C, F, Cand, M, U>
where
    H: HashIndexStore,
    E: EmbeddingStore + Clone,
    V: VendorAliasStore + Clone,
    C: Chat + Clone,
    F: FingerprintStore,
    Cand: CandidateSource,
    M: MatchStore,
    U: UsageLogStore,
{
    /// Wires every component crate to its collaborators using
    /// `config`'s thresholds, cloning the shared stores (`vector_store`,
    /// `vendor_store`, `chat`) into each wrapper that independently
    /// owns one, the way `xpn-db`'s repository types are cloned for
    /// this same reason.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hash_index_store: H,
        vector_store: E,
        vendor_store: V,
        chat: C,
        fingerprint_store: F,
        candidate_source: Cand,
        match_store: M,
        usage_log: U,
        config: &EngineConfig,
    ) -> Self {
        let tier_router = TierRouter::new(
            HashIndex::new(hash_index_store),
            VectorIndex::new(vector_store.clone()),
            VendorRegistry::new(vendor_store.clone()),
            AiAdapter::with_timeout(chat.clone(), config.ai_timeout),
        )
        .with_embed_similarity_threshold(config.embed_similarity_threshold);

        let thresholds = MatchingThresholds {
            min_confidence: config.min_confidence as f64,
            ambiguous_gap: config.ambiguous_gap as f64,
            amount_exact: config.amount_exact,
            amount_near: config.amount_near,
            date_window_days: config.date_window_days,
            fuzzy_threshold: config.fuzzy_threshold,
        };
        let matching_engine = MatchingEngine::new(candidate_source, match_store, vendor_store.clone(), thresholds);

        let learning_loop = LearningLoop::new(
            VectorIndex::new(vector_store),
            VendorRegistry::new(vendor_store),
            config.vendor_confirm_threshold,
        );

        let fingerprint_resolver =
            FingerprintResolver::new(fingerprint_store, AiAdapter::with_timeout(chat, config.ai_timeout));

        Self {
            tier_router,
            matching_engine,
            learning_loop,
            fingerprint_resolver,
            usage_log,
            unit_costs: UnitCosts {
                tier2_cost_usd: config.tier2_cost_usd,
                tier3_cost_usd: config.tier3_cost_usd,
            },
            vendor_candidate_threshold_high: 10,
            vendor_candidate_threshold_medium: 5,
            auto_match_locks: Mutex::new(HashMap::new()),
        }
    }

    /// C1 -> C3 fallback for a raw transaction description
    /// (`Operation::Normalize`). Persists the usage log C4 produces and
    /// returns the resolution even if persisting that log failed —
    /// metering data loss must never fail the caller's request.
    ///
    /// # Errors
    ///
    /// This call itself cannot fail; it is `Result` only so future
    /// variants (e.g. a hard validation error on `raw_description`) can
    /// be added without a breaking signature change.
    pub async fn normalize(
        &self,
        user_id: Uuid,
        raw_description: &str,
        transaction_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<TierResolution, ExpenseError> {
        let (resolution, log) = self
            .tier_router
            .resolve(
                Operation::Normalize {
                    raw_description: raw_description.to_string(),
                },
                ResolveContext {
                    user_id,
                    transaction_id,
                },
                cancel,
            )
            .await;
        self.record_usage(log).await;
        Ok(resolution)
    }

    /// C1 -> C2 -> C3 fallback for a GL code
    /// (`Operation::CategorizeGl`).
    ///
    /// # Errors
    ///
    /// See [`ExpenseEngine::normalize`].
    pub async fn suggest_gl(
        &self,
        user_id: Uuid,
        normalized_description: &str,
        category_hint: Vec<VendorCategory>,
        transaction_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<TierResolution, ExpenseError> {
        let (resolution, log) = self
            .tier_router
            .resolve(
                Operation::CategorizeGl {
                    normalized_description: normalized_description.to_string(),
                    category_hint,
                },
                ResolveContext {
                    user_id,
                    transaction_id,
                },
                cancel,
            )
            .await;
        self.record_usage(log).await;
        Ok(resolution)
    }

    /// As [`ExpenseEngine::suggest_gl`], for department instead of GL
    /// code (`Operation::CategorizeDepartment`).
    ///
    /// # Errors
    ///
    /// See [`ExpenseEngine::normalize`].
    pub async fn suggest_department(
        &self,
        user_id: Uuid,
        normalized_description: &str,
        category_hint: Vec<VendorCategory>,
        transaction_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<TierResolution, ExpenseError> {
        let (resolution, log) = self
            .tier_router
            .resolve(
                Operation::CategorizeDepartment {
                    normalized_description: normalized_description.to_string(),
                    category_hint,
                },
                ResolveContext {
                    user_id,
                    transaction_id,
                },
                cancel,
            )
            .await;
        self.record_usage(log).await;
        Ok(resolution)
    }

    /// Event 2 of C6: a user corrected a suggested
    /// categorization. Unlike [`ExpenseEngine::confirm_match`], this
    /// call *is* the learning write, so its failure propagates rather
    /// than being swallowed.
    ///
    /// # Errors
    ///
    /// Propagates the vendor registry's or embedding store's error.
    pub async fn confirm_categorization(
        &self,
        edit: CategorizationEdit,
    ) -> Result<LearningOutcome, ExpenseError> {
        self.learning_loop.on_categorization_edited(edit).await
    }

    /// Runs C8's auto-match pass for `user_id` over `receipts`, holding
    /// that user's lock for the duration so a second concurrent call
    /// for the same user waits rather than racing
    ///
    /// # Errors
    ///
    /// See [`xpn_matching::engine::MatchingEngine::run_auto_match`].
    pub async fn run_auto_match(
        &self,
        user_id: Uuid,
        receipts: &[Receipt],
        cancel: &CancellationToken,
    ) -> Result<AutoMatchResult, ExpenseError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        self.matching_engine.run_auto_match(user_id, receipts, cancel).await
    }

    /// Confirms a Proposed match and, on success, feeds the confirmation
    /// into C6 (event 1). A C6 failure is logged and does not
    /// fail this call: the match is already confirmed.
    ///
    /// # Errors
    ///
    /// See [`xpn_matching::engine::MatchingEngine::confirm`].
    pub async fn confirm_match(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        override_display_name: Option<String>,
        override_gl: Option<String>,
        override_department: Option<String>,
    ) -> Result<MatchConfirmation, ExpenseError> {
        let confirmed = self
            .matching_engine
            .confirm(match_id, user_id, override_display_name, override_gl, override_department)
            .await?;

        let learning = match self
            .learning_loop
            .on_match_confirmed(
                &confirmed.description_or_group_name,
                confirmed.is_group,
                confirmed.override_gl.clone(),
                confirmed.override_department.clone(),
            )
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!(error = %err, match_id = %match_id, "learning loop failed on confirmed match");
                None
            }
        };

        Ok(MatchConfirmation {
            record: confirmed.record,
            learning,
        })
    }

    /// Rejects a Proposed match Rejections do not teach C6
    /// anything, so no learning call rides along.
    ///
    /// # Errors
    ///
    /// See [`xpn_matching::engine::MatchingEngine::reject`].
    pub async fn reject_match(
        &self,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<ReceiptTransactionMatch, ExpenseError> {
        self.matching_engine.reject(match_id, user_id).await
    }

    /// Links a receipt directly to a transaction or group via
    /// `manual_match`, then feeds C6 the same way
    /// [`ExpenseEngine::confirm_match`] does. `description_or_group_name`
    /// is supplied by the caller, who already looked the target up to
    /// build `target` — this avoids a second store round trip here.
    ///
    /// # Errors
    ///
    /// See [`xpn_matching::engine::MatchingEngine::manual_match`].
    pub async fn manual_match(
        &self,
        receipt_id: Uuid,
        target: ManualMatchTarget,
        user_id: Uuid,
        description_or_group_name: &str,
    ) -> Result<MatchConfirmation, ExpenseError> {
        let record = self.matching_engine.manual_match(receipt_id, target, user_id).await?;

        let is_group = matches!(target, ManualMatchTarget::Group(_));
        let learning = match self
            .learning_loop
            .on_match_confirmed(description_or_group_name, is_group, None, None)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!(error = %err, receipt_id = %receipt_id, "learning loop failed on manual match");
                None
            }
        };

        Ok(MatchConfirmation { record, learning })
    }

    /// Confirms a batch of Proposed matches (`batch_approve`).
    /// Unlike [`ExpenseEngine::confirm_match`], this does not trigger C6
    /// per match: `xpn-matching`'s own `batch_approve` confirms through
    /// its internal `confirm`, which does not surface the vendor context
    /// C6 needs back out to this layer.
    ///
    /// # Errors
    ///
    /// See [`xpn_matching::engine::MatchingEngine::batch_approve`].
    pub async fn batch_approve(
        &self,
        user_id: Uuid,
        selector: BatchSelector,
    ) -> Result<BatchApproveResult, ExpenseError> {
        self.matching_engine.batch_approve(user_id, selector).await
    }

    /// Re-scores a receipt's candidate pool for manual review via
    /// `list_candidates`.
    ///
    /// # Errors
    ///
    /// See [`xpn_matching::engine::MatchingEngine::list_candidates`].
    pub async fn list_candidates(
        &self,
        receipt: &Receipt,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>, ExpenseError> {
        self.matching_engine.list_candidates(receipt, limit).await
    }

    /// C7's statement-fingerprint resolution
    ///
    /// # Errors
    ///
    /// See [`xpn_fingerprint::FingerprintResolver::resolve`].
    pub async fn resolve_statement(
        &self,
        headers: &[String],
        sample_rows: &[Vec<String>],
        source_name: &str,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<FingerprintOutcome, ExpenseError> {
        self.fingerprint_resolver
            .resolve(headers, sample_rows, source_name, user_id, cancel)
            .await
    }

    /// Persists a caller-completed mapping for a fingerprint that came
    /// back [`FingerprintOutcome::NeedsConfirmation`].
    ///
    /// # Errors
    ///
    /// See [`xpn_fingerprint::FingerprintResolver::confirm`].
    #[allow(clippy::too_many_arguments)]
    pub async fn confirm_fingerprint(
        &self,
        header_hash: String,
        column_mapping: std::collections::BTreeMap<String, String>,
        date_format: String,
        amount_sign: xpn_core::AmountSign,
        source_name: &str,
        user_id: Uuid,
    ) -> Result<xpn_core::StatementFingerprint, ExpenseError> {
        self.fingerprint_resolver
            .confirm(header_hash, column_mapping, date_format, amount_sign, source_name, user_id)
            .await
    }

    /// C9's usage aggregation over `range`.
    ///
    /// # Errors
    ///
    /// Propagates the usage log store's error.
    pub async fn tier_usage(
        &self,
        user_id: Uuid,
        range: Range<DateTime<Utc>>,
        operation: Option<OperationType>,
    ) -> Result<TierUsageSummary, ExpenseError> {
        let logs = self.usage_log.for_user_between(user_id, range.clone()).await?;
        Ok(xpn_metering::aggregate(&logs, range, operation, &self.unit_costs))
    }

    /// Descriptions whose tier-3 usage suggests promoting them to a
    /// vendor alias.
    ///
    /// # Errors
    ///
    /// Propagates the usage log store's error.
    pub async fn vendor_candidates(
        &self,
        user_id: Uuid,
        window: Range<DateTime<Utc>>,
    ) -> Result<Vec<PromotionCandidate>, ExpenseError> {
        let samples = self.usage_log.tier3_samples_between(user_id, window.clone()).await?;
        Ok(xpn_metering::vendor_candidates(
            &samples,
            window,
            self.vendor_candidate_threshold_high,
            self.vendor_candidate_threshold_medium,
        ))
    }

    /// C1's cache-hit rate over `range` (`cache_stats`),
    /// restricted to normalization calls (the only operation C1
    /// fronts).
    ///
    /// # Errors
    ///
    /// Propagates the usage log store's error.
    pub async fn cache_stats(
        &self,
        user_id: Uuid,
        range: Range<DateTime<Utc>>,
    ) -> Result<CacheStats, ExpenseError> {
        let logs = self.usage_log.for_user_between(user_id, range).await?;
        let mut stats = CacheStats {
            total_normalizations: 0,
            cache_hits: 0,
        };
        for log in &logs {
            if log.operation_type != OperationType::Normalization {
                continue;
            }
            stats.total_normalizations += 1;
            if log.cache_hit {
                stats.cache_hits += 1;
            }
        }
        Ok(stats)
    }

    async fn record_usage(&self, log: TierUsageLog) {
        if let Err(err) = self.usage_log.insert(&log).await {
            tracing::warn!(error = %err, "failed to persist tier usage log");
        }
    }

    async fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.auto_match_locks.lock().await;
        locks.entry(user_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use xpn_ai_adapter::ChatMessage;
    use xpn_core::{CalendarDate, MatchRecordStatus, MatchStatus, Money};
    use xpn_fingerprint::mem::InMemoryFingerprintStore;
    use xpn_hash_index::mem::InMemoryHashIndexStore;
    use xpn_matching::mem::InMemoryMatchWorld;
    use xpn_vector_index::mem::InMemoryEmbeddingStore;
    use xpn_vendor_registry::mem::InMemoryVendorAliasStore;

    #[derive(Clone)]
    struct ScriptedChat(String);

    #[async_trait]
    impl Chat for ScriptedChat {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, ExpenseError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct InMemoryUsageLog {
        rows: Mutex<Vec<TierUsageLog>>,
    }

    #[async_trait]
    impl UsageLogStore for InMemoryUsageLog {
        async fn insert(&self, log: &TierUsageLog) -> Result<(), ExpenseError> {
            self.rows.lock().await.push(log.clone());
            Ok(())
        }

        async fn for_user_between(
            &self,
            user_id: Uuid,
            range: Range<DateTime<Utc>>,
        ) -> Result<Vec<TierUsageLog>, ExpenseError> {
            Ok(self
                .rows
                .lock()
                .await
                .iter()
                .filter(|l| l.user_id == user_id && range.contains(&l.created_at))
                .cloned()
                .collect())
        }

        async fn tier3_samples_between(
            &self,
            _user_id: Uuid,
            _range: Range<DateTime<Utc>>,
        ) -> Result<Vec<DescriptionUsage>, ExpenseError> {
            Ok(Vec::new())
        }
    }

    #[allow(clippy::type_complexity)]
    fn engine(
        chat_response: &str,
        world: InMemoryMatchWorld,
    ) -> ExpenseEngine<
        InMemoryHashIndexStore,
        InMemoryEmbeddingStore,
        InMemoryVendorAliasStore,
        ScriptedChat,
        InMemoryFingerprintStore,
        InMemoryMatchWorld,
        InMemoryMatchWorld,
        InMemoryUsageLog,
    > {
        ExpenseEngine::new(
            InMemoryHashIndexStore::default(),
            InMemoryEmbeddingStore::default(),
            InMemoryVendorAliasStore::default(),
            ScriptedChat(chat_response.to_string()),
            InMemoryFingerprintStore::default(),
            world.clone(),
            world,
            InMemoryUsageLog::default(),
            &EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn normalize_falls_through_to_tier3_and_records_usage() {
        let engine = engine("{\"normalized\": \"Starbucks\"}", InMemoryMatchWorld::new());
        let user_id = Uuid::new_v4();

        let resolution = engine
            .normalize(user_id, "STARBUCKS #0123", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.value.as_deref(), Some("Starbucks"));

        let usage = engine
            .tier_usage(user_id, Utc::now() - chrono::Duration::hours(1)..Utc::now() + chrono::Duration::hours(1), None)
            .await
            .unwrap();
        assert_eq!(usage.total, 1);
    }

    #[tokio::test]
    async fn confirm_categorization_propagates_learning_errors_directly() {
        let engine = engine("{}", InMemoryMatchWorld::new());
        let outcome = engine
            .confirm_categorization(CategorizationEdit {
                description: "Brand New Vendor".to_string(),
                user_id: Uuid::new_v4(),
                transaction_id: None,
                confirmed_gl_code: Some("7000".to_string()),
                confirmed_department: None,
            })
            .await
            .unwrap();
        assert!(outcome.embedding_created);
    }

    #[tokio::test]
    async fn manual_match_confirms_and_feeds_learning_loop() {
        let world = InMemoryMatchWorld::new();
        let user_id = Uuid::new_v4();

        let receipt = Receipt {
            id: Uuid::new_v4(),
            user_id,
            match_status: MatchStatus::Unmatched,
            matched_transaction_id: None,
            amount_extracted: Some(Money::new(rust_decimal::Decimal::new(1000, 2))),
            date_extracted: Some(CalendarDate::from_ymd_opt(2024, 5, 1).unwrap()),
            vendor_extracted: Some("Acme".to_string()),
        };
        let transaction = xpn_core::Transaction {
            id: Uuid::new_v4(),
            user_id,
            description: "ACME COFFEE #0123".to_string(),
            original_description: "ACME COFFEE #0123".to_string(),
            amount: Money::new(rust_decimal::Decimal::new(1000, 2)),
            transaction_date: CalendarDate::from_ymd_opt(2024, 5, 1).unwrap(),
            match_status: MatchStatus::Unmatched,
            matched_receipt_id: None,
            group_id: None,
        };

        world.seed_receipt(receipt.clone());
        world.seed_transaction(transaction.clone());

        let engine = engine("{}", world);

        let confirmation = engine
            .manual_match(
                receipt.id,
                ManualMatchTarget::Transaction(transaction.id),
                user_id,
                &transaction.description,
            )
            .await
            .unwrap();

        assert_eq!(confirmation.record.status, MatchRecordStatus::Confirmed);
        assert!(confirmation.learning.is_some());
    }
}
