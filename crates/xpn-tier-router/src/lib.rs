// SPDX-License-Identifier: MIT OR Apache-2.0
//! C4: tier router Invokes C1 -> C2 -> C3 in order for a
//! given operation, stopping at the first usable result.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use uuid::Uuid;
use xpn_ai_adapter::{AiAdapter, Chat};
use xpn_core::{CancellationToken, OperationType, Tier, TierUsageLog, VendorCategory};
use xpn_error::ExpenseError;
use xpn_hash_index::{HashIndex, HashIndexStore};
use xpn_telemetry::OperationTimer;
use xpn_vector_index::{EmbeddingStore, VectorIndex};
use xpn_vendor_registry::{VendorAliasStore, VendorRegistry};

/// Confidence reported for a tier-1 normalization hit
pub const NORMALIZATION_TIER1_CONFIDENCE: f64 = 1.0;
/// Confidence reported for a tier-3 normalization answer
pub const NORMALIZATION_TIER3_CONFIDENCE: f64 = 0.85;
/// Confidence reported for a tier-1 categorization answer
pub const CATEGORIZATION_TIER1_CONFIDENCE: f64 = 0.95;
/// Confidence reported for a tier-2 categorization answer sourced from a
/// verified embedding
pub const CATEGORIZATION_TIER2_VERIFIED_CONFIDENCE: f64 = 0.90;
/// Confidence reported for a tier-2 categorization answer sourced from
/// an unverified embedding
pub const CATEGORIZATION_TIER2_UNVERIFIED_CONFIDENCE: f64 = 0.80;
/// Confidence reported for a tier-3 categorization answer
pub const CATEGORIZATION_TIER3_CONFIDENCE: f64 = 0.70;

/// Default embedding similarity threshold used by categorization's
/// tier-2 lookup (`EMBED_SIMILARITY_THRESHOLD`).
pub const DEFAULT_EMBED_SIMILARITY_THRESHOLD: f64 = 0.92;

/// An operation C4 can resolve
pub enum Operation {
    /// Description normalization: tier 1 content-cache, tier 3 AI. No
    /// tier 2.
    Normalize {
        /// The raw, unnormalized description as it appeared on the
        /// statement.
        raw_description: String,
    },
    /// GL-code categorization: tier 1 alias default, tier 2 nearest
    /// verified embedding, tier 3 AI.
    CategorizeGl {
        /// The already-normalized description.
        normalized_description: String,
        /// Narrows the tier-1 alias lookup, if known.
        category_hint: Vec<VendorCategory>,
    },
    /// Department categorization. Same tier shape as
    /// [`Operation::CategorizeGl`].
    CategorizeDepartment {
        /// The already-normalized description.
        normalized_description: String,
        /// Narrows the tier-1 alias lookup, if known.
        category_hint: Vec<VendorCategory>,
    },
}

impl Operation {
    fn operation_type(&self) -> OperationType {
        match self {
            Operation::Normalize { .. } => OperationType::Normalization,
            Operation::CategorizeGl { .. } => OperationType::CategorizeGl,
            Operation::CategorizeDepartment { .. } => OperationType::CategorizeDepartment,
        }
    }
}

/// Caller-supplied context for a [`TierRouter::resolve`] call.
pub struct ResolveContext {
    /// The user this request is scoped to.
    pub user_id: Uuid,
    /// The transaction this request concerns, if any — carried
    /// through to `TierUsageLog.transaction_id`.
    pub transaction_id: Option<Uuid>,
}

/// The outcome of a [`TierRouter::resolve`] call:
/// `resolve(operation, input, user_id, ctx) -> (result, tier,
/// confidence, latency)`.
///
/// `value` is `None` only in the degraded case: every tier either
/// missed or failed, and the caller gets [`Tier::None`] with confidence
/// `0.0` rather than a hard error.
#[derive(Debug, Clone, PartialEq)]
pub struct TierResolution {
    /// The resolved value: normalized text, or a GL/department code.
    pub value: Option<String>,
    /// The tier that produced `value`.
    pub tier: Tier,
    /// Confidence reported by the resolving tier.
    pub confidence: f64,
}

/// C4's public operation, parameterized over the stores and chat
/// backend it fronts.
pub struct TierRouter<H: HashIndexStore, E: EmbeddingStore, V: VendorAliasStore, C: Chat> {
    hash_index: HashIndex<H>,
    vector_index: VectorIndex<E>,
    vendor_registry: VendorRegistry<V>,
    ai: AiAdapter<C>,
    embed_similarity_threshold: f64,
}

impl<H: HashIndexStore, E: EmbeddingStore, V: VendorAliasStore, C: Chat> TierRouter<H, E, V, C> {
    /// Wires the four tiers together with [`DEFAULT_EMBED_SIMILARITY_THRESHOLD`].
    pub fn new(
        hash_index: HashIndex<H>,
        vector_index: VectorIndex<E>,
        vendor_registry: VendorRegistry<V>,
        ai: AiAdapter<C>,
    ) -> Self {
        Self {
            hash_index,
            vector_index,
            vendor_registry,
            ai,
            embed_similarity_threshold: DEFAULT_EMBED_SIMILARITY_THRESHOLD,
        }
    }

    /// As [`Self::new`] with a caller-chosen embedding similarity
    /// threshold for tier 2.
    pub fn with_embed_similarity_threshold(mut self, threshold: f64) -> Self {
        self.embed_similarity_threshold = threshold;
        self
    }

    /// `resolve(operation, input, user_id, ctx) -> (result, tier,
    /// confidence, latency)`. Latency is observed around the whole
    /// call, including every tier attempt actually executed, and
    /// exactly one [`TierUsageLog`] is produced per call.
    pub async fn resolve(
        &self,
        operation: Operation,
        ctx: ResolveContext,
        cancel: &CancellationToken,
    ) -> (TierResolution, TierUsageLog) {
        let timer = OperationTimer::start();
        let operation_type = operation.operation_type();

        let resolution = match &operation {
            Operation::Normalize { raw_description } => {
                self.resolve_normalization(raw_description, cancel).await
            }
            Operation::CategorizeGl {
                normalized_description,
                category_hint,
            } => {
                self.resolve_categorization(
                    normalized_description,
                    category_hint,
                    ctx.user_id,
                    CategorizationField::Gl,
                    cancel,
                )
                .await
            }
            Operation::CategorizeDepartment {
                normalized_description,
                category_hint,
            } => {
                self.resolve_categorization(
                    normalized_description,
                    category_hint,
                    ctx.user_id,
                    CategorizationField::Department,
                    cancel,
                )
                .await
            }
        };

        let log = TierUsageLog {
            user_id: ctx.user_id,
            transaction_id: ctx.transaction_id,
            operation_type,
            tier: resolution.tier,
            confidence: resolution.value.is_some().then_some(resolution.confidence),
            response_time_ms: timer.elapsed_ms(),
            cache_hit: resolution.tier.is_cache_hit(),
            created_at: Utc::now(),
        };

        (resolution, log)
    }

    async fn resolve_normalization(
        &self,
        raw_description: &str,
        cancel: &CancellationToken,
    ) -> TierResolution {
        match self.hash_index.lookup(raw_description).await {
            Ok(Some(canonical)) => {
                return TierResolution {
                    value: Some(canonical),
                    tier: Tier::One,
                    confidence: NORMALIZATION_TIER1_CONFIDENCE,
                };
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "hash index lookup failed during normalization");
            }
        }

        let system_prompt = "Normalize this bank-statement transaction description to a clean, human-readable merchant name. Respond with JSON: {\"normalized\": \"...\"}.";
        match self
            .ai
            .invoke(system_prompt, raw_description, 200, 0.1, cancel)
            .await
        {
            Ok(raw_json) => match parse_string_field(&raw_json, "normalized") {
                Some(normalized) => {
                    if let Err(err) = self.hash_index.insert(raw_description, &normalized).await {
                        tracing::warn!(error = %err, "failed to persist tier-3 normalization result");
                    }
                    TierResolution {
                        value: Some(normalized),
                        tier: Tier::Three,
                        confidence: NORMALIZATION_TIER3_CONFIDENCE,
                    }
                }
                None => degraded_normalization(raw_description),
            },
            Err(err) => {
                tracing::warn!(error = %err, "tier-3 normalization invocation failed");
                degraded_normalization(raw_description)
            }
        }
    }

    async fn resolve_categorization(
        &self,
        normalized_description: &str,
        category_hint: &[VendorCategory],
        user_id: Uuid,
        field: CategorizationField,
        cancel: &CancellationToken,
    ) -> TierResolution {
        match self
            .vendor_registry
            .find_in_categories(normalized_description, category_hint)
            .await
        {
            Ok(Some(alias)) => {
                let code = match field {
                    CategorizationField::Gl => alias.default_gl_code.clone(),
                    CategorizationField::Department => alias.default_department.clone(),
                };
                if let Some(code) = code {
                    return TierResolution {
                        value: Some(code),
                        tier: Tier::One,
                        confidence: CATEGORIZATION_TIER1_CONFIDENCE,
                    };
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "vendor registry lookup failed during categorization");
            }
        }

        if let Some(resolution) = self
            .resolve_categorization_tier2(normalized_description, user_id, field)
            .await
        {
            return resolution;
        }

        let field_name = field.field_name();
        let system_prompt = format!(
            "Given a normalized transaction description, suggest a {field_name}. Respond with JSON: {{\"{field_name}\": \"...\"}}."
        );
        match self
            .ai
            .invoke(&system_prompt, normalized_description, 100, 0.1, cancel)
            .await
        {
            Ok(raw_json) => match parse_string_field(&raw_json, field_name) {
                Some(value) => TierResolution {
                    value: Some(value),
                    tier: Tier::Three,
                    confidence: CATEGORIZATION_TIER3_CONFIDENCE,
                },
                None => degraded_categorization(),
            },
            Err(err) => {
                tracing::warn!(error = %err, "tier-3 categorization invocation failed");
                degraded_categorization()
            }
        }
    }

    async fn resolve_categorization_tier2(
        &self,
        normalized_description: &str,
        user_id: Uuid,
        field: CategorizationField,
    ) -> Option<TierResolution> {
        let vector = match self.vector_index.embed(normalized_description).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(error = %err, "embedding unavailable, skipping tier 2");
                return None;
            }
        };

        let hits = self
            .vector_index
            .top_k(&vector, user_id, 5, self.embed_similarity_threshold)
            .await;

        hits.into_iter().find_map(|hit| {
            let value = match field {
                CategorizationField::Gl => hit.embedding.gl_code.clone(),
                CategorizationField::Department => hit.embedding.department.clone(),
            }?;
            let confidence = if hit.embedding.verified {
                CATEGORIZATION_TIER2_VERIFIED_CONFIDENCE
            } else {
                CATEGORIZATION_TIER2_UNVERIFIED_CONFIDENCE
            };
            Some(TierResolution {
                value: Some(value),
                tier: Tier::Two,
                confidence,
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CategorizationField {
    Gl,
    Department,
}

impl CategorizationField {
    fn field_name(self) -> &'static str {
        match self {
            CategorizationField::Gl => "gl_code",
            CategorizationField::Department => "department",
        }
    }
}

fn degraded_normalization(raw_description: &str) -> TierResolution {
    TierResolution {
        value: Some(raw_description.to_string()),
        tier: Tier::None,
        confidence: 0.0,
    }
}

fn degraded_categorization() -> TierResolution {
    TierResolution {
        value: None,
        tier: Tier::None,
        confidence: 0.0,
    }
}

fn parse_string_field(raw_json: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    value.get(field)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use xpn_ai_adapter::ChatMessage;
    use xpn_core::VendorAlias;
    use xpn_hash_index::mem::InMemoryHashIndexStore;
    use xpn_vector_index::mem::InMemoryEmbeddingStore;
    use xpn_vendor_registry::mem::InMemoryVendorAliasStore;

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

    struct FailingChat;

    #[async_trait]
    impl Chat for FailingChat {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, ExpenseError> {
            Err(ExpenseError::ServiceUnavailable {
                service: "ai",
                message: "down".to_string(),
            })
        }
    }

    fn router(
        chat_response: &str,
    ) -> TierRouter<InMemoryHashIndexStore, InMemoryEmbeddingStore, InMemoryVendorAliasStore, ScriptedChat>
    {
        TierRouter::new(
            HashIndex::new(InMemoryHashIndexStore::default()),
            VectorIndex::new(InMemoryEmbeddingStore::default()),
            VendorRegistry::new(InMemoryVendorAliasStore::default()),
            AiAdapter::new(ScriptedChat(chat_response.to_string())),
        )
    }

    #[tokio::test]
    async fn normalization_tier1_hit_short_circuits_ai() {
        let router = router("should not be called");
        router
            .hash_index
            .insert("STARBUCKS #123", "Starbucks")
            .await
            .unwrap();

        let (resolution, log) = router
            .resolve(
                Operation::Normalize {
                    raw_description: "STARBUCKS #123".to_string(),
                },
                ResolveContext {
                    user_id: Uuid::new_v4(),
                    transaction_id: None,
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(resolution.value.as_deref(), Some("Starbucks"));
        assert_eq!(resolution.tier, Tier::One);
        assert_eq!(resolution.confidence, NORMALIZATION_TIER1_CONFIDENCE);
        assert!(log.cache_hit);
    }

    #[tokio::test]
    async fn normalization_falls_through_to_tier3_on_miss() {
        let router = router("{\"normalized\": \"Starbucks\"}");

        let (resolution, log) = router
            .resolve(
                Operation::Normalize {
                    raw_description: "STARBUCKS #123".to_string(),
                },
                ResolveContext {
                    user_id: Uuid::new_v4(),
                    transaction_id: None,
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(resolution.value.as_deref(), Some("Starbucks"));
        assert_eq!(resolution.tier, Tier::Three);
        assert_eq!(resolution.confidence, NORMALIZATION_TIER3_CONFIDENCE);
        assert!(!log.cache_hit);

        // Tier-3 result is persisted for the next call.
        let cached = router.hash_index.lookup("STARBUCKS #123").await.unwrap();
        assert_eq!(cached.as_deref(), Some("Starbucks"));
    }

    #[tokio::test]
    async fn normalization_degrades_gracefully_on_ai_failure() {
        let router = TierRouter::new(
            HashIndex::new(InMemoryHashIndexStore::default()),
            VectorIndex::new(InMemoryEmbeddingStore::default()),
            VendorRegistry::new(InMemoryVendorAliasStore::default()),
            AiAdapter::new(FailingChat),
        );

        let (resolution, log) = router
            .resolve(
                Operation::Normalize {
                    raw_description: "UNKNOWN VENDOR 999".to_string(),
                },
                ResolveContext {
                    user_id: Uuid::new_v4(),
                    transaction_id: None,
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(resolution.tier, Tier::None);
        assert_eq!(resolution.value.as_deref(), Some("UNKNOWN VENDOR 999"));
        assert_eq!(log.confidence, None);
    }

    #[tokio::test]
    async fn categorization_tier1_uses_alias_default() {
        let router = router("should not be called");
        let alias = VendorAlias {
            id: Uuid::new_v4(),
            canonical_name: "ACME".to_string(),
            alias_pattern: "ACME".to_string(),
            display_name: "Acme".to_string(),
            category: VendorCategory::Generic,
            default_gl_code: Some("6000".to_string()),
            default_department: None,
            gl_confirm_count: 0,
            dept_confirm_count: 0,
            match_count: 0,
            last_matched_at: None,
            confidence: 0.9,
        };
        router.vendor_registry.add_or_update(alias).await.unwrap();

        let (resolution, _log) = router
            .resolve(
                Operation::CategorizeGl {
                    normalized_description: "Acme Coffee".to_string(),
                    category_hint: vec![],
                },
                ResolveContext {
                    user_id: Uuid::new_v4(),
                    transaction_id: None,
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(resolution.value.as_deref(), Some("6000"));
        assert_eq!(resolution.tier, Tier::One);
        assert_eq!(resolution.confidence, CATEGORIZATION_TIER1_CONFIDENCE);
    }

    #[tokio::test]
    async fn categorization_falls_through_to_tier3_when_no_alias_or_embedding() {
        let router = router("{\"gl_code\": \"7000\"}");

        let (resolution, _log) = router
            .resolve(
                Operation::CategorizeGl {
                    normalized_description: "Brand New Vendor".to_string(),
                    category_hint: vec![],
                },
                ResolveContext {
                    user_id: Uuid::new_v4(),
                    transaction_id: None,
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(resolution.value.as_deref(), Some("7000"));
        assert_eq!(resolution.tier, Tier::Three);
        assert_eq!(resolution.confidence, CATEGORIZATION_TIER3_CONFIDENCE);
    }

    #[tokio::test]
    async fn categorization_degrades_to_none_when_every_tier_misses() {
        let router = router("not json");

        let (resolution, log) = router
            .resolve(
                Operation::CategorizeDepartment {
                    normalized_description: "Brand New Vendor".to_string(),
                    category_hint: vec![],
                },
                ResolveContext {
                    user_id: Uuid::new_v4(),
                    transaction_id: None,
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(resolution.value, None);
        assert_eq!(resolution.tier, Tier::None);
        assert_eq!(log.confidence, None);
    }
}
