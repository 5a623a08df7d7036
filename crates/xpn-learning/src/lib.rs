// SPDX-License-Identifier: MIT OR Apache-2.0
//! C6: learning loop Writes through to the vendor alias
//! registry (C5) and the embedding store (C2) on user confirmation or
//! correction, so the next request of the same shape resolves at tier
//! 1.
//!
//! Every operation here returns its errors honestly; logging and
//! discarding a failure so it never propagates is the caller's
//! responsibility (`xpn-service` logs and discards them so the
//! user-visible write it rode in on always succeeds).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use uuid::Uuid;
use xpn_core::VendorAlias;
use xpn_error::ExpenseError;
use xpn_fuzzy::{extract_group_vendor_pattern, extract_vendor_pattern};
use xpn_vector_index::{EmbeddingStore, VectorIndex};
use xpn_vendor_registry::{VendorAliasStore, VendorRegistry};

/// Starting confidence assigned to an alias created from a freshly
/// confirmed match (below any alias a human curated directly).
pub const NEW_ALIAS_CONFIDENCE: f64 = 0.75;

/// What [`LearningLoop::on_match_confirmed`] or
/// [`LearningLoop::on_categorization_edited`] actually did.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningOutcome {
    /// The alias that was created or reinforced, if any.
    pub alias_id: Option<Uuid>,
    /// `true` if a new alias row was created (as opposed to an existing
    /// one being reinforced).
    pub alias_created: bool,
    /// `true` if a verified embedding was inserted.
    pub embedding_created: bool,
}

/// A user's correction to a suggested categorization (event
/// 2: "line edit in a report").
pub struct CategorizationEdit {
    /// The transaction description the correction applies to.
    pub description: String,
    /// Owning user.
    pub user_id: Uuid,
    /// The transaction this correction concerns, if any.
    pub transaction_id: Option<Uuid>,
    /// The GL code the user confirmed, if this edit touched GL.
    pub confirmed_gl_code: Option<String>,
    /// The department the user confirmed, if this edit touched
    /// department.
    pub confirmed_department: Option<String>,
}

/// C6's public operations, parameterized over the stores it writes
/// through to.
pub struct LearningLoop<E: EmbeddingStore, V: VendorAliasStore> {
    vector_index: VectorIndex<E>,
    vendor_registry: VendorRegistry<V>,
    confirm_threshold: u32,
}

impl<E: EmbeddingStore, V: VendorAliasStore> LearningLoop<E, V> {
    /// Wires C6 to the embedding store and vendor registry it reinforces,
    /// with the given promotion threshold, `VENDOR_CONFIRM_THRESHOLD`.
    pub fn new(
        vector_index: VectorIndex<E>,
        vendor_registry: VendorRegistry<V>,
        confirm_threshold: u32,
    ) -> Self {
        Self {
            vector_index,
            vendor_registry,
            confirm_threshold,
        }
    }

    /// Event 1: on match confirmation, derives a vendor
    /// pattern from `description_or_group_name` (a transaction
    /// description, or a group display name if `is_group`), upserts an
    /// alias keyed on that pattern, and increments its `match_count`.
    ///
    /// # Errors
    ///
    /// Propagates the vendor registry's error.
    pub async fn on_match_confirmed(
        &self,
        description_or_group_name: &str,
        is_group: bool,
        default_gl_code: Option<String>,
        default_department: Option<String>,
    ) -> Result<LearningOutcome, ExpenseError> {
        let pattern = if is_group {
            extract_group_vendor_pattern(description_or_group_name)
        } else {
            extract_vendor_pattern(description_or_group_name)
        };

        if let Some(existing) = self.vendor_registry.get_by_canonical_name(&pattern).await? {
            self.vendor_registry.record_match(existing.id).await?;
            return Ok(LearningOutcome {
                alias_id: Some(existing.id),
                alias_created: false,
                embedding_created: false,
            });
        }

        let alias = VendorAlias {
            id: Uuid::new_v4(),
            canonical_name: pattern.clone(),
            alias_pattern: pattern,
            display_name: description_or_group_name.to_string(),
            category: xpn_core::VendorCategory::Generic,
            default_gl_code,
            default_department,
            gl_confirm_count: 0,
            dept_confirm_count: 0,
            match_count: 1,
            last_matched_at: Some(Utc::now()),
            confidence: NEW_ALIAS_CONFIDENCE,
        };
        let stored = self.vendor_registry.add_or_update(alias).await?;

        Ok(LearningOutcome {
            alias_id: Some(stored.id),
            alias_created: true,
            embedding_created: false,
        })
    }

    /// Event 2: on a line edit, applies the GL/department
    /// promotion rule to the alias matching `edit.description` (if any)
    /// and inserts a verified embedding with the corrected
    /// `(description, gl, department)` triple.
    ///
    /// # Errors
    ///
    /// Propagates the vendor registry's or embedding store's error.
    pub async fn on_categorization_edited(
        &self,
        edit: CategorizationEdit,
    ) -> Result<LearningOutcome, ExpenseError> {
        let matched_alias = self.vendor_registry.find(&edit.description).await?;

        if let Some(alias) = &matched_alias {
            if let Some(gl_code) = &edit.confirmed_gl_code {
                self.vendor_registry
                    .apply_gl_confirmation(alias.id, gl_code, self.confirm_threshold)
                    .await?;
            }
            if let Some(department) = &edit.confirmed_department {
                self.vendor_registry
                    .apply_department_confirmation(alias.id, department, self.confirm_threshold)
                    .await?;
            }
        }

        let vendor_normalized = matched_alias
            .as_ref()
            .map(|a| a.canonical_name.clone())
            .unwrap_or_else(|| extract_vendor_pattern(&edit.description));

        self.vector_index
            .insert_verified(
                &edit.description,
                edit.confirmed_gl_code,
                edit.confirmed_department,
                edit.user_id,
                edit.transaction_id,
                Some(vendor_normalized),
            )
            .await?;

        Ok(LearningOutcome {
            alias_id: matched_alias.map(|a| a.id),
            alias_created: false,
            embedding_created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use xpn_vector_index::mem::InMemoryEmbeddingStore;
    use xpn_vendor_registry::mem::InMemoryVendorAliasStore;

    fn learning_loop() -> LearningLoop<InMemoryEmbeddingStore, InMemoryVendorAliasStore> {
        LearningLoop::new(
            VectorIndex::with_embedder(InMemoryEmbeddingStore::default(), Box::new(StubEmbedder)),
            VendorRegistry::new(InMemoryVendorAliasStore::default()),
            3,
        )
    }

    struct StubEmbedder;

    #[async_trait]
    impl xpn_vector_index::Embedder for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ExpenseError> {
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn match_confirmed_creates_alias_on_first_occurrence() {
        let learning = learning_loop();
        let outcome = learning
            .on_match_confirmed("ACME COFFEE #0123", false, Some("6000".into()), None)
            .await
            .unwrap();

        assert!(outcome.alias_created);
        assert!(outcome.alias_id.is_some());
    }

    #[tokio::test]
    async fn match_confirmed_reinforces_existing_alias() {
        let learning = learning_loop();
        let first = learning
            .on_match_confirmed("ACME COFFEE #0123", false, Some("6000".into()), None)
            .await
            .unwrap();
        let second = learning
            .on_match_confirmed("ACME COFFEE #9999", false, None, None)
            .await
            .unwrap();

        assert!(!second.alias_created);
        assert_eq!(first.alias_id, second.alias_id);
    }

    #[tokio::test]
    async fn match_confirmed_on_group_uses_group_pattern() {
        let learning = learning_loop();
        let outcome = learning
            .on_match_confirmed("TWILIO (3 charges)", true, None, None)
            .await
            .unwrap();
        assert!(outcome.alias_created);

        let alias = learning
            .vendor_registry
            .get_by_canonical_name("TWILIO")
            .await
            .unwrap();
        assert!(alias.is_some());
    }

    #[tokio::test]
    async fn categorization_edit_inserts_verified_embedding() {
        let learning = learning_loop();
        let outcome = learning
            .on_categorization_edited(CategorizationEdit {
                description: "Brand New Vendor".to_string(),
                user_id: Uuid::new_v4(),
                transaction_id: None,
                confirmed_gl_code: Some("7000".to_string()),
                confirmed_department: None,
            })
            .await
            .unwrap();

        assert!(outcome.embedding_created);
        assert!(outcome.alias_id.is_none());
    }

    #[tokio::test]
    async fn categorization_edit_promotes_matching_alias() {
        let learning = learning_loop();
        learning
            .on_match_confirmed("ACME COFFEE #0123", false, Some("5000".into()), None)
            .await
            .unwrap();

        for _ in 0..3 {
            learning
                .on_categorization_edited(CategorizationEdit {
                    description: "ACME COFFEE #0123".to_string(),
                    user_id: Uuid::new_v4(),
                    transaction_id: None,
                    confirmed_gl_code: Some("6000".to_string()),
                    confirmed_department: None,
                })
                .await
                .unwrap();
        }

        let alias = learning
            .vendor_registry
            .get_by_canonical_name("ACME COFFEE")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alias.default_gl_code.as_deref(), Some("6000"));
    }
}
