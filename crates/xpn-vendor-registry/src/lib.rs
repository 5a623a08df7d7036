// SPDX-License-Identifier: MIT OR Apache-2.0
//! C5: pattern-indexed vendor alias catalog

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod mem;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use xpn_core::{VendorAlias, VendorCategory};
use xpn_error::ExpenseError;

/// Storage seam C5 is built against. An in-memory implementation
/// ([`mem::InMemoryVendorAliasStore`]) is good for small catalogs and
/// backs the unit tests; `xpn-db` provides the Postgres-backed
/// implementation used in production.
#[async_trait]
pub trait VendorAliasStore: Send + Sync {
    /// Every alias currently on file. `find` scans this list, so this
    /// method is only suitable for catalogs small enough to fit in
    /// memory — the in-memory implementation here does a linear
    /// substring scan, which is acceptable only for small alias sets
    ///
    async fn all(&self) -> Result<Vec<VendorAlias>, ExpenseError>;

    /// Exact lookup by canonical name.
    async fn get_by_canonical_name(
        &self,
        canonical_name: &str,
    ) -> Result<Option<VendorAlias>, ExpenseError>;

    /// Inserts a new alias or replaces the row with a matching
    /// `(canonical_name, alias_pattern)` pair. Returns the stored row.
    async fn upsert(&self, alias: VendorAlias) -> Result<VendorAlias, ExpenseError>;

    /// Persists an in-place update to an existing row, keyed by `id`.
    async fn save(&self, alias: &VendorAlias) -> Result<(), ExpenseError>;
}

/// C5's public operations, parameterized over a [`VendorAliasStore`].
pub struct VendorRegistry<S: VendorAliasStore> {
    store: S,
}

impl<S: VendorAliasStore> VendorRegistry<S> {
    /// Wraps a store implementation.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// `find(description) -> alias | None`: case-insensitive
    /// substring match across all aliases. Selection order: highest
    /// `confidence`, ties broken by highest `match_count`, then by
    /// longest `alias_pattern` ("longer patterns win ties on
    /// confidence"). On match, increments `match_count` and stamps
    /// `last_matched_at`.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn find(&self, description: &str) -> Result<Option<VendorAlias>, ExpenseError> {
        self.find_in_categories(description, &[]).await
    }

    /// `find(description, categories[]) -> alias | None`: as
    /// [`Self::find`] but filtered to `categories`. An empty slice
    /// means "no filter".
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn find_in_categories(
        &self,
        description: &str,
        categories: &[VendorCategory],
    ) -> Result<Option<VendorAlias>, ExpenseError> {
        let haystack = description.to_lowercase();
        let all = self.store.all().await?;

        let best = all
            .into_iter()
            .filter(|a| categories.is_empty() || categories.contains(&a.category))
            .filter(|a| haystack.contains(a.alias_pattern.to_lowercase().as_str()))
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.match_count.cmp(&b.match_count))
                    .then(a.alias_pattern.len().cmp(&b.alias_pattern.len()))
            });

        if let Some(mut alias) = best {
            alias.match_count += 1;
            alias.last_matched_at = Some(Utc::now());
            self.store.save(&alias).await?;
            Ok(Some(alias))
        } else {
            Ok(None)
        }
    }

    /// Exact lookup by canonical name
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn get_by_canonical_name(
        &self,
        name: &str,
    ) -> Result<Option<VendorAlias>, ExpenseError> {
        self.store.get_by_canonical_name(name).await
    }

    /// Exact lookup by canonical name, falling back to [`Self::find`]
    /// against `name` if no exact match exists.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn get_by_vendor_name(
        &self,
        name: &str,
    ) -> Result<Option<VendorAlias>, ExpenseError> {
        if let Some(alias) = self.store.get_by_canonical_name(name).await? {
            return Ok(Some(alias));
        }
        self.find(name).await
    }

    /// Inserts or replaces an alias row, keyed by `(canonical_name,
    /// alias_pattern)`
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn add_or_update(&self, alias: VendorAlias) -> Result<VendorAlias, ExpenseError> {
        self.store.upsert(alias).await
    }

    /// Increments `match_count` and stamps `last_matched_at` for the
    /// alias identified by `alias_id`
    ///
    /// # Errors
    ///
    /// Returns [`ExpenseError::NotFound`] if no alias with that id is
    /// stored under its canonical name, or the store's own error.
    pub async fn record_match(&self, alias_id: Uuid) -> Result<(), ExpenseError> {
        let mut alias = self.get_by_id(alias_id).await?;
        alias.match_count += 1;
        alias.last_matched_at = Some(Utc::now());
        self.store.save(&alias).await
    }

    /// Applies the GL-code promotion rule for a confirmed categorization
    /// on `alias_id`: a confirmation of `confirmed_gl_code`
    /// accumulates `gl_confirm_count` (capped at `threshold`); once the
    /// count reaches `threshold` on a code that differs from the
    /// current default, that code becomes the new default and the
    /// count is held at `threshold`.
    ///
    /// # Errors
    ///
    /// Propagates the store's error, or [`ExpenseError::NotFound`] if
    /// `alias_id` is unknown.
    pub async fn apply_gl_confirmation(
        &self,
        alias_id: Uuid,
        confirmed_gl_code: &str,
        threshold: u32,
    ) -> Result<VendorAlias, ExpenseError> {
        let mut alias = self.get_by_id(alias_id).await?;
        promote(
            &mut alias.default_gl_code,
            &mut alias.gl_confirm_count,
            confirmed_gl_code,
            threshold,
        );
        self.store.save(&alias).await?;
        Ok(alias)
    }

    /// Applies the department promotion rule ("the same rule
    /// applies to department").
    ///
    /// # Errors
    ///
    /// Propagates the store's error, or [`ExpenseError::NotFound`] if
    /// `alias_id` is unknown.
    pub async fn apply_department_confirmation(
        &self,
        alias_id: Uuid,
        confirmed_department: &str,
        threshold: u32,
    ) -> Result<VendorAlias, ExpenseError> {
        let mut alias = self.get_by_id(alias_id).await?;
        promote(
            &mut alias.default_department,
            &mut alias.dept_confirm_count,
            confirmed_department,
            threshold,
        );
        self.store.save(&alias).await?;
        Ok(alias)
    }

    async fn get_by_id(&self, alias_id: Uuid) -> Result<VendorAlias, ExpenseError> {
        self.store
            .all()
            .await?
            .into_iter()
            .find(|a| a.id == alias_id)
            .ok_or_else(|| ExpenseError::NotFound {
                entity: "vendor_alias",
                id: alias_id.to_string(),
            })
    }
}

/// Shared promotion logic for the GL and department axes
fn promote(default: &mut Option<String>, confirm_count: &mut u32, confirmed: &str, threshold: u32) {
    *confirm_count = (*confirm_count + 1).min(threshold);
    let differs = default.as_deref() != Some(confirmed);
    if differs && *confirm_count >= threshold {
        *default = Some(confirmed.to_string());
        *confirm_count = threshold;
    }
}
