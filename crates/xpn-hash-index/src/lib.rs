// SPDX-License-Identifier: MIT OR Apache-2.0
//! C1: content-addressed store of `(raw_text -> canonical_text)`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod mem;

use async_trait::async_trait;
use xpn_core::NormalizedTextCache;
use xpn_error::ExpenseError;

/// The storage seam C1 is built against. An in-memory implementation
/// ([`mem::InMemoryHashIndexStore`]) backs unit tests; `xpn-db` provides
/// the Postgres-backed implementation used in production.
#[async_trait]
pub trait HashIndexStore: Send + Sync {
    /// Reads the row for `hash`, if present. Must not mutate state; the
    /// hit-count increment happens via [`HashIndexStore::record_hit`].
    async fn get(&self, hash: &str) -> Result<Option<NormalizedTextCache>, ExpenseError>;

    /// Upserts a row for `hash`. If a row already exists, its
    /// `raw_text` is preserved and only `canonical_text` is replaced
    /// ("if present, keeps earlier raw_text, replaces
    /// canonical_text").
    async fn upsert(
        &self,
        hash: &str,
        raw_text: &str,
        canonical_text: &str,
    ) -> Result<(), ExpenseError>;

    /// Atomically increments `hit_count` and stamps `last_accessed_at`
    /// for `hash`. No-op if the row does not exist.
    async fn record_hit(&self, hash: &str) -> Result<(), ExpenseError>;
}

/// C1's public operations, parameterized over a [`HashIndexStore`].
pub struct HashIndex<S: HashIndexStore> {
    store: S,
}

impl<S: HashIndexStore> HashIndex<S> {
    /// Wraps a store implementation.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The hash C1 uses for `raw_text` — exposed so callers never
    /// hand-roll it (`hash = lowercase_hex(SHA-256(lower(trim
    /// (raw_text))))`).
    pub fn hash_of(raw_text: &str) -> String {
        xpn_core::hash_text(raw_text)
    }

    /// Looks up the canonical text for `raw_text`. On a hit, increments
    /// `hit_count` and stamps `last_accessed_at`
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn lookup(&self, raw_text: &str) -> Result<Option<String>, ExpenseError> {
        let hash = Self::hash_of(raw_text);
        match self.store.get(&hash).await? {
            Some(row) => {
                self.store.record_hit(&hash).await?;
                Ok(Some(row.canonical_text))
            }
            None => Ok(None),
        }
    }

    /// Inserts or updates the canonical text for `raw_text`.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn insert(&self, raw_text: &str, canonical_text: &str) -> Result<(), ExpenseError> {
        let hash = Self::hash_of(raw_text);
        self.store.upsert(&hash, raw_text, canonical_text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::InMemoryHashIndexStore;

    #[tokio::test]
    async fn lookup_misses_on_empty_store() {
        let idx = HashIndex::new(InMemoryHashIndexStore::default());
        assert_eq!(idx.lookup("Starbucks #123").await.unwrap(), None);
    }

    #[tokio::test]
    async fn insert_then_lookup_round_trips() {
        let idx = HashIndex::new(InMemoryHashIndexStore::default());
        idx.insert("STARBUCKS #0123", "Starbucks").await.unwrap();
        assert_eq!(
            idx.lookup("starbucks #0123").await.unwrap(),
            Some("Starbucks".to_string())
        );
    }

    #[tokio::test]
    async fn lookup_is_case_and_whitespace_insensitive() {
        let idx = HashIndex::new(InMemoryHashIndexStore::default());
        idx.insert("  Acme Coffee  ", "Acme Coffee").await.unwrap();
        assert_eq!(
            idx.lookup("ACME COFFEE").await.unwrap(),
            Some("Acme Coffee".to_string())
        );
    }

    #[tokio::test]
    async fn reinsert_keeps_earliest_raw_text_but_replaces_canonical() {
        let store = InMemoryHashIndexStore::default();
        let idx = HashIndex::new(store);
        idx.insert("Starbucks #0123", "Starbucks").await.unwrap();
        idx.insert("Starbucks #0123", "Starbucks Coffee Co")
            .await
            .unwrap();

        let hash = HashIndex::<InMemoryHashIndexStore>::hash_of("Starbucks #0123");
        let row = idx.store.get(&hash).await.unwrap().unwrap();
        assert_eq!(row.raw_text, "Starbucks #0123");
        assert_eq!(row.canonical_text, "Starbucks Coffee Co");
    }

    #[tokio::test]
    async fn hit_count_is_monotonically_non_decreasing() {
        let idx = HashIndex::new(InMemoryHashIndexStore::default());
        idx.insert("Uber Trip", "Uber").await.unwrap();
        let hash = HashIndex::<InMemoryHashIndexStore>::hash_of("Uber Trip");

        idx.lookup("Uber Trip").await.unwrap();
        let after_one = idx.store.get(&hash).await.unwrap().unwrap().hit_count;
        idx.lookup("uber trip").await.unwrap();
        let after_two = idx.store.get(&hash).await.unwrap().unwrap().hit_count;

        assert!(after_two >= after_one);
        assert_eq!(after_two, after_one + 1);
    }
}
