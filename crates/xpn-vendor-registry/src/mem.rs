//! In-memory [`VendorAliasStore`] used by unit tests across the workspace.

use crate::VendorAliasStore;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use xpn_core::VendorAlias;
use xpn_error::ExpenseError;

/// A `Mutex`-guarded `Vec` implementation of [`VendorAliasStore`].
///
/// `all()` is a linear scan; fine for the catalog sizes exercised in
/// tests and small deployments, not for a large alias table — `xpn-db`
/// provides the indexed Postgres-backed implementation. `Clone`-able,
/// sharing its backing `Vec` between every clone, so one store can back
/// multiple owned [`crate::VendorRegistry`] wrappers in tests.
#[derive(Clone, Default)]
pub struct InMemoryVendorAliasStore {
    rows: Arc<Mutex<Vec<VendorAlias>>>,
}

#[async_trait]
impl VendorAliasStore for InMemoryVendorAliasStore {
    async fn all(&self) -> Result<Vec<VendorAlias>, ExpenseError> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn get_by_canonical_name(
        &self,
        canonical_name: &str,
    ) -> Result<Option<VendorAlias>, ExpenseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.canonical_name == canonical_name)
            .cloned())
    }

    async fn upsert(&self, alias: VendorAlias) -> Result<VendorAlias, ExpenseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows
            .iter_mut()
            .find(|a| a.canonical_name == alias.canonical_name && a.alias_pattern == alias.alias_pattern)
        {
            Some(existing) => {
                let id = existing.id;
                *existing = alias;
                existing.id = id;
                Ok(existing.clone())
            }
            None => {
                rows.push(alias.clone());
                Ok(alias)
            }
        }
    }

    async fn save(&self, alias: &VendorAlias) -> Result<(), ExpenseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|a| a.id == alias.id) {
            Some(existing) => {
                *existing = alias.clone();
                Ok(())
            }
            None => Err(ExpenseError::NotFound {
                entity: "vendor_alias",
                id: alias.id.to_string(),
            }),
        }
    }
}
