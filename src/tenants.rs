// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Automatic tenant creation.
//!
//! Request handlers call [`TenantRegistry::ensure`] before touching a tenant's
//! tree so the tenant root exists the first time its id is seen.

use dashmap::DashSet;
use tracing::{debug, warn};

use crate::entity::Entity;
use crate::inventory::{InventoryError, InventoryStorage};
use crate::path::CanonicalPath;

/// Process-local memory of tenants known to exist.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    known: DashSet<String>,
}

impl TenantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the tenant root for `tenant_id` is stored.
    ///
    /// The first call per tenant reads the store and creates a bare tenant
    /// when absent; later calls return immediately. An existing tenant is
    /// left untouched. A tenant is only remembered once it is known to be
    /// stored, so failures are retried on the next call.
    pub async fn ensure(&self, storage: &InventoryStorage, tenant_id: &str) -> Result<(), InventoryError> {
        if self.known.contains(tenant_id) {
            return Ok(());
        }

        let path = CanonicalPath::tenant(tenant_id)?;
        match self.create_if_missing(storage, &path).await {
            Ok(()) => {
                self.known.insert(tenant_id.to_string());
                Ok(())
            }
            Err(e) => {
                warn!(tenant = tenant_id, error = %e, "Failed to auto-create tenant");
                Err(e)
            }
        }
    }

    async fn create_if_missing(&self, storage: &InventoryStorage, path: &CanonicalPath) -> Result<(), InventoryError> {
        if storage.lookup(path).await?.is_some() {
            return Ok(());
        }
        match storage.upsert(&Entity::at(path.clone())).await {
            Ok(outcome) => {
                debug!(tenant = %path, %outcome, "Tenant ensured");
                Ok(())
            }
            // Another caller created it between our read and write
            Err(InventoryError::ConflictingWrite { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[must_use]
    pub fn is_known(&self, tenant_id: &str) -> bool {
        self.known.contains(tenant_id)
    }

    /// Drop a tenant from memory, e.g. after deleting it.
    pub fn forget(&self, tenant_id: &str) {
        self.known.remove(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_creates_tenant_once() {
        let storage = InventoryStorage::in_memory();
        let registry = TenantRegistry::new();

        registry.ensure(&storage, "acme").await.unwrap();
        assert!(registry.is_known("acme"));

        let path = CanonicalPath::tenant("acme").unwrap();
        assert!(storage.lookup(&path).await.unwrap().is_some());

        registry.ensure(&storage, "acme").await.unwrap();
        assert_eq!(storage.store().count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ensure_keeps_existing_tenant_payload() {
        let storage = InventoryStorage::in_memory();
        let path = CanonicalPath::tenant("acme").unwrap();
        storage
            .upsert(&Entity::at(path.clone()).with_name("Acme Corp"))
            .await
            .unwrap();

        let registry = TenantRegistry::new();
        registry.ensure(&storage, "acme").await.unwrap();

        let stored = storage.lookup(&path).await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Acme Corp"));
    }

    #[tokio::test]
    async fn test_invalid_tenant_id_is_not_remembered() {
        let storage = InventoryStorage::in_memory();
        let registry = TenantRegistry::new();

        assert!(registry.ensure(&storage, "").await.is_err());
        assert!(!registry.is_known(""));
    }

    #[tokio::test]
    async fn test_forget() {
        let storage = InventoryStorage::in_memory();
        let registry = TenantRegistry::new();
        registry.ensure(&storage, "acme").await.unwrap();
        registry.forget("acme");
        assert!(!registry.is_known("acme"));
    }
}
