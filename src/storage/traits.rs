// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::entity::{Entity, Properties};
use crate::labeling::Interval;
use crate::path::CanonicalPath;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Data corruption detected for '{key}': {reason}")]
    Corruption { key: String, reason: String },
}

/// Primary key columns of a stored row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub tenant_id: String,
    /// Feed id, or [`TENANT_PARTITION`](crate::path::TENANT_PARTITION)
    pub feed_id: String,
    /// Segment type code of the last path segment
    pub entity_type: String,
    /// Canonical path string
    pub entity_path: String,
}

impl RowKey {
    #[must_use]
    pub fn for_path(path: &CanonicalPath) -> Self {
        Self {
            tenant_id: path.tenant_id().to_string(),
            feed_id: path.partition_id().to_string(),
            entity_type: path.segment_type().code().to_string(),
            entity_path: path.to_string(),
        }
    }

    /// Parse the stored path back. A key whose path does not parse is corrupt.
    pub fn to_path(&self) -> Result<CanonicalPath, StorageError> {
        CanonicalPath::parse(&self.entity_path).map_err(|e| StorageError::Corruption {
            key: self.entity_path.clone(),
            reason: e.to_string(),
        })
    }
}

/// Persisted projection of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    pub path: CanonicalPath,
    pub name: Option<String>,
    pub properties: Properties,
    /// Exact bounds; the decimal projection is derived from these
    pub interval: Interval,
    /// Sibling ranks from the tenant down to this row
    pub tree_path: Vec<u32>,
    pub depth: u32,
}

impl EntityRow {
    #[must_use]
    pub fn key(&self) -> RowKey {
        RowKey::for_path(&self.path)
    }

    #[must_use]
    pub fn decimal_bounds(&self) -> (Decimal, Decimal) {
        self.interval.decimal_bounds()
    }

    #[must_use]
    pub fn into_entity(self) -> Entity {
        Entity {
            path: self.path,
            name: self.name,
            properties: self.properties,
        }
    }
}

/// Partition set covered by a descendant range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanScope {
    /// One `(tenant, feed)` partition.
    Partition { tenant_id: String, feed_id: String },
    /// Every partition of a tenant. Feeds live in their own partitions while
    /// their labels nest inside the tenant's.
    Tenant { tenant_id: String },
}

impl ScanScope {
    /// Smallest scope holding every descendant of `path`.
    #[must_use]
    pub fn for_path(path: &CanonicalPath) -> Self {
        if path.parent().is_none() {
            Self::Tenant {
                tenant_id: path.tenant_id().to_string(),
            }
        } else {
            Self::Partition {
                tenant_id: path.tenant_id().to_string(),
                feed_id: path.partition_id().to_string(),
            }
        }
    }

    #[must_use]
    pub fn covers(&self, key: &RowKey) -> bool {
        match self {
            Self::Partition { tenant_id, feed_id } => {
                key.tenant_id == *tenant_id && key.feed_id == *feed_id
            }
            Self::Tenant { tenant_id } => key.tenant_id == *tenant_id,
        }
    }
}

/// A stored path and its tree path, as returned by [`TreeStore::scan_paths`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub key: RowKey,
    pub tree_path: Vec<u32>,
}

/// Primitive operations of the backing store.
///
/// Conditional writes report whether they applied; the orchestrator relies on
/// them instead of application-level locking.
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn get(&self, key: &RowKey) -> Result<Option<EntityRow>, StorageError>;

    /// Insert only if no row exists for the key. Returns whether it applied.
    async fn insert_if_absent(&self, row: &EntityRow) -> Result<bool, StorageError>;

    /// Replace name and properties only if the row exists. Returns whether it applied.
    async fn update_if_exists(
        &self,
        key: &RowKey,
        name: Option<&str>,
        properties: &Properties,
    ) -> Result<bool, StorageError>;

    /// Returns whether a row existed.
    async fn delete(&self, key: &RowKey) -> Result<bool, StorageError>;

    /// Keys of rows in `scope` with `low >= low_bound AND high <= high_bound`.
    ///
    /// The low bound is inclusive because decimal rounding can collapse a
    /// deep child's low onto its parent's. The result includes the row that
    /// supplied the bounds and may include rounding neighbours, so callers
    /// filter by path.
    async fn scan_descendant_keys(
        &self,
        scope: &ScanScope,
        low_bound: Decimal,
        high_bound: Decimal,
    ) -> Result<Vec<RowKey>, StorageError>;

    /// Scan stored paths for rank cache seeding (paginated, stable order).
    /// Returns empty vec when offset exceeds total count.
    async fn scan_paths(&self, offset: u64, limit: usize) -> Result<Vec<PathEntry>, StorageError>;

    /// Count total rows in store.
    async fn count_all(&self) -> Result<u64, StorageError>;
}
