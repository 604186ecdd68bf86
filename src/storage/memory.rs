// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;

use super::traits::{EntityRow, PathEntry, RowKey, ScanScope, StorageError, TreeStore};
use crate::entity::Properties;

/// `DashMap`-backed store. Conditional writes go through the entry API so
/// they are atomic per key.
pub struct InMemoryTreeStore {
    data: DashMap<RowKey, EntityRow>,
}

impl InMemoryTreeStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current row count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all rows
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TreeStore for InMemoryTreeStore {
    async fn get(&self, key: &RowKey) -> Result<Option<EntityRow>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn insert_if_absent(&self, row: &EntityRow) -> Result<bool, StorageError> {
        match self.data.entry(row.key()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(true)
            }
        }
    }

    async fn update_if_exists(
        &self,
        key: &RowKey,
        name: Option<&str>,
        properties: &Properties,
    ) -> Result<bool, StorageError> {
        match self.data.get_mut(key) {
            Some(mut row) => {
                row.name = name.map(str::to_string);
                row.properties = properties.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &RowKey) -> Result<bool, StorageError> {
        Ok(self.data.remove(key).is_some())
    }

    async fn scan_descendant_keys(
        &self,
        scope: &ScanScope,
        low_bound: Decimal,
        high_bound: Decimal,
    ) -> Result<Vec<RowKey>, StorageError> {
        let keys = self
            .data
            .iter()
            .filter(|r| scope.covers(r.key()))
            .filter(|r| {
                let (low, high) = r.value().decimal_bounds();
                low >= low_bound && high <= high_bound
            })
            .map(|r| r.key().clone())
            .collect();
        Ok(keys)
    }

    async fn scan_paths(&self, offset: u64, limit: usize) -> Result<Vec<PathEntry>, StorageError> {
        let mut keys: Vec<RowKey> = self.data.iter().map(|r| r.key().clone()).collect();
        keys.sort();

        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let entries = keys
            .into_iter()
            .skip(start)
            .take(limit)
            .filter_map(|key| {
                // Rows deleted since the key snapshot are skipped.
                let tree_path = self.data.get(&key)?.tree_path.clone();
                Some(PathEntry { key, tree_path })
            })
            .collect();
        Ok(entries)
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }
}
