// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tree API: lookup, upsert, cascading delete.
//!
//! Writes never lock: creation relies on the store's conditional insert,
//! updates on its conditional update, and sibling ranks come from the
//! rank allocator.

use futures::{stream, StreamExt};
use tracing::{debug, trace, warn};

use crate::entity::Entity;
use crate::labeling::{interval_for, Interval};
use crate::metrics::LatencyTimer;
use crate::path::CanonicalPath;
use crate::storage::traits::{EntityRow, RowKey, ScanScope};

use super::{observe, InventoryError, InventoryStorage, UpsertOutcome};

/// Result of the write half of an upsert. Only creation yields the row.
pub(super) enum Applied {
    Updated,
    Created(EntityRow),
}

impl Applied {
    pub(super) fn outcome(&self) -> UpsertOutcome {
        match self {
            Self::Updated => UpsertOutcome::Updated,
            Self::Created(_) => UpsertOutcome::Created,
        }
    }
}

impl InventoryStorage {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Lookup
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fetch the entity stored at `path`.
    #[tracing::instrument(skip(self), fields(path = %path))]
    pub async fn lookup(&self, path: &CanonicalPath) -> Result<Option<Entity>, InventoryError> {
        let _timer = LatencyTimer::new("lookup");
        let result = self
            .store
            .get(&RowKey::for_path(path))
            .await
            .map(|row| row.map(EntityRow::into_entity))
            .map_err(InventoryError::from);
        observe("lookup", &result);
        result
    }

    /// Fetch the full stored row (interval and tree path included).
    pub async fn lookup_row(&self, path: &CanonicalPath) -> Result<Option<EntityRow>, InventoryError> {
        Ok(self.store.get(&RowKey::for_path(path)).await?)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Upsert
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create the entity, or replace the name and properties of an existing one.
    ///
    /// The parent must already exist. An existing entity keeps its interval.
    ///
    /// # Errors
    /// - [`InventoryError::NotFound`] naming the parent when it is missing
    /// - [`InventoryError::ConflictingWrite`] when a concurrent call created
    ///   the same path first
    /// - [`InventoryError::IntervalOverflow`] when the tree is too deep or wide
    ///   to label in 64 bits
    #[tracing::instrument(skip(self, entity), fields(path = %entity.path))]
    pub async fn upsert(&self, entity: &Entity) -> Result<UpsertOutcome, InventoryError> {
        let _timer = LatencyTimer::new("upsert");
        let result = self.apply_upsert(entity).await.map(|applied| applied.outcome());
        if let Ok(outcome) = &result {
            crate::metrics::record_upsert(outcome.as_str());
        }
        observe("upsert", &result);
        result
    }

    /// Upsert and return the stored row.
    pub async fn upsert_full(&self, entity: &Entity) -> Result<(EntityRow, UpsertOutcome), InventoryError> {
        match self.apply_upsert(entity).await? {
            Applied::Created(row) => Ok((row, UpsertOutcome::Created)),
            Applied::Updated => {
                // Row may vanish between the update and this read under a concurrent delete
                let row = self.store.get(&RowKey::for_path(&entity.path)).await?.ok_or_else(|| {
                    InventoryError::NotFound {
                        path: entity.path.to_string(),
                    }
                })?;
                Ok((row, UpsertOutcome::Updated))
            }
        }
    }

    pub(super) async fn apply_upsert(&self, entity: &Entity) -> Result<Applied, InventoryError> {
        let key = RowKey::for_path(&entity.path);
        let updated = self
            .store
            .update_if_exists(&key, entity.name.as_deref(), &entity.properties)
            .await?;
        if updated {
            debug!(path = %entity.path, "Updated existing entity");
            return Ok(Applied::Updated);
        }
        self.create(entity).await.map(Applied::Created)
    }

    async fn create(&self, entity: &Entity) -> Result<EntityRow, InventoryError> {
        let Some(parent_path) = entity.path.parent() else {
            let row = EntityRow {
                path: entity.path.clone(),
                name: entity.name.clone(),
                properties: entity.properties.clone(),
                interval: Interval::ROOT,
                tree_path: vec![1],
                depth: 1,
            };
            return self.insert_new(row, None).await;
        };

        let parent = self
            .store
            .get(&RowKey::for_path(&parent_path))
            .await?
            .ok_or_else(|| InventoryError::NotFound {
                path: parent_path.to_string(),
            })?;

        let rank = self.ranks.allocate(&parent_path)?;
        let mut tree_path = parent.tree_path;
        tree_path.push(rank);

        let interval = match interval_for(&tree_path) {
            Ok(interval) => interval,
            Err(e) => {
                self.ranks.release(&parent_path);
                warn!(path = %entity.path, error = %e, "Cannot label new entity");
                return Err(InventoryError::labeling(&entity.path, e));
            }
        };

        let row = EntityRow {
            path: entity.path.clone(),
            name: entity.name.clone(),
            properties: entity.properties.clone(),
            interval,
            depth: parent.depth + 1,
            tree_path,
        };
        self.insert_new(row, Some(&parent_path)).await
    }

    async fn insert_new(&self, row: EntityRow, parent: Option<&CanonicalPath>) -> Result<EntityRow, InventoryError> {
        let inserted = match self.store.insert_if_absent(&row).await {
            Ok(inserted) => inserted,
            Err(e) => {
                if let Some(parent) = parent {
                    self.ranks.release(parent);
                }
                return Err(e.into());
            }
        };

        if !inserted {
            if let Some(parent) = parent {
                self.ranks.release(parent);
            }
            warn!(path = %row.path, "Lost creation race, entity was inserted concurrently");
            return Err(InventoryError::ConflictingWrite {
                path: row.path.to_string(),
            });
        }

        debug!(path = %row.path, tree_path = ?row.tree_path, interval = %row.interval, "Created entity");
        Ok(row)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Delete
    // ═══════════════════════════════════════════════════════════════════════════

    /// Delete the entity at `path` and its whole subtree.
    ///
    /// Returns the number of rows removed; a missing path removes nothing.
    #[tracing::instrument(skip(self), fields(path = %path))]
    pub async fn delete(&self, path: &CanonicalPath) -> Result<usize, InventoryError> {
        let _timer = LatencyTimer::new("delete");
        let result = self.delete_subtree(path).await;
        if let Ok(count) = result {
            crate::metrics::record_rows_deleted(count);
        }
        observe("delete", &result);
        result
    }

    async fn delete_subtree(&self, path: &CanonicalPath) -> Result<usize, InventoryError> {
        let key = RowKey::for_path(path);
        let Some(target) = self.store.get(&key).await? else {
            debug!(path = %path, "Nothing to delete");
            return Ok(0);
        };

        let mut removed = self.delete_descendants(&target, |_| false).await?;
        if self.store.delete(&key).await? {
            if let Some(parent) = path.parent() {
                self.ranks.release(&parent);
            }
            removed += 1;
        }
        debug!(path = %path, removed, "Deleted subtree");
        Ok(removed)
    }

    /// Delete every stored descendant of `root` for which `keep` is false,
    /// shallowest first. Returns the number of rows removed.
    pub(super) async fn delete_descendants<F>(&self, root: &EntityRow, keep: F) -> Result<usize, InventoryError>
    where
        F: Fn(&CanonicalPath) -> bool,
    {
        let (low, high) = root.decimal_bounds();
        let scope = ScanScope::for_path(&root.path);
        let keys = self.store.scan_descendant_keys(&scope, low, high).await?;

        let mut doomed = Vec::with_capacity(keys.len());
        for key in keys {
            let path = key.to_path()?;
            // The low bound is inclusive, so the root itself comes back
            if path == root.path {
                continue;
            }
            if !root.path.is_ancestor_of(&path) {
                debug!(root = %root.path, found = %path, "Range scan returned a rounding neighbour, skipping");
                continue;
            }
            if keep(&path) {
                continue;
            }
            doomed.push((key, path));
        }
        doomed.sort_by_key(|(_, path)| path.depth());

        if doomed.is_empty() {
            return Ok(0);
        }
        trace!(root = %root.path, count = doomed.len(), "Deleting descendants");

        let mut deletions = stream::iter(doomed)
            .map(|(key, path)| async move {
                let existed = self.store.delete(&key).await?;
                if existed {
                    if let Some(parent) = path.parent() {
                        self.ranks.release(&parent);
                    }
                    trace!(path = %path, "Deleted descendant");
                }
                Ok::<bool, InventoryError>(existed)
            })
            .buffer_unordered(self.config.effective_concurrency());

        // Run every queued delete before reporting the first failure
        let mut removed = 0usize;
        let mut first_error = None;
        while let Some(result) = deletions.next().await {
            match result {
                Ok(existed) => removed += usize::from(existed),
                Err(e) => {
                    warn!(root = %root.path, error = %e, "Descendant delete failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                warn!(root = %root.path, removed, "Subtree delete incomplete");
                Err(e)
            }
            None => Ok(removed),
        }
    }
}
