// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Structure sync: make the stored subtree under a root match a desired
//! [`InventoryStructure`].
//!
//! Two phases, strictly ordered:
//! 1. prune stored descendants absent from the structure
//! 2. upsert the structure top-down with a bounded worklist; a node's
//!    children are only scheduled once the node itself is stored

use std::collections::VecDeque;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::entity::Entity;
use crate::metrics::LatencyTimer;
use crate::path::CanonicalPath;
use crate::structure::InventoryStructure;

use super::{observe, InventoryError, InventoryStorage, SyncReport, UpsertOutcome};

impl InventoryStorage {
    /// Replace the stored subtree at `root_path` with `structure`.
    ///
    /// Entities present in both are updated in place and keep their
    /// intervals; stored entities missing from the structure are deleted
    /// with their subtrees; new ones are created.
    ///
    /// A failure in one subtree does not stop unrelated siblings. Once the
    /// worklist drains, any failures are reported as
    /// [`InventoryError::PartialSync`].
    #[tracing::instrument(skip(self, structure), fields(root = %root_path, entities = structure.entity_count()))]
    pub async fn sync(
        &self,
        root_path: &CanonicalPath,
        structure: &InventoryStructure,
    ) -> Result<SyncReport, InventoryError> {
        let _timer = LatencyTimer::new("sync");
        let result = self.sync_structure(root_path, structure).await;
        observe("sync", &result);
        result
    }

    async fn sync_structure(
        &self,
        root_path: &CanonicalPath,
        structure: &InventoryStructure,
    ) -> Result<SyncReport, InventoryError> {
        if structure.root_path() != root_path {
            return Err(InventoryError::RootMismatch {
                expected: root_path.to_string(),
                actual: structure.root_path().to_string(),
            });
        }
        let root_type = root_path.segment_type();
        if !root_type.is_syncable() {
            return Err(InventoryError::NotSyncable {
                path: root_path.to_string(),
                entity_type: root_type.to_string(),
            });
        }

        let mut report = SyncReport::default();

        let (root_row, outcome) = self.upsert_full(structure.root()).await?;
        report.upserted += 1;
        if outcome == UpsertOutcome::Created {
            report.created += 1;
        }

        report.deleted = self
            .delete_descendants(&root_row, |path| structure.contains(path))
            .await?;
        if report.deleted > 0 {
            crate::metrics::record_rows_deleted(report.deleted);
            debug!(root = %root_path, deleted = report.deleted, "Pruned stale descendants");
        }

        let limit = self.config.effective_concurrency();
        let mut pending: VecDeque<&CanonicalPath> = structure.children_of(root_path).iter().collect();
        let mut in_flight = FuturesUnordered::new();
        let mut failed = 0usize;
        let mut skipped = 0usize;
        let mut first_error: Option<InventoryError> = None;

        loop {
            while in_flight.len() < limit {
                let Some(path) = pending.pop_front() else {
                    break;
                };
                let Some(entity) = structure.get_canonical(path) else {
                    continue;
                };
                in_flight.push(self.upsert_node(entity));
            }

            let Some((path, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(outcome) => {
                    report.upserted += 1;
                    if outcome == UpsertOutcome::Created {
                        report.created += 1;
                    }
                    pending.extend(structure.children_of(path));
                }
                Err(e) => {
                    let below = subtree_size(structure, path);
                    warn!(path = %path, error = %e, skipped = below, "Sync failed for entity, skipping its subtree");
                    failed += 1;
                    skipped += below;
                    first_error.get_or_insert(e);
                }
            }
        }

        crate::metrics::record_sync(report.upserted, report.deleted, failed);

        if let Some(first) = first_error {
            return Err(InventoryError::PartialSync {
                failed,
                skipped,
                first: Box::new(first),
            });
        }

        info!(
            root = %root_path,
            upserted = report.upserted,
            created = report.created,
            deleted = report.deleted,
            "Sync complete"
        );
        Ok(report)
    }

    async fn upsert_node<'a>(&self, entity: &'a Entity) -> (&'a CanonicalPath, Result<UpsertOutcome, InventoryError>) {
        let result = self.apply_upsert(entity).await.map(|applied| applied.outcome());
        if let Ok(outcome) = &result {
            crate::metrics::record_upsert(outcome.as_str());
        }
        (&entity.path, result)
    }
}

/// Entities strictly below `path` in `structure`.
fn subtree_size(structure: &InventoryStructure, path: &CanonicalPath) -> usize {
    let mut count = 0;
    let mut stack: Vec<&CanonicalPath> = structure.children_of(path).iter().collect();
    while let Some(next) = stack.pop() {
        count += 1;
        stack.extend(structure.children_of(next));
    }
    count
}
