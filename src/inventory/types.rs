// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the inventory storage.

use thiserror::Error;

use crate::labeling::LabelingError;
use crate::path::PathError;
use crate::rank_cache::RankError;
use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum InventoryError {
    /// A required row is missing (the parent, during creation).
    #[error("Entity not found: {path}")]
    NotFound { path: String },

    /// The mediant descent left the 64-bit range.
    #[error("Interval overflow labeling '{path}' at tree path {tree_path:?}")]
    IntervalOverflow { path: String, tree_path: Vec<u32> },

    #[error("Invalid sibling rank labeling '{path}' at tree path {tree_path:?}")]
    InvalidRank { path: String, tree_path: Vec<u32> },

    #[error(transparent)]
    RankExhausted(#[from] RankError),

    /// A conditional insert lost a race with a concurrent creation of the same path.
    #[error("Conflicting concurrent write creating '{path}'")]
    ConflictingWrite { path: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    InvalidPath(#[from] PathError),

    #[error("Entities of type {entity_type} cannot be synced: {path}")]
    NotSyncable { path: String, entity_type: String },

    #[error("Structure is rooted at '{actual}' but sync was requested for '{expected}'")]
    RootMismatch { expected: String, actual: String },

    /// Some subtrees of a sync failed; everything else was applied.
    #[error("Sync incomplete: {failed} entities failed, {skipped} skipped below them; first error: {first}")]
    PartialSync {
        failed: usize,
        skipped: usize,
        first: Box<InventoryError>,
    },
}

impl InventoryError {
    pub(crate) fn labeling(path: &impl ToString, err: LabelingError) -> Self {
        match err {
            LabelingError::Overflow { tree_path } => Self::IntervalOverflow {
                path: path.to_string(),
                tree_path,
            },
            LabelingError::InvalidRank { tree_path, .. } => Self::InvalidRank {
                path: path.to_string(),
                tree_path,
            },
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::IntervalOverflow { .. } => "interval_overflow",
            Self::InvalidRank { .. } => "invalid_rank",
            Self::RankExhausted(_) => "rank_exhausted",
            Self::ConflictingWrite { .. } => "conflicting_write",
            Self::Storage(StorageError::Backend(_)) => "storage",
            Self::Storage(StorageError::Corruption { .. }) => "corruption",
            Self::InvalidPath(_) => "invalid_path",
            Self::NotSyncable { .. } => "not_syncable",
            Self::RootMismatch { .. } => "root_mismatch",
            Self::PartialSync { .. } => "partial_sync",
        }
    }
}

/// Whether an upsert created the entity or updated an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl UpsertOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

impl std::fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful sync changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entities upserted, root included
    pub upserted: usize,
    /// Of those, entities that did not exist before
    pub created: usize,
    /// Stored descendants pruned because the structure no longer has them
    pub deleted: usize,
}
