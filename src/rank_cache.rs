// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-parent sibling rank allocation.
//!
//! Every new child needs a sibling rank under its parent, and a rank must
//! never be handed out twice for the same parent: its interval may already
//! bound the labels of descendants. [`ChildRankAllocator`] is the seam; the
//! [`InMemoryRankCache`] implementation is correct only while a single process
//! owns writes to the tree.
//!
//! Each parent tracks two numbers:
//!
//! - `issued`: high-water mark of allocated ranks. Only ever grows.
//! - `live`: children currently believed to exist. Bookkeeping only.
//!
//! ```
//! use inventory_tree::{CanonicalPath, ChildRankAllocator, InMemoryRankCache};
//!
//! let cache = InMemoryRankCache::new();
//! let feed = CanonicalPath::parse("/t;acme/f;host-1").unwrap();
//!
//! assert_eq!(cache.allocate(&feed).unwrap(), 1);
//! assert_eq!(cache.allocate(&feed).unwrap(), 2);
//!
//! cache.release(&feed);
//! // Released ranks are never reused.
//! assert_eq!(cache.allocate(&feed).unwrap(), 3);
//! ```

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::metrics;
use crate::path::CanonicalPath;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RankError {
    #[error("No sibling ranks left under '{parent}'")]
    Exhausted { parent: String },
}

/// Counter state for one parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankCounter {
    /// Highest rank ever handed out (or inferred from stored rows).
    pub issued: u32,
    /// Children currently believed to exist.
    pub live: u32,
}

/// One stored row, as fed to [`ChildRankAllocator::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSeed {
    pub path: CanonicalPath,
    /// Last element of the row's tree path, when known.
    pub rank: Option<u32>,
}

impl ChildSeed {
    #[must_use]
    pub fn new(path: CanonicalPath, rank: Option<u32>) -> Self {
        Self { path, rank }
    }
}

/// Source of sibling ranks.
///
/// Implementations must be linearizable per parent: no two `allocate` calls
/// for the same parent may return the same value.
pub trait ChildRankAllocator: Send + Sync {
    /// Discard all state and rebuild it from the surviving stored rows.
    fn initialize(&self, seeds: Vec<ChildSeed>);

    /// Next unused rank under `parent` (1 for a parent never seen before).
    fn allocate(&self, parent: &CanonicalPath) -> Result<u32, RankError>;

    /// A child of `parent` was removed. Never makes a rank reusable.
    fn release(&self, parent: &CanonicalPath);

    /// Current counters for `parent`, if tracked.
    fn snapshot(&self, parent: &CanonicalPath) -> Option<RankCounter>;

    /// Number of tracked parents.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single-process rank cache guarded by one mutex.
///
/// One lock covers rebuild, allocation and release alike; per-key atomics
/// cannot make "create the counter if missing, then increment" linearizable.
#[derive(Debug, Default)]
pub struct InMemoryRankCache {
    counters: Mutex<HashMap<CanonicalPath, RankCounter>>,
}

impl InMemoryRankCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChildRankAllocator for InMemoryRankCache {
    fn initialize(&self, seeds: Vec<ChildSeed>) {
        let mut counters = self.counters.lock();
        counters.clear();

        let rows = seeds.len();
        for seed in seeds {
            let Some(parent) = seed.path.parent() else {
                continue;
            };

            let counter = counters.entry(parent.clone()).or_default();
            counter.live = counter.live.saturating_add(1);
            counter.issued = counter
                .issued
                .max(counter.live)
                .max(seed.rank.unwrap_or(0));

            // The parent has at least one child, so does each ancestor.
            for ancestor in parent.ancestors() {
                if counters.contains_key(&ancestor) {
                    break;
                }
                counters.insert(ancestor, RankCounter { issued: 1, live: 0 });
            }
        }

        metrics::set_rank_cache_parents(counters.len());
        info!(rows, parents = counters.len(), "Rank cache initialized");
    }

    fn allocate(&self, parent: &CanonicalPath) -> Result<u32, RankError> {
        let mut counters = self.counters.lock();
        let counter = counters.entry(parent.clone()).or_default();

        let rank = counter.issued.checked_add(1).ok_or_else(|| RankError::Exhausted {
            parent: parent.to_string(),
        })?;
        counter.issued = rank;
        counter.live = counter.live.saturating_add(1);
        let tracked = counters.len();
        drop(counters);

        debug!(parent = %parent, rank, "Allocated sibling rank");
        metrics::record_rank_allocated();
        metrics::set_rank_cache_parents(tracked);
        Ok(rank)
    }

    fn release(&self, parent: &CanonicalPath) {
        let mut counters = self.counters.lock();
        if let Some(counter) = counters.get_mut(parent) {
            counter.live = counter.live.saturating_sub(1);
        }
    }

    fn snapshot(&self, parent: &CanonicalPath) -> Option<RankCounter> {
        self.counters.lock().get(parent).copied()
    }

    fn len(&self) -> usize {
        self.counters.lock().len()
    }
}
