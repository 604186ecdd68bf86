// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Inventory storage orchestrator.
//!
//! [`InventoryStorage`] ties together:
//! - a [`TreeStore`] holding one row per entity with its nested-interval label
//! - a [`ChildRankAllocator`] handing out sibling ranks for new children
//!
//! # Lifecycle
//!
//! ```text
//! open → initialize_ranks (scan every stored path) → lookup / upsert / delete / sync
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use inventory_tree::{CanonicalPath, Entity, InventoryStorage};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), inventory_tree::InventoryError> {
//! let storage = InventoryStorage::in_memory();
//!
//! let tenant = CanonicalPath::tenant("acme")?;
//! storage.upsert(&Entity::at(tenant.clone())).await?;
//!
//! let feed = tenant.extend(inventory_tree::SegmentType::Feed, "host-1")?;
//! storage.upsert(&Entity::at(feed.clone()).with_name("Host 1")).await?;
//!
//! assert_eq!(storage.lookup(&feed).await?.unwrap().name.as_deref(), Some("Host 1"));
//! # Ok(())
//! # }
//! ```

mod types;
mod api;
mod lifecycle;
mod sync;

pub use types::{InventoryError, SyncReport, UpsertOutcome};

use std::sync::Arc;

use crate::config::InventoryConfig;
use crate::rank_cache::ChildRankAllocator;
use crate::storage::traits::TreeStore;

/// Orchestrates lookups, upserts, cascading deletes and structure sync
/// over a [`TreeStore`].
///
/// # Thread Safety
///
/// `Send + Sync`; every operation takes `&self`. Concurrent creations under
/// one parent receive distinct ranks from the allocator, and concurrent
/// creations of the same path are arbitrated by the store's conditional insert.
pub struct InventoryStorage {
    pub(super) store: Arc<dyn TreeStore>,
    pub(super) ranks: Arc<dyn ChildRankAllocator>,
    pub(super) config: InventoryConfig,
}

impl std::fmt::Debug for InventoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryStorage")
            .field("ranked_parents", &self.ranks.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Record operation status and error kind for a finished call.
pub(super) fn observe<T>(operation: &'static str, result: &Result<T, InventoryError>) {
    match result {
        Ok(_) => crate::metrics::record_operation(operation, "success"),
        Err(e) => {
            crate::metrics::record_operation(operation, "error");
            crate::metrics::record_error(operation, e.kind());
        }
    }
}
