// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Construction and startup: backend selection and rank cache seeding.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::InventoryConfig;
use crate::rank_cache::{ChildRankAllocator, ChildSeed, InMemoryRankCache};
use crate::storage::memory::InMemoryTreeStore;
use crate::storage::sql::SqlTreeStore;
use crate::storage::traits::TreeStore;

use super::{InventoryError, InventoryStorage};

impl InventoryStorage {
    /// Wrap existing backends. The rank cache is NOT seeded; call
    /// [`initialize_ranks`](Self::initialize_ranks) if the store already holds rows.
    #[must_use]
    pub fn with_backends(
        store: Arc<dyn TreeStore>,
        ranks: Arc<dyn ChildRankAllocator>,
        config: InventoryConfig,
    ) -> Self {
        Self { store, ranks, config }
    }

    /// Empty in-memory store with a fresh rank cache.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_backends(
            Arc::new(InMemoryTreeStore::new()),
            Arc::new(InMemoryRankCache::new()),
            InventoryConfig::default(),
        )
    }

    /// Connect to the configured backend and seed the rank cache from it.
    ///
    /// Uses SQL when `config.sql_url` is set, memory otherwise.
    #[tracing::instrument(skip(config), fields(backend))]
    pub async fn open(config: InventoryConfig) -> Result<Self, InventoryError> {
        let store: Arc<dyn TreeStore> = match config.sql_url.as_deref() {
            Some(url) => {
                tracing::Span::current().record("backend", "sql");
                Arc::new(SqlTreeStore::with_config(url, &config).await?)
            }
            None => {
                tracing::Span::current().record("backend", "memory");
                warn!("No SQL URL configured, inventory is held in memory only");
                Arc::new(InMemoryTreeStore::new())
            }
        };

        let storage = Self::with_backends(store, Arc::new(InMemoryRankCache::new()), config);
        storage.initialize_ranks().await?;
        Ok(storage)
    }

    /// Rebuild the rank cache from every stored row.
    ///
    /// Must run before serving writes against a store that already has data,
    /// otherwise new children could be handed ranks already in use.
    /// Returns the number of rows scanned.
    #[tracing::instrument(skip(self))]
    pub async fn initialize_ranks(&self) -> Result<usize, InventoryError> {
        let start = Instant::now();
        let page_size = self.config.page_size.max(1);
        let mut seeds = Vec::new();
        let mut offset = 0u64;

        loop {
            let page = self.store.scan_paths(offset, page_size).await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len();
            for entry in page {
                let path = entry.key.to_path()?;
                let rank = if entry.tree_path.len() > 1 {
                    entry.tree_path.last().copied()
                } else {
                    None
                };
                seeds.push(ChildSeed::new(path, rank));
            }
            offset += fetched as u64;
            debug!(offset, "Scanned page of stored paths");

            if fetched < page_size {
                break;
            }
        }

        let rows = seeds.len();
        self.ranks.initialize(seeds);
        crate::metrics::record_rank_cache_seed(rows, start.elapsed());
        info!(rows, parents = self.ranks.len(), elapsed_ms = start.elapsed().as_millis() as u64, "Rank cache seeded");
        Ok(rows)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    #[must_use]
    pub fn ranks(&self) -> &Arc<dyn ChildRankAllocator> {
        &self.ranks
    }

    #[must_use]
    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }
}
