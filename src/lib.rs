// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Inventory Tree
//!
//! Hierarchical inventory storage over a flat key/column store, using
//! nested-interval labels so that "every descendant of X" is a single range
//! scan and no existing row is ever relabeled.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    InventoryStorage                         │
//! │  • lookup / upsert / delete / sync                          │
//! │  • bounded fan-out for sync and cascading delete            │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌─────────────────────────┐      ┌─────────────────────────────┐
//! │    Child-rank cache     │      │   Stern–Brocot labeler      │
//! │  • per-parent counters  │      │  • tree path → [low, high)  │
//! │  • ranks never reused   │      │  • exact 64-bit rationals   │
//! └─────────────────────────┘      └─────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TreeStore                            │
//! │  • conditional insert / update, delete, range scan          │
//! │  • SQLite / MySQL via sqlx, or in-memory DashMap            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use inventory_tree::{
//!     CanonicalPath, Entity, InventoryConfig, InventoryStorage, InventoryStructure, SegmentType, StructureLevel,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = InventoryConfig {
//!         sql_url: Some("sqlite://inventory.db?mode=rwc".into()),
//!         ..Default::default()
//!     };
//!     let storage = InventoryStorage::open(config).await?;
//!
//!     let tenant = CanonicalPath::tenant("acme")?;
//!     storage.upsert(&Entity::at(tenant.clone())).await?;
//!
//!     let feed = tenant.extend(SegmentType::Feed, "host-1")?;
//!     let structure = InventoryStructure::of(Entity::at(feed.clone()))
//!         .add_child(Entity::at(feed.extend(SegmentType::Resource, "jvm")?))
//!         .build()?;
//!
//!     let report = storage.sync(&feed, &structure).await?;
//!     println!("created {} entities", report.created);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`inventory`]: The [`InventoryStorage`] orchestrator
//! - [`labeling`]: Tree path to interval mapping
//! - [`rank_cache`]: Sibling rank allocation
//! - [`storage`]: Store backends (SQL, memory)
//! - [`path`]: Canonical and relative paths
//! - [`structure`]: Desired subtrees for sync
//! - [`tenants`]: Tenant auto-creation
//! - [`resilience`]: Retry with backoff

pub mod config;
pub mod entity;
pub mod inventory;
pub mod labeling;
pub mod metrics;
pub mod path;
pub mod rank_cache;
pub mod resilience;
pub mod storage;
pub mod structure;
pub mod tenants;

pub use config::InventoryConfig;
pub use entity::{Entity, Properties};
pub use inventory::{InventoryError, InventoryStorage, SyncReport, UpsertOutcome};
pub use labeling::{interval_for, Interval, LabelingError, Rational};
pub use path::{CanonicalPath, PathError, RelativePath, Segment, SegmentType, TENANT_PARTITION};
pub use rank_cache::{ChildRankAllocator, ChildSeed, InMemoryRankCache, RankCounter, RankError};
pub use storage::{EntityRow, InMemoryTreeStore, PathEntry, RowKey, ScanScope, SqlTreeStore, StorageError, TreeStore};
pub use structure::{InventoryStructure, StructureBuilder, StructureError, StructureLevel};
pub use tenants::TenantRegistry;
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
