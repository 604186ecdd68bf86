// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backing store primitives and their implementations.
//!
//! - [`memory::InMemoryTreeStore`]: `DashMap` store for tests and embedded use
//! - [`sql::SqlTreeStore`]: SQLite / MySQL via sqlx

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::InMemoryTreeStore;
pub use sql::SqlTreeStore;
pub use traits::{EntityRow, PathEntry, RowKey, ScanScope, StorageError, TreeStore};
