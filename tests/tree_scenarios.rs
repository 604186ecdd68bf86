//! End-to-end tree scenarios against the public API.
//!
//! Everything runs on the in-memory store except the `sqlite_*` tests, which
//! use a temporary SQLite file.
//!
//! # Running Tests
//! ```bash
//! cargo test --test tree_scenarios
//! ```
//!
//! # Test Organization
//! - `scenario_*` - sync of the reference feed structure and its pruning
//! - `upsert_*` / `delete_*` - single-entity operations
//! - `failure_*` - store failures, lost races, invalid sync requests
//! - `restart_*` - rank cache seeding from existing rows

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use rust_decimal::Decimal;
use tempfile::TempDir;

use inventory_tree::{
    CanonicalPath, ChildRankAllocator, ChildSeed, Entity, EntityRow, InMemoryRankCache, InMemoryTreeStore, InventoryConfig,
    InventoryError, InventoryStorage, InventoryStructure, PathEntry, Properties, RowKey, ScanScope, StorageError,
    StructureLevel, TreeStore, UpsertOutcome,
};

// =============================================================================
// Helpers
// =============================================================================

fn p(s: &str) -> CanonicalPath {
    CanonicalPath::parse(s).unwrap()
}

fn e(s: &str) -> Entity {
    Entity::at(p(s))
}

/// fd with two resources (one and two metrics), a resource type and a metric type.
fn full_structure() -> InventoryStructure {
    InventoryStructure::of(e("/t;t/f;fd"))
        .start_child(e("/t;t/f;fd/r;r1"))
            .add_child(e("/t;t/f;fd/r;r1/m;m1"))
        .end()
        .start_child(e("/t;t/f;fd/r;r2"))
            .add_child(e("/t;t/f;fd/r;r2/m;m2"))
            .add_child(e("/t;t/f;fd/r;r2/m;m3"))
        .end()
        .add_child(e("/t;t/f;fd/rt;rt1"))
        .add_child(e("/t;t/f;fd/mt;mt1"))
        .build()
        .unwrap()
}

/// `full_structure` without any metric.
fn pruned_structure() -> InventoryStructure {
    InventoryStructure::of(e("/t;t/f;fd"))
        .add_child(e("/t;t/f;fd/r;r1"))
        .add_child(e("/t;t/f;fd/r;r2"))
        .add_child(e("/t;t/f;fd/rt;rt1"))
        .add_child(e("/t;t/f;fd/mt;mt1"))
        .build()
        .unwrap()
}

async fn with_tenant(storage: &InventoryStorage, tenant: &str) {
    storage
        .upsert(&Entity::at(CanonicalPath::tenant(tenant).unwrap()))
        .await
        .unwrap();
}

async fn row(storage: &InventoryStorage, path: &str) -> EntityRow {
    storage.lookup_row(&p(path)).await.unwrap().unwrap()
}

/// Every stored entity of `structure` sits strictly inside its parent's
/// interval, and siblings never overlap.
async fn assert_nested(storage: &InventoryStorage, structure: &InventoryStructure) {
    for entity in structure.entities() {
        let child = storage.lookup_row(&entity.path).await.unwrap().unwrap();
        let parent_path = entity.path.parent().unwrap();
        let parent = storage.lookup_row(&parent_path).await.unwrap().unwrap();
        assert!(
            parent.interval.strictly_contains(&child.interval),
            "{} {} not inside {} {}",
            child.path,
            child.interval,
            parent.path,
            parent.interval
        );
        assert_eq!(child.depth, parent.depth + 1);
        assert_eq!(&child.tree_path[..child.tree_path.len() - 1], &parent.tree_path[..]);

        let siblings = structure.children_of(&entity.path);
        for (i, a) in siblings.iter().enumerate() {
            for b in &siblings[i + 1..] {
                let a = storage.lookup_row(a).await.unwrap().unwrap();
                let b = storage.lookup_row(b).await.unwrap().unwrap();
                assert!(!a.interval.overlaps(&b.interval), "{} overlaps {}", a.path, b.path);
            }
        }
    }
}

// =============================================================================
// Store wrappers
// =============================================================================

/// Delegates to memory, except that inserting `contested` first lets a
/// "concurrent writer" win and then reports the insert as not applied.
struct RacingStore {
    inner: InMemoryTreeStore,
    contested: String,
}

#[async_trait]
impl TreeStore for RacingStore {
    async fn get(&self, key: &RowKey) -> Result<Option<EntityRow>, StorageError> {
        self.inner.get(key).await
    }

    async fn insert_if_absent(&self, row: &EntityRow) -> Result<bool, StorageError> {
        if row.path.to_string() == self.contested {
            let mut winner = row.clone();
            winner.name = Some("winner".into());
            self.inner.insert_if_absent(&winner).await?;
            return Ok(false);
        }
        self.inner.insert_if_absent(row).await
    }

    async fn update_if_exists(&self, key: &RowKey, name: Option<&str>, properties: &Properties) -> Result<bool, StorageError> {
        self.inner.update_if_exists(key, name, properties).await
    }

    async fn delete(&self, key: &RowKey) -> Result<bool, StorageError> {
        self.inner.delete(key).await
    }

    async fn scan_descendant_keys(&self, scope: &ScanScope, low: Decimal, high: Decimal) -> Result<Vec<RowKey>, StorageError> {
        self.inner.scan_descendant_keys(scope, low, high).await
    }

    async fn scan_paths(&self, offset: u64, limit: usize) -> Result<Vec<PathEntry>, StorageError> {
        self.inner.scan_paths(offset, limit).await
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        self.inner.count_all().await
    }
}

/// Delegates to memory until `down` is set, then fails every call.
/// Inserts of `poisoned` and deletes of `undeletable` always fail.
struct FlakyStore {
    inner: InMemoryTreeStore,
    down: AtomicBool,
    poisoned: Option<String>,
    undeletable: Option<String>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryTreeStore::new(),
            down: AtomicBool::new(false),
            poisoned: None,
            undeletable: None,
        }
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TreeStore for FlakyStore {
    async fn get(&self, key: &RowKey) -> Result<Option<EntityRow>, StorageError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn insert_if_absent(&self, row: &EntityRow) -> Result<bool, StorageError> {
        self.check()?;
        if self.poisoned.as_deref() == Some(row.path.to_string().as_str()) {
            return Err(StorageError::Backend("insert rejected".into()));
        }
        self.inner.insert_if_absent(row).await
    }

    async fn update_if_exists(&self, key: &RowKey, name: Option<&str>, properties: &Properties) -> Result<bool, StorageError> {
        self.check()?;
        self.inner.update_if_exists(key, name, properties).await
    }

    async fn delete(&self, key: &RowKey) -> Result<bool, StorageError> {
        self.check()?;
        if self.undeletable.as_deref() == Some(key.entity_path.as_str()) {
            return Err(StorageError::Backend("delete rejected".into()));
        }
        self.inner.delete(key).await
    }

    async fn scan_descendant_keys(&self, scope: &ScanScope, low: Decimal, high: Decimal) -> Result<Vec<RowKey>, StorageError> {
        self.check()?;
        self.inner.scan_descendant_keys(scope, low, high).await
    }

    async fn scan_paths(&self, offset: u64, limit: usize) -> Result<Vec<PathEntry>, StorageError> {
        self.check()?;
        self.inner.scan_paths(offset, limit).await
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        self.check()?;
        self.inner.count_all().await
    }
}

fn storage_over(store: Arc<dyn TreeStore>) -> InventoryStorage {
    InventoryStorage::with_backends(store, Arc::new(InMemoryRankCache::new()), InventoryConfig::default())
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_sync_creates_full_structure() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;

    let structure = full_structure();
    let report = storage.sync(&p("/t;t/f;fd"), &structure).await.unwrap();

    assert_eq!(report.upserted, 8);
    assert_eq!(report.created, 8);
    assert_eq!(report.deleted, 0);
    assert_eq!(storage.store().count_all().await.unwrap(), 9);

    for entity in structure.entities() {
        assert!(storage.lookup(&entity.path).await.unwrap().is_some(), "{} missing", entity.path);
    }
    assert_nested(&storage, &structure).await;
}

#[tokio::test]
async fn scenario_resync_prunes_missing_metrics() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap();
    let r1_before = row(&storage, "/t;t/f;fd/r;r1").await;

    let report = storage.sync(&p("/t;t/f;fd"), &pruned_structure()).await.unwrap();

    assert_eq!(report.deleted, 3);
    assert_eq!(report.upserted, 5);
    assert_eq!(report.created, 0);
    for gone in ["/t;t/f;fd/r;r1/m;m1", "/t;t/f;fd/r;r2/m;m2", "/t;t/f;fd/r;r2/m;m3"] {
        assert!(storage.lookup(&p(gone)).await.unwrap().is_none(), "{gone} survived");
    }
    assert_eq!(storage.store().count_all().await.unwrap(), 6);
    assert_eq!(row(&storage, "/t;t/f;fd/r;r1").await.interval, r1_before.interval);
}

#[tokio::test]
async fn scenario_sync_is_idempotent() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    let structure = full_structure();

    storage.sync(&p("/t;t/f;fd"), &structure).await.unwrap();
    let mut before = Vec::new();
    for entity in structure.entities() {
        before.push(storage.lookup_row(&entity.path).await.unwrap().unwrap());
    }

    let report = storage.sync(&p("/t;t/f;fd"), &structure).await.unwrap();
    assert_eq!(report.upserted, 8);
    assert_eq!(report.created, 0);
    assert_eq!(report.deleted, 0);

    for old in before {
        assert_eq!(storage.lookup_row(&old.path).await.unwrap().unwrap(), old);
    }
}

#[tokio::test]
async fn scenario_sync_updates_payload_in_place() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap();
    let before = row(&storage, "/t;t/f;fd/r;r2").await;

    let renamed = InventoryStructure::of(e("/t;t/f;fd"))
        .add_child(e("/t;t/f;fd/r;r2").with_name("Renamed").with_property("k", "v"))
        .build()
        .unwrap();
    storage.sync(&p("/t;t/f;fd"), &renamed).await.unwrap();

    let after = row(&storage, "/t;t/f;fd/r;r2").await;
    assert_eq!(after.name.as_deref(), Some("Renamed"));
    assert_eq!(after.properties.get("k").map(String::as_str), Some("v"));
    assert_eq!(after.interval, before.interval);
    assert_eq!(after.tree_path, before.tree_path);
}

#[tokio::test]
async fn scenario_sync_leaves_sibling_feeds_alone() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    storage.upsert(&e("/t;t/f;other")).await.unwrap();
    storage.upsert(&e("/t;t/f;other/r;keep")).await.unwrap();

    storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap();
    storage.sync(&p("/t;t/f;fd"), &pruned_structure()).await.unwrap();

    assert!(storage.lookup(&p("/t;t/f;other/r;keep")).await.unwrap().is_some());
}

// =============================================================================
// Upsert
// =============================================================================

#[tokio::test]
async fn upsert_reports_created_then_updated() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;

    let feed = e("/t;t/f;fd");
    assert_eq!(storage.upsert(&feed).await.unwrap(), UpsertOutcome::Created);
    assert_eq!(storage.upsert(&feed).await.unwrap(), UpsertOutcome::Updated);
}

#[tokio::test]
async fn upsert_update_keeps_interval() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    storage.upsert(&e("/t;t/f;fd")).await.unwrap();
    storage.upsert(&e("/t;t/f;fd/r;r1").with_property("a", "1")).await.unwrap();
    let created = row(&storage, "/t;t/f;fd/r;r1").await;

    storage
        .upsert(&e("/t;t/f;fd/r;r1").with_name("R1").with_property("b", "2"))
        .await
        .unwrap();

    let updated = row(&storage, "/t;t/f;fd/r;r1").await;
    assert_eq!(updated.name.as_deref(), Some("R1"));
    assert_eq!(updated.properties.len(), 1);
    assert_eq!(updated.properties.get("b").map(String::as_str), Some("2"));
    assert_eq!(updated.interval, created.interval);
    assert_eq!(updated.tree_path, created.tree_path);
    assert_eq!(updated.depth, 3);
}

#[tokio::test]
async fn upsert_tenant_gets_root_interval() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;

    let tenant = row(&storage, "/t;t").await;
    assert_eq!(tenant.interval, inventory_tree::Interval::ROOT);
    assert_eq!(tenant.tree_path, vec![1]);
    assert_eq!(tenant.depth, 1);

    storage.upsert(&e("/t;t/f;a")).await.unwrap();
    storage.upsert(&e("/t;t/f;b")).await.unwrap();
    assert_eq!(row(&storage, "/t;t/f;a").await.tree_path, vec![1, 1]);
    assert_eq!(row(&storage, "/t;t/f;b").await.tree_path, vec![1, 2]);
    assert_eq!(
        row(&storage, "/t;t/f;a").await.interval,
        inventory_tree::interval_for(&[1, 1]).unwrap()
    );
}

#[tokio::test]
async fn upsert_with_missing_parent_names_the_parent() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;

    let err = storage.upsert(&e("/t;t/f;nofeed/r;r1")).await.unwrap_err();
    match err {
        InventoryError::NotFound { path } => assert_eq!(path, "/t;t/f;nofeed"),
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert_eq!(storage.store().count_all().await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_past_64_bit_labels_is_interval_overflow() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    storage.upsert(&e("/t;t/f;fd")).await.unwrap();

    // Stored ranks near u32::MAX push the next labels to the edge of i64
    let near_max = u32::MAX - 1;
    storage.ranks().initialize(vec![
        ChildSeed::new(p("/t;t"), None),
        ChildSeed::new(p("/t;t/f;fd"), Some(1)),
        ChildSeed::new(p("/t;t/f;fd/r;old"), Some(near_max)),
    ]);
    storage.upsert(&e("/t;t/f;fd/r;a")).await.unwrap();
    assert_eq!(row(&storage, "/t;t/f;fd/r;a").await.tree_path, vec![1, 1, u32::MAX]);

    storage.ranks().initialize(vec![
        ChildSeed::new(p("/t;t"), None),
        ChildSeed::new(p("/t;t/f;fd"), Some(1)),
        ChildSeed::new(p("/t;t/f;fd/r;old"), Some(near_max)),
        ChildSeed::new(p("/t;t/f;fd/r;a"), Some(u32::MAX)),
        ChildSeed::new(p("/t;t/f;fd/r;a/r;old"), Some(near_max)),
    ]);
    let parent = p("/t;t/f;fd/r;a");
    let before = storage.ranks().snapshot(&parent).unwrap();

    let err = storage.upsert(&e("/t;t/f;fd/r;a/r;b")).await.unwrap_err();
    match &err {
        InventoryError::IntervalOverflow { path, tree_path } => {
            assert_eq!(path, "/t;t/f;fd/r;a/r;b");
            assert_eq!(tree_path, &vec![1, 1, u32::MAX, u32::MAX]);
        }
        other => panic!("expected IntervalOverflow, got {other:?}"),
    }
    assert_eq!(err.kind(), "interval_overflow");
    assert!(storage.lookup(&p("/t;t/f;fd/r;a/r;b")).await.unwrap().is_none());

    // The rank is spent but no child slot is held for it
    let after = storage.ranks().snapshot(&parent).unwrap();
    assert_eq!(after.issued, before.issued + 1);
    assert_eq!(after.live, before.live);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn upsert_concurrent_siblings_get_unique_ranks() {
    let storage = Arc::new(InventoryStorage::in_memory());
    with_tenant(&storage, "t").await;
    storage.upsert(&e("/t;t/f;fd")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..64 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage.upsert(&e(&format!("/t;t/f;fd/r;r{i}"))).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), UpsertOutcome::Created);
    }

    let mut ranks = HashSet::new();
    let mut rows = Vec::new();
    for i in 0..64 {
        let r = row(&storage, &format!("/t;t/f;fd/r;r{i}")).await;
        assert!(ranks.insert(*r.tree_path.last().unwrap()));
        rows.push(r);
    }
    assert_eq!(ranks, (1..=64).collect::<HashSet<u32>>());

    for (i, a) in rows.iter().enumerate() {
        for b in &rows[i + 1..] {
            assert!(!a.interval.overlaps(&b.interval));
        }
    }
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn delete_missing_path_is_noop() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;

    assert_eq!(storage.delete(&p("/t;t/f;ghost")).await.unwrap(), 0);
    assert_eq!(storage.delete(&p("/t;nobody")).await.unwrap(), 0);
    assert_eq!(storage.store().count_all().await.unwrap(), 1);
}

#[tokio::test]
async fn delete_removes_subtree() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap();

    // r2 plus its two metrics
    assert_eq!(storage.delete(&p("/t;t/f;fd/r;r2")).await.unwrap(), 3);
    assert!(storage.lookup(&p("/t;t/f;fd/r;r2/m;m3")).await.unwrap().is_none());
    assert!(storage.lookup(&p("/t;t/f;fd/r;r1/m;m1")).await.unwrap().is_some());

    // fd plus its 4 remaining descendants
    assert_eq!(storage.delete(&p("/t;t/f;fd")).await.unwrap(), 5);
    assert_eq!(storage.store().count_all().await.unwrap(), 1);

    assert_eq!(storage.delete(&p("/t;t/f;fd")).await.unwrap(), 0);
}

#[tokio::test]
async fn delete_reaches_first_child_of_deep_wide_chain() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    storage.upsert(&e("/t;t/f;fd")).await.unwrap();

    // Seven levels of 100 siblings, always descending into the last one
    let mut parent = String::from("/t;t/f;fd");
    for level in 0..7 {
        for i in 0..100 {
            storage.upsert(&e(&format!("{parent}/r;l{level}c{i}"))).await.unwrap();
        }
        parent = format!("{parent}/r;l{level}c99");
    }
    let leaf = format!("{parent}/m;leaf");
    storage.upsert(&e(&leaf)).await.unwrap();

    // The leaf's bounds match its parent's once rounded to 28 digits
    let (parent_low, _) = row(&storage, &parent).await.decimal_bounds();
    let (leaf_low, _) = row(&storage, &leaf).await.decimal_bounds();
    assert_eq!(parent_low, leaf_low);

    assert_eq!(storage.delete(&p(&parent)).await.unwrap(), 2);
    assert!(storage.lookup(&p(&leaf)).await.unwrap().is_none());

    // fd plus the 699 chain nodes left
    assert_eq!(storage.delete(&p("/t;t/f;fd")).await.unwrap(), 700);
    assert_eq!(storage.store().count_all().await.unwrap(), 1);
}

#[tokio::test]
async fn delete_tenant_removes_every_partition() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    with_tenant(&storage, "u").await;
    storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap();
    storage.upsert(&e("/t;t/f;fd2")).await.unwrap();
    storage.upsert(&e("/t;t/rt;shared")).await.unwrap();
    storage.upsert(&e("/t;u/f;fd")).await.unwrap();

    // tenant + 8 under fd + fd2 + rt
    assert_eq!(storage.delete(&p("/t;t")).await.unwrap(), 11);
    assert_eq!(storage.store().count_all().await.unwrap(), 2);
    assert!(storage.lookup(&p("/t;u/f;fd")).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_releases_ranks_without_reuse() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;
    storage.upsert(&e("/t;t/f;fd")).await.unwrap();
    storage.upsert(&e("/t;t/f;fd/r;a")).await.unwrap();
    storage.upsert(&e("/t;t/f;fd/r;b")).await.unwrap();

    storage.delete(&p("/t;t/f;fd/r;b")).await.unwrap();
    let counter = storage.ranks().snapshot(&p("/t;t/f;fd")).unwrap();
    assert_eq!(counter.live, 1);
    assert_eq!(counter.issued, 2);

    storage.upsert(&e("/t;t/f;fd/r;c")).await.unwrap();
    assert_eq!(row(&storage, "/t;t/f;fd/r;c").await.tree_path, vec![1, 1, 3]);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn failure_lost_creation_race_is_conflicting_write() {
    let store = Arc::new(RacingStore {
        inner: InMemoryTreeStore::new(),
        contested: "/t;t/f;fd".into(),
    });
    let storage = storage_over(store);
    with_tenant(&storage, "t").await;

    let err = storage.upsert(&e("/t;t/f;fd")).await.unwrap_err();
    assert!(matches!(err, InventoryError::ConflictingWrite { ref path } if path == "/t;t/f;fd"));
    assert_eq!(err.kind(), "conflicting_write");

    // The winner's row is untouched and the losing rank is never reissued
    assert_eq!(row(&storage, "/t;t/f;fd").await.name.as_deref(), Some("winner"));
    let counter = storage.ranks().snapshot(&p("/t;t")).unwrap();
    assert_eq!(counter.live, 0);
    assert_eq!(counter.issued, 1);

    storage.upsert(&e("/t;t/f;fd2")).await.unwrap();
    assert_eq!(row(&storage, "/t;t/f;fd2").await.tree_path, vec![1, 2]);
}

#[tokio::test]
async fn failure_store_errors_propagate_from_every_operation() {
    let store = Arc::new(FlakyStore::new());
    let storage = storage_over(store.clone());
    with_tenant(&storage, "t").await;
    storage.upsert(&e("/t;t/f;fd")).await.unwrap();

    store.down.store(true, Ordering::SeqCst);

    let is_backend = |err: InventoryError| matches!(err, InventoryError::Storage(StorageError::Backend(_)));
    assert!(is_backend(storage.lookup(&p("/t;t/f;fd")).await.unwrap_err()));
    assert!(is_backend(storage.upsert(&e("/t;t/f;fd/r;r1")).await.unwrap_err()));
    assert!(is_backend(storage.delete(&p("/t;t/f;fd")).await.unwrap_err()));
    assert!(is_backend(storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap_err()));
    assert!(is_backend(storage.initialize_ranks().await.unwrap_err()));

    store.down.store(false, Ordering::SeqCst);
    assert!(storage.lookup(&p("/t;t/f;fd")).await.unwrap().is_some());
}

#[tokio::test]
async fn failure_in_one_subtree_reports_partial_sync() {
    let store = Arc::new(FlakyStore {
        poisoned: Some("/t;t/f;fd/r;r1".into()),
        ..FlakyStore::new()
    });
    let storage = storage_over(store);
    with_tenant(&storage, "t").await;

    let err = storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap_err();
    match err {
        InventoryError::PartialSync { failed, skipped, first } => {
            assert_eq!(failed, 1);
            assert_eq!(skipped, 1);
            assert!(matches!(*first, InventoryError::Storage(_)));
        }
        other => panic!("expected PartialSync, got {other:?}"),
    }

    assert!(storage.lookup(&p("/t;t/f;fd/r;r1")).await.unwrap().is_none());
    assert!(storage.lookup(&p("/t;t/f;fd/r;r1/m;m1")).await.unwrap().is_none());
    for ok in ["/t;t/f;fd/r;r2/m;m2", "/t;t/f;fd/r;r2/m;m3", "/t;t/f;fd/rt;rt1", "/t;t/f;fd/mt;mt1"] {
        assert!(storage.lookup(&p(ok)).await.unwrap().is_some(), "{ok} missing");
    }
}

#[tokio::test]
async fn failure_descendant_delete_still_removes_the_rest() {
    let store = Arc::new(FlakyStore {
        undeletable: Some("/t;t/f;fd/r;r2".into()),
        ..FlakyStore::new()
    });
    let storage = InventoryStorage::with_backends(
        store,
        Arc::new(InMemoryRankCache::new()),
        InventoryConfig { sync_concurrency: 1, ..Default::default() },
    );
    with_tenant(&storage, "t").await;
    storage.upsert(&e("/t;t/f;fd")).await.unwrap();
    let ids = ["r1", "r2", "r3", "r4", "r5", "r6"];
    for id in ids {
        storage.upsert(&e(&format!("/t;t/f;fd/r;{id}"))).await.unwrap();
    }

    let err = storage.delete(&p("/t;t/f;fd")).await.unwrap_err();
    assert!(matches!(err, InventoryError::Storage(StorageError::Backend(_))));

    for id in ids {
        let present = storage.lookup(&p(&format!("/t;t/f;fd/r;{id}"))).await.unwrap().is_some();
        assert_eq!(present, id == "r2", "r;{id}");
    }
    assert!(storage.lookup(&p("/t;t/f;fd")).await.unwrap().is_some());
    assert_eq!(storage.store().count_all().await.unwrap(), 3);

    let counter = storage.ranks().snapshot(&p("/t;t/f;fd")).unwrap();
    assert_eq!(counter.live, 1);
    assert_eq!(counter.issued, 6);
}

#[test]
fn failure_partial_sync_still_records_applied_counts() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let store = Arc::new(FlakyStore {
                poisoned: Some("/t;t/f;fd/r;r1".into()),
                ..FlakyStore::new()
            });
            let storage = storage_over(store);
            with_tenant(&storage, "t").await;

            let err = storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap_err();
            assert!(matches!(err, InventoryError::PartialSync { failed: 1, .. }));
        });
    });

    let counters: Vec<(String, u64)> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(key, _, _, value)| match value {
            DebugValue::Counter(v) => Some((key.key().name().to_string(), v)),
            _ => None,
        })
        .collect();
    let counter = |name: &str| -> u64 { counters.iter().filter(|(n, _)| n == name).map(|(_, v)| *v).sum() };

    // fd, r2 with both metrics, rt1 and mt1; r1 failed and m1 was skipped
    assert_eq!(counter("inventory_sync_upserted_total"), 6);
    assert_eq!(counter("inventory_sync_deleted_total"), 0);
    assert_eq!(counter("inventory_sync_failed_total"), 1);
}

#[tokio::test]
async fn failure_sync_rejects_mismatched_root() {
    let storage = InventoryStorage::in_memory();
    with_tenant(&storage, "t").await;

    let err = storage.sync(&p("/t;t/f;other"), &full_structure()).await.unwrap_err();
    assert!(matches!(
        err,
        InventoryError::RootMismatch { ref expected, ref actual }
            if expected == "/t;t/f;other" && actual == "/t;t/f;fd"
    ));
    assert_eq!(storage.store().count_all().await.unwrap(), 1);
}

#[tokio::test]
async fn failure_sync_rejects_tenant_root() {
    let storage = InventoryStorage::in_memory();
    let tenant = InventoryStructure::of(e("/t;t")).build().unwrap();

    let err = storage.sync(&p("/t;t"), &tenant).await.unwrap_err();
    assert!(matches!(err, InventoryError::NotSyncable { .. }));
    assert_eq!(err.kind(), "not_syncable");
}

#[tokio::test]
async fn failure_sync_root_without_parent_is_not_found() {
    let storage = InventoryStorage::in_memory();
    let err = storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap_err();
    assert!(matches!(err, InventoryError::NotFound { ref path } if path == "/t;t"));
}

// =============================================================================
// Restart
// =============================================================================

#[tokio::test]
async fn restart_never_reissues_surviving_rank() {
    let store: Arc<dyn TreeStore> = Arc::new(InMemoryTreeStore::new());
    let first = storage_over(Arc::clone(&store));
    with_tenant(&first, "t").await;
    first.upsert(&e("/t;t/f;fd")).await.unwrap();
    for id in ["a", "b", "c"] {
        first.upsert(&e(&format!("/t;t/f;fd/r;{id}"))).await.unwrap();
    }
    first.delete(&p("/t;t/f;fd/r;b")).await.unwrap();

    let second = InventoryStorage::with_backends(
        store,
        Arc::new(InMemoryRankCache::new()),
        InventoryConfig { page_size: 2, ..Default::default() },
    );
    assert_eq!(second.initialize_ranks().await.unwrap(), 4);

    second.upsert(&e("/t;t/f;fd/r;d")).await.unwrap();
    assert_eq!(row(&second, "/t;t/f;fd/r;d").await.tree_path, vec![1, 1, 4]);

    second.upsert(&e("/t;t/f;fd2")).await.unwrap();
    assert_eq!(row(&second, "/t;t/f;fd2").await.tree_path, vec![1, 2]);
}

// =============================================================================
// SQLite
// =============================================================================

fn sqlite_config(dir: &TempDir) -> InventoryConfig {
    InventoryConfig {
        sql_url: Some(format!("sqlite://{}?mode=rwc", dir.path().join("inventory.db").display())),
        max_connections: 2,
        sync_concurrency: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn sqlite_sync_prune_and_delete() {
    let dir = TempDir::new().unwrap();
    let storage = InventoryStorage::open(sqlite_config(&dir)).await.unwrap();
    with_tenant(&storage, "t").await;

    let report = storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap();
    assert_eq!(report.created, 8);
    assert_nested(&storage, &full_structure()).await;

    let report = storage.sync(&p("/t;t/f;fd"), &pruned_structure()).await.unwrap();
    assert_eq!(report.deleted, 3);

    assert_eq!(storage.delete(&p("/t;t/f;fd")).await.unwrap(), 5);
    assert_eq!(storage.store().count_all().await.unwrap(), 1);
}

#[tokio::test]
async fn sqlite_reopen_seeds_ranks() {
    let dir = TempDir::new().unwrap();
    {
        let storage = InventoryStorage::open(sqlite_config(&dir)).await.unwrap();
        with_tenant(&storage, "t").await;
        storage.sync(&p("/t;t/f;fd"), &full_structure()).await.unwrap();
    }

    let reopened = InventoryStorage::open(sqlite_config(&dir)).await.unwrap();
    let counter = reopened.ranks().snapshot(&p("/t;t/f;fd")).unwrap();
    assert_eq!(counter.live, 4);
    assert_eq!(counter.issued, 4);

    reopened.upsert(&e("/t;t/f;fd/r;r3")).await.unwrap();
    assert_eq!(row(&reopened, "/t;t/f;fd/r;r3").await.tree_path, vec![1, 1, 5]);
}
