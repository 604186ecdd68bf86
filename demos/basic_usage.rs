// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic inventory-tree usage example.
//!
//! Demonstrates:
//! 1. Opening storage (in memory, or SQL when `INVENTORY_SQL_URL` is set)
//! 2. Auto-creating a tenant
//! 3. Syncing a feed structure, then re-syncing a smaller one
//! 4. Looking entities up and showing their interval labels
//! 5. Cascading delete
//! 6. Displaying the recorded metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! INVENTORY_SQL_URL="sqlite://demo.db?mode=rwc" cargo run --example basic_usage
//! ```

use inventory_tree::{
    CanonicalPath, Entity, InventoryConfig, InventoryStorage, InventoryStructure, SegmentType, StructureLevel,
    TenantRegistry,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           inventory-tree: Basic Usage Example                 ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Open storage
    // ─────────────────────────────────────────────────────────────────────────
    let config = InventoryConfig::from_env();
    println!("📦 Backend: {}", config.sql_url.as_deref().unwrap_or("memory"));
    let storage = InventoryStorage::open(config).await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Tenant
    // ─────────────────────────────────────────────────────────────────────────
    let tenants = TenantRegistry::new();
    tenants.ensure(&storage, "acme").await?;
    println!("🏢 Tenant 'acme' ready");

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Sync a feed
    // ─────────────────────────────────────────────────────────────────────────
    let feed = CanonicalPath::tenant("acme")?.extend(SegmentType::Feed, "host-1")?;
    let jvm = feed.extend(SegmentType::Resource, "jvm")?;
    let db = feed.extend(SegmentType::Resource, "db")?;

    let structure = InventoryStructure::of(Entity::at(feed.clone()).with_name("Host 1"))
        .start_child(Entity::at(jvm.clone()).with_name("JVM"))
            .add_child(Entity::at(jvm.extend(SegmentType::Metric, "heap")?))
            .add_child(Entity::at(jvm.extend(SegmentType::Metric, "gc-time")?))
        .end()
        .start_child(Entity::at(db.clone()).with_property("engine", "postgres"))
            .add_child(Entity::at(db.extend(SegmentType::Metric, "connections")?))
        .end()
        .add_child(Entity::at(feed.extend(SegmentType::ResourceType, "app-server")?))
        .build()?;

    let report = storage.sync(&feed, &structure).await?;
    println!(
        "\n🔄 First sync: upserted={} created={} deleted={}",
        report.upserted, report.created, report.deleted
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Lookups
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Stored labels:");
    for path in [&feed, &jvm, &db] {
        if let Some(row) = storage.lookup_row(path).await? {
            println!("   └─ {} tree_path={:?} interval={}", row.path, row.tree_path, row.interval);
        }
    }

    let smaller = InventoryStructure::of(Entity::at(feed.clone()).with_name("Host 1"))
        .add_child(Entity::at(jvm.clone()).with_name("JVM"))
        .build()?;
    let report = storage.sync(&feed, &smaller).await?;
    println!(
        "\n🔄 Second sync: upserted={} created={} deleted={}",
        report.upserted, report.created, report.deleted
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Delete
    // ─────────────────────────────────────────────────────────────────────────
    let removed = storage.delete(&feed).await?;
    println!("\n🗑️  Deleted feed subtree: {} rows", removed);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Print counters and gauges, and a sample count per histogram.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();
    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => v.to_string(),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => format!("{} samples", samples.len()),
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }
    lines.sort();

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
