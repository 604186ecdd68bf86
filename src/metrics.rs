// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the inventory tree.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding service is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `inventory_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: lookup, upsert, delete, sync
//! - `status`: success, error
//! - `outcome`: created, updated (upserts only)

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a completed tree operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "inventory_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "inventory_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record whether an upsert created a row or updated an existing one
pub fn record_upsert(outcome: &str) {
    counter!(
        "inventory_upserts_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a sibling rank handed out by the rank cache
pub fn record_rank_allocated() {
    counter!("inventory_ranks_allocated_total").increment(1);
}

/// Set number of parents tracked by the rank cache
pub fn set_rank_cache_parents(count: usize) {
    gauge!("inventory_rank_cache_parents").set(count as f64);
}

/// Record rows removed by delete or sync pruning
pub fn record_rows_deleted(count: usize) {
    counter!("inventory_rows_deleted_total").increment(count as u64);
}

/// Record the outcome of one sync call
pub fn record_sync(upserted: usize, deleted: usize, failed: usize) {
    histogram!("inventory_sync_entities").record(upserted as f64);
    counter!("inventory_sync_upserted_total").increment(upserted as u64);
    counter!("inventory_sync_deleted_total").increment(deleted as u64);
    if failed > 0 {
        counter!("inventory_sync_failed_total").increment(failed as u64);
    }
}

/// Record an error with category for alerting
pub fn record_error(operation: &str, error_type: &str) {
    counter!(
        "inventory_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a backend connection failure
pub fn record_connection_error(backend: &str) {
    counter!(
        "inventory_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record rank cache seeding time and row count
pub fn record_rank_cache_seed(rows: usize, duration: Duration) {
    histogram!("inventory_rank_cache_seed_seconds").record(duration.as_secs_f64());
    gauge!("inventory_rank_cache_seed_rows").set(rows as f64);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
