// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend (SQLite or MySQL through the sqlx `Any` driver).
//!
//! ```sql
//! CREATE TABLE entity_tree (
//!   tenant_id   VARCHAR(64),
//!   feed_id     VARCHAR(64),     -- '<TENANT>' outside feeds
//!   entity_type VARCHAR(8),
//!   entity_path VARCHAR(512),
//!   name        TEXT,
//!   properties  LONGTEXT,        -- JSON object as text
//!   low         VARCHAR(32),     -- fixed-width decimal, 28 fractional digits
//!   high        VARCHAR(32),
//!   low_num BIGINT, low_den BIGINT, high_num BIGINT, high_den BIGINT,
//!   tree_path   TEXT,            -- JSON array as text
//!   depth       BIGINT,
//!   PRIMARY KEY (tenant_id, feed_id, entity_type, entity_path)
//! )
//! ```
//!
//! ## Decimal bounds as text
//!
//! Every bound lies in `[0, 1]`, so formatting it with exactly 28 fractional
//! digits gives strings of equal width whose lexicographic order equals
//! numeric order. Range scans compare them as plain text on both backends.
//! The exact numerator/denominator columns are the source of truth on read.
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver reports MySQL TEXT columns as BLOB, so text columns are
//! read as `String` first and as UTF-8 bytes second. Only `i64` and `String`
//! values are bound.

use std::sync::Once;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

use super::traits::{EntityRow, PathEntry, RowKey, ScanScope, StorageError, TreeStore};
use crate::config::InventoryConfig;
use crate::entity::Properties;
use crate::labeling::{Interval, Rational};
use crate::metrics;
use crate::path::CanonicalPath;
use crate::resilience::retry::{retry_if, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const CONFIG_ID: &str = "org.inventory";
const COLUMNS: &str = "tenant_id, feed_id, entity_type, entity_path, name, properties, \
                       low, high, low_num, low_den, high_num, high_den, tree_path, depth";

/// Fixed-width text form of a decimal bound.
#[must_use]
pub fn decimal_text(value: Decimal) -> String {
    format!("{:.28}", value)
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Errors worth retrying: the statement may succeed once the connection does.
fn is_transient(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Protocol(_)
    )
}

fn text_column(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

fn corrupt(key: &str, reason: impl Into<String>) -> StorageError {
    StorageError::Corruption {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn required_text(row: &AnyRow, column: &str, key: &str) -> Result<String, StorageError> {
    text_column(row, column).ok_or_else(|| corrupt(key, format!("missing or unreadable column '{}'", column)))
}

fn required_i64(row: &AnyRow, column: &str, key: &str) -> Result<i64, StorageError> {
    row.try_get::<i64, _>(column)
        .map_err(|e| corrupt(key, format!("column '{}': {}", column, e)))
}

fn key_from_row(row: &AnyRow) -> Result<RowKey, StorageError> {
    let entity_path = text_column(row, "entity_path")
        .ok_or_else(|| corrupt("<unknown>", "missing entity_path"))?;
    Ok(RowKey {
        tenant_id: required_text(row, "tenant_id", &entity_path)?,
        feed_id: required_text(row, "feed_id", &entity_path)?,
        entity_type: required_text(row, "entity_type", &entity_path)?,
        entity_path,
    })
}

fn parse_tree_path(raw: &str, key: &str) -> Result<Vec<u32>, StorageError> {
    serde_json::from_str(raw).map_err(|e| corrupt(key, format!("tree_path: {}", e)))
}

fn entity_row_from(row: &AnyRow) -> Result<EntityRow, StorageError> {
    let key = key_from_row(row)?;
    let k = key.entity_path.as_str();

    let path = CanonicalPath::parse(k).map_err(|e| corrupt(k, e.to_string()))?;
    let properties: Properties = serde_json::from_str(&required_text(row, "properties", k)?)
        .map_err(|e| corrupt(k, format!("properties: {}", e)))?;
    let tree_path = parse_tree_path(&required_text(row, "tree_path", k)?, k)?;

    let low = Rational::new(required_i64(row, "low_num", k)?, required_i64(row, "low_den", k)?)
        .ok_or_else(|| corrupt(k, "non-positive low denominator"))?;
    let high = Rational::new(required_i64(row, "high_num", k)?, required_i64(row, "high_den", k)?)
        .ok_or_else(|| corrupt(k, "non-positive high denominator"))?;
    let depth = u32::try_from(required_i64(row, "depth", k)?)
        .map_err(|_| corrupt(k, "depth out of range"))?;

    Ok(EntityRow {
        path,
        name: text_column(row, "name"),
        properties,
        interval: Interval { low, high },
        tree_path,
        depth,
    })
}

pub struct SqlTreeStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlTreeStore {
    /// Connect with default pool settings, failing fast if the store is unreachable.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_config(connection_string, &InventoryConfig::default()).await
    }

    /// Connect using the pool settings of `config`, then create the schema.
    pub async fn with_config(connection_string: &str, config: &InventoryConfig) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");
        let connect_retry = if config.wait_for_store {
            RetryConfig::forever()
        } else {
            RetryConfig::startup()
        };

        let pool = retry_if(
            "sql_connect",
            &connect_retry,
            || async {
                AnyPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(config.acquire_timeout())
                    .idle_timeout(config.idle_timeout())
                    .connect(connection_string)
                    .await
            },
            |e| !matches!(e, sqlx::Error::Configuration(_)),
        )
        .await
        .map_err(|e| {
            metrics::record_connection_error("sql");
            backend(e)
        })?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }
        store.init_schema().await?;
        store.write_version().await?;

        info!(backend = if is_sqlite { "sqlite" } else { "mysql" }, "SQL tree store ready");
        Ok(store)
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;
        Ok(())
    }

    fn schema_statements(&self) -> &'static [&'static str] {
        if self.is_sqlite {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS entity_tree (
                    tenant_id TEXT NOT NULL,
                    feed_id TEXT NOT NULL,
                    entity_type TEXT NOT NULL,
                    entity_path TEXT NOT NULL,
                    name TEXT,
                    properties TEXT NOT NULL,
                    low TEXT NOT NULL,
                    high TEXT NOT NULL,
                    low_num INTEGER NOT NULL,
                    low_den INTEGER NOT NULL,
                    high_num INTEGER NOT NULL,
                    high_den INTEGER NOT NULL,
                    tree_path TEXT NOT NULL,
                    depth INTEGER NOT NULL,
                    PRIMARY KEY (tenant_id, feed_id, entity_type, entity_path)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_entity_tree_scope_low ON entity_tree (tenant_id, feed_id, low)",
                r#"
                CREATE TABLE IF NOT EXISTS sys_config (
                    config_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    value TEXT,
                    PRIMARY KEY (config_id, name)
                )
                "#,
            ]
        } else {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS entity_tree (
                    tenant_id VARCHAR(64) NOT NULL,
                    feed_id VARCHAR(64) NOT NULL,
                    entity_type VARCHAR(8) NOT NULL,
                    entity_path VARCHAR(512) NOT NULL,
                    name TEXT,
                    properties LONGTEXT NOT NULL,
                    low VARCHAR(32) NOT NULL,
                    high VARCHAR(32) NOT NULL,
                    low_num BIGINT NOT NULL,
                    low_den BIGINT NOT NULL,
                    high_num BIGINT NOT NULL,
                    high_den BIGINT NOT NULL,
                    tree_path TEXT NOT NULL,
                    depth BIGINT NOT NULL,
                    PRIMARY KEY (tenant_id, feed_id, entity_type, entity_path),
                    INDEX idx_entity_tree_scope_low (tenant_id, feed_id, low)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sys_config (
                    config_id VARCHAR(64) NOT NULL,
                    name VARCHAR(64) NOT NULL,
                    value TEXT,
                    PRIMARY KEY (config_id, name)
                )
                "#,
            ]
        }
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for sql in self.schema_statements() {
            retry_if(
                "sql_init_schema",
                &RetryConfig::startup(),
                || async { sqlx::query(sql).execute(&self.pool).await },
                is_transient,
            )
            .await
            .map_err(backend)?;
        }
        Ok(())
    }

    async fn write_version(&self) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO sys_config (config_id, name, value) VALUES (?, 'version', ?) \
             ON CONFLICT(config_id, name) DO UPDATE SET value = excluded.value"
        } else {
            "INSERT INTO sys_config (config_id, name, value) VALUES (?, 'version', ?) \
             ON DUPLICATE KEY UPDATE value = VALUES(value)"
        };
        sqlx::query(sql)
            .bind(CONFIG_ID)
            .bind(env!("CARGO_PKG_VERSION"))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    /// Engine version recorded in `sys_config` when the store was opened.
    pub async fn stored_version(&self) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM sys_config WHERE config_id = ? AND name = 'version'")
            .bind(CONFIG_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.and_then(|r| text_column(&r, "value")))
    }

    /// Run a read-only statement with query-mode retry.
    async fn read<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        retry_if(operation_name, &RetryConfig::query(), operation, is_transient)
            .await
            .map_err(backend)
    }
}

#[async_trait]
impl TreeStore for SqlTreeStore {
    async fn get(&self, key: &RowKey) -> Result<Option<EntityRow>, StorageError> {
        let sql = format!(
            "SELECT {} FROM entity_tree \
             WHERE tenant_id = ? AND feed_id = ? AND entity_type = ? AND entity_path = ?",
            COLUMNS
        );

        let row = self
            .read("sql_get", || async {
                sqlx::query(&sql)
                    .bind(&key.tenant_id)
                    .bind(&key.feed_id)
                    .bind(&key.entity_type)
                    .bind(&key.entity_path)
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;

        row.as_ref().map(entity_row_from).transpose()
    }

    async fn insert_if_absent(&self, row: &EntityRow) -> Result<bool, StorageError> {
        let sql = if self.is_sqlite {
            format!(
                "INSERT INTO entity_tree ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT DO NOTHING",
                COLUMNS
            )
        } else {
            format!(
                "INSERT IGNORE INTO entity_tree ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                COLUMNS
            )
        };

        let key = row.key();
        let (low, high) = row.decimal_bounds();
        let properties = serde_json::to_string(&row.properties)
            .map_err(|e| StorageError::Backend(format!("properties: {}", e)))?;
        let tree_path = serde_json::to_string(&row.tree_path)
            .map_err(|e| StorageError::Backend(format!("tree_path: {}", e)))?;

        let result = sqlx::query(&sql)
            .bind(&key.tenant_id)
            .bind(&key.feed_id)
            .bind(&key.entity_type)
            .bind(&key.entity_path)
            .bind(&row.name)
            .bind(properties)
            .bind(decimal_text(low))
            .bind(decimal_text(high))
            .bind(row.interval.low.numerator())
            .bind(row.interval.low.denominator())
            .bind(row.interval.high.numerator())
            .bind(row.interval.high.denominator())
            .bind(tree_path)
            .bind(i64::from(row.depth))
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        let applied = result.rows_affected() == 1;
        debug!(path = %key.entity_path, applied, "Conditional insert");
        Ok(applied)
    }

    async fn update_if_exists(
        &self,
        key: &RowKey,
        name: Option<&str>,
        properties: &Properties,
    ) -> Result<bool, StorageError> {
        let properties = serde_json::to_string(properties)
            .map_err(|e| StorageError::Backend(format!("properties: {}", e)))?;

        // MySQL reports matched (not changed) rows: sqlx connects with CLIENT_FOUND_ROWS.
        let result = sqlx::query(
            "UPDATE entity_tree SET name = ?, properties = ? \
             WHERE tenant_id = ? AND feed_id = ? AND entity_type = ? AND entity_path = ?",
        )
        .bind(name.map(str::to_string))
        .bind(properties)
        .bind(&key.tenant_id)
        .bind(&key.feed_id)
        .bind(&key.entity_type)
        .bind(&key.entity_path)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, key: &RowKey) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM entity_tree \
             WHERE tenant_id = ? AND feed_id = ? AND entity_type = ? AND entity_path = ?",
        )
        .bind(&key.tenant_id)
        .bind(&key.feed_id)
        .bind(&key.entity_type)
        .bind(&key.entity_path)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn scan_descendant_keys(
        &self,
        scope: &ScanScope,
        low_bound: Decimal,
        high_bound: Decimal,
    ) -> Result<Vec<RowKey>, StorageError> {
        let low = decimal_text(low_bound);
        let high = decimal_text(high_bound);

        let rows = self
            .read("sql_scan_descendants", || async {
                match scope {
                    ScanScope::Partition { tenant_id, feed_id } => {
                        sqlx::query(
                            "SELECT tenant_id, feed_id, entity_type, entity_path FROM entity_tree \
                             WHERE tenant_id = ? AND feed_id = ? AND low >= ? AND high <= ?",
                        )
                        .bind(tenant_id)
                        .bind(feed_id)
                        .bind(&low)
                        .bind(&high)
                        .fetch_all(&self.pool)
                        .await
                    }
                    ScanScope::Tenant { tenant_id } => {
                        sqlx::query(
                            "SELECT tenant_id, feed_id, entity_type, entity_path FROM entity_tree \
                             WHERE tenant_id = ? AND low >= ? AND high <= ?",
                        )
                        .bind(tenant_id)
                        .bind(&low)
                        .bind(&high)
                        .fetch_all(&self.pool)
                        .await
                    }
                }
            })
            .await?;

        rows.iter().map(key_from_row).collect()
    }

    async fn scan_paths(&self, offset: u64, limit: usize) -> Result<Vec<PathEntry>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let rows = self
            .read("sql_scan_paths", || async {
                sqlx::query(
                    "SELECT tenant_id, feed_id, entity_type, entity_path, tree_path FROM entity_tree \
                     ORDER BY tenant_id, feed_id, entity_type, entity_path LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            })
            .await?;

        rows.iter()
            .map(|row| {
                let key = key_from_row(row)?;
                let raw = required_text(row, "tree_path", &key.entity_path)?;
                let tree_path = parse_tree_path(&raw, &key.entity_path)?;
                Ok(PathEntry { key, tree_path })
            })
            .collect()
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        let row = self
            .read("sql_count", || async {
                sqlx::query("SELECT COUNT(*) as cnt FROM entity_tree")
                    .fetch_one(&self.pool)
                    .await
            })
            .await?;

        let count: i64 = row.try_get("cnt").map_err(backend)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
