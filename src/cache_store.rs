use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::models::{CacheEntry, CacheRow, ProductName};
use crate::Result;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS products (
        barcode TEXT PRIMARY KEY,
        product_name TEXT,
        image_url TEXT,
        image_filepath TEXT
    )
"#;

/// Persistent barcode -> lookup result store, consulted before any fetch.
///
/// `get` and `put` never fail: a read error is a cold cache and a lost write
/// only costs a future re-fetch. The `try_*` methods are for maintenance
/// tools and surface errors.
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        info!(database = %config.database_url, "Cache store ready");

        Ok(Self { pool })
    }

    pub async fn get(&self, barcode: &str) -> Option<CacheEntry> {
        match self.try_get(barcode).await {
            Ok(entry) => {
                debug!(barcode, hit = entry.is_some(), "Cache lookup");
                entry
            }
            Err(e) => {
                warn!(barcode, error = %e, "Cache read failed, treating as absent");
                None
            }
        }
    }

    pub async fn put(&self, entry: &CacheEntry) {
        match self.try_put(entry).await {
            Ok(()) => debug!(barcode = %entry.barcode, "Cache entry stored"),
            Err(e) => warn!(barcode = %entry.barcode, error = %e, "Cache write failed"),
        }
    }

    pub async fn try_get(&self, barcode: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT barcode, product_name, image_url, image_filepath FROM products WHERE barcode = ?",
        )
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CacheEntry::from))
    }

    pub async fn try_put(&self, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO products (barcode, product_name, image_url, image_filepath) VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.barcode)
        .bind(entry.product_name.as_ref().map(ProductName::to_stored))
        .bind(&entry.image_url)
        .bind(&entry.image_filepath)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query_as::<_, CacheRow>(
            "SELECT barcode, product_name, image_url, image_filepath FROM products ORDER BY barcode",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CacheEntry::from).collect())
    }

    /// Entries whose name is a sentinel, ordered by stored mark then barcode.
    pub async fn sentinels(&self) -> Result<Vec<CacheEntry>> {
        let mut entries: Vec<CacheEntry> = self
            .all()
            .await?
            .into_iter()
            .filter(|e| e.product_name.as_ref().is_some_and(ProductName::is_sentinel))
            .collect();

        entries.sort_by_key(|e| {
            (
                e.product_name.as_ref().map(ProductName::to_stored),
                e.barcode.clone(),
            )
        });
        Ok(entries)
    }

    /// Deletes the given barcodes; returns how many rows went away.
    pub async fn delete(&self, barcodes: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for barcode in barcodes {
            deleted += sqlx::query("DELETE FROM products WHERE barcode = ?")
                .bind(barcode)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }

    /// Moves an entry to a new barcode key. Fails if the target key exists.
    pub async fn rekey(&self, from: &str, to: &str) -> Result<()> {
        sqlx::query("UPDATE products SET barcode = ? WHERE barcode = ?")
            .bind(to)
            .bind(from)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
