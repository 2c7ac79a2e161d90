//! Data file statistics.
//!
//! Row counts per table, the covered date range, the schema version and
//! the recognition cache size. Used by `ffm stats` to confirm that imports
//! and rebuilds landed where expected.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::migrate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub schema_version: i64,
    pub items: i64,
    pub active_items: i64,
    pub hourly_facts: i64,
    pub hourly_customer_rows: i64,
    pub daily_product_rows: i64,
    pub daily_customer_rows: i64,
    pub cache_entries: i64,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    /// Unix seconds of the newest cache entry.
    pub last_cache_write: Option<i64>,
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<StoreStats> {
    let range = sqlx::query(
        r#"
        SELECT MIN(date) AS first_date, MAX(date) AS last_date FROM (
            SELECT date FROM fact_hourly_long
            UNION ALL
            SELECT date FROM fact_hourly_customer
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    let last_cache_write: Option<i64> =
        sqlx::query_scalar("SELECT MAX(created_at) FROM recognition_cache")
            .fetch_one(pool)
            .await?;

    Ok(StoreStats {
        schema_version: migrate::current_version(pool).await?,
        items: count(pool, "SELECT COUNT(*) FROM items").await?,
        active_items: count(pool, "SELECT COUNT(*) FROM items WHERE is_active = 1").await?,
        hourly_facts: count(pool, "SELECT COUNT(*) FROM fact_hourly_long").await?,
        hourly_customer_rows: count(pool, "SELECT COUNT(*) FROM fact_hourly_customer").await?,
        daily_product_rows: count(pool, "SELECT COUNT(*) FROM fact_daily").await?,
        daily_customer_rows: count(pool, "SELECT COUNT(*) FROM fact_daily_customer").await?,
        cache_entries: count(pool, "SELECT COUNT(*) FROM recognition_cache").await?,
        first_date: range.try_get("first_date")?,
        last_date: range.try_get("last_date")?,
        last_cache_write,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> anyhow::Result<()> {
    let pool = db::open(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("FFM Ledger Database Stats");
    println!("=========================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!("  Size:            {}", format_bytes(db_size));
    println!("  Schema version:  {}", stats.schema_version);
    println!();
    println!("  Items:           {} ({} active)", stats.items, stats.active_items);
    println!("  Hourly facts:    {}", stats.hourly_facts);
    println!("  Customer hours:  {}", stats.hourly_customer_rows);
    println!("  Daily products:  {}", stats.daily_product_rows);
    println!("  Daily customers: {}", stats.daily_customer_rows);
    match (&stats.first_date, &stats.last_date) {
        (Some(first), Some(last)) => println!("  Dates:           {} .. {}", first, last),
        _ => println!("  Dates:           none"),
    }
    println!();
    println!(
        "  Cache entries:   {} (last write: {})",
        stats.cache_entries,
        stats
            .last_cache_write
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative age of a Unix timestamp, falling back to a date for old or future values.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    match delta {
        d if d < 0 => format_ts_iso(ts),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => plural(d / 60, "min"),
        d if d < 86400 => plural(d / 3600, "hour"),
        d if d < 86400 * 30 => plural(d / 86400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_relative_time() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
