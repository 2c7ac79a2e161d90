//! Daily rollup engine.
//!
//! Summaries in `fact_daily` and `fact_daily_customer` are a pure function
//! of the hourly facts. A rebuild deletes the summary rows in scope and
//! re-inserts them from one aggregation query, inside a single transaction,
//! so running it any number of times yields the same rows. Flows are summed;
//! `stock_end` is the stock reading at the highest recorded hour, 0 if none.
//!
//! A failed rebuild rolls back and leaves the hourly facts untouched. The
//! previous summary rows remain and are stale until the next rebuild.

use std::fmt;

use anyhow::Context;
use chrono::NaiveDate;
use ffm_core::date::{format_date, parse_date};
use sqlx::sqlite::SqlitePool;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildScope {
    Date(NaiveDate),
    All,
}

impl fmt::Display for RebuildScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildScope::Date(date) => f.write_str(&format_date(*date)),
            RebuildScope::All => f.write_str("all dates"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub scope: RebuildScope,
    pub product_rows: u64,
    pub customer_rows: u64,
}

const PRODUCT_ROLLUP_FOR_DATE: &str = r#"
    INSERT INTO fact_daily (date, item_id, prepared, sold, discarded, stock_end)
    SELECT
        h.date,
        h.item_id,
        SUM(CASE WHEN h.metric = 'prepared'  THEN h.value ELSE 0 END),
        SUM(CASE WHEN h.metric = 'sold'      THEN h.value ELSE 0 END),
        SUM(CASE WHEN h.metric = 'discarded' THEN h.value ELSE 0 END),
        COALESCE((
            SELECT s.value
            FROM fact_hourly_long s
            WHERE s.date = h.date AND s.item_id = h.item_id AND s.metric = 'stock'
            ORDER BY s.hour DESC
            LIMIT 1
        ), 0)
    FROM fact_hourly_long h
    WHERE h.date = ?
    GROUP BY h.date, h.item_id
"#;

const PRODUCT_ROLLUP_ALL: &str = r#"
    INSERT INTO fact_daily (date, item_id, prepared, sold, discarded, stock_end)
    SELECT
        h.date,
        h.item_id,
        SUM(CASE WHEN h.metric = 'prepared'  THEN h.value ELSE 0 END),
        SUM(CASE WHEN h.metric = 'sold'      THEN h.value ELSE 0 END),
        SUM(CASE WHEN h.metric = 'discarded' THEN h.value ELSE 0 END),
        COALESCE((
            SELECT s.value
            FROM fact_hourly_long s
            WHERE s.date = h.date AND s.item_id = h.item_id AND s.metric = 'stock'
            ORDER BY s.hour DESC
            LIMIT 1
        ), 0)
    FROM fact_hourly_long h
    GROUP BY h.date, h.item_id
"#;

/// Recompute both summaries for one date.
///
/// The customer row is always written, with 0 when the date has no hourly
/// customer counts.
pub async fn rebuild_daily_for_date(pool: &SqlitePool, date: NaiveDate) -> Result<RebuildReport> {
    report(RebuildScope::Date(date), rebuild_date_tx(pool, date).await)
}

/// Recompute every summary row from the full hourly history.
pub async fn rebuild_daily_all(pool: &SqlitePool) -> Result<RebuildReport> {
    report(RebuildScope::All, rebuild_all_tx(pool).await)
}

async fn rebuild_date_tx(pool: &SqlitePool, date: NaiveDate) -> sqlx::Result<(u64, u64)> {
    let mut tx = pool.begin().await?;
    match rebuild_date(&mut tx, date).await {
        Ok(counts) => {
            tx.commit().await?;
            Ok(counts)
        }
        Err(err) => {
            tx.rollback().await?;
            Err(err)
        }
    }
}

async fn rebuild_all_tx(pool: &SqlitePool) -> sqlx::Result<(u64, u64)> {
    let mut tx = pool.begin().await?;
    match rebuild_all(&mut tx).await {
        Ok(counts) => {
            tx.commit().await?;
            Ok(counts)
        }
        Err(err) => {
            tx.rollback().await?;
            Err(err)
        }
    }
}

fn report(scope: RebuildScope, result: sqlx::Result<(u64, u64)>) -> Result<RebuildReport> {
    match result {
        Ok((product_rows, customer_rows)) => {
            info!(%scope, product_rows, customer_rows, "rebuilt daily summaries");
            Ok(RebuildReport {
                scope,
                product_rows,
                customer_rows,
            })
        }
        Err(source) => {
            warn!(%scope, error = %source, "daily rebuild failed, summaries left stale");
            Err(StoreError::Rebuild {
                scope: scope.to_string(),
                source,
            })
        }
    }
}

async fn rebuild_date(conn: &mut SqliteConnection, date: NaiveDate) -> sqlx::Result<(u64, u64)> {
    let date_key = format_date(date);

    sqlx::query("DELETE FROM fact_daily WHERE date = ?")
        .bind(&date_key)
        .execute(&mut *conn)
        .await?;

    let products = sqlx::query(PRODUCT_ROLLUP_FOR_DATE)
        .bind(&date_key)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let customers = sqlx::query(
        r#"
        INSERT INTO fact_daily_customer (date, customer_count)
        SELECT ?, COALESCE(SUM(customer_count), 0)
        FROM fact_hourly_customer
        WHERE date = ?
        ON CONFLICT(date) DO UPDATE SET customer_count = excluded.customer_count
        "#,
    )
    .bind(&date_key)
    .bind(&date_key)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok((products, customers))
}

async fn rebuild_all(conn: &mut SqliteConnection) -> sqlx::Result<(u64, u64)> {
    sqlx::query("DELETE FROM fact_daily")
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM fact_daily_customer")
        .execute(&mut *conn)
        .await?;

    let products = sqlx::query(PRODUCT_ROLLUP_ALL)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let customers = sqlx::query(
        r#"
        INSERT INTO fact_daily_customer (date, customer_count)
        SELECT date, COALESCE(SUM(customer_count), 0)
        FROM fact_hourly_customer
        GROUP BY date
        "#,
    )
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok((products, customers))
}

/// CLI entry point for `ffm rebuild`.
pub async fn run_rebuild(config: &Config, date: Option<&str>, all: bool) -> anyhow::Result<()> {
    let scope = match (date, all) {
        (_, true) => RebuildScope::All,
        (Some(raw), false) => RebuildScope::Date(
            parse_date(raw).ok_or_else(|| StoreError::InvalidDate(raw.to_string()))?,
        ),
        (None, false) => anyhow::bail!("Specify a date or --all"),
    };

    let pool = db::open(config).await.context("Failed to open database")?;

    let report = match scope {
        RebuildScope::Date(date) => rebuild_daily_for_date(&pool, date).await?,
        RebuildScope::All => rebuild_daily_all(&pool).await?,
    };

    println!("Rebuilt daily summaries for {}", report.scope);
    println!("  product rows:  {}", report.product_rows);
    println!("  customer rows: {}", report.customer_rows);

    pool.close().await;
    Ok(())
}
