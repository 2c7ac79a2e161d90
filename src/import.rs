//! Store a recognition payload.
//!
//! Everything is validated and every product name is resolved through the
//! catalog before the first write. The facts for all products, the hourly
//! customers and the daily customer total are then written in one
//! transaction, and the per-date rollup runs afterwards. A rollup failure
//! does not undo the import; it is reported as stale summaries.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use ffm_core::catalog::Catalog;
use ffm_core::date::format_date;
use ffm_core::models::MetricGrid;
use ffm_core::payload::ImportPayload;
use sqlx::sqlite::SqlitePool;
use tracing::info;

use crate::catalog::{ensure_item, SqliteCatalog};
use crate::config::Config;
use crate::db;
use crate::error::{Result, StoreError};
use crate::metrics::{write_customers, write_daily_customer, write_item_grid};
use crate::recognition::{CacheOutcome, JsonPayloadRecognizer, RecognitionRunner};
use crate::rollup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub date: NaiveDate,
    pub products: usize,
    pub facts_written: usize,
    pub customer_hours: usize,
    pub customer_total: u64,
    /// The facts were stored but the daily rollup failed.
    pub summaries_stale: bool,
}

pub async fn import_payload(
    pool: &SqlitePool,
    catalog: &dyn Catalog,
    payload: &ImportPayload,
) -> Result<ImportReport> {
    let date = payload
        .target_date()
        .ok_or_else(|| StoreError::InvalidDate(payload.date.clone()))?;
    let customers = payload.customers()?;

    // Same name twice in one payload: cells merge, later series win.
    let mut grids: BTreeMap<i64, MetricGrid> = BTreeMap::new();
    for product in &payload.products {
        let grid = product
            .to_grid()
            .map_err(|e| StoreError::from(e).with_context(format!("product '{}'", product.name)))?;
        let item_id = catalog
            .item_id_by_name(&product.name)
            .await?
            .ok_or_else(|| StoreError::UnregisteredItem(product.name.clone()))?;
        grids.entry(item_id).or_default().merge(&grid);
    }

    let mut tx = pool.begin().await?;
    let mut facts_written = 0;
    for (item_id, grid) in &grids {
        ensure_item(&mut tx, *item_id).await?;
        facts_written += write_item_grid(&mut tx, date, *item_id, grid).await?;
    }
    let customer_hours = write_customers(&mut tx, date, &customers).await?;
    let customer_total = write_daily_customer(&mut tx, date).await?;
    tx.commit().await?;

    info!(
        date = %format_date(date),
        products = grids.len(),
        facts_written,
        customer_hours,
        "imported payload"
    );

    let summaries_stale = match rollup::rebuild_daily_for_date(pool, date).await {
        Ok(_) => false,
        Err(StoreError::Rebuild { .. }) => true,
        Err(other) => return Err(other),
    };

    Ok(ImportReport {
        date,
        products: grids.len(),
        facts_written,
        customer_hours,
        customer_total,
        summaries_stale,
    })
}

/// CLI entry point for `ffm import`.
pub async fn run_import(config: &Config, path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read(path)
        .with_context(|| format!("Failed to read payload: {}", path.display()))?;

    let pool = db::open(config).await.context("Failed to open database")?;

    let runner = RecognitionRunner::from_config(
        pool.clone(),
        Arc::new(JsonPayloadRecognizer),
        &config.recognition,
    );
    let recognition = runner.run(&raw).await?;

    let catalog = SqliteCatalog::new(pool.clone());
    let report = import_payload(&pool, &catalog, &recognition.payload).await?;

    println!("Imported {} for {}", path.display(), format_date(report.date));
    println!(
        "  cache:          {}",
        match recognition.outcome {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
        }
    );
    println!("  products:       {}", report.products);
    println!("  facts written:  {}", report.facts_written);
    println!("  customer hours: {}", report.customer_hours);
    println!("  customers:      {}", report.customer_total);
    if report.summaries_stale {
        println!(
            "  WARNING: daily summaries are stale, run `ffm rebuild {}`",
            format_date(report.date)
        );
    }

    pool.close().await;
    Ok(())
}
