//! `ffm show`: print one day's hourly grid and its daily summaries.

use std::collections::BTreeMap;

use anyhow::Context;
use ffm_core::date::{format_date, parse_date};
use ffm_core::models::{HourlyValues, Metric, MetricGrid};

use crate::catalog::SqliteCatalog;
use crate::config::Config;
use crate::db;
use crate::error::StoreError;
use crate::metrics::MetricsRepository;

pub async fn run_show(config: &Config, date: &str, item: Option<&str>) -> anyhow::Result<()> {
    let date = parse_date(date).ok_or_else(|| StoreError::InvalidDate(date.to_string()))?;

    let pool = db::open(config).await.context("Failed to open database")?;
    let catalog = SqliteCatalog::new(pool.clone());
    let repo = MetricsRepository::new(pool.clone());

    println!("Date: {}", format_date(date));
    println!();

    let grid = match item {
        Some(name) => {
            let item_id = catalog
                .find_item_id(name)
                .await?
                .ok_or_else(|| StoreError::UnregisteredItem(name.to_string()))?;
            println!("Item: {} (id {})", name, item_id);
            repo.fetch_item_metrics(date, item_id).await?
        }
        None => {
            println!("All items (hourly totals)");
            repo.fetch_summary_metrics(date).await?
        }
    };
    print_grid(&grid);
    println!();

    let customers = repo.fetch_hourly_customers(date).await?;
    println!("  {:<10} {}", "customers", format_series(&customers));
    println!();

    let names: BTreeMap<i64, String> = catalog
        .list_items()
        .await?
        .into_iter()
        .map(|i| (i.item_id, i.item_name))
        .collect();

    let daily = repo.fetch_daily_products(date).await?;
    println!("Daily summary:");
    if daily.is_empty() {
        println!("  (none, run `ffm rebuild {}`)", format_date(date));
    } else {
        println!(
            "  {:<20} {:>9} {:>6} {:>10} {:>10}",
            "ITEM", "PREPARED", "SOLD", "DISCARDED", "STOCK END"
        );
        for row in &daily {
            let name = names
                .get(&row.item_id)
                .map(String::as_str)
                .unwrap_or("?");
            println!(
                "  {:<20} {:>9} {:>6} {:>10} {:>10}",
                name, row.prepared, row.sold, row.discarded, row.stock_end
            );
        }
    }
    match repo.fetch_daily_customers(date).await? {
        Some(summary) => println!("  customers: {}", summary.customer_count),
        None => println!("  customers: -"),
    }

    pool.close().await;
    Ok(())
}

fn print_grid(grid: &MetricGrid) {
    for metric in Metric::ALL {
        let values = grid.get(metric);
        let total = if metric.is_additive() {
            grid.total(metric).to_string()
        } else {
            grid.latest(metric)
                .map(|v| format!("end {}", v))
                .unwrap_or_else(|| "-".to_string())
        };
        println!("  {:<10} {}  [{}]", metric.as_str(), format_series(values), total);
    }
}

/// `9:12 10:10 ...`, or `-` when nothing is recorded.
fn format_series(values: &HourlyValues) -> String {
    if values.is_empty() {
        return "-".to_string();
    }
    values
        .iter()
        .map(|(h, v)| format!("{}:{}", h, v))
        .collect::<Vec<_>>()
        .join(" ")
}
