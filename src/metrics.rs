//! Hourly fact repository.
//!
//! Reads and writes the per-item metric grid (`fact_hourly_long`) and the
//! store-wide customer counts (`fact_hourly_customer`), plus the daily
//! customer total derived from them. Every write is an upsert: a second
//! write for the same `(date, hour, item, metric)` replaces the value.
//!
//! Fetches return only the hours that have a row. See
//! [`HourlyValues`](ffm_core::models::HourlyValues) for the zero-fill rule.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ffm_core::date::{format_date, parse_date};
use ffm_core::models::{
    DailyCustomerSummary, DailyProductSummary, Hour, HourlyValues, Metric, MetricGrid,
};
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};

use crate::catalog::ensure_item;
use crate::error::{Result, StoreError};

/// Which hourly series [`MetricsRepository::fetch_metric_series`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesMetric {
    Item(Metric),
    Customers,
}

/// Everything the day editor shows for one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaySnapshot {
    pub item: MetricGrid,
    pub customers: HourlyValues,
    /// Cross-item hourly totals.
    pub summary: MetricGrid,
}

/// Row counts touched by a combined day write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayWrite {
    pub facts: usize,
    pub customer_hours: usize,
    pub customer_total: u64,
}

#[derive(Clone)]
pub struct MetricsRepository {
    pool: SqlitePool,
}

impl MetricsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// One item's grid for a date. All four metrics are present, possibly empty.
    pub async fn fetch_item_metrics(&self, date: NaiveDate, item_id: i64) -> Result<MetricGrid> {
        let mut conn = self.pool.acquire().await?;
        ensure_item(&mut conn, item_id).await?;
        read_item_grid(&mut conn, date, item_id).await
    }

    /// Upsert every cell of `grid` in one transaction. Returns the number of cells written.
    pub async fn upsert_item_metrics(
        &self,
        date: NaiveDate,
        item_id: i64,
        grid: &MetricGrid,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        ensure_item(&mut tx, item_id).await?;
        let written = write_item_grid(&mut tx, date, item_id, grid).await?;
        tx.commit().await?;
        Ok(written)
    }

    pub async fn fetch_hourly_customers(&self, date: NaiveDate) -> Result<HourlyValues> {
        let mut conn = self.pool.acquire().await?;
        read_customers(&mut conn, date).await
    }

    pub async fn upsert_hourly_customers(
        &self,
        date: NaiveDate,
        values: &HourlyValues,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let written = write_customers(&mut tx, date, values).await?;
        tx.commit().await?;
        Ok(written)
    }

    /// Recompute the daily customer total from the hourly rows. A date with
    /// no hourly rows gets a total of 0.
    pub async fn upsert_daily_customer_from_hourly(&self, date: NaiveDate) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        write_daily_customer(&mut conn, date).await
    }

    /// Live per-hour totals across all items.
    pub async fn fetch_summary_metrics(&self, date: NaiveDate) -> Result<MetricGrid> {
        let mut conn = self.pool.acquire().await?;
        read_summary(&mut conn, date).await
    }

    /// Item grid, hourly customers and the daily customer total in one transaction.
    pub async fn save_day(
        &self,
        date: NaiveDate,
        item_id: i64,
        grid: &MetricGrid,
        customers: &HourlyValues,
    ) -> Result<DayWrite> {
        let mut tx = self.pool.begin().await?;
        ensure_item(&mut tx, item_id).await?;
        let facts = write_item_grid(&mut tx, date, item_id, grid).await?;
        let customer_hours = write_customers(&mut tx, date, customers).await?;
        let customer_total = write_daily_customer(&mut tx, date).await?;
        tx.commit().await?;

        Ok(DayWrite {
            facts,
            customer_hours,
            customer_total,
        })
    }

    pub async fn load_day(&self, date: NaiveDate, item_id: i64) -> Result<DaySnapshot> {
        let mut conn = self.pool.acquire().await?;
        ensure_item(&mut conn, item_id).await?;
        Ok(DaySnapshot {
            item: read_item_grid(&mut conn, date, item_id).await?,
            customers: read_customers(&mut conn, date).await?,
            summary: read_summary(&mut conn, date).await?,
        })
    }

    /// Materialized per-item summaries for a date, ordered by item id.
    pub async fn fetch_daily_products(&self, date: NaiveDate) -> Result<Vec<DailyProductSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, prepared, sold, discarded, stock_end
            FROM fact_daily
            WHERE date = ?
            ORDER BY item_id
            "#,
        )
        .bind(format_date(date))
        .fetch_all(&self.pool)
        .await?;

        let count = |row: &sqlx::sqlite::SqliteRow, column: &str| -> Result<u64> {
            let value: i64 = row.try_get(column)?;
            u64::try_from(value).map_err(|_| StoreError::Corrupt {
                table: "fact_daily",
                detail: format!("negative {} {} on {}", column, value, date),
            })
        };

        rows.iter()
            .map(|row| -> Result<DailyProductSummary> {
                Ok(DailyProductSummary {
                    date,
                    item_id: row.try_get("item_id")?,
                    prepared: count(row, "prepared")?,
                    sold: count(row, "sold")?,
                    discarded: count(row, "discarded")?,
                    stock_end: count(row, "stock_end")?,
                })
            })
            .collect()
    }

    /// Materialized customer total, `None` when the date was never rolled up.
    pub async fn fetch_daily_customers(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyCustomerSummary>> {
        let total: Option<i64> =
            sqlx::query_scalar("SELECT customer_count FROM fact_daily_customer WHERE date = ?")
                .bind(format_date(date))
                .fetch_optional(&self.pool)
                .await?;

        total
            .map(|value| -> Result<DailyCustomerSummary> {
                let customer_count = u64::try_from(value).map_err(|_| StoreError::Corrupt {
                    table: "fact_daily_customer",
                    detail: format!("negative total {} on {}", value, date),
                })?;
                Ok(DailyCustomerSummary {
                    date,
                    customer_count,
                })
            })
            .transpose()
    }

    /// Hourly values per date over `start..=end`.
    ///
    /// For item metrics, `item_id = None` sums across all items. The item
    /// filter is ignored for the customer series. Dates with no rows are
    /// absent from the result.
    pub async fn fetch_metric_series(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        series: SeriesMetric,
        item_id: Option<i64>,
    ) -> Result<BTreeMap<NaiveDate, HourlyValues>> {
        let (start_key, end_key) = (format_date(start), format_date(end));

        let rows = match (series, item_id) {
            (SeriesMetric::Customers, _) => {
                sqlx::query(
                    r#"
                    SELECT date, hour, customer_count AS value
                    FROM fact_hourly_customer
                    WHERE date BETWEEN ? AND ?
                    "#,
                )
                .bind(&start_key)
                .bind(&end_key)
                .fetch_all(&self.pool)
                .await?
            }
            (SeriesMetric::Item(metric), Some(item_id)) => {
                sqlx::query(
                    r#"
                    SELECT date, hour, value
                    FROM fact_hourly_long
                    WHERE date BETWEEN ? AND ? AND metric = ? AND item_id = ?
                    "#,
                )
                .bind(&start_key)
                .bind(&end_key)
                .bind(metric.as_str())
                .bind(item_id)
                .fetch_all(&self.pool)
                .await?
            }
            (SeriesMetric::Item(metric), None) => {
                sqlx::query(
                    r#"
                    SELECT date, hour, SUM(value) AS value
                    FROM fact_hourly_long
                    WHERE date BETWEEN ? AND ? AND metric = ?
                    GROUP BY date, hour
                    "#,
                )
                .bind(&start_key)
                .bind(&end_key)
                .bind(metric.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        let table = match series {
            SeriesMetric::Customers => "fact_hourly_customer",
            SeriesMetric::Item(_) => "fact_hourly_long",
        };

        let mut out: BTreeMap<NaiveDate, HourlyValues> = BTreeMap::new();
        for row in rows {
            let raw_date: String = row.try_get("date")?;
            let date = parse_date(&raw_date).ok_or_else(|| StoreError::Corrupt {
                table,
                detail: format!("unparseable date '{}'", raw_date),
            })?;
            let hour = stored_hour(table, row.try_get("hour")?)?;
            let value = stored_count(table, row.try_get("value")?)?;
            out.entry(date).or_default().insert(hour, value);
        }
        Ok(out)
    }
}

fn stored_hour(table: &'static str, hour: i64) -> Result<Hour> {
    Hour::try_from(hour).map_err(|_| StoreError::Corrupt {
        table,
        detail: format!("hour {} outside 0..=23", hour),
    })
}

fn stored_count(table: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        detail: format!("count {} out of range", value),
    })
}

pub(crate) async fn read_item_grid(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    item_id: i64,
) -> Result<MetricGrid> {
    let rows = sqlx::query(
        "SELECT metric, hour, value FROM fact_hourly_long WHERE date = ? AND item_id = ?",
    )
    .bind(format_date(date))
    .bind(item_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut grid = MetricGrid::new();
    for row in rows {
        let name: String = row.try_get("metric")?;
        let metric = name.parse::<Metric>().map_err(|e| {
            StoreError::from(e).with_context(format!("item {} on {}", item_id, date))
        })?;
        let hour = stored_hour("fact_hourly_long", row.try_get("hour")?)?;
        let value = stored_count("fact_hourly_long", row.try_get("value")?)?;
        grid.set(metric, hour, value);
    }
    Ok(grid)
}

pub(crate) async fn write_item_grid(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    item_id: i64,
    grid: &MetricGrid,
) -> Result<usize> {
    let date_key = format_date(date);
    let mut written = 0;
    for (metric, hour, value) in grid.cells() {
        sqlx::query(
            r#"
            INSERT INTO fact_hourly_long (date, hour, item_id, metric, value)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(date, hour, item_id, metric) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&date_key)
        .bind(i64::from(hour.get()))
        .bind(item_id)
        .bind(metric.as_str())
        .bind(i64::from(value))
        .execute(&mut *conn)
        .await
        .map_err(|source| StoreError::Write {
            statement: format!(
                "upsert {} item {} hour {} on {}",
                metric, item_id, hour, date_key
            ),
            source,
        })?;
        written += 1;
    }
    Ok(written)
}

pub(crate) async fn read_customers(
    conn: &mut SqliteConnection,
    date: NaiveDate,
) -> Result<HourlyValues> {
    let rows = sqlx::query("SELECT hour, customer_count FROM fact_hourly_customer WHERE date = ?")
        .bind(format_date(date))
        .fetch_all(&mut *conn)
        .await?;

    let mut out = HourlyValues::new();
    for row in rows {
        let hour = stored_hour("fact_hourly_customer", row.try_get("hour")?)?;
        let count = stored_count("fact_hourly_customer", row.try_get("customer_count")?)?;
        out.insert(hour, count);
    }
    Ok(out)
}

pub(crate) async fn write_customers(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    values: &HourlyValues,
) -> Result<usize> {
    let date_key = format_date(date);
    for (hour, count) in values {
        sqlx::query(
            r#"
            INSERT INTO fact_hourly_customer (date, hour, customer_count)
            VALUES (?, ?, ?)
            ON CONFLICT(date, hour) DO UPDATE SET customer_count = excluded.customer_count
            "#,
        )
        .bind(&date_key)
        .bind(i64::from(hour.get()))
        .bind(i64::from(*count))
        .execute(&mut *conn)
        .await
        .map_err(|source| StoreError::Write {
            statement: format!("upsert customers hour {} on {}", hour, date_key),
            source,
        })?;
    }
    Ok(values.len())
}

pub(crate) async fn write_daily_customer(conn: &mut SqliteConnection, date: NaiveDate) -> Result<u64> {
    let date_key = format_date(date);
    sqlx::query(
        r#"
        INSERT INTO fact_daily_customer (date, customer_count)
        VALUES (?, (SELECT COALESCE(SUM(customer_count), 0) FROM fact_hourly_customer WHERE date = ?))
        ON CONFLICT(date) DO UPDATE SET customer_count = excluded.customer_count
        "#,
    )
    .bind(&date_key)
    .bind(&date_key)
    .execute(&mut *conn)
    .await
    .map_err(|source| StoreError::Write {
        statement: format!("upsert daily customers on {}", date_key),
        source,
    })?;

    let total: i64 =
        sqlx::query_scalar("SELECT customer_count FROM fact_daily_customer WHERE date = ?")
            .bind(&date_key)
            .fetch_one(&mut *conn)
            .await?;
    u64::try_from(total).map_err(|_| StoreError::Corrupt {
        table: "fact_daily_customer",
        detail: format!("negative total {} on {}", total, date_key),
    })
}

pub(crate) async fn read_summary(conn: &mut SqliteConnection, date: NaiveDate) -> Result<MetricGrid> {
    let rows = sqlx::query(
        r#"
        SELECT metric, hour, SUM(value) AS total
        FROM fact_hourly_long
        WHERE date = ?
        GROUP BY metric, hour
        "#,
    )
    .bind(format_date(date))
    .fetch_all(&mut *conn)
    .await?;

    let mut grid = MetricGrid::new();
    for row in rows {
        let name: String = row.try_get("metric")?;
        let metric = name
            .parse::<Metric>()
            .map_err(|e| StoreError::from(e).with_context(format!("summary on {}", date)))?;
        let hour = stored_hour("fact_hourly_long", row.try_get("hour")?)?;
        let total = stored_count("fact_hourly_long", row.try_get("total")?)?;
        grid.set(metric, hour, total);
    }
    Ok(grid)
}
