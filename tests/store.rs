use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use ffm_core::cache_key::CacheParams;
use ffm_core::catalog::Catalog;
use ffm_core::date::parse_date;
use ffm_core::models::{hourly, HourlyValues, ItemType, Metric, MetricGrid, NewItem, SalesClass};
use ffm_core::payload::ImportPayload;
use ffm_ledger::cache::{build_key, ResultCache};
use ffm_ledger::catalog::SqliteCatalog;
use ffm_ledger::config::Config;
use ffm_ledger::import::import_payload;
use ffm_ledger::metrics::{MetricsRepository, SeriesMetric};
use ffm_ledger::migrate::{self, Migration, MIGRATIONS};
use ffm_ledger::recognition::{CacheOutcome, RecognitionRunner, Recognizer};
use ffm_ledger::{db, rollup, schema, StoreError};

async fn fresh_store() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("ffm.sqlite"));
    let pool = db::open(&config).await.unwrap();
    (tmp, pool)
}

async fn empty_file() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("ffm.sqlite"))
        .await
        .unwrap();
    (tmp, pool)
}

fn date(s: &str) -> NaiveDate {
    parse_date(s).unwrap()
}

fn values(pairs: &[(i64, i64)]) -> HourlyValues {
    hourly(pairs.iter().copied()).unwrap()
}

async fn add_item(pool: &SqlitePool, name: &str) -> i64 {
    SqliteCatalog::new(pool.clone())
        .add_item(&NewItem::named(name, 150))
        .await
        .unwrap()
}

async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

fn fake_payload() -> ImportPayload {
    serde_json::from_value(json!({
        "version": "1.0",
        "date": "2025/1/1",
        "customers_by_hour": {"9": 18, "10": 22, "11": 35},
        "products": [
            {
                "name": "onigiri",
                "by_metric": {
                    "prepared":  {"9": 12, "10": 10, "11": 8},
                    "sold":      {"9": 11, "10": 9,  "11": 9},
                    "discarded": {"10": 1},
                    "stock":     {"9": 12, "10": 10, "11": 8}
                }
            },
            {
                "name": "karaage",
                "by_metric": {
                    "prep":  {"9": 6, "10": 6},
                    "sales": {"9": 5, "10": 7}
                }
            }
        ],
        "meta": {"source": "fake"}
    }))
    .unwrap()
}

// ---------- migrations ----------

#[tokio::test]
async fn test_migrate_twice_from_zero() {
    let (_tmp, pool) = empty_file().await;
    assert_eq!(migrate::current_version(&pool).await.unwrap(), 0);

    let first = migrate::migrate(&pool).await.unwrap();
    assert_eq!(first.from_version, 0);
    assert_eq!(first.applied, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(first.to_version, migrate::latest_version());

    let second = migrate::migrate(&pool).await.unwrap();
    assert!(second.applied.is_empty());
    assert_eq!(migrate::current_version(&pool).await.unwrap(), 6);

    for table in [
        "items",
        "fact_hourly_long",
        "fact_hourly_customer",
        "fact_daily",
        "fact_daily_customer",
        "recognition_cache",
    ] {
        assert!(
            !schema::table_columns(&pool, table).await.unwrap().is_empty(),
            "missing table {}",
            table
        );
    }
}

#[tokio::test]
async fn test_failing_step_rolls_back_whole_session() {
    let (_tmp, pool) = empty_file().await;
    let steps = [
        MIGRATIONS[0],
        MIGRATIONS[1],
        MIGRATIONS[2],
        Migration {
            version: 4,
            description: "broken",
            statements: &["CREATE TABLE broken ("],
        },
    ];

    let err = migrate::apply_migrations(&pool, &steps).await.unwrap_err();
    assert!(matches!(err, StoreError::Migration { version: 4, .. }));

    assert_eq!(migrate::current_version(&pool).await.unwrap(), 0);
    assert!(schema::table_columns(&pool, "items").await.unwrap().is_empty());
    assert!(schema::table_columns(&pool, "fact_hourly_customer")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_partial_install_resumes_at_next_step() {
    let (_tmp, pool) = empty_file().await;

    let partial = migrate::apply_migrations(&pool, &MIGRATIONS[..3]).await.unwrap();
    assert_eq!(partial.to_version, 3);

    let rest = migrate::migrate(&pool).await.unwrap();
    assert_eq!(rest.from_version, 3);
    assert_eq!(rest.applied, vec![4, 5, 6]);
}

// ---------- metrics repository ----------

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let (_tmp, pool) = fresh_store().await;
    let item = add_item(&pool, "onigiri").await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");

    let first = MetricGrid::new().with(Metric::Sold, values(&[(9, 5)]));
    let second = MetricGrid::new().with(Metric::Sold, values(&[(9, 7)]));
    repo.upsert_item_metrics(day, item, &first).await.unwrap();
    repo.upsert_item_metrics(day, item, &second).await.unwrap();

    let grid = repo.fetch_item_metrics(day, item).await.unwrap();
    assert_eq!(grid.sold, values(&[(9, 7)]));
    assert!(grid.prepared.is_empty());
    assert_eq!(count_rows(&pool, "fact_hourly_long").await, 1);
}

#[tokio::test]
async fn test_unknown_metric_row_is_a_fault() {
    let (_tmp, pool) = fresh_store().await;
    let item = add_item(&pool, "onigiri").await;

    sqlx::query("PRAGMA ignore_check_constraints = ON")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO fact_hourly_long (date, hour, item_id, metric, value) VALUES ('2025-01-01', 9, ?, 'foo', 1)",
    )
    .bind(item)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("PRAGMA ignore_check_constraints = OFF")
        .execute(&pool)
        .await
        .unwrap();

    let repo = MetricsRepository::new(pool.clone());
    match repo.fetch_item_metrics(date("2025-01-01"), item).await {
        Err(StoreError::UnknownMetric { metric, .. }) => assert_eq!(metric, "foo"),
        other => panic!("expected UnknownMetric, got {:?}", other),
    }
    assert!(matches!(
        repo.fetch_summary_metrics(date("2025-01-01")).await,
        Err(StoreError::UnknownMetric { .. })
    ));
}

#[tokio::test]
async fn test_unregistered_item_is_rejected() {
    let (_tmp, pool) = fresh_store().await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");
    let grid = MetricGrid::new().with(Metric::Sold, values(&[(9, 1)]));

    assert!(matches!(
        repo.fetch_item_metrics(day, 999).await,
        Err(StoreError::UnregisteredItem(_))
    ));
    assert!(matches!(
        repo.upsert_item_metrics(day, 999, &grid).await,
        Err(StoreError::UnregisteredItem(_))
    ));
    assert_eq!(count_rows(&pool, "fact_hourly_long").await, 0);
}

#[tokio::test]
async fn test_failed_statement_aborts_whole_write() {
    let (_tmp, pool) = fresh_store().await;
    let item = add_item(&pool, "onigiri").await;
    sqlx::query(
        r#"
        CREATE TRIGGER reject_hour_ten BEFORE INSERT ON fact_hourly_long
        WHEN NEW.hour = 10
        BEGIN SELECT RAISE(ABORT, 'rejected'); END
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let repo = MetricsRepository::new(pool.clone());
    let grid = MetricGrid::new().with(Metric::Sold, values(&[(9, 1), (10, 2)]));
    match repo.upsert_item_metrics(date("2025-01-01"), item, &grid).await {
        Err(StoreError::Write { statement, .. }) => assert!(statement.contains("hour 10")),
        other => panic!("expected Write fault, got {:?}", other),
    }
    assert_eq!(count_rows(&pool, "fact_hourly_long").await, 0);
}

#[tokio::test]
async fn test_daily_customers_from_hourly() {
    let (_tmp, pool) = fresh_store().await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");

    repo.upsert_hourly_customers(day, &values(&[(9, 18), (10, 22), (11, 35)]))
        .await
        .unwrap();
    assert_eq!(repo.upsert_daily_customer_from_hourly(day).await.unwrap(), 75);
    assert_eq!(
        repo.fetch_hourly_customers(day).await.unwrap(),
        values(&[(9, 18), (10, 22), (11, 35)])
    );

    let empty = date("2025-01-02");
    assert_eq!(repo.upsert_daily_customer_from_hourly(empty).await.unwrap(), 0);
    assert_eq!(
        repo.fetch_daily_customers(empty)
            .await
            .unwrap()
            .map(|s| s.customer_count),
        Some(0)
    );
    assert_eq!(repo.fetch_daily_customers(date("2025-01-03")).await.unwrap(), None);
}

#[tokio::test]
async fn test_summary_sums_across_items() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "onigiri").await;
    let b = add_item(&pool, "karaage").await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");

    repo.upsert_item_metrics(day, a, &MetricGrid::new().with(Metric::Sold, values(&[(9, 3)])))
        .await
        .unwrap();
    repo.upsert_item_metrics(
        day,
        b,
        &MetricGrid::new().with(Metric::Sold, values(&[(9, 4), (12, 1)])),
    )
    .await
    .unwrap();

    let summary = repo.fetch_summary_metrics(day).await.unwrap();
    assert_eq!(summary.sold, values(&[(9, 7), (12, 1)]));
    assert!(summary.stock.is_empty());
}

#[tokio::test]
async fn test_load_day_snapshot() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "onigiri").await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");

    let grid = MetricGrid::new().with(Metric::Prepared, values(&[(9, 4)]));
    let written = repo
        .save_day(day, a, &grid, &values(&[(9, 10)]))
        .await
        .unwrap();
    assert_eq!((written.facts, written.customer_hours, written.customer_total), (1, 1, 10));

    let snapshot = repo.load_day(day, a).await.unwrap();
    assert_eq!(snapshot.item, grid);
    assert_eq!(snapshot.customers, values(&[(9, 10)]));
    assert_eq!(snapshot.summary.prepared, values(&[(9, 4)]));
}

#[tokio::test]
async fn test_metric_series_over_range() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "onigiri").await;
    let b = add_item(&pool, "karaage").await;
    let repo = MetricsRepository::new(pool.clone());

    for (day, sold_a, sold_b) in [("2025-01-01", 3, 1), ("2025-01-02", 5, 2), ("2025-01-05", 9, 9)] {
        repo.upsert_item_metrics(date(day), a, &MetricGrid::new().with(Metric::Sold, values(&[(9, sold_a)])))
            .await
            .unwrap();
        repo.upsert_item_metrics(date(day), b, &MetricGrid::new().with(Metric::Sold, values(&[(9, sold_b)])))
            .await
            .unwrap();
    }
    repo.upsert_hourly_customers(date("2025-01-02"), &values(&[(8, 30)]))
        .await
        .unwrap();

    let start = date("2025-01-01");
    let end = date("2025-01-03");

    let only_a = repo
        .fetch_metric_series(start, end, SeriesMetric::Item(Metric::Sold), Some(a))
        .await
        .unwrap();
    assert_eq!(only_a.len(), 2);
    assert_eq!(only_a[&date("2025-01-02")], values(&[(9, 5)]));

    let all = repo
        .fetch_metric_series(start, end, SeriesMetric::Item(Metric::Sold), None)
        .await
        .unwrap();
    assert_eq!(all[&date("2025-01-01")], values(&[(9, 4)]));
    assert!(!all.contains_key(&date("2025-01-05")));

    let customers = repo
        .fetch_metric_series(start, end, SeriesMetric::Customers, Some(a))
        .await
        .unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[&date("2025-01-02")], values(&[(8, 30)]));
}

// ---------- rollup ----------

#[tokio::test]
async fn test_end_to_end_daily_summary() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "A").await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");

    let grid = MetricGrid::new()
        .with(Metric::Prepared, values(&[(9, 12), (10, 10)]))
        .with(Metric::Sold, values(&[(9, 11), (10, 9)]))
        .with(Metric::Discarded, values(&[(10, 1)]))
        .with(Metric::Stock, values(&[(9, 12), (10, 10)]));
    repo.save_day(day, a, &grid, &values(&[(9, 18), (10, 22)]))
        .await
        .unwrap();

    let report = rollup::rebuild_daily_for_date(&pool, day).await.unwrap();
    assert_eq!((report.product_rows, report.customer_rows), (1, 1));

    let rows = repo.fetch_daily_products(day).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(
        (row.item_id, row.prepared, row.sold, row.discarded, row.stock_end),
        (a, 22, 20, 1, 10)
    );
    assert_eq!(
        repo.fetch_daily_customers(day).await.unwrap().map(|s| s.customer_count),
        Some(40)
    );
}

#[tokio::test]
async fn test_stock_end_takes_latest_hour_and_flows_sum() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "A").await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");

    let grid = MetricGrid::new()
        .with(Metric::Stock, values(&[(9, 12), (14, 7)]))
        .with(Metric::Sold, values(&[(9, 12), (10, 9), (11, 9)]));
    repo.upsert_item_metrics(day, a, &grid).await.unwrap();
    rollup::rebuild_daily_for_date(&pool, day).await.unwrap();

    let row = &repo.fetch_daily_products(day).await.unwrap()[0];
    assert_eq!(row.stock_end, 7);
    assert_eq!(row.sold, 30);
    assert_eq!(row.prepared, 0);
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "A").await;
    let b = add_item(&pool, "B").await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");

    repo.upsert_item_metrics(day, a, &MetricGrid::new().with(Metric::Sold, values(&[(9, 2)])))
        .await
        .unwrap();
    repo.upsert_item_metrics(day, b, &MetricGrid::new().with(Metric::Stock, values(&[(20, 3)])))
        .await
        .unwrap();

    rollup::rebuild_daily_for_date(&pool, day).await.unwrap();
    let first = repo.fetch_daily_products(day).await.unwrap();
    for _ in 0..3 {
        rollup::rebuild_daily_for_date(&pool, day).await.unwrap();
    }
    assert_eq!(repo.fetch_daily_products(day).await.unwrap(), first);
    assert_eq!(count_rows(&pool, "fact_daily").await, 2);
    assert_eq!(count_rows(&pool, "fact_daily_customer").await, 1);
}

#[tokio::test]
async fn test_rebuild_drops_rows_without_facts() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "A").await;
    let b = add_item(&pool, "B").await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");

    for item in [a, b] {
        repo.upsert_item_metrics(day, item, &MetricGrid::new().with(Metric::Sold, values(&[(9, 1)])))
            .await
            .unwrap();
    }
    rollup::rebuild_daily_for_date(&pool, day).await.unwrap();

    sqlx::query("DELETE FROM fact_hourly_long WHERE item_id = ?")
        .bind(b)
        .execute(&pool)
        .await
        .unwrap();
    rollup::rebuild_daily_for_date(&pool, day).await.unwrap();

    let rows = repo.fetch_daily_products(day).await.unwrap();
    assert_eq!(rows.iter().map(|r| r.item_id).collect::<Vec<_>>(), vec![a]);
}

#[tokio::test]
async fn test_failed_rebuild_keeps_facts_and_old_summaries() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "A").await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");

    repo.upsert_item_metrics(day, a, &MetricGrid::new().with(Metric::Sold, values(&[(9, 5)])))
        .await
        .unwrap();
    rollup::rebuild_daily_for_date(&pool, day).await.unwrap();

    repo.upsert_item_metrics(day, a, &MetricGrid::new().with(Metric::Sold, values(&[(9, 50)])))
        .await
        .unwrap();
    sqlx::query("DROP TABLE fact_daily_customer")
        .execute(&pool)
        .await
        .unwrap();

    match rollup::rebuild_daily_for_date(&pool, day).await {
        Err(StoreError::Rebuild { scope, .. }) => assert_eq!(scope, "2025-01-01"),
        other => panic!("expected Rebuild fault, got {:?}", other),
    }

    let grid = repo.fetch_item_metrics(day, a).await.unwrap();
    assert_eq!(grid.sold, values(&[(9, 50)]));
    let stale = repo.fetch_daily_products(day).await.unwrap();
    assert_eq!(stale[0].sold, 5);
}

#[tokio::test]
async fn test_full_rebuild_replaces_everything() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "A").await;
    let repo = MetricsRepository::new(pool.clone());

    for (day, sold) in [("2025-01-01", 3), ("2025-01-02", 4)] {
        repo.upsert_item_metrics(date(day), a, &MetricGrid::new().with(Metric::Sold, values(&[(9, sold)])))
            .await
            .unwrap();
        repo.upsert_hourly_customers(date(day), &values(&[(9, 10)]))
            .await
            .unwrap();
    }
    sqlx::query(
        "INSERT INTO fact_daily (date, item_id, prepared, sold, discarded, stock_end) VALUES ('2024-12-31', ?, 9, 9, 9, 9)",
    )
    .bind(a)
    .execute(&pool)
    .await
    .unwrap();

    let report = rollup::rebuild_daily_all(&pool).await.unwrap();
    assert_eq!((report.product_rows, report.customer_rows), (2, 2));
    assert!(repo.fetch_daily_products(date("2024-12-31")).await.unwrap().is_empty());
    assert_eq!(repo.fetch_daily_products(date("2025-01-02")).await.unwrap()[0].sold, 4);

    let again = rollup::rebuild_daily_all(&pool).await.unwrap();
    assert_eq!(again, report);
}

#[tokio::test]
async fn test_concurrent_write_and_rebuild_are_serialized() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "A").await;
    let repo = MetricsRepository::new(pool.clone());
    let day = date("2025-01-01");
    let grid = MetricGrid::new().with(Metric::Sold, values(&[(9, 2), (10, 3)]));

    let writer = {
        let repo = repo.clone();
        let grid = grid.clone();
        tokio::spawn(async move { repo.upsert_item_metrics(day, a, &grid).await })
    };
    let rebuild = {
        let pool = pool.clone();
        tokio::spawn(async move { rollup::rebuild_daily_for_date(&pool, day).await })
    };
    writer.await.unwrap().unwrap();
    rebuild.await.unwrap().unwrap();

    rollup::rebuild_daily_for_date(&pool, day).await.unwrap();
    assert_eq!(repo.fetch_daily_products(day).await.unwrap()[0].sold, 5);
}

// ---------- cache & recognition ----------

#[tokio::test]
async fn test_cache_miss_put_overwrite() {
    let (_tmp, pool) = fresh_store().await;
    let cache = ResultCache::new(pool.clone());
    let params = CacheParams::from([("engine".to_string(), json!("table"))]);
    let key = build_key(b"sheet-bytes", &params);

    assert!(cache.get(&key).await.unwrap().is_none());
    assert!(cache.is_empty().await.unwrap());

    cache.put(&key, &params, &json!({"full_text": "first"})).await.unwrap();
    cache.put(&key, &params, &json!({"full_text": "second"})).await.unwrap();

    let entry = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(entry.params, params);
    assert_eq!(
        entry.result::<serde_json::Value>().unwrap(),
        json!({"full_text": "second"})
    );
    assert!(entry.created_at > 0);
    assert_eq!(cache.len().await.unwrap(), 1);
}

struct FakeRecognizer {
    calls: AtomicUsize,
    delay: Duration,
}

impl FakeRecognizer {
    fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    fn name(&self) -> &str {
        "fake"
    }

    fn params(&self) -> CacheParams {
        CacheParams::from([
            ("engine".to_string(), json!("fake")),
            ("pre".to_string(), json!("deskew+adaptive+denoise")),
        ])
    }

    async fn recognize(&self, _raw: &[u8]) -> anyhow::Result<ImportPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(fake_payload())
    }
}

#[tokio::test]
async fn test_runner_serves_second_call_from_cache() {
    let (_tmp, pool) = fresh_store().await;
    let recognizer = Arc::new(FakeRecognizer::new(Duration::ZERO));
    let runner = RecognitionRunner::new(
        ResultCache::new(pool.clone()),
        recognizer.clone(),
        Duration::from_secs(5),
    );

    let first = runner.run(b"photo").await.unwrap();
    assert_eq!(first.outcome, CacheOutcome::Miss);
    let second = runner.run(b"photo").await.unwrap();
    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert_eq!(second.key, first.key);
    assert_eq!(second.payload, first.payload);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);

    let other = runner.run(b"another photo").await.unwrap();
    assert_eq!(other.outcome, CacheOutcome::Miss);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_runner_times_out_without_caching() {
    let (_tmp, pool) = fresh_store().await;
    let cache = ResultCache::new(pool.clone());
    let runner = RecognitionRunner::new(
        cache.clone(),
        Arc::new(FakeRecognizer::new(Duration::from_secs(5))),
        Duration::from_millis(50),
    );

    assert!(matches!(
        runner.run(b"photo").await,
        Err(StoreError::RecognitionTimeout { .. })
    ));
    assert_eq!(cache.len().await.unwrap(), 0);
}

// ---------- import ----------

#[tokio::test]
async fn test_import_fake_payload() {
    let (_tmp, pool) = fresh_store().await;
    let a = add_item(&pool, "onigiri").await;
    let b = add_item(&pool, "karaage").await;
    let catalog = SqliteCatalog::new(pool.clone());

    let report = import_payload(&pool, &catalog, &fake_payload()).await.unwrap();
    assert_eq!(report.date, date("2025-01-01"));
    assert_eq!(report.products, 2);
    assert_eq!(report.facts_written, 14);
    assert_eq!(report.customer_total, 75);
    assert!(!report.summaries_stale);

    let repo = MetricsRepository::new(pool.clone());
    let rows = repo.fetch_daily_products(report.date).await.unwrap();
    let a_row = rows.iter().find(|r| r.item_id == a).unwrap();
    let b_row = rows.iter().find(|r| r.item_id == b).unwrap();
    assert_eq!((a_row.prepared, a_row.sold, a_row.discarded, a_row.stock_end), (30, 29, 1, 8));
    assert_eq!((b_row.prepared, b_row.sold, b_row.discarded, b_row.stock_end), (12, 12, 0, 0));
    assert_eq!(
        repo.fetch_daily_customers(report.date).await.unwrap().map(|s| s.customer_count),
        Some(75)
    );
}

#[tokio::test]
async fn test_import_with_unregistered_product_writes_nothing() {
    let (_tmp, pool) = fresh_store().await;
    add_item(&pool, "onigiri").await;
    let catalog = SqliteCatalog::new(pool.clone());

    match import_payload(&pool, &catalog, &fake_payload()).await {
        Err(StoreError::UnregisteredItem(name)) => assert_eq!(name, "karaage"),
        other => panic!("expected UnregisteredItem, got {:?}", other),
    }
    assert_eq!(count_rows(&pool, "fact_hourly_long").await, 0);
    assert_eq!(count_rows(&pool, "fact_hourly_customer").await, 0);
}

#[tokio::test]
async fn test_import_rejects_bad_readings() {
    let (_tmp, pool) = fresh_store().await;
    add_item(&pool, "onigiri").await;
    add_item(&pool, "karaage").await;
    let catalog = SqliteCatalog::new(pool.clone());

    let mut bad_hour = fake_payload();
    bad_hour.customers_by_hour.insert(24, 3);
    assert!(matches!(
        import_payload(&pool, &catalog, &bad_hour).await,
        Err(StoreError::InvalidHour(24))
    ));

    let mut bad_metric = fake_payload();
    bad_metric.products[0]
        .by_metric
        .insert("returns".to_string(), [(9, 1)].into_iter().collect());
    match import_payload(&pool, &catalog, &bad_metric).await {
        Err(StoreError::UnknownMetric { metric, context }) => {
            assert_eq!(metric, "returns");
            assert!(context.contains("onigiri"));
        }
        other => panic!("expected UnknownMetric, got {:?}", other),
    }

    let mut bad_date = fake_payload();
    bad_date.date = "not-a-date".to_string();
    assert!(matches!(
        import_payload(&pool, &catalog, &bad_date).await,
        Err(StoreError::InvalidDate(_))
    ));

    assert_eq!(count_rows(&pool, "fact_hourly_long").await, 0);
}

#[tokio::test]
async fn test_import_reports_stale_summaries() {
    let (_tmp, pool) = fresh_store().await;
    add_item(&pool, "onigiri").await;
    add_item(&pool, "karaage").await;
    sqlx::query(
        "CREATE TRIGGER block_daily BEFORE INSERT ON fact_daily BEGIN SELECT RAISE(ABORT, 'blocked'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let catalog = SqliteCatalog::new(pool.clone());
    let report = import_payload(&pool, &catalog, &fake_payload()).await.unwrap();
    assert!(report.summaries_stale);
    assert_eq!(count_rows(&pool, "fact_hourly_long").await, 14);
    assert_eq!(count_rows(&pool, "fact_daily").await, 0);
}

// ---------- catalog ----------

#[tokio::test]
async fn test_catalog_crud() {
    let (_tmp, pool) = fresh_store().await;
    let catalog = SqliteCatalog::new(pool.clone());

    let mut nikuman = NewItem::named("nikuman", 160);
    nikuman.item_type = ItemType::Chukaman;
    nikuman.freshness = Some(8);
    let id = catalog.add_item(&nikuman).await.unwrap();
    let other = catalog.add_item(&NewItem::named("anman", 140)).await.unwrap();

    let item = catalog.get_item(id).await.unwrap().unwrap();
    assert_eq!(item.item_type, ItemType::Chukaman);
    assert_eq!(item.freshness, Some(8));
    assert!(item.is_active);

    nikuman.sales_class = SalesClass::Limited;
    nikuman.is_active = false;
    assert!(catalog.update_item(id, &nikuman).await.unwrap());
    assert!(!catalog.update_item(999, &nikuman).await.unwrap());
    let updated = catalog.get_item(id).await.unwrap().unwrap();
    assert_eq!(updated.sales_class, SalesClass::Limited);
    assert!(!updated.is_active);

    assert_eq!(catalog.list_item_names().await.unwrap(), vec!["anman", "nikuman"]);
    assert_eq!(catalog.item_id_by_name("anman").await.unwrap(), Some(other));
    assert_eq!(
        catalog.item_name_by_id(id).await.unwrap().as_deref(),
        Some("nikuman")
    );

    // Duplicate names are rejected by the schema.
    assert!(catalog.add_item(&NewItem::named("anman", 1)).await.is_err());

    // Items with facts cannot be deleted.
    MetricsRepository::new(pool.clone())
        .upsert_item_metrics(
            date("2025-01-01"),
            id,
            &MetricGrid::new().with(Metric::Sold, values(&[(9, 1)])),
        )
        .await
        .unwrap();
    assert!(catalog.delete_item(id).await.is_err());
    assert!(catalog.delete_item(other).await.unwrap());
    assert_eq!(catalog.list_items().await.unwrap().len(), 1);
}

// ---------- schema maintenance ----------

#[tokio::test]
async fn test_add_column_if_missing() {
    let (_tmp, pool) = fresh_store().await;

    assert!(schema::add_column_if_missing(&pool, "items", "note", "TEXT DEFAULT ''")
        .await
        .unwrap());
    assert!(!schema::add_column_if_missing(&pool, "items", "note", "TEXT")
        .await
        .unwrap());
    assert!(schema::column_exists(&pool, "items", "note").await.unwrap());
    assert!(matches!(
        schema::add_column_if_missing(&pool, "items", "bad name", "TEXT").await,
        Err(StoreError::InvalidIdentifier(_))
    ));
}

#[tokio::test]
async fn test_drop_column_by_rebuild_keeps_rows_and_indexes() {
    let (_tmp, pool) = fresh_store().await;
    schema::recreate_table(
        &pool,
        "scratch",
        &[
            ("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            ("name", "TEXT NOT NULL DEFAULT ''"),
            ("note", "TEXT"),
        ],
    )
    .await
    .unwrap();
    sqlx::query("CREATE INDEX idx_scratch_name ON scratch(name)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("CREATE INDEX idx_scratch_note ON scratch(note)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO scratch (name, note) VALUES ('a', 'x'), ('b', 'y')")
        .execute(&pool)
        .await
        .unwrap();

    let dropped = schema::drop_column_with(
        &pool,
        "scratch",
        "note",
        schema::DropColumnStrategy::Rebuild,
    )
    .await
    .unwrap();
    assert!(dropped);

    let columns: Vec<String> = schema::table_columns(&pool, "scratch")
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(columns, vec!["id", "name"]);
    assert_eq!(count_rows(&pool, "scratch").await, 2);

    let indexes: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'scratch' AND sql IS NOT NULL",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(indexes, vec!["idx_scratch_name"]);

    let sql: String =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'scratch'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(sql.contains("AUTOINCREMENT"));

    assert!(!schema::drop_column_with(&pool, "scratch", "note", schema::DropColumnStrategy::Rebuild)
        .await
        .unwrap());
    assert!(matches!(
        schema::drop_column(&pool, "scratch", "id").await,
        Err(StoreError::Maintenance(_))
    ));
}

#[tokio::test]
async fn test_native_drop_column() {
    let (_tmp, pool) = fresh_store().await;
    assert!(schema::sqlite_supports_drop_column(&pool).await.unwrap());

    schema::add_column_if_missing(&pool, "items", "legacy_code", "TEXT")
        .await
        .unwrap();
    assert!(schema::drop_column(&pool, "items", "legacy_code").await.unwrap());
    assert!(!schema::column_exists(&pool, "items", "legacy_code").await.unwrap());
}

#[tokio::test]
async fn test_recreate_table_discards_rows() {
    let (_tmp, pool) = fresh_store().await;
    schema::recreate_table(&pool, "scratch", &[("v", "INTEGER")])
        .await
        .unwrap();
    sqlx::query("INSERT INTO scratch (v) VALUES (1)")
        .execute(&pool)
        .await
        .unwrap();

    schema::recreate_table(&pool, "scratch", &[("v", "INTEGER"), ("w", "TEXT")])
        .await
        .unwrap();
    assert_eq!(count_rows(&pool, "scratch").await, 0);
    assert_eq!(schema::table_columns(&pool, "scratch").await.unwrap().len(), 2);
}
