//! Versioned schema migrations.
//!
//! The schema is an append-only list of [`Migration`] steps. `schema_version`
//! holds the number of steps applied. [`apply_migrations`] opens one outer
//! transaction for the whole session and a savepoint per step, stamping the
//! version inside the savepoint after the step's DDL. Any failing step rolls
//! back every step of the session.

use sqlx::sqlite::SqlitePool;
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db;
use crate::error::{Result, StoreError};

/// One numbered schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

/// Outcome of a migration session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: i64,
    pub to_version: i64,
    pub applied: Vec<i64>,
}

/// Steps are never edited or reordered. New versions go at the end.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "item catalog",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS items (
                item_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                item_name   TEXT NOT NULL UNIQUE,
                price       INTEGER NOT NULL,
                freshness   INTEGER,
                sales_class TEXT NOT NULL DEFAULT 'normal'
                            CHECK (sales_class IN ('normal', 'limited')),
                item_type   TEXT NOT NULL DEFAULT 'ambient'
                            CHECK (item_type IN ('ambient', 'heated', 'chukaman', 'oden')),
                is_active   INTEGER NOT NULL DEFAULT 1
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_items_name ON items(item_name)",
        ],
    },
    Migration {
        version: 2,
        description: "hourly item facts",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS fact_hourly_long (
                date    TEXT    NOT NULL,
                hour    INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 23),
                item_id INTEGER NOT NULL,
                metric  TEXT    NOT NULL
                        CHECK (metric IN ('prepared', 'sold', 'discarded', 'stock')),
                value   INTEGER NOT NULL DEFAULT 0 CHECK (value >= 0),
                PRIMARY KEY (date, hour, item_id, metric),
                FOREIGN KEY (item_id) REFERENCES items(item_id) ON DELETE RESTRICT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_fhl_item_date ON fact_hourly_long(item_id, date)",
        ],
    },
    Migration {
        version: 3,
        description: "hourly customer counts",
        statements: &[r#"
            CREATE TABLE IF NOT EXISTS fact_hourly_customer (
                date           TEXT    NOT NULL,
                hour           INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 23),
                customer_count INTEGER NOT NULL DEFAULT 0 CHECK (customer_count >= 0),
                PRIMARY KEY (date, hour)
            )
            "#],
    },
    Migration {
        version: 4,
        description: "daily item summaries",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS fact_daily (
                date      TEXT    NOT NULL,
                item_id   INTEGER NOT NULL,
                prepared  INTEGER NOT NULL DEFAULT 0,
                sold      INTEGER NOT NULL DEFAULT 0,
                discarded INTEGER NOT NULL DEFAULT 0,
                stock_end INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (date, item_id),
                FOREIGN KEY (item_id) REFERENCES items(item_id) ON DELETE RESTRICT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_fd_item_date ON fact_daily(item_id, date)",
        ],
    },
    Migration {
        version: 5,
        description: "daily customer summaries",
        statements: &[r#"
            CREATE TABLE IF NOT EXISTS fact_daily_customer (
                date           TEXT PRIMARY KEY,
                customer_count INTEGER NOT NULL DEFAULT 0
            )
            "#],
    },
    Migration {
        version: 6,
        description: "recognition result cache",
        statements: &[r#"
            CREATE TABLE IF NOT EXISTS recognition_cache (
                cache_key   TEXT PRIMARY KEY,
                created_at  INTEGER NOT NULL,
                params      TEXT NOT NULL,
                result_json TEXT NOT NULL
            )
            "#],
    },
];

/// Version a fully migrated data file ends at.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Read the stamped version, creating the marker at 0 on a fresh file.
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let version = read_or_bootstrap(&mut tx).await?;
    tx.commit().await?;
    Ok(version)
}

/// Bring the data file up to [`latest_version`].
pub async fn migrate(pool: &SqlitePool) -> Result<MigrationReport> {
    apply_migrations(pool, MIGRATIONS).await
}

/// Apply every step in `steps` newer than the stamped version.
pub async fn apply_migrations(pool: &SqlitePool, steps: &[Migration]) -> Result<MigrationReport> {
    validate_plan(steps)?;
    let target = steps.last().map(|m| m.version).unwrap_or(0);

    let mut tx = pool.begin().await?;
    let from_version = read_or_bootstrap(&mut tx).await?;

    if from_version > target {
        tx.rollback().await?;
        return Err(StoreError::MigrationPlan(format!(
            "data file is at schema v{}, newer than the known v{}",
            from_version, target
        )));
    }

    let mut applied = Vec::new();
    for step in steps.iter().filter(|m| m.version > from_version) {
        if let Err(err) = apply_step(&mut tx, step).await {
            warn!(version = step.version, error = %err, "migration failed, rolling back session");
            tx.rollback().await?;
            return Err(err);
        }
        info!(version = step.version, description = step.description, "applied migration");
        applied.push(step.version);
    }

    tx.commit().await?;

    if applied.is_empty() {
        debug!(version = from_version, "schema up to date");
    }

    Ok(MigrationReport {
        from_version,
        to_version: from_version.max(target),
        applied,
    })
}

/// CLI entry point for `ffm init`.
pub async fn run_migrations(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let report = migrate(&pool).await?;
    pool.close().await;

    if report.applied.is_empty() {
        println!("Schema is up to date (v{}).", report.to_version);
    } else {
        println!(
            "Migrated schema v{} -> v{} ({} step{}).",
            report.from_version,
            report.to_version,
            report.applied.len(),
            if report.applied.len() == 1 { "" } else { "s" }
        );
    }
    println!("Database initialized successfully.");
    Ok(())
}

fn validate_plan(steps: &[Migration]) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        let expected = index as i64 + 1;
        if step.version != expected {
            return Err(StoreError::MigrationPlan(format!(
                "step {} has version {}, expected {}",
                index, step.version, expected
            )));
        }
    }
    Ok(())
}

async fn read_or_bootstrap(conn: &mut SqliteConnection) -> Result<i64> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .execute(&mut *conn)
        .await?;

    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(&mut *conn)
        .await?;

    match version {
        Some(v) => Ok(v),
        None => {
            sqlx::query("INSERT INTO schema_version (version) VALUES (0)")
                .execute(&mut *conn)
                .await?;
            Ok(0)
        }
    }
}

async fn apply_step(conn: &mut SqliteConnection, step: &Migration) -> Result<()> {
    let failed = |source| StoreError::Migration {
        version: step.version,
        source,
    };

    let mut savepoint = conn.begin().await.map_err(failed)?;

    for sql in step.statements {
        if let Err(source) = sqlx::query(*sql).execute(&mut *savepoint).await {
            savepoint.rollback().await?;
            return Err(failed(source));
        }
    }

    sqlx::query("UPDATE schema_version SET version = ?")
        .bind(step.version)
        .execute(&mut *savepoint)
        .await
        .map_err(failed)?;

    savepoint.commit().await.map_err(failed)?;
    Ok(())
}
